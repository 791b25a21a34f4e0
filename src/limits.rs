use crate::model::Ms;

// ── Tenants ──────────────────────────────────────────────

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

// ── Per-tenant tables ────────────────────────────────────

pub const MAX_USERS_PER_TENANT: usize = 100_000;
pub const MAX_FLOORS_PER_TENANT: usize = 10_000;
pub const MAX_ROOMS_PER_TENANT: usize = 100_000;
pub const MAX_ROOMS_PER_FLOOR: u32 = 1_000;
pub const MAX_LEDGER_ENTRIES_PER_ROOM: usize = 1_000_000;

// ── Field sizes ──────────────────────────────────────────

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_ROOM_CAPACITY: u32 = 10_000;
pub const DEFAULT_ROOM_CAPACITY: u32 = 4;

// ── WAL ──────────────────────────────────────────────────

/// Largest encoded event. A full floor provisioning record is far below it.
pub const MAX_WAL_RECORD_BYTES: usize = 1 << 20;

// ── Time ─────────────────────────────────────────────────

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// Ledger baseline for a room that has never seen an update attempt
/// (1999-12-07T00:54:42.400Z). Older than any real submission.
pub const LEDGER_EPOCH_MS: Ms = 944_528_082_400;
