use super::*;
use crate::limits::*;

// Two client-claimed "as of" times, T0 < T1, both after the ledger epoch.
const T0: Ms = 1_700_000_000_000;
const T1: Ms = 1_700_000_060_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roomledger_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap()
}

async fn user(engine: &Engine, name: &str) -> Ulid {
    engine
        .register_user(name.into(), format!("{name}@example.com"), false)
        .await
        .unwrap()
        .id
}

fn proposal(user_id: Ulid, floor_id: Ulid, capacity: u32, availability: bool, as_of: Ms) -> RoomProposal {
    RoomProposal {
        user_id,
        floor_id,
        capacity,
        availability,
        as_of,
    }
}

// ── Floor provisioning ───────────────────────────────────

#[tokio::test]
async fn create_floor_provisions_default_rooms() {
    let engine = new_engine("provision_defaults.wal");
    let provisioned = engine.create_floor("Third".into(), 3).await.unwrap();

    assert_eq!(provisioned.floor.name, "Third");
    assert_eq!(provisioned.floor.rooms, 3);
    assert_eq!(provisioned.rooms.len(), 3);

    let rooms = engine.list_rooms(Some(provisioned.floor.id)).await;
    assert_eq!(rooms.len(), 3);
    for room in &rooms {
        assert_eq!(room.floor_id, provisioned.floor.id);
        assert_eq!(room.capacity, DEFAULT_ROOM_CAPACITY);
        assert!(room.availability);
        assert_eq!(room.last_booked_at, None);
    }
}

#[tokio::test]
async fn create_floor_without_rooms() {
    let engine = new_engine("provision_empty.wal");
    let provisioned = engine.create_floor("Roof".into(), 0).await.unwrap();
    assert!(provisioned.rooms.is_empty());
    assert!(engine.list_rooms(Some(provisioned.floor.id)).await.is_empty());
    assert_eq!(engine.list_floors().len(), 1);
}

#[tokio::test]
async fn create_floor_over_limit_leaves_nothing_behind() {
    let engine = new_engine("provision_over_limit.wal");
    let result = engine.create_floor("Tower".into(), MAX_ROOMS_PER_FLOOR + 1).await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
    assert!(engine.list_floors().is_empty());
    assert!(engine.list_rooms(None).await.is_empty());
}

#[tokio::test]
async fn create_floor_blank_name_rejected() {
    let engine = new_engine("provision_blank.wal");
    assert!(matches!(
        engine.create_floor("  ".into(), 2).await,
        Err(EngineError::Invalid(_))
    ));
}

#[tokio::test]
async fn concurrent_floor_creation_keeps_every_room() {
    let engine = Arc::new(new_engine("provision_concurrent.wal"));
    let mut handles = Vec::new();
    for i in 0..10 {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move { eng.create_floor(format!("F{i}"), 5).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let floors = engine.list_floors();
    assert_eq!(floors.len(), 10);
    for floor in floors {
        assert_eq!(engine.list_rooms(Some(floor.id)).await.len(), 5);
    }
}

#[tokio::test]
async fn floor_by_name_returns_first_created() {
    let engine = new_engine("floor_by_name.wal");
    let first = engine.create_floor("Annex".into(), 1).await.unwrap();
    engine.create_floor("Annex".into(), 2).await.unwrap();

    assert_eq!(engine.floor_by_name("Annex").unwrap().id, first.floor.id);
    assert!(engine.floor_by_name("Basement").is_none());
}

#[tokio::test]
async fn floors_created_within_one_millisecond_keep_commit_order() {
    let path = test_wal_path("floor_order.wal");
    let mut created = Vec::new();
    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        // Many floors per millisecond, so ulid order alone would shuffle them.
        for i in 0..200 {
            let name = format!("Wing {}", i / 2);
            created.push(engine.create_floor(name, 0).await.unwrap().floor);
        }
        for pair in created.chunks(2) {
            assert_eq!(engine.floor_by_name(&pair[0].name).unwrap().id, pair[0].id);
        }
        let listed: Vec<Ulid> = engine.list_floors().iter().map(|f| f.id).collect();
        assert_eq!(listed, created.iter().map(|f| f.id).collect::<Vec<_>>());
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let listed: Vec<Ulid> = engine.list_floors().iter().map(|f| f.id).collect();
    assert_eq!(listed, created.iter().map(|f| f.id).collect::<Vec<_>>());
    assert_eq!(engine.floor_by_name("Wing 7").unwrap().id, created[14].id);
}

// ── Conflict resolver ────────────────────────────────────

#[tokio::test]
async fn first_update_beats_epoch_baseline() {
    let engine = new_engine("resolve_first.wal");
    let alice = user(&engine, "alice").await;
    let floor = engine.create_floor("Ground".into(), 1).await.unwrap();
    let room_id = floor.rooms[0].id;

    assert_eq!(engine.baseline(room_id).await.unwrap(), LEDGER_EPOCH_MS);

    let outcome = engine
        .resolve_update(room_id, proposal(alice, floor.floor.id, 10, true, T0))
        .await
        .unwrap();
    match outcome {
        UpdateOutcome::Applied { room, entry } => {
            assert_eq!(room.capacity, 10);
            assert!(entry.accepted);
            assert_eq!(entry.as_of, T0);
            assert_eq!(entry.user_id, alice);
        }
        other => panic!("expected Applied, got {other:?}"),
    }
    assert_eq!(engine.baseline(room_id).await.unwrap(), T0);
}

#[tokio::test]
async fn stale_update_after_newer_one_is_rejected() {
    // A edits as of T1, then B submits an edit based on the older T0 view.
    let engine = new_engine("resolve_stale.wal");
    let a = user(&engine, "a").await;
    let b = user(&engine, "b").await;
    let floor = engine.create_floor("Ground".into(), 1).await.unwrap();
    let fid = floor.floor.id;
    let room_id = floor.rooms[0].id;

    let first = engine.resolve_update(room_id, proposal(a, fid, 6, true, T1)).await.unwrap();
    assert!(first.is_applied());

    let second = engine.resolve_update(room_id, proposal(b, fid, 2, false, T0)).await.unwrap();
    match &second {
        UpdateOutcome::Rejected {
            authoritative_as_of,
            entry,
        } => {
            assert_eq!(*authoritative_as_of, T1);
            assert!(!entry.accepted);
            // The ledger keeps what B proposed.
            assert_eq!(entry.capacity, 2);
            assert!(!entry.availability);
            assert_eq!(entry.user_id, b);
        }
        other => panic!("expected Rejected, got {other:?}"),
    }

    let room = engine.get_room(room_id).await.unwrap();
    assert_eq!(room.capacity, 6);
    assert!(room.availability);
    assert!(matches!(
        second.into_applied(),
        Err(EngineError::Conflict { authoritative_as_of: T1, .. })
    ));
}

#[tokio::test]
async fn equal_as_of_is_rejected() {
    let engine = new_engine("resolve_equal.wal");
    let u = user(&engine, "u").await;
    let floor = engine.create_floor("Ground".into(), 1).await.unwrap();
    let fid = floor.floor.id;
    let room_id = floor.rooms[0].id;

    engine.resolve_update(room_id, proposal(u, fid, 6, true, T0)).await.unwrap();
    let retry = engine.resolve_update(room_id, proposal(u, fid, 6, true, T0)).await.unwrap();
    assert!(!retry.is_applied());
}

#[tokio::test]
async fn rejected_attempts_still_raise_the_baseline_only_if_newer() {
    let engine = new_engine("resolve_baseline.wal");
    let u = user(&engine, "u").await;
    let floor = engine.create_floor("Ground".into(), 1).await.unwrap();
    let fid = floor.floor.id;
    let room_id = floor.rooms[0].id;

    engine.resolve_update(room_id, proposal(u, fid, 6, true, T1)).await.unwrap();
    engine.resolve_update(room_id, proposal(u, fid, 8, true, T0)).await.unwrap();
    assert_eq!(engine.baseline(room_id).await.unwrap(), T1);
}

#[tokio::test]
async fn monotonic_updates_all_apply() {
    let engine = new_engine("resolve_monotonic.wal");
    let u = user(&engine, "u").await;
    let floor = engine.create_floor("Ground".into(), 1).await.unwrap();
    let fid = floor.floor.id;
    let room_id = floor.rooms[0].id;

    for i in 1..=5u32 {
        let outcome = engine
            .resolve_update(room_id, proposal(u, fid, i, true, T0 + i as Ms))
            .await
            .unwrap();
        assert!(outcome.is_applied());
    }
    assert_eq!(engine.get_room(room_id).await.unwrap().capacity, 5);
}

#[tokio::test]
async fn ledger_grows_by_one_per_call() {
    let engine = new_engine("resolve_ledger_len.wal");
    let u = user(&engine, "u").await;
    let floor = engine.create_floor("Ground".into(), 1).await.unwrap();
    let fid = floor.floor.id;
    let room_id = floor.rooms[0].id;

    // Mix of fresh and stale timestamps.
    let as_ofs = [T0, T1, T0, T1, T1 + 1, T0 - 1, T1 + 2];
    for (k, as_of) in as_ofs.iter().enumerate() {
        engine.resolve_update(room_id, proposal(u, fid, 4, true, *as_of)).await.unwrap();
        assert_eq!(engine.versions(room_id).await.unwrap().len(), k + 1);
    }

    let accepted: Vec<bool> = engine
        .versions(room_id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.accepted)
        .collect();
    assert_eq!(accepted, vec![true, true, false, false, true, false, true]);
}

#[tokio::test]
async fn concurrent_updates_with_same_as_of_apply_once() {
    let engine = Arc::new(new_engine("resolve_concurrent.wal"));
    let u = user(&engine, "u").await;
    let floor = engine.create_floor("Ground".into(), 1).await.unwrap();
    let fid = floor.floor.id;
    let room_id = floor.rooms[0].id;

    let n = 16;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.resolve_update(room_id, proposal(u, fid, i + 1, true, T0)).await
        }));
    }
    let mut applied = 0;
    for h in handles {
        if h.await.unwrap().unwrap().is_applied() {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(engine.versions(room_id).await.unwrap().len(), n as usize);
}

#[tokio::test]
async fn update_can_move_room_to_another_floor() {
    let engine = new_engine("resolve_move.wal");
    let u = user(&engine, "u").await;
    let ground = engine.create_floor("Ground".into(), 2).await.unwrap();
    let first = engine.create_floor("First".into(), 1).await.unwrap();
    let room_id = ground.rooms[0].id;

    engine
        .resolve_update(room_id, proposal(u, first.floor.id, 4, true, T0))
        .await
        .unwrap();

    assert_eq!(engine.list_rooms(Some(ground.floor.id)).await.len(), 1);
    let upstairs = engine.list_rooms(Some(first.floor.id)).await;
    assert_eq!(upstairs.len(), 2);
    assert!(upstairs.iter().any(|r| r.id == room_id));
}

#[tokio::test]
async fn update_unknown_room_user_or_floor_is_not_found() {
    let engine = new_engine("resolve_not_found.wal");
    let u = user(&engine, "u").await;
    let floor = engine.create_floor("Ground".into(), 1).await.unwrap();
    let fid = floor.floor.id;
    let room_id = floor.rooms[0].id;

    assert!(matches!(
        engine.resolve_update(Ulid::new(), proposal(u, fid, 4, true, T0)).await,
        Err(EngineError::NotFound { entity: "room", .. })
    ));
    assert!(matches!(
        engine.resolve_update(room_id, proposal(Ulid::new(), fid, 4, true, T0)).await,
        Err(EngineError::NotFound { entity: "user", .. })
    ));
    assert!(matches!(
        engine.resolve_update(room_id, proposal(u, Ulid::new(), 4, true, T0)).await,
        Err(EngineError::NotFound { entity: "floor", .. })
    ));
    // A missing room is reported even when the proposal is also malformed.
    assert!(matches!(
        engine.resolve_update(Ulid::new(), proposal(u, fid, 0, true, T0)).await,
        Err(EngineError::NotFound { entity: "room", .. })
    ));
    // Failed lookups record nothing.
    assert!(engine.versions(room_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_proposal_records_nothing() {
    let engine = new_engine("resolve_invalid.wal");
    let u = user(&engine, "u").await;
    let floor = engine.create_floor("Ground".into(), 1).await.unwrap();
    let room_id = floor.rooms[0].id;

    let result = engine
        .resolve_update(room_id, proposal(u, floor.floor.id, 0, true, T0))
        .await;
    assert!(matches!(result, Err(EngineError::Invalid(_))));
    assert!(engine.versions(room_id).await.unwrap().is_empty());
}

// ── Booking transitioner ─────────────────────────────────

#[tokio::test]
async fn book_available_room() {
    let engine = new_engine("book_ok.wal");
    let u = user(&engine, "u").await;
    let floor = engine.create_floor("Ground".into(), 1).await.unwrap();
    let room_id = floor.rooms[0].id;

    let booked = engine.book(room_id, u, floor.floor.id).await.unwrap();
    assert_eq!(booked.booking.room_id, room_id);
    assert_eq!(booked.booking.user_id, u);
    assert!(!booked.room.availability);
    assert_eq!(booked.room.last_booked_at, Some(booked.booking.booked_at));

    assert_eq!(engine.room_bookings(room_id).await.unwrap(), vec![booked.booking.clone()]);
    assert_eq!(engine.user_bookings(u).await, vec![booked.booking]);
}

#[tokio::test]
async fn book_unavailable_room_fails_without_mutation() {
    let engine = new_engine("book_twice.wal");
    let a = user(&engine, "a").await;
    let b = user(&engine, "b").await;
    let floor = engine.create_floor("Ground".into(), 1).await.unwrap();
    let room_id = floor.rooms[0].id;

    let first = engine.book(room_id, a, floor.floor.id).await.unwrap();
    let second = engine.book(room_id, b, floor.floor.id).await;
    assert!(matches!(second, Err(EngineError::Unavailable(id)) if id == room_id));

    let room = engine.get_room(room_id).await.unwrap();
    assert_eq!(room.last_booked_at, Some(first.booking.booked_at));
    assert_eq!(engine.room_bookings(room_id).await.unwrap().len(), 1);
    assert!(engine.user_bookings(b).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookers_exactly_one_wins() {
    let engine = Arc::new(new_engine("book_race.wal"));
    let floor = engine.create_floor("Ground".into(), 1).await.unwrap();
    let fid = floor.floor.id;
    let room_id = floor.rooms[0].id;

    let n = 32;
    let mut users = Vec::new();
    for i in 0..n {
        users.push(user(&engine, &format!("racer{i}")).await);
    }

    let mut handles = Vec::new();
    for uid in users {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move { eng.book(room_id, uid, fid).await }));
    }

    let mut booked = 0;
    let mut unavailable = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => booked += 1,
            Err(EngineError::Unavailable(_)) => unavailable += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(booked, 1);
    assert_eq!(unavailable, n - 1);
    assert_eq!(engine.room_bookings(room_id).await.unwrap().len(), 1);
    assert!(!engine.get_room(room_id).await.unwrap().availability);
}

#[tokio::test]
async fn book_checks_floor_user_and_room() {
    let engine = new_engine("book_checks.wal");
    let u = user(&engine, "u").await;
    let ground = engine.create_floor("Ground".into(), 1).await.unwrap();
    let first = engine.create_floor("First".into(), 1).await.unwrap();
    let room_id = ground.rooms[0].id;

    assert!(matches!(
        engine.book(room_id, u, first.floor.id).await,
        Err(EngineError::FloorMismatch { actual, .. }) if actual == ground.floor.id
    ));
    assert!(matches!(
        engine.book(room_id, Ulid::new(), ground.floor.id).await,
        Err(EngineError::NotFound { entity: "user", .. })
    ));
    assert!(matches!(
        engine.book(Ulid::new(), u, ground.floor.id).await,
        Err(EngineError::NotFound { entity: "room", .. })
    ));
    assert!(engine.get_room(room_id).await.unwrap().availability);
}

#[tokio::test]
async fn admin_reopen_releases_room_but_keeps_booking_history() {
    let engine = new_engine("book_reopen.wal");
    let admin = engine
        .register_user("ops".into(), "ops@example.com".into(), true)
        .await
        .unwrap()
        .id;
    let guest = user(&engine, "guest").await;
    let floor = engine.create_floor("Ground".into(), 1).await.unwrap();
    let fid = floor.floor.id;
    let room_id = floor.rooms[0].id;

    let first = engine.book(room_id, guest, fid).await.unwrap();
    let reopened = engine
        .resolve_update(room_id, proposal(admin, fid, 4, true, T0))
        .await
        .unwrap();
    assert!(reopened.is_applied());

    let second = engine.book(room_id, guest, fid).await.unwrap();
    let history = engine.room_bookings(room_id).await.unwrap();
    assert_eq!(history, vec![first.booking, second.booking]);
}

#[tokio::test]
async fn update_marking_room_unavailable_blocks_booking() {
    let engine = new_engine("book_out_of_service.wal");
    let u = user(&engine, "u").await;
    let floor = engine.create_floor("Ground".into(), 1).await.unwrap();
    let fid = floor.floor.id;
    let room_id = floor.rooms[0].id;

    engine.resolve_update(room_id, proposal(u, fid, 4, false, T0)).await.unwrap();
    assert!(matches!(
        engine.book(room_id, u, fid).await,
        Err(EngineError::Unavailable(_))
    ));
}

// ── Users ────────────────────────────────────────────────

#[tokio::test]
async fn register_and_get_user() {
    let engine = new_engine("user_register.wal");
    let info = engine
        .register_user("Ana".into(), "ana@example.com".into(), true)
        .await
        .unwrap();
    assert_eq!(engine.get_user(info.id).unwrap(), info);
    assert!(matches!(
        engine.get_user(Ulid::new()),
        Err(EngineError::NotFound { entity: "user", .. })
    ));
}

#[tokio::test]
async fn duplicate_email_rejected_case_insensitively() {
    let engine = new_engine("user_duplicate.wal");
    engine
        .register_user("Ana".into(), "ana@example.com".into(), false)
        .await
        .unwrap();
    let dup = engine
        .register_user("Ana B".into(), "ANA@example.com".into(), false)
        .await;
    assert!(matches!(dup, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn malformed_email_rejected() {
    let engine = new_engine("user_bad_email.wal");
    assert!(matches!(
        engine.register_user("x".into(), "not-an-address".into(), false).await,
        Err(EngineError::Invalid(_))
    ));
}

// ── Change feed ──────────────────────────────────────────

#[tokio::test]
async fn subscribers_see_committed_room_events() {
    let engine = new_engine("feed.wal");
    let u = user(&engine, "u").await;
    let floor = engine.create_floor("Ground".into(), 1).await.unwrap();
    let fid = floor.floor.id;
    let room_id = floor.rooms[0].id;

    let mut rx = engine.subscribe(room_id);
    engine.resolve_update(room_id, proposal(u, fid, 9, true, T0)).await.unwrap();
    let booked = engine.book(room_id, u, fid).await.unwrap();
    // A refused booking commits nothing, so it publishes nothing.
    let _ = engine.book(room_id, u, fid).await;

    match rx.recv().await.unwrap() {
        Event::VersionRecorded { entry } => assert_eq!(entry.capacity, 9),
        other => panic!("expected VersionRecorded, got {other:?}"),
    }
    assert_eq!(rx.recv().await.unwrap(), Event::RoomBooked { booking: booked.booking });
    assert!(rx.try_recv().is_err());
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_rooms_ledger_and_bookings() {
    let path = test_wal_path("replay_full.wal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Engine::new(path.clone(), notify.clone()).unwrap();

    let u = user(&engine, "u").await;
    let ground = engine.create_floor("Ground".into(), 2).await.unwrap();
    let first = engine.create_floor("First".into(), 1).await.unwrap();
    let moved = ground.rooms[0].id;
    let booked_room = ground.rooms[1].id;

    engine.resolve_update(moved, proposal(u, first.floor.id, 7, true, T1)).await.unwrap();
    engine.resolve_update(moved, proposal(u, first.floor.id, 3, false, T0)).await.unwrap();
    let booking = engine.book(booked_room, u, ground.floor.id).await.unwrap().booking;

    let replayed = Engine::new(path, notify).unwrap();
    assert_eq!(replayed.get_user(u).unwrap().email, "u@example.com");
    assert_eq!(replayed.list_floors().len(), 2);

    let room = replayed.get_room(moved).await.unwrap();
    assert_eq!(room.floor_id, first.floor.id);
    assert_eq!(room.capacity, 7);
    assert!(room.availability);
    assert_eq!(replayed.versions(moved).await.unwrap(), engine.versions(moved).await.unwrap());
    assert_eq!(replayed.baseline(moved).await.unwrap(), T1);
    assert_eq!(replayed.list_rooms(Some(first.floor.id)).await.len(), 2);

    assert!(!replayed.get_room(booked_room).await.unwrap().availability);
    assert_eq!(replayed.user_bookings(u).await, vec![booking]);

    // Uniqueness survives replay too.
    assert!(matches!(
        replayed.register_user("again".into(), "U@example.com".into(), false).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn group_commit_batches_concurrent_writes() {
    let path = test_wal_path("group_commit.wal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(path.clone(), notify.clone()).unwrap());
    let u = user(&engine, "u").await;
    let floor = engine.create_floor("Ground".into(), 20).await.unwrap();
    let fid = floor.floor.id;

    let mut handles = Vec::new();
    for room in floor.rooms.clone() {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move { eng.book(room.id, u, fid).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let replayed = Engine::new(path, notify).unwrap();
    assert_eq!(replayed.user_bookings(u).await.len(), 20);
    assert!(replayed.list_rooms(Some(fid)).await.iter().all(|r| !r.availability));
}

fn pending(event: Event) -> WalAppend {
    let (response, _rx) = oneshot::channel();
    WalAppend { event, response }
}

#[test]
fn failed_batch_leaves_nothing_to_replay() {
    let path = test_wal_path("failed_batch.wal");
    let mut wal = Wal::open(&path).unwrap();

    // Wide enough that its bytes reach the file before the batch fails.
    let floor = Event::FloorCreated {
        id: Ulid::new(),
        name: "Atrium".into(),
        room_ids: (0..1000).map(|_| Ulid::new()).collect(),
        capacity: DEFAULT_ROOM_CAPACITY,
        created_at: T0,
    };
    let oversized = Event::UserRegistered {
        id: Ulid::new(),
        name: "x".repeat(MAX_WAL_RECORD_BYTES),
        email: "big@example.com".into(),
        is_admin: false,
    };
    assert!(flush_batch(&mut wal, &[pending(floor), pending(oversized)]).is_err());
    assert!(Wal::replay(&path).unwrap().is_empty());

    let user = Event::UserRegistered {
        id: Ulid::new(),
        name: "Ana".into(),
        email: "ana@example.com".into(),
        is_admin: false,
    };
    flush_batch(&mut wal, &[pending(user.clone())]).unwrap();
    drop(wal);
    assert_eq!(Wal::replay(&path).unwrap(), vec![user]);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn unwritable_wal_fails_provisioning_without_partial_floor() {
    // Writes to /dev/full always fail with ENOSPC.
    let engine = Engine::new(PathBuf::from("/dev/full"), Arc::new(NotifyHub::new())).unwrap();

    let err = engine.create_floor("Ground".into(), 3).await.unwrap_err();
    assert!(matches!(err, EngineError::ProvisioningFailed(_)), "{err:?}");
    assert!(engine.list_floors().is_empty());
    assert!(engine.list_rooms(None).await.is_empty());
    assert!(engine.floor_by_name("Ground").is_none());

    assert!(matches!(
        engine.register_user("u".into(), "u@example.com".into(), false).await,
        Err(EngineError::WalError(_))
    ));
}
