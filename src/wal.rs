use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::limits::MAX_WAL_RECORD_BYTES;
use crate::model::Event;

/// Encode a single event to [len][bincode][crc32] format. Returns the
/// record size in bytes.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_WAL_RECORD_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "event too large"));
    }
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(payload.len() as u64 + 8)
}

/// Append-only Write-Ahead Log.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A torn or corrupt tail ends replay; `recover` cuts it off before appending.
///
/// Nothing is ever rewritten: the version ledger and booking history are
/// part of the state, so every record stays live.
///
/// A failed batch is cut back off with `rollback`. If that fails too the log
/// is poisoned and refuses further appends.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends: u64,
    /// File length covered by the last successful `flush_sync`.
    synced_len: u64,
    /// Bytes appended since then.
    pending_len: u64,
    poisoned: bool,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let synced_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends: 0,
            synced_len,
            pending_len: 0,
            poisoned: false,
        })
    }

    /// Append a single event and fsync. Tests only; the engine batches
    /// through `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Append a single event to the BufWriter without flushing or syncing.
    /// Call `flush_sync()` after the batch to durably commit all buffered events.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.check_poisoned()?;
        // Size is checked before any byte is written, so a refused event
        // leaves nothing behind.
        let size = encode_event(&mut self.writer, event)?;
        self.pending_len += size;
        self.appends += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.check_poisoned()?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.synced_len += self.pending_len;
        self.pending_len = 0;
        Ok(())
    }

    /// Drop everything appended since the last successful `flush_sync`,
    /// whether still buffered or already written, and reopen for appending.
    pub fn rollback(&mut self) -> io::Result<()> {
        let result = self.cut_to_synced();
        if let Err(e) = &result {
            self.poisoned = true;
            tracing::error!(path = %self.path.display(), "WAL rollback failed, refusing further appends: {e}");
        }
        result
    }

    fn cut_to_synced(&mut self) -> io::Result<()> {
        let reopened = OpenOptions::new().append(true).open(&self.path)?;
        let failed = std::mem::replace(&mut self.writer, BufWriter::new(reopened));
        // into_parts hands back the buffer without writing it out.
        let (file, _unwritten) = failed.into_parts();
        file.set_len(self.synced_len)?;
        file.sync_all()?;
        self.pending_len = 0;
        Ok(())
    }

    fn check_poisoned(&self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL poisoned by an earlier failed rollback"));
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events appended through this handle since it was opened.
    pub fn appends(&self) -> u64 {
        self.appends
    }

    /// Read every intact event back. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.events)
    }

    /// Replay the log and open it for appending. A torn or corrupt tail is
    /// cut off first, so new records never land behind unreadable bytes.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let scanned = scan(path)?;
        if scanned.discarded > 0 {
            tracing::warn!(
                path = %path.display(),
                kept = scanned.events.len(),
                discarded_bytes = scanned.discarded,
                "truncating damaged WAL tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(scanned.valid_len)?;
            file.sync_all()?;
        }
        Ok((Self::open(path)?, scanned.events))
    }
}

struct Scan {
    events: Vec<Event>,
    /// Byte length of the intact prefix.
    valid_len: u64,
    /// Bytes after the intact prefix.
    discarded: u64,
}

enum Record {
    Intact { event: Event, size: u64 },
    End,
    Damaged,
}

fn scan(path: &Path) -> io::Result<Scan> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Ok(Scan {
                events: Vec::new(),
                valid_len: 0,
                discarded: 0,
            });
        }
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0u64;

    loop {
        match read_record(&mut reader, file_len - valid_len)? {
            Record::Intact { event, size } => {
                events.push(event);
                valid_len += size;
            }
            Record::End => break,
            Record::Damaged => {
                tracing::warn!(path = %path.display(), offset = valid_len, "WAL replay stopped at damaged record");
                break;
            }
        }
    }

    Ok(Scan {
        events,
        valid_len,
        discarded: file_len.saturating_sub(valid_len),
    })
}

/// Fill `buf`, reporting `false` if the file ends first.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read one record from a reader positioned `remaining` bytes before EOF.
fn read_record(reader: &mut impl Read, remaining: u64) -> io::Result<Record> {
    if remaining == 0 {
        return Ok(Record::End);
    }
    let mut len_buf = [0u8; 4];
    if !fill(reader, &mut len_buf)? {
        return Ok(Record::Damaged);
    }
    let len = u32::from_le_bytes(len_buf) as u64;
    // A garbage length must not turn into a huge allocation.
    let size = len + 8;
    if size > remaining || len > MAX_WAL_RECORD_BYTES as u64 {
        return Ok(Record::Damaged);
    }

    let mut payload = vec![0u8; len as usize];
    let mut crc_buf = [0u8; 4];
    if !fill(reader, &mut payload)? || !fill(reader, &mut crc_buf)? {
        return Ok(Record::Damaged);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Record::Damaged);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Record::Intact { event, size }),
        Err(_) => Ok(Record::Damaged),
    }
}
