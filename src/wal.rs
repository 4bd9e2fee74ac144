use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Encode a single event as `[len][bincode][crc32]`.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Result of reading a WAL back from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// A torn or corrupt tail was found and ignored.
    pub discarded_tail: bool,
    /// Byte length of the intact prefix.
    pub valid_len: u64,
}

/// Append-only Write-Ahead Log of booking transactions.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`.
/// A truncated last entry (crash mid-write) fails its length or CRC check
/// and is dropped on replay, so a transaction is either fully on disk or absent.
///
/// Appends are buffered in memory until `flush_sync`. A failed flush is undone
/// with `rollback`, which cuts the file back to the last synced length.
pub struct Wal {
    file: File,
    buf: Vec<u8>,
    path: PathBuf,
    /// File length after the last successful `flush_sync`.
    synced_len: u64,
    pending: u64,
    appends_since_compact: u64,
    /// Set when a rollback itself failed; the file tail is unknown.
    poisoned: bool,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let synced_len = file.metadata()?.len();
        Ok(Self {
            file,
            buf: Vec::new(),
            path: path.to_path_buf(),
            synced_len,
            pending: 0,
            appends_since_compact: 0,
            poisoned: false,
        })
    }

    /// Append and fsync one event. The engine batches through
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL unusable after a failed rollback"));
        }
        encode_record(&mut self.buf, event)?;
        self.pending += 1;
        Ok(())
    }

    /// Write the buffer and fsync the file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL unusable after a failed rollback"));
        }
        self.file.write_all(&self.buf)?;
        self.file.sync_all()?;
        self.synced_len += self.buf.len() as u64;
        self.buf.clear();
        self.appends_since_compact += self.pending;
        self.pending = 0;
        Ok(())
    }

    /// Drop unsynced appends and cut the file back to the last synced length,
    /// so bytes of a failed batch never surface on replay.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.buf.clear();
        self.pending = 0;
        let result = self.file.set_len(self.synced_len).and_then(|()| self.file.sync_all());
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the compacted event set to a side file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let file = File::create(Self::compact_path(path))?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the side file over the WAL and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.synced_len = file.metadata()?.len();
        self.file = file;
        self.buf.clear();
        self.pending = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Cut a torn tail off so new appends land after the last intact record.
    pub fn truncate(path: &Path, len: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        file.sync_all()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact event from disk. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            let mut len_buf = [0u8; 4];
            match read_exact_or_eof(&mut reader, &mut len_buf)? {
                Chunk::Full => {}
                Chunk::CleanEof => break,
                Chunk::Torn => {
                    replay.discarded_tail = true;
                    break;
                }
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            let mut crc_buf = [0u8; 4];
            if !matches!(read_exact_or_eof(&mut reader, &mut payload)?, Chunk::Full)
                || !matches!(read_exact_or_eof(&mut reader, &mut crc_buf)?, Chunk::Full)
            {
                replay.discarded_tail = true;
                break;
            }

            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                replay.discarded_tail = true;
                break;
            }

            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => {
                    replay.events.push(event);
                    replay.valid_len += 4 + len as u64 + 4;
                }
                Err(_) => {
                    replay.discarded_tail = true;
                    break;
                }
            }
        }

        Ok(replay)
    }
}

enum Chunk {
    Full,
    CleanEof,
    Torn,
}

/// Like `read_exact`, but tells a clean EOF (nothing read) from a torn record.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Chunk> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(Chunk::CleanEof),
            Ok(0) => return Ok(Chunk::Torn),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Chunk::Full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Branch, TimeSlot};
    use chrono::{NaiveDate, NaiveTime};
    use ulid::Ulid;

    fn branch_event() -> Event {
        Event::BranchCreated {
            branch: Branch {
                id: Ulid::new(),
                name: "Downtown Branch".into(),
                address: "123 Main St".into(),
                phone: None,
                email: None,
                operating_hours: Some("9:00 AM - 6:00 PM".into()),
            },
        }
    }

    fn slot_event(branch_id: Ulid) -> Event {
        Event::SlotCreated {
            slot: TimeSlot::new(
                Ulid::new(),
                branch_id,
                NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
                3,
            ),
        }
    }

    #[test]
    fn append_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("append.wal");

        let events = vec![branch_event(), slot_event(Ulid::new())];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, events);
        assert!(!replay.discarded_tail);
    }

    #[test]
    fn replay_drops_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("torn.wal");

        let event = branch_event();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![event.clone()]);
        assert!(replay.discarded_tail);

        Wal::truncate(&path, replay.valid_len).unwrap();
        let later = branch_event();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&later).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![event, later]);
        assert!(!replay.discarded_tail);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let replay = Wal::replay(&dir.path().join("absent.wal")).unwrap();
        assert!(replay.events.is_empty());
        assert!(!replay.discarded_tail);
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crc.wal");

        let good = branch_event();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&slot_event(Ulid::new())).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![good]);
        assert!(replay.discarded_tail);
    }

    #[test]
    fn compact_shrinks_and_accepts_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compact.wal");

        let branch = branch_event();
        let branch_id = match &branch {
            Event::BranchCreated { branch } => branch.id,
            _ => unreachable!(),
        };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&branch).unwrap();
            for _ in 0..20 {
                wal.append(&slot_event(branch_id)).unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let later = slot_event(branch_id);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(std::slice::from_ref(&branch)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&later).unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![branch, later]);
    }

    #[test]
    fn buffered_appends_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buffered.wal");

        let events: Vec<Event> = (0..5).map(|_| branch_event()).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 0);
            wal.flush_sync().unwrap();
            assert_eq!(wal.appends_since_compact(), 5);
        }

        assert_eq!(Wal::replay(&path).unwrap().events, events);
    }

    #[test]
    fn rollback_discards_failed_batch_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollback.wal");

        let kept = branch_event();
        let later = branch_event();
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();

        wal.append_buffered(&branch_event()).unwrap();
        {
            // Half a batch reached the file before the sync failed
            let payload = bincode::serialize(&branch_event()).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&crc32fast::hash(&payload).to_le_bytes()).unwrap();
        }
        wal.rollback().unwrap();
        assert_eq!(wal.appends_since_compact(), 1);

        wal.append(&later).unwrap();
        drop(wal);

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![kept, later]);
        assert!(!replay.discarded_tail);
    }
}
