use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Upper bound on one record's payload. A length prefix above this is
/// treated as a torn write rather than an allocation request.
const MAX_RECORD_LEN: usize = 16 * 1024 * 1024;

/// Write one record: `[u32 le: payload len][bincode payload][u32 le: crc32 of payload]`.
fn write_record(out: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    out.write_all(&(payload.len() as u32).to_le_bytes())?;
    out.write_all(&payload)?;
    out.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

enum Record {
    /// An intact record and its size on disk.
    Event(Event, u64),
    /// Clean end of file on a record boundary.
    End,
    /// Partial or corrupt record. Everything from here on is discarded.
    Torn(&'static str),
}

/// Fill `buf` completely, or report how the stream ended.
fn fill(input: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match input.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_record(input: &mut impl Read) -> io::Result<Record> {
    let mut word = [0u8; 4];
    if !fill(input, &mut word)? {
        // A zero-length read here is a clean end; a few stray bytes are not,
        // but there is nothing to recover either way.
        return Ok(Record::End);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(Record::Torn("length prefix out of range"));
    }

    let mut payload = vec![0u8; len];
    if !fill(input, &mut payload)? {
        return Ok(Record::Torn("payload cut short"));
    }
    if !fill(input, &mut word)? {
        return Ok(Record::Torn("checksum cut short"));
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(Record::Torn("checksum mismatch"));
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Record::Event(event, 8 + len as u64)),
        Err(_) => Ok(Record::Torn("undecodable payload")),
    }
}

/// The append-only journal every state change goes through.
///
/// Appends are buffered; `flush_sync` makes everything buffered so far
/// durable in one fsync. A crash mid-write leaves a torn tail that replay
/// drops.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Buffer one record. Not durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(path: &Path) -> PathBuf {
        path.with_extension("wal.compact")
    }

    /// Write a replacement journal next to `path` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(Self::staging_path(path))?);
        for event in events {
            write_record(&mut out, event)?;
        }
        out.flush()?;
        out.get_ref().sync_all()
    }

    /// Rename the replacement over the live journal and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        // Anything still buffered belongs to the old file.
        self.writer.flush()?;
        fs::rename(Self::staging_path(&self.path), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read back every intact record. A missing file is an empty journal.
    ///
    /// A torn tail is cut off the file so later appends don't land behind it.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut input = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;
        loop {
            match read_record(&mut input)? {
                Record::Event(event, size) => {
                    events.push(event);
                    valid_len += size;
                }
                Record::End => break,
                Record::Torn(why) => {
                    warn!(
                        path = %path.display(),
                        kept = events.len(),
                        "journal tail discarded: {why}"
                    );
                    break;
                }
            }
        }
        drop(input);
        if fs::metadata(path)?.len() > valid_len {
            OpenOptions::new().write(true).open(path)?.set_len(valid_len)?;
        }
        Ok(events)
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Nanny, NannyStatus};

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("carebook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn registered(id: i64) -> Event {
        Event::NannyRegistered {
            nanny: Nanny {
                id,
                name: format!("nanny {id}"),
                status: NannyStatus::Active,
                available: true,
            },
        }
    }

    fn toggled(id: i64, available: bool) -> Event {
        Event::NannyAvailabilityChanged {
            nanny_id: id,
            available,
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![registered(1), toggled(1, false)];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = tmp_path("torn_tail.wal");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&registered(1)).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            // Length prefix promising 40 bytes, then only two.
            f.write_all(&40u32.to_le_bytes()).unwrap();
            f.write_all(&[1, 2]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![registered(1)]);

        // The tail is gone from disk, so new records are reachable.
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&registered(2)).unwrap();
        }
        assert_eq!(
            Wal::replay(&path).unwrap(),
            vec![registered(1), registered(2)]
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = tmp_path("bad_checksum.wal");
        {
            let payload = bincode::serialize(&registered(4)).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn absurd_length_is_treated_as_torn() {
        let path = tmp_path("absurd_length.wal");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_replays_empty() {
        let path = tmp_path("never_written.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compaction_shrinks_and_keeps_appending() {
        let path = tmp_path("compaction.wal");
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&registered(1)).unwrap();
        for i in 0..20 {
            wal.append(&toggled(1, i % 2 == 0)).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        let snapshot = vec![registered(1)];
        wal.compact(&snapshot).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "{after} should be below {before}");

        wal.append(&toggled(1, false)).unwrap();
        drop(wal);
        assert_eq!(
            Wal::replay(&path).unwrap(),
            vec![registered(1), toggled(1, false)]
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_count_until_flushed() {
        let path = tmp_path("buffered.wal");
        let events: Vec<Event> = (1..=5).map(registered).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }
}
