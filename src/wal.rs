use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Upper bound on a single record payload. A length prefix above this is
/// treated as corruption instead of being allocated.
const MAX_RECORD_LEN: usize = 1 << 20;

/// Encode one record, returning the number of bytes written.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(8 + payload.len() as u64)
}

/// Read exactly `buf.len()` bytes. `Ok(false)` means the file ended first.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact record and its size on disk, or `None` at end of log / first
/// damaged record.
fn decode_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    if !read_or_eof(reader, &mut payload)? || !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, 8 + len as u64)))
}

/// Intact events and the byte length they occupy at the head of the file.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let mut reader = match File::open(path) {
        Ok(f) => BufReader::new(f),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut events = Vec::new();
    let mut intact_len = 0;
    while let Some((event, size)) = decode_record(&mut reader)? {
        events.push(event);
        intact_len += size;
    }
    Ok((events, intact_len))
}

fn poisoned() -> io::Error {
    io::Error::other("WAL is poisoned after a failed rollback; compaction required")
}

/// Append-only write-ahead log of fleet events.
///
/// Record layout: `[u32 le: payload len][bincode Event][u32 le: crc32 of payload]`.
/// A torn or corrupt tail is dropped on replay and cut off when the log is
/// reopened for appends.
///
/// Appends go in batches: either a whole batch is fsynced or none of it stays
/// in the file. `writer` is `None` once a failed batch could not be cut back
/// off; every append is refused until a compaction rewrites the log.
pub struct Wal {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    /// File length up to the last fsynced record.
    durable_len: u64,
    pending_bytes: u64,
    pending_records: u64,
    appends_since_compact: u64,
    #[cfg(test)]
    fail_next_sync: bool,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::recover(path).map(|(wal, _)| wal)
    }

    /// Open the log for appends and return the events it already holds. A
    /// damaged tail is truncated so new records are never written behind it.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, intact_len) = scan(path)?;
        let file = Self::open_append(path)?;
        let file_len = file.metadata()?.len();
        if file_len > intact_len {
            tracing::warn!(
                "WAL {}: dropping {} damaged tail bytes",
                path.display(),
                file_len - intact_len
            );
            file.set_len(intact_len)?;
        }
        let wal = Self {
            writer: Some(BufWriter::new(file)),
            path: path.to_path_buf(),
            durable_len: intact_len,
            pending_bytes: 0,
            pending_records: 0,
            appends_since_compact: 0,
            #[cfg(test)]
            fail_next_sync: false,
        };
        Ok((wal, events))
    }

    fn open_append(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer.as_mut().ok_or_else(poisoned)
    }

    /// Append and fsync a single record.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_batch([event])
    }

    /// Append `events` and fsync them together. On error nothing from the
    /// batch remains in the log, on disk or in the buffer.
    pub fn append_batch<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a Event>,
    ) -> io::Result<()> {
        let result = events
            .into_iter()
            .try_for_each(|event| self.append_buffered(event))
            .and_then(|()| self.flush_sync());
        match result {
            Ok(()) => {
                self.durable_len += self.pending_bytes;
                self.appends_since_compact += self.pending_records;
                self.pending_bytes = 0;
                self.pending_records = 0;
                Ok(())
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        let written = encode_record(self.writer()?, event)?;
        self.pending_bytes += written;
        self.pending_records += 1;
        Ok(())
    }

    fn flush_sync(&mut self) -> io::Result<()> {
        self.writer()?.flush()?;
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_sync) {
            return Err(io::Error::other("sync failed"));
        }
        self.writer()?.get_ref().sync_all()
    }

    /// Drop whatever the failed batch left behind. The buffer is discarded
    /// without flushing and the file is cut back to `durable_len`.
    fn rollback(&mut self) {
        self.pending_bytes = 0;
        self.pending_records = 0;
        let Some(stale) = self.writer.take() else {
            return;
        };
        let (file, _unwritten) = stale.into_parts();
        match file.set_len(self.durable_len).and_then(|()| file.sync_all()) {
            Ok(()) => self.writer = Some(BufWriter::new(file)),
            Err(e) => tracing::error!(
                "WAL {}: rollback to {} bytes failed, refusing appends: {e}",
                self.path.display(),
                self.durable_len
            ),
        }
    }

    /// Make the next batch fail after its bytes reach the file but before fsync.
    #[cfg(test)]
    pub fn fail_next_sync(&mut self) {
        self.fail_next_sync = true;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write a compacted log next to `path` and fsync it. The live log is untouched
    /// until `swap_compact_file`.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            encode_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the live log and reopen it for appends.
    /// Clears a poisoned log, since the compacted file is rebuilt from memory.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = Self::open_append(&self.path)?;
        self.durable_len = file.metadata()?.len();
        if self.writer.is_none() {
            tracing::info!("WAL {}: compaction cleared poisoned log", self.path.display());
        }
        self.writer = Some(BufWriter::new(file));
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// All intact events in log order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use ulid::Ulid;

    use crate::model::{DateRange, Reservation, Vehicle, VehicleType, Version};

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("fleetbook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn vehicle_added(description: &str) -> Event {
        Event::VehicleAdded {
            vehicle: Vehicle::new(Ulid::new(), description.into(), VehicleType::Compact),
        }
    }

    fn committed(vehicle_id: Ulid) -> Event {
        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        Event::ReservationCommitted {
            reservation: Reservation::new(Ulid::new(), vehicle_id, DateRange::new(day, day)),
            version: Version::default().next(),
            reserved_at: Utc::now(),
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let _ = fs::remove_file(&path);

        let events = vec![vehicle_added("Compact Vehicle 1"), committed(Ulid::new())];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed, events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let _ = fs::remove_file(&path);

        let event = vehicle_added("Van Vehicle 1");

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }

        // Append garbage to simulate a truncated second entry
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0], event);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let _ = fs::remove_file(&path);
        let replayed = Wal::replay(&path).unwrap();
        assert!(replayed.is_empty());
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let _ = fs::remove_file(&path);

        let event = committed(Ulid::new());

        {
            let payload = bincode::serialize(&event).unwrap();
            let len = payload.len() as u32;
            let bad_crc: u32 = 0xDEADBEEF;

            let mut f = File::create(&path).unwrap();
            f.write_all(&len.to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&bad_crc.to_le_bytes()).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert!(replayed.is_empty());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_stops_at_oversized_length_prefix() {
        let path = tmp_path("oversized.wal");
        let _ = fs::remove_file(&path);

        let event = vehicle_added("Compact Vehicle 1");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[1u8; 32]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![event]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_reduces_wal() {
        let path = tmp_path("compact_reduce.wal");
        let _ = fs::remove_file(&path);

        let added = vehicle_added("Sedan Vehicle 1");
        let Event::VehicleAdded { vehicle } = &added else { unreachable!() };
        let vehicle_id = vehicle.id;

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&added).unwrap();
            for _ in 0..10 {
                wal.append(&committed(vehicle_id)).unwrap();
            }
        }

        let before = fs::metadata(&path).unwrap().len();
        assert!(before > 0);

        let compacted_events = vec![added.clone()];
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&compacted_events).unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, compacted_events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let _ = fs::remove_file(&path);

        let compacted = vec![vehicle_added("SUV Vehicle 1")];
        let new_event = committed(Ulid::new());

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&compacted[0]).unwrap();
            wal.compact(&compacted).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&new_event).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0], compacted[0]);
        assert_eq!(replayed[1], new_event);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn batch_is_durable_together() {
        let path = tmp_path("batch.wal");
        let _ = fs::remove_file(&path);

        let events: Vec<Event> = (0..5).map(|i| vehicle_added(&format!("Compact {i}"))).collect();

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append_batch(&events).unwrap();
            assert_eq!(wal.appends_since_compact(), 5);
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn failed_batch_leaves_no_trace() {
        let path = tmp_path("failed_batch.wal");
        let _ = fs::remove_file(&path);

        let kept = vehicle_added("Van Vehicle 1");
        let rejected = vec![committed(Ulid::new()), committed(Ulid::new())];
        let later = committed(Ulid::new());

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&kept).unwrap();
            let len_before = fs::metadata(&path).unwrap().len();

            wal.fail_next_sync();
            assert!(wal.append_batch(&rejected).is_err());
            assert_eq!(fs::metadata(&path).unwrap().len(), len_before);
            assert_eq!(wal.appends_since_compact(), 1);

            wal.append(&later).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![kept, later]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn poisoned_log_refuses_appends_until_compacted() {
        let path = tmp_path("poisoned.wal");
        let _ = fs::remove_file(&path);

        let kept = vehicle_added("Sedan Vehicle 1");
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();

        // Same state a failed truncate leaves behind.
        wal.writer = None;
        assert!(wal.append(&committed(Ulid::new())).is_err());
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept.clone()]);

        wal.compact(std::slice::from_ref(&kept)).unwrap();
        let after = committed(Ulid::new());
        wal.append(&after).unwrap();
        drop(wal);

        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, after]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn reopen_cuts_damaged_tail_before_appending() {
        let path = tmp_path("reopen_tail.wal");
        let _ = fs::remove_file(&path);

        let first = vehicle_added("Compact Vehicle 1");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 5]).unwrap();
        }

        let second = committed(Ulid::new());
        {
            let (mut wal, events) = Wal::recover(&path).unwrap();
            assert_eq!(events, vec![first.clone()]);
            wal.append(&second).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
        let _ = fs::remove_file(&path);
    }
}
