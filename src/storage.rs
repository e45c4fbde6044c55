use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::PositionRecord;

/// Append-only, line-oriented position log.
///
/// Appends go through one shared handle behind a mutex, so concurrent
/// writers never interleave bytes. Readers never touch that handle: every
/// scan opens the file afresh and observes whatever has been appended so far.
#[derive(Debug)]
pub struct PositionLog {
    pub file_path: PathBuf,
    writer: Mutex<Option<File>>,
    strict_durability: bool,
}

impl PositionLog {
    /// Does not create the file; the first append does.
    pub fn new(path: &Path, strict_durability: bool) -> Self {
        Self {
            file_path: path.to_path_buf(),
            writer: Mutex::new(None),
            strict_durability,
        }
    }

    pub fn append(&self, record: &PositionRecord) -> Result<()> {
        let line = record.to_line();
        let mut guard = self.writer.lock().map_err(|_| Error::Poisoned("log writer"))?;

        let file = match guard.take() {
            Some(file) => file,
            None => self.open_for_append()?,
        };
        let file = guard.insert(file);

        // One write per record so concurrent readers see whole lines or nothing new
        let before = file.metadata()?.len();
        let written = file.write_all(line.as_bytes()).and_then(|()| {
            if self.strict_durability {
                file.sync_data()
            } else {
                Ok(())
            }
        });

        if let Err(e) = written {
            if let Err(trunc) = file.set_len(before) {
                warn!(path = %self.file_path.display(), "could not roll back failed append: {}", trunc);
            }
            // Reopen next time so any leftover torn tail gets terminated first
            *guard = None;
            return Err(e.into());
        }
        Ok(())
    }

    /// Open the append handle. A torn line left by an earlier crash is
    /// terminated first so it cannot swallow the next record.
    fn open_for_append(&self) -> io::Result<File> {
        let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(&self.file_path)?;

        if file.metadata()?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                warn!(path = %self.file_path.display(), "log ends mid-line, terminating torn record");
                file.write_all(b"\n")?;
            }
        }
        Ok(file)
    }

    /// Every well-formed record in append order. A missing log reads as empty.
    pub fn scan(&self) -> io::Result<Vec<PositionRecord>> {
        let mut records = Vec::new();
        self.for_each(|_, record| {
            records.push(record);
            true
        })?;
        Ok(records)
    }

    /// Forward scan, stopping early when `visit` returns false.
    /// The offset handed to `visit` is where the record's line starts.
    pub fn for_each<F>(&self, mut visit: F) -> io::Result<()>
    where
        F: FnMut(u64, PositionRecord) -> bool,
    {
        let mut reader = match self.open_reader()? {
            Some(reader) => reader,
            None => return Ok(()),
        };

        let mut raw = Vec::new();
        let mut offset = 0u64;
        loop {
            raw.clear();
            let n = reader.read_until(b'\n', &mut raw)?;
            if n == 0 {
                break;
            }
            let start = offset;
            offset += n as u64;

            let body = raw.strip_suffix(b"\n").unwrap_or(&raw[..]);
            if body.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match parse_raw(body) {
                Some(record) => {
                    if !visit(start, record) {
                        break;
                    }
                }
                None => debug!(offset = start, "skipping malformed log line"),
            }
        }
        Ok(())
    }

    /// Scan complete lines starting at byte `from`.
    /// Returns the offset just past the last newline consumed, so a partially
    /// written trailing line is picked up by the next call.
    pub fn scan_from<F>(&self, from: u64, mut visit: F) -> io::Result<u64>
    where
        F: FnMut(u64, PositionRecord),
    {
        let mut reader = match self.open_reader()? {
            Some(reader) => reader,
            None => return Ok(0),
        };
        reader.seek(SeekFrom::Start(from))?;

        let mut raw = Vec::new();
        let mut offset = from;
        loop {
            raw.clear();
            let n = reader.read_until(b'\n', &mut raw)?;
            if n == 0 || raw.last() != Some(&b'\n') {
                break;
            }
            let start = offset;
            offset += n as u64;

            if let Some(record) = parse_raw(&raw[..raw.len() - 1]) {
                visit(start, record);
            }
        }
        Ok(offset)
    }

    /// Read the single record whose line starts at `offset`.
    pub fn read_at(&self, offset: u64) -> io::Result<Option<PositionRecord>> {
        let mut reader = match self.open_reader()? {
            Some(reader) => reader,
            None => return Ok(None),
        };
        reader.seek(SeekFrom::Start(offset))?;

        let mut raw = Vec::new();
        reader.read_until(b'\n', &mut raw)?;
        Ok(parse_raw(raw.strip_suffix(b"\n").unwrap_or(&raw[..])))
    }

    /// Current size of the log in bytes (0 when it does not exist yet).
    pub fn len(&self) -> io::Result<u64> {
        match fs::metadata(&self.file_path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    fn open_reader(&self) -> io::Result<Option<BufReader<File>>> {
        match File::open(&self.file_path) {
            Ok(file) => Ok(Some(BufReader::new(file))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// A line that is not valid UTF-8 is malformed, never repaired.
fn parse_raw(line: &[u8]) -> Option<PositionRecord> {
    std::str::from_utf8(line).ok().and_then(PositionRecord::parse_line)
}
