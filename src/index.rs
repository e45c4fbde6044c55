use std::collections::HashMap;
use std::io;

use crate::storage::PositionLog;

/// Identity → byte offset of that identity's first record.
///
/// The index trails the log: `refresh` scans only bytes appended since the
/// previous call, so records written by other processes are picked up too.
#[derive(Debug, Default)]
pub struct IdentityIndex {
    first_offsets: HashMap<String, u64>,
    indexed_len: u64,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catch up with the log.
    pub fn refresh(&mut self, log: &PositionLog) -> io::Result<()> {
        let len = log.len()?;
        if len < self.indexed_len {
            // Log was replaced or truncated underneath us; start over
            self.first_offsets.clear();
            self.indexed_len = 0;
        }
        if len == self.indexed_len {
            return Ok(());
        }

        let offsets = &mut self.first_offsets;
        self.indexed_len = log.scan_from(self.indexed_len, |offset, record| {
            offsets.entry(record.identity).or_insert(offset);
        })?;
        Ok(())
    }

    pub fn first_offset(&self, identity: &str) -> Option<u64> {
        self.first_offsets.get(identity).copied()
    }

    /// Bytes of the log covered by the index. Anything past it is at most
    /// one unterminated line.
    pub fn indexed_len(&self) -> u64 {
        self.indexed_len
    }

    pub fn len(&self) -> usize {
        self.first_offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_offsets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PositionRecord;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn tracks_first_offset_per_identity() {
        let dir = tempdir().unwrap();
        let log = PositionLog::new(&dir.path().join("positions.csv"), false);
        let mut index = IdentityIndex::new();

        index.refresh(&log).unwrap();
        assert!(index.is_empty());

        log.append(&PositionRecord::new("a", 1.0, 1.0, 1)).unwrap();
        log.append(&PositionRecord::new("b", 2.0, 2.0, 2)).unwrap();
        log.append(&PositionRecord::new("a", 3.0, 3.0, 3)).unwrap();
        index.refresh(&log).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.first_offset("a"), Some(0));
        assert_eq!(index.first_offset("b"), Some(8));
        assert_eq!(index.first_offset("c"), None);
    }

    #[test]
    fn waits_for_partial_line_to_complete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("positions.csv");
        fs::write(&path, "a,1,1,1\nb,2,2").unwrap();
        let log = PositionLog::new(&path, false);

        let mut index = IdentityIndex::new();
        index.refresh(&log).unwrap();
        assert_eq!(index.first_offset("b"), None);
        assert_eq!(index.indexed_len(), 8);

        fs::write(&path, "a,1,1,1\nb,2,2,2\n").unwrap();
        index.refresh(&log).unwrap();
        assert_eq!(index.first_offset("b"), Some(8));
    }

    #[test]
    fn resets_when_log_shrinks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("positions.csv");
        fs::write(&path, "a,1,1,1\nb,2,2,2\n").unwrap();
        let log = PositionLog::new(&path, false);

        let mut index = IdentityIndex::new();
        index.refresh(&log).unwrap();
        assert_eq!(index.len(), 2);

        fs::write(&path, "c,1,1,1\n").unwrap();
        index.refresh(&log).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.first_offset("a"), None);
        assert_eq!(index.first_offset("c"), Some(0));
    }
}
