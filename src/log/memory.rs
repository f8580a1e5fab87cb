//! In-memory log backend.
//!
//! Fast, no persistence across restarts. The default for tests and the
//! building block production backends are measured against.

use super::{Log, LogEntry, LogError};

/// In-memory log. Entry at index `i` lives at position `i - 1`.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Vec<LogEntry>,
}

impl MemoryLog {
    pub fn new() -> Self {
        MemoryLog { entries: Vec::new() }
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push_checked(&mut self, mut entry: LogEntry, assign_index: bool) -> Result<(), LogError> {
        let (last_index, last_term) = (
            self.entries.last().map(|e| e.index).unwrap_or(0),
            self.entries.last().map(|e| e.term).unwrap_or(0),
        );
        if assign_index {
            entry.index = last_index + 1;
        } else if entry.index != last_index + 1 {
            return Err(LogError::NonContiguous {
                index: entry.index,
                expected: last_index + 1,
            });
        }
        if entry.term < last_term {
            return Err(LogError::Backend(format!(
                "term {} at index {} regresses below {}",
                entry.term, entry.index, last_term
            )));
        }
        self.entries.push(entry);
        Ok(())
    }
}

impl Log for MemoryLog {
    fn get(&self, index: u64) -> Result<Option<u64>, LogError> {
        if index == 0 {
            return Ok(Some(0));
        }
        Ok(self.entries.get(index as usize - 1).map(|e| e.term))
    }

    fn last(&self) -> Result<(u64, u64), LogError> {
        Ok(self
            .entries
            .last()
            .map(|e| (e.index, e.term))
            .unwrap_or((0, 0)))
    }

    fn range_get(&self, i: u64, j: u64) -> Result<Vec<LogEntry>, LogError> {
        if j <= i || j > self.entries.len() as u64 {
            return Ok(Vec::new());
        }
        Ok(self.entries[i as usize..j as usize].to_vec())
    }

    fn append(&mut self, entries: Vec<LogEntry>) -> Result<(), LogError> {
        for entry in entries {
            self.push_checked(entry, true)?;
        }
        Ok(())
    }

    fn append_at(&mut self, prev_index: u64, entries: Vec<LogEntry>) -> Result<(), LogError> {
        let last_index = self.entries.last().map(|e| e.index).unwrap_or(0);
        if prev_index > last_index {
            return Err(LogError::TruncateBeyondEnd {
                prev_index,
                last_index,
            });
        }
        self.entries.truncate(prev_index as usize);
        for entry in entries {
            self.push_checked(entry, false)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::Command;

    fn entry(term: u64, command: &str) -> LogEntry {
        LogEntry::new(term, Command::from(command.as_bytes()))
    }

    fn indexed(index: u64, term: u64, command: &str) -> LogEntry {
        LogEntry {
            index,
            ..entry(term, command)
        }
    }

    #[test]
    fn empty_log_sentinels() {
        let log = MemoryLog::new();
        assert_eq!(log.last().unwrap(), (0, 0));
        assert_eq!(log.get(0).unwrap(), Some(0));
        assert_eq!(log.get(1).unwrap(), None);
        assert!(log.matches(0, 0).unwrap());
        assert!(!log.matches(1, 1).unwrap());
    }

    #[test]
    fn append_assigns_contiguous_indices() {
        let mut log = MemoryLog::new();
        log.append(vec![entry(1, "a"), entry(1, "b")]).unwrap();
        log.append(vec![entry(2, "c")]).unwrap();

        assert_eq!(log.last().unwrap(), (3, 2));
        assert_eq!(log.get(1).unwrap(), Some(1));
        assert_eq!(log.get(3).unwrap(), Some(2));
        assert!(log.matches(2, 1).unwrap());
        assert!(!log.matches(2, 2).unwrap());
    }

    #[test]
    fn range_get_is_half_open_below() {
        let mut log = MemoryLog::new();
        log.append(vec![entry(1, "a"), entry(1, "b"), entry(2, "c")])
            .unwrap();

        let range = log.range_get(1, 3).unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[0].index, 2);
        assert_eq!(range[1].index, 3);

        assert!(log.range_get(2, 2).unwrap().is_empty());
        assert!(log.range_get(3, 1).unwrap().is_empty());
        // Past the end of the log.
        assert!(log.range_get(1, 4).unwrap().is_empty());
    }

    #[test]
    fn append_at_truncates_conflicting_suffix() {
        let mut log = MemoryLog::new();
        log.append(vec![entry(1, "a"), entry(1, "b"), entry(1, "c")])
            .unwrap();

        log.append_at(1, vec![indexed(2, 2, "x"), indexed(3, 2, "y")])
            .unwrap();

        assert_eq!(log.last().unwrap(), (3, 2));
        assert_eq!(log.get(1).unwrap(), Some(1));
        assert_eq!(log.get(2).unwrap(), Some(2));
        let tail = log.range_get(1, 3).unwrap();
        assert_eq!(tail[0].command, b"x".to_vec());
        assert_eq!(tail[1].command, b"y".to_vec());
    }

    #[test]
    fn append_at_round_trips_through_range_get() {
        let mut log = MemoryLog::new();
        log.append(vec![entry(1, "a"), entry(1, "b")]).unwrap();

        let entries = vec![indexed(3, 1, "c"), indexed(4, 1, "d")];
        log.append_at(2, entries.clone()).unwrap();
        assert_eq!(log.range_get(2, 4).unwrap(), entries);
    }

    #[test]
    fn append_at_rejects_gap_past_end() {
        let mut log = MemoryLog::new();
        log.append(vec![entry(1, "a")]).unwrap();

        let err = log.append_at(5, vec![indexed(6, 1, "z")]).unwrap_err();
        assert_eq!(
            err,
            LogError::TruncateBeyondEnd {
                prev_index: 5,
                last_index: 1
            }
        );
    }

    #[test]
    fn append_at_rejects_non_contiguous_entries() {
        let mut log = MemoryLog::new();
        log.append(vec![entry(1, "a")]).unwrap();

        let err = log.append_at(1, vec![indexed(4, 1, "z")]).unwrap_err();
        assert_eq!(err, LogError::NonContiguous { index: 4, expected: 2 });
    }

    #[test]
    fn terms_never_regress() {
        let mut log = MemoryLog::new();
        log.append(vec![entry(2, "a")]).unwrap();
        assert!(log.append(vec![entry(1, "b")]).is_err());
    }
}
