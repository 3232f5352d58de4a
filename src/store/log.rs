use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{read_jsonl, StoreError};
use crate::kernel::event::{LogKind, LogRecord};
use crate::kernel::time::Timestamp;

/// Byte-order mark written ahead of exported text so spreadsheet tools pick UTF-8.
pub const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// A persisted log line. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub kind: LogKind,
    pub display: String,
    pub threshold: u32,
    pub time: String,
    pub at: Timestamp,
}

impl LogEntry {
    /// `[HH:MM:SS] message (threshold: N)`
    pub fn export_line(&self) -> String {
        let message = match self.kind {
            LogKind::Event => self.display.clone(),
            LogKind::Detection => format!("Detected: {}dB", self.display),
        };
        format!("[{}] {} (threshold: {})", self.time, message, self.threshold)
    }
}

/// Render entries (already in chronological order) as the export text blob.
pub fn render_export(entries: &[LogEntry]) -> Vec<u8> {
    let text = entries
        .iter()
        .map(LogEntry::export_line)
        .collect::<Vec<_>>()
        .join("\n");
    let mut out = Vec::with_capacity(UTF8_BOM.len() + text.len());
    out.extend_from_slice(&UTF8_BOM);
    out.extend_from_slice(text.as_bytes());
    out
}

/// Append-only event history backed by a JSON-lines file.
///
/// The whole history is mirrored in memory; `recent` is a view over it,
/// never a second store.
pub struct EventLog {
    path: PathBuf,
    file: File,
    entries: Vec<LogEntry>,
    next_id: u64,
    /// The file may end in a partial line from a failed write.
    torn: bool,
    /// `entries` is already sorted by timestamp.
    in_order: bool,
}

impl EventLog {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let (entries, torn) = read_jsonl::<LogEntry>(path)?;
        let next_id = entries.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        let in_order = entries.windows(2).all(|w| w[0].at <= w[1].at);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if torn {
            // Terminate a half-written line so the next append starts clean.
            file.write_all(b"\n")?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            entries,
            next_id,
            torn: false,
            in_order,
        })
    }

    pub fn append(&mut self, record: &LogRecord) -> Result<LogEntry, StoreError> {
        let entry = LogEntry {
            id: self.next_id,
            kind: record.kind,
            display: record.display.clone(),
            threshold: record.threshold,
            time: record.at.clock_string(),
            at: record.at,
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        if self.torn {
            line.insert(0, '\n');
        }
        if let Err(e) = self.file.write_all(line.as_bytes()).and_then(|_| self.file.flush()) {
            self.torn = true;
            return Err(e.into());
        }
        self.torn = false;

        self.next_id += 1;
        if self.entries.last().is_some_and(|last| last.at > entry.at) {
            self.in_order = false;
        }
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Newest first, at most `limit` entries.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        if self.in_order {
            return self.entries.iter().rev().take(limit).cloned().collect();
        }
        let mut view = self.chronological();
        view.reverse();
        view.truncate(limit);
        view
    }

    /// Every persisted entry, oldest first.
    pub fn export_all(&self) -> Vec<LogEntry> {
        self.chronological()
    }

    /// Drop all history. Ids keep increasing within this process.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.entries.clear();
        self.torn = false;
        self.in_order = true;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Stable sort: equal timestamps keep insertion (id) order.
    fn chronological(&self) -> Vec<LogEntry> {
        let mut all = self.entries.clone();
        if !self.in_order {
            all.sort_by_key(|e| e.at);
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: LogKind, display: &str, at: i64) -> LogRecord {
        LogRecord { kind, display: display.to_string(), threshold: 50, at: Timestamp(at) }
    }

    #[test]
    fn export_line_formats_by_kind() {
        let event = LogEntry {
            id: 1,
            kind: LogKind::Event,
            display: "Monitoring started (gain 1.0)".into(),
            threshold: 50,
            time: "10:00:00".into(),
            at: Timestamp(0),
        };
        let detection = LogEntry { id: 2, kind: LogKind::Detection, display: "72".into(), ..event.clone() };

        assert_eq!(event.export_line(), "[10:00:00] Monitoring started (gain 1.0) (threshold: 50)");
        assert_eq!(detection.export_line(), "[10:00:00] Detected: 72dB (threshold: 50)");
    }

    #[test]
    fn render_export_starts_with_bom() {
        let bytes = render_export(&[]);
        assert_eq!(bytes, UTF8_BOM.to_vec());
    }

    #[test]
    fn torn_trailing_line_is_skipped_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        {
            let mut log = EventLog::open(&path).unwrap();
            log.append(&record(LogKind::Event, "start", 1)).unwrap();
        }
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"id\":2,\"kind\":\"DETEC").unwrap();
        drop(f);

        let mut log = EventLog::open(&path).unwrap();
        assert_eq!(log.len(), 1);
        let next = log.append(&record(LogKind::Detection, "70", 2)).unwrap();
        assert_eq!(next.id, 2);
        drop(log);

        let log = EventLog::open(&path).unwrap();
        assert_eq!(log.export_all().iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn append_after_failed_write_starts_on_a_fresh_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut log = EventLog::open(&path).unwrap();
        log.append(&record(LogKind::Event, "start", 1)).unwrap();

        // What a write that failed halfway leaves behind.
        log.file.write_all(b"{\"id\":2,\"ki").unwrap();
        log.torn = true;

        let next = log.append(&record(LogKind::Detection, "70", 2)).unwrap();
        drop(log);

        let reopened = EventLog::open(&path).unwrap();
        assert_eq!(reopened.export_all().last(), Some(&next));
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn recent_follows_timestamps_when_clock_steps_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = EventLog::open(&dir.path().join("events.jsonl")).unwrap();
        log.append(&record(LogKind::Event, "a", 100)).unwrap();
        log.append(&record(LogKind::Event, "b", 300)).unwrap();
        log.append(&record(LogKind::Event, "c", 200)).unwrap();

        let recent: Vec<_> = log.recent(2).into_iter().map(|e| e.display).collect();
        assert_eq!(recent, vec!["b", "c"]);
        let all: Vec<_> = log.export_all().into_iter().map(|e| e.display).collect();
        assert_eq!(all, vec!["a", "c", "b"]);
    }

    #[test]
    fn recent_takes_newest_tail() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = EventLog::open(&dir.path().join("events.jsonl")).unwrap();
        for i in 0..5 {
            log.append(&record(LogKind::Detection, &i.to_string(), 10)).unwrap();
        }
        let ids: Vec<_> = log.recent(3).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
    }
}
