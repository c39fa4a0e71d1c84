use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// One captured line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub stream: OutputStream,
    pub line: String,
}

/// Inclusive time window; an open end matches everything on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRange {
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

impl HistoryRange {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.since.is_none_or(|since| ts >= since) && self.until.is_none_or(|until| ts <= until)
    }
}

/// Bounded line buffer; the oldest line is dropped once full.
#[derive(Debug)]
pub struct OutputRing {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl OutputRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entries inside `range`, oldest first.
    pub fn snapshot(&self, range: &HistoryRange) -> Vec<LogEntry> {
        self.entries
            .iter()
            .filter(|e| range.contains(e.timestamp))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn entry(line: &str, ts: DateTime<Utc>) -> LogEntry {
        LogEntry {
            timestamp: ts,
            stream: OutputStream::Stdout,
            line: line.to_string(),
        }
    }

    #[test]
    fn drops_oldest_when_full() {
        let mut ring = OutputRing::new(3);
        let now = Utc::now();
        for i in 0..5 {
            ring.push(entry(&i.to_string(), now));
        }
        let lines: Vec<String> = ring
            .snapshot(&HistoryRange::default())
            .into_iter()
            .map(|e| e.line)
            .collect();
        assert_eq!(lines, ["2", "3", "4"]);
    }

    #[test]
    fn filters_by_range() {
        let mut ring = OutputRing::new(10);
        let t0 = Utc::now();
        ring.push(entry("old", t0 - Duration::minutes(10)));
        ring.push(entry("mid", t0 - Duration::minutes(5)));
        ring.push(entry("new", t0));

        let range = HistoryRange {
            since: Some(t0 - Duration::minutes(6)),
            until: Some(t0 - Duration::minutes(1)),
        };
        let lines: Vec<String> = ring.snapshot(&range).into_iter().map(|e| e.line).collect();
        assert_eq!(lines, ["mid"]);
    }
}
