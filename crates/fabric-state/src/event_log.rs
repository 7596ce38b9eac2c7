//! Append-only JSONL event log.
//!
//! The log is the sole source of truth. Each event occupies exactly one
//! line of `events.jsonl`.
//!
//! ## Write discipline
//!
//! A line is serialized into one buffer (trailing `\n` included) and handed
//! to a single `write_all` on an `O_APPEND` handle, then `sync_data`. An
//! in-process mutex serializes appenders so two events never share a line.
//!
//! ## Read discipline
//!
//! [`EventLog::read_all`] snapshots the file length when the iterator is
//! created and never reads past it. A trailing segment without a newline is
//! an in-flight write and is never yielded.
//!
//! ## Corruption policy: skip and report
//!
//! Lines that do not parse as an [`Event`] are skipped, logged at `warn`,
//! and counted ([`EventIter::skipped`], [`ExportReport::skipped`]). I/O
//! errors are never skipped; they are returned to the caller.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Take, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, StateError};
use crate::event::{Event, Payload};
use crate::redaction::RedactionRules;

/// File name of the log inside its directory.
pub const EVENTS_FILE: &str = "events.jsonl";

/// Decides which events survive a retention pass.
pub trait RetentionPolicy {
    fn retain(&self, event: &Event) -> bool;
}

/// Default policy: never delete anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetainAll;

impl RetentionPolicy for RetainAll {
    fn retain(&self, _event: &Event) -> bool {
        true
    }
}

/// Outcome of an export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportReport {
    pub written: usize,
    pub skipped: usize,
    pub redacted_fields: usize,
}

/// Outcome of a retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReport {
    pub kept: usize,
    pub dropped: usize,
}

/// Append-only event log backed by a JSONL file.
#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl EventLog {
    /// Open (or create) the log at `<dir>/events.jsonl`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Self::open_file(dir.join(EVENTS_FILE))
    }

    /// Open (or create) a log at an explicit file path.
    pub fn open_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "event log opened");
        Ok(Self {
            path,
            append_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a new event and return its id.
    pub fn append(
        &self,
        event_type: &str,
        payload: Payload,
        correlation_id: Option<Uuid>,
    ) -> Result<Uuid> {
        let event = Event::new(event_type, payload, correlation_id);
        self.append_event(&event)?;
        Ok(event.id)
    }

    /// Append a fully built event.
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub fn append_event(&self, event: &Event) -> Result<()> {
        if event.event_type.trim().is_empty() {
            return Err(StateError::InvalidInput(
                "event type must not be empty".into(),
            ));
        }
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self.append_lock.lock();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)?;
        terminate_partial_tail(&mut file)?;
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }

    /// Lazily iterate all events in append order.
    pub fn read_all(&self) -> Result<EventIter> {
        Ok(EventIter {
            lines: LineReader::snapshot(&self.path)?,
            skipped: 0,
        })
    }

    /// All parseable events collected into a vector.
    pub fn events(&self) -> Result<Vec<Event>> {
        self.read_all()?.collect()
    }

    /// Events sharing a correlation id (linear scan).
    pub fn find_by_correlation(&self, correlation_id: Uuid) -> Result<Vec<Event>> {
        self.filtered(|e| e.correlation_id == Some(correlation_id))
    }

    /// Events with a timestamp at or after `since`.
    pub fn read_from(&self, since: DateTime<Utc>) -> Result<Vec<Event>> {
        self.filtered(|e| e.timestamp >= since)
    }

    /// Events of one type.
    pub fn by_type(&self, event_type: &str) -> Result<Vec<Event>> {
        self.filtered(|e| e.event_type == event_type)
    }

    /// Case-insensitive substring search over serialized payloads.
    pub fn search(&self, needle: &str) -> Result<Vec<Event>> {
        let needle = needle.to_lowercase();
        self.filtered(|e| {
            serde_json::to_string(&e.payload)
                .map(|s| s.to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
    }

    /// Number of parseable events.
    pub fn count(&self) -> Result<usize> {
        let mut n = 0;
        for event in self.read_all()? {
            event?;
            n += 1;
        }
        Ok(n)
    }

    fn filtered(&self, pred: impl Fn(&Event) -> bool) -> Result<Vec<Event>> {
        let mut out = Vec::new();
        for event in self.read_all()? {
            let event = event?;
            if pred(&event) {
                out.push(event);
            }
        }
        Ok(out)
    }

    /// Export a copy of the log, masking sensitive payload values when
    /// `redact` is set.
    pub fn export(&self, destination: impl AsRef<Path>, redact: bool) -> Result<ExportReport> {
        let rules = RedactionRules::default();
        self.export_with(destination, redact.then_some(&rules))
    }

    /// Export with an explicit rule table (`None` disables redaction).
    #[instrument(skip(self, destination, rules), fields(redact = rules.is_some()))]
    pub fn export_with(
        &self,
        destination: impl AsRef<Path>,
        rules: Option<&RedactionRules>,
    ) -> Result<ExportReport> {
        let destination = destination.as_ref();
        let dir = parent_dir(destination);
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        let mut report = ExportReport::default();
        let mut events = self.read_all()?;
        for event in events.by_ref() {
            let mut event = event?;
            if let Some(rules) = rules {
                report.redacted_fields += rules.redact_payload(&mut event.payload);
            }
            let mut line = serde_json::to_vec(&event)?;
            line.push(b'\n');
            tmp.write_all(&line)?;
            report.written += 1;
        }
        report.skipped = events.skipped();
        tmp.as_file().sync_data()?;
        tmp.persist(destination).map_err(|e| e.error)?;

        info!(
            destination = %destination.display(),
            written = report.written,
            skipped = report.skipped,
            redacted_fields = report.redacted_fields,
            "event log exported"
        );
        Ok(report)
    }

    /// Run a retention pass. Unparseable lines are kept verbatim; the file
    /// is only rewritten when the policy drops at least one event.
    pub fn apply_retention(&self, policy: &dyn RetentionPolicy) -> Result<RetentionReport> {
        let _guard = self.append_lock.lock();

        let mut kept_lines: Vec<Vec<u8>> = Vec::new();
        let mut report = RetentionReport::default();
        let mut lines = LineReader::snapshot(&self.path)?;
        while let Some((_, raw)) = lines.next_line()? {
            match serde_json::from_slice::<Event>(&raw) {
                Ok(event) if !policy.retain(&event) => report.dropped += 1,
                Ok(_) => {
                    report.kept += 1;
                    kept_lines.push(raw);
                }
                Err(_) => kept_lines.push(raw),
            }
        }
        if report.dropped == 0 {
            return Ok(report);
        }

        let mut tmp = NamedTempFile::new_in(parent_dir(&self.path))?;
        for mut raw in kept_lines {
            raw.push(b'\n');
            tmp.write_all(&raw)?;
        }
        tmp.as_file().sync_data()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        info!(kept = report.kept, dropped = report.dropped, "retention applied");
        Ok(report)
    }
}

/// Directory holding `path`, `.` for bare file names.
fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// If the file ends in a partial line (a crashed writer), terminate it so
/// the next event starts on a fresh line. The partial line is later
/// skipped as malformed.
fn terminate_partial_tail(file: &mut File) -> Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        warn!("event log ended with a partial line; terminating it");
        file.write_all(b"\n")?;
    }
    Ok(())
}

/// Reads complete lines from a fixed-length prefix of a file.
struct LineReader {
    reader: BufReader<Take<File>>,
    line_no: usize,
}

impl LineReader {
    fn snapshot(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file.take(len)),
            line_no: 0,
        })
    }

    /// Next complete, non-blank line without its newline.
    fn next_line(&mut self) -> Result<Option<(usize, Vec<u8>)>> {
        loop {
            let mut buf = Vec::new();
            let n = self.reader.read_until(b'\n', &mut buf)?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            if buf.last() != Some(&b'\n') {
                debug!(line = self.line_no, "ignoring unterminated tail");
                return Ok(None);
            }
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            if buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some((self.line_no, buf)));
        }
    }
}

/// Lazy iterator over the events of a log snapshot.
///
/// Yields `Err` only for I/O failures; malformed lines are skipped and
/// counted.
pub struct EventIter {
    lines: LineReader,
    skipped: usize,
}

impl EventIter {
    /// Malformed lines skipped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl Iterator for EventIter {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (line_no, raw) = match self.lines.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };
            match serde_json::from_slice::<Event>(&raw) {
                Ok(event) => return Some(Ok(event)),
                Err(err) => {
                    self.skipped += 1;
                    warn!(
                        event = "log.line_skipped",
                        line = line_no,
                        error = %err,
                        "skipping malformed event line"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: serde_json::Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    fn make_log() -> (tempfile::TempDir, EventLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::open(dir.path()).unwrap();
        (dir, log)
    }

    #[test]
    fn open_creates_empty_file() {
        let (dir, log) = make_log();
        assert!(dir.path().join(EVENTS_FILE).exists());
        assert_eq!(log.count().unwrap(), 0);
    }

    #[test]
    fn append_then_read_in_order() {
        let (_dir, log) = make_log();
        let a = log.append("a", payload(json!({"n": 1})), None).unwrap();
        let b = log.append("b", payload(json!({"n": 2})), None).unwrap();
        let events = log.events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, a);
        assert_eq!(events[1].id, b);
    }

    #[test]
    fn empty_type_rejected() {
        let (_dir, log) = make_log();
        let err = log.append("  ", Payload::new(), None).unwrap_err();
        assert!(matches!(err, StateError::InvalidInput(_)));
    }

    #[test]
    fn iterator_is_a_snapshot() {
        let (_dir, log) = make_log();
        log.append("a", Payload::new(), None).unwrap();
        let iter = log.read_all().unwrap();
        log.append("b", Payload::new(), None).unwrap();
        assert_eq!(iter.count(), 1);
        assert_eq!(log.read_all().unwrap().count(), 2);
    }

    #[test]
    fn unterminated_tail_is_invisible() {
        let (_dir, log) = make_log();
        log.append("a", Payload::new(), None).unwrap();
        let mut f = OpenOptions::new().append(true).open(log.path()).unwrap();
        f.write_all(br#"{"id":"half"#).unwrap();
        let mut iter = log.read_all().unwrap();
        assert!(iter.next().unwrap().is_ok());
        assert!(iter.next().is_none());
        assert_eq!(iter.skipped(), 0);
    }

    #[test]
    fn append_after_partial_tail_starts_fresh_line() {
        let (_dir, log) = make_log();
        let mut f = OpenOptions::new().append(true).open(log.path()).unwrap();
        f.write_all(b"garbage-without-newline").unwrap();
        let id = log.append("a", Payload::new(), None).unwrap();

        let mut iter = log.read_all().unwrap();
        let first = iter.next().unwrap().unwrap();
        assert_eq!(first.id, id);
        assert_eq!(iter.skipped(), 1);
    }

    #[test]
    fn filters_by_type_and_search() {
        let (_dir, log) = make_log();
        log.append("memory_created", payload(json!({"content": "Rust Ownership"})), None)
            .unwrap();
        log.append("edge_added", payload(json!({"from": "x"})), None)
            .unwrap();
        assert_eq!(log.by_type("edge_added").unwrap().len(), 1);
        assert_eq!(log.search("ownership").unwrap().len(), 1);
        assert!(log.search("nothing-here").unwrap().is_empty());
    }

    #[test]
    fn read_from_filters_by_timestamp() {
        let (_dir, log) = make_log();
        log.append("old", Payload::new(), None).unwrap();
        let cutoff = Utc::now() + chrono::Duration::hours(1);
        assert!(log.read_from(cutoff).unwrap().is_empty());
        let before = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(log.read_from(before).unwrap().len(), 1);
    }

    #[test]
    fn retain_all_leaves_file_untouched() {
        let (_dir, log) = make_log();
        log.append("a", Payload::new(), None).unwrap();
        let before = fs::read(log.path()).unwrap();
        let report = log.apply_retention(&RetainAll).unwrap();
        assert_eq!(report, RetentionReport { kept: 1, dropped: 0 });
        assert_eq!(fs::read(log.path()).unwrap(), before);
    }

    struct DropType(&'static str);

    impl RetentionPolicy for DropType {
        fn retain(&self, event: &Event) -> bool {
            event.event_type != self.0
        }
    }

    #[test]
    fn retention_drops_events_and_keeps_malformed_lines() {
        let (_dir, log) = make_log();
        log.append("keep", Payload::new(), None).unwrap();
        {
            let mut f = OpenOptions::new().append(true).open(log.path()).unwrap();
            f.write_all(b"not json\n").unwrap();
        }
        log.append("drop", Payload::new(), None).unwrap();

        let report = log.apply_retention(&DropType("drop")).unwrap();
        assert_eq!(report, RetentionReport { kept: 1, dropped: 1 });

        let mut iter = log.read_all().unwrap();
        let remaining: Vec<Event> = iter.by_ref().map(|e| e.unwrap()).collect();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].event_type, "keep");
        assert_eq!(iter.skipped(), 1);
    }
}
