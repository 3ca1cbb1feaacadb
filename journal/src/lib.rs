mod entry;

pub use entry::{Category, GuardResult, JournalEntry, NewEntry, Outcome};

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Journal IO error: {0}")]
    IO(#[from] std::io::Error),
    #[error("Journal entry is not valid JSON: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Append-only transition journal.
///
/// One JSON record per line, one line per attempted transition. Appends are
/// flushed and fsynced before they return, so a subscriber that observes a
/// committed transition can rely on the entry being durable. The journal has
/// a single writer; the engine serializes access.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
    next_id: u64,
}

impl Journal {
    /// Opens a journal file, creating it when absent.
    ///
    /// The file is scanned once to find the highest committed id so the
    /// sequence continues across restarts.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let last_id = match read_entries(&path) {
            Ok(entries) => entries.last().map(|e| e.id).unwrap_or(0),
            Err(Error::IO(e)) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Journal opened at id {}", last_id);
        Ok(Self {
            path,
            file,
            next_id: last_id + 1,
        })
    }

    /// Commits one entry.
    ///
    /// The record is written, flushed and fsynced before this returns. A
    /// failure here means the journal is unavailable and the engine must
    /// refuse to transition.
    pub fn append(&mut self, new: NewEntry) -> Result<JournalEntry> {
        let entry = JournalEntry {
            id: self.next_id,
            at: chrono::Utc::now(),
            from_state: new.from_state,
            to_state: new.to_state,
            trigger: new.trigger,
            guards: new.guards,
            operator: new.operator,
            category: new.category,
            metadata: new.metadata,
            outcome: new.outcome,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.file.sync_data()?;
        self.next_id += 1;
        Ok(entry)
    }

    /// The last committed entry, if any.
    pub fn tail(&self) -> Result<Option<JournalEntry>> {
        Ok(self.replay()?.pop())
    }

    /// All committed entries in commit order.
    pub fn replay(&self) -> Result<Vec<JournalEntry>> {
        read_entries(&self.path)
    }

    /// Id the next appended entry will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }
}

/// Reads every parseable entry from a journal file.
///
/// A torn final line, the residue of a crash mid-append, is skipped with a
/// warning; the commit it belonged to never happened. A damaged line in the
/// middle of the file is skipped the same way.
fn read_entries(path: &Path) -> Result<Vec<JournalEntry>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = vec![];
    for (no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!("Skipping unparseable journal line {}: {}", no + 1, e);
            }
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn new_entry(from: &str, to: &str, outcome: Outcome) -> NewEntry {
        NewEntry {
            from_state: from.to_string(),
            to_state: to.to_string(),
            trigger: "PatientConfirmed".to_string(),
            guards: vec![GuardResult::passed("protocol_valid")],
            operator: "op-1".to_string(),
            category: Category::Workflow,
            metadata: BTreeMap::new(),
            outcome,
        }
    }

    #[test]
    fn append_then_replay_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let mut journal = Journal::open(&path).unwrap();
        let a = journal
            .append(new_entry("Idle", "WorklistSync", Outcome::Applied))
            .unwrap();
        let b = journal
            .append(new_entry("WorklistSync", "PatientSelect", Outcome::Applied))
            .unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        let replayed = journal.replay().unwrap();
        assert_eq!(replayed, vec![a, b.clone()]);
        assert_eq!(journal.tail().unwrap(), Some(b));
    }

    #[test]
    fn ids_continue_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        {
            let mut journal = Journal::open(&path).unwrap();
            journal
                .append(new_entry("Idle", "WorklistSync", Outcome::Applied))
                .unwrap();
        }
        let mut reopened = Journal::open(&path).unwrap();
        assert_eq!(reopened.next_id(), 2);
        let entry = reopened
            .append(new_entry("WorklistSync", "PatientSelect", Outcome::Applied))
            .unwrap();
        assert_eq!(entry.id, 2);
    }

    #[test]
    fn torn_final_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        {
            let mut journal = Journal::open(&path).unwrap();
            journal
                .append(new_entry("Idle", "WorklistSync", Outcome::Applied))
                .unwrap();
        }
        {
            use std::io::Write;
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            write!(file, "{{\"id\":2,\"at\":\"trunc").unwrap();
        }
        let journal = Journal::open(&path).unwrap();
        let entries = journal.replay().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(journal.next_id(), 2);
    }

    #[test]
    fn rejected_outcomes_are_journaled_too() {
        let dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(dir.path().join("journal.jsonl")).unwrap();
        journal
            .append(new_entry("Idle", "ExposureTrigger", Outcome::Rejected))
            .unwrap();
        let tail = journal.tail().unwrap().unwrap();
        assert_eq!(tail.outcome, Outcome::Rejected);
    }
}
