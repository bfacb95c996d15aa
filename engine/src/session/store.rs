//! Durable session storage
//!
//! One directory per session under the sessions root: `session.json` holds
//! the latest session snapshot, `events.jsonl` the append-only event log.
//! Late subscribers replay from here, so in-memory buffer sizes never
//! affect correctness.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::EngineResult;
use crate::session::events::EventRecord;
use crate::session::Session;

const SESSION_FILE: &str = "session.json";
const EVENTS_FILE: &str = "events.jsonl";

#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl AsRef<Path>) -> EngineResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    /// Persist the latest session snapshot.
    pub fn save_session(&self, session: &Session) -> EngineResult<()> {
        let dir = self.session_dir(&session.id);
        std::fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(dir.join(SESSION_FILE), json)?;
        Ok(())
    }

    pub fn load_session(&self, session_id: &str) -> EngineResult<Option<Session>> {
        let path = self.session_dir(session_id).join(SESSION_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Append one event to the session's log. The log is append-only; no
    /// edits, no deletes.
    pub fn append_event(&self, session_id: &str, record: &EventRecord) -> EngineResult<()> {
        let dir = self.session_dir(session_id);
        std::fs::create_dir_all(&dir)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(EVENTS_FILE))?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// All events in insertion order.
    pub fn load_events(&self, session_id: &str) -> EngineResult<Vec<EventRecord>> {
        let path = self.session_dir(session_id).join(EVENTS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)?;
        let mut events = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EventRecord>(line) {
                Ok(record) => events.push(record),
                Err(e) => tracing::warn!(session_id, error = %e, "skipping corrupt event line"),
            }
        }
        Ok(events)
    }

    /// The last `n` events in insertion order (the replay backlog).
    pub fn last_events(&self, session_id: &str, n: usize) -> EngineResult<Vec<EventRecord>> {
        let mut events = self.load_events(session_id)?;
        if events.len() > n {
            events.drain(..events.len() - n);
        }
        Ok(events)
    }

    /// Ids of every stored session.
    pub fn list_sessions(&self) -> EngineResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().join(SESSION_FILE).exists() {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
