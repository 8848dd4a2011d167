use anyhow::Result;
use chrono::Utc;
use plansmith_core::{EventEnvelope, EventKind, runtime_dir};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

pub struct Observer {
    log_path: PathBuf,
    session_id: Uuid,
    next_seq: AtomicU64,
    verbose: bool,
}

impl Observer {
    /// The runtime directory is created on the first write, not here.
    pub fn new(workspace: &Path) -> Result<Self> {
        Ok(Self {
            log_path: runtime_dir(workspace).join("observe.log"),
            session_id: Uuid::now_v7(),
            next_seq: AtomicU64::new(1),
            verbose: false,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Wraps `kind` in an envelope for this session and appends it.
    pub fn emit(&self, kind: EventKind) -> Result<()> {
        let event = EventEnvelope {
            seq_no: self.next_seq.fetch_add(1, Ordering::Relaxed),
            at: Utc::now(),
            session_id: self.session_id,
            kind,
        };
        self.record_event(&event)
    }

    pub fn record_event(&self, event: &EventEnvelope) -> Result<()> {
        self.append_log_line(&format!(
            "{} EVENT {}",
            Utc::now().to_rfc3339(),
            serde_json::to_string(event)?
        ))
    }

    /// Enable or disable verbose logging to stderr.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Log a message to stderr with `[plansmith]` prefix when verbose mode is on.
    pub fn verbose_log(&self, msg: &str) {
        if self.verbose {
            eprintln!("[plansmith] {msg}");
        }
    }

    /// Always written to the log file and to stderr.
    pub fn warn_log(&self, msg: &str) {
        eprintln!("[plansmith WARN] {msg}");
        let _ = self.append_log_line(&format!("{} WARN {msg}", Utc::now().to_rfc3339()));
    }

    fn append_log_line(&self, line: &str) -> Result<()> {
        if let Some(dir) = self.log_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn emit_appends_sequenced_event_lines() {
        let workspace = TempDir::new().expect("workspace");
        let observer = Observer::new(workspace.path()).expect("observer");
        observer
            .emit(EventKind::ChangeAccepted {
                path: "a.txt".to_string(),
            })
            .expect("emit");
        observer
            .emit(EventKind::BlockSkipped {
                line: 4,
                reason: "no filename label".to_string(),
            })
            .expect("emit");

        let log = fs::read_to_string(observer.log_path()).expect("log");
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(" EVENT "));
        let json = lines[1].split_once(" EVENT ").expect("event marker").1;
        let event: EventEnvelope = serde_json::from_str(json).expect("envelope");
        assert_eq!(event.seq_no, 2);
        assert_eq!(event.session_id, observer.session_id());
        assert!(matches!(event.kind, EventKind::BlockSkipped { line: 4, .. }));
    }

    #[test]
    fn runtime_dir_is_created_on_first_write() {
        let workspace = TempDir::new().expect("workspace");
        let observer = Observer::new(workspace.path()).expect("observer");
        assert!(!runtime_dir(workspace.path()).exists());
        observer
            .emit(EventKind::ChangeRejected {
                path: "a.txt".to_string(),
            })
            .expect("emit");
        assert!(observer.log_path().is_file());
    }

    #[test]
    fn warn_log_is_persisted() {
        let workspace = TempDir::new().expect("workspace");
        let observer = Observer::new(workspace.path()).expect("observer");
        observer.warn_log("journal could not be saved");
        let log = fs::read_to_string(observer.log_path()).expect("log");
        assert!(log.contains("WARN journal could not be saved"));
    }
}
