use anyhow::{Result, anyhow};
use plansmith_core::{CompletionClient, ErrorClassifier, ErrorInfo, IndexConfig};
use plansmith_tools::{PlanStepExecutor, ShellRunResult, ShellRunner, WorkspaceIndex};
use serde_json::Value;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Completion client that replays canned responses in order and keeps the
/// prompts it was given.
pub struct ScriptedCompletion {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<(String, Option<Value>)>>,
}

impl ScriptedCompletion {
    pub fn new<S: Into<String>>(responses: impl IntoIterator<Item = S>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<(String, Option<Value>)> {
        self.prompts
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl CompletionClient for ScriptedCompletion {
    fn complete(&self, prompt: &str, context: Option<&Value>) -> Result<String> {
        self.prompts
            .lock()
            .map_err(|_| anyhow!("scripted completion mutex poisoned"))?
            .push((prompt.to_string(), context.cloned()));
        self.responses
            .lock()
            .map_err(|_| anyhow!("scripted completion mutex poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("scripted completion exhausted"))
    }
}

/// Shell runner spy: records every command and returns a fixed result
/// without spawning anything.
pub struct RecordingRunner {
    commands: Mutex<Vec<String>>,
    result: ShellRunResult,
}

impl RecordingRunner {
    pub fn returning(status: i32, stdout: &str, stderr: &str) -> Arc<Self> {
        Arc::new(Self {
            commands: Mutex::new(Vec::new()),
            result: ShellRunResult {
                status: Some(status),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                timed_out: false,
            },
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::returning(0, "", "")
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl ShellRunner for RecordingRunner {
    fn run(&self, cmd: &str, _cwd: &Path, _timeout: Option<Duration>) -> Result<ShellRunResult> {
        self.commands
            .lock()
            .map_err(|_| anyhow!("recording runner mutex poisoned"))?
            .push(cmd.to_string());
        Ok(self.result.clone())
    }
}

/// Classifier that answers every input with the same info.
pub struct FixedClassifier {
    info: ErrorInfo,
}

impl FixedClassifier {
    pub fn new(info: ErrorInfo) -> Arc<Self> {
        Arc::new(Self { info })
    }
}

impl ErrorClassifier for FixedClassifier {
    fn classify(&self, _text: &str) -> ErrorInfo {
        self.info.clone()
    }
}

/// A throwaway repository directory named `name` so the project root name
/// seen by the sanitizer is predictable.
pub struct TestWorkspace {
    _dir: TempDir,
    root: PathBuf,
}

impl TestWorkspace {
    pub fn new(name: &str) -> Result<Self> {
        let dir = TempDir::new()?;
        let root = dir.path().join(name);
        fs::create_dir_all(&root)?;
        Ok(Self { _dir: dir, root })
    }

    pub fn with_files(name: &str, files: &[(&str, &str)]) -> Result<Self> {
        let workspace = Self::new(name)?;
        for (rel, content) in files {
            workspace.write(rel, content)?;
        }
        Ok(workspace)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn write(&self, rel: &str, content: &str) -> Result<()> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn read(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.root.join(rel)).ok()
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.root.join(rel).exists()
    }

    /// Executor over this workspace with the real index, a fixed classifier
    /// and `runner` in place of the platform shell.
    pub fn executor(&self, runner: Arc<dyn ShellRunner>) -> PlanStepExecutor {
        PlanStepExecutor::new(
            &self.root,
            Arc::new(WorkspaceIndex::new(&self.root, &IndexConfig::default())),
            FixedClassifier::new(ErrorInfo::from_message("classified failure")),
            runner,
        )
    }
}
