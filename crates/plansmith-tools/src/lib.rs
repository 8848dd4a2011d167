mod index;
mod shell;

pub use index::{WorkspaceIndex, WorkspaceSummary};
pub use shell::{PlatformShellRunner, ShellRunResult, ShellRunner};

use anyhow::Result;
use plansmith_core::{
    AppConfig, CompletionClient, ErrorClassifier, ErrorInfo, PlanStep, RepositoryIndex, StepFailure,
    StepKind, StepResult,
};
use plansmith_errors::PatternClassifier;
use plansmith_policy::PathSanitizer;
use plansmith_store::ChangeCheckpointStore;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Runs one [`PlanStep`] against the workspace.
///
/// Every failure a model can provoke, including I/O faults on the target
/// path, comes back as a non-ok [`StepResult`] so the rest of a plan still
/// runs.
pub struct PlanStepExecutor {
    workspace: PathBuf,
    project_root_name: String,
    sanitizer: PathSanitizer,
    index: Arc<dyn RepositoryIndex>,
    classifier: Arc<dyn ErrorClassifier>,
    runner: Arc<dyn ShellRunner>,
    completion: Option<Arc<dyn CompletionClient>>,
    shell_timeout: Option<Duration>,
    stage_writes: bool,
}

impl PlanStepExecutor {
    pub fn new(
        workspace: &Path,
        index: Arc<dyn RepositoryIndex>,
        classifier: Arc<dyn ErrorClassifier>,
        runner: Arc<dyn ShellRunner>,
    ) -> Self {
        let sanitizer_cfg = plansmith_core::SanitizerConfig::default();
        Self {
            workspace: workspace.to_path_buf(),
            project_root_name: sanitizer_cfg.project_root_name_for(workspace),
            sanitizer: PathSanitizer::from_config(&sanitizer_cfg),
            index,
            classifier,
            runner,
            completion: None,
            shell_timeout: None,
            stage_writes: false,
        }
    }

    /// Wires the default collaborators for `workspace` from `cfg`.
    pub fn from_config(workspace: &Path, cfg: &AppConfig) -> Result<Self> {
        let index = Arc::new(WorkspaceIndex::new(workspace, &cfg.index));
        let classifier = Arc::new(PatternClassifier::new()?);
        let timeout = (cfg.shell.timeout_seconds > 0)
            .then(|| Duration::from_secs(cfg.shell.timeout_seconds));
        Ok(
            Self::new(workspace, index, classifier, Arc::new(PlatformShellRunner))
                .with_sanitizer(
                    PathSanitizer::from_config(&cfg.sanitizer),
                    cfg.sanitizer.project_root_name_for(workspace),
                )
                .with_shell_timeout(timeout)
                .with_stage_writes(cfg.agent.stage_writes),
        )
    }

    pub fn with_sanitizer(mut self, sanitizer: PathSanitizer, project_root_name: String) -> Self {
        self.sanitizer = sanitizer;
        self.project_root_name = project_root_name;
        self
    }

    pub fn with_completion(mut self, completion: Arc<dyn CompletionClient>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn with_shell_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shell_timeout = timeout;
        self
    }

    pub fn with_stage_writes(mut self, stage_writes: bool) -> Self {
        self.stage_writes = stage_writes;
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn project_root_name(&self) -> &str {
        &self.project_root_name
    }

    pub fn sanitizer(&self) -> &PathSanitizer {
        &self.sanitizer
    }

    pub fn index(&self) -> &Arc<dyn RepositoryIndex> {
        &self.index
    }

    pub fn completion(&self) -> Option<&Arc<dyn CompletionClient>> {
        self.completion.as_ref()
    }

    pub fn execute(&self, step: &PlanStep, store: &mut ChangeCheckpointStore) -> Result<StepResult> {
        let Some(kind) = step.kind() else {
            return Ok(StepResult::failed(StepFailure::Rejected(format!(
                "unsupported step: tool '{}' with action '{}'",
                step.tool, step.action
            ))));
        };
        match kind {
            StepKind::FileRead => self.read_file(step),
            StepKind::FileWrite => self.write_file(step, store),
            StepKind::FileList => Ok(self.list_files(step)),
            StepKind::ShellRun => Ok(self.run_shell(step)),
            StepKind::GrepSearch => Ok(self.search(step)),
            StepKind::ChatGenerate => Ok(self.generate(step)),
        }
    }

    fn sanitize(&self, target: &str) -> std::result::Result<String, StepFailure> {
        let candidate = self.strip_workspace_prefix(target);
        self.sanitizer
            .sanitize(&candidate, &self.project_root_name)
            .map_err(|err| StepFailure::SanitizationFailure(format!("'{target}': {err}")))
    }

    /// Absolute targets inside the workspace become workspace-relative.
    /// Anything else is returned unchanged for the sanitizer to judge.
    fn strip_workspace_prefix(&self, target: &str) -> String {
        let trimmed = target.trim();
        let candidate = Path::new(trimmed);
        if !candidate.is_absolute() {
            return trimmed.to_string();
        }
        let canonical = fs::canonicalize(&self.workspace).ok();
        let roots = std::iter::once(self.workspace.as_path()).chain(canonical.as_deref());
        for root in roots {
            if let Ok(rel) = candidate.strip_prefix(root) {
                return rel.to_string_lossy().replace('\\', "/");
            }
        }
        trimmed.to_string()
    }

    fn read_file(&self, step: &PlanStep) -> Result<StepResult> {
        let rel = match self.sanitize(&step.target) {
            Ok(rel) => rel,
            Err(failure) => return Ok(StepResult::failed(failure)),
        };
        let full = self.workspace.join(&rel);
        if !full.is_file() {
            return Ok(StepResult::failed(StepFailure::NotFound(rel)));
        }
        if !step.include_ignored && self.index.is_ignored(&rel) {
            return Ok(StepResult::failed(StepFailure::Ignored(rel)));
        }
        let bytes = match fs::read(&full) {
            Ok(bytes) => bytes,
            Err(err) => {
                return Ok(StepResult::failed(StepFailure::ExecutionFailure(format!(
                    "failed to read {rel}: {err}"
                ))));
            }
        };
        match String::from_utf8(bytes) {
            Ok(content) => Ok(StepResult::ok(Value::String(content))),
            Err(_) => Ok(StepResult::failed(StepFailure::Rejected(format!(
                "{rel} is not a UTF-8 text file"
            )))),
        }
    }

    fn write_file(&self, step: &PlanStep, store: &mut ChangeCheckpointStore) -> Result<StepResult> {
        let Some(content) = step.content.as_deref() else {
            return Ok(StepResult::failed(StepFailure::Rejected(format!(
                "write to '{}' has no content",
                step.target
            ))));
        };
        let rel = match self.sanitize(&step.target) {
            Ok(rel) => rel,
            Err(failure) => return Ok(StepResult::failed(failure)),
        };
        let recorded = if self.stage_writes {
            store.stage(&rel, content)
        } else {
            store.apply_write(&rel, content)
        };
        let record = match recorded {
            Ok(record) => record,
            Err(err) => {
                let message = format!("{err:#}");
                return Ok(StepResult::failed(StepFailure::ExecutionFailure(message.clone()))
                    .with_error_info(ErrorInfo::from_message(message)));
            }
        };
        Ok(StepResult::ok(json!({
            "path": record.file_path,
            "created": record.created,
            "staged": self.stage_writes,
            "before_sha256": sha256_hex(&record.before),
            "after_sha256": sha256_hex(&record.after),
        })))
    }

    fn list_files(&self, step: &PlanStep) -> StepResult {
        let pattern = match step.target.trim() {
            "" => "*",
            other => other,
        };
        match self
            .index
            .find_files(pattern, step.include_ignored, &step.file_types)
        {
            Ok(paths) => StepResult::ok(json!(paths)),
            Err(err) => StepResult::failed(StepFailure::Rejected(err.to_string())),
        }
    }

    fn run_shell(&self, step: &PlanStep) -> StepResult {
        let cmd = step.target.trim();
        if step.execute != Some(true) {
            return StepResult::failed(StepFailure::Rejected(format!(
                "shell step not executed without execute=true: {cmd}"
            )));
        }
        if cmd.is_empty() {
            return StepResult::failed(StepFailure::Rejected("empty shell command".to_string()));
        }
        let run = match self.runner.run(cmd, &self.workspace, self.shell_timeout) {
            Ok(run) => run,
            Err(err) => {
                let message = err.to_string();
                return StepResult::failed(StepFailure::ExecutionFailure(message.clone()))
                    .with_error_info(ErrorInfo::from_message(message));
            }
        };
        let mut output = json!({
            "command": cmd,
            "status": run.status,
            "stdout": run.stdout,
            "stderr": run.stderr,
            "timed_out": run.timed_out,
        });
        if run.succeeded() {
            return StepResult::ok(output);
        }
        let message = if run.timed_out {
            format!("command timed out: {cmd}")
        } else {
            match run.status {
                Some(code) => format!("command exited with status {code}: {cmd}"),
                None => format!("command terminated by signal: {cmd}"),
            }
        };
        output["error"] = json!(message);
        let diagnostic = if run.stderr.trim().is_empty() {
            &run.stdout
        } else {
            &run.stderr
        };
        let info = self.classifier.classify(diagnostic);
        StepResult::failed(StepFailure::ExecutionFailure(message))
            .with_output(output)
            .with_error_info(info)
    }

    fn search(&self, step: &PlanStep) -> StepResult {
        let pattern = step.target.as_str();
        if pattern.trim().is_empty() {
            return StepResult::failed(StepFailure::Rejected("empty search pattern".to_string()));
        }
        if let Err(err) = regex::Regex::new(pattern) {
            return StepResult::failed(StepFailure::Rejected(format!(
                "invalid search pattern '{pattern}': {err}"
            )));
        }
        match self
            .index
            .grep_files(pattern, step.include_ignored, &step.file_types)
        {
            Ok(matches) => StepResult::ok(json!(matches)),
            Err(err) => StepResult::failed(StepFailure::ExecutionFailure(err.to_string())),
        }
    }

    fn generate(&self, step: &PlanStep) -> StepResult {
        let Some(client) = &self.completion else {
            return StepResult::failed(StepFailure::Rejected(
                "no completion client configured".to_string(),
            ));
        };
        match client.complete(&step.target, None) {
            Ok(text) => StepResult::ok(Value::String(text)),
            Err(err) => StepResult::failed(StepFailure::ExecutionFailure(format!("{err:#}"))),
        }
    }
}

pub fn sha256_hex(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use plansmith_core::{FailureKind, IndexConfig, StepStatus};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct RecordingRunner {
        commands: Mutex<Vec<String>>,
        result: ShellRunResult,
    }

    impl RecordingRunner {
        fn returning(status: i32, stdout: &str, stderr: &str) -> Arc<Self> {
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

        fn captured(&self) -> Vec<String> {
            self.commands.lock().expect("commands").clone()
        }
    }

    impl ShellRunner for RecordingRunner {
        fn run(&self, cmd: &str, _cwd: &Path, _timeout: Option<Duration>) -> Result<ShellRunResult> {
            self.commands.lock().expect("commands").push(cmd.to_string());
            Ok(self.result.clone())
        }
    }

    struct EchoCompletion;

    impl CompletionClient for EchoCompletion {
        fn complete(&self, prompt: &str, _context: Option<&Value>) -> Result<String> {
            if prompt.is_empty() {
                return Err(anyhow!("empty prompt"));
            }
            Ok(format!("echo: {prompt}"))
        }
    }

    fn executor(workspace: &TempDir, runner: Arc<RecordingRunner>) -> PlanStepExecutor {
        PlanStepExecutor::new(
            workspace.path(),
            Arc::new(WorkspaceIndex::new(workspace.path(), &IndexConfig::default())),
            Arc::new(PatternClassifier::new().expect("classifier")),
            runner,
        )
        .with_sanitizer(PathSanitizer::default(), "proj".to_string())
    }

    #[test]
    fn shell_step_without_execute_flag_never_spawns() {
        let workspace = TempDir::new().expect("workspace");
        let runner = RecordingRunner::returning(0, "ok", "");
        let exec = executor(&workspace, runner.clone());
        let mut store = ChangeCheckpointStore::new(workspace.path());

        let step = PlanStep::new("shell", "run", "rm -rf build");
        let result = exec.execute(&step, &mut store).expect("execute");
        assert_eq!(result.status, StepStatus::Rejected);
        assert_eq!(result.failure, Some(FailureKind::Rejected));

        let result = exec
            .execute(&step.clone().with_execute(false), &mut store)
            .expect("execute");
        assert_eq!(result.status, StepStatus::Rejected);
        assert!(runner.captured().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn executed_shell_step_captures_output() {
        let workspace = TempDir::new().expect("workspace");
        let runner = RecordingRunner::returning(0, "3 passed", "");
        let exec = executor(&workspace, runner.clone());
        let mut store = ChangeCheckpointStore::new(workspace.path());

        let step = PlanStep::new("bash", "execute", "npm test").with_execute(true);
        let result = exec.execute(&step, &mut store).expect("execute");
        assert!(result.is_ok());
        assert_eq!(result.output["stdout"], "3 passed");
        assert_eq!(runner.captured(), vec!["npm test".to_string()]);
        assert!(store.is_empty());
    }

    #[test]
    fn failing_shell_step_is_classified() {
        let workspace = TempDir::new().expect("workspace");
        let runner = RecordingRunner::returning(
            1,
            "",
            "Traceback (most recent call last):\n  File \"app.py\", line 3, in <module>\nNameError: name 'x' is not defined\n",
        );
        let exec = executor(&workspace, runner);
        let mut store = ChangeCheckpointStore::new(workspace.path());

        let step = PlanStep::new("shell", "run", "python app.py").with_execute(true);
        let result = exec.execute(&step, &mut store).expect("execute");
        assert_eq!(result.status, StepStatus::Error);
        assert_eq!(result.failure, Some(FailureKind::ExecutionFailure));
        assert_eq!(result.output["status"], 1);
        let info = result.error_info.expect("error info");
        assert_eq!(info.error_type.as_deref(), Some("NameError"));
        assert_eq!(info.file.as_deref(), Some("app.py"));
        assert_eq!(info.line, Some(3));
    }

    #[test]
    fn write_sanitizes_target_and_records_change() {
        let workspace = TempDir::new().expect("workspace");
        let exec = executor(&workspace, RecordingRunner::returning(0, "", ""));
        let mut store = ChangeCheckpointStore::new(workspace.path());

        let step = PlanStep::write("`proj/src/app.js`", "console.log('hi');\n");
        let result = exec.execute(&step, &mut store).expect("execute");
        assert!(result.is_ok());
        assert_eq!(result.output["path"], "src/app.js");
        assert_eq!(result.output["created"], true);
        assert_eq!(result.output["after_sha256"], sha256_hex("console.log('hi');\n"));
        assert_eq!(
            fs::read_to_string(workspace.path().join("src/app.js")).expect("read"),
            "console.log('hi');\n"
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.history()[0].before, "");
    }

    #[test]
    fn unsafe_or_empty_writes_are_rejected_without_records() {
        let workspace = TempDir::new().expect("workspace");
        let exec = executor(&workspace, RecordingRunner::returning(0, "", ""));
        let mut store = ChangeCheckpointStore::new(workspace.path());

        let result = exec
            .execute(&PlanStep::write("../escape.txt", "x"), &mut store)
            .expect("execute");
        assert_eq!(result.status, StepStatus::Rejected);
        assert_eq!(result.failure, Some(FailureKind::SanitizationFailure));

        let result = exec
            .execute(&PlanStep::new("file_ops", "write", "a.txt"), &mut store)
            .expect("execute");
        assert_eq!(result.status, StepStatus::Rejected);
        assert!(store.is_empty());
        assert!(!workspace.path().join("a.txt").exists());
    }

    #[test]
    fn staged_writes_leave_disk_untouched() {
        let workspace = TempDir::new().expect("workspace");
        fs::write(workspace.path().join("notes.md"), "old\n").expect("seed");
        let exec = executor(&workspace, RecordingRunner::returning(0, "", "")).with_stage_writes(true);
        let mut store = ChangeCheckpointStore::new(workspace.path());

        let result = exec
            .execute(&PlanStep::write("notes.md", "new\n"), &mut store)
            .expect("execute");
        assert_eq!(result.output["staged"], true);
        assert_eq!(
            fs::read_to_string(workspace.path().join("notes.md")).expect("read"),
            "old\n"
        );
        assert!(store.accept("notes.md").expect("accept"));
        assert_eq!(
            fs::read_to_string(workspace.path().join("notes.md")).expect("read"),
            "new\n"
        );
    }

    #[test]
    fn read_reports_missing_and_ignored_files() {
        let workspace = TempDir::new().expect("workspace");
        fs::write(workspace.path().join(".gitignore"), "secret.env\n").expect("gitignore");
        fs::write(workspace.path().join("secret.env"), "TOKEN=1\n").expect("secret");
        fs::write(workspace.path().join("readme.md"), "# hi\n").expect("readme");
        let exec = executor(&workspace, RecordingRunner::returning(0, "", ""));
        let mut store = ChangeCheckpointStore::new(workspace.path());

        let ok = exec
            .execute(&PlanStep::new("file_ops", "read", "readme.md"), &mut store)
            .expect("execute");
        assert_eq!(ok.output, Value::String("# hi\n".to_string()));

        let missing = exec
            .execute(&PlanStep::new("file_ops", "read", "nope.md"), &mut store)
            .expect("execute");
        assert_eq!(missing.failure, Some(FailureKind::NotFound));
        assert_eq!(missing.status, StepStatus::Error);

        let ignored = exec
            .execute(&PlanStep::new("file_ops", "read", "secret.env"), &mut store)
            .expect("execute");
        assert_eq!(ignored.failure, Some(FailureKind::Ignored));

        let mut override_step = PlanStep::new("file_ops", "read", "secret.env");
        override_step.include_ignored = true;
        let allowed = exec.execute(&override_step, &mut store).expect("execute");
        assert!(allowed.is_ok());
    }

    #[test]
    fn absolute_targets_inside_the_workspace_are_accepted() {
        let workspace = TempDir::new().expect("workspace");
        fs::write(workspace.path().join("test_file.py"), "x = 1\n").expect("seed");
        let exec = executor(&workspace, RecordingRunner::returning(0, "", ""));
        let mut store = ChangeCheckpointStore::new(workspace.path());

        let read_target = workspace.path().join("test_file.py");
        let read = exec
            .execute(
                &PlanStep::new("file_ops", "read", read_target.to_string_lossy()),
                &mut store,
            )
            .expect("execute");
        assert_eq!(read.output, Value::String("x = 1\n".to_string()));

        let write_target = workspace.path().join("contracts").join("test.sol");
        let written = exec
            .execute(
                &PlanStep::write(write_target.to_string_lossy(), "contract T {}\n"),
                &mut store,
            )
            .expect("execute");
        assert!(written.is_ok());
        assert_eq!(written.output["path"], "contracts/test.sol");
        assert_eq!(
            fs::read_to_string(workspace.path().join("contracts/test.sol")).expect("sol"),
            "contract T {}\n"
        );

        let outside = TempDir::new().expect("outside");
        let escaped = exec
            .execute(
                &PlanStep::write(outside.path().join("x.txt").to_string_lossy(), "no\n"),
                &mut store,
            )
            .expect("execute");
        assert_eq!(escaped.failure, Some(FailureKind::SanitizationFailure));
        assert!(!outside.path().join("x.txt").exists());
    }

    #[test]
    fn write_io_fault_is_a_failed_step() {
        let workspace = TempDir::new().expect("workspace");
        fs::write(workspace.path().join("a.txt"), "plain\n").expect("seed");
        let exec = executor(&workspace, RecordingRunner::returning(0, "", ""));
        let mut store = ChangeCheckpointStore::new(workspace.path());

        let result = exec
            .execute(&PlanStep::write("a.txt/inner.txt", "x\n"), &mut store)
            .expect("execute");
        assert_eq!(result.status, StepStatus::Error);
        assert_eq!(result.failure, Some(FailureKind::ExecutionFailure));
        assert!(result.error_message().is_some_and(|msg| msg.contains("a.txt")));
        assert!(store.is_empty());
    }

    #[test]
    fn list_and_search_delegate_to_index() {
        let workspace = TempDir::new().expect("workspace");
        fs::create_dir_all(workspace.path().join("pkg")).expect("dir");
        fs::write(workspace.path().join("pkg/a.py"), "TODO = 1\n").expect("file");
        fs::write(workspace.path().join("b.txt"), "nothing\n").expect("file");
        let exec = executor(&workspace, RecordingRunner::returning(0, "", ""));
        let mut store = ChangeCheckpointStore::new(workspace.path());

        let listed = exec
            .execute(&PlanStep::new("file_ops", "list", "*.py"), &mut store)
            .expect("execute");
        assert_eq!(listed.output, json!(["pkg/a.py"]));

        let everything = exec
            .execute(&PlanStep::new("file_ops", "list", ""), &mut store)
            .expect("execute");
        assert_eq!(everything.output.as_array().map(Vec::len), Some(2));

        let found = exec
            .execute(&PlanStep::new("grep", "search", "TODO"), &mut store)
            .expect("execute");
        assert_eq!(found.output, json!([{"path": "pkg/a.py", "line": 1, "text": "TODO = 1"}]));

        let none = exec
            .execute(&PlanStep::new("grep", "search", "absent"), &mut store)
            .expect("execute");
        assert_eq!(none.output, json!([]));

        let invalid = exec
            .execute(&PlanStep::new("grep", "search", "(oops"), &mut store)
            .expect("execute");
        assert_eq!(invalid.status, StepStatus::Rejected);
    }

    #[test]
    fn chat_requires_a_completion_client() {
        let workspace = TempDir::new().expect("workspace");
        let exec = executor(&workspace, RecordingRunner::returning(0, "", ""));
        let mut store = ChangeCheckpointStore::new(workspace.path());
        let step = PlanStep::new("chat", "generate", "summarize");

        let rejected = exec.execute(&step, &mut store).expect("execute");
        assert_eq!(rejected.status, StepStatus::Rejected);

        let exec = exec.with_completion(Arc::new(EchoCompletion));
        let answered = exec.execute(&step, &mut store).expect("execute");
        assert_eq!(answered.output, Value::String("echo: summarize".to_string()));

        let failed = exec
            .execute(&PlanStep::new("chat", "generate", ""), &mut store)
            .expect("execute");
        assert_eq!(failed.status, StepStatus::Error);
    }

    #[test]
    fn unknown_steps_are_rejected_with_message() {
        let workspace = TempDir::new().expect("workspace");
        let exec = executor(&workspace, RecordingRunner::returning(0, "", ""));
        let mut store = ChangeCheckpointStore::new(workspace.path());
        let result = exec
            .execute(&PlanStep::new("browser", "open", "https://example.com"), &mut store)
            .expect("execute");
        assert_eq!(result.status, StepStatus::Rejected);
        assert!(
            result
                .error_message()
                .is_some_and(|msg| msg.contains("browser"))
        );
    }
}
