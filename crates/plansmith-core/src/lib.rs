use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub type Result<T> = anyhow::Result<T>;

pub const RUNTIME_DIR_NAME: &str = ".plansmith";

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(RUNTIME_DIR_NAME)
}

// ── Plan steps ──────────────────────────────────────────────────────────

/// One unit of work proposed by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanStep {
    pub tool: String,
    pub action: String,
    #[serde(default)]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute: Option<bool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub include_ignored: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_types: Vec<String>,
}

impl PlanStep {
    pub fn new(tool: impl Into<String>, action: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            action: action.into(),
            target: target.into(),
            content: None,
            description: None,
            execute: None,
            include_ignored: false,
            file_types: Vec::new(),
        }
    }

    /// A `file_ops`/`write` step carrying the full new file body.
    pub fn write(target: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::new("file_ops", "write", target)
        }
    }

    pub fn with_execute(mut self, execute: bool) -> Self {
        self.execute = Some(execute);
        self
    }

    pub fn kind(&self) -> Option<StepKind> {
        StepKind::resolve(&self.tool, &self.action)
    }
}

/// Typed dispatch target for a `(tool, action)` pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    FileRead,
    FileWrite,
    FileList,
    ShellRun,
    GrepSearch,
    ChatGenerate,
}

impl StepKind {
    pub fn resolve(tool: &str, action: &str) -> Option<Self> {
        let tool = normalize_tool_name(tool)?;
        let action = action.trim().to_ascii_lowercase();
        match (tool, action.as_str()) {
            ("file_ops", "read" | "open" | "view") => Some(Self::FileRead),
            ("file_ops", "write" | "create" | "update" | "save") => Some(Self::FileWrite),
            ("file_ops", "list" | "glob" | "find" | "ls") => Some(Self::FileList),
            ("shell", "run" | "execute" | "exec") => Some(Self::ShellRun),
            ("grep", "search" | "find" | "grep") => Some(Self::GrepSearch),
            ("chat", "generate" | "complete" | "ask") => Some(Self::ChatGenerate),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileRead => "file_ops/read",
            Self::FileWrite => "file_ops/write",
            Self::FileList => "file_ops/list",
            Self::ShellRun => "shell/run",
            Self::GrepSearch => "grep/search",
            Self::ChatGenerate => "chat/generate",
        }
    }
}

/// Maps the tool names models tend to invent onto the four canonical tools.
pub fn normalize_tool_name(tool: &str) -> Option<&'static str> {
    let normalized = tool.trim().to_ascii_lowercase().replace('-', "_");
    match normalized.as_str() {
        "file_ops" | "fileops" | "file" | "files" | "fs" => Some("file_ops"),
        "shell" | "bash" | "command" | "terminal" => Some("shell"),
        "grep" | "search" => Some("grep"),
        "chat" | "llm" => Some("chat"),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructuredPlan {
    pub steps: Vec<PlanStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
}

// ── Step results ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Error,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Ignored,
    Rejected,
    ExecutionFailure,
    SanitizationFailure,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StepFailure {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("path is excluded by ignore rules: {0}")]
    Ignored(String),
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    ExecutionFailure(String),
    #[error("unsafe path rejected: {0}")]
    SanitizationFailure(String),
}

impl StepFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotFound(_) => FailureKind::NotFound,
            Self::Ignored(_) => FailureKind::Ignored,
            Self::Rejected(_) => FailureKind::Rejected,
            Self::ExecutionFailure(_) => FailureKind::ExecutionFailure,
            Self::SanitizationFailure(_) => FailureKind::SanitizationFailure,
        }
    }

    pub fn status(&self) -> StepStatus {
        match self {
            Self::NotFound(_) | Self::ExecutionFailure(_) => StepStatus::Error,
            Self::Ignored(_) | Self::Rejected(_) | Self::SanitizationFailure(_) => {
                StepStatus::Rejected
            }
        }
    }
}

/// Classified diagnosis of a failed command.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

impl ErrorInfo {
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub status: StepStatus,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl StepResult {
    pub fn ok(output: Value) -> Self {
        Self {
            status: StepStatus::Ok,
            output,
            error_info: None,
            failure: None,
        }
    }

    pub fn failed(failure: StepFailure) -> Self {
        Self {
            status: failure.status(),
            output: json!({"error": failure.to_string()}),
            error_info: None,
            failure: Some(failure.kind()),
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == StepStatus::Ok
    }

    pub fn error_message(&self) -> Option<&str> {
        self.output.get("error").and_then(Value::as_str)
    }
}

// ── Change history ──────────────────────────────────────────────────────

/// One applied or staged write. `created` marks files that did not exist
/// before the change; `before` is empty for those.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeRecord {
    pub file_path: String,
    pub before: String,
    pub after: String,
    #[serde(default)]
    pub created: bool,
}

impl ChangeRecord {
    pub fn new(
        file_path: impl Into<String>,
        before: impl Into<String>,
        after: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            before: before.into(),
            after: after.into(),
            created: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrepMatch {
    pub path: String,
    pub line: usize,
    pub text: String,
}

// ── Collaborators ───────────────────────────────────────────────────────

/// File discovery and search over the target repository.
pub trait RepositoryIndex: Send + Sync {
    /// Relative paths matching `pattern`. A pattern without glob
    /// metacharacters matches as a substring.
    fn find_files(
        &self,
        pattern: &str,
        include_ignored: bool,
        file_types: &[String],
    ) -> Result<Vec<String>>;

    fn is_ignored(&self, rel_path: &str) -> bool;

    fn grep_files(
        &self,
        pattern: &str,
        include_ignored: bool,
        file_types: &[String],
    ) -> Result<Vec<GrepMatch>>;
}

pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, stderr: &str) -> ErrorInfo;
}

pub trait CompletionClient: Send + Sync {
    fn complete(&self, prompt: &str, context: Option<&Value>) -> Result<String>;
}

// ── Configuration ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_seconds: default_llm_timeout_seconds(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_api_key_env() -> String {
    "PLANSMITH_API_KEY".to_string()
}
fn default_llm_timeout_seconds() -> u64 {
    120
}
fn default_max_retries() -> u8 {
    3
}
fn default_retry_base_ms() -> u64 {
    400
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizerConfig {
    /// Overrides the workspace directory name as the duplicated segment to strip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_root_name: Option<String>,
    #[serde(default = "default_top_level_dirs")]
    pub top_level_dirs: Vec<String>,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            project_root_name: None,
            top_level_dirs: default_top_level_dirs(),
        }
    }
}

impl SanitizerConfig {
    pub fn project_root_name_for(&self, workspace: &Path) -> String {
        if let Some(name) = self
            .project_root_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
        {
            return name.to_string();
        }
        workspace
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

pub fn default_top_level_dirs() -> Vec<String> {
    [
        "src",
        "lib",
        "app",
        "public",
        "components",
        "pkg",
        "cmd",
        "test",
        "tests",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Zero leaves commands unbounded.
    #[serde(default)]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_true")]
    pub respect_gitignore: bool,
    #[serde(default = "default_max_matches")]
    pub max_matches: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            max_matches: default_max_matches(),
        }
    }
}

fn default_max_matches() -> usize {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Record writes as pending suggestions instead of touching disk.
    #[serde(default)]
    pub stage_writes: bool,
    #[serde(default = "default_true")]
    pub persist_history: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            stage_writes: false,
            persist_history: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sanitizer: SanitizerConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

impl AppConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())?;
        Some(Path::new(&home).join(RUNTIME_DIR_NAME).join("settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    pub fn legacy_toml_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("config.toml")
    }

    /// Defaults, then legacy TOML, then user, project and local JSON
    /// settings, each layer deep-merged over the previous one.
    pub fn load(workspace: &Path) -> Result<Self> {
        Self::load_with_user_settings(workspace, Self::user_settings_path().as_deref())
    }

    /// [`Self::load`] with an explicit user settings file, or none.
    pub fn load_with_user_settings(workspace: &Path, user: Option<&Path>) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        let legacy = Self::legacy_toml_path(workspace);
        if legacy.exists() {
            let raw = fs::read_to_string(legacy)?;
            let legacy_cfg: AppConfig = toml::from_str(&raw)?;
            merge_json_value(&mut merged, &serde_json::to_value(legacy_cfg)?);
        }

        let mut paths = Vec::new();
        if let Some(user) = user {
            paths.push(user.to_path_buf());
        }
        paths.push(Self::project_settings_path(workspace));
        paths.push(Self::project_local_settings_path(workspace));

        for path in paths {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(path)?;
            let value: Value = serde_json::from_str(&raw)?;
            merge_json_value(&mut merged, &value);
        }

        Ok(serde_json::from_value(merged)?)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = Self::project_settings_path(workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid config path"))?,
        )?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

fn merge_json_value(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_obj), Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

// ── Events ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq_no: u64,
    pub at: DateTime<Utc>,
    pub session_id: Uuid,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventKind {
    StepExecuted {
        tool: String,
        action: String,
        target: String,
        status: StepStatus,
    },
    FileWritten {
        path: String,
        before_sha256: String,
        after_sha256: String,
        created: bool,
    },
    ChangeStaged {
        path: String,
    },
    ChangeAccepted {
        path: String,
    },
    ChangeRejected {
        path: String,
    },
    CheckpointReverted {
        index: usize,
        files: Vec<String>,
    },
    CheckpointRedone {
        index: usize,
        files: Vec<String>,
    },
    BlockSkipped {
        line: usize,
        reason: String,
    },
}
