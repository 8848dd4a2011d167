mod extract;
pub mod prompts;
mod protocol;

pub use extract::{CodeBlockExtractor, ExtractedFile, Extraction, SkippedBlock, SourceHint};
pub use protocol::PlanInput;

use anyhow::{Result, anyhow};
use plansmith_core::{
    AppConfig, ChangeRecord, CompletionClient, EventKind, IndexConfig, PlanStep, StepKind,
    StepResult,
};
use plansmith_llm::ChatCompletionsClient;
use plansmith_observe::Observer;
use plansmith_store::ChangeCheckpointStore;
use plansmith_tools::{PlanStepExecutor, WorkspaceIndex, WorkspaceSummary};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// One executed step and what came of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepReport {
    pub step: PlanStep,
    pub result: StepResult,
}

/// Everything `execute_plan` did. `written` lists each successfully written
/// path once, in first-write order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlanOutcome {
    pub written: Vec<String>,
    pub reports: Vec<StepReport>,
    pub skipped: Vec<SkippedBlock>,
}

impl PlanOutcome {
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepReport> {
        self.reports.iter().filter(|report| !report.result.is_ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AskOutcome {
    pub response: String,
    pub structured: bool,
    pub outcome: PlanOutcome,
}

/// Runs whole model responses against one workspace and owns its change log.
pub struct PlanOrchestrator {
    executor: PlanStepExecutor,
    extractor: CodeBlockExtractor,
    store: ChangeCheckpointStore,
    observer: Observer,
    index_cfg: IndexConfig,
    persist_history: bool,
}

impl PlanOrchestrator {
    pub fn new(executor: PlanStepExecutor, store: ChangeCheckpointStore, observer: Observer) -> Self {
        let extractor = CodeBlockExtractor::new(
            executor.sanitizer().clone(),
            executor.project_root_name(),
        );
        Self {
            executor,
            extractor,
            store,
            observer,
            index_cfg: IndexConfig::default(),
            persist_history: false,
        }
    }

    /// Default collaborators, the saved journal when `agent.persist_history`
    /// is on, and a completion client for `llm`.
    pub fn from_config(workspace: &Path, cfg: &AppConfig) -> Result<Self> {
        let completion: Arc<dyn CompletionClient> =
            Arc::new(ChatCompletionsClient::new(cfg.llm.clone())?);
        let executor = PlanStepExecutor::from_config(workspace, cfg)?.with_completion(completion);
        let store = if cfg.agent.persist_history {
            ChangeCheckpointStore::load(workspace)?
        } else {
            ChangeCheckpointStore::new(workspace)
        };
        let mut orchestrator = Self::new(executor, store, Observer::new(workspace)?);
        orchestrator.index_cfg = cfg.index.clone();
        orchestrator.persist_history = cfg.agent.persist_history;
        Ok(orchestrator)
    }

    pub fn with_persist_history(mut self, persist: bool) -> Self {
        self.persist_history = persist;
        self
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.observer.set_verbose(verbose);
    }

    pub fn executor(&self) -> &PlanStepExecutor {
        &self.executor
    }

    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    pub fn store(&self) -> &ChangeCheckpointStore {
        &self.store
    }

    pub fn history(&self) -> &[ChangeRecord] {
        self.store.history()
    }

    pub fn current_checkpoint(&self) -> usize {
        self.store.current_checkpoint()
    }

    /// Dry run of the text path: what a response would write, without writing.
    pub fn extract(&self, text: &str) -> Extraction {
        self.extractor.extract_detailed(text)
    }

    /// Executes a response step by step in input order. A failing step never
    /// stops the ones after it. Changes made before an unexpected `Err` are
    /// still persisted.
    pub fn execute_plan(&mut self, input: impl Into<PlanInput>) -> Result<PlanOutcome> {
        let (steps, skipped) = match input.into() {
            PlanInput::Structured(plan) => (plan.steps, Vec::new()),
            PlanInput::Text(text) => {
                let extraction = self.extractor.extract_detailed(&text);
                let steps = extraction
                    .files
                    .into_iter()
                    .map(|file| PlanStep::write(file.path, file.content))
                    .collect();
                (steps, extraction.skipped)
            }
        };
        for block in &skipped {
            self.observer
                .verbose_log(&format!("skipped block at line {}: {}", block.line, block.reason));
            self.emit(EventKind::BlockSkipped {
                line: block.line,
                reason: block.reason.clone(),
            });
        }

        let mut outcome = PlanOutcome {
            skipped,
            ..PlanOutcome::default()
        };
        for (idx, step) in steps.into_iter().enumerate() {
            let result = match self.executor.execute(&step, &mut self.store) {
                Ok(result) => result,
                Err(err) => {
                    self.persist();
                    return Err(err);
                }
            };
            self.observer.verbose_log(&format!(
                "step {}: {} {} -> {:?}",
                idx + 1,
                step.kind().map_or("unsupported", StepKind::as_str),
                step.target,
                result.status
            ));
            self.emit(EventKind::StepExecuted {
                tool: step.tool.clone(),
                action: step.action.clone(),
                target: step.target.clone(),
                status: result.status,
            });
            if step.kind() == Some(StepKind::FileWrite) && result.is_ok() {
                let path = written_path(&result).unwrap_or_else(|| step.target.clone());
                self.emit_write(&path, &result.output);
                if !outcome.written.contains(&path) {
                    outcome.written.push(path);
                }
            }
            outcome.reports.push(StepReport { step, result });
        }
        self.persist();
        Ok(outcome)
    }

    /// Asks the completion client for a plan and executes the answer.
    pub fn ask(&mut self, request: &str) -> Result<AskOutcome> {
        let client = self
            .executor
            .completion()
            .cloned()
            .ok_or_else(|| anyhow!("no completion client configured"))?;
        let project = self.executor.project_root_name().to_string();
        let context = prompts::repository_context(&project, &self.analyze_repository()?);
        let prompt = prompts::build_ask_prompt(request, &project);
        self.observer
            .verbose_log(&format!("asking model ({} prompt chars)", prompt.len()));
        let response = client.complete(&prompt, Some(&context))?;
        let input = PlanInput::from_response(&response);
        let structured = input.is_structured();
        let outcome = self.execute_plan(input)?;
        Ok(AskOutcome {
            response,
            structured,
            outcome,
        })
    }

    pub fn analyze_repository(&self) -> Result<WorkspaceSummary> {
        WorkspaceIndex::new(self.executor.workspace(), &self.index_cfg).summary()
    }

    pub fn accept(&mut self, path: &str) -> Result<bool> {
        let accepted = self.store.accept(path)?;
        if accepted {
            self.emit(EventKind::ChangeAccepted {
                path: path.to_string(),
            });
            self.persist();
        }
        Ok(accepted)
    }

    pub fn reject(&mut self, path: &str) -> Result<bool> {
        let rejected = self.store.reject(path)?;
        if rejected {
            self.emit(EventKind::ChangeRejected {
                path: path.to_string(),
            });
            self.persist();
        }
        Ok(rejected)
    }

    pub fn revert_to_checkpoint(&mut self, index: i64) -> Result<bool> {
        Ok(self.revert(index)?.is_some())
    }

    /// Like [`Self::revert_to_checkpoint`] but returns the restored paths.
    pub fn revert(&mut self, index: i64) -> Result<Option<Vec<String>>> {
        let Some(files) = self.store.revert(index)? else {
            return Ok(None);
        };
        self.emit(EventKind::CheckpointReverted {
            index: self.store.current_checkpoint(),
            files: files.clone(),
        });
        self.persist();
        Ok(Some(files))
    }

    pub fn redo(&mut self, index: i64) -> Result<Option<Vec<String>>> {
        let Some(files) = self.store.redo(index)? else {
            return Ok(None);
        };
        self.emit(EventKind::CheckpointRedone {
            index: self.store.current_checkpoint(),
            files: files.clone(),
        });
        self.persist();
        Ok(Some(files))
    }

    pub fn clear_history(&mut self) {
        self.store.clear();
        self.persist();
    }

    fn emit_write(&self, path: &str, output: &Value) {
        let staged = output.get("staged").and_then(Value::as_bool).unwrap_or(false);
        if staged {
            self.emit(EventKind::ChangeStaged {
                path: path.to_string(),
            });
            return;
        }
        let field = |name: &str| {
            output
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        self.emit(EventKind::FileWritten {
            path: path.to_string(),
            before_sha256: field("before_sha256"),
            after_sha256: field("after_sha256"),
            created: output.get("created").and_then(Value::as_bool).unwrap_or(false),
        });
    }

    fn emit(&self, kind: EventKind) {
        if let Err(err) = self.observer.emit(kind) {
            self.observer.warn_log(&format!("failed to record event: {err}"));
        }
    }

    fn persist(&self) {
        if !self.persist_history {
            return;
        }
        if let Err(err) = self.store.save() {
            self.observer
                .warn_log(&format!("failed to save change journal: {err}"));
        }
    }
}

fn written_path(result: &StepResult) -> Option<String> {
    result
        .output
        .get("path")
        .and_then(Value::as_str)
        .map(str::to_string)
}
