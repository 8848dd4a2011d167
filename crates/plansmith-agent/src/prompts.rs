//! Prompt text for `ask`.

use plansmith_tools::WorkspaceSummary;
use serde_json::{Value, json};

/// Response-format rules appended to every request.
pub const PLAN_FORMAT_PROMPT: &str = r#"## RESPONSE FORMAT
Answer in exactly one of two forms.

1. A JSON plan and nothing else:
   {"steps": [{"tool": "file_ops", "action": "write", "target": "src/app.js", "content": "..."},
              {"tool": "shell", "action": "run", "target": "npm test", "execute": true}],
    "expected_outcome": "one sentence"}
   Tools: file_ops (read, write, list), shell (run), grep (search), chat (generate).
   Shell steps only run when "execute" is true.

2. Markdown where every file is one fenced code block, preceded by a heading
   that names its path, e.g. `### src/app.js`.

## PATH RULES
- Paths are relative to the repository root and use forward slashes.
- Never prefix paths with the repository's own directory name.
- Never use absolute paths or `..`.
- Always give the complete file content, never a partial diff.
"#;

pub fn build_ask_prompt(request: &str, project_root_name: &str) -> String {
    format!(
        "Repository: {project_root_name}\n\n## REQUEST\n{}\n\n{PLAN_FORMAT_PROMPT}",
        request.trim()
    )
}

/// Repository context passed alongside the prompt.
pub fn repository_context(project_root_name: &str, summary: &WorkspaceSummary) -> Value {
    json!({
        "repository": project_root_name,
        "files": summary.files,
        "ignored_files": summary.ignored,
        "files_by_extension": summary.by_extension,
    })
}
