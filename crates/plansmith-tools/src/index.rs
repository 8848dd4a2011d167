use anyhow::{Result, anyhow};
use ignore::WalkBuilder;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use plansmith_core::{GrepMatch, IndexConfig, RUNTIME_DIR_NAME, RepositoryIndex};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Filesystem-backed index over a workspace, honoring `.gitignore` rules.
pub struct WorkspaceIndex {
    workspace: PathBuf,
    respect_gitignore: bool,
    max_matches: usize,
    gitignore: Gitignore,
}

impl WorkspaceIndex {
    pub fn new(workspace: &Path, cfg: &IndexConfig) -> Self {
        let mut builder = GitignoreBuilder::new(workspace);
        let root_ignore = workspace.join(".gitignore");
        if root_ignore.is_file() {
            // A malformed line only drops that line's rule.
            let _ = builder.add(root_ignore);
        }
        let gitignore = builder.build().unwrap_or_else(|_| Gitignore::empty());
        Self {
            workspace: workspace.to_path_buf(),
            respect_gitignore: cfg.respect_gitignore,
            max_matches: cfg.max_matches.max(1),
            gitignore,
        }
    }

    /// File count, ignored-file count and per-extension totals.
    pub fn summary(&self) -> Result<WorkspaceSummary> {
        let visible = self.files(false);
        let all = self.files(true);
        let mut by_extension = BTreeMap::new();
        for rel in &visible {
            let ext = Path::new(rel)
                .extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_else(|| "(none)".to_string());
            *by_extension.entry(ext).or_insert(0usize) += 1;
        }
        Ok(WorkspaceSummary {
            files: visible.len(),
            ignored: all.len().saturating_sub(visible.len()),
            by_extension,
        })
    }

    fn files(&self, include_ignored: bool) -> Vec<String> {
        let respect = self.respect_gitignore && !include_ignored;
        let mut out: Vec<String> = walk_paths(&self.workspace, respect)
            .into_iter()
            .filter(|path| path.is_file())
            .filter_map(|path| {
                path.strip_prefix(&self.workspace)
                    .ok()
                    .map(normalize_rel_path)
            })
            .collect();
        out.sort();
        out
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct WorkspaceSummary {
    pub files: usize,
    pub ignored: usize,
    pub by_extension: BTreeMap<String, usize>,
}

impl RepositoryIndex for WorkspaceIndex {
    fn find_files(
        &self,
        pattern: &str,
        include_ignored: bool,
        file_types: &[String],
    ) -> Result<Vec<String>> {
        let matcher = FileMatcher::new(pattern)?;
        Ok(self
            .files(include_ignored)
            .into_iter()
            .filter(|rel| has_file_type(rel, file_types) && matcher.matches(rel))
            .collect())
    }

    fn is_ignored(&self, rel_path: &str) -> bool {
        let rel = Path::new(rel_path);
        if should_skip_rel_path(rel) {
            return true;
        }
        let is_dir = self.workspace.join(rel).is_dir();
        self.gitignore
            .matched_path_or_any_parents(rel, is_dir)
            .is_ignore()
    }

    fn grep_files(
        &self,
        pattern: &str,
        include_ignored: bool,
        file_types: &[String],
    ) -> Result<Vec<GrepMatch>> {
        let regex =
            Regex::new(pattern).map_err(|err| anyhow!("invalid search pattern '{pattern}': {err}"))?;
        let mut matches = Vec::new();
        for rel in self.files(include_ignored) {
            if !has_file_type(&rel, file_types) {
                continue;
            }
            let Ok(bytes) = fs::read(self.workspace.join(&rel)) else {
                continue;
            };
            if is_binary(&bytes) {
                continue;
            }
            let Ok(content) = String::from_utf8(bytes) else {
                continue;
            };
            for (idx, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(GrepMatch {
                        path: rel.clone(),
                        line: idx + 1,
                        text: line.to_string(),
                    });
                    if matches.len() >= self.max_matches {
                        return Ok(matches);
                    }
                }
            }
        }
        Ok(matches)
    }
}

enum FileMatcher {
    All,
    Glob(glob::Pattern),
    Substring(String),
}

impl FileMatcher {
    fn new(pattern: &str) -> Result<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() || pattern == "*" || pattern == "**" || pattern == "**/*" {
            return Ok(Self::All);
        }
        if pattern.contains(['*', '?', '[']) {
            let compiled = glob::Pattern::new(pattern)
                .map_err(|err| anyhow!("invalid glob pattern '{pattern}': {err}"))?;
            return Ok(Self::Glob(compiled));
        }
        Ok(Self::Substring(pattern.to_string()))
    }

    fn matches(&self, rel: &str) -> bool {
        match self {
            Self::All => true,
            Self::Glob(pattern) => {
                pattern.matches(rel)
                    || Path::new(rel)
                        .file_name()
                        .is_some_and(|name| pattern.matches(&name.to_string_lossy()))
            }
            Self::Substring(needle) => rel.contains(needle.as_str()),
        }
    }
}

fn has_file_type(rel: &str, file_types: &[String]) -> bool {
    if file_types.is_empty() {
        return true;
    }
    let Some(ext) = Path::new(rel).extension().map(|ext| ext.to_string_lossy()) else {
        return false;
    };
    file_types
        .iter()
        .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(&ext))
}

pub(crate) fn should_skip_rel_path(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str() == ".git" || c.as_os_str() == RUNTIME_DIR_NAME || c.as_os_str() == "target"
    })
}

fn walk_paths(workspace: &Path, respect_gitignore: bool) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(workspace);
    builder.hidden(false);
    builder.follow_links(false);
    builder.parents(respect_gitignore);
    builder.git_ignore(respect_gitignore);
    builder.git_global(respect_gitignore);
    builder.git_exclude(respect_gitignore);
    builder.ignore(respect_gitignore);
    builder.require_git(false);

    let mut paths = Vec::new();
    for entry in builder.build() {
        let Ok(entry) = entry else {
            continue;
        };
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(workspace) else {
            continue;
        };
        if should_skip_rel_path(rel) {
            continue;
        }
        paths.push(path.to_path_buf());
    }
    paths
}

fn normalize_rel_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn is_binary(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    if bytes.contains(&0) {
        return true;
    }
    let sample = bytes.iter().take(8192);
    let non_text = sample
        .filter(|b| !(b.is_ascii() || **b == b'\n' || **b == b'\r' || **b == b'\t'))
        .count();
    non_text > 64
}
