use plansmith_core::{RUNTIME_DIR_NAME, SanitizerConfig, default_top_level_dirs};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("path is empty")]
    Empty,
    #[error("absolute path denied")]
    Absolute,
    #[error("path traversal denied")]
    PathTraversal,
    #[error("path contains invalid character {0:?}")]
    InvalidCharacter(char),
    #[error("reserved directory denied: {0}")]
    Reserved(String),
}

const WRAPPERS: &[&str] = &["`", "\"", "'", "**", "__", "*", "_"];
const FORBIDDEN_CHARS: &[char] = &['`', '"', '\'', ':', '*', '?', '<', '>', '|'];

/// Normalizes and validates file paths lifted out of model output.
#[derive(Debug, Clone)]
pub struct PathSanitizer {
    top_level_dirs: Vec<String>,
    reserved_dirs: Vec<String>,
}

impl PathSanitizer {
    pub fn new(top_level_dirs: Vec<String>) -> Self {
        Self {
            top_level_dirs,
            reserved_dirs: vec![".git".to_string(), RUNTIME_DIR_NAME.to_string()],
        }
    }

    pub fn from_config(cfg: &SanitizerConfig) -> Self {
        Self::new(cfg.top_level_dirs.clone())
    }

    /// Returns a repository-relative, forward-slash path or the reason the
    /// candidate was refused.
    pub fn sanitize(&self, raw: &str, project_root_name: &str) -> Result<String, SanitizeError> {
        let stripped = strip_markup(raw).replace('\\', "/");
        if stripped.is_empty() {
            return Err(SanitizeError::Empty);
        }
        if stripped.starts_with('/') || stripped.starts_with('~') {
            return Err(SanitizeError::Absolute);
        }
        if let Some(ch) = stripped.chars().find(|ch| {
            FORBIDDEN_CHARS.contains(ch) || ch.is_control() || (ch.is_whitespace() && *ch != ' ')
        }) {
            // `C:/x` lands here through the colon.
            if ch == ':' && has_drive_prefix(&stripped) {
                return Err(SanitizeError::Absolute);
            }
            return Err(SanitizeError::InvalidCharacter(ch));
        }

        let mut segments = Vec::new();
        for segment in stripped.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(SanitizeError::PathTraversal),
                other => segments.push(other),
            }
        }
        if segments.is_empty() {
            return Err(SanitizeError::Empty);
        }

        self.collapse_project_dir(&mut segments, project_root_name.trim());

        if let Some(first) = segments.first()
            && self.reserved_dirs.iter().any(|dir| dir == first)
        {
            return Err(SanitizeError::Reserved((*first).to_string()));
        }
        Ok(segments.join("/"))
    }

    fn collapse_project_dir(&self, segments: &mut Vec<&str>, project: &str) {
        if project.is_empty() {
            return;
        }
        let is_project = |segment: &str| segment.eq_ignore_ascii_case(project);
        if segments.len() > 1 && is_project(segments[0]) {
            segments.remove(0);
        }
        let mut idx = 0;
        while idx + 2 < segments.len() {
            if self.top_level_dirs.iter().any(|dir| dir == segments[idx])
                && is_project(segments[idx + 1])
            {
                segments.remove(idx + 1);
            }
            idx += 1;
        }
    }
}

impl Default for PathSanitizer {
    fn default() -> Self {
        Self::new(default_top_level_dirs())
    }
}

/// Peels wrapping backticks, quotes and emphasis plus trailing colons until
/// nothing changes.
fn strip_markup(raw: &str) -> String {
    let mut current = raw.trim();
    loop {
        let before = current;
        current = current.trim_end_matches(':').trim();
        for wrapper in WRAPPERS {
            if current.len() >= wrapper.len() * 2
                && let Some(inner) = current
                    .strip_prefix(wrapper)
                    .and_then(|rest| rest.strip_suffix(wrapper))
            {
                current = inner.trim();
                break;
            }
        }
        if current == before {
            return current.to_string();
        }
    }
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
