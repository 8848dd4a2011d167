use indexmap::IndexMap;
use plansmith_policy::PathSanitizer;
use serde::{Deserialize, Serialize};

const LABEL_PREFIXES: &[&str] = &["filename:", "file name:", "file:", "path:"];
const COMMENT_MARKERS: &[&str] = &["<!--", "//", "/*", "#", "--", ";"];
const EXTENSIONLESS_NAMES: &[&str] = &[
    "Dockerfile",
    "Makefile",
    "Procfile",
    "Gemfile",
    "Rakefile",
    "Jenkinsfile",
    "Vagrantfile",
    "Caddyfile",
    "LICENSE",
    "README",
];

/// Which tier produced the path of an extracted block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceHint {
    HeaderLabel,
    FenceInfo,
    CommentLabel,
    Inferred,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedFile {
    pub path: String,
    pub content: String,
    pub source_hint: SourceHint,
}

/// A fenced block that produced no file, with the 1-based line of its fence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedBlock {
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Extraction {
    pub files: Vec<ExtractedFile>,
    pub skipped: Vec<SkippedBlock>,
}

impl Extraction {
    pub fn into_map(self) -> IndexMap<String, String> {
        self.files
            .into_iter()
            .map(|file| (file.path, file.content))
            .collect()
    }

    // A later block for the same path replaces the earlier one in place.
    fn insert(&mut self, file: ExtractedFile) {
        match self.files.iter_mut().find(|existing| existing.path == file.path) {
            Some(existing) => *existing = file,
            None => self.files.push(file),
        }
    }

    fn skip(&mut self, line: usize, language: Option<&str>, reason: String) {
        self.skipped.push(SkippedBlock {
            line,
            language: language.map(str::to_string),
            reason,
        });
    }
}

/// Turns markdown-ish model output into `path -> content` pairs.
///
/// Each fenced block is named by the first tier that yields a candidate:
/// the nearest preceding label line, a path in the fence info string, a
/// `file:` comment on the block's first line, then a default filename for
/// file-kind language tags. Candidates go through [`PathSanitizer`]; blocks
/// that end up without a safe path are reported in [`Extraction::skipped`].
#[derive(Debug, Clone)]
pub struct CodeBlockExtractor {
    sanitizer: PathSanitizer,
    project_root_name: String,
}

impl CodeBlockExtractor {
    pub fn new(sanitizer: PathSanitizer, project_root_name: impl Into<String>) -> Self {
        Self {
            sanitizer,
            project_root_name: project_root_name.into(),
        }
    }

    pub fn extract(&self, text: &str) -> IndexMap<String, String> {
        self.extract_detailed(text).into_map()
    }

    pub fn extract_detailed(&self, text: &str) -> Extraction {
        let lines: Vec<&str> = text.lines().collect();
        let mut out = Extraction::default();
        // Label search never looks above the end of the previous block.
        let mut floor = 0;
        let mut i = 0;
        while i < lines.len() {
            let Some(open) = FenceOpen::parse(lines[i]) else {
                i += 1;
                continue;
            };
            let Some(close) = find_fence_close(&lines, i + 1, open.ticks) else {
                out.skip(
                    i + 1,
                    open.language(),
                    "unterminated code block".to_string(),
                );
                break;
            };
            let body = dedent_body(&lines[i + 1..close], open.indent);
            let label = nearest_label(&lines[floor..i]);
            self.resolve_block(i + 1, &open, label, body, &mut out);
            floor = close + 1;
            i = close + 1;
        }
        out
    }

    fn resolve_block(
        &self,
        line: usize,
        open: &FenceOpen<'_>,
        label: Option<String>,
        body: String,
        out: &mut Extraction,
    ) {
        let language = open.language();
        if body.is_empty() {
            out.skip(line, language, "empty code block".to_string());
            return;
        }
        let candidate = label
            .map(|path| (path, SourceHint::HeaderLabel))
            .or_else(|| open.info_path().map(|path| (path, SourceHint::FenceInfo)))
            .or_else(|| comment_label(&body).map(|path| (path, SourceHint::CommentLabel)))
            .or_else(|| {
                language
                    .and_then(inferred_filename)
                    .map(|path| (path, SourceHint::Inferred))
            });
        let Some((raw, source_hint)) = candidate else {
            out.skip(
                line,
                language,
                format!("no filename label for {} block", language.unwrap_or("untagged")),
            );
            return;
        };
        match self.sanitizer.sanitize(&raw, &self.project_root_name) {
            Ok(path) => out.insert(ExtractedFile {
                path,
                content: body,
                source_hint,
            }),
            Err(err) => out.skip(line, language, format!("unsafe path '{raw}': {err}")),
        }
    }
}

struct FenceOpen<'a> {
    indent: usize,
    ticks: usize,
    info: &'a str,
}

impl<'a> FenceOpen<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let trimmed = line.trim_start();
        let ticks = trimmed.bytes().take_while(|b| *b == b'`').count();
        if ticks < 3 {
            return None;
        }
        let info = trimmed[ticks..].trim();
        if info.contains('`') {
            return None;
        }
        Some(Self {
            indent: line.len() - trimmed.len(),
            ticks,
            info,
        })
    }

    fn split_info(&self) -> (Option<&'a str>, Option<&'a str>) {
        if self.info.is_empty() {
            return (None, None);
        }
        match self
            .info
            .split_once(|c: char| c == ':' || c.is_whitespace())
        {
            Some((language, rest)) => {
                let rest = rest.trim();
                (
                    (!language.is_empty()).then_some(language),
                    (!rest.is_empty()).then_some(rest),
                )
            }
            None => (Some(self.info), None),
        }
    }

    fn language(&self) -> Option<&'a str> {
        self.split_info().0
    }

    /// `lang:path`, `lang path` or `lang title="path"`.
    fn info_path(&self) -> Option<String> {
        let rest = self.split_info().1?;
        let rest = rest.strip_prefix("title=").unwrap_or(rest);
        let candidate = clean_candidate(rest.split_whitespace().next()?);
        looks_like_filename(candidate).then(|| candidate.to_string())
    }
}

fn find_fence_close(lines: &[&str], from: usize, ticks: usize) -> Option<usize> {
    (from..lines.len()).find(|&idx| {
        let trimmed = lines[idx].trim();
        trimmed.len() >= ticks && trimmed.bytes().all(|b| b == b'`')
    })
}

fn dedent_body(lines: &[&str], indent: usize) -> String {
    let mut body = lines
        .iter()
        .map(|line| {
            let strip = line
                .bytes()
                .take(indent)
                .take_while(|b| *b == b' ' || *b == b'\t')
                .count();
            &line[strip..]
        })
        .collect::<Vec<_>>()
        .join("\n");
    if body.trim().is_empty() {
        return String::new();
    }
    body.push('\n');
    body
}

fn nearest_label(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| label_from_line(line))
}

fn label_from_line(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.starts_with('#') {
        let hashes = trimmed.bytes().take_while(|b| *b == b'#').count();
        let rest = &trimmed[hashes..];
        if hashes > 6 || !(rest.is_empty() || rest.starts_with(' ')) {
            return None;
        }
        let rest = rest.trim();
        return filename_candidate(strip_label_prefix(rest).unwrap_or(rest));
    }
    if let Some(rest) = strip_label_prefix(trimmed) {
        return filename_candidate(rest);
    }
    if trimmed.ends_with(':') {
        return backticked_segments(trimmed)
            .find(|segment| looks_like_filename(segment))
            .map(str::to_string);
    }
    None
}

/// Strips `File:`-style prefixes, tolerating emphasis around them.
fn strip_label_prefix(text: &str) -> Option<&str> {
    let text = text.trim_start_matches(['*', '_']);
    LABEL_PREFIXES.iter().find_map(|prefix| {
        let head = text.get(..prefix.len())?;
        head.eq_ignore_ascii_case(prefix)
            .then(|| text[prefix.len()..].trim_start_matches(['*', '_']).trim())
    })
}

fn filename_candidate(text: &str) -> Option<String> {
    if let Some(segment) = backticked_segments(text).find(|segment| looks_like_filename(segment)) {
        return Some(segment.to_string());
    }
    let whole = clean_candidate(text);
    if looks_like_filename(whole) {
        return Some(whole.to_string());
    }
    // `### main.py (entry point)`
    let first = clean_candidate(text.split_whitespace().next()?);
    looks_like_filename(first).then(|| first.to_string())
}

fn backticked_segments(text: &str) -> impl Iterator<Item = &str> {
    text.split('`')
        .skip(1)
        .step_by(2)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
}

fn clean_candidate(text: &str) -> &str {
    text.trim()
        .trim_matches(|c| matches!(c, '`' | '*' | '"' | '\'' | ':' | ',' | '(' | ')'))
}

fn comment_label(body: &str) -> Option<String> {
    let first = body.lines().find(|line| !line.trim().is_empty())?.trim();
    let rest = COMMENT_MARKERS
        .iter()
        .find_map(|marker| first.strip_prefix(marker))?;
    let rest = rest
        .trim()
        .trim_end_matches("-->")
        .trim_end_matches("*/")
        .trim();
    let candidate = clean_candidate(strip_label_prefix(rest)?.split_whitespace().next()?);
    looks_like_filename(candidate).then(|| candidate.to_string())
}

fn inferred_filename(language: &str) -> Option<String> {
    let known = match language.to_ascii_lowercase().as_str() {
        "dockerfile" | "docker" => Some("Dockerfile"),
        "makefile" | "make" => Some("Makefile"),
        "gitignore" => Some(".gitignore"),
        "dockerignore" => Some(".dockerignore"),
        "procfile" => Some("Procfile"),
        _ => None,
    };
    known
        .map(str::to_string)
        .or_else(|| looks_like_filename(language).then(|| language.to_string()))
}

fn looks_like_filename(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() || text.chars().any(char::is_whitespace) || text.contains("://") {
        return false;
    }
    let name = text.rsplit('/').next().unwrap_or(text);
    if EXTENSIONLESS_NAMES
        .iter()
        .any(|known| name.eq_ignore_ascii_case(known))
    {
        return true;
    }
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return false;
    };
    let ext_ok = !ext.is_empty()
        && ext.len() <= 10
        && ext.chars().all(|c| c.is_ascii_alphanumeric())
        && ext.chars().any(|c| c.is_ascii_alphabetic());
    let stem_ok = stem.is_empty() || stem.chars().any(|c| c.is_alphanumeric() || c == '_');
    ext_ok && stem_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> CodeBlockExtractor {
        CodeBlockExtractor::new(PathSanitizer::default(), "myproj")
    }

    #[test]
    fn backticked_heading_names_the_block() {
        let text = "### `Game.js`\n```javascript\nclass Game {}\n```\n";
        let files = extractor().extract(text);
        assert_eq!(files.len(), 1);
        assert_eq!(files.get("Game.js").map(String::as_str), Some("class Game {}\n"));
    }

    #[test]
    fn later_duplicate_wins_and_keeps_first_position() {
        let text = "\
### calculator.js
```js
const v = 1;
```

### index.html
```html
<p>hi</p>
```

### calculator.js
```js
const v = 2;
```
";
        let files = extractor().extract(text);
        let keys: Vec<&str> = files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["calculator.js", "index.html"]);
        assert_eq!(files["calculator.js"], "const v = 2;\n");
    }

    #[test]
    fn indented_response_is_dedented() {
        let text = "
    # Let's create some files

    ## File: example.js

    ```javascript
    function exampleFunction() {
        return 1;
    }
    ```

    ### Dockerfile
    ```dockerfile
    FROM node:20
    ```
    ";
        let extraction = extractor().extract_detailed(text);
        assert_eq!(extraction.files.len(), 2);
        assert_eq!(extraction.files[0].path, "example.js");
        assert_eq!(
            extraction.files[0].content,
            "function exampleFunction() {\n    return 1;\n}\n"
        );
        assert_eq!(extraction.files[0].source_hint, SourceHint::HeaderLabel);
        assert_eq!(extraction.files[1].path, "Dockerfile");
        assert!(extraction.skipped.is_empty());
    }

    #[test]
    fn fallback_tiers_apply_in_order() {
        let text = "\
Some prose.

```rust:src/lib.rs
pub fn a() {}
```

```python
# file: tools/run.py
print('x')
```

```dockerfile
FROM alpine
```

```javascript
console.log('anonymous');
```
";
        let extraction = extractor().extract_detailed(text);
        let named: Vec<(&str, SourceHint)> = extraction
            .files
            .iter()
            .map(|file| (file.path.as_str(), file.source_hint))
            .collect();
        assert_eq!(
            named,
            vec![
                ("src/lib.rs", SourceHint::FenceInfo),
                ("tools/run.py", SourceHint::CommentLabel),
                ("Dockerfile", SourceHint::Inferred),
            ]
        );
        assert_eq!(extraction.skipped.len(), 1);
        assert_eq!(extraction.skipped[0].line, 16);
        assert_eq!(extraction.skipped[0].language.as_deref(), Some("javascript"));
    }

    #[test]
    fn emphasized_and_prose_labels_are_recognized() {
        let text = "\
**File:** `src/app.ts`
```ts
export const app = 1;
```

Now update `package.json`:
```json
{}
```
";
        let files = extractor().extract(text);
        let keys: Vec<&str> = files.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["src/app.ts", "package.json"]);
    }

    #[test]
    fn unsafe_labels_are_dropped_and_reported() {
        let text = "\
### ../escape.sh
```sh
rm -rf /
```

### myproj/index.js
```js
ok();
```

### src/myproj/utils.js
```js
util();
```
";
        let extraction = extractor().extract_detailed(text);
        let paths: Vec<&str> = extraction.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["index.js", "src/utils.js"]);
        assert_eq!(extraction.skipped.len(), 1);
        assert!(extraction.skipped[0].reason.contains("../escape.sh"));
    }

    #[test]
    fn text_without_fences_yields_nothing() {
        let extraction = extractor().extract_detailed("Just prose.\n### notes.md\nno block here\n");
        assert!(extraction.files.is_empty());
        assert!(extraction.skipped.is_empty());
    }

    #[test]
    fn unterminated_and_empty_blocks_are_skipped() {
        let text = "### a.txt\n```\n\n```\n### b.txt\n```text\nnever closed\n";
        let extraction = extractor().extract_detailed(text);
        assert!(extraction.files.is_empty());
        let reasons: Vec<&str> = extraction
            .skipped
            .iter()
            .map(|s| s.reason.as_str())
            .collect();
        assert_eq!(reasons, vec!["empty code block", "unterminated code block"]);
    }

    #[test]
    fn longer_fence_contains_inner_fences() {
        let text = "### README.md\n````markdown\n# Title\n```sh\ncargo run\n```\n````\n";
        let files = extractor().extract(text);
        assert_eq!(files["README.md"], "# Title\n```sh\ncargo run\n```\n");
    }

    #[test]
    fn label_does_not_leak_across_blocks() {
        let text = "### first.py\n```python\na = 1\n```\n```python\nb = 2\n```\n";
        let extraction = extractor().extract_detailed(text);
        assert_eq!(extraction.files.len(), 1);
        assert_eq!(extraction.files[0].path, "first.py");
        assert_eq!(extraction.skipped.len(), 1);
    }

    #[test]
    fn filename_heuristic() {
        assert!(looks_like_filename("src/main.rs"));
        assert!(looks_like_filename(".gitignore"));
        assert!(looks_like_filename("Makefile"));
        assert!(!looks_like_filename("1."));
        assert!(!looks_like_filename("3.14"));
        assert!(!looks_like_filename("JavaScript Example"));
        assert!(!looks_like_filename("https://example.com/a.js"));
    }
}
