//! Failure classification for plansmith.
//!
//! [`PatternClassifier`] turns the stderr of a failed shell step into an
//! [`ErrorInfo`] with a best-guess location and fix. [`guidance_for`] does the
//! same for errors surfaced by the CLI itself.

use anyhow::Result;
use plansmith_core::{ErrorClassifier, ErrorInfo};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Regex-driven classifier covering the toolchains models usually drive:
/// Python, Node.js, Rust, Go, Java, C/C++ and plain shell failures.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    python_frame: Regex,
    python_error: Regex,
    node_esm: Regex,
    node_missing_module: Regex,
    node_error: Regex,
    node_frame: Regex,
    rust_error: Regex,
    rust_location: Regex,
    java_exception: Regex,
    java_frame: Regex,
    javac_error: Regex,
    go_error: Regex,
    c_error: Regex,
    linker_error: Regex,
}

impl PatternClassifier {
    pub fn new() -> Result<Self> {
        Ok(Self {
            python_frame: Regex::new(r#"File "([^"]+)", line (\d+)"#)?,
            python_error: Regex::new(
                r"(?m)^\s*([A-Za-z_][\w.]*(?:Error|Exception|Exit|Interrupt))(?::\s*(.*))?$",
            )?,
            node_esm: Regex::new(
                r"(?m)^.*(Cannot use import statement outside a module|ERR_REQUIRE_ESM|Unexpected token 'export').*$",
            )?,
            node_missing_module: Regex::new(r"Cannot find module '([^']+)'")?,
            node_error: Regex::new(r"(?m)^\s*((?:[A-Z]\w*)?Error): (.+)$")?,
            node_frame: Regex::new(r"\(([^()\s]+?):(\d+):(\d+)\)")?,
            rust_error: Regex::new(r"(?m)^\s*error(?:\[(E\d{4})\])?: (.+)$")?,
            rust_location: Regex::new(r"(?m)^\s*-->\s*([^:\s]+):(\d+):(\d+)")?,
            java_exception: Regex::new(
                r#"Exception in thread "[^"]*" ([\w.$]+)(?::\s*(.*))?"#,
            )?,
            java_frame: Regex::new(r"at [\w.$/<>]+\(([\w$]+\.java):(\d+)\)")?,
            javac_error: Regex::new(r"(?m)^\s*([\w./\\-]+\.java):(\d+): error: (.+)$")?,
            go_error: Regex::new(r"(?m)^\s*((?:\./)?[\w./\\-]+\.go):(\d+):(\d+): (.+)$")?,
            c_error: Regex::new(
                r"(?m)^\s*([\w./\\-]+\.(?:c|cc|cpp|cxx|h|hpp)):(\d+):(?:\d+:)? (?:fatal )?error: (.+)$",
            )?,
            linker_error: Regex::new(r"(?m)^\s*([^\s:]+):\([^)]*\): (undefined reference to .+)$")?,
        })
    }

    fn classify_text(&self, text: &str) -> ErrorInfo {
        let text = text.trim();
        if text.is_empty() {
            return ErrorInfo::from_message("command failed without output");
        }
        self.node_module_system(text)
            .or_else(|| self.python(text))
            .or_else(|| self.rust(text))
            .or_else(|| self.java(text))
            .or_else(|| self.go(text))
            .or_else(|| self.c_family(text))
            .or_else(|| self.node(text))
            .or_else(|| generic_shell(text))
            .unwrap_or_else(|| ErrorInfo::from_message(last_line(text)))
    }

    fn node_module_system(&self, text: &str) -> Option<ErrorInfo> {
        let caps = self.node_esm.captures(text)?;
        Some(ErrorInfo {
            error_type: Some("ES6 Module".to_string()),
            message: caps[0].trim().to_string(),
            file: None,
            line: None,
            suggested_fix: Some(
                "Add \"type\": \"module\" to package.json or rename the file to .mjs".to_string(),
            ),
        })
    }

    fn python(&self, text: &str) -> Option<ErrorInfo> {
        let frame = self.python_frame.captures_iter(text).last()?;
        let error = self.python_error.captures_iter(text).last();
        let (name, detail) = match &error {
            Some(caps) => (
                caps[1].to_string(),
                caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default(),
            ),
            None => ("PythonError".to_string(), ""),
        };
        let message = if detail.is_empty() {
            name.clone()
        } else {
            format!("{name}: {detail}")
        };
        let fix = match name.as_str() {
            "ModuleNotFoundError" | "ImportError" => {
                let module = detail
                    .split('\'')
                    .nth(1)
                    .and_then(|module| module.split('.').next())
                    .unwrap_or("the package");
                format!("Install the missing package: pip install {module}")
            }
            "IndentationError" | "TabError" => {
                "Fix the indentation: use consistent spaces (4 per level)".to_string()
            }
            "SyntaxError" => "Fix the syntax at the reported line".to_string(),
            "NameError" => "Define the name before use or check for typos".to_string(),
            "TypeError" => "Check the types of the values involved in the operation".to_string(),
            _ => "Inspect the traceback at the reported line".to_string(),
        };
        Some(ErrorInfo {
            error_type: Some(name),
            message,
            file: Some(frame[1].to_string()),
            line: frame[2].parse().ok(),
            suggested_fix: Some(fix),
        })
    }

    fn rust(&self, text: &str) -> Option<ErrorInfo> {
        let caps = self.rust_error.captures(text)?;
        let location = self.rust_location.captures(text);
        if caps.get(1).is_none() && location.is_none() {
            return None;
        }
        let fix = match caps.get(1) {
            Some(code) => format!("Run `rustc --explain {}` for details", code.as_str()),
            None => "Fix the compile error at the reported location".to_string(),
        };
        Some(ErrorInfo {
            error_type: Some("Rust Compiler".to_string()),
            message: caps[2].trim().to_string(),
            file: location.as_ref().map(|loc| loc[1].to_string()),
            line: location.as_ref().and_then(|loc| loc[2].parse().ok()),
            suggested_fix: Some(fix),
        })
    }

    fn java(&self, text: &str) -> Option<ErrorInfo> {
        if let Some(caps) = self.java_exception.captures(text) {
            let class = caps[1].to_string();
            let simple = class.rsplit('.').next().unwrap_or(&class).to_string();
            let message = match caps.get(2).map(|m| m.as_str().trim()) {
                Some(detail) if !detail.is_empty() => format!("{class}: {detail}"),
                _ => class.clone(),
            };
            let frame = self.java_frame.captures(text);
            let fix = match simple.as_str() {
                "NullPointerException" => "Check for null references before they are used",
                "ClassNotFoundException" | "NoClassDefFoundError" => {
                    "Check that the classpath includes the missing class"
                }
                "ArrayIndexOutOfBoundsException" | "IndexOutOfBoundsException" => {
                    "Check index bounds before accessing the collection"
                }
                _ => "Inspect the stack trace at the reported line",
            };
            return Some(ErrorInfo {
                error_type: Some(simple),
                message,
                file: frame.as_ref().map(|f| f[1].to_string()),
                line: frame.as_ref().and_then(|f| f[2].parse().ok()),
                suggested_fix: Some(fix.to_string()),
            });
        }
        let caps = self.javac_error.captures(text)?;
        Some(ErrorInfo {
            error_type: Some("Java Compiler".to_string()),
            message: caps[3].trim().to_string(),
            file: Some(caps[1].to_string()),
            line: caps[2].parse().ok(),
            suggested_fix: Some("Fix the compilation error at the reported line".to_string()),
        })
    }

    fn go(&self, text: &str) -> Option<ErrorInfo> {
        let caps = self.go_error.captures(text)?;
        let message = caps[4].trim().to_string();
        let fix = if message.starts_with("undefined") {
            "Declare the identifier or import the package that provides it"
        } else if message.contains("is not in GOROOT") || message.contains("cannot find package") {
            "Fetch the dependency with `go get` or run `go mod tidy`"
        } else {
            "Fix the compile error at the reported line"
        };
        Some(ErrorInfo {
            error_type: Some("Go Compiler".to_string()),
            message,
            file: Some(caps[1].to_string()),
            line: caps[2].parse().ok(),
            suggested_fix: Some(fix.to_string()),
        })
    }

    fn c_family(&self, text: &str) -> Option<ErrorInfo> {
        if let Some(caps) = self.c_error.captures(text) {
            let message = caps[3].trim().to_string();
            let fix = if message.contains("No such file") {
                "Install the missing header or fix the include path"
            } else if message.starts_with("expected") {
                "Fix syntax error: add the missing token"
            } else {
                "Fix the compile error at the reported line"
            };
            return Some(ErrorInfo {
                error_type: Some("C/C++ Compiler".to_string()),
                message,
                file: Some(caps[1].to_string()),
                line: caps[2].parse().ok(),
                suggested_fix: Some(fix.to_string()),
            });
        }
        let caps = self.linker_error.captures(text)?;
        Some(ErrorInfo {
            error_type: Some("Linker".to_string()),
            message: caps[2].trim().to_string(),
            file: Some(caps[1].to_string()),
            line: None,
            suggested_fix: Some(
                "Define the missing symbol or link the library that provides it".to_string(),
            ),
        })
    }

    fn node(&self, text: &str) -> Option<ErrorInfo> {
        let frame = self
            .node_frame
            .captures_iter(text)
            .find(|caps| !caps[1].starts_with("node:"));
        let file = frame.as_ref().map(|f| f[1].to_string());
        let line = frame.as_ref().and_then(|f| f[2].parse().ok());

        if let Some(caps) = self.node_missing_module.captures(text) {
            let module = &caps[1];
            let fix = if module.starts_with('.') || module.starts_with('/') {
                format!("Install the missing module or fix the relative path '{module}'")
            } else {
                format!("Install the missing module: npm install {module}")
            };
            return Some(ErrorInfo {
                error_type: Some("Import/Module".to_string()),
                message: format!("Cannot find module '{module}'"),
                file,
                line,
                suggested_fix: Some(fix),
            });
        }

        let caps = self.node_error.captures(text)?;
        let name = caps[1].to_string();
        let fix = match name.as_str() {
            "SyntaxError" => "Fix syntax error: check for missing brackets, commas or quotes",
            "ReferenceError" => "Define the variable before use or check for typos",
            "TypeError" => "Check that the value has the expected type before using it",
            _ => "Inspect the stack trace at the reported line",
        };
        Some(ErrorInfo {
            error_type: Some(name),
            message: caps[2].trim().to_string(),
            file,
            line,
            suggested_fix: Some(fix.to_string()),
        })
    }
}

impl ErrorClassifier for PatternClassifier {
    fn classify(&self, stderr: &str) -> ErrorInfo {
        self.classify_text(stderr)
    }
}

fn generic_shell(text: &str) -> Option<ErrorInfo> {
    const PATTERNS: &[(&str, &str, &str)] = &[
        (
            "command not found",
            "Command Not Found",
            "Install the missing command or check that it is on PATH",
        ),
        (
            "Permission denied",
            "Permission",
            "Check the file permissions (for example chmod +x) or run with sufficient privileges",
        ),
        (
            "No such file or directory",
            "File Not Found",
            "Check that the referenced path exists",
        ),
    ];
    PATTERNS.iter().find_map(|(needle, error_type, fix)| {
        let line = text.lines().find(|line| line.contains(needle))?;
        Some(ErrorInfo {
            error_type: Some((*error_type).to_string()),
            message: line.trim().to_string(),
            file: None,
            line: None,
            suggested_fix: Some((*fix).to_string()),
        })
    })
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or(text)
        .to_string()
}

// ── CLI guidance ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Configuration,
    Network,
    Permission,
    Input,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Guidance {
    pub category: ErrorCategory,
    pub message: String,
    pub suggestions: Vec<String>,
}

impl Guidance {
    pub fn format(&self) -> String {
        let mut output = format!("error: {}", self.message);
        for suggestion in &self.suggestions {
            output.push_str(&format!("\n  hint: {suggestion}"));
        }
        output
    }
}

/// Buckets a top-level error by its message and attaches recovery hints.
pub fn guidance_for(error: &anyhow::Error) -> Guidance {
    let message = format!("{error:#}");
    let lower = message.to_ascii_lowercase();
    let (category, suggestions) =
        if lower.contains("api key") || lower.contains("api_key") {
            (
                ErrorCategory::Configuration,
                vec![
                    "Set PLANSMITH_API_KEY or llm.api_key in .plansmith/settings.json",
                    "Run `plansmith config` to inspect the merged settings",
                ],
            )
        } else if lower.contains("timed out")
            || lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("network")
        {
            (
                ErrorCategory::Network,
                vec![
                    "Check network access to the configured llm.endpoint",
                    "Raise llm.timeout_seconds for slow endpoints",
                ],
            )
        } else if lower.contains("permission denied") || lower.contains("access is denied") {
            (
                ErrorCategory::Permission,
                vec!["Check that the workspace files are writable by the current user"],
            )
        } else if lower.contains("history.json") || lower.contains("invalid checkpoint") {
            (
                ErrorCategory::Input,
                vec!["Run `plansmith history` to list valid checkpoints"],
            )
        } else {
            (ErrorCategory::Unknown, Vec::new())
        };
    Guidance {
        category,
        message,
        suggestions: suggestions.into_iter().map(ToString::to_string).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn classify(text: &str) -> ErrorInfo {
        PatternClassifier::new().expect("classifier").classify(text)
    }

    #[test]
    fn python_module_not_found_suggests_pip() {
        let info = classify(
            r#"
    Traceback (most recent call last):
      File "/app/script.py", line 1, in <module>
        import nonexistent_module
    ModuleNotFoundError: No module named 'nonexistent_module'
    "#,
        );
        assert_eq!(info.error_type.as_deref(), Some("ModuleNotFoundError"));
        assert!(info.message.contains("No module named"));
        assert_eq!(
            info.suggested_fix.as_deref(),
            Some("Install the missing package: pip install nonexistent_module")
        );
        assert_eq!(info.file.as_deref(), Some("/app/script.py"));
        assert_eq!(info.line, Some(1));
    }

    #[test]
    fn python_indentation_and_type_errors() {
        let info = classify(
            r#"
    File "/app/script.py", line 3
        print("indented incorrectly")
    ^
    IndentationError: unexpected indent
    "#,
        );
        assert_eq!(info.error_type.as_deref(), Some("IndentationError"));
        assert!(info.suggested_fix.unwrap_or_default().to_lowercase().contains("indentation"));
        assert_eq!(info.line, Some(3));

        let info = classify(
            r#"
    Traceback (most recent call last):
      File "/app/script.py", line 5, in <module>
        result = "string" + 42
    TypeError: can only concatenate str (not "int") to str
    "#,
        );
        assert_eq!(info.error_type.as_deref(), Some("TypeError"));
        assert!(info.message.contains("concatenate"));
        assert_eq!(info.line, Some(5));
    }

    #[test]
    fn node_errors_cover_modules_syntax_and_references() {
        let info = classify(
            "import fs from 'fs';\n^^^^^^\n\nSyntaxError: Cannot use import statement outside a module\n    at Object.compileFunction (node:vm:360:18)",
        );
        assert_eq!(info.error_type.as_deref(), Some("ES6 Module"));
        assert!(info.suggested_fix.unwrap_or_default().contains("Add \"type\": \"module\" to package.json"));

        let info = classify(
            "Error: Cannot find module 'express'\n    at Function.Module._resolveFilename (node:internal/modules/cjs/loader:995:15)",
        );
        assert_eq!(info.error_type.as_deref(), Some("Import/Module"));
        assert!(info.message.contains("Cannot find module"));
        assert!(info.suggested_fix.unwrap_or_default().contains("Install the missing module"));

        let info = classify(
            "SyntaxError: Unexpected token '}'\n    at Object.compileFunction (node:vm:360:18)",
        );
        assert_eq!(info.error_type.as_deref(), Some("SyntaxError"));
        assert!(info.suggested_fix.unwrap_or_default().contains("Fix syntax error"));
        assert!(info.file.is_none());

        let info = classify(
            "ReferenceError: undefinedVariable is not defined\n    at Object.<anonymous> (/app/index.js:2:13)\n    at Module._compile (node:internal/modules/cjs/loader:1105:14)",
        );
        assert_eq!(info.error_type.as_deref(), Some("ReferenceError"));
        assert!(info.message.contains("not defined"));
        assert!(info.suggested_fix.unwrap_or_default().contains("Define the variable"));
        assert_eq!(info.file.as_deref(), Some("/app/index.js"));
        assert_eq!(info.line, Some(2));
    }

    #[test]
    fn rust_compiler_errors_carry_location() {
        let info = classify(
            "error[E0308]: mismatched types\n --> src/main.rs:2:18\n  |\n2 |     let x: i32 = \"not a number\";",
        );
        assert_eq!(info.error_type.as_deref(), Some("Rust Compiler"));
        assert_eq!(info.message, "mismatched types");
        assert_eq!(info.file.as_deref(), Some("src/main.rs"));
        assert_eq!(info.line, Some(2));
        assert!(info.suggested_fix.unwrap_or_default().contains("E0308"));
    }

    #[test]
    fn go_java_and_c_compilers() {
        let info = classify("./main.go:6:12: undefined: nonexistentVariable");
        assert_eq!(info.error_type.as_deref(), Some("Go Compiler"));
        assert_eq!(info.file.as_deref(), Some("./main.go"));
        assert_eq!(info.line, Some(6));

        let info = classify(
            "Exception in thread \"main\" java.lang.NullPointerException\n    at com.example.Main.processData(Main.java:25)\n    at com.example.Main.main(Main.java:10)",
        );
        assert_eq!(info.error_type.as_deref(), Some("NullPointerException"));
        assert!(info.message.contains("java.lang.NullPointerException"));
        assert_eq!(info.file.as_deref(), Some("Main.java"));
        assert_eq!(info.line, Some(25));

        let info = classify(
            "Main.java:15: error: incompatible types: String cannot be converted to int\n    int value = \"x\";\n1 error",
        );
        assert_eq!(info.error_type.as_deref(), Some("Java Compiler"));
        assert!(info.message.contains("incompatible types"));
        assert_eq!(info.line, Some(15));

        let info = classify("test.c:5:10: error: expected ';' after expression\n1 error generated.");
        assert_eq!(info.error_type.as_deref(), Some("C/C++ Compiler"));
        assert!(info.message.contains("expected ';'"));
        assert_eq!(info.file.as_deref(), Some("test.c"));
        assert_eq!(info.line, Some(5));

        let info = classify(
            "/tmp/ccXrHuXL.o: In function `main':\nmain.cpp:(.text+0x13): undefined reference to `nonexistentFunction()'\ncollect2: error: ld returned 1 exit status",
        );
        assert_eq!(info.file.as_deref(), Some("main.cpp"));
        assert!(info.suggested_fix.is_some());
    }

    #[test]
    fn generic_shell_failures_and_fallback() {
        let info = classify("bash: nonexistentCommand: command not found");
        assert!(info.message.contains("command not found"));
        assert!(info.suggested_fix.unwrap_or_default().contains("Install the missing command"));

        let info = classify("bash: ./script.sh: Permission denied");
        assert!(info.suggested_fix.unwrap_or_default().contains("chmod"));

        let info = classify("cat: nonexistentFile.txt: No such file or directory");
        assert!(info.message.contains("No such file or directory"));

        let info = classify("something odd happened\n\nexit 3\n");
        assert_eq!(info.message, "exit 3");
        assert!(info.error_type.is_none());
    }

    #[test]
    fn guidance_categorizes_cli_errors() {
        let guidance = guidance_for(&anyhow!("PLANSMITH_API_KEY not set and llm.api_key is empty"));
        assert_eq!(guidance.category, ErrorCategory::Configuration);
        assert!(guidance.format().contains("hint:"));

        let guidance = guidance_for(&anyhow!("something unexpected"));
        assert_eq!(guidance.category, ErrorCategory::Unknown);
        assert!(guidance.suggestions.is_empty());
    }
}
