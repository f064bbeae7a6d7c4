//! Resource document linting - static analysis of document and field files.
//!
//! Checks every `.json` file for:
//! - JSON syntax errors
//! - Broken `$ref` references (file not found, anchor not found)
//! - Invalid `crud_access` annotations
//! - Invalid resource document structure (files with an `operations` key)

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::annotations::Access;
use crate::document::ResourceDocument;
use crate::loader::{is_url, load_json, navigate_fragment};
use crate::types::{json_type_name, ACCESS_ANNOTATION, ANNOTATED_OPERATIONS};

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

/// A single diagnostic message from linting.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: &'static str,
    pub file: PathBuf,
    /// JSON path to the issue (e.g. "/operations/read/schema/properties/id/crud_access")
    pub path: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]: {} - {}",
            self.severity.label(),
            self.code,
            self.path,
            self.message
        )
    }
}

/// Result of linting a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Status of a linted file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Error,
    Warning,
}

impl FileStatus {
    /// Whether a file with this status passes; warnings fail under `strict`.
    pub fn passes(self, strict: bool) -> bool {
        match self {
            FileStatus::Ok => true,
            FileStatus::Warning => !strict,
            FileStatus::Error => false,
        }
    }
}

/// Result of linting a directory or set of files.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub path: PathBuf,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<FileResult>,
}

impl LintResult {
    /// Returns true if no file had errors.
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }

    /// Returns true if every file passed, warnings included under `strict`.
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Collects diagnostics for one file.
struct Sink<'a> {
    file: &'a Path,
    diagnostics: Vec<Diagnostic>,
}

impl Sink<'_> {
    fn push(&mut self, severity: Severity, code: &'static str, path: &str, message: String) {
        self.diagnostics.push(Diagnostic {
            severity,
            code,
            file: self.file.to_path_buf(),
            path: if path.is_empty() { "/" } else { path }.to_string(),
            message,
        });
    }

    fn error(&mut self, code: &'static str, path: &str, message: String) {
        self.push(Severity::Error, code, path, message);
    }

    fn warning(&mut self, code: &'static str, path: &str, message: String) {
        self.push(Severity::Warning, code, path, message);
    }
}

/// Lint a file or directory.
///
/// Directories are searched recursively for `.json` files. With `strict`,
/// files with warnings count as failed.
pub fn lint(path: &Path, strict: bool) -> LintResult {
    let files = collect_json_files(path);
    let results: Vec<FileResult> = files.iter().map(|file| lint_file(file, path)).collect();

    let count = |severity| {
        results
            .iter()
            .flat_map(|r| &r.diagnostics)
            .filter(|d| d.severity == severity)
            .count()
    };
    let errors = count(Severity::Error);
    let warnings = count(Severity::Warning);

    let failed = results.iter().filter(|r| !r.status.passes(strict)).count();

    LintResult {
        path: path.to_path_buf(),
        files_checked: files.len(),
        passed: files.len() - failed,
        failed,
        errors,
        warnings,
        results,
    }
}

/// Lint a single file. Paths in the result are relative to `base_path`.
pub fn lint_file(file: &Path, base_path: &Path) -> FileResult {
    let mut sink = Sink {
        file,
        diagnostics: Vec::new(),
    };

    match load_json(file) {
        Ok(value) => {
            let file_dir = file.parent().unwrap_or(Path::new("."));
            check_refs(&value, file_dir, "", &value, &mut sink);
            check_annotations(&value, "", &mut sink);
            if value.get("operations").is_some() {
                check_document(&value, &mut sink);
            }
        }
        Err(e) => sink.error("E001", "", format!("syntax error: {}", e)),
    }

    let status = if sink.diagnostics.iter().any(|d| d.severity == Severity::Error) {
        FileStatus::Error
    } else if sink.diagnostics.is_empty() {
        FileStatus::Ok
    } else {
        FileStatus::Warning
    };

    FileResult {
        file: file.strip_prefix(base_path).unwrap_or(file).to_path_buf(),
        status,
        diagnostics: sink.diagnostics,
    }
}

fn check_document(value: &Value, sink: &mut Sink<'_>) {
    if value.get("name").and_then(Value::as_str).is_none() {
        sink.warning("W002", "", "resource document missing name".to_string());
    }
    if let Err(e) = ResourceDocument::from_value(value.clone()) {
        sink.error("E006", "/operations", e.to_string());
    }
}

fn check_refs(value: &Value, file_dir: &Path, path: &str, root: &Value, sink: &mut Sink<'_>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                check_single_ref(reference, file_dir, path, root, sink);
            }
            for (key, child) in map {
                check_refs(child, file_dir, &format!("{}/{}", path, key), root, sink);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                check_refs(item, file_dir, &format!("{}/{}", path, i), root, sink);
            }
        }
        _ => {}
    }
}

fn check_single_ref(reference: &str, file_dir: &Path, path: &str, root: &Value, sink: &mut Sink<'_>) {
    // Remote refs can't be checked offline
    if is_url(reference) {
        return;
    }

    if reference.starts_with('#') {
        if reference != "#" && navigate_fragment(root, reference).is_err() {
            sink.error("E003", path, format!("anchor not found: {}", reference));
        }
        return;
    }

    let (file_part, fragment) = match reference.find('#') {
        Some(idx) => (&reference[..idx], Some(&reference[idx..])),
        None => (reference, None),
    };

    let ref_path = file_dir.join(file_part);
    if !ref_path.exists() {
        sink.error("E002", path, format!("file not found: {}", file_part));
        return;
    }

    // An unloadable target is reported when that file is linted
    if let (Some(fragment), Ok(target)) = (fragment.filter(|f| *f != "#"), load_json(&ref_path)) {
        if navigate_fragment(&target, fragment).is_err() {
            sink.error(
                "E003",
                path,
                format!("anchor not found in {}: {}", file_part, fragment),
            );
        }
    }
}

fn check_annotations(value: &Value, path: &str, sink: &mut Sink<'_>) {
    match value {
        Value::Object(map) => {
            if let Some(annotation) = map.get(ACCESS_ANNOTATION) {
                check_annotation_value(annotation, &format!("{}/{}", path, ACCESS_ANNOTATION), sink);
            }
            for (key, child) in map {
                if key != ACCESS_ANNOTATION {
                    check_annotations(child, &format!("{}/{}", path, key), sink);
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                check_annotations(item, &format!("{}/{}", path, i), sink);
            }
        }
        _ => {}
    }
}

fn check_annotation_value(annotation: &Value, path: &str, sink: &mut Sink<'_>) {
    match annotation {
        Value::String(s) => check_access_string(s, path, sink),
        Value::Object(map) => {
            for (op, val) in map {
                let op_path = format!("{}/{}", path, op);

                if !ANNOTATED_OPERATIONS.contains(&op.as_str()) {
                    sink.warning(
                        "W003",
                        &op_path,
                        format!(
                            "unknown operation \"{}\": expected {}",
                            op,
                            ANNOTATED_OPERATIONS.join(", ")
                        ),
                    );
                }

                match val {
                    Value::String(s) => check_access_string(s, &op_path, sink),
                    other => sink.error(
                        "E005",
                        &op_path,
                        format!(
                            "invalid {} value type: expected string, got {}",
                            ACCESS_ANNOTATION,
                            json_type_name(other)
                        ),
                    ),
                }
            }
        }
        other => sink.error(
            "E005",
            path,
            format!(
                "invalid {} type: expected string or object, got {}",
                ACCESS_ANNOTATION,
                json_type_name(other)
            ),
        ),
    }
}

fn check_access_string(s: &str, path: &str, sink: &mut Sink<'_>) {
    if Access::parse(s).is_none() {
        sink.error(
            "E004",
            path,
            format!(
                "invalid {} value \"{}\": expected client, server, admin, or omit",
                ACCESS_ANNOTATION, s
            ),
        );
    }
}

/// `.json` files under `path`, sorted. Hidden directories are skipped.
fn collect_json_files(path: &Path) -> Vec<PathBuf> {
    let is_json = |p: &Path| p.extension().is_some_and(|e| e == "json");
    if path.is_file() {
        return if is_json(path) {
            vec![path.to_path_buf()]
        } else {
            Vec::new()
        };
    }

    let mut files = Vec::new();
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let entry_path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if entry_path.is_dir() {
                if !hidden {
                    pending.push(entry_path);
                }
            } else if is_json(&entry_path) {
                files.push(entry_path);
            }
        }
    }
    files.sort();
    files
}
