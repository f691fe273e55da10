//! Task payload loading
//!
//! Workloads come from one of three sources:
//! - JSON array files (`.json`): every element becomes one task payload
//! - JSON lines files (anything else): one payload per non-empty line,
//!   `#` comment lines skipped
//! - Synthetic: numbered payloads generated in memory

use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("File '{path}' is not UTF-8 encoded: {hint}")]
    NotUtf8 { path: PathBuf, hint: String },

    #[error("File '{path}' not found")]
    NotFound { path: PathBuf },

    #[error("IO error reading '{path}': {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Payload parsing error in '{path}': {reason}")]
    ParseError { path: PathBuf, reason: String },
}

#[derive(Debug, Clone)]
pub enum TaskInput {
    JsonArray(PathBuf),
    JsonLines(PathBuf),
    Synthetic(usize),
}

/// Loads task payloads for the `run` command
pub struct TaskLoader;

impl TaskLoader {
    pub fn load(input: &TaskInput) -> Result<Vec<Value>, FileError> {
        match input {
            TaskInput::JsonArray(path) => Self::parse_json_array(path),
            TaskInput::JsonLines(path) => Self::parse_json_lines(path),
            TaskInput::Synthetic(count) => Ok(Self::synthetic(*count)),
        }
    }

    fn load_utf8_file(path: &Path) -> Result<String, FileError> {
        debug!("Loading UTF-8 file: {:?}", path);

        fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FileError::NotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::InvalidData => FileError::NotUtf8 {
                path: path.to_path_buf(),
                hint: "Payload files must be UTF-8 encoded JSON".to_string(),
            },
            _ => FileError::IoError {
                path: path.to_path_buf(),
                source: e,
            },
        })
    }

    pub fn parse_json_array(path: &Path) -> Result<Vec<Value>, FileError> {
        let content = Self::load_utf8_file(path)?;
        let value: Value = serde_json::from_str(&content).map_err(|e| FileError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        match value {
            Value::Array(payloads) => {
                debug!("Parsed {} payloads from {:?}", payloads.len(), path);
                Ok(payloads)
            }
            other => Err(FileError::ParseError {
                path: path.to_path_buf(),
                reason: format!("expected a JSON array, found {}", json_kind(&other)),
            }),
        }
    }

    pub fn parse_json_lines(path: &Path) -> Result<Vec<Value>, FileError> {
        let content = Self::load_utf8_file(path)?;
        let mut payloads = Vec::new();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let payload = serde_json::from_str(line).map_err(|e| FileError::ParseError {
                path: path.to_path_buf(),
                reason: format!("line {}: {}", line_num + 1, e),
            })?;
            payloads.push(payload);
        }

        debug!("Parsed {} payloads from {:?}", payloads.len(), path);
        Ok(payloads)
    }

    pub fn synthetic(count: usize) -> Vec<Value> {
        (0..count).map(|index| json!({ "index": index })).collect()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_json_array() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(&temp_file, r#"[{"job": 1}, {"job": 2}, "plain"]"#).unwrap();

        let payloads = TaskLoader::parse_json_array(temp_file.path()).unwrap();
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[1], json!({"job": 2}));
    }

    #[test]
    fn test_json_array_rejects_object() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(&temp_file, r#"{"job": 1}"#).unwrap();

        let err = TaskLoader::parse_json_array(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("found an object"));
    }

    #[test]
    fn test_parse_json_lines_skips_comments() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(
            &temp_file,
            "# nightly batch\n{\"job\": 1}\n\n{\"job\": 2}\n",
        )
        .unwrap();

        let payloads = TaskLoader::parse_json_lines(temp_file.path()).unwrap();
        assert_eq!(payloads, vec![json!({"job": 1}), json!({"job": 2})]);
    }

    #[test]
    fn test_json_lines_reports_line_number() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(&temp_file, "{\"job\": 1}\n{broken\n").unwrap();

        match TaskLoader::parse_json_lines(temp_file.path()) {
            Err(FileError::ParseError { reason, .. }) => assert!(reason.starts_with("line 2")),
            other => panic!("Expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let result = TaskLoader::load(&TaskInput::JsonLines(PathBuf::from(
            "/nonexistent/payloads.jsonl",
        )));
        assert!(matches!(result, Err(FileError::NotFound { .. })));
    }

    #[test]
    fn test_synthetic_payloads() {
        let payloads = TaskLoader::load(&TaskInput::Synthetic(3)).unwrap();
        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[2], json!({"index": 2}));
    }
}
