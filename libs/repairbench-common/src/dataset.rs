use crate::types::{Prompt, Turn};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Dataset loading semantics for MBPP-style JSONL files
///
/// Every record contributes two tests: the first is shown to the model as a
/// hint inside the user turn, the second is withheld and used as the check.
/// Any malformed record in the selected slice fails the whole load.

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed record on line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

#[derive(Debug, Deserialize)]
struct Record {
    text: String,
    test_list: Vec<String>,
    #[serde(default)]
    task_id: Option<u64>,
}

/// Build the user-facing request for a record
pub fn user_message(text: &str, hint: &str) -> String {
    format!("{} The function should pass the following test: {}.", text, hint)
}

/// Parse a single JSONL line into a prompt
pub fn parse_record(line_no: usize, line: &str, system_prompt: &str) -> Result<Prompt, DatasetError> {
    let record: Record = serde_json::from_str(line).map_err(|e| DatasetError::Malformed {
        line: line_no,
        reason: e.to_string(),
    })?;

    let (hint, check) = match record.test_list.as_slice() {
        [hint, check, ..] => (hint, check),
        _ => {
            return Err(DatasetError::Malformed {
                line: line_no,
                reason: format!("expected at least 2 tests, found {}", record.test_list.len()),
            })
        }
    };

    let prompt = Prompt::new(
        vec![
            Turn::system(system_prompt),
            Turn::user(user_message(&record.text, hint)),
        ],
        check.clone(),
    );

    Ok(match record.task_id {
        Some(id) => prompt.with_id(id),
        None => prompt,
    })
}

/// Parse lines `start..=end` (1-based) of already-loaded JSONL content.
/// Bounds past the end of the content are clamped.
pub fn parse_slice(
    content: &str,
    start: usize,
    end: usize,
    system_prompt: &str,
) -> Result<Vec<Prompt>, DatasetError> {
    let first = start.max(1);

    content
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line))
        .filter(|(line_no, _)| *line_no >= first && *line_no <= end)
        .map(|(line_no, line)| parse_record(line_no, line, system_prompt))
        .collect()
}

/// Load prompts from a JSONL file
pub fn load_prompts(
    path: &Path,
    start: usize,
    end: usize,
    system_prompt: &str,
) -> Result<Vec<Prompt>, DatasetError> {
    let content = fs::read_to_string(path).map_err(|source| DatasetError::Io {
        path: path.display().to_string(),
        source,
    })?;

    parse_slice(&content, start, end, system_prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn record(task_id: u64, name: &str) -> String {
        serde_json::json!({
            "task_id": task_id,
            "text": format!("Write a function {}.", name),
            "code": "",
            "test_list": [
                format!("assert {}(1) == 1", name),
                format!("assert {}(2) == 2", name),
                format!("assert {}(3) == 3", name),
            ],
        })
        .to_string()
    }

    #[test]
    fn test_prompt_shape() {
        let prompt = parse_record(1, &record(7, "ident"), "sys").unwrap();

        assert_eq!(prompt.id, Some(7));
        assert_eq!(prompt.turns.len(), 2);
        assert_eq!(prompt.turns[0].role, Role::System);
        assert_eq!(prompt.turns[0].content, "sys");
        assert_eq!(
            prompt.turns[1].content,
            "Write a function ident. The function should pass the following test: assert ident(1) == 1."
        );
        assert_eq!(prompt.test, "assert ident(2) == 2");
    }

    #[test]
    fn test_slice_is_one_based_inclusive() {
        let content: Vec<String> = (1..=6).map(|i| record(i, &format!("f{}", i))).collect();
        let prompts = parse_slice(&content.join("\n"), 2, 4, "sys").unwrap();

        let ids: Vec<_> = prompts.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![Some(2), Some(3), Some(4)]);
    }

    #[test]
    fn test_slice_clamps_past_end() {
        let content = format!("{}\n{}", record(1, "a"), record(2, "b"));
        let prompts = parse_slice(&content, 2, 500, "sys").unwrap();
        assert_eq!(prompts.len(), 1);
    }

    #[test]
    fn test_malformed_record_is_fatal() {
        let content = format!("{}\n{{not json\n{}", record(1, "a"), record(3, "c"));
        let err = parse_slice(&content, 1, 3, "sys").unwrap_err();
        assert!(matches!(err, DatasetError::Malformed { line: 2, .. }));
    }

    #[test]
    fn test_single_test_record_is_malformed() {
        let line = r#"{"text": "t", "test_list": ["assert True"]}"#;
        let err = parse_record(9, line, "sys").unwrap_err();
        match err {
            DatasetError::Malformed { line, reason } => {
                assert_eq!(line, 9);
                assert!(reason.contains("found 1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_outside_slice_is_ignored() {
        let content = format!("garbage\n{}", record(2, "b"));
        let prompts = parse_slice(&content, 2, 2, "sys").unwrap();
        assert_eq!(prompts.len(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mbpp.jsonl");
        fs::write(&path, format!("{}\n", record(11, "x"))).unwrap();

        let prompts = load_prompts(&path, 1, 10, "sys").unwrap();
        assert_eq!(prompts.len(), 1);

        let missing = load_prompts(&dir.path().join("missing.jsonl"), 1, 10, "sys");
        assert!(matches!(missing, Err(DatasetError::Io { .. })));
    }
}
