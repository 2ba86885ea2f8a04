//! TestGen Worker: LLM-backed unit test generation.
//!
//! Only invoked when `UserIntent::should_generate_tests()` is true — never
//! auto-triggered on a plain review. Grounded on `unit_test_agent.py`'s
//! `UnitTestAgent`: detect the project's test framework from file metadata,
//! build one prompt per target file listing its testable symbols, and parse
//! the same JSON-array-of-tests response shape.

use serde::Deserialize;
use tracing::{instrument, warn};

use llm_client::LlmClient;
use review_types::outputs::{FileMetadata, GeneratedTest, ParserOutput, TestOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framework {
    Pytest,
    Jest,
    Unknown,
}

impl Framework {
    fn info(self) -> &'static str {
        match self {
            Framework::Pytest => {
                "Framework: pytest\n- Use `def test_*()` naming\n- Use `pytest.raises()` for exceptions\n- Use `assert` statements"
            }
            Framework::Jest => {
                "Framework: Jest\n- Use `describe()` and `test()`/`it()`\n- Use `expect().toBe()`\n- Use `jest.mock()` for mocking"
            }
            Framework::Unknown => "Unknown framework — use standard testing patterns for the target language.",
        }
    }

    fn test_file_path(self, target_file: &str) -> String {
        let path = std::path::Path::new(target_file);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("target");
        match self {
            Framework::Pytest => format!("tests/test_{stem}.py"),
            Framework::Jest => {
                let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("js");
                if ext == "ts" || ext == "tsx" {
                    format!("__tests__/{stem}.test.ts")
                } else {
                    format!("__tests__/{stem}.test.js")
                }
            }
            Framework::Unknown => format!("tests/test_{stem}.txt"),
        }
    }
}

fn detect_framework(files: &[FileMetadata]) -> Framework {
    if files.iter().any(|f| f.language.as_deref() == Some("python")) {
        return Framework::Pytest;
    }
    if files
        .iter()
        .any(|f| matches!(f.language.as_deref(), Some("javascript") | Some("typescript")))
    {
        return Framework::Jest;
    }
    Framework::Unknown
}

#[derive(Debug, Deserialize)]
struct RawTest {
    #[serde(default = "default_target")]
    target: String,
    #[serde(default)]
    test_code: String,
    #[serde(default)]
    test_name: Option<String>,
}

fn default_target() -> String {
    "unknown".to_string()
}

/// Generates tests for every file in `target_files`, skipping files the
/// parser has no metadata for (nothing to build a prompt from) and files
/// with no testable symbols.
#[instrument(skip(llm, parser_output, target_files), fields(targets = target_files.len()))]
pub async fn generate_tests(llm: &LlmClient, parser_output: &ParserOutput, target_files: &[String]) -> TestOutput {
    let mut output = TestOutput::default();
    let framework = detect_framework(&parser_output.files);

    for target_file in target_files {
        let Some(meta) = parser_output.files.iter().find(|f| &f.path == target_file) else {
            continue;
        };
        if meta.symbols.is_empty() {
            continue;
        }

        let prompt = build_prompt(target_file, meta, framework);
        let tests = match llm.invoke(&prompt, Some(SYSTEM_PROMPT)).await {
            Ok(response) => parse_response(&response, target_file, framework),
            Err(e) => {
                warn!(error = %e, file = %target_file, "test generation LLM call failed");
                Vec::new()
            }
        };

        if !tests.is_empty() {
            let test_file = framework.test_file_path(target_file);
            output.tests_by_path.entry(test_file).or_default().extend(tests);
        }
    }

    output
}

const SYSTEM_PROMPT: &str = "You generate minimal, focused unit tests. You do not refactor \
production code. Respond with a JSON array; each item has target, test_name, and test_code.";

fn build_prompt(target_file: &str, meta: &FileMetadata, framework: Framework) -> String {
    let symbols_list = meta
        .symbols
        .iter()
        .take(10)
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{}\n\n**File:** {target_file}\n\n**Symbols to test:**\n{symbols_list}\n\nGenerate unit tests \
         for the symbols above. Respond with JSON only.",
        framework.info()
    )
}

fn parse_response(response: &str, target_file: &str, framework: Framework) -> Vec<GeneratedTest> {
    let json_str = extract_json_block(response);
    let raw: Vec<RawTest> = match serde_json::from_str(json_str) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, file = %target_file, "failed to parse test generation response");
            return Vec::new();
        }
    };

    let test_file_path = framework.test_file_path(target_file);
    raw.into_iter()
        .filter(|t| !t.test_code.trim().is_empty())
        .map(|t| GeneratedTest {
            test_file_path: test_file_path.clone(),
            content: t.test_code,
            target_file: target_file.to_string(),
        })
        .collect()
}

fn extract_json_block(s: &str) -> &str {
    if let Some(start) = s.find("```json") {
        let after = &s[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = s.find("```") {
        let after = &s[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    s.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_pytest_for_python_files() {
        let files = vec![FileMetadata {
            path: "a.py".into(),
            language: Some("python".into()),
            symbols: vec![],
            call_edges: vec![],
        }];
        assert_eq!(detect_framework(&files), Framework::Pytest);
    }

    #[test]
    fn detects_jest_for_typescript_files() {
        let files = vec![FileMetadata {
            path: "a.ts".into(),
            language: Some("typescript".into()),
            symbols: vec![],
            call_edges: vec![],
        }];
        assert_eq!(detect_framework(&files), Framework::Jest);
    }

    #[test]
    fn pytest_file_path_convention() {
        assert_eq!(Framework::Pytest.test_file_path("src/calc.py"), "tests/test_calc.py");
    }

    #[test]
    fn jest_file_path_convention_for_typescript() {
        assert_eq!(Framework::Jest.test_file_path("src/calc.ts"), "__tests__/calc.test.ts");
    }

    #[test]
    fn parse_response_skips_empty_test_code() {
        let text = r#"[{"target": "add", "test_name": "test_add", "test_code": ""}]"#;
        assert!(parse_response(text, "a.py", Framework::Pytest).is_empty());
    }

    #[test]
    fn parse_response_extracts_generated_test() {
        let text = r#"```json
        [{"target": "add", "test_name": "test_add", "test_code": "def test_add():\n    assert add(1,1)==2"}]
        ```"#;
        let tests = parse_response(text, "calc.py", Framework::Pytest);
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].test_file_path, "tests/test_calc.py");
        assert_eq!(tests[0].target_file, "calc.py");
    }
}
