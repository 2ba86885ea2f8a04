//! Parser Worker: static-heuristic pass over changed files.
//!
//! No LLM call, no network access — pure regex heuristics over file content,
//! grounded on the line/branch-counting approach in
//! `mr-reviewer::parser::parse_unified_diff_advanced` generalized from diff
//! hunks to whole-file function bodies. Each file is independent, so
//! `parse_files` fans the per-file pass out over a `JoinSet` of
//! `spawn_blocking` tasks gated by a semaphore sized to the available CPU
//! count.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use review_types::outputs::{FileMetadata, Hotspot, HotspotLevel, ParserOutput};
use review_types::request::FileInfo;

const COMPLEXITY_CRITICAL: u32 = 15;
const COMPLEXITY_WARNING: u32 = 10;
const MAX_PARAMS: usize = 5;
const MAX_FUNCTION_LINES: usize = 50;

lazy_static! {
    static ref FN_DEF: Regex = Regex::new(
        r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)"
    )
    .unwrap();
    static ref PY_DEF: Regex =
        Regex::new(r"(?m)^\s*(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)").unwrap();
    static ref BRANCH_KEYWORDS: Regex =
        Regex::new(r"\b(if|else if|elif|for|while|match|case|catch|except|&&|\|\|)\b").unwrap();
    static ref SYMBOL_DEF: Regex = Regex::new(
        r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:fn|struct|enum|trait|impl|class|def)\s+([A-Za-z_][A-Za-z0-9_]*)"
    )
    .unwrap();
}

/// Runs the heuristic pass over every file that still has content (deleted
/// files are skipped — there is nothing left to analyze). Each file's pass
/// runs on its own `spawn_blocking` task; a semaphore caps how many run at
/// once at the host's CPU count, so a large changeset doesn't spawn
/// hundreds of OS threads at once.
pub async fn parse_files(files: &[FileInfo]) -> ParserOutput {
    let permits = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    let semaphore = Arc::new(Semaphore::new(permits));

    let mut set = JoinSet::new();
    for file in files {
        if file.is_deleted {
            continue;
        }
        let Some(content) = file.content.clone() else {
            continue;
        };
        let path = file.path.clone();
        let semaphore = semaphore.clone();
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
            let blocking_path = path.clone();
            match tokio::task::spawn_blocking(move || parse_one(&blocking_path, &content)).await {
                Ok(result) => (path, result),
                Err(e) => (path, Err(format!("parser task panicked: {e}"))),
            }
        });
    }

    let mut out = ParserOutput::default();
    while let Some(joined) = set.join_next().await {
        let (path, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                out.errors.push(format!("parser task panicked: {e}"));
                continue;
            }
        };
        match result {
            Ok((meta, hotspots)) => {
                out.files.push(meta);
                out.hotspots.extend(hotspots);
            }
            Err(e) => out.errors.push(format!("{path}: {e}")),
        }
    }
    out
}

fn parse_one(path: &str, content: &str) -> Result<(FileMetadata, Vec<Hotspot>), String> {
    let symbols: Vec<String> = SYMBOL_DEF
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect();

    let language = guess_language(path);
    let is_python = language.as_deref() == Some("python");
    let def_re = if is_python { &*PY_DEF } else { &*FN_DEF };

    let mut hotspots = Vec::new();
    let lines: Vec<&str> = content.lines().collect();

    for cap in def_re.captures_iter(content) {
        let whole = cap.get(0).unwrap();
        let name = &cap[1];
        let params = &cap[2];
        let start_line = content[..whole.start()].matches('\n').count() as u32 + 1;

        let param_count = count_params(params);
        if param_count > MAX_PARAMS {
            hotspots.push(Hotspot {
                file: path.to_string(),
                line: start_line,
                level: HotspotLevel::Warning,
                reason: format!(
                    "`{name}` takes {param_count} parameters (over the {MAX_PARAMS}-parameter guideline)"
                ),
            });
        }

        let body_lines = function_body_lines(&lines, start_line as usize);
        if body_lines > MAX_FUNCTION_LINES {
            hotspots.push(Hotspot {
                file: path.to_string(),
                line: start_line,
                level: HotspotLevel::Warning,
                reason: format!(
                    "`{name}` spans {body_lines} lines (over the {MAX_FUNCTION_LINES}-line guideline)"
                ),
            });
        }

        let body_text = lines
            .iter()
            .skip(start_line as usize - 1)
            .take(body_lines)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        let complexity = cyclomatic_complexity(&body_text);
        if complexity > COMPLEXITY_CRITICAL {
            hotspots.push(Hotspot {
                file: path.to_string(),
                line: start_line,
                level: HotspotLevel::Critical,
                reason: format!("`{name}` has cyclomatic complexity {complexity} (> {COMPLEXITY_CRITICAL})"),
            });
        } else if complexity > COMPLEXITY_WARNING {
            hotspots.push(Hotspot {
                file: path.to_string(),
                line: start_line,
                level: HotspotLevel::Warning,
                reason: format!("`{name}` has cyclomatic complexity {complexity} (> {COMPLEXITY_WARNING})"),
            });
        }
    }

    Ok((
        FileMetadata {
            path: path.to_string(),
            language,
            symbols,
            call_edges: Vec::new(),
        },
        hotspots,
    ))
}

fn count_params(params: &str) -> usize {
    let trimmed = params.trim();
    if trimmed.is_empty() || trimmed == "&self" || trimmed == "self" {
        return 0;
    }
    trimmed
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty() && *p != "&self" && *p != "self" && *p != "&mut self")
        .count()
}

/// Approximates a function's body by brace-matching from its opening `{`
/// (Rust/JS/Go-style) or by indentation for Python, since we deliberately
/// avoid pulling in a full parser for a heuristic-only pass.
fn function_body_lines(lines: &[&str], start_line: usize) -> usize {
    let start_idx = start_line - 1;
    let start_text = lines.get(start_idx).copied().unwrap_or("");

    if start_text.contains('{') || lines.get(start_idx + 1).is_some_and(|l| l.trim() == "{") {
        let mut depth = 0i32;
        let mut seen_open = false;
        for (i, line) in lines.iter().enumerate().skip(start_idx) {
            for ch in line.chars() {
                match ch {
                    '{' => {
                        depth += 1;
                        seen_open = true;
                    }
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            if seen_open && depth <= 0 {
                return i - start_idx + 1;
            }
        }
        return lines.len() - start_idx;
    }

    // Python-style: count lines until indentation returns to the def's level.
    let base_indent = indent_of(start_text);
    let mut count = 1;
    for line in lines.iter().skip(start_idx + 1) {
        if line.trim().is_empty() {
            count += 1;
            continue;
        }
        if indent_of(line) <= base_indent {
            break;
        }
        count += 1;
    }
    count
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').count()
}

fn cyclomatic_complexity(body: &str) -> u32 {
    1 + BRANCH_KEYWORDS.find_iter(body).count() as u32
}

fn guess_language(path: &str) -> Option<String> {
    let ext = path.rsplit('.').next()?;
    let lang = match ext {
        "rs" => "rust",
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "rb" => "ruby",
        _ => return None,
    };
    Some(lang.to_string())
}
