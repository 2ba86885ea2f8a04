//! Unified-diff parsing into `ValidLines` and per-file diff text.
//!
//! `ValidLines` is derived by walking the hunks of `git diff base...head`,
//! taking the new-side line numbers of every added or context line (never
//! removed-only lines) — comments only ever anchor to lines the diff
//! actually touches.

use std::collections::{HashMap, HashSet};

pub type ValidLines = HashMap<String, HashSet<u32>>;

pub fn parse_unified_diff(diff_text: &str) -> (ValidLines, HashMap<String, String>) {
    let mut valid_lines: ValidLines = HashMap::new();
    let mut per_file: HashMap<String, String> = HashMap::new();

    let mut current_file: Option<String> = None;
    let mut current_new_line: u32 = 0;
    let mut current_file_buf = String::new();

    for line in diff_text.lines() {
        if let Some(path) = line.strip_prefix("+++ b/") {
            if let Some(prev) = current_file.take() {
                per_file.insert(prev, std::mem::take(&mut current_file_buf));
            }
            current_file = Some(path.to_string());
            current_file_buf.push_str(line);
            current_file_buf.push('\n');
            continue;
        }

        if let Some(file) = &current_file {
            current_file_buf.push_str(line);
            current_file_buf.push('\n');

            if let Some(hunk) = line.strip_prefix("@@ ") {
                current_new_line = parse_hunk_new_start(hunk).unwrap_or(current_new_line);
                continue;
            }

            if line.starts_with("+++") || line.starts_with("---") {
                continue;
            } else if let Some(stripped) = line.strip_prefix('+') {
                let _ = stripped;
                valid_lines.entry(file.clone()).or_default().insert(current_new_line);
                current_new_line += 1;
            } else if line.starts_with('-') {
                // removed line: consumes old side only, new line counter unchanged
            } else if line.starts_with(' ') || line.is_empty() {
                valid_lines.entry(file.clone()).or_default().insert(current_new_line);
                current_new_line += 1;
            }
        }
    }
    if let Some(prev) = current_file.take() {
        per_file.insert(prev, current_file_buf);
    }

    (valid_lines, per_file)
}

fn parse_hunk_new_start(hunk_header: &str) -> Option<u32> {
    // hunk_header looks like "-12,7 +15,8 @@ fn foo() {"
    let plus_part = hunk_header.split('+').nth(1)?;
    let new_range = plus_part.split_whitespace().next()?;
    let start = new_range.split(',').next()?;
    start.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "diff --git a/a.py b/a.py\n\
index 111..222 100644\n\
--- a/a.py\n\
+++ b/a.py\n\
@@ -1,3 +1,4 @@\n\
 def f():\n\
-    pass\n\
+    x = 1\n\
+    return x\n\
 \n";

    #[test]
    fn added_and_context_lines_are_valid_removed_lines_are_not() {
        let (valid, per_file) = parse_unified_diff(SAMPLE);
        let lines = &valid["a.py"];
        assert!(lines.contains(&1)); // context: "def f():"
        assert!(lines.contains(&2)); // added: "x = 1"
        assert!(lines.contains(&3)); // added: "return x"
        assert!(lines.contains(&4)); // trailing context
        assert!(per_file.contains_key("a.py"));
    }

    #[test]
    fn empty_diff_yields_no_valid_lines() {
        let (valid, _) = parse_unified_diff("");
        assert!(valid.is_empty());
    }
}
