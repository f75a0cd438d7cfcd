//! Deterministic tool input/output summarization (§4.3). Bounds what ever
//! reaches the Message Store so a single `Bash` invocation with a 50 KB
//! heredoc or a `Read` on a binary file can't blow out a conversation's
//! on-disk size.

use serde_json::Value;

const TRUNCATE_AT: usize = 300;
const OUTPUT_TRUNCATE_AT: usize = 500;

/// Summarizes a tool's raw input object by its tool name, per the
/// per-tool rules in §4.3.
pub fn summarize_tool_input(tool_name: &str, input: &Value) -> Value {
    match tool_name {
        "Read" | "NotebookEdit" => keep_keys(input, &["file_path", "notebook_path"]),
        "Edit" => {
            let mut out = keep_keys(input, &["file_path"]);
            copy_truncated(input, &mut out, "old_string");
            copy_truncated(input, &mut out, "new_string");
            out
        }
        "Write" => {
            let mut out = keep_keys(input, &["file_path"]);
            copy_truncated(input, &mut out, "content");
            out
        }
        "Bash" => {
            let mut out = keep_keys(input, &["description"]);
            if let Some(Value::String(command)) = input.get("command") {
                let line = truncate_str(first_line(command), TRUNCATE_AT);
                insert(&mut out, "command", Value::String(line));
            }
            out
        }
        "Glob" | "Grep" => keep_keys(input, &["pattern", "path"]),
        _ => truncate_strings_recursive(input.clone()),
    }
}

/// Summarizes a tool's raw output string: passes through at or under 500
/// chars, otherwise truncates and appends the original length.
pub fn summarize_tool_output(output: &str) -> String {
    let total = output.chars().count();
    if total <= OUTPUT_TRUNCATE_AT {
        return output.to_string();
    }
    let head: String = output.chars().take(OUTPUT_TRUNCATE_AT).collect();
    format!("{head}\n... ({total} chars total)")
}

fn keep_keys(input: &Value, keys: &[&str]) -> Value {
    let mut out = Value::Object(serde_json::Map::new());
    if let Some(obj) = input.as_object() {
        for key in keys {
            if let Some(value) = obj.get(*key) {
                insert(&mut out, key, value.clone());
            }
        }
    }
    out
}

fn copy_truncated(input: &Value, out: &mut Value, key: &str) {
    if let Some(Value::String(s)) = input.get(key) {
        insert(out, key, Value::String(truncate_str(s, TRUNCATE_AT)));
    }
}

fn insert(value: &mut Value, key: &str, entry: Value) {
    if let Value::Object(map) = value {
        map.insert(key.to_string(), entry);
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

fn truncate_str(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let head: String = s.chars().take(max).collect();
    format!("{head}...")
}

fn truncate_strings_recursive(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_str(&s, TRUNCATE_AT)),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(truncate_strings_recursive).collect())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, truncate_strings_recursive(v)))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn read_keeps_only_file_path() {
        let input = json!({"file_path": "/a.rs", "limit": 100});
        let summarized = summarize_tool_input("Read", &input);
        assert_eq!(summarized, json!({"file_path": "/a.rs"}));
    }

    #[test]
    fn edit_truncates_old_and_new_string() {
        let long = "x".repeat(400);
        let input = json!({"file_path": "/a.rs", "old_string": long, "new_string": "short"});
        let summarized = summarize_tool_input("Edit", &input);
        let old = summarized["old_string"].as_str().unwrap();
        assert_eq!(old.chars().count(), 303); // 300 + "..."
        assert!(old.ends_with("..."));
        assert_eq!(summarized["new_string"], "short");
    }

    #[test]
    fn write_truncates_content() {
        let long = "y".repeat(1000);
        let input = json!({"file_path": "/a.rs", "content": long});
        let summarized = summarize_tool_input("Write", &input);
        assert_eq!(summarized["content"].as_str().unwrap().chars().count(), 303);
    }

    #[test]
    fn bash_keeps_description_and_first_line_of_command() {
        let input = json!({
            "description": "list files",
            "command": "ls -la\necho done",
        });
        let summarized = summarize_tool_input("Bash", &input);
        assert_eq!(summarized["description"], "list files");
        assert_eq!(summarized["command"], "ls -la");
    }

    #[test]
    fn glob_keeps_pattern_and_path_only() {
        let input = json!({"pattern": "*.rs", "path": "/src", "extra": "drop me"});
        let summarized = summarize_tool_input("Glob", &input);
        assert_eq!(summarized, json!({"pattern": "*.rs", "path": "/src"}));
    }

    #[test]
    fn unknown_tool_recursively_truncates_long_strings() {
        let long = "z".repeat(350);
        let input = json!({"nested": {"value": long, "keep": "short"}});
        let summarized = summarize_tool_input("CustomTool", &input);
        assert!(summarized["nested"]["value"]
            .as_str()
            .unwrap()
            .ends_with("..."));
        assert_eq!(summarized["nested"]["keep"], "short");
    }

    #[test]
    fn output_under_limit_passes_through() {
        assert_eq!(summarize_tool_output("short output"), "short output");
    }

    #[test]
    fn output_over_limit_is_truncated_with_suffix() {
        let long = "a".repeat(600);
        let summarized = summarize_tool_output(&long);
        assert!(summarized.starts_with(&"a".repeat(500)));
        assert!(summarized.ends_with("... (600 chars total)"));
    }
}
