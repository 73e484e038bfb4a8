//! Formatting utilities for operator-facing display
//!
//! Tool descriptions shown next to a permission prompt, plus small helpers
//! for compact path display.

use std::path::Path;

use serde_json::Value;

/// Longest argument preview shown in a tool description
const MAX_PREVIEW: usize = 100;

/// Truncate a string to `max` characters, adding "..." if truncated
pub fn truncate_str(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Describe a tool invocation in one line, for the permission prompt.
///
/// Known tools get a verb phrase built from their main argument. Anything
/// else (or a known tool missing its main argument) falls back to the tool
/// name followed by its compact JSON arguments.
pub fn describe_tool(tool_name: &str, args: &Value) -> String {
    let field = |key: &str| args.get(key).and_then(Value::as_str);

    let described = match tool_name {
        "Bash" => field("command").map(|cmd| {
            let first_line = cmd.lines().next().unwrap_or(cmd);
            format!("Run command: {}", truncate_str(first_line, MAX_PREVIEW))
        }),
        "Write" => field("file_path").map(|p| format!("Write file: {}", p)),
        "Edit" | "MultiEdit" => field("file_path").map(|p| format!("Edit file: {}", p)),
        "Read" => field("file_path").map(|p| format!("Read file: {}", p)),
        "NotebookEdit" => field("notebook_path").map(|p| format!("Edit notebook: {}", p)),
        "Glob" => field("pattern").map(|p| format!("Find files: {}", p)),
        "Grep" => field("pattern").map(|pattern| match field("path") {
            Some(path) => format!("Search for: {} in {}", truncate_str(pattern, 40), path),
            None => format!("Search for: {}", truncate_str(pattern, 40)),
        }),
        "WebFetch" => field("url").map(|u| format!("Fetch URL: {}", u)),
        "WebSearch" => field("query").map(|q| format!("Web search: {}", q)),
        "Task" => field("description").map(|d| format!("Run subagent: {}", d)),
        _ => None,
    };

    described.unwrap_or_else(|| describe_generic(tool_name, args))
}

fn describe_generic(tool_name: &str, args: &Value) -> String {
    let empty = match args {
        Value::Null => true,
        Value::Object(obj) => obj.is_empty(),
        _ => false,
    };
    if empty {
        return format!("Use {}", tool_name);
    }
    let compact = serde_json::to_string(args).unwrap_or_default();
    format!("{}: {}", tool_name, truncate_str(&compact, MAX_PREVIEW))
}

/// Format a working directory for compact display.
///
/// Shows the last two path components prefixed with `.../`; shorter paths
/// are returned as-is.
pub fn format_work_dir(path: &Path) -> String {
    let parts: Vec<_> = path.components().collect();
    if parts.len() <= 2 {
        return path.display().to_string();
    }
    let tail: Vec<String> = parts[parts.len() - 2..]
        .iter()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!(".../{}", tail.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_bash_uses_first_line() {
        let args = json!({"command": "cargo test\necho done"});
        assert_eq!(describe_tool("Bash", &args), "Run command: cargo test");
    }

    #[test]
    fn test_describe_file_tools() {
        let args = json!({"file_path": "/src/main.rs", "content": "fn main() {}"});
        assert_eq!(describe_tool("Write", &args), "Write file: /src/main.rs");
        assert_eq!(describe_tool("Edit", &args), "Edit file: /src/main.rs");
        assert_eq!(describe_tool("Read", &args), "Read file: /src/main.rs");
    }

    #[test]
    fn test_describe_grep_with_and_without_path() {
        assert_eq!(
            describe_tool("Grep", &json!({"pattern": "TODO", "path": "src"})),
            "Search for: TODO in src"
        );
        assert_eq!(describe_tool("Grep", &json!({"pattern": "TODO"})), "Search for: TODO");
    }

    #[test]
    fn test_describe_unknown_tool_falls_back_to_json() {
        let args = json!({"server": "github"});
        assert_eq!(
            describe_tool("mcp__github__list", &args),
            r#"mcp__github__list: {"server":"github"}"#
        );
        assert_eq!(describe_tool("Mystery", &json!({})), "Use Mystery");
    }

    #[test]
    fn test_describe_known_tool_missing_field() {
        assert_eq!(describe_tool("Bash", &json!({})), "Use Bash");
    }

    #[test]
    fn test_truncate_str_is_char_safe() {
        assert_eq!(truncate_str("short", 10), "short");
        assert_eq!(truncate_str("héllo wörld", 8), "héllo...");
    }

    #[test]
    fn test_format_work_dir() {
        assert_eq!(format_work_dir(Path::new("/home/user/projects/app")), ".../projects/app");
        assert_eq!(format_work_dir(Path::new("/tmp")), "/tmp");
        assert_eq!(format_work_dir(Path::new("relative")), "relative");
    }
}
