//! 代码搜索工具：在工作区（或某个仓库子目录）内按正则 / 字面量搜索文本文件
//!
//! 只搜索沙箱认可的文本文件，跳过构建产物目录与超过大小上限的文件。

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use walkdir::WalkDir;

use crate::sandbox::{path::is_text_path, SecurityPolicy};
use crate::tools::workspace::is_skipped_dir;
use crate::tools::Tool;

/// search_files 工具
pub struct SearchFilesTool {
    policy: Arc<SecurityPolicy>,
    max_results: usize,
}

impl SearchFilesTool {
    pub fn new(policy: Arc<SecurityPolicy>, max_results: usize) -> Self {
        Self {
            policy,
            max_results: max_results.max(1),
        }
    }
}

enum Matcher {
    Regex(Regex),
    Literal(String),
}

impl Matcher {
    fn is_match(&self, line: &str) -> bool {
        match self {
            Matcher::Regex(re) => re.is_match(line),
            Matcher::Literal(s) => line.contains(s.as_str()),
        }
    }
}

fn search_blocking(
    root: &Path,
    base: &Path,
    matcher: &Matcher,
    include: Option<&glob::Pattern>,
    max_file_size: u64,
    max_results: usize,
) -> (Vec<String>, bool) {
    let mut hits = Vec::new();
    let walker = WalkDir::new(base)
        .max_depth(16)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(e.file_name().to_string_lossy().starts_with('.')
                    || is_skipped_dir(e.path(), e.file_type().is_dir()))
        })
        .filter_map(|e| e.ok());

    for entry in walker {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !is_text_path(path) {
            continue;
        }
        if entry.metadata().map(|m| m.len() > max_file_size).unwrap_or(true) {
            continue;
        }
        if let Some(pattern) = include {
            let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !pattern.matches(file_name) {
                continue;
            }
        }
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => continue,
        };
        let shown = path
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| path.to_string_lossy().to_string());
        for (idx, line) in content.lines().enumerate() {
            if matcher.is_match(line) {
                if hits.len() >= max_results {
                    return (hits, true);
                }
                hits.push(format!("{}:{}: {}", shown, idx + 1, line.trim()));
            }
        }
    }
    (hits, false)
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search text files for a pattern. Args: {\"pattern\": \"regex\", \"path\": \"repo or repo/dir (optional)\", \"include\": \"*.cs (optional)\", \"regex\": true}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regex (or literal when regex=false)" },
                "path": { "type": "string", "description": "Directory relative to the workspace root, default the whole workspace" },
                "include": { "type": "string", "description": "File name glob, e.g. *.cs" },
                "regex": { "type": "boolean", "description": "Treat pattern as a regex (default true)" }
            },
            "required": ["pattern"]
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let pattern = args
            .get("pattern")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or("Missing required parameter: pattern")?;
        let use_regex = args.get("regex").and_then(|v| v.as_bool()).unwrap_or(true);
        let matcher = if use_regex {
            Matcher::Regex(Regex::new(pattern).map_err(|e| format!("Invalid regex pattern: {}", e))?)
        } else {
            Matcher::Literal(pattern.to_string())
        };
        let include = match args.get("include").and_then(|v| v.as_str()) {
            Some(glob) => Some(
                glob::Pattern::new(glob).map_err(|e| format!("Invalid include glob: {}", e))?,
            ),
            None => None,
        };

        let root = self.policy.workspace_root().to_path_buf();
        let base = match args.get("path").and_then(|v| v.as_str()) {
            Some(p) if !p.trim().is_empty() && p.trim() != "." => {
                self.policy.validate_path(p).map_err(|e| e.to_string())?
            }
            _ => root.clone(),
        };
        if !base.is_dir() {
            return Err(format!("Not a directory: {}", base.display()));
        }

        let max_file_size = self.policy.max_file_size();
        let max_results = self.max_results;
        let (hits, truncated) = tokio::task::spawn_blocking(move || {
            search_blocking(&root, &base, &matcher, include.as_ref(), max_file_size, max_results)
        })
        .await
        .map_err(|e| format!("Search task failed: {}", e))?;

        tracing::debug!(pattern = %pattern, hits = hits.len(), truncated, "search_files");
        if hits.is_empty() {
            return Ok(format!("No matches for '{}'", pattern));
        }
        let mut out = hits.join("\n");
        if truncated {
            out.push_str(&format!("\n... (truncated at {} matches)", max_results));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup(max_results: usize) -> (TempDir, SearchFilesTool) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("api/src")).unwrap();
        std::fs::create_dir_all(dir.path().join("api/obj")).unwrap();
        std::fs::write(
            dir.path().join("api/src/UserController.cs"),
            "public class UserController {\n    // GET users\n    public void GetUsers() {}\n}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("api/src/notes.md"), "GetUsers is slow\n").unwrap();
        std::fs::write(dir.path().join("api/obj/Generated.cs"), "GetUsers()").unwrap();
        let policy = Arc::new(SecurityPolicy::with_defaults(dir.path(), vec![]));
        (dir, SearchFilesTool::new(policy, max_results))
    }

    #[tokio::test]
    async fn test_search_with_include_filter() {
        let (_dir, tool) = setup(100);
        let out = tool
            .execute(json!({"pattern": "GetUsers", "include": "*.cs"}))
            .await
            .unwrap();
        assert_eq!(out, "api/src/UserController.cs:3: public void GetUsers() {}");
    }

    #[tokio::test]
    async fn test_search_literal_and_scoped_path() {
        let (_dir, tool) = setup(100);
        let out = tool
            .execute(json!({"pattern": "GetUsers(", "regex": false, "path": "api/src"}))
            .await
            .unwrap();
        assert!(out.contains("UserController.cs:3"));
        assert!(!out.contains("obj/"));
    }

    #[tokio::test]
    async fn test_search_truncates() {
        let (_dir, tool) = setup(1);
        let out = tool.execute(json!({"pattern": "GetUsers"})).await.unwrap();
        assert!(out.contains("truncated at 1 matches"));
    }

    #[tokio::test]
    async fn test_search_rejects_bad_regex_and_escape() {
        let (_dir, tool) = setup(10);
        let err = tool.execute(json!({"pattern": "("})).await.unwrap_err();
        assert!(err.starts_with("Invalid regex pattern"));
        let err = tool
            .execute(json!({"pattern": "x", "path": "../"}))
            .await
            .unwrap_err();
        assert!(err.starts_with("Security:"));
    }

    #[tokio::test]
    async fn test_search_no_matches() {
        let (_dir, tool) = setup(10);
        let out = tool.execute(json!({"pattern": "NothingLikeThis"})).await.unwrap();
        assert_eq!(out, "No matches for 'NothingLikeThis'");
    }
}
