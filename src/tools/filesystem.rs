//! 沙箱文件系统工具
//!
//! SafeFs 持有 SecurityPolicy 与 WorkspaceLocks：所有路径先经沙箱校验，写操作持有所属仓库的锁；
//! ReadFileTool / WriteFileTool / ListDirectoryTool 基于 SafeFs。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::sandbox::SecurityPolicy;
use crate::tools::{Tool, WorkspaceLocks};

/// 沙箱文件系统：所有读写都经过 SecurityPolicy
#[derive(Debug, Clone)]
pub struct SafeFs {
    policy: Arc<SecurityPolicy>,
    locks: Arc<WorkspaceLocks>,
}

impl SafeFs {
    pub fn new(policy: Arc<SecurityPolicy>, locks: Arc<WorkspaceLocks>) -> Self {
        Self { policy, locks }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn locks(&self) -> &WorkspaceLocks {
        &self.locks
    }

    /// 绝对路径转为工作区相对路径（`repo/relative/path`），用于输出
    pub fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(self.policy.workspace_root())
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| path.to_string_lossy().to_string())
    }

    /// 沙箱解析后的工作区相对路径；校验失败返回 None
    pub fn relative_path(&self, raw: &str) -> Option<String> {
        let resolved = self.policy.validate_path(raw).ok()?;
        Some(self.display_path(&resolved))
    }

    pub async fn read_file(&self, raw: &str) -> Result<String, String> {
        let resolved = self.policy.validate_text_path(raw).map_err(|e| e.to_string())?;
        let meta = tokio::fs::metadata(&resolved)
            .await
            .map_err(|_| format!("File not found: {}", raw.trim()))?;
        if meta.is_dir() {
            return Err(format!("'{}' is a directory, use list_directory", raw.trim()));
        }
        self.policy
            .validate_size(meta.len())
            .map_err(|e| e.to_string())?;
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| format!("Read failed: {}", e))
    }

    /// 写入文件（必要时创建父目录），返回是否为新建
    pub async fn write_file(&self, raw: &str, content: &str) -> Result<(PathBuf, bool), String> {
        let resolved = self.policy.validate_text_path(raw).map_err(|e| e.to_string())?;
        self.policy
            .validate_size(content.len() as u64)
            .map_err(|e| e.to_string())?;

        let lock = self.locks.lock_for(&resolved);
        let _guard = lock.lock().await;

        let created = !tokio::fs::try_exists(&resolved).await.unwrap_or(false);
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Create directory failed: {}", e))?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| format!("Write failed: {}", e))?;
        Ok((resolved, created))
    }

    pub async fn list_dir(&self, raw: &str) -> Result<Vec<String>, String> {
        let trimmed = raw.trim();
        let base = if trimmed.is_empty() || trimmed == "." {
            self.policy.workspace_root().to_path_buf()
        } else {
            self.policy.validate_path(trimmed).map_err(|e| e.to_string())?
        };
        let mut dir = tokio::fs::read_dir(&base)
            .await
            .map_err(|e| format!("List failed: {}", e))?;
        let mut entries = Vec::new();
        while let Some(e) = dir
            .next_entry()
            .await
            .map_err(|e| format!("List failed: {}", e))?
        {
            let name = e.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = e.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{}/", name) } else { name });
        }
        entries.sort();
        Ok(entries)
    }
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing required parameter: {}", key))
}

/// read_file：读取工作区内的文本文件
pub struct ReadFileTool {
    fs: SafeFs,
}

impl ReadFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file. Args: {\"path\": \"repo/relative/path\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root, e.g. api/src/Program.cs" }
            },
            "required": ["path"]
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    fn resolved_path(&self, args: &Value) -> Option<String> {
        self.fs.relative_path(required_str(args, "path").ok()?)
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = required_str(&args, "path")?;
        tracing::debug!(path = %path, "read_file");
        self.fs.read_file(path).await
    }
}

/// write_file：创建或覆盖文本文件
pub struct WriteFileTool {
    fs: SafeFs,
}

impl WriteFileTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a text file with the full new content. Args: {\"path\": \"repo/relative/path\", \"content\": \"...\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root" },
                "content": { "type": "string", "description": "Complete file content" }
            },
            "required": ["path", "content"]
        })
    }

    fn resolved_path(&self, args: &Value) -> Option<String> {
        self.fs.relative_path(required_str(args, "path").ok()?)
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let (resolved, created) = self.fs.write_file(path, content).await?;
        let shown = self.fs.display_path(&resolved);
        tracing::info!(path = %shown, created, bytes = content.len(), "write_file");
        Ok(format!(
            "{} {} ({} bytes)",
            if created { "Created" } else { "Updated" },
            shown,
            content.len()
        ))
    }
}

/// list_directory：列出目录内容（目录以 / 结尾）
pub struct ListDirectoryTool {
    fs: SafeFs,
}

impl ListDirectoryTool {
    pub fn new(fs: SafeFs) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List a directory. Args: {\"path\": \"repo/relative/dir\"} (\".\" for the workspace root)"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory relative to the workspace root" }
            },
            "required": []
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let entries = self.fs.list_dir(path).await?;
        if entries.is_empty() {
            Ok("(empty directory)".to_string())
        } else {
            Ok(entries.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SafeFs) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("api/src")).unwrap();
        std::fs::write(dir.path().join("api/src/Program.cs"), "class Program {}").unwrap();
        std::fs::write(dir.path().join("api/logo.png"), [0u8, 1, 2]).unwrap();
        let policy = Arc::new(SecurityPolicy::with_defaults(dir.path(), vec![]));
        let locks = Arc::new(WorkspaceLocks::new(dir.path()));
        (dir, SafeFs::new(policy, locks))
    }

    #[tokio::test]
    async fn test_read_file() {
        let (_dir, fs) = setup();
        let tool = ReadFileTool::new(fs);
        let out = tool.execute(json!({"path": "api/src/Program.cs"})).await.unwrap();
        assert_eq!(out, "class Program {}");
    }

    #[test]
    fn test_resolved_path_is_workspace_relative() {
        let (dir, fs) = setup();
        let tool = WriteFileTool::new(fs.clone());
        let absolute = dir.path().canonicalize().unwrap().join("api/src/New.cs");
        for raw in ["api/src/New.cs", "./api/src/New.cs", "api/./src/New.cs", absolute.to_str().unwrap()] {
            assert_eq!(
                tool.resolved_path(&json!({"path": raw})).as_deref(),
                Some("api/src/New.cs"),
                "{raw}"
            );
        }
        assert_eq!(tool.resolved_path(&json!({"path": "../outside.cs"})), None);
        assert_eq!(ReadFileTool::new(fs).resolved_path(&json!({})), None);
    }

    #[tokio::test]
    async fn test_read_rejects_traversal_and_binary() {
        let (_dir, fs) = setup();
        let tool = ReadFileTool::new(fs);
        let err = tool
            .execute(json!({"path": "api/../../etc/passwd"}))
            .await
            .unwrap_err();
        assert!(err.starts_with("Security:"));
        let err = tool.execute(json!({"path": "api/logo.png"})).await.unwrap_err();
        assert!(err.contains("not a text file"));
    }

    #[tokio::test]
    async fn test_write_creates_parents_then_updates() {
        let (dir, fs) = setup();
        let tool = WriteFileTool::new(fs);
        let out = tool
            .execute(json!({"path": "api/src/Models/User.cs", "content": "class User {}"}))
            .await
            .unwrap();
        assert!(out.starts_with("Created api/src/Models/User.cs"));
        let out = tool
            .execute(json!({"path": "api/src/Models/User.cs", "content": "class User { }"}))
            .await
            .unwrap();
        assert!(out.starts_with("Updated"));
        let written = std::fs::read_to_string(dir.path().join("api/src/Models/User.cs")).unwrap();
        assert_eq!(written, "class User { }");
    }

    #[tokio::test]
    async fn test_write_missing_content() {
        let (_dir, fs) = setup();
        let tool = WriteFileTool::new(fs);
        let err = tool.execute(json!({"path": "api/a.cs"})).await.unwrap_err();
        assert_eq!(err, "Missing required parameter: content");
    }

    #[tokio::test]
    async fn test_list_directory() {
        let (_dir, fs) = setup();
        let tool = ListDirectoryTool::new(fs);
        let out = tool.execute(json!({})).await.unwrap();
        assert_eq!(out, "api/");
        let out = tool.execute(json!({"path": "api"})).await.unwrap();
        assert_eq!(out, "logo.png\nsrc/");
    }
}
