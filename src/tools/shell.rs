//! run_command：执行白名单内的构建 / 测试命令
//!
//! 命令先经 SecurityPolicy::validate_command（危险模式 + 白名单前缀），再按空白切分直接执行，
//! 不经过 sh -c；工作目录必须位于某个仓库内，执行期间持有该仓库的锁，带超时与 tracing 审计。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::sandbox::SecurityPolicy;
use crate::tools::{Tool, WorkspaceLocks};

/// 单次输出（stdout + stderr）保留的最大字符数
const MAX_OUTPUT_CHARS: usize = 20_000;

const MISSING_REPOSITORY: &str =
    "Missing repository: set \"cwd\" to a repository directory such as \"api\"";

pub struct RunCommandTool {
    policy: Arc<SecurityPolicy>,
    locks: Arc<WorkspaceLocks>,
    timeout_secs: u64,
}

impl RunCommandTool {
    pub fn new(policy: Arc<SecurityPolicy>, locks: Arc<WorkspaceLocks>, timeout_secs: u64) -> Self {
        Self {
            policy,
            locks,
            timeout_secs: timeout_secs.max(1),
        }
    }
}

pub(crate) fn truncate_output(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_chars).collect();
    format!("{}\n... (output truncated)", kept)
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run an allowlisted build/test command inside a repository (no pipes, redirects or chaining). Args: {\"command\": \"dotnet test\", \"cwd\": \"repo or repo/subdir\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Command line, must start with an allowlisted prefix" },
                "cwd": { "type": "string", "description": "Repository directory (or a directory inside it) relative to the workspace root" }
            },
            "required": ["command", "cwd"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        self.policy
            .validate_command(command)
            .map_err(|e| e.to_string())?;

        let dir = args
            .get("cwd")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or("");
        if dir.is_empty() {
            return Err(MISSING_REPOSITORY.to_string());
        }
        let cwd = self.policy.validate_path(dir).map_err(|e| e.to_string())?;
        if !cwd.is_dir() {
            return Err(format!("Working directory not found: {}", cwd.display()));
        }
        // 锁按仓库划分，命令必须落在某个仓库内
        let repo = self
            .locks
            .repository_of(&cwd)
            .ok_or_else(|| MISSING_REPOSITORY.to_string())?;

        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or("Empty command")?;
        let mut cmd = Command::new(program);
        cmd.args(parts).current_dir(&cwd).kill_on_drop(true);

        let lock = self.locks.lock_for(&cwd);
        let _guard = lock.lock().await;
        tracing::info!(command = %command, repo = %repo, cwd = %cwd.display(), "run_command");

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| format!("Command timed out after {}s", self.timeout_secs))?
            .map_err(|e| format!("Execution failed: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut text = stdout.trim().to_string();
        if !stderr.trim().is_empty() {
            text.push_str(&format!("\nstderr: {}", stderr.trim()));
        }
        let text = truncate_output(&text, MAX_OUTPUT_CHARS);
        if !output.status.success() {
            return Err(format!(
                "Exit code {}\n{}",
                output.status.code().unwrap_or(-1),
                text
            ));
        }
        Ok(if text.is_empty() {
            "(no output)".to_string()
        } else {
            text
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, RunCommandTool) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("api")).unwrap();
        std::fs::write(dir.path().join("api/README.md"), "hi").unwrap();
        let policy = Arc::new(SecurityPolicy::with_defaults(
            dir.path(),
            vec!["ls".to_string(), "dotnet test".to_string()],
        ));
        let locks = Arc::new(WorkspaceLocks::new(dir.path()));
        (dir, RunCommandTool::new(policy, locks, 10))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_allowlisted_command_in_repo() {
        let (_dir, tool) = setup();
        let out = tool
            .execute(json!({"command": "ls", "cwd": "api"}))
            .await
            .unwrap();
        assert_eq!(out, "README.md");
    }

    #[tokio::test]
    async fn test_rejects_chained_and_unlisted_commands() {
        let (_dir, tool) = setup();
        let err = tool
            .execute(json!({"command": "dotnet test; rm -rf /"}))
            .await
            .unwrap_err();
        assert!(err.starts_with("Security:"));
        let err = tool
            .execute(json!({"command": "python -c 1"}))
            .await
            .unwrap_err();
        assert!(err.contains("not in the allowlist"));
    }

    #[tokio::test]
    async fn test_rejects_cwd_outside_workspace() {
        let (_dir, tool) = setup();
        let err = tool
            .execute(json!({"command": "ls", "cwd": "/usr/bin"}))
            .await
            .unwrap_err();
        assert!(err.starts_with("Security:"));
    }

    #[tokio::test]
    async fn test_requires_repository_cwd() {
        let (_dir, tool) = setup();
        for args in [
            json!({"command": "ls"}),
            json!({"command": "ls", "cwd": ""}),
            json!({"command": "ls", "cwd": "."}),
        ] {
            let err = tool.execute(args).await.unwrap_err();
            assert!(err.starts_with("Missing repository"), "{err}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_waits_for_repository_lock() {
        let (dir, tool) = setup();
        let locks = tool.locks.clone();
        let repo_lock = locks.lock_for(&dir.path().canonicalize().unwrap().join("api"));
        let guard = repo_lock.lock().await;

        let tool = Arc::new(tool);
        let task = {
            let tool = tool.clone();
            tokio::spawn(async move { tool.execute(json!({"command": "ls", "cwd": "api"})).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        drop(guard);
        assert_eq!(task.await.unwrap().unwrap(), "README.md");
    }

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output("abc", 5), "abc");
        assert_eq!(truncate_output("abcdef", 3), "abc\n... (output truncated)");
    }
}
