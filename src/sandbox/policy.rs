//! 沙箱策略与拒绝原因

use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;

use crate::config::AppConfig;

/// 沙箱拒绝原因（Display 即交给模型看的文字）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxViolation {
    #[error("Security: path '{0}' contains a parent-directory segment")]
    ParentTraversal(String),

    #[error("Security: path '{0}' resolves outside the workspace")]
    OutsideWorkspace(String),

    #[error("Security: path '{0}' is inside a protected system directory")]
    DeniedDirectory(String),

    #[error("Security: path '{0}' is empty or invalid")]
    InvalidPath(String),

    #[error("Security: size {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Security: '{0}' is not a text file")]
    BinaryFile(String),

    #[error("Security: command rejected, dangerous pattern ({0})")]
    DangerousCommand(String),

    #[error("Security: command '{0}' is not in the allowlist")]
    CommandNotAllowed(String),

    #[error("Security: empty command")]
    EmptyCommand,
}

/// 安全策略：工作区根、大小上限、系统目录黑名单、命令白名单与危险模式
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    pub(crate) workspace_root: PathBuf,
    pub(crate) max_file_size: u64,
    pub(crate) denied_directories: Vec<PathBuf>,
    pub(crate) command_whitelist: Vec<String>,
    pub(crate) dangerous_patterns: Vec<(Regex, &'static str)>,
}

impl SecurityPolicy {
    /// 创建策略；根目录若存在会被规范化（解析符号链接）
    pub fn new(
        workspace_root: impl AsRef<Path>,
        max_file_size: u64,
        denied_directories: Vec<PathBuf>,
        command_whitelist: Vec<String>,
    ) -> Self {
        let root = workspace_root.as_ref().to_path_buf();
        let workspace_root = root.canonicalize().unwrap_or(root);
        Self {
            workspace_root,
            max_file_size,
            denied_directories,
            command_whitelist: command_whitelist
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            dangerous_patterns: super::command::dangerous_patterns(),
        }
    }

    pub fn from_config(workspace_root: impl AsRef<Path>, cfg: &AppConfig) -> Self {
        Self::new(
            workspace_root,
            cfg.sandbox.max_file_size_bytes,
            cfg.sandbox.denied_directories.clone(),
            cfg.tools.shell.allowed_commands.clone(),
        )
    }

    /// 以默认上限与黑名单创建（测试与嵌入场景）
    pub fn with_defaults(workspace_root: impl AsRef<Path>, command_whitelist: Vec<String>) -> Self {
        Self::new(
            workspace_root,
            10 * 1024 * 1024,
            crate::config::default_denied_directories(),
            command_whitelist,
        )
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn command_whitelist(&self) -> &[String] {
        &self.command_whitelist
    }

    pub fn validate_size(&self, bytes: u64) -> Result<(), SandboxViolation> {
        if bytes > self.max_file_size {
            return Err(SandboxViolation::TooLarge {
                size: bytes,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_size_boundary() {
        let policy = SecurityPolicy::new(".", 1024, vec![], vec![]);
        assert!(policy.validate_size(0).is_ok());
        assert!(policy.validate_size(1024).is_ok());
        assert_eq!(
            policy.validate_size(1025),
            Err(SandboxViolation::TooLarge {
                size: 1025,
                limit: 1024
            })
        );
    }

    #[test]
    fn test_default_limit_is_ten_mib() {
        let policy = SecurityPolicy::with_defaults(".", vec![]);
        assert!(policy.validate_size(10 * 1024 * 1024).is_ok());
        assert!(policy.validate_size(10 * 1024 * 1024 + 1).is_err());
    }
}
