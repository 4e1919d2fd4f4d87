//! 工具层：注册表、调度器与沙箱内的文件 / 搜索 / 命令 / Git 工具

pub mod executor;
pub mod filesystem;
pub mod git;
pub mod registry;
pub mod search;
pub mod shell;
pub mod workspace;

use std::sync::Arc;

pub use executor::{ToolExecutor, ToolOutcome};
pub use filesystem::{ListDirectoryTool, ReadFileTool, SafeFs, WriteFileTool};
pub use git::{GitOp, GitTool};
pub use registry::{Tool, ToolRegistry};
pub use search::SearchFilesTool;
pub use shell::RunCommandTool;
pub use workspace::{RepositoryInfo, WorkspaceDescriptor, WorkspaceLocks};

use crate::config::AppConfig;
use crate::sandbox::SecurityPolicy;

/// 按配置注册全部内置工具
pub fn default_registry(
    cfg: &AppConfig,
    policy: Arc<SecurityPolicy>,
    locks: Arc<WorkspaceLocks>,
) -> ToolRegistry {
    let timeout = cfg.tools.tool_timeout_secs;
    let fs = SafeFs::new(policy.clone(), locks.clone());

    let mut registry = ToolRegistry::new();
    registry.register(ReadFileTool::new(fs.clone()));
    registry.register(WriteFileTool::new(fs.clone()));
    registry.register(ListDirectoryTool::new(fs));
    registry.register(SearchFilesTool::new(
        policy.clone(),
        cfg.tools.max_search_results,
    ));
    registry.register(RunCommandTool::new(policy.clone(), locks.clone(), timeout));
    for tool in GitTool::all(policy, locks, timeout) {
        registry.register(tool);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_catalog() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = AppConfig::default();
        let policy = Arc::new(SecurityPolicy::from_config(dir.path(), &cfg));
        let locks = Arc::new(WorkspaceLocks::new(dir.path()));
        let registry = default_registry(&cfg, policy, locks);
        assert_eq!(
            registry.tool_names(),
            vec![
                "git_commit",
                "git_diff",
                "git_push",
                "git_status",
                "list_directory",
                "read_file",
                "run_command",
                "search_files",
                "write_file",
            ]
        );
        assert_eq!(
            registry.read_only_names(),
            vec!["git_diff", "git_status", "list_directory", "read_file", "search_files"]
        );
    }
}
