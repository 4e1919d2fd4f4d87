//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__ORCHESTRATOR__MAX_PLAN_STEPS=10`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub sandbox: SandboxSection,
    pub orchestrator: OrchestratorSection,
    pub session: SessionSection,
}

/// [app] 段：应用名与多仓库工作区根目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 工作区根目录（其下每个一级子目录视为一个仓库），未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / mock；openai 需要 OPENAI_API_KEY
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

/// [tools] 段：工具超时与 Shell 白名单
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// search_files 最多返回的匹配行数
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
    #[serde(default)]
    pub shell: ShellSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            max_search_results: default_max_search_results(),
            shell: ShellSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    120
}

fn default_max_search_results() -> usize {
    100
}

/// [tools.shell] 段：允许执行的命令前缀（整条命令等于条目，或以「条目 + 空格」开头）
#[derive(Debug, Clone, Deserialize)]
pub struct ShellSection {
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: default_allowed_commands(),
        }
    }
}

fn default_allowed_commands() -> Vec<String> {
    vec![
        "dotnet build".into(),
        "dotnet test".into(),
        "dotnet restore".into(),
        "cargo build".into(),
        "cargo check".into(),
        "cargo test".into(),
        "npm test".into(),
        "npm run build".into(),
        "git status".into(),
        "git log".into(),
        "ls".into(),
    ]
}

/// [sandbox] 段：文件大小上限与禁止访问的系统目录
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxSection {
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_denied_directories")]
    pub denied_directories: Vec<PathBuf>,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size_bytes(),
            denied_directories: default_denied_directories(),
        }
    }
}

fn default_max_file_size_bytes() -> u64 {
    10 * 1024 * 1024
}

pub(crate) fn default_denied_directories() -> Vec<PathBuf> {
    [
        "/etc",
        "/bin",
        "/sbin",
        "/boot",
        "/dev",
        "/proc",
        "/sys",
        "/lib",
        "/lib64",
        "/usr/bin",
        "/usr/sbin",
        "/usr/lib",
        "C:\\Windows",
        "C:\\Program Files",
        "C:\\Program Files (x86)",
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect()
}

/// [orchestrator] 段：计划上限、各阶段迭代上限、限流重试与输出截断
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_max_plan_steps")]
    pub max_plan_steps: usize,
    #[serde(default = "default_step_max_iterations")]
    pub step_max_iterations: usize,
    #[serde(default = "default_research_max_iterations")]
    pub research_max_iterations: usize,
    #[serde(default = "default_planning_max_iterations")]
    pub planning_max_iterations: usize,
    /// StepResult.outcome 最大字符数
    #[serde(default = "default_outcome_max_chars")]
    pub outcome_max_chars: usize,
    /// 限流错误中没有可解析的等待时间时使用
    #[serde(default = "default_rate_limit_delay_secs")]
    pub rate_limit_default_delay_secs: u64,
    #[serde(default = "default_rate_limit_max_delay_secs")]
    pub rate_limit_max_delay_secs: u64,
    /// Unclear 且置信度低于此值时进入 NeedsClarification
    #[serde(default = "default_clarification_threshold")]
    pub clarification_threshold: f32,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_plan_steps: default_max_plan_steps(),
            step_max_iterations: default_step_max_iterations(),
            research_max_iterations: default_research_max_iterations(),
            planning_max_iterations: default_planning_max_iterations(),
            outcome_max_chars: default_outcome_max_chars(),
            rate_limit_default_delay_secs: default_rate_limit_delay_secs(),
            rate_limit_max_delay_secs: default_rate_limit_max_delay_secs(),
            clarification_threshold: default_clarification_threshold(),
        }
    }
}

fn default_max_plan_steps() -> usize {
    15
}

fn default_step_max_iterations() -> usize {
    10
}

fn default_research_max_iterations() -> usize {
    8
}

fn default_planning_max_iterations() -> usize {
    3
}

fn default_outcome_max_chars() -> usize {
    500
}

fn default_rate_limit_delay_secs() -> u64 {
    5
}

fn default_rate_limit_max_delay_secs() -> u64 {
    60
}

fn default_clarification_threshold() -> f32 {
    0.3
}

/// [session] 段：会话缓存过期与容量
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_max_sessions() -> usize {
    256
}

/// 从 config 目录加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("tools.shell.allowed_commands")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.orchestrator.max_plan_steps, 15);
        assert_eq!(cfg.orchestrator.outcome_max_chars, 500);
        assert_eq!(cfg.orchestrator.rate_limit_default_delay_secs, 5);
        assert_eq!(cfg.sandbox.max_file_size_bytes, 10 * 1024 * 1024);
        assert!(cfg
            .tools
            .shell
            .allowed_commands
            .iter()
            .any(|c| c == "dotnet test"));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[orchestrator]
max_plan_steps = 4

[tools.shell]
allowed_commands = ["make test"]
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.orchestrator.max_plan_steps, 4);
        assert_eq!(cfg.orchestrator.step_max_iterations, 10);
        assert!(cfg
            .tools
            .shell
            .allowed_commands
            .iter()
            .any(|c| c == "make test"));
    }
}
