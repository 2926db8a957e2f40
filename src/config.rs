//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SCENEGEN__*` 覆盖（双下划线表示嵌套，如 `SCENEGEN__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub intent: IntentSection,
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub catalog: CatalogSection,
    #[serde(default)]
    pub server: ServerSection,
}

/// [app] 段：会话历史上限、规划上下文轮数、是否在服务端执行 Action List
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 每个会话保留的消息条数上限（超出按 FIFO 淘汰）
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// 传给场景规划器的最近消息条数
    #[serde(default = "default_planner_context_turns")]
    pub planner_context_turns: usize,
    /// 为 true 时服务端执行器消费 Action List 并驱动生成任务
    #[serde(default = "default_execute_actions")]
    pub execute_actions: bool,
    /// 导出场景的存放目录，未设置时用 ./workspace/scenes
    pub export_dir: Option<PathBuf>,
    /// 会话空闲多少秒后被回收
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
    /// 同时保留的会话数上限（超出淘汰最久未活动的会话）
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_max_history() -> usize {
    10
}

fn default_planner_context_turns() -> usize {
    4
}

fn default_execute_actions() -> bool {
    true
}

fn default_session_idle_secs() -> u64 {
    3600
}

fn default_max_sessions() -> usize {
    1000
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_history: default_max_history(),
            planner_context_turns: default_planner_context_turns(),
            execute_actions: default_execute_actions(),
            export_dir: None,
            session_idle_secs: default_session_idle_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

/// [intent] 段：是否启用关键词快速匹配（命中时不调用 LLM）
#[derive(Debug, Clone, Deserialize)]
pub struct IntentSection {
    #[serde(default = "default_enable_fast_match")]
    pub enable_fast_match: bool,
}

fn default_enable_fast_match() -> bool {
    true
}

impl Default for IntentSection {
    fn default() -> Self {
        Self {
            enable_fast_match: default_enable_fast_match(),
        }
    }
}

/// [generation] 段：3D 模型生成服务端点、并发预算与轮询预算
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationSection {
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,
    /// 读取 API Key 的环境变量名
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// 同时处于非终态的生成任务上限
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 预览阶段最多轮询次数
    #[serde(default = "default_preview_max_attempts")]
    pub preview_max_attempts: u32,
    /// 贴图精修阶段最多轮询次数（比预览阶段宽松，精修更慢）
    #[serde(default = "default_refine_max_attempts")]
    pub refine_max_attempts: u32,
    #[serde(default = "default_art_style")]
    pub art_style: String,
    #[serde(default = "default_topology")]
    pub topology: String,
    /// 单次 HTTP 请求超时（秒）
    #[serde(default = "default_generation_request_timeout")]
    pub request_timeout: u64,
}

fn default_generation_base_url() -> String {
    "https://api.meshy.ai/openapi/v2".to_string()
}

fn default_api_key_env() -> String {
    "MESHY_API_KEY".to_string()
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_preview_max_attempts() -> u32 {
    60
}

fn default_refine_max_attempts() -> u32 {
    90
}

fn default_art_style() -> String {
    "realistic".to_string()
}

fn default_topology() -> String {
    "triangle".to_string()
}

fn default_generation_request_timeout() -> u64 {
    30
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            base_url: default_generation_base_url(),
            api_key_env: default_api_key_env(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            poll_interval_ms: default_poll_interval_ms(),
            preview_max_attempts: default_preview_max_attempts(),
            refine_max_attempts: default_refine_max_attempts(),
            art_style: default_art_style(),
            topology: default_topology(),
            request_timeout: default_generation_request_timeout(),
        }
    }
}

/// [catalog] 段：内部资产库与本地缓存表的 TOML 文件路径，未设置时使用内置表
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CatalogSection {
    pub internal_path: Option<PathBuf>,
    pub local_path: Option<PathBuf>,
}

/// [server] 段：scenegen-web 监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 SCENEGEN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SCENEGEN__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("SCENEGEN")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_budget() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.max_history, 10);
        assert_eq!(cfg.generation.max_concurrent_jobs, 2);
        assert!(cfg.generation.refine_max_attempts > cfg.generation.preview_max_attempts);
        assert!(cfg.intent.enable_fast_match);
    }

    #[test]
    fn test_load_explicit_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenegen.toml");
        std::fs::write(
            &path,
            "[generation]\nmax_concurrent_jobs = 4\n[app]\nmax_history = 6\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.generation.max_concurrent_jobs, 4);
        assert_eq!(cfg.app.max_history, 6);
        assert_eq!(cfg.generation.poll_interval_ms, 5000);
    }
}
