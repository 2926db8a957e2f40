//! DeepSeek API 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat（结构化输出稳定，默认）；可用 DEEPSEEK_MODEL 或配置切换

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// 创建 DeepSeek 客户端
///
/// - Key 取自 `DEEPSEEK_API_KEY`，缺省时回退 `OPENAI_API_KEY`；两者都没有时返回 None
/// - 模型优先取参数，其次 `DEEPSEEK_MODEL` 环境变量，最后 `deepseek-chat`
pub fn create_deepseek_client(model: Option<&str>, timeout_secs: u64) -> Option<OpenAiClient> {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())?;

    let model = model
        .filter(|m| !m.is_empty())
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());

    Some(OpenAiClient::new(
        Some(DEEPSEEK_BASE_URL),
        &model,
        &api_key,
        timeout_secs,
    ))
}
