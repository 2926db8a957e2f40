//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::AppConfig;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::{LlmClient, TokenUsage};

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
///
/// 返回 None 表示配置的后端缺少 API Key；调用方据此给出「缺少凭据」的统一失败响应。
pub fn create_llm_from_config(cfg: &AppConfig) -> Option<Arc<dyn LlmClient>> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = cfg.llm.timeouts.request;

    match provider.as_str() {
        "mock" => {
            tracing::warn!("Using Mock LLM (provider = mock)");
            Some(Arc::new(MockLlmClient::new()))
        }
        "openai" => {
            let key = std::env::var("OPENAI_API_KEY").ok()?;
            tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
            Some(Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                &key,
                timeout,
            )))
        }
        _ => {
            let client = create_deepseek_client(Some(&cfg.llm.model), timeout)?;
            tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
            Some(Arc::new(client))
        }
    }
}
