//! Mock LLM 客户端（用于测试与无 Key 运行，无需 API）
//!
//! 按顺序返回预置回复；预置队列耗尽后回显最后一条 User 消息。
//! token 统计按空白分词粗略计数。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, TokenUsage};
use crate::memory::{Message, Role};

/// Mock 客户端：脚本化回复，可注入失败
#[derive(Debug, Default)]
pub struct MockLlmClient {
    scripted: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
    usage: TokenUsage,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次返回给定回复
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for r in responses {
            mock.push_response(r);
        }
        mock
    }

    pub fn push_response(&self, response: impl Into<String>) {
        if let Ok(mut q) = self.scripted.lock() {
            q.push_back(Ok(response.into()));
        }
    }

    /// 下一次调用返回上游错误
    pub fn push_failure(&self, error: impl Into<String>) {
        if let Ok(mut q) = self.scripted.lock() {
            q.push_back(Err(error.into()));
        }
    }

    /// 已收到的 complete 调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let next = self.scripted.lock().ok().and_then(|mut q| q.pop_front());
        let reply = match next {
            Some(reply) => reply?,
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                format!("Echo from Mock: {}", last_user)
            }
        };

        let prompt_tokens: usize = messages.iter().map(|m| word_count(&m.content)).sum();
        self.usage.add(prompt_tokens as u64, word_count(&reply) as u64);
        Ok(reply)
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}
