//! 会话注册表：每个 conversationId 一份对话记忆与一个场景执行器
//!
//! 同一会话的流水线由 pipeline 锁串行化（Intent → Plan → Compile 跑完才处理下一条），
//! 不同会话之间互不阻塞。
//! 会话按空闲超时过期（cleanup_expired 定期调用），数量到上限时淘汰最久未活动的会话；
//! 被移除的会话先重置执行器，仍在运行的生成结果随之丢弃。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

use crate::generation::GenerationJobManager;
use crate::memory::ConversationMemory;
use crate::scene::ActionExecutor;

/// 默认空闲超时
pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(3600);
/// 默认会话数上限
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

/// 单个会话
pub struct SessionHandle {
    pub id: String,
    /// 对话记忆只由本会话的流水线修改；持有该锁即独占流水线
    pub pipeline: Mutex<ConversationMemory>,
    pub executor: Arc<ActionExecutor>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    last_active: std::sync::Mutex<Instant>,
}

impl SessionHandle {
    /// 更新活动时间
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_active.lock() {
            *last = Instant::now();
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.idle_for() > timeout
    }
}

/// 会话注册表（进程内，不持久化）
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    manager: Arc<GenerationJobManager>,
    max_history: usize,
    session_timeout: Duration,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(manager: Arc<GenerationJobManager>, max_history: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            manager,
            max_history,
            session_timeout: DEFAULT_SESSION_IDLE,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }

    /// 设置空闲超时与会话数上限（上限至少为 1）
    pub fn with_limits(mut self, session_timeout: Duration, max_sessions: usize) -> Self {
        self.session_timeout = session_timeout;
        self.max_sessions = max_sessions.max(1);
        self
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// 首条消息时创建会话；到达上限时先淘汰最久未活动的会话
    pub async fn get_or_create(&self, id: &str) -> Arc<SessionHandle> {
        if let Some(session) = self.sessions.read().await.get(id) {
            session.touch();
            return session.clone();
        }

        let mut evicted = None;
        let session = {
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get(id) {
                session.touch();
                return session.clone();
            }
            if sessions.len() >= self.max_sessions {
                let oldest = sessions
                    .values()
                    .max_by_key(|s| s.idle_for())
                    .map(|s| s.id.clone());
                if let Some(oldest) = oldest {
                    tracing::info!("Session limit {} reached, evicting {}", self.max_sessions, oldest);
                    evicted = sessions.remove(&oldest);
                }
            }
            tracing::info!("New session {}", id);
            let session = Arc::new(SessionHandle {
                id: id.to_string(),
                pipeline: Mutex::new(ConversationMemory::new(self.max_history)),
                executor: Arc::new(ActionExecutor::new(self.manager.clone())),
                created_at: chrono::Utc::now(),
                last_active: std::sync::Mutex::new(Instant::now()),
            });
            sessions.insert(id.to_string(), session.clone());
            session
        };

        if let Some(old) = evicted {
            old.executor.reset().await;
        }
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<SessionHandle>> {
        let session = self.sessions.read().await.get(id).cloned()?;
        session.touch();
        Some(session)
    }

    /// 移除会话并清空其对话与场景；会话不存在时返回 false
    pub async fn clear(&self, id: &str) -> bool {
        let Some(session) = self.sessions.write().await.remove(id) else {
            return false;
        };
        session.executor.reset().await;
        session.pipeline.lock().await.clear();
        tracing::info!("Session {} cleared", id);
        true
    }

    /// 移除空闲超时的会话，返回移除数量
    pub async fn cleanup_expired(&self) -> usize {
        let expired: Vec<Arc<SessionHandle>> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| s.is_expired(self.session_timeout))
                .map(|s| s.id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        for session in &expired {
            session.executor.reset().await;
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{PollPolicy, ScriptedGenerationApi};
    use crate::memory::Message;

    fn registry() -> SessionRegistry {
        let manager = GenerationJobManager::new(
            Arc::new(ScriptedGenerationApi::new()),
            2,
            PollPolicy::default(),
        );
        SessionRegistry::new(Arc::new(manager), 3)
    }

    #[tokio::test]
    async fn test_same_id_same_session() {
        let reg = registry();
        let a = reg.get_or_create("conv-1").await;
        let b = reg.get_or_create("conv-1").await;
        assert!(Arc::ptr_eq(&a, &b));
        reg.get_or_create("conv-2").await;
        assert_eq!(reg.len().await, 2);
        assert_eq!(reg.ids().await, vec!["conv-1".to_string(), "conv-2".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_empties_memory_and_removes_session() {
        let reg = registry();
        let session = reg.get_or_create("conv-1").await;
        {
            let mut memory = session.pipeline.lock().await;
            for i in 0..5 {
                memory.push(Message::user(format!("turn {i}")));
            }
            assert_eq!(memory.len(), 3);
        }
        assert!(reg.clear("conv-1").await);
        assert!(session.pipeline.lock().await.is_empty());
        assert!(reg.get("conv-1").await.is_none());
        assert_eq!(reg.len().await, 0);
        assert!(!reg.clear("missing").await);
    }

    #[tokio::test]
    async fn test_idle_sessions_expire() {
        let reg = registry().with_limits(Duration::from_millis(20), 10);
        reg.get_or_create("idle").await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        reg.get_or_create("fresh").await;

        assert_eq!(reg.cleanup_expired().await, 1);
        assert_eq!(reg.ids().await, vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_active() {
        let reg = registry().with_limits(DEFAULT_SESSION_IDLE, 2);
        reg.get_or_create("a").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        reg.get_or_create("b").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        // a 重新活跃，b 成为最久未活动
        reg.get_or_create("a").await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        reg.get_or_create("c").await;
        assert_eq!(reg.len().await, 2);
        assert_eq!(reg.ids().await, vec!["a".to_string(), "c".to_string()]);
    }
}
