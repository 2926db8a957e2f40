//! 场景生成编排器：请求流水线主控
//!
//! utterance → Intent Arbiter → {局部更新 | 完整课程：Scene Plan Generator → Asset Resolver}
//! → Environment Validator → Action Compiler → Action List → Action Executor →（异步）Generation Job Manager。
//! 同一会话的流水线串行执行；只有上游服务失败会作为错误离开这里，其余情况都在组件内部消化。

use std::sync::Arc;

use crate::core::extract::{extract_asset_names, extract_skybox_prompt, match_interactions};
use crate::core::protocol::{ChatRequest, ChatResponse, ExportResponse};
use crate::core::session::{SessionHandle, SessionRegistry};
use crate::core::{OrchestratorError, StoreError};
use crate::generation::{GenerationJob, GenerationJobManager};
use crate::intent::{Intent, IntentArbiter};
use crate::llm::LlmClient;
use crate::memory::{ConversationMemory, Message, Role};
use crate::scene::{ActionCompiler, CompiledActions, SceneSnapshot, ScenePlanGenerator};
use crate::store::BlobStore;

const CHAT_PROMPT: &str = "You are the assistant of an immersive 3D lesson editor. \
Answer questions briefly and clearly; for small talk, reply in one or two friendly sentences. \
When it helps, suggest a lesson the user could build.";

/// 需要 LLM 的组件；没有凭据时整体缺席
pub struct LlmPipeline {
    pub arbiter: IntentArbiter,
    pub planner: ScenePlanGenerator,
    pub chat: Arc<dyn LlmClient>,
}

/// 流水线开关
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// 传给规划器的最近消息条数
    pub planner_context_turns: usize,
    /// 是否在服务端执行 Action List（驱动生成任务）
    pub execute_actions: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            planner_context_turns: 4,
            execute_actions: true,
        }
    }
}

/// 场景生成编排器
pub struct SceneOrchestrator {
    pipeline: Option<LlmPipeline>,
    compiler: ActionCompiler,
    sessions: SessionRegistry,
    manager: Arc<GenerationJobManager>,
    store: Arc<dyn BlobStore>,
    settings: PipelineSettings,
}

impl SceneOrchestrator {
    pub fn new(
        pipeline: Option<LlmPipeline>,
        compiler: ActionCompiler,
        sessions: SessionRegistry,
        manager: Arc<GenerationJobManager>,
        store: Arc<dyn BlobStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            pipeline,
            compiler,
            sessions,
            manager,
            store,
            settings,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn manager(&self) -> &Arc<GenerationJobManager> {
        &self.manager
    }

    /// LLM 累计 token 使用 (prompt, completion, total)；没有配置 LLM 时为 None
    pub fn token_usage(&self) -> Option<(u64, u64, u64)> {
        self.pipeline.as_ref().map(|p| p.chat.token_usage())
    }

    /// 处理一条对话请求
    pub async fn handle_chat(&self, req: ChatRequest) -> Result<ChatResponse, OrchestratorError> {
        let input = req.input.trim();
        if input.is_empty() {
            return Err(OrchestratorError::InvalidRequest("input is empty".to_string()));
        }
        if req.conversation_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "conversationId is empty".to_string(),
            ));
        }
        let pipeline = self.pipeline.as_ref().ok_or_else(|| {
            OrchestratorError::MissingCredentials(
                "no LLM API key configured (set DEEPSEEK_API_KEY or OPENAI_API_KEY)".to_string(),
            )
        })?;

        let session = self.sessions.get_or_create(&req.conversation_id).await;
        // 持锁直到本轮结束：同一会话的下一条请求在这里排队
        let mut memory = session.pipeline.lock().await;
        // 客户端带来的历史只接受 user / assistant，system 指令不允许从外部注入
        if memory.is_empty() {
            for msg in req.history.iter().flatten() {
                if matches!(msg.role, Role::User | Role::Assistant) {
                    memory.push(msg.clone());
                }
            }
        }

        let intent = pipeline.arbiter.classify(input).await?;
        tracing::info!("[{}] intent {}", session.id, intent.label());

        let (compiled, reasoning) = self
            .compile(pipeline, &session, &memory, intent, input)
            .await?;

        if self.settings.execute_actions {
            let report = session.executor.apply(&compiled.actions).await;
            tracing::info!(
                "[{}] applied {} actions ({} assets inserted, {} generating)",
                session.id,
                compiled.actions.len(),
                report.inserted.len(),
                report.generating.len()
            );
        }

        memory.push(Message::user(input));
        memory.push(Message::assistant(compiled.summary.clone()));

        Ok(ChatResponse {
            reasoning,
            actions: compiled.actions,
            conversation_id: req.conversation_id,
            lesson_plan: compiled.lesson_plan,
            update_type: Some(intent.update_type()),
            dual_layer_env: compiled.dual_layer_env,
        })
    }

    /// 按意图分支编译 Action List，返回 (产物, reasoning)
    async fn compile(
        &self,
        pipeline: &LlmPipeline,
        session: &SessionHandle,
        memory: &ConversationMemory,
        intent: Intent,
        input: &str,
    ) -> Result<(CompiledActions, String), OrchestratorError> {
        let compiled = match intent {
            Intent::NewLesson => {
                let history = memory.recent(self.settings.planner_context_turns);
                let resolved = pipeline.planner.generate(input, &history).await?;
                let reasoning = resolved.plan.reasoning.clone();
                let compiled = self.compiler.compile_lesson(&resolved);
                let reasoning = reasoning.unwrap_or_else(|| compiled.summary.clone());
                return Ok((compiled, reasoning));
            }
            Intent::SkyboxChange => {
                let prompt = extract_skybox_prompt(input);
                let interior = session.executor.environment_model().await;
                self.compiler.compile_skybox_change(&prompt, interior.as_deref())
            }
            Intent::AddAssets => {
                let names = extract_asset_names(input);
                self.compiler.compile_add_assets(input, &names)
            }
            Intent::ModifyScene => {
                let names = session.executor.asset_names().await;
                let interactions = match_interactions(input, &names);
                self.compiler.compile_modify(&interactions)
            }
            Intent::Question | Intent::CasualChat => {
                let mut messages = vec![Message::system(CHAT_PROMPT)];
                messages.extend(memory.messages());
                messages.push(Message::user(input));
                let reply = pipeline
                    .chat
                    .complete(&messages)
                    .await
                    .map_err(|e| OrchestratorError::Upstream(format!("chat reply failed: {e}")))?;
                self.compiler.compile_chat(reply.trim())
            }
        };
        let reasoning = format!("{}: {}", intent.label(), compiled.summary);
        Ok((compiled, reasoning))
    }

    /// 清空会话的对话与场景并移除会话
    pub async fn clear_session(&self, conversation_id: &str) -> bool {
        self.sessions.clear(conversation_id).await
    }

    pub async fn scene_snapshot(&self, conversation_id: &str) -> Option<SceneSnapshot> {
        let session = self.sessions.get(conversation_id).await?;
        Some(session.executor.snapshot().await)
    }

    /// 把当前场景快照写入 blob 存储
    pub async fn export_scene(&self, conversation_id: &str) -> Result<ExportResponse, OrchestratorError> {
        let snapshot = self.scene_snapshot(conversation_id).await.ok_or_else(|| {
            OrchestratorError::InvalidRequest(format!("unknown conversation {conversation_id}"))
        })?;
        let scene = serde_json::to_value(&snapshot).map_err(StoreError::from)?;
        let document = serde_json::json!({
            "conversationId": conversation_id,
            "exportedAt": chrono::Utc::now().to_rfc3339(),
            "scene": scene,
        });
        let id = self.store.put(&document).await?;
        Ok(ExportResponse {
            id,
            conversation_id: conversation_id.to_string(),
        })
    }

    pub fn job_status(&self, job_id: &str) -> Option<GenerationJob> {
        self.manager.status(job_id)
    }
}
