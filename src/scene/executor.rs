//! Action 执行器：按顺序应用 Action List，维护会话可见的场景状态
//!
//! 目录资产同步落地；需要生成的资产先插入 pending 占位，再由后台 task 驱动任务管理器。
//! 生成结果按占位 uid 回写（而不是按位置），因此任务乱序完成也不会串位；
//! 占位已被移除（例如场景重置）时，迟到的结果直接丢弃；重置同时取消仍在排队等空位的生成。
//! DISPLAY_LESSON_PLAN 开启新课程：上一课的资产与环境层整体替换，IMMERSIVE 课程不会继承旧的室内模型。

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::SubmitError;
use crate::generation::{GenerationJobManager, GenerationOutcome};
use crate::scene::action::{Action, ActionType, AssetSource};

/// 资产在场景中的可见状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetStatus {
    Pending,
    Ready,
}

/// 场景中的一个资产（或生成中的占位）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneAsset {
    /// 生成完成后保持不变，前端的选中状态依赖它
    pub uid: String,
    pub name: String,
    pub status: AssetStatus,
    pub source: AssetSource,
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub interactions: BTreeSet<String>,
    pub decorative: bool,
    /// 降级结果的说明（例如精修失败、使用无贴图模型）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl SceneAsset {
    fn new(name: &str, source: AssetSource) -> Self {
        Self {
            uid: format!("asset_{}", uuid::Uuid::new_v4().simple()),
            name: name.to_string(),
            status: AssetStatus::Ready,
            source,
            reference: None,
            prompt: None,
            job_id: None,
            interactions: BTreeSet::new(),
            decorative: false,
            warning: None,
        }
    }
}

/// 生成失败、已从场景中移除的资产
#[derive(Debug, Clone, Serialize)]
pub struct FailedAsset {
    pub uid: String,
    pub name: String,
    pub reason: String,
}

/// 场景可见状态
#[derive(Debug, Default)]
struct SceneState {
    assets: Vec<SceneAsset>,
    environment_model: Option<String>,
    skybox_prompt: Option<String>,
    lesson: Option<Map<String, Value>>,
    failed: Vec<FailedAsset>,
}

impl SceneState {
    fn get_mut(&mut self, uid: &str) -> Option<&mut SceneAsset> {
        self.assets.iter_mut().find(|a| a.uid == uid)
    }

    fn contains(&self, uid: &str) -> bool {
        self.assets.iter().any(|a| a.uid == uid)
    }

    fn find_target(&mut self, target: &str) -> Option<&mut SceneAsset> {
        let target = target.trim();
        if let Some(idx) = self.assets.iter().position(|a| a.uid == target) {
            return self.assets.get_mut(idx);
        }
        self.assets
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(target))
    }

    /// 把任务结果写回占位
    fn complete(&mut self, uid: &str, outcome: GenerationOutcome) {
        let Some(idx) = self.assets.iter().position(|a| a.uid == uid) else {
            tracing::debug!("Discarding generation result for removed asset {}", uid);
            return;
        };

        match outcome {
            GenerationOutcome::Succeeded { model_ref } => {
                let asset = &mut self.assets[idx];
                asset.reference = Some(model_ref);
                asset.status = AssetStatus::Ready;
            }
            GenerationOutcome::SucceededDegraded { model_ref, reason } => {
                let asset = &mut self.assets[idx];
                tracing::warn!("Asset '{}' degraded: {}", asset.name, reason);
                asset.reference = Some(model_ref);
                asset.status = AssetStatus::Ready;
                asset.warning = Some(reason);
            }
            GenerationOutcome::Failed { reason } => {
                let asset = self.assets.remove(idx);
                tracing::warn!("Asset '{}' generation failed, removed from scene: {}", asset.name, reason);
                self.failed.push(FailedAsset {
                    uid: asset.uid,
                    name: asset.name,
                    reason,
                });
            }
            GenerationOutcome::RateLimited => {
                let asset = self.assets.remove(idx);
                self.failed.push(FailedAsset {
                    uid: asset.uid,
                    name: asset.name,
                    reason: "rate_limited".to_string(),
                });
            }
        }
    }
}

/// 场景快照中的环境层
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentState {
    pub environment_model: Option<String>,
    pub skybox_prompt: Option<String>,
}

/// 场景快照（状态查询与导出用）
#[derive(Debug, Clone, Serialize)]
pub struct SceneSnapshot {
    pub assets: Vec<SceneAsset>,
    pub failed: Vec<FailedAsset>,
    pub environment: EnvironmentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesson: Option<Map<String, Value>>,
    pub pending: usize,
}

/// 一次 apply 的结果
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// 按 Action 顺序插入的资产 uid
    pub inserted: Vec<String>,
    /// 已提交后台生成的占位 uid
    pub generating: Vec<String>,
    /// INJECT_LOGIC 找不到目标时的说明
    pub skipped: Vec<String>,
}

/// Action 执行器（每个会话一个）
pub struct ActionExecutor {
    state: Arc<RwLock<SceneState>>,
    manager: Arc<GenerationJobManager>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// 当前场景代的取消令牌，reset 时换新
    cancel: Mutex<CancellationToken>,
}

impl ActionExecutor {
    pub fn new(manager: Arc<GenerationJobManager>) -> Self {
        Self {
            state: Arc::new(RwLock::new(SceneState::default())),
            manager,
            tasks: Mutex::new(Vec::new()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// 按顺序应用；生成型动作只插入占位并派发后台 task，不等待其完成
    pub async fn apply(&self, actions: &[Action]) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut to_generate = Vec::new();

        {
            let mut state = self.state.write().await;
            for action in actions {
                match action.action_type {
                    ActionType::AddAsset => {
                        let name = action.str_param("name").unwrap_or("asset");
                        let mut asset =
                            SceneAsset::new(name, action.source.unwrap_or(AssetSource::Internal));
                        asset.reference = action.str_param("url").map(str::to_string);
                        report.inserted.push(asset.uid.clone());
                        state.assets.push(asset);
                    }
                    ActionType::GenerateModel => {
                        let name = action.str_param("name").unwrap_or("generated asset");
                        let prompt = action.str_param("prompt").unwrap_or(name).to_string();
                        let mut asset = SceneAsset::new(name, AssetSource::AiGenerated);
                        asset.status = AssetStatus::Pending;
                        asset.prompt = Some(prompt.clone());
                        asset.decorative = action.bool_param("decorative");
                        report.inserted.push(asset.uid.clone());
                        report.generating.push(asset.uid.clone());
                        to_generate.push((asset.uid.clone(), prompt));
                        state.assets.push(asset);
                    }
                    ActionType::InjectLogic => {
                        let target = action.str_param("target").unwrap_or_default();
                        let interaction = action.str_param("interaction").unwrap_or_default();
                        match state.find_target(target) {
                            Some(asset) if !interaction.is_empty() => {
                                if !asset.interactions.insert(interaction.to_string()) {
                                    tracing::debug!("'{}' already {}", asset.name, interaction);
                                }
                            }
                            _ => {
                                tracing::warn!("INJECT_LOGIC target '{}' not in scene", target);
                                report.skipped.push(target.to_string());
                            }
                        }
                    }
                    ActionType::SetEnvironment => {
                        state.environment_model = action.str_param("model").map(str::to_string);
                    }
                    ActionType::GenerateSkybox | ActionType::UpdateSkybox => {
                        if let Some(prompt) = action.str_param("prompt") {
                            state.skybox_prompt = Some(prompt.to_string());
                        }
                    }
                    ActionType::CreateLesson => {
                        state.lesson = Some(action.params.clone());
                    }
                    ActionType::DisplayLessonPlan => {
                        self.rotate_cancel();
                        let replaced = state.assets.len();
                        *state = SceneState::default();
                        tracing::info!("New lesson replaces previous scene ({} assets)", replaced);
                    }
                    ActionType::SearchLibrary | ActionType::ChatResponse => {}
                }
            }
        }

        for (uid, prompt) in to_generate {
            self.spawn_generation(uid, prompt);
        }
        report
    }

    fn spawn_generation(&self, uid: String, prompt: String) {
        let state = self.state.clone();
        let manager = self.manager.clone();
        let cancel = match self.cancel.lock() {
            Ok(token) => token.child_token(),
            Err(_) => CancellationToken::new(),
        };
        let handle = tokio::spawn(async move {
            drive_generation(state, manager, cancel, uid, prompt).await;
        });
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(handle);
        }
    }

    /// 等待当前所有后台生成结束
    pub async fn settle(&self) {
        let pending: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => return,
        };
        for result in futures_util::future::join_all(pending).await {
            if let Err(e) = result {
                tracing::warn!("Generation task ended abnormally: {}", e);
            }
        }
    }

    pub async fn snapshot(&self) -> SceneSnapshot {
        let state = self.state.read().await;
        SceneSnapshot {
            assets: state.assets.clone(),
            failed: state.failed.clone(),
            environment: EnvironmentState {
                environment_model: state.environment_model.clone(),
                skybox_prompt: state.skybox_prompt.clone(),
            },
            lesson: state.lesson.clone(),
            pending: state
                .assets
                .iter()
                .filter(|a| a.status == AssetStatus::Pending)
                .count(),
        }
    }

    /// 当前室内模型（天空盒更新时做一致性校验用）
    pub async fn environment_model(&self) -> Option<String> {
        self.state.read().await.environment_model.clone()
    }

    /// 当前场景资产名称
    pub async fn asset_names(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .assets
            .iter()
            .map(|a| a.name.clone())
            .collect()
    }

    /// 取消当前场景代的后台生成，后续生成挂到新令牌上
    fn rotate_cancel(&self) {
        if let Ok(mut token) = self.cancel.lock() {
            token.cancel();
            *token = CancellationToken::new();
        }
    }

    /// 清空场景；仍在运行的任务完成后找不到占位，结果被丢弃
    pub async fn reset(&self) {
        self.rotate_cancel();
        let mut state = self.state.write().await;
        let dropped = state.assets.len();
        *state = SceneState::default();
        tracing::info!("Scene reset ({} assets removed)", dropped);
    }
}

/// 单个占位的生成流程：预算满时等待空位再试，占位消失则放弃
async fn drive_generation(
    state: Arc<RwLock<SceneState>>,
    manager: Arc<GenerationJobManager>,
    cancel: CancellationToken,
    uid: String,
    prompt: String,
) {
    let released = manager.slot_released();
    let handle = loop {
        // 先登记等待再提交，避免错过提交与等待之间释放的空位
        let notified = released.notified();
        match manager.submit(&prompt) {
            Ok(handle) => break handle,
            Err(SubmitError::RateLimited { in_flight }) => {
                if !state.read().await.contains(&uid) {
                    return;
                }
                tracing::debug!("Generation budget full ({} in flight), {} waits", in_flight, uid);
                tokio::select! {
                    _ = notified => {}
                    _ = cancel.cancelled() => return,
                }
            }
        }
    };

    {
        let mut scene = state.write().await;
        match scene.get_mut(&uid) {
            Some(asset) => asset.job_id = Some(handle.id().to_string()),
            None => tracing::debug!("Asset {} removed while job {} starts", uid, handle.id()),
        }
    }

    // 取消时丢弃句柄：任务仍跑到终态并归还许可，只是结果无人接收
    let outcome = tokio::select! {
        outcome = manager.await_result(handle) => outcome,
        _ = cancel.cancelled() => return,
    };
    state.write().await.complete(&uid, outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::generation::{PollPolicy, RemoteTaskStatus, ScriptedGenerationApi};

    fn policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            preview_max_attempts: 10,
            refine_max_attempts: 5,
        }
    }

    fn executor(api: ScriptedGenerationApi, budget: usize) -> ActionExecutor {
        ActionExecutor::new(Arc::new(GenerationJobManager::new(Arc::new(api), budget, policy())))
    }

    fn generate(name: &str, prompt: &str) -> Action {
        Action::new(ActionType::GenerateModel)
            .param("name", name)
            .param("prompt", prompt)
            .with_source(AssetSource::AiGenerated)
    }

    #[tokio::test]
    async fn test_catalog_asset_is_ready_immediately() {
        let exec = executor(ScriptedGenerationApi::new(), 2);
        let add = Action::new(ActionType::AddAsset)
            .param("name", "microscope")
            .param("url", "/models/microscope.glb")
            .with_source(AssetSource::Local);
        exec.apply(&[add]).await;

        let snap = exec.snapshot().await;
        assert_eq!(snap.assets.len(), 1);
        assert_eq!(snap.assets[0].status, AssetStatus::Ready);
        assert_eq!(snap.assets[0].reference.as_deref(), Some("/models/microscope.glb"));
    }

    #[tokio::test]
    async fn test_out_of_order_completion_routes_by_uid() {
        let slow = vec![
            Ok(RemoteTaskStatus::running(10)),
            Ok(RemoteTaskStatus::running(40)),
            Ok(RemoteTaskStatus::running(80)),
            Ok(RemoteTaskStatus::succeeded("https://gen.local/slow.glb")),
        ];
        let api = ScriptedGenerationApi::new()
            .with_prompt_script("slow", slow)
            .with_prompt_script("fast", vec![Ok(RemoteTaskStatus::succeeded("https://gen.local/fast.glb"))])
            .with_refine(vec![Ok(RemoteTaskStatus::failed("no texture"))]);
        let exec = executor(api, 2);

        let report = exec
            .apply(&[generate("Slow thing", "slow prompt"), generate("Fast thing", "fast prompt")])
            .await;
        let pending = exec.snapshot().await;
        assert_eq!(pending.pending, 2);

        exec.settle().await;
        let snap = exec.snapshot().await;
        assert_eq!(snap.pending, 0);
        assert_eq!(snap.assets[0].uid, report.inserted[0]);
        assert_eq!(snap.assets[0].reference.as_deref(), Some("https://gen.local/slow.glb"));
        assert_eq!(snap.assets[1].uid, report.inserted[1]);
        assert_eq!(snap.assets[1].reference.as_deref(), Some("https://gen.local/fast.glb"));
        assert!(snap.assets.iter().all(|a| a.warning.is_some()));
    }

    #[tokio::test]
    async fn test_failed_generation_removes_placeholder() {
        let api = ScriptedGenerationApi::new()
            .with_preview(vec![Ok(RemoteTaskStatus::failed("content policy"))]);
        let exec = executor(api, 2);
        let add = Action::new(ActionType::AddAsset)
            .param("name", "globe")
            .param("url", "/library/models/earth_globe.glb")
            .with_source(AssetSource::Internal);
        exec.apply(&[generate("Dragon", "dragon"), add]).await;
        exec.settle().await;

        let snap = exec.snapshot().await;
        assert_eq!(snap.assets.len(), 1);
        assert_eq!(snap.assets[0].name, "globe");
        assert_eq!(snap.failed.len(), 1);
        assert_eq!(snap.failed[0].name, "Dragon");
    }

    #[tokio::test]
    async fn test_reset_discards_late_completions() {
        let api = ScriptedGenerationApi::new().with_preview(vec![
            Ok(RemoteTaskStatus::running(10)),
            Ok(RemoteTaskStatus::running(20)),
            Ok(RemoteTaskStatus::succeeded("https://gen.local/late.glb")),
        ]);
        let exec = executor(api, 2);
        exec.apply(&[generate("Late", "late")]).await;
        exec.reset().await;
        exec.settle().await;

        let snap = exec.snapshot().await;
        assert!(snap.assets.is_empty());
        assert!(snap.failed.is_empty());
    }

    #[tokio::test]
    async fn test_budget_overflow_waits_for_a_slot() {
        let exec = executor(ScriptedGenerationApi::new(), 1);
        exec.apply(&[generate("A", "a"), generate("B", "b"), generate("C", "c")])
            .await;
        exec.settle().await;

        let snap = exec.snapshot().await;
        assert_eq!(snap.assets.len(), 3);
        assert!(snap.assets.iter().all(|a| a.status == AssetStatus::Ready));
    }

    #[tokio::test]
    async fn test_inject_logic_is_idempotent() {
        let exec = executor(ScriptedGenerationApi::new(), 2);
        let add = Action::new(ActionType::AddAsset)
            .param("name", "DNA model")
            .param("url", "/library/models/dna_double_helix.glb")
            .with_source(AssetSource::Internal);
        let inject = Action::new(ActionType::InjectLogic)
            .param("target", "dna model")
            .param("interaction", "clickable");
        exec.apply(&[add, inject.clone()]).await;
        let first = exec.snapshot().await;
        let report = exec.apply(&[inject]).await;
        let second = exec.snapshot().await;

        assert!(report.skipped.is_empty());
        assert_eq!(first.assets[0].interactions, second.assets[0].interactions);
        assert_eq!(second.assets[0].interactions.len(), 1);

        let by_uid = Action::new(ActionType::InjectLogic)
            .param("target", second.assets[0].uid.as_str())
            .param("interaction", "quiz");
        exec.apply(&[by_uid]).await;
        assert_eq!(exec.snapshot().await.assets[0].interactions.len(), 2);
    }

    #[tokio::test]
    async fn test_environment_actions() {
        let exec = executor(ScriptedGenerationApi::new(), 2);
        exec.apply(&[
            Action::new(ActionType::SetEnvironment).param("model", "classroom.glb"),
            Action::new(ActionType::GenerateSkybox).param("prompt", "meadow outside"),
            Action::new(ActionType::UpdateSkybox).param("prompt", "starry night"),
        ])
        .await;
        let snap = exec.snapshot().await;
        assert_eq!(snap.environment.environment_model.as_deref(), Some("classroom.glb"));
        assert_eq!(snap.environment.skybox_prompt.as_deref(), Some("starry night"));
    }

    #[tokio::test]
    async fn test_new_lesson_replaces_previous_environment() {
        let exec = executor(ScriptedGenerationApi::new(), 2);
        let lab = Action::new(ActionType::AddAsset)
            .param("name", "beaker")
            .param("url", "/models/beaker.glb")
            .with_source(AssetSource::Local);
        exec.apply(&[
            Action::new(ActionType::DisplayLessonPlan),
            lab,
            Action::new(ActionType::SetEnvironment).param("model", "classroom.glb"),
            Action::new(ActionType::GenerateSkybox).param("prompt", "campus lawn outside"),
            Action::new(ActionType::CreateLesson).param("topic", "acids"),
        ])
        .await;
        assert_eq!(exec.environment_model().await.as_deref(), Some("classroom.glb"));

        // 第二课是 IMMERSIVE：没有 SET_ENVIRONMENT
        exec.apply(&[
            Action::new(ActionType::DisplayLessonPlan),
            Action::new(ActionType::GenerateSkybox).param("prompt", "deep ocean trench"),
            Action::new(ActionType::CreateLesson).param("topic", "tides"),
        ])
        .await;
        let snap = exec.snapshot().await;
        assert!(snap.environment.environment_model.is_none());
        assert_eq!(snap.environment.skybox_prompt.as_deref(), Some("deep ocean trench"));
        assert!(snap.assets.is_empty());
        assert_eq!(snap.lesson.as_ref().unwrap()["topic"], "tides");
    }

    #[tokio::test]
    async fn test_new_lesson_discards_previous_generations() {
        let api = ScriptedGenerationApi::new().with_preview(vec![
            Ok(RemoteTaskStatus::running(10)),
            Ok(RemoteTaskStatus::running(20)),
            Ok(RemoteTaskStatus::succeeded("https://gen.local/old.glb")),
        ]);
        let exec = executor(api, 2);
        exec.apply(&[Action::new(ActionType::DisplayLessonPlan), generate("old prop", "old prop")])
            .await;
        exec.apply(&[Action::new(ActionType::DisplayLessonPlan)]).await;
        exec.settle().await;

        let snap = exec.snapshot().await;
        assert!(snap.assets.is_empty());
        assert!(snap.failed.is_empty());
    }
}
