//! 流水线集成测试：脚本化 LLM + 脚本化生成服务，覆盖完整课程与各个局部更新分支

use std::sync::Arc;

use scenegen::config::AppConfig;
use scenegen::core::{ChatRequest, ChatResponse, OrchestratorBuilder, OrchestratorError, SubmitError};
use scenegen::generation::{GenerationJobManager, GenerationOutcome, PollPolicy, RemoteTaskStatus, ScriptedGenerationApi};
use scenegen::llm::MockLlmClient;
use scenegen::scene::{ActionType, AssetSource, AssetStatus, UpdateType};
use scenegen::store::InMemoryBlobStore;
use scenegen::SceneOrchestrator;

const DNA_PLAN: &str = r#"{
  "reasoning": "DNA is best explored hands-on in a lab setting",
  "topic": "DNA",
  "curriculum": {"standard": "NGSS HS-LS3-1", "grade": "10", "subject": "Biology"},
  "game_atmosphere": {"theme": "Bio-Lab Expedition", "mood": "mysterious"},
  "educational_assets": [
    {"name": "DNA model", "keywords": ["dna", "helix"], "category": "biology"},
    {"name": "Ribosome", "keywords": ["ribosome"], "description": "purple blob"}
  ],
  "decorative_props": [
    {"name": "bubbling flask", "prompt": "green bubbling flask"},
    {"name": "specimen jar", "prompt": "glass specimen jar"}
  ],
  "environment": {"mode": "ARCHITECTURAL", "interior_model": "classroom.glb", "skybox_prompt": "Classroom interior with desks"},
  "interactions": [{"target": "DNA model", "type": "clickable", "purpose": "unzip the strands"}]
}"#;

const OCEAN_PLAN: &str = r#"{
  "topic": "Tides",
  "game_atmosphere": {"theme": "Deep Sea Voyage", "mood": "calm"},
  "decorative_props": [{"name": "coral", "prompt": "pink coral"}, {"name": "shell", "prompt": "spiral shell"}],
  "environment": {"mode": "IMMERSIVE", "skybox_prompt": "Moonlit ocean with rolling waves"}
}"#;

struct Harness {
    orch: SceneOrchestrator,
    llm: Arc<MockLlmClient>,
    store: Arc<InMemoryBlobStore>,
}

fn harness(llm: MockLlmClient) -> Harness {
    let mut cfg = AppConfig::default();
    cfg.generation.poll_interval_ms = 1;
    cfg.generation.preview_max_attempts = 10;
    cfg.generation.refine_max_attempts = 10;

    let llm = Arc::new(llm);
    let store = Arc::new(InMemoryBlobStore::new());
    let orch = OrchestratorBuilder::new(cfg)
        .with_llm(llm.clone())
        .with_generation_api(Arc::new(ScriptedGenerationApi::new()))
        .with_store(store.clone())
        .build()
        .unwrap();
    Harness { orch, llm, store }
}

fn chat(input: &str) -> ChatRequest {
    ChatRequest {
        input: input.to_string(),
        conversation_id: "lesson-1".to_string(),
        history: None,
    }
}

fn types(resp: &ChatResponse) -> Vec<ActionType> {
    resp.actions.iter().map(|a| a.action_type).collect()
}

async fn settle(orch: &SceneOrchestrator) {
    let session = orch.sessions().get("lesson-1").await.unwrap();
    session.executor.settle().await;
}

#[tokio::test]
async fn starry_night_is_a_skybox_only_update() {
    let h = harness(MockLlmClient::new());
    let resp = h
        .orch
        .handle_chat(chat("Change the background to a starry night sky"))
        .await
        .unwrap();

    assert_eq!(resp.update_type, Some(UpdateType::SkyboxOnly));
    assert_eq!(types(&resp), vec![ActionType::UpdateSkybox, ActionType::ChatResponse]);
    let prompt = resp.actions[0].str_param("prompt").unwrap();
    assert!(prompt.contains("night") || prompt.contains("star"));
    assert!(resp.lesson_plan.is_none());
    assert_eq!(h.llm.calls(), 0);
}

#[tokio::test]
async fn add_microscope_resolves_from_local_cache() {
    let h = harness(MockLlmClient::new());
    let resp = h.orch.handle_chat(chat("Add a microscope")).await.unwrap();

    assert_eq!(resp.update_type, Some(UpdateType::AddAssets));
    let adds: Vec<_> = resp
        .actions
        .iter()
        .filter(|a| a.action_type == ActionType::AddAsset)
        .collect();
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].source, Some(AssetSource::Local));
    assert!(adds[0].str_param("url").unwrap().ends_with("microscope.glb"));

    let snap = h.orch.scene_snapshot("lesson-1").await.unwrap();
    assert_eq!(snap.assets.len(), 1);
    assert_eq!(snap.assets[0].status, AssetStatus::Ready);
}

#[tokio::test]
async fn full_lesson_then_partial_updates() {
    let h = harness(MockLlmClient::with_responses([DNA_PLAN]));
    let resp = h
        .orch
        .handle_chat(chat("Build a lesson about DNA"))
        .await
        .unwrap();

    assert_eq!(resp.update_type, Some(UpdateType::FullLesson));
    assert_eq!(resp.reasoning, "DNA is best explored hands-on in a lab setting");
    let kinds = types(&resp);
    assert_eq!(kinds.first(), Some(&ActionType::DisplayLessonPlan));
    assert_eq!(kinds[kinds.len() - 2], ActionType::CreateLesson);
    assert_eq!(kinds.last(), Some(&ActionType::ChatResponse));

    let plan = resp.lesson_plan.as_ref().unwrap();
    assert_ne!(plan.game_atmosphere.theme, plan.topic);
    let env = resp.dual_layer_env.as_ref().unwrap();
    assert_eq!(env.environment_model.as_deref(), Some("classroom.glb"));
    assert_eq!(
        env.skybox_prompt.as_deref(),
        Some("View through windows: Classroom interior with desks, visible through large windows, exterior vista")
    );

    let props: Vec<_> = resp
        .actions
        .iter()
        .filter(|a| a.action_type == ActionType::GenerateModel && a.bool_param("decorative"))
        .collect();
    assert_eq!(props.len(), 2);
    assert!(props.iter().all(|p| p.source == Some(AssetSource::AiGenerated)));

    settle(&h.orch).await;
    let snap = h.orch.scene_snapshot("lesson-1").await.unwrap();
    assert_eq!(snap.pending, 0);
    assert_eq!(snap.assets.len(), 4);
    assert_eq!(snap.environment.environment_model.as_deref(), Some("classroom.glb"));
    let ribosome = snap.assets.iter().find(|a| a.name == "Ribosome").unwrap();
    assert_eq!(ribosome.reference.as_deref(), Some("https://gen.local/refined.glb"));
    let dna = snap.assets.iter().find(|a| a.name == "DNA model").unwrap();
    assert!(dna.interactions.contains("clickable"));

    // 已有室内模型：新的天空盒同样经过一致性校验
    let resp = h
        .orch
        .handle_chat(chat("Change the sky to a cozy room interior"))
        .await
        .unwrap();
    assert!(resp.actions[0]
        .str_param("prompt")
        .unwrap()
        .starts_with("View through windows: "));

    let resp = h
        .orch
        .handle_chat(chat("make the DNA model draggable"))
        .await
        .unwrap();
    assert_eq!(resp.update_type, Some(UpdateType::ModifyInteractions));
    assert_eq!(types(&resp), vec![ActionType::InjectLogic, ActionType::ChatResponse]);
    let snap = h.orch.scene_snapshot("lesson-1").await.unwrap();
    let dna = snap.assets.iter().find(|a| a.name == "DNA model").unwrap();
    assert_eq!(dna.interactions.len(), 2);

    let exported = h.orch.export_scene("lesson-1").await.unwrap();
    assert_eq!(exported.id.len(), 8);
    let doc = h.store.get(&exported.id).unwrap();
    assert_eq!(doc["conversationId"], "lesson-1");
    assert_eq!(doc["scene"]["assets"].as_array().unwrap().len(), 4);

    assert!(h.orch.clear_session("lesson-1").await);
    assert!(h.orch.scene_snapshot("lesson-1").await.is_none());
}

#[tokio::test]
async fn immersive_lesson_drops_previous_interior() {
    let h = harness(MockLlmClient::with_responses([DNA_PLAN, OCEAN_PLAN]));
    h.orch.handle_chat(chat("Build a lesson about DNA")).await.unwrap();
    settle(&h.orch).await;
    assert_eq!(
        h.orch.scene_snapshot("lesson-1").await.unwrap().environment.environment_model.as_deref(),
        Some("classroom.glb")
    );

    let resp = h.orch.handle_chat(chat("Teach me about tides")).await.unwrap();
    assert!(resp.dual_layer_env.as_ref().unwrap().environment_model.is_none());
    settle(&h.orch).await;
    let snap = h.orch.scene_snapshot("lesson-1").await.unwrap();
    assert!(snap.environment.environment_model.is_none());
    assert!(snap.assets.iter().all(|a| a.name != "DNA model"));
    assert_eq!(snap.assets.len(), 2);

    let resp = h
        .orch
        .handle_chat(chat("Change the sky to a lava room"))
        .await
        .unwrap();
    assert_eq!(resp.actions[0].str_param("prompt"), Some("lava room"));
}

#[tokio::test]
async fn conversation_memory_stays_bounded() {
    let replies: Vec<String> = (0..12).map(|i| format!("reply {i}")).collect();
    let h = harness(MockLlmClient::with_responses(replies));
    for i in 0..12 {
        h.orch
            .handle_chat(chat(&format!("why is number {i} interesting?")))
            .await
            .unwrap();
    }
    let session = h.orch.sessions().get("lesson-1").await.unwrap();
    let memory = session.pipeline.lock().await;
    assert_eq!(memory.len(), 10);
    assert_eq!(memory.messages().last().unwrap().content, "reply 11");
}

#[tokio::test]
async fn upstream_failure_yields_empty_action_list() {
    let llm = MockLlmClient::new();
    llm.push_failure("502 bad gateway");
    let h = harness(llm);

    let err = h.orch.handle_chat(chat("hello there")).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Upstream(_)));
    let resp = ChatResponse::failure("lesson-1", err.to_string());
    assert!(resp.actions.is_empty());
    assert!(resp.reasoning.contains("502"));
}

#[tokio::test]
async fn refine_timeout_still_returns_preview_model() {
    let api = ScriptedGenerationApi::new()
        .with_preview(vec![Ok(RemoteTaskStatus::succeeded("https://gen.local/preview.glb"))])
        .with_refine(vec![Ok(RemoteTaskStatus::running(30))]);
    let manager = GenerationJobManager::new(
        Arc::new(api),
        2,
        PollPolicy {
            interval: std::time::Duration::from_millis(1),
            preview_max_attempts: 5,
            refine_max_attempts: 3,
        },
    );

    match manager.generate("a stone pillar").await {
        GenerationOutcome::SucceededDegraded { model_ref, reason } => {
            assert_eq!(model_ref, "https://gen.local/preview.glb");
            assert!(reason.starts_with("refine failed"));
        }
        other => panic!("expected degraded success, got {other:?}"),
    }
    assert_eq!(manager.in_flight(), 0);
}

#[tokio::test]
async fn third_concurrent_submit_is_rejected() {
    let api = Arc::new(ScriptedGenerationApi::new().with_preview(vec![Ok(RemoteTaskStatus::running(5))]));
    let manager = GenerationJobManager::new(api.clone(), 2, PollPolicy::default());

    let _a = manager.submit("first").unwrap();
    let _b = manager.submit("second").unwrap();
    assert_eq!(manager.in_flight(), 2);

    let rejected = manager.submit("third");
    assert!(matches!(rejected, Err(SubmitError::RateLimited { in_flight: 2 })));
    assert_eq!(manager.in_flight(), 2);
}
