//! 场景规划器：一次结构化输出调用得到课程规划，再逐个资产走分级解析
//!
//! 输出 Schema 由 schemars 从 RawScenePlan 生成并拼入 system prompt，减少格式错误；
//! 无论模型输出质量如何，都经 normalize_plan 收敛为满足不变量的规划。

use std::sync::Arc;

use schemars::schema_for;

use crate::core::OrchestratorError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::resolver::{AssetResolver, ResolvedAsset};
use crate::scene::plan::{normalize_plan, parse_raw_plan, RawScenePlan, ScenePlan};

const PLANNER_PROMPT: &str = r#"You design immersive 3D lessons for a learning-scene editor.

Given the user's request, return ONE JSON object and nothing else. Rules:
1. game_atmosphere.theme is a game-like setting for the lesson and must NOT be the lesson topic itself
   (for "DNA" use something like "Bio-Lab Expedition", never "DNA").
2. Choose exactly one environment mode:
   - IMMERSIVE: interior_model is null, skybox_prompt describes the whole surrounding atmosphere.
   - ARCHITECTURAL: interior_model is a building model file (e.g. "classroom.glb"), and skybox_prompt
     describes ONLY what is visible outside the windows.
3. educational_assets are curriculum objects with short search keywords and a category (subject).
4. decorative_props are 2-3 purely atmospheric objects matching the theme, each with a generation prompt.
5. interactions reference educational assets by name; type is one of clickable, draggable, quiz, highlight.
6. curriculum names the standard, grade and subject.

JSON schema:
"#;

/// 完成分级解析的规划：编译器只接受这个类型，保证每个资产都解析过
#[derive(Debug, Clone)]
pub struct ResolvedPlan {
    pub plan: ScenePlan,
    /// 与 plan.educational_assets 一一对应
    pub educational: Vec<ResolvedAsset>,
    /// 与 plan.decorative_props 一一对应，来源恒为 ai_generated
    pub props: Vec<ResolvedAsset>,
}

/// 返回规划输出的 JSON Schema 字符串，可拼入 system prompt
pub fn scene_plan_schema_json() -> String {
    let schema = schema_for!(RawScenePlan);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 场景规划器
pub struct ScenePlanGenerator {
    llm: Arc<dyn LlmClient>,
    resolver: Arc<AssetResolver>,
    system_prompt: String,
}

impl ScenePlanGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, resolver: Arc<AssetResolver>) -> Self {
        Self {
            llm,
            resolver,
            system_prompt: format!("{}{}", PLANNER_PROMPT, scene_plan_schema_json()),
        }
    }

    /// 规划 + 解析；LLM 调用失败时返回上游错误（不产生部分结果）
    pub async fn generate(
        &self,
        utterance: &str,
        history: &[Message],
    ) -> Result<ResolvedPlan, OrchestratorError> {
        let mut messages = vec![Message::system(self.system_prompt.clone())];
        messages.extend(history.iter().cloned());
        messages.push(Message::user(utterance));

        let output = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| OrchestratorError::Upstream(format!("scene planning failed: {e}")))?;

        let plan = normalize_plan(parse_raw_plan(&output), utterance);
        tracing::info!(
            "Planned '{}' ({:?}): {} educational assets, {} props, {} interactions",
            plan.topic,
            plan.environment.mode(),
            plan.educational_assets.len(),
            plan.decorative_props.len(),
            plan.interactions.len()
        );

        Ok(self.resolve(plan))
    }

    /// 每个教学资产走 internal → local → 生成；装饰道具直接生成
    pub fn resolve(&self, plan: ScenePlan) -> ResolvedPlan {
        let educational = plan
            .educational_assets
            .iter()
            .map(|a| self.resolver.resolve_educational(a))
            .collect();
        let props = plan
            .decorative_props
            .iter()
            .map(|p| self.resolver.resolve_prop(p))
            .collect();
        ResolvedPlan {
            plan,
            educational,
            props,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::scene::AssetSource;

    const DNA_PLAN: &str = r#"Here you go:
```json
{
  "topic": "DNA",
  "curriculum": {"standard": "NGSS HS-LS1-1", "grade": "9", "subject": "Biology"},
  "game_atmosphere": {"theme": "Bio-Lab Expedition", "mood": "mysterious"},
  "educational_assets": [
    {"name": "DNA model", "keywords": ["dna", "helix"], "category": "biology"},
    {"name": "Microscope", "keywords": ["microscope"]},
    {"name": "Ribosome", "keywords": ["ribosome"], "description": "purple blob"}
  ],
  "decorative_props": [{"name": "bubbling flask", "prompt": "green bubbling flask"}],
  "environment": {"mode": "IMMERSIVE", "skybox_prompt": "bioluminescent cave lab"},
  "interactions": [{"target": "DNA model", "type": "clickable", "purpose": "unzip strands"}]
}
```"#;

    #[test]
    fn test_schema_mentions_plan_fields() {
        let schema = scene_plan_schema_json();
        assert!(schema.contains("game_atmosphere"));
        assert!(schema.contains("decorative_props"));
    }

    #[tokio::test]
    async fn test_generate_resolves_every_asset_in_tier_order() {
        let llm = Arc::new(MockLlmClient::with_responses([DNA_PLAN]));
        let generator = ScenePlanGenerator::new(llm, Arc::new(AssetResolver::builtin()));

        let resolved = generator.generate("build a lesson about DNA", &[]).await.unwrap();
        let sources: Vec<_> = resolved.educational.iter().map(|a| a.source).collect();
        assert_eq!(
            sources,
            vec![AssetSource::Internal, AssetSource::Local, AssetSource::AiGenerated]
        );
        assert_eq!(resolved.props.len(), 2);
        assert!(resolved.props.iter().all(|p| p.source == AssetSource::AiGenerated));
        assert_eq!(resolved.plan.environment.skybox_prompt, "bioluminescent cave lab");
    }

    #[tokio::test]
    async fn test_upstream_failure_propagates() {
        let mock = MockLlmClient::new();
        mock.push_failure("503 from upstream");
        let generator = ScenePlanGenerator::new(Arc::new(mock), Arc::new(AssetResolver::builtin()));
        let err = generator.generate("lesson about DNA", &[]).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Upstream(_)));
    }
}
