//! Action 编译器：规划 / 局部更新 → 有序 Action List
//!
//! 完整课程的顺序固定：
//! DISPLAY_LESSON_PLAN → 教学资产（ADD_ASSET / GENERATE_MODEL）→ 装饰道具 GENERATE_MODEL
//! → SET_ENVIRONMENT（仅 ARCHITECTURAL）→ GENERATE_SKYBOX → INJECT_LOGIC → CREATE_LESSON → CHAT_RESPONSE。
//! 局部更新不产生 DISPLAY_LESSON_PLAN / CREATE_LESSON；每个分支最后都有一条 CHAT_RESPONSE。

use std::sync::Arc;

use serde::Serialize;

use crate::resolver::{AssetResolver, ResolvedAsset};
use crate::scene::action::{Action, ActionType, AssetSource};
use crate::scene::plan::{
    CurriculumMeta, DecorativeProp, EnvironmentMode, GameAtmosphere, Interaction,
};
use crate::scene::planner::ResolvedPlan;
use crate::scene::validator::EnvironmentValidator;

/// 响应里的 dualLayerEnv（字段名保持 snake_case）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DualLayerEnvView {
    pub environment_model: Option<String>,
    pub skybox_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedAssetView {
    pub name: String,
    pub source: AssetSource,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentView {
    pub mode: EnvironmentMode,
    pub interior_model: Option<String>,
    pub skybox_prompt: String,
}

/// 给前端展示的课程规划（资产已带来源）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenePlanView {
    pub topic: String,
    pub curriculum: CurriculumMeta,
    pub game_atmosphere: GameAtmosphere,
    pub educational_assets: Vec<PlannedAssetView>,
    pub decorative_props: Vec<DecorativeProp>,
    pub environment: EnvironmentView,
    pub interactions: Vec<Interaction>,
}

/// 一次编译的产物
#[derive(Debug, Clone)]
pub struct CompiledActions {
    pub actions: Vec<Action>,
    /// 面向用户的简短说明，也是 CHAT_RESPONSE 的内容
    pub summary: String,
    pub lesson_plan: Option<ScenePlanView>,
    pub dual_layer_env: Option<DualLayerEnvView>,
}

fn chat_response(message: &str) -> Action {
    Action::new(ActionType::ChatResponse).param("message", message)
}

/// 已解析资产 → ADD_ASSET（目录命中）或 GENERATE_MODEL（生成兜底）
fn asset_action(asset: &ResolvedAsset) -> Action {
    let action = match asset.source {
        AssetSource::Internal | AssetSource::Local => Action::new(ActionType::AddAsset)
            .param("name", asset.name.as_str())
            .param("url", asset.reference.as_str())
            .param_opt("thumbnail", asset.thumbnail.clone())
            .param_opt("category", asset.category.clone())
            .param_opt("purpose", asset.purpose.clone()),
        AssetSource::AiGenerated => Action::new(ActionType::GenerateModel)
            .param("name", asset.name.as_str())
            .param("prompt", asset.reference.as_str())
            .param("decorative", asset.decorative)
            .param_opt("purpose", asset.purpose.clone()),
    };
    action.with_source(asset.source)
}

fn count_sources(assets: &[ResolvedAsset]) -> (usize, usize) {
    let from_catalog = assets
        .iter()
        .filter(|a| a.source != AssetSource::AiGenerated)
        .count();
    (from_catalog, assets.len() - from_catalog)
}

/// Action 编译器：除环境校验外是纯函数
pub struct ActionCompiler {
    validator: Arc<dyn EnvironmentValidator>,
    resolver: Arc<AssetResolver>,
}

impl ActionCompiler {
    pub fn new(validator: Arc<dyn EnvironmentValidator>, resolver: Arc<AssetResolver>) -> Self {
        Self {
            validator,
            resolver,
        }
    }

    pub fn validator(&self) -> &Arc<dyn EnvironmentValidator> {
        &self.validator
    }

    /// 完整课程
    pub fn compile_lesson(&self, resolved: &ResolvedPlan) -> CompiledActions {
        let plan = &resolved.plan;
        let interior = plan.environment.interior_model.as_deref();
        let validated = self
            .validator
            .validate(interior, Some(plan.environment.skybox_prompt.as_str()));
        let skybox_prompt = validated
            .skybox_prompt
            .unwrap_or_else(|| plan.environment.skybox_prompt.clone());

        let view = ScenePlanView {
            topic: plan.topic.clone(),
            curriculum: plan.curriculum.clone(),
            game_atmosphere: plan.game_atmosphere.clone(),
            educational_assets: resolved
                .educational
                .iter()
                .map(|a| PlannedAssetView {
                    name: a.name.clone(),
                    source: a.source,
                    reference: a.reference.clone(),
                    purpose: a.purpose.clone(),
                })
                .collect(),
            decorative_props: plan.decorative_props.clone(),
            environment: EnvironmentView {
                mode: plan.environment.mode(),
                interior_model: plan.environment.interior_model.clone(),
                skybox_prompt: skybox_prompt.clone(),
            },
            interactions: plan.interactions.clone(),
        };

        let mut actions = Vec::with_capacity(
            resolved.educational.len() + resolved.props.len() + plan.interactions.len() + 5,
        );
        actions.push(
            Action::new(ActionType::DisplayLessonPlan)
                .param("lessonPlan", serde_json::to_value(&view).unwrap_or_default()),
        );
        actions.extend(resolved.educational.iter().map(asset_action));
        actions.extend(resolved.props.iter().map(asset_action));

        if let Some(model) = interior {
            actions.push(Action::new(ActionType::SetEnvironment).param("model", model));
        }
        actions.push(
            Action::new(ActionType::GenerateSkybox)
                .param("prompt", skybox_prompt.as_str())
                .param("mood", plan.game_atmosphere.mood.as_str())
                .param_opt("warning", validated.warning.clone()),
        );

        for interaction in &plan.interactions {
            actions.push(
                Action::new(ActionType::InjectLogic)
                    .param("target", interaction.target.as_str())
                    .param("interaction", interaction.interaction_type.as_str())
                    .param("purpose", interaction.purpose.as_str()),
            );
        }

        actions.push(
            Action::new(ActionType::CreateLesson)
                .param("topic", plan.topic.as_str())
                .param("theme", plan.game_atmosphere.theme.as_str())
                .param(
                    "curriculum",
                    serde_json::to_value(&plan.curriculum).unwrap_or_default(),
                ),
        );

        let (from_catalog, generated) = count_sources(&resolved.educational);
        let summary = format!(
            "Built a \"{}\" lesson on {}: {} assets from the library, {} generated, {} decorative props, {} interactions.",
            plan.game_atmosphere.theme,
            plan.topic,
            from_catalog,
            generated,
            resolved.props.len(),
            plan.interactions.len()
        );
        actions.push(chat_response(&summary));

        CompiledActions {
            actions,
            summary,
            lesson_plan: Some(view),
            dual_layer_env: Some(DualLayerEnvView {
                environment_model: plan.environment.interior_model.clone(),
                skybox_prompt: Some(skybox_prompt),
            }),
        }
    }

    /// 只换天空盒；当前场景有室内模型时同样做一致性校验
    pub fn compile_skybox_change(&self, prompt: &str, interior_model: Option<&str>) -> CompiledActions {
        let validated = self.validator.validate(interior_model, Some(prompt));
        let prompt = validated.skybox_prompt.unwrap_or_else(|| prompt.to_string());
        let summary = format!("Changing the sky to: {prompt}");

        CompiledActions {
            actions: vec![
                Action::new(ActionType::UpdateSkybox)
                    .param("prompt", prompt.as_str())
                    .param_opt("warning", validated.warning),
                chat_response(&summary),
            ],
            summary,
            lesson_plan: None,
            dual_layer_env: Some(DualLayerEnvView {
                environment_model: interior_model.map(str::to_string),
                skybox_prompt: Some(prompt),
            }),
        }
    }

    /// 向场景添加具名资产；每个名称都按 internal → local → 生成 解析。
    /// 没有提取到名称时交给前端的资产库搜索
    pub fn compile_add_assets(&self, utterance: &str, names: &[String]) -> CompiledActions {
        if names.is_empty() {
            let summary = "I couldn't tell which objects to add, so I opened the asset library search.".to_string();
            return CompiledActions {
                actions: vec![
                    Action::new(ActionType::SearchLibrary).param("query", utterance.trim()),
                    chat_response(&summary),
                ],
                summary,
                lesson_plan: None,
                dual_layer_env: None,
            };
        }

        let resolved: Vec<ResolvedAsset> = names
            .iter()
            .map(|name| {
                self.resolver.resolve_educational(&crate::scene::EducationalAsset {
                    name: name.clone(),
                    ..Default::default()
                })
            })
            .collect();

        let mut actions: Vec<Action> = resolved.iter().map(asset_action).collect();
        let (from_catalog, generated) = count_sources(&resolved);
        let summary = format!(
            "Adding {}: {} from the library, {} generated.",
            names.join(", "),
            from_catalog,
            generated
        );
        actions.push(chat_response(&summary));

        CompiledActions {
            actions,
            summary,
            lesson_plan: None,
            dual_layer_env: None,
        }
    }

    /// 修改已有资产的交互；targets 由调用方对照当前场景筛选
    pub fn compile_modify(&self, interactions: &[Interaction]) -> CompiledActions {
        let mut actions: Vec<Action> = interactions
            .iter()
            .map(|i| {
                Action::new(ActionType::InjectLogic)
                    .param("target", i.target.as_str())
                    .param("interaction", i.interaction_type.as_str())
                    .param("purpose", i.purpose.as_str())
            })
            .collect();

        let summary = if interactions.is_empty() {
            "I couldn't find a matching object in the current scene to change.".to_string()
        } else {
            let changes: Vec<String> = interactions
                .iter()
                .map(|i| format!("{} is now {}", i.target, i.interaction_type))
                .collect();
            format!("Updated the scene: {}.", changes.join(", "))
        };
        actions.push(chat_response(&summary));

        CompiledActions {
            actions,
            summary,
            lesson_plan: None,
            dual_layer_env: None,
        }
    }

    /// 纯对话
    pub fn compile_chat(&self, reply: &str) -> CompiledActions {
        CompiledActions {
            actions: vec![chat_response(reply)],
            summary: reply.to_string(),
            lesson_plan: None,
            dual_layer_env: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::plan::{normalize_plan, RawScenePlan};
    use crate::scene::planner::ScenePlanGenerator;
    use crate::scene::validator::KeywordEnvironmentValidator;
    use crate::llm::MockLlmClient;

    fn compiler() -> ActionCompiler {
        ActionCompiler::new(
            Arc::new(KeywordEnvironmentValidator::new()),
            Arc::new(AssetResolver::builtin()),
        )
    }

    fn resolved_plan(json: &str, utterance: &str) -> ResolvedPlan {
        let raw: RawScenePlan = serde_json::from_str(json).unwrap();
        let generator = ScenePlanGenerator::new(
            Arc::new(MockLlmClient::new()),
            Arc::new(AssetResolver::builtin()),
        );
        generator.resolve(normalize_plan(raw, utterance))
    }

    fn types(actions: &[Action]) -> Vec<ActionType> {
        actions.iter().map(|a| a.action_type).collect()
    }

    #[test]
    fn test_lesson_order_architectural() {
        let resolved = resolved_plan(
            r#"{
                "topic": "Cells",
                "game_atmosphere": {"theme": "Micro Voyage", "mood": "wonder"},
                "educational_assets": [
                    {"name": "Animal Cell", "keywords": ["cell"]},
                    {"name": "Golgi apparatus", "keywords": ["golgi"]}
                ],
                "decorative_props": [{"name": "glowing vial", "prompt": "glowing vial"}, {"name": "brass lamp", "prompt": "brass lamp"}],
                "environment": {"mode": "ARCHITECTURAL", "interior_model": "classroom.glb", "skybox_prompt": "Classroom interior with desks"},
                "interactions": [{"target": "Animal Cell", "type": "clickable", "purpose": "inspect"}]
            }"#,
            "lesson about cells",
        );
        let compiled = compiler().compile_lesson(&resolved);

        assert_eq!(
            types(&compiled.actions),
            vec![
                ActionType::DisplayLessonPlan,
                ActionType::AddAsset,
                ActionType::GenerateModel,
                ActionType::GenerateModel,
                ActionType::GenerateModel,
                ActionType::SetEnvironment,
                ActionType::GenerateSkybox,
                ActionType::InjectLogic,
                ActionType::CreateLesson,
                ActionType::ChatResponse,
            ]
        );
        assert_eq!(compiled.actions[1].source, Some(AssetSource::Internal));
        assert_eq!(compiled.actions[2].source, Some(AssetSource::AiGenerated));
        assert!(compiled.actions[3].bool_param("decorative"));

        let skybox = compiled.actions[6].str_param("prompt").unwrap();
        assert!(skybox.starts_with("View through windows: "));
        assert!(compiled.actions[6].str_param("warning").is_some());

        let env = compiled.dual_layer_env.unwrap();
        assert_eq!(env.environment_model.as_deref(), Some("classroom.glb"));
        assert_eq!(env.skybox_prompt.as_deref(), Some(skybox));
    }

    #[test]
    fn test_lesson_immersive_has_no_set_environment() {
        let resolved = resolved_plan(r#"{"topic": "Volcanoes"}"#, "teach volcanoes");
        let compiled = compiler().compile_lesson(&resolved);
        let kinds = types(&compiled.actions);
        assert!(!kinds.contains(&ActionType::SetEnvironment));
        assert_eq!(kinds.iter().filter(|t| **t == ActionType::GenerateSkybox).count(), 1);
        assert_eq!(kinds.first(), Some(&ActionType::DisplayLessonPlan));
        assert_eq!(kinds.last(), Some(&ActionType::ChatResponse));

        let view = compiled.lesson_plan.unwrap();
        assert_ne!(view.game_atmosphere.theme, view.topic);
        assert!(compiled.dual_layer_env.unwrap().skybox_prompt.is_some());
    }

    #[test]
    fn test_skybox_change_is_short() {
        let compiled = compiler().compile_skybox_change("a starry night sky", None);
        assert_eq!(
            types(&compiled.actions),
            vec![ActionType::UpdateSkybox, ActionType::ChatResponse]
        );
        let prompt = compiled.actions[0].str_param("prompt").unwrap();
        assert!(prompt.contains("night") && prompt.contains("star"));
    }

    #[test]
    fn test_add_microscope_from_local_cache() {
        let compiled = compiler().compile_add_assets("Add a microscope", &["microscope".to_string()]);
        assert_eq!(types(&compiled.actions), vec![ActionType::AddAsset, ActionType::ChatResponse]);
        let add = &compiled.actions[0];
        assert_eq!(add.source, Some(AssetSource::Local));
        assert_eq!(add.str_param("url"), Some("/models/microscope.glb"));
    }

    #[test]
    fn test_add_without_names_searches_library() {
        let compiled = compiler().compile_add_assets("add some stuff", &[]);
        assert_eq!(
            types(&compiled.actions),
            vec![ActionType::SearchLibrary, ActionType::ChatResponse]
        );
    }

    #[test]
    fn test_chat_only() {
        let compiled = compiler().compile_chat("Hello there!");
        assert_eq!(types(&compiled.actions), vec![ActionType::ChatResponse]);
        assert_eq!(compiled.actions[0].str_param("message"), Some("Hello there!"));
    }
}
