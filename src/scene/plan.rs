//! 场景规划数据模型
//!
//! RawScenePlan 是 LLM 结构化输出的宽松形状（字段全部可缺省）；
//! normalize_plan 把它收敛为 ScenePlan，并保证：
//! - 游戏氛围主题存在且不等于课程主题字面值
//! - 双层环境二选一：IMMERSIVE（无室内模型）或 ARCHITECTURAL（有室内模型，天空盒只描述窗外）
//! - 装饰道具 2–3 个
//! - 天空盒 prompt 非空

use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 装饰道具数量区间
pub const MIN_DECORATIVE_PROPS: usize = 2;
pub const MAX_DECORATIVE_PROPS: usize = 3;

const FALLBACK_PROPS: &[&str] = &[
    "floating lanterns",
    "glowing crystal cluster",
    "ancient stone pillar",
    "potted fern",
];

/// 课程元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CurriculumMeta {
    #[serde(default)]
    pub standard: String,
    #[serde(default)]
    pub grade: String,
    #[serde(default)]
    pub subject: String,
}

/// 游戏氛围：主题与情绪
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GameAtmosphere {
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub mood: String,
}

/// 教学资产（来源由解析器决定，规划中不携带来源）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EducationalAsset {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// 该资产在课程中的作用
    #[serde(default)]
    pub purpose: Option<String>,
    /// 外观描述，生成兜底时拼入 prompt
    #[serde(default)]
    pub description: Option<String>,
}

impl EducationalAsset {
    pub fn generation_prompt(&self) -> String {
        match self.description.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(desc) => format!("{}, {}, educational 3D model", self.name, desc.trim()),
            None => format!("{}, accurate educational 3D model", self.name),
        }
    }
}

/// 装饰道具：只为氛围服务，永远走 AI 生成
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DecorativeProp {
    pub name: String,
    #[serde(default)]
    pub prompt: String,
}

/// 交互声明：对某个资产注入的逻辑
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Interaction {
    pub target: String,
    #[serde(rename = "type", default)]
    pub interaction_type: String,
    #[serde(default)]
    pub purpose: String,
}

/// 双层环境模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvironmentMode {
    Immersive,
    Architectural,
}

/// 双层环境：可选的室内模型层 + 必有的天空盒层
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualLayerEnvironment {
    pub interior_model: Option<String>,
    pub skybox_prompt: String,
}

impl DualLayerEnvironment {
    pub fn mode(&self) -> EnvironmentMode {
        if self.interior_model.is_some() {
            EnvironmentMode::Architectural
        } else {
            EnvironmentMode::Immersive
        }
    }
}

/// 收敛后的场景规划
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenePlan {
    pub topic: String,
    pub curriculum: CurriculumMeta,
    pub game_atmosphere: GameAtmosphere,
    pub educational_assets: Vec<EducationalAsset>,
    pub decorative_props: Vec<DecorativeProp>,
    pub environment: DualLayerEnvironment,
    pub interactions: Vec<Interaction>,
    /// 模型给出的规划说明（可空）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// LLM 输出中的环境段
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct RawEnvironment {
    /// "IMMERSIVE" 或 "ARCHITECTURAL"
    #[serde(default)]
    pub mode: Option<String>,
    /// ARCHITECTURAL 时的室内模型文件名，如 classroom.glb
    #[serde(default)]
    pub interior_model: Option<String>,
    /// IMMERSIVE：完整氛围；ARCHITECTURAL：只描述窗外景色
    #[serde(default)]
    pub skybox_prompt: Option<String>,
}

/// LLM 结构化输出形状（所有字段可缺省，由 normalize_plan 兜底）
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct RawScenePlan {
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub curriculum: Option<CurriculumMeta>,
    #[serde(default)]
    pub game_atmosphere: Option<GameAtmosphere>,
    #[serde(default)]
    pub educational_assets: Vec<EducationalAsset>,
    #[serde(default)]
    pub decorative_props: Vec<DecorativeProp>,
    #[serde(default)]
    pub environment: Option<RawEnvironment>,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

/// 从文本中取出 JSON 对象（```json ... ``` 或首个 { 到最后一个 }）
pub fn extract_json_block(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析 LLM 输出；无法解析时返回空规划（由归一化兜底所有字段）
pub fn parse_raw_plan(output: &str) -> RawScenePlan {
    match extract_json_block(output).map(serde_json::from_str::<RawScenePlan>) {
        Some(Ok(plan)) => plan,
        Some(Err(e)) => {
            tracing::warn!("Scene plan JSON invalid ({}), falling back to defaults", e);
            RawScenePlan::default()
        }
        None => {
            tracing::warn!("Scene plan output contained no JSON, falling back to defaults");
            RawScenePlan::default()
        }
    }
}

static TOPIC_MARKER_RE: OnceLock<Regex> = OnceLock::new();

fn topic_marker_re() -> &'static Regex {
    TOPIC_MARKER_RE.get_or_init(|| {
        Regex::new(r"(?i)\s(?:about|on|of)\s+(.+)$").expect("topic marker pattern")
    })
}

/// 从请求句中粗取课程主题（去掉 build a lesson about 之类的前缀）
pub fn topic_from_utterance(utterance: &str) -> String {
    let topic = topic_marker_re()
        .captures(utterance)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().trim_end_matches(['.', '!', '?']))
        .filter(|t| !t.is_empty());
    match topic {
        Some(topic) => topic.to_string(),
        None => utterance.trim().trim_end_matches(['.', '!', '?']).to_string(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn prop_prompt(name: &str, atmosphere: &GameAtmosphere) -> String {
    format!(
        "{}, {} style, {} mood, stylized 3D prop",
        name, atmosphere.theme, atmosphere.mood
    )
}

/// 把原始规划收敛为满足全部不变量的 ScenePlan
pub fn normalize_plan(raw: RawScenePlan, utterance: &str) -> ScenePlan {
    let topic = non_empty(raw.topic).unwrap_or_else(|| topic_from_utterance(utterance));

    let mut game_atmosphere = raw.game_atmosphere.unwrap_or_default();
    game_atmosphere.theme = game_atmosphere.theme.trim().to_string();
    if game_atmosphere.theme.is_empty()
        || game_atmosphere.theme.eq_ignore_ascii_case(topic.trim())
    {
        game_atmosphere.theme = format!("Explorer's Quest: {topic}");
    }
    if game_atmosphere.mood.trim().is_empty() {
        game_atmosphere.mood = "curious".to_string();
    }

    let educational_assets: Vec<EducationalAsset> = raw
        .educational_assets
        .into_iter()
        .filter(|a| !a.name.trim().is_empty())
        .collect();

    let mut decorative_props: Vec<DecorativeProp> = Vec::new();
    for mut prop in raw.decorative_props {
        prop.name = prop.name.trim().to_string();
        if prop.name.is_empty()
            || decorative_props
                .iter()
                .any(|p| p.name.eq_ignore_ascii_case(&prop.name))
        {
            continue;
        }
        if prop.prompt.trim().is_empty() {
            prop.prompt = prop_prompt(&prop.name, &game_atmosphere);
        }
        decorative_props.push(prop);
    }
    decorative_props.truncate(MAX_DECORATIVE_PROPS);
    for name in FALLBACK_PROPS {
        if decorative_props.len() >= MIN_DECORATIVE_PROPS {
            break;
        }
        if decorative_props.iter().any(|p| p.name.eq_ignore_ascii_case(name)) {
            continue;
        }
        decorative_props.push(DecorativeProp {
            name: name.to_string(),
            prompt: prop_prompt(name, &game_atmosphere),
        });
    }

    let raw_env = raw.environment.unwrap_or_default();
    let architectural = raw_env
        .mode
        .as_deref()
        .map(|m| m.trim().eq_ignore_ascii_case("architectural"))
        .unwrap_or(false);
    let interior_model = if architectural {
        non_empty(raw_env.interior_model)
    } else {
        None
    };
    let skybox_prompt = non_empty(raw_env.skybox_prompt).unwrap_or_else(|| {
        if interior_model.is_some() {
            format!(
                "Outside view of a {} landscape, {} lighting, distant horizon",
                game_atmosphere.theme, game_atmosphere.mood
            )
        } else {
            format!(
                "{}, {} atmosphere, panoramic 360 environment",
                game_atmosphere.theme, game_atmosphere.mood
            )
        }
    });

    let interactions = raw
        .interactions
        .into_iter()
        .filter(|i| !i.target.trim().is_empty())
        .collect();

    ScenePlan {
        topic,
        curriculum: raw.curriculum.unwrap_or_default(),
        game_atmosphere,
        educational_assets,
        decorative_props,
        environment: DualLayerEnvironment {
            interior_model,
            skybox_prompt,
        },
        interactions,
        reasoning: non_empty(raw.reasoning),
    }
}
