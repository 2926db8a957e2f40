//! 意图仲裁模块
//!
//! 把一句用户输入归入六种处理意图之一。先走关键词快速匹配（按优先级排列的规则表），
//! 未命中时调用一次 LLM 分类；LLM 输出为空或无法识别时回落到 CasualChat。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::OrchestratorError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::scene::UpdateType;

/// 识别出的意图类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    /// 完整课程：规划 + 资产 + 环境 + 交互
    NewLesson,
    /// 只换背景 / 天空盒
    SkyboxChange,
    /// 向现有场景添加资产
    AddAssets,
    /// 修改已有资产的交互
    ModifyScene,
    Question,
    CasualChat,
}

impl Intent {
    /// 按仲裁优先级排列（前者优先）
    pub const PRIORITY: [Intent; 6] = [
        Intent::NewLesson,
        Intent::SkyboxChange,
        Intent::AddAssets,
        Intent::ModifyScene,
        Intent::Question,
        Intent::CasualChat,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Intent::NewLesson => "NEW_LESSON",
            Intent::SkyboxChange => "SKYBOX_CHANGE",
            Intent::AddAssets => "ADD_ASSETS",
            Intent::ModifyScene => "MODIFY_SCENE",
            Intent::Question => "QUESTION",
            Intent::CasualChat => "CASUAL_CHAT",
        }
    }

    pub fn update_type(&self) -> UpdateType {
        match self {
            Intent::NewLesson => UpdateType::FullLesson,
            Intent::SkyboxChange => UpdateType::SkyboxOnly,
            Intent::AddAssets => UpdateType::AddAssets,
            Intent::ModifyScene => UpdateType::ModifyInteractions,
            Intent::Question | Intent::CasualChat => UpdateType::ChatOnly,
        }
    }
}

/// 按整词匹配（多词短语按连续词匹配），避免 "teacher's desk" 这类物体名误触发
const LESSON_PHRASES: &[&str] = &[
    "lesson",
    "lessons",
    "teach",
    "teaching",
    "lecture",
    "curriculum",
    "topic",
    "learn about",
    "course on",
    "class about",
    "class on",
];

const SKY_WORDS: &[&str] = &["sky", "skybox", "background", "backdrop", "horizon", "scenery"];

const ADD_PREFIXES: &[&str] = &["add ", "put ", "place ", "insert ", "spawn ", "include ", "bring in "];

const ADD_PHRASES: &[&str] = &["add a ", "add an ", "add some ", "add the ", "add two ", "add three "];

pub(crate) const INTERACTION_WORDS: &[&str] = &[
    "clickable",
    "draggable",
    "grabbable",
    "interactive",
    "rotatable",
    "quiz",
    "highlight",
    "animate",
];

const QUESTION_STARTS: &[&str] = &[
    "what", "why", "how", "who", "when", "where", "which", "is ", "are ", "can ", "does ", "do ",
    "explain",
];

const CLASSIFIER_PROMPT: &str = r#"You classify requests sent to an immersive-learning scene editor.

Output ONLY one of these labels (no explanation):
- NEW_LESSON: the user wants a lesson, to teach or learn a topic (wins over plain object mentions)
- SKYBOX_CHANGE: the user only wants to change the background, sky or surrounding atmosphere
- ADD_ASSETS: the user wants specific objects added to the current scene
- MODIFY_SCENE: the user wants to change behaviour or interactions of objects already in the scene
- QUESTION: the user asks a question that needs an answer, not a scene change
- CASUAL_CHAT: greetings, thanks, small talk, anything else

Output format: just the label, nothing else."#;

/// 单词边界切分（只保留字母数字）
fn words(input: &str) -> Vec<String> {
    input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// 把分类器输出规整为意图；多个标签同时出现时按 PRIORITY 取最高者，无法识别时为 CasualChat
pub fn parse_intent_label(output: &str) -> Intent {
    let normalized = output
        .trim()
        .to_uppercase()
        .replace(['-', ' '], "_");
    if normalized.is_empty() {
        return Intent::CasualChat;
    }
    Intent::PRIORITY
        .iter()
        .copied()
        .find(|intent| normalized.contains(intent.label()))
        .unwrap_or(Intent::CasualChat)
}

/// 意图仲裁器：无状态，同样的模型输出总是得到同样的意图
pub struct IntentArbiter {
    llm: Arc<dyn LlmClient>,
    /// 启用快速规则匹配（不调用 LLM）
    enable_fast_match: bool,
}

impl IntentArbiter {
    pub fn new(llm: Arc<dyn LlmClient>, enable_fast_match: bool) -> Self {
        Self {
            llm,
            enable_fast_match,
        }
    }

    /// 识别用户意图；只有 LLM 调用本身失败时返回错误（按上游服务失败处理）
    pub async fn classify(&self, user_input: &str) -> Result<Intent, OrchestratorError> {
        if self.enable_fast_match {
            if let Some(intent) = self.fast_match(user_input) {
                tracing::debug!("Intent fast match: {}", intent.label());
                return Ok(intent);
            }
        }

        let messages = vec![
            Message::system(CLASSIFIER_PROMPT),
            Message::user(format!("User input: {}", user_input)),
        ];
        let response = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| OrchestratorError::Upstream(format!("intent classification failed: {e}")))?;

        let intent = parse_intent_label(&response);
        tracing::debug!("Intent from classifier: {} (raw: {:?})", intent.label(), response.trim());
        Ok(intent)
    }

    /// 快速规则匹配（不调用 LLM）；规则顺序即优先级
    pub fn fast_match(&self, input: &str) -> Option<Intent> {
        let lower = input.trim().to_lowercase();
        if lower.is_empty() {
            return None;
        }
        let tokens = words(&lower);
        let has_word = |list: &[&str]| tokens.iter().any(|t| list.contains(&t.as_str()));

        let joined = format!(" {} ", tokens.join(" "));
        if LESSON_PHRASES
            .iter()
            .any(|p| joined.contains(format!(" {p} ").as_str()))
        {
            return Some(Intent::NewLesson);
        }

        if has_word(SKY_WORDS) {
            return Some(Intent::SkyboxChange);
        }

        if ADD_PREFIXES.iter().any(|p| lower.starts_with(p))
            || ADD_PHRASES.iter().any(|p| lower.contains(p))
        {
            return Some(Intent::AddAssets);
        }

        if has_word(INTERACTION_WORDS) {
            return Some(Intent::ModifyScene);
        }

        if lower.ends_with('?') || QUESTION_STARTS.iter().any(|p| lower.starts_with(p)) {
            return Some(Intent::Question);
        }

        None
    }
}
