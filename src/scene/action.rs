//! Action List 数据模型：编排器产出、渲染端与执行器消费

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    SearchLibrary,
    GenerateModel,
    GenerateSkybox,
    SetEnvironment,
    AddAsset,
    InjectLogic,
    CreateLesson,
    DisplayLessonPlan,
    UpdateSkybox,
    ChatResponse,
}

/// 资产来源（解析层级），三者互斥
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetSource {
    Internal,
    Local,
    AiGenerated,
}

/// 本次请求对场景的更新范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateType {
    FullLesson,
    SkyboxOnly,
    AddAssets,
    ModifyInteractions,
    ChatOnly,
}

/// 单个动作：类型 + 不透明参数表 + 可选来源标签
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<AssetSource>,
}

impl Action {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            params: Map::new(),
            source: None,
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// 值为 None 时不写入
    pub fn param_opt(self, key: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.param(key, v),
            None => self,
        }
    }

    pub fn with_source(mut self, source: AssetSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn bool_param(&self, key: &str) -> bool {
        self.params.get(key).and_then(Value::as_bool).unwrap_or(false)
    }
}
