//! HTTP 请求 / 响应形状（字段名与前端约定为 camelCase）

use serde::{Deserialize, Serialize};

use crate::memory::Message;
use crate::scene::{Action, DualLayerEnvView, ScenePlanView, UpdateType};

/// POST /chat 请求体
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub input: String,
    pub conversation_id: String,
    /// 客户端自带的历史；服务端会话为空时用它初始化对话记忆
    #[serde(default)]
    pub history: Option<Vec<Message>>,
}

/// POST /chat 响应体；失败路径同样是完整的响应对象
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub reasoning: String,
    pub actions: Vec<Action>,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lesson_plan: Option<ScenePlanView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_type: Option<UpdateType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dual_layer_env: Option<DualLayerEnvView>,
}

impl ChatResponse {
    /// 上游失败：空 actions + 可读的 reasoning
    pub fn failure(conversation_id: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            actions: Vec::new(),
            conversation_id: conversation_id.into(),
            lesson_plan: None,
            update_type: None,
            dual_layer_env: None,
        }
    }
}

/// 导出结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResponse {
    pub id: String,
    pub conversation_id: String,
}
