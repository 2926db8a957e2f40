//! 3D 模型生成服务客户端
//!
//! 两阶段接口：preview（几何预览）→ refine（贴图精修，以 preview 的 taskId 为输入）。
//! 两个阶段的状态查询返回同一结构：RUNNING | SUCCEEDED | FAILED | EXPIRED。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::GenerationSection;
use crate::core::GenerationError;

/// 生成任务的远端状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteState {
    Running,
    Succeeded,
    Failed,
    Expired,
}

/// 一次状态查询的结果
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTaskStatus {
    pub state: RemoteState,
    pub progress: u8,
    pub model_url: Option<String>,
    pub error: Option<String>,
}

impl RemoteTaskStatus {
    pub fn running(progress: u8) -> Self {
        Self {
            state: RemoteState::Running,
            progress,
            model_url: None,
            error: None,
        }
    }

    pub fn succeeded(model_url: impl Into<String>) -> Self {
        Self {
            state: RemoteState::Succeeded,
            progress: 100,
            model_url: Some(model_url.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: RemoteState::Failed,
            progress: 0,
            model_url: None,
            error: Some(error.into()),
        }
    }

    pub fn expired() -> Self {
        Self {
            state: RemoteState::Expired,
            progress: 0,
            model_url: None,
            error: None,
        }
    }
}

/// 生成服务接口；任务管理器只依赖这个 trait，测试中可替换为脚本化实现
#[async_trait]
pub trait GenerationApi: Send + Sync {
    /// 提交预览任务，返回 taskId
    async fn create_preview(&self, prompt: &str) -> Result<String, GenerationError>;

    /// 以预览 taskId 提交精修任务，返回新的 taskId
    async fn create_refine(&self, preview_task_id: &str) -> Result<String, GenerationError>;

    async fn task_status(&self, task_id: &str) -> Result<RemoteTaskStatus, GenerationError>;
}

#[derive(Debug, Deserialize)]
struct CreateTaskResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct ModelUrls {
    glb: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct TaskStatusResponse {
    status: String,
    #[serde(default)]
    progress: u8,
    model_urls: Option<ModelUrls>,
    task_error: Option<TaskError>,
}

/// 把服务端状态字符串映射为 RemoteState；PENDING / IN_PROGRESS 都视为运行中
fn parse_remote_state(status: &str) -> Result<RemoteState, GenerationError> {
    match status.to_ascii_uppercase().as_str() {
        "PENDING" | "IN_PROGRESS" | "RUNNING" | "QUEUED" => Ok(RemoteState::Running),
        "SUCCEEDED" => Ok(RemoteState::Succeeded),
        "FAILED" | "CANCELED" => Ok(RemoteState::Failed),
        "EXPIRED" => Ok(RemoteState::Expired),
        other => Err(GenerationError::Decode(format!("unknown task status {other}"))),
    }
}

/// HTTP 实现（text-to-3d 端点，Bearer 认证）
pub struct HttpGenerationClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    art_style: String,
    topology: String,
}

impl HttpGenerationClient {
    pub fn from_config(cfg: &GenerationSection) -> Self {
        let api_key = std::env::var(&cfg.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                "{} not set, model generation requests will fail",
                cfg.api_key_env
            );
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            art_style: cfg.art_style.clone(),
            topology: cfg.topology.clone(),
        }
    }

    fn key(&self) -> Result<&str, GenerationError> {
        self.api_key.as_deref().ok_or_else(|| GenerationError::Api {
            status: 401,
            message: "generation API key missing".to_string(),
        })
    }

    async fn create_task(&self, body: serde_json::Value) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(format!("{}/text-to-3d", self.base_url))
            .bearer_auth(self.key()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: CreateTaskResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Decode(e.to_string()))?;
        Ok(parsed.result)
    }
}

#[async_trait]
impl GenerationApi for HttpGenerationClient {
    async fn create_preview(&self, prompt: &str) -> Result<String, GenerationError> {
        self.create_task(json!({
            "mode": "preview",
            "prompt": prompt,
            "art_style": self.art_style,
            "topology": self.topology,
        }))
        .await
    }

    async fn create_refine(&self, preview_task_id: &str) -> Result<String, GenerationError> {
        self.create_task(json!({
            "mode": "refine",
            "preview_task_id": preview_task_id,
        }))
        .await
    }

    async fn task_status(&self, task_id: &str) -> Result<RemoteTaskStatus, GenerationError> {
        let response = self
            .client
            .get(format!("{}/text-to-3d/{}", self.base_url, task_id))
            .bearer_auth(self.key()?)
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: TaskStatusResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Decode(e.to_string()))?;

        Ok(RemoteTaskStatus {
            state: parse_remote_state(&body.status)?,
            progress: body.progress.min(100),
            model_url: body.model_urls.and_then(|u| u.glb),
            error: body.task_error.map(|e| e.message).filter(|m| !m.is_empty()),
        })
    }
}
