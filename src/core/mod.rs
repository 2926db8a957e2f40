//! 核心编排层：错误类型、请求协议、会话注册、编排器与构建器

pub mod builder;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod protocol;
pub mod session;

pub use builder::OrchestratorBuilder;
pub use error::{CatalogError, GenerationError, OrchestratorError, StoreError, SubmitError};
pub use orchestrator::{LlmPipeline, PipelineSettings, SceneOrchestrator};
pub use protocol::{ChatRequest, ChatResponse, ExportResponse};
pub use session::{SessionHandle, SessionRegistry};
