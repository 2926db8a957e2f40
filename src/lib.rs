//! Scenegen - 沉浸式课程场景生成编排器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、请求协议、会话注册、编排器与构建器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 有界对话记忆
//! - **intent**: 意图仲裁
//! - **catalog** / **resolver**: 内部资产库、本地缓存与分级解析
//! - **generation**: 两阶段 3D 模型生成服务客户端与任务管理器
//! - **scene**: 场景规划、环境校验、Action 编译与执行
//! - **store**: 场景导出存储

pub mod catalog;
pub mod config;
pub mod core;
pub mod generation;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod resolver;
pub mod scene;
pub mod store;

pub use crate::core::{OrchestratorBuilder, SceneOrchestrator};
