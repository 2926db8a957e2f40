//! 模型生成层：两阶段生成服务客户端、任务状态机、并发受限的任务管理器

pub mod client;
pub mod job;
pub mod manager;
pub mod mock;

pub use client::{GenerationApi, HttpGenerationClient, RemoteState, RemoteTaskStatus};
pub use job::{GenerationJob, GenerationOutcome, JobId, JobStatus};
pub use manager::{GenerationJobManager, JobHandle, PollPolicy};
pub use mock::ScriptedGenerationApi;
