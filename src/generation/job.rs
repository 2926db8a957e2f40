//! 生成任务状态机与结果类型
//!
//! QUEUED → PREVIEW_RUNNING → PREVIEW_SUCCEEDED → REFINE_RUNNING → REFINE_SUCCEEDED
//!                                                              ↘ DEGRADED（精修失败 / 超时，沿用预览模型）
//!        PREVIEW_RUNNING → PREVIEW_FAILED | EXPIRED | TIMED_OUT（终态失败）

use serde::Serialize;

/// 任务 ID
pub type JobId = String;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    PreviewRunning,
    PreviewSucceeded,
    RefineRunning,
    /// 终态：完整质量
    RefineSucceeded,
    /// 终态：精修失败，返回未贴图的预览模型并附带告警
    Degraded,
    /// 终态失败
    PreviewFailed,
    Expired,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::RefineSucceeded
                | JobStatus::Degraded
                | JobStatus::PreviewFailed
                | JobStatus::Expired
                | JobStatus::TimedOut
        )
    }

    /// 状态机允许的迁移
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, PreviewRunning)
                | (Queued, PreviewFailed)
                | (PreviewRunning, PreviewSucceeded)
                | (PreviewRunning, PreviewFailed)
                | (PreviewRunning, Expired)
                | (PreviewRunning, TimedOut)
                | (PreviewSucceeded, RefineRunning)
                | (PreviewSucceeded, Degraded)
                | (RefineRunning, RefineSucceeded)
                | (RefineRunning, Degraded)
        )
    }
}

/// 任务结果：调用方穷举匹配，不再检查零散的布尔 / warning 字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Succeeded { model_ref: String },
    /// 预览成功但精修失败：模型可用但没有贴图
    SucceededDegraded { model_ref: String, reason: String },
    Failed { reason: String },
    /// 提交时并发预算已满，没有创建任务
    RateLimited,
}

impl GenerationOutcome {
    pub fn model_ref(&self) -> Option<&str> {
        match self {
            GenerationOutcome::Succeeded { model_ref }
            | GenerationOutcome::SucceededDegraded { model_ref, .. } => Some(model_ref),
            GenerationOutcome::Failed { .. } | GenerationOutcome::RateLimited => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.model_ref().is_some()
    }
}

/// 任务快照（供状态查询接口）
#[derive(Debug, Clone, Serialize)]
pub struct GenerationJob {
    pub id: JobId,
    pub prompt: String,
    pub status: JobStatus,
    /// 整体进度：预览阶段占 0-50，精修阶段占 50-100
    pub progress: u8,
    pub preview_task_id: Option<String>,
    pub refine_task_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl GenerationJob {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: format!("job_{}", uuid::Uuid::new_v4()),
            prompt: prompt.into(),
            status: JobStatus::Queued,
            progress: 0,
            preview_task_id: None,
            refine_task_id: None,
            created_at: chrono::Utc::now(),
        }
    }

    /// 非法迁移被忽略并记录告警，状态不回退
    pub fn transition(&mut self, next: JobStatus) {
        if self.status.can_transition_to(next) {
            self.status = next;
            if matches!(next, JobStatus::PreviewSucceeded) {
                self.progress = self.progress.max(50);
            } else if matches!(next, JobStatus::RefineSucceeded | JobStatus::Degraded) {
                self.progress = 100;
            }
        } else {
            tracing::warn!(
                "Job {} ignored illegal transition {:?} -> {:?}",
                self.id,
                self.status,
                next
            );
        }
    }
}
