//! 生成任务管理器
//!
//! 全局并发预算用 Semaphore 表达：submit 时非阻塞 try_acquire，拿不到许可立即返回 RateLimited；
//! 每个任务由一个受监管的后台 task 驱动（提交 → 定时轮询 → 精修 → 降级判定），许可在到达终态时释放。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, Notify, OwnedSemaphorePermit, Semaphore};

use crate::config::GenerationSection;
use crate::core::SubmitError;
use crate::generation::client::{GenerationApi, RemoteState};
use crate::generation::job::{GenerationJob, GenerationOutcome, JobId, JobStatus};

/// 轮询策略：固定间隔，每个阶段各自的最大尝试次数
#[derive(Debug, Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub preview_max_attempts: u32,
    pub refine_max_attempts: u32,
}

impl PollPolicy {
    pub fn from_config(cfg: &GenerationSection) -> Self {
        Self {
            interval: Duration::from_millis(cfg.poll_interval_ms),
            preview_max_attempts: cfg.preview_max_attempts.max(1),
            refine_max_attempts: cfg.refine_max_attempts.max(1),
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&GenerationSection::default())
    }
}

/// submit 成功后返回的句柄；await_result 消费它
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    result: oneshot::Receiver<GenerationOutcome>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Preview,
    Refine,
}

impl Stage {
    /// 阶段内进度映射到整体进度
    fn overall_progress(&self, stage_progress: u8) -> u8 {
        let p = stage_progress.min(100) / 2;
        match self {
            Stage::Preview => p,
            Stage::Refine => 50 + p,
        }
    }
}

enum StageEnd {
    Succeeded(String),
    Failed(String),
    Expired,
    TimedOut(u32),
}

/// 持有一个并发许可；drop 时先归还许可，再唤醒等待空位的调用方
struct SlotGuard {
    permit: Option<OwnedSemaphorePermit>,
    released: Arc<Notify>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.released.notify_waiters();
    }
}

type JobTable = Arc<Mutex<HashMap<JobId, GenerationJob>>>;

/// 后台监管 task 的共享上下文
#[derive(Clone)]
struct Supervisor {
    api: Arc<dyn GenerationApi>,
    policy: PollPolicy,
    jobs: JobTable,
}

impl Supervisor {
    fn update(&self, id: &str, f: impl FnOnce(&mut GenerationJob)) {
        if let Ok(mut jobs) = self.jobs.lock() {
            if let Some(job) = jobs.get_mut(id) {
                f(job);
            }
        }
    }

    fn transition(&self, id: &str, next: JobStatus) {
        self.update(id, |job| job.transition(next));
    }

    async fn run(&self, id: &str, prompt: &str) -> GenerationOutcome {
        self.transition(id, JobStatus::PreviewRunning);

        let preview_task = match self.api.create_preview(prompt).await {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!("Job {} preview submission failed: {}", id, e);
                self.transition(id, JobStatus::PreviewFailed);
                return GenerationOutcome::Failed {
                    reason: format!("preview submission failed: {e}"),
                };
            }
        };
        self.update(id, |job| job.preview_task_id = Some(preview_task.clone()));

        let preview_url = match self
            .poll_stage(id, Stage::Preview, &preview_task, self.policy.preview_max_attempts)
            .await
        {
            StageEnd::Succeeded(url) => url,
            StageEnd::Failed(reason) => {
                self.transition(id, JobStatus::PreviewFailed);
                return GenerationOutcome::Failed {
                    reason: format!("preview failed: {reason}"),
                };
            }
            StageEnd::Expired => {
                self.transition(id, JobStatus::Expired);
                return GenerationOutcome::Failed {
                    reason: "preview task expired".to_string(),
                };
            }
            StageEnd::TimedOut(attempts) => {
                self.transition(id, JobStatus::TimedOut);
                return GenerationOutcome::Failed {
                    reason: format!("preview timed out after {attempts} poll attempts"),
                };
            }
        };
        self.transition(id, JobStatus::PreviewSucceeded);
        tracing::info!("Job {} preview ready, starting refine", id);

        // 从这里开始，调用方至少能拿到预览模型
        let refine_task = match self.api.create_refine(&preview_task).await {
            Ok(task) => task,
            Err(e) => return self.degrade(id, preview_url, format!("could not start: {e}")),
        };
        self.update(id, |job| job.refine_task_id = Some(refine_task.clone()));
        self.transition(id, JobStatus::RefineRunning);

        match self
            .poll_stage(id, Stage::Refine, &refine_task, self.policy.refine_max_attempts)
            .await
        {
            StageEnd::Succeeded(url) => {
                self.transition(id, JobStatus::RefineSucceeded);
                tracing::info!("Job {} refined model ready", id);
                GenerationOutcome::Succeeded { model_ref: url }
            }
            StageEnd::Failed(reason) => self.degrade(id, preview_url, reason),
            StageEnd::Expired => self.degrade(id, preview_url, "task expired".to_string()),
            StageEnd::TimedOut(attempts) => self.degrade(
                id,
                preview_url,
                format!("timed out after {attempts} poll attempts"),
            ),
        }
    }

    fn degrade(&self, id: &str, preview_url: String, cause: String) -> GenerationOutcome {
        tracing::warn!("Job {} refine failed ({}), using untextured preview", id, cause);
        self.transition(id, JobStatus::Degraded);
        GenerationOutcome::SucceededDegraded {
            model_ref: preview_url,
            reason: format!("refine failed: {cause}; using untextured preview model"),
        }
    }

    /// 固定间隔轮询一个阶段；瞬时错误计入尝试次数后继续，耗尽预算返回 TimedOut
    async fn poll_stage(&self, id: &str, stage: Stage, task_id: &str, max_attempts: u32) -> StageEnd {
        for attempt in 1..=max_attempts {
            tokio::time::sleep(self.policy.interval).await;

            match self.api.task_status(task_id).await {
                Ok(status) => match status.state {
                    RemoteState::Running => {
                        let progress = stage.overall_progress(status.progress);
                        self.update(id, |job| job.progress = job.progress.max(progress));
                        tracing::debug!(
                            "Job {} {:?} running {}% (attempt {}/{})",
                            id,
                            stage,
                            status.progress,
                            attempt,
                            max_attempts
                        );
                    }
                    RemoteState::Succeeded => {
                        return match status.model_url {
                            Some(url) => StageEnd::Succeeded(url),
                            None => StageEnd::Failed("task succeeded without a model url".to_string()),
                        };
                    }
                    RemoteState::Failed => {
                        return StageEnd::Failed(
                            status.error.unwrap_or_else(|| "generation failed".to_string()),
                        );
                    }
                    RemoteState::Expired => return StageEnd::Expired,
                },
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        "Job {} {:?} poll error (attempt {}/{}): {}",
                        id,
                        stage,
                        attempt,
                        max_attempts,
                        e
                    );
                }
                Err(e) => return StageEnd::Failed(e.to_string()),
            }
        }
        StageEnd::TimedOut(max_attempts)
    }
}

/// 生成任务管理器：唯一的共享可变资源是并发许可
pub struct GenerationJobManager {
    supervisor: Supervisor,
    slots: Arc<Semaphore>,
    budget: usize,
    slot_released: Arc<Notify>,
}

impl GenerationJobManager {
    pub fn new(api: Arc<dyn GenerationApi>, budget: usize, policy: PollPolicy) -> Self {
        let budget = budget.max(1);
        Self {
            supervisor: Supervisor {
                api,
                policy,
                jobs: Arc::new(Mutex::new(HashMap::new())),
            },
            slots: Arc::new(Semaphore::new(budget)),
            budget,
            slot_released: Arc::new(Notify::new()),
        }
    }

    pub fn from_config(api: Arc<dyn GenerationApi>, cfg: &GenerationSection) -> Self {
        Self::new(api, cfg.max_concurrent_jobs, PollPolicy::from_config(cfg))
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// 当前非终态任务数（已占用的许可）
    pub fn in_flight(&self) -> usize {
        self.budget - self.slots.available_permits()
    }

    /// 许可归还时被唤醒；被 RateLimited 的调用方先取 notified() 再重试 submit
    pub fn slot_released(&self) -> Arc<Notify> {
        self.slot_released.clone()
    }

    /// 非阻塞提交：预算已满时立即拒绝且不创建任务；需在 tokio 运行时内调用
    pub fn submit(&self, prompt: &str) -> Result<JobHandle, SubmitError> {
        let permit = self
            .slots
            .clone()
            .try_acquire_owned()
            .map_err(|_| SubmitError::RateLimited {
                in_flight: self.in_flight(),
            })?;
        let guard = SlotGuard {
            permit: Some(permit),
            released: self.slot_released.clone(),
        };

        let job = GenerationJob::new(prompt);
        let id = job.id.clone();
        if let Ok(mut jobs) = self.supervisor.jobs.lock() {
            jobs.insert(id.clone(), job);
        }
        tracing::info!("Job {} submitted ({}/{} slots)", id, self.in_flight(), self.budget);

        let (tx, rx) = oneshot::channel();
        let supervisor = self.supervisor.clone();
        let job_id = id.clone();
        let prompt = prompt.to_string();
        tokio::spawn(async move {
            let outcome = supervisor.run(&job_id, &prompt).await;
            drop(guard);
            if tx.send(outcome).is_err() {
                // 句柄已丢弃，没有人会来消费结果
                if let Ok(mut jobs) = supervisor.jobs.lock() {
                    jobs.remove(&job_id);
                }
            }
        });

        Ok(JobHandle { id, result: rx })
    }

    /// 等待任务到达终态并取走结果；结果被消费后任务记录随之销毁
    pub async fn await_result(&self, handle: JobHandle) -> GenerationOutcome {
        let JobHandle { id, result } = handle;
        let outcome = result.await.unwrap_or_else(|_| GenerationOutcome::Failed {
            reason: "job supervisor stopped unexpectedly".to_string(),
        });
        if let Ok(mut jobs) = self.supervisor.jobs.lock() {
            jobs.remove(&id);
        }
        outcome
    }

    /// submit + await_result；预算已满时返回 RateLimited
    pub async fn generate(&self, prompt: &str) -> GenerationOutcome {
        match self.submit(prompt) {
            Ok(handle) => self.await_result(handle).await,
            Err(SubmitError::RateLimited { .. }) => GenerationOutcome::RateLimited,
        }
    }

    /// 查询任务快照（终态且未被消费的任务仍可查到）
    pub fn status(&self, id: &str) -> Option<GenerationJob> {
        self.supervisor
            .jobs
            .lock()
            .ok()
            .and_then(|jobs| jobs.get(id).cloned())
    }
}
