//! 脚本化生成服务（用于测试与离线运行，无需 API）
//!
//! 每个新任务拷贝一份状态脚本，每次查询弹出一条；只剩最后一条时一直返回它。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::GenerationError;
use crate::generation::client::{GenerationApi, RemoteTaskStatus};

type Script = Vec<Result<RemoteTaskStatus, GenerationError>>;

/// 脚本化生成服务
#[derive(Debug)]
pub struct ScriptedGenerationApi {
    preview: Script,
    refine: Script,
    /// prompt 含有指定子串时改用对应的预览脚本
    prompt_scripts: Vec<(String, Script)>,
    fail_preview_submission: bool,
    fail_refine_submission: bool,
    tasks: Mutex<HashMap<String, VecDeque<Result<RemoteTaskStatus, GenerationError>>>>,
    previews: AtomicUsize,
    refines: AtomicUsize,
}

impl Default for ScriptedGenerationApi {
    fn default() -> Self {
        Self {
            preview: vec![Ok(RemoteTaskStatus::succeeded("https://gen.local/preview.glb"))],
            refine: vec![Ok(RemoteTaskStatus::succeeded("https://gen.local/refined.glb"))],
            prompt_scripts: Vec::new(),
            fail_preview_submission: false,
            fail_refine_submission: false,
            tasks: Mutex::new(HashMap::new()),
            previews: AtomicUsize::new(0),
            refines: AtomicUsize::new(0),
        }
    }
}

impl ScriptedGenerationApi {
    /// 默认脚本：预览与精修各一次查询即成功
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preview(mut self, script: Script) -> Self {
        self.preview = script;
        self
    }

    pub fn with_refine(mut self, script: Script) -> Self {
        self.refine = script;
        self
    }

    pub fn with_prompt_script(mut self, needle: impl Into<String>, script: Script) -> Self {
        self.prompt_scripts.push((needle.into(), script));
        self
    }

    pub fn fail_preview_submission(mut self) -> Self {
        self.fail_preview_submission = true;
        self
    }

    pub fn fail_refine_submission(mut self) -> Self {
        self.fail_refine_submission = true;
        self
    }

    pub fn previews_created(&self) -> usize {
        self.previews.load(Ordering::SeqCst)
    }

    pub fn refines_created(&self) -> usize {
        self.refines.load(Ordering::SeqCst)
    }

    fn register(&self, task_id: &str, script: &Script) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.insert(task_id.to_string(), script.iter().cloned().collect());
        }
    }
}

#[async_trait]
impl GenerationApi for ScriptedGenerationApi {
    async fn create_preview(&self, prompt: &str) -> Result<String, GenerationError> {
        if self.fail_preview_submission {
            return Err(GenerationError::Network("preview endpoint unreachable".into()));
        }
        let n = self.previews.fetch_add(1, Ordering::SeqCst);
        let task_id = format!("preview-{n}");
        let script = self
            .prompt_scripts
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, s)| s)
            .unwrap_or(&self.preview);
        self.register(&task_id, script);
        Ok(task_id)
    }

    async fn create_refine(&self, _preview_task_id: &str) -> Result<String, GenerationError> {
        if self.fail_refine_submission {
            return Err(GenerationError::Network("refine endpoint unreachable".into()));
        }
        let n = self.refines.fetch_add(1, Ordering::SeqCst);
        let task_id = format!("refine-{n}");
        self.register(&task_id, &self.refine);
        Ok(task_id)
    }

    async fn task_status(&self, task_id: &str) -> Result<RemoteTaskStatus, GenerationError> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| GenerationError::Decode("script table poisoned".into()))?;
        let queue = tasks
            .get_mut(task_id)
            .ok_or_else(|| GenerationError::Api {
                status: 404,
                message: format!("unknown task {task_id}"),
            })?;
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        next.unwrap_or_else(|| Ok(RemoteTaskStatus::running(0)))
    }
}
