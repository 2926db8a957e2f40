//! 场景导出存储：按生成的短 id 写入一次，不在流水线中回读

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::core::StoreError;

/// 短 id 长度
pub const SHORT_ID_LEN: usize = 8;

/// 8 位小写十六进制短 id
pub fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..SHORT_ID_LEN].to_string()
}

/// 不透明 blob 存储
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// 写入一个 JSON 文档，返回新分配的短 id
    async fn put(&self, value: &serde_json::Value) -> Result<String, StoreError>;
}

/// 目录存储：每个 blob 一个 `{id}.json`
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn put(&self, value: &serde_json::Value) -> Result<String, StoreError> {
        fs::create_dir_all(&self.root).await?;
        let body = serde_json::to_vec_pretty(value)?;

        // create_new：短 id 碰撞时换一个重试
        for _ in 0..4 {
            let id = short_id();
            let opened = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.path_for(&id))
                .await;
            match opened {
                Ok(mut file) => {
                    file.write_all(&body).await?;
                    file.flush().await?;
                    tracing::info!("Exported scene {} to {}", id, self.root.display());
                    return Ok(id);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "could not allocate a unique short id",
        )))
    }
}

/// 内存存储（测试与未配置导出目录时使用）
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<serde_json::Value> {
        self.blobs.lock().ok()?.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, value: &serde_json::Value) -> Result<String, StoreError> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| StoreError::Io(std::io::Error::other("blob table poisoned")))?;
        let mut id = short_id();
        while blobs.contains_key(&id) {
            id = short_id();
        }
        blobs.insert(id.clone(), value.clone());
        Ok(id)
    }
}
