//! 编排器构建器：从配置统一装配 LLM、目录、生成服务、存储
//!
//! CLI 与 HTTP 服务共用同一套装配逻辑；测试可逐项替换依赖。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{InternalCatalog, LocalCatalog};
use crate::config::AppConfig;
use crate::core::orchestrator::{LlmPipeline, PipelineSettings, SceneOrchestrator};
use crate::core::session::SessionRegistry;
use crate::core::CatalogError;
use crate::generation::{GenerationApi, GenerationJobManager, HttpGenerationClient};
use crate::intent::IntentArbiter;
use crate::llm::{create_llm_from_config, LlmClient};
use crate::resolver::AssetResolver;
use crate::scene::{ActionCompiler, EnvironmentValidator, KeywordEnvironmentValidator, ScenePlanGenerator};
use crate::store::{BlobStore, FileBlobStore};

const DEFAULT_EXPORT_DIR: &str = "workspace/scenes";

/// 编排器构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    generation: Option<Arc<dyn GenerationApi>>,
    store: Option<Arc<dyn BlobStore>>,
    validator: Option<Arc<dyn EnvironmentValidator>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            generation: None,
            store: None,
            validator: None,
        }
    }

    /// 指定 LLM（否则按配置与环境变量选择）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 指定生成服务（否则使用 HTTP 客户端）
    pub fn with_generation_api(mut self, api: Arc<dyn GenerationApi>) -> Self {
        self.generation = Some(api);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn EnvironmentValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// 目录：配置了文件就从文件加载，否则使用内置表
    pub fn load_resolver(&self) -> Result<AssetResolver, CatalogError> {
        let internal = match &self.config.catalog.internal_path {
            Some(path) => {
                let catalog = InternalCatalog::load_toml(path)?;
                tracing::info!(
                    "Loaded {} internal catalog entries from {}",
                    catalog.entries().len(),
                    path.display()
                );
                catalog
            }
            None => InternalCatalog::builtin(),
        };
        let local = match &self.config.catalog.local_path {
            Some(path) => {
                let catalog = LocalCatalog::load_toml(path)?;
                tracing::info!(
                    "Loaded {} local catalog entries from {}",
                    catalog.entries().len(),
                    path.display()
                );
                catalog
            }
            None => LocalCatalog::builtin(),
        };
        Ok(AssetResolver::new(internal, local))
    }

    pub fn build(self) -> Result<SceneOrchestrator, CatalogError> {
        let resolver = Arc::new(self.load_resolver()?);
        let cfg = &self.config;

        let llm = self.llm.clone().or_else(|| create_llm_from_config(cfg));
        if llm.is_none() {
            tracing::warn!(
                "No API key for LLM provider '{}'; chat requests will fail until one is set",
                cfg.llm.provider
            );
        }
        let pipeline = llm.map(|llm| LlmPipeline {
            arbiter: IntentArbiter::new(llm.clone(), cfg.intent.enable_fast_match),
            planner: ScenePlanGenerator::new(llm.clone(), resolver.clone()),
            chat: llm,
        });

        let api = self
            .generation
            .clone()
            .unwrap_or_else(|| Arc::new(HttpGenerationClient::from_config(&cfg.generation)));
        let manager = Arc::new(GenerationJobManager::from_config(api, &cfg.generation));

        let store = self.store.clone().unwrap_or_else(|| {
            let dir = cfg
                .app
                .export_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_DIR));
            Arc::new(FileBlobStore::new(dir))
        });
        let validator = self
            .validator
            .clone()
            .unwrap_or_else(|| Arc::new(KeywordEnvironmentValidator::new()));

        tracing::info!(
            "Orchestrator ready: {} concurrent generation jobs, history {}",
            manager.budget(),
            cfg.app.max_history
        );

        Ok(SceneOrchestrator::new(
            pipeline,
            ActionCompiler::new(validator, resolver),
            SessionRegistry::new(manager.clone(), cfg.app.max_history).with_limits(
                Duration::from_secs(cfg.app.session_idle_secs),
                cfg.app.max_sessions,
            ),
            manager,
            store,
            PipelineSettings {
                planner_context_turns: cfg.app.planner_context_turns,
                execute_actions: cfg.app.execute_actions,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ScriptedGenerationApi;
    use crate::llm::MockLlmClient;
    use crate::store::InMemoryBlobStore;
    use std::io::Write;

    #[test]
    fn test_catalog_files_override_builtin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"[[files]]
file = "sundial.glb"
path = "/models/sundial.glb"
keywords = ["sundial"]"#
        )
        .unwrap();

        let mut cfg = AppConfig::default();
        cfg.catalog.local_path = Some(file.path().to_path_buf());
        let resolver = OrchestratorBuilder::new(cfg).load_resolver().unwrap();
        let r = resolver.resolve(&["sundial".to_string()], None);
        assert_eq!(r.asset.unwrap().reference, "/models/sundial.glb");
        assert!(resolver.resolve(&["microscope".to_string()], None).asset.is_none());
    }

    #[test]
    fn test_missing_catalog_file_is_error() {
        let mut cfg = AppConfig::default();
        cfg.catalog.internal_path = Some(PathBuf::from("/definitely/not/here.toml"));
        assert!(matches!(
            OrchestratorBuilder::new(cfg).build(),
            Err(CatalogError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_build_with_overrides() {
        let orch = OrchestratorBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient::new()))
            .with_generation_api(Arc::new(ScriptedGenerationApi::new()))
            .with_store(Arc::new(InMemoryBlobStore::new()))
            .build()
            .unwrap();
        assert_eq!(orch.manager().budget(), 2);
        assert_eq!(orch.sessions().len().await, 0);
    }
}
