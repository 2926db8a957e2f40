//! 场景层：规划模型、规划器、环境校验、Action 编译与执行

pub mod action;
pub mod compiler;
pub mod executor;
pub mod plan;
pub mod planner;
pub mod validator;

pub use action::{Action, ActionType, AssetSource, UpdateType};
pub use compiler::{ActionCompiler, CompiledActions, DualLayerEnvView, ScenePlanView};
pub use executor::{ActionExecutor, ApplyReport, AssetStatus, SceneAsset, SceneSnapshot};
pub use plan::{
    normalize_plan, CurriculumMeta, DecorativeProp, DualLayerEnvironment, EducationalAsset,
    EnvironmentMode, GameAtmosphere, Interaction, ScenePlan,
};
pub use planner::{ResolvedPlan, ScenePlanGenerator};
pub use validator::{EnvironmentValidator, KeywordEnvironmentValidator, ValidationResult};
