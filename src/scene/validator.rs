//! 环境一致性校验
//!
//! 只有室内模型与天空盒同时存在时才检查：天空盒看起来在重复室内空间、又没有任何室外线索时，
//! 确定性地改写为「窗外视角」prompt。改写结果本身带室外线索，再次校验不会变化。

/// 校验结果：可能被改写的天空盒 prompt 与告警
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub skybox_prompt: Option<String>,
    pub warning: Option<String>,
}

/// 可替换的校验接口（例如换成基于显式 view 标签的严格检查）
pub trait EnvironmentValidator: Send + Sync {
    fn validate(&self, interior_model: Option<&str>, skybox_prompt: Option<&str>) -> ValidationResult;
}

/// 基于关键词的启发式校验
#[derive(Debug, Clone)]
pub struct KeywordEnvironmentValidator {
    interior_keywords: Vec<String>,
    exterior_cues: Vec<String>,
}

impl Default for KeywordEnvironmentValidator {
    fn default() -> Self {
        Self {
            interior_keywords: ["interior", "room", "inside", "indoor", "hallway", "corridor", "ceiling"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exterior_cues: ["window", "outside", "exterior", "horizon"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// 室内模型名：去目录与扩展名，`_`/`-` 换空格
fn model_stem(model: &str) -> String {
    let file = model.rsplit(['/', '\\']).next().unwrap_or(model);
    crate::catalog::normalize_name(file)
}

pub fn rewrite_as_window_view(prompt: &str) -> String {
    format!(
        "View through windows: {}, visible through large windows, exterior vista",
        prompt.trim()
    )
}

impl KeywordEnvironmentValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_redundant(&self, interior_model: &str, skybox: &str) -> bool {
        let text = skybox.to_lowercase();
        if self.exterior_cues.iter().any(|c| text.contains(c.as_str())) {
            return false;
        }
        let stem = model_stem(interior_model);
        let repeats_model = stem.chars().count() >= 3 && text.contains(stem.as_str());
        repeats_model || self.interior_keywords.iter().any(|k| text.contains(k.as_str()))
    }
}

impl EnvironmentValidator for KeywordEnvironmentValidator {
    fn validate(&self, interior_model: Option<&str>, skybox_prompt: Option<&str>) -> ValidationResult {
        let unchanged = ValidationResult {
            skybox_prompt: skybox_prompt.map(str::to_string),
            warning: None,
        };
        let (Some(model), Some(skybox)) = (interior_model, skybox_prompt) else {
            return unchanged;
        };
        if skybox.trim().is_empty() || !self.is_redundant(model, skybox) {
            return unchanged;
        }

        let rewritten = rewrite_as_window_view(skybox);
        let warning = format!(
            "skybox prompt repeated the interior of '{}'; rewritten as an exterior window view",
            model
        );
        tracing::warn!("Environment validation: {}", warning);
        ValidationResult {
            skybox_prompt: Some(rewritten),
            warning: Some(warning),
        }
    }
}
