//! 分级资产解析：内部资产库 → 本地静态缓存 → AI 生成（最后手段）
//!
//! 顺序是硬约束：两张目录都未命中之前绝不走生成。装饰道具例外，直接解析为生成。

use serde::Serialize;

use crate::catalog::{InternalCatalog, LocalCatalog};
use crate::scene::{AssetSource, DecorativeProp, EducationalAsset};

/// 目录解析层级；None 表示调用方必须回落到模型生成
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    Internal,
    Local,
    None,
}

/// 解析结果：来源唯一确定，reference 依来源分别是远程 URL、本地路径或生成 prompt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedAsset {
    pub name: String,
    pub source: AssetSource,
    pub reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// 教学用途说明（装饰道具为空）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    pub decorative: bool,
}

/// resolve 的返回：tier 与命中的资产（tier 为 None 时 asset 为空）
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub tier: ResolutionTier,
    pub asset: Option<ResolvedAsset>,
}

/// 资产解析器：只读两张目录，无状态
#[derive(Debug, Clone, Default)]
pub struct AssetResolver {
    internal: InternalCatalog,
    local: LocalCatalog,
}

impl AssetResolver {
    pub fn new(internal: InternalCatalog, local: LocalCatalog) -> Self {
        Self { internal, local }
    }

    pub fn builtin() -> Self {
        Self::new(InternalCatalog::builtin(), LocalCatalog::builtin())
    }

    /// 按 internal → local 顺序查找；都未命中时 tier = None
    pub fn resolve(&self, keywords: &[String], category: Option<&str>) -> Resolution {
        if let Some(entry) = self.internal.lookup(keywords, category) {
            return Resolution {
                tier: ResolutionTier::Internal,
                asset: Some(ResolvedAsset {
                    name: entry.name.clone(),
                    source: AssetSource::Internal,
                    reference: entry.url.clone(),
                    thumbnail: entry.thumbnail.clone(),
                    category: entry.category.clone(),
                    purpose: None,
                    decorative: false,
                }),
            };
        }

        if let Some(entry) = self.local.lookup(keywords) {
            return Resolution {
                tier: ResolutionTier::Local,
                asset: Some(ResolvedAsset {
                    name: entry.stem(),
                    source: AssetSource::Local,
                    reference: entry.path.clone(),
                    thumbnail: entry.thumbnail.clone(),
                    category: category.map(str::to_string),
                    purpose: None,
                    decorative: false,
                }),
            };
        }

        Resolution {
            tier: ResolutionTier::None,
            asset: None,
        }
    }

    /// 教学资产：目录命中则用目录资产（保留规划中的名称与用途），否则生成 prompt 兜底
    pub fn resolve_educational(&self, asset: &EducationalAsset) -> ResolvedAsset {
        let mut keywords = asset.keywords.clone();
        if !keywords.iter().any(|k| k.eq_ignore_ascii_case(&asset.name)) {
            keywords.insert(0, asset.name.clone());
        }

        let resolution = self.resolve(&keywords, asset.category.as_deref());
        match resolution.asset {
            Some(mut found) => {
                tracing::debug!(
                    "Resolved '{}' from {:?} catalog -> {}",
                    asset.name,
                    resolution.tier,
                    found.reference
                );
                found.name = asset.name.clone();
                found.purpose = asset.purpose.clone();
                if found.category.is_none() {
                    found.category = asset.category.clone();
                }
                found
            }
            None => {
                tracing::debug!("No catalog match for '{}', falling back to generation", asset.name);
                ResolvedAsset {
                    name: asset.name.clone(),
                    source: AssetSource::AiGenerated,
                    reference: asset.generation_prompt(),
                    thumbnail: None,
                    category: asset.category.clone(),
                    purpose: asset.purpose.clone(),
                    decorative: false,
                }
            }
        }
    }

    /// 装饰道具：跳过目录，直接解析为生成
    pub fn resolve_prop(&self, prop: &DecorativeProp) -> ResolvedAsset {
        ResolvedAsset {
            name: prop.name.clone(),
            source: AssetSource::AiGenerated,
            reference: prop.prompt.clone(),
            thumbnail: None,
            category: None,
            purpose: None,
            decorative: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, LocalEntry};

    fn kw(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn overlapping_resolver() -> AssetResolver {
        AssetResolver::new(
            InternalCatalog::new(vec![CatalogEntry {
                name: "Earth Globe".into(),
                keywords: kw(&["globe"]),
                category: Some("geography".into()),
                url: "/library/models/earth_globe.glb".into(),
                thumbnail: None,
            }]),
            LocalCatalog::new(vec![LocalEntry {
                file: "globe.glb".into(),
                path: "/models/globe.glb".into(),
                keywords: vec![],
                thumbnail: None,
            }]),
        )
    }

    #[test]
    fn test_internal_wins_over_local() {
        let resolver = overlapping_resolver();
        for _ in 0..3 {
            let r = resolver.resolve(&kw(&["globe"]), None);
            assert_eq!(r.tier, ResolutionTier::Internal);
            assert_eq!(r.asset.unwrap().source, AssetSource::Internal);
        }
    }

    #[test]
    fn test_local_then_none() {
        let resolver = AssetResolver::builtin();
        let r = resolver.resolve(&kw(&["microscope"]), None);
        assert_eq!(r.tier, ResolutionTier::Local);
        assert_eq!(r.asset.unwrap().reference, "/models/microscope.glb");

        let r = resolver.resolve(&kw(&["quantum flux capacitor"]), None);
        assert_eq!(r.tier, ResolutionTier::None);
        assert!(r.asset.is_none());
    }

    #[test]
    fn test_educational_fallback_is_generation() {
        let resolver = AssetResolver::builtin();
        let asset = EducationalAsset {
            name: "Ribosome".into(),
            keywords: kw(&["ribosome", "protein synthesis"]),
            category: Some("biology".into()),
            purpose: Some("show translation".into()),
            description: None,
        };
        let resolved = resolver.resolve_educational(&asset);
        assert_eq!(resolved.source, AssetSource::AiGenerated);
        assert!(resolved.reference.contains("Ribosome"));
    }

    #[test]
    fn test_props_never_hit_catalogs() {
        let resolver = AssetResolver::builtin();
        let prop = DecorativeProp {
            name: "microscope".into(),
            prompt: "brass steampunk microscope".into(),
        };
        let resolved = resolver.resolve_prop(&prop);
        assert_eq!(resolved.source, AssetSource::AiGenerated);
        assert!(resolved.decorative);
    }
}
