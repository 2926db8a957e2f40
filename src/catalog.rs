//! 资产目录：内部精选资产库（关键词 / 学科索引）与本地静态缓存表（文件名索引）
//!
//! 两张表都只读；可从 TOML 文件加载，未配置文件时使用内置表。

use std::path::Path;

use serde::Deserialize;

use crate::core::CatalogError;

/// 内部资产库条目
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// 学科分类，如 biology / astronomy
    #[serde(default)]
    pub category: Option<String>,
    pub url: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// 本地静态缓存条目（按文件名检索）
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LocalEntry {
    /// 文件名，如 microscope.glb
    pub file: String,
    pub path: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl LocalEntry {
    /// 去扩展名、下划线转空格后的小写名称
    pub fn stem(&self) -> String {
        normalize_name(&self.file)
    }
}

/// 去掉扩展名，`_`/`-` 换成空格，转小写
pub fn normalize_name(name: &str) -> String {
    let base = name.rsplit_once('.').map(|(b, _)| b).unwrap_or(name);
    base.replace(['_', '-'], " ").trim().to_lowercase()
}

#[derive(Debug, Deserialize)]
struct InternalFile {
    #[serde(default)]
    assets: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct LocalFile {
    #[serde(default)]
    files: Vec<LocalEntry>,
}

/// 内部精选资产库
#[derive(Debug, Clone, Default)]
pub struct InternalCatalog {
    entries: Vec<CatalogEntry>,
}

impl InternalCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// 从 TOML 文件加载：`[[assets]] name / keywords / category / url / thumbnail`
    pub fn load_toml(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path)?;
        let file: InternalFile = toml::from_str(&text)?;
        Ok(Self::new(file.assets))
    }

    pub fn builtin() -> Self {
        let entry = |name: &str, keywords: &[&str], category: &str, file: &str| CatalogEntry {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            category: Some(category.to_string()),
            url: format!("/library/models/{file}.glb"),
            thumbnail: Some(format!("/library/thumbnails/{file}.png")),
        };
        Self::new(vec![
            entry("DNA Double Helix", &["dna", "helix", "gene", "genetics", "chromosome"], "biology", "dna_double_helix"),
            entry("Human Heart", &["heart", "cardiac", "circulatory", "organ"], "biology", "human_heart"),
            entry("Plant Cell", &["plant cell", "chloroplast", "cell wall", "photosynthesis"], "biology", "plant_cell"),
            entry("Animal Cell", &["animal cell", "cell", "nucleus", "mitochondria"], "biology", "animal_cell"),
            entry("Human Skeleton", &["skeleton", "bones", "skull", "anatomy"], "biology", "human_skeleton"),
            entry("Solar System", &["solar system", "planets", "orbit", "sun"], "astronomy", "solar_system"),
            entry("Earth Globe", &["globe", "earth", "continents", "world map"], "geography", "earth_globe"),
            entry("Volcano Cross Section", &["volcano", "magma", "lava", "eruption"], "geography", "volcano_cross_section"),
            entry("Water Molecule", &["water molecule", "h2o", "molecule"], "chemistry", "water_molecule"),
            entry("Bohr Atom", &["atom", "electron", "proton", "neutron"], "chemistry", "bohr_atom"),
        ])
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// 关键词 / 学科匹配：每个命中关键词计 2 分，学科一致加 1 分，至少命中一个关键词；
    /// 同分取目录中靠前者，保证同样输入总得到同样结果
    pub fn lookup(&self, keywords: &[String], category: Option<&str>) -> Option<&CatalogEntry> {
        let wanted: Vec<String> = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if wanted.is_empty() {
            return None;
        }
        let category = category.map(|c| c.trim().to_lowercase());

        let mut best: Option<(usize, &CatalogEntry)> = None;
        for entry in &self.entries {
            let name = entry.name.to_lowercase();
            let hits = wanted
                .iter()
                .filter(|w| {
                    **w == name || entry.keywords.iter().any(|k| k.eq_ignore_ascii_case(w))
                })
                .count();
            if hits == 0 {
                continue;
            }
            let category_bonus = match (&category, &entry.category) {
                (Some(want), Some(have)) if want == &have.to_lowercase() => 1,
                _ => 0,
            };
            let score = hits * 2 + category_bonus;
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, entry));
            }
        }
        best.map(|(_, e)| e)
    }
}

/// 本地静态缓存表
#[derive(Debug, Clone, Default)]
pub struct LocalCatalog {
    entries: Vec<LocalEntry>,
}

impl LocalCatalog {
    pub fn new(entries: Vec<LocalEntry>) -> Self {
        Self { entries }
    }

    /// 从 TOML 文件加载：`[[files]] file / path / keywords / thumbnail`
    pub fn load_toml(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path)?;
        let file: LocalFile = toml::from_str(&text)?;
        Ok(Self::new(file.files))
    }

    pub fn builtin() -> Self {
        let entry = |file: &str, keywords: &[&str]| LocalEntry {
            file: file.to_string(),
            path: format!("/models/{file}"),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            thumbnail: None,
        };
        Self::new(vec![
            entry("microscope.glb", &["microscope", "lab equipment"]),
            entry("telescope.glb", &["telescope", "observatory"]),
            entry("beaker.glb", &["beaker", "flask", "glassware"]),
            entry("test_tube_rack.glb", &["test tube", "test tubes"]),
            entry("chalkboard.glb", &["chalkboard", "blackboard"]),
            entry("bookshelf.glb", &["bookshelf", "books", "library shelf"]),
            entry("classroom.glb", &["classroom", "school room"]),
            entry("laboratory.glb", &["laboratory", "science lab"]),
            entry("museum_hall.glb", &["museum", "exhibition hall"]),
        ])
    }

    pub fn entries(&self) -> &[LocalEntry] {
        &self.entries
    }

    /// 名称 / 关键词子串匹配（关键词至少 3 个字符），按表中顺序取第一条
    pub fn lookup(&self, keywords: &[String]) -> Option<&LocalEntry> {
        let wanted: Vec<String> = keywords
            .iter()
            .map(|k| normalize_name(k))
            .filter(|k| k.chars().count() >= 3)
            .collect();

        self.entries.iter().find(|entry| {
            let stem = entry.stem();
            wanted.iter().any(|w| {
                stem.contains(w.as_str())
                    || w.contains(stem.as_str())
                    || entry.keywords.iter().any(|k| k.eq_ignore_ascii_case(w))
            })
        })
    }
}
