//! 局部更新路径的文本抽取：天空盒描述、资产名称、交互修改目标

use std::sync::OnceLock;

use regex::Regex;

use crate::intent::INTERACTION_WORDS;
use crate::scene::Interaction;

static SKY_COMMAND_RE: OnceLock<Regex> = OnceLock::new();
static ADD_COMMAND_RE: OnceLock<Regex> = OnceLock::new();
static SCENE_SUFFIX_RE: OnceLock<Regex> = OnceLock::new();
static LIST_SPLIT_RE: OnceLock<Regex> = OnceLock::new();
static ARTICLE_RE: OnceLock<Regex> = OnceLock::new();

fn sky_command_re() -> &'static Regex {
    SKY_COMMAND_RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:please\s+|can you\s+|could you\s+)?(?:change|set|make|switch|update|turn|replace)\s+(?:the\s+)?(?:background|sky|skybox|backdrop|scenery|environment)\s*(?:to|into|with|as|so it is)?\s+(?:an?\s+|the\s+)?",
        )
        .expect("sky command pattern")
    })
}

fn add_command_re() -> &'static Regex {
    ADD_COMMAND_RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:please\s+|can you\s+|could you\s+)?(?:add|put|place|insert|spawn|include|bring in)(?:\s+|$)")
            .expect("add command pattern")
    })
}

fn scene_suffix_re() -> &'static Regex {
    SCENE_SUFFIX_RE.get_or_init(|| {
        Regex::new(r"(?i)\s+(?:to|into|in|on|inside)\s+(?:the\s+|my\s+|this\s+)?(?:scene|room|lesson|classroom|world)\b.*$")
            .expect("scene suffix pattern")
    })
}

fn list_split_re() -> &'static Regex {
    LIST_SPLIT_RE.get_or_init(|| Regex::new(r"(?i)\s*(?:,|;|&|\band\b|\bplus\b)\s*").expect("list split pattern"))
}

fn article_re() -> &'static Regex {
    ARTICLE_RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:a|an|the|some|another|one|two|three|few|couple of)\s+").expect("article pattern")
    })
}

fn trim_punctuation(s: &str) -> &str {
    s.trim().trim_matches(|c: char| matches!(c, '.' | '!' | '?' | '"' | '\''))
}

/// 去掉「把背景换成」这类命令前缀，留下场景描述；没有前缀时原样返回
pub fn extract_skybox_prompt(utterance: &str) -> String {
    let stripped = sky_command_re().replace(utterance, "");
    let prompt = trim_punctuation(&stripped);
    if prompt.is_empty() {
        trim_punctuation(utterance).to_string()
    } else {
        prompt.to_string()
    }
}

/// "add a microscope and a globe to the scene" → ["microscope", "globe"]
pub fn extract_asset_names(utterance: &str) -> Vec<String> {
    let body = add_command_re().replace(utterance, "");
    let body = scene_suffix_re().replace(&body, "");

    let mut names: Vec<String> = Vec::new();
    for part in list_split_re().split(trim_punctuation(&body)) {
        let name = trim_punctuation(&article_re().replace(part.trim(), "")).to_string();
        if name.is_empty() || names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
            continue;
        }
        names.push(name);
    }
    names
}

/// 在已有资产中找出被提到的对象，与句中的交互词配对
pub fn match_interactions(utterance: &str, scene_assets: &[String]) -> Vec<Interaction> {
    let lower = utterance.to_lowercase();
    let kinds: Vec<&str> = INTERACTION_WORDS
        .iter()
        .copied()
        .filter(|w| lower.contains(w))
        .collect();
    if kinds.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for name in scene_assets {
        let key = name.to_lowercase();
        if key.is_empty() || seen.contains(&key) || !lower.contains(key.as_str()) {
            continue;
        }
        seen.push(key);
        for kind in &kinds {
            out.push(Interaction {
                target: name.clone(),
                interaction_type: kind.to_string(),
                purpose: utterance.trim().to_string(),
            });
        }
    }
    out
}
