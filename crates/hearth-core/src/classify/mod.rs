//! Fact classification heuristics (§4.4): pure, deterministic, total.
//!
//! Regex sets are compiled once via `OnceLock`, a memoize-on-first-use
//! pattern applied here to regex compilation.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::RegexSet;

use crate::fact::{Category, DecayClass};

struct TriggerPatterns {
    verbs: RegexSet,
    preferences: RegexSet,
    decisions: RegexSet,
    identity: RegexSet,
    contact: RegexSet,
}

fn trigger_patterns() -> &'static TriggerPatterns {
    static PATTERNS: OnceLock<TriggerPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| TriggerPatterns {
        verbs: RegexSet::new([r"(?i)remember", r"(?i)note that", r"(?i)don't forget"]).unwrap(),
        preferences: RegexSet::new([r"(?i)i prefer", r"(?i)my \w+ is"]).unwrap(),
        decisions: RegexSet::new([r"(?i)we decided", r"(?i)\bchose\b", r"(?i)\bchoosing\b"]).unwrap(),
        identity: RegexSet::new([r"(?i)is called", r"(?i)name is"]).unwrap(),
        contact: RegexSet::new([
            r"[\w.+-]+@[\w-]+\.[\w.-]+",
            r"\+?\d[\d\-\s]{7,}\d",
            r"https?://\S+",
        ])
        .unwrap(),
    })
}

/// Whether `text` contains an explicit-memory or implicit-fact trigger
/// (§4.4 `should_capture`). Total: never fails, never panics on any input.
pub fn should_capture(text: &str) -> bool {
    let patterns = trigger_patterns();
    patterns.verbs.is_match(text)
        || patterns.preferences.is_match(text)
        || patterns.decisions.is_match(text)
        || patterns.identity.is_match(text)
        || patterns.contact.is_match(text)
}

struct CategoryPatterns {
    decision: RegexSet,
    preference: RegexSet,
    entity: RegexSet,
    fact: RegexSet,
}

fn category_patterns() -> &'static CategoryPatterns {
    static PATTERNS: OnceLock<CategoryPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| CategoryPatterns {
        decision: RegexSet::new([r"(?i)we decided", r"(?i)\bchose\b", r"(?i)going with"]).unwrap(),
        preference: RegexSet::new([r"(?i)i prefer", r"(?i)i like", r"(?i)my \w+ is"]).unwrap(),
        entity: RegexSet::new([r"(?i)is called", r"(?i)name is", r"(?i)known as"]).unwrap(),
        fact: RegexSet::new([r"(?i)is a\b", r"(?i)uses\b", r"(?i)runs on"]).unwrap(),
    })
}

/// Priority-ordered category detection: decision → preference → entity →
/// fact → other (§4.4).
pub fn classify_category(text: &str) -> Category {
    let patterns = category_patterns();
    if patterns.decision.is_match(text) {
        Category::Decision
    } else if patterns.preference.is_match(text) {
        Category::Preference
    } else if patterns.entity.is_match(text) {
        Category::Entity
    } else if patterns.fact.is_match(text) {
        Category::Fact
    } else {
        Category::Other
    }
}

struct DecayPatterns {
    permanent: RegexSet,
    session: RegexSet,
    active: RegexSet,
    checkpoint: RegexSet,
}

fn decay_patterns() -> &'static DecayPatterns {
    static PATTERNS: OnceLock<DecayPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| DecayPatterns {
        permanent: RegexSet::new([
            r"(?i)\bname\b",
            r"(?i)\bemail\b",
            r"(?i)api[_ ]?key",
            r"(?i)architecture",
            r"(?i)decided",
            r"(?i)always use",
            r"(?i)never use",
        ])
        .unwrap(),
        session: RegexSet::new([r"(?i)right now", r"(?i)this session"]).unwrap(),
        active: RegexSet::new([r"(?i)working on", r"(?i)\btodo\b", r"(?i)\bblocker\b"]).unwrap(),
        checkpoint: RegexSet::new([r"(?i)checkpoint", r"(?i)preflight"]).unwrap(),
    })
}

const SESSION_KEYS: &[&str] = &["current_file", "temp"];

/// Decay classification in priority order (§4.4):
/// permanent → session → active → checkpoint → stable (default).
pub fn classify_decay(text: &str, entity: Option<&str>, key: Option<&str>) -> DecayClass {
    let patterns = decay_patterns();
    let haystacks = [text, entity.unwrap_or(""), key.unwrap_or("")];
    let any_match = |set: &RegexSet| haystacks.iter().any(|h| set.is_match(h));

    if any_match(&patterns.permanent) {
        return DecayClass::Permanent;
    }
    let session_key = key.map(|k| SESSION_KEYS.contains(&k)).unwrap_or(false);
    if any_match(&patterns.session) || session_key {
        return DecayClass::Session;
    }
    if any_match(&patterns.active) {
        return DecayClass::Active;
    }
    if any_match(&patterns.checkpoint) {
        return DecayClass::Checkpoint;
    }
    DecayClass::Stable
}

struct TagPatterns {
    entries: Vec<(Regex, &'static str)>,
}

use regex::Regex;

fn tag_patterns() -> &'static TagPatterns {
    static PATTERNS: OnceLock<TagPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| TagPatterns {
        entries: vec![
            (Regex::new(r"(?i)zigbee|z2m").unwrap(), "zigbee"),
            (Regex::new(r"(?i)docker|container").unwrap(), "docker"),
            (Regex::new(r"(?i)kubernetes|k8s").unwrap(), "kubernetes"),
            (Regex::new(r"(?i)postgres|postgresql").unwrap(), "postgres"),
            (Regex::new(r"(?i)\btask\b|\btodo\b").unwrap(), "task"),
            (Regex::new(r"(?i)\bblocker\b").unwrap(), "blocker"),
        ],
    })
}

/// Regex domain-map tags, unioned with caller-supplied tags (§4.4).
pub fn extract_tags(text: &str, caller_tags: &[String]) -> Vec<String> {
    let mut tags: HashSet<String> = caller_tags.iter().cloned().collect();
    for (pattern, tag) in &tag_patterns().entries {
        if pattern.is_match(text) {
            tags.insert(tag.to_string());
        }
    }
    let mut out: Vec<String> = tags.into_iter().collect();
    out.sort();
    out
}

/// Merged per-language keyword sets loaded from `.language-keywords.json`
/// (§4.4, §6.4). English is hard-coded via [`should_capture`]; this adds
/// additional trigger phrases for other languages at runtime.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct LanguageKeywords {
    /// language code -> list of trigger substrings (case-insensitive).
    pub triggers: std::collections::HashMap<String, Vec<String>>,
}

impl LanguageKeywords {
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| crate::error::EngineError::Corruption {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Whether any configured non-English phrase appears in `text`.
    pub fn matches(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.triggers
            .values()
            .flatten()
            .any(|phrase| lowered.contains(&phrase.to_lowercase()))
    }
}

/// Should-capture check including merged language keywords (§4.4).
pub fn should_capture_with_languages(text: &str, languages: &LanguageKeywords) -> bool {
    should_capture(text) || languages.matches(text)
}

/// Persisted set of category strings seen outside the fixed `Category`
/// enum (§3.1 "extensible via a discovered-category set", §6.4).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct DiscoveredCategories {
    pub names: HashSet<String>,
}

impl DiscoveredCategories {
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| crate::error::EngineError::Corruption {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn save(&self, path: &std::path::Path) -> crate::error::Result<()> {
        let data = serde_json::to_string_pretty(self).map_err(|e| crate::error::EngineError::Corruption {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Record `name` if it isn't one of the fixed `Category` variants.
    /// Returns whether it was newly recorded.
    pub fn observe(&mut self, name: &str) -> bool {
        if matches!(Category::parse_name(name), Category::Other) && name != "other" {
            self.names.insert(name.to_string())
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_capture_detects_explicit_memory_verb() {
        assert!(should_capture("Please remember that I use vim"));
        assert!(!should_capture("The weather is nice today"));
    }

    #[test]
    fn should_capture_detects_contact_info() {
        assert!(should_capture("reach me at sam@example.com"));
    }

    #[test]
    fn classify_category_priority_order() {
        assert_eq!(classify_category("we decided to use Postgres"), Category::Decision);
        assert_eq!(classify_category("I prefer dark mode"), Category::Preference);
        assert_eq!(classify_category("the service is called billing-api"), Category::Entity);
        assert_eq!(classify_category("the API uses gRPC"), Category::Fact);
        assert_eq!(classify_category("hello there"), Category::Other);
    }

    #[test]
    fn classify_decay_priority_order() {
        assert_eq!(classify_decay("my name is Sam", None, None), DecayClass::Permanent);
        assert_eq!(classify_decay("right now I'm debugging", None, None), DecayClass::Session);
        assert_eq!(
            classify_decay("", None, Some("current_file")),
            DecayClass::Session
        );
        assert_eq!(classify_decay("working on the release", None, None), DecayClass::Active);
        assert_eq!(classify_decay("preflight checks pass", None, None), DecayClass::Checkpoint);
        assert_eq!(classify_decay("the sky is blue", None, None), DecayClass::Stable);
    }

    #[test]
    fn decay_permanent_takes_priority_over_active() {
        assert_eq!(
            classify_decay("working on the api_key rotation", None, None),
            DecayClass::Permanent
        );
    }

    #[test]
    fn extract_tags_unions_with_caller_tags() {
        let tags = extract_tags("the zigbee hub uses z2m", &["home".to_string()]);
        assert!(tags.contains(&"zigbee".to_string()));
        assert!(tags.contains(&"home".to_string()));
    }

    #[test]
    fn discovered_categories_ignores_known_names() {
        let mut discovered = DiscoveredCategories::default();
        assert!(!discovered.observe("preference"));
        assert!(discovered.observe("recipe"));
        assert!(discovered.names.contains("recipe"));
    }

    #[test]
    fn language_keywords_match_is_case_insensitive() {
        let mut keywords = LanguageKeywords::default();
        keywords.triggers.insert("es".to_string(), vec!["recuerda que".to_string()]);
        assert!(should_capture_with_languages("Recuerda Que uso vim", &keywords));
    }
}
