//! The [`Fact`] entity and its small enumerated fields.
//!
//! Field shape and lifecycle mirror §3.1.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A durable assertion with provenance and lifecycle metadata (§3.1).
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    pub id: String,
    pub text: String,
    pub entity: Option<String>,
    pub key: Option<String>,
    pub value: Option<String>,
    pub category: Category,
    pub tags: Vec<String>,
    pub importance: f32,
    pub confidence: f32,
    pub decay_class: DecayClass,
    pub created_at: DateTime<Utc>,
    pub source_date: DateTime<Utc>,
    pub last_confirmed_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub tier: Tier,
    pub superseded_by: Option<String>,
    pub source: Source,
}

impl Fact {
    /// Build a new, unsuperseded fact at `now` with the given classification
    /// outputs. `expires_at` is derived per I2.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        text: String,
        entity: Option<String>,
        key: Option<String>,
        value: Option<String>,
        category: Category,
        tags: Vec<String>,
        importance: f32,
        decay_class: DecayClass,
        source: Source,
        source_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let source_date = source_date.unwrap_or(now);
        let expires_at = decay_class.ttl().map(|ttl| now + ttl);
        Self {
            id: Uuid::new_v4().to_string(),
            text,
            entity,
            key,
            value,
            category,
            tags,
            importance: importance.clamp(0.0, 1.0),
            confidence: 1.0,
            decay_class,
            created_at: now,
            source_date,
            last_confirmed_at: now,
            expires_at,
            tier: Tier::Warm,
            superseded_by: None,
            source,
        }
    }

    /// Recompute `expires_at` from `last_confirmed_at + TTL(decay_class)`,
    /// satisfying I2. `permanent` always yields `None`, satisfying I1.
    pub fn recompute_expiry(&mut self) {
        self.expires_at = self.decay_class.ttl().map(|ttl| self.last_confirmed_at + ttl);
    }

    /// Apply refresh-on-access: bump `last_confirmed_at` to `now` and
    /// recompute `expires_at`. Only called for decay classes that refresh
    /// (stable, active) — see `DecayClass::refreshes_on_access`.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.last_confirmed_at = now;
        self.recompute_expiry();
    }

    /// True once `now` passes `expires_at`; permanent facts never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if now > exp)
    }

    /// True once the fact has been linked to its replacement.
    pub fn is_superseded(&self) -> bool {
        self.superseded_by.is_some()
    }
}

/// Topical classification of a fact (§3.1). `Other` is the catch-all that
/// feeds the discovered-category set (§6.4).
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Preference,
    Fact,
    Decision,
    Entity,
    Pattern,
    Rule,
    Procedure,
    Credential,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Preference => "preference",
            Category::Fact => "fact",
            Category::Decision => "decision",
            Category::Entity => "entity",
            Category::Pattern => "pattern",
            Category::Rule => "rule",
            Category::Procedure => "procedure",
            Category::Credential => "credential",
            Category::Other => "other",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s {
            "preference" => Category::Preference,
            "fact" => Category::Fact,
            "decision" => Category::Decision,
            "entity" => Category::Entity,
            "pattern" => Category::Pattern,
            "rule" => Category::Rule,
            "procedure" => Category::Procedure,
            "credential" => Category::Credential,
            _ => Category::Other,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// TTL policy class controlling expiry and refresh-on-access (§3.1, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayClass {
    Permanent,
    Stable,
    Active,
    Session,
    Checkpoint,
}

impl DecayClass {
    /// Fixed TTL for this class, or `None` for permanent (§4.4).
    pub fn ttl(&self) -> Option<ChronoDuration> {
        match self {
            DecayClass::Permanent => None,
            DecayClass::Stable => Some(ChronoDuration::days(90)),
            DecayClass::Active => Some(ChronoDuration::days(14)),
            DecayClass::Session => Some(ChronoDuration::hours(24)),
            DecayClass::Checkpoint => Some(ChronoDuration::hours(4)),
        }
    }

    /// Whether recall's refresh-on-access side effect applies to this class
    /// (§4.4: "Refresh-on-access applies only to stable and active").
    pub fn refreshes_on_access(&self) -> bool {
        matches!(self, DecayClass::Stable | DecayClass::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecayClass::Permanent => "permanent",
            DecayClass::Stable => "stable",
            DecayClass::Active => "active",
            DecayClass::Session => "session",
            DecayClass::Checkpoint => "checkpoint",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "permanent" => Some(DecayClass::Permanent),
            "stable" => Some(DecayClass::Stable),
            "active" => Some(DecayClass::Active),
            "session" => Some(DecayClass::Session),
            "checkpoint" => Some(DecayClass::Checkpoint),
            _ => None,
        }
    }
}

impl std::fmt::Display for DecayClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operational hotness tier (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "hot" => Some(Tier::Hot),
            "warm" => Some(Tier::Warm),
            "cold" => Some(Tier::Cold),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provenance of a fact (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    User,
    Agent,
    Tool,
    Import,
    Reflection,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::User => "user",
            Source::Agent => "agent",
            Source::Tool => "tool",
            Source::Import => "import",
            Source::Reflection => "reflection",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Source::User),
            "agent" => Some(Source::Agent),
            "tool" => Some(Source::Tool),
            "import" => Some(Source::Import),
            "reflection" => Some(Source::Reflection),
            _ => None,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_i1_permanent_has_no_expiry() {
        let now = Utc::now();
        let fact = Fact::new(
            "name is Sam".into(),
            Some("user".into()),
            Some("name".into()),
            None,
            Category::Entity,
            vec![],
            0.9,
            DecayClass::Permanent,
            Source::User,
            None,
            now,
        );
        assert_eq!(fact.decay_class, DecayClass::Permanent);
        assert!(fact.expires_at.is_none());
    }

    #[test]
    fn invariant_i2_expiry_derived_from_last_confirmed() {
        let now = Utc::now();
        let mut fact = Fact::new(
            "I prefer dark mode".into(),
            Some("user".into()),
            Some("theme".into()),
            None,
            Category::Preference,
            vec![],
            0.5,
            DecayClass::Stable,
            Source::User,
            None,
            now,
        );
        let later = now + ChronoDuration::days(5);
        fact.refresh(later);
        assert_eq!(fact.expires_at, Some(later + ChronoDuration::days(90)));
    }

    #[test]
    fn refresh_on_access_gated_by_class() {
        assert!(DecayClass::Stable.refreshes_on_access());
        assert!(DecayClass::Active.refreshes_on_access());
        assert!(!DecayClass::Session.refreshes_on_access());
        assert!(!DecayClass::Checkpoint.refreshes_on_access());
        assert!(!DecayClass::Permanent.refreshes_on_access());
    }

    #[test]
    fn is_expired_respects_boundary() {
        let now = Utc::now();
        let mut fact = Fact::new(
            "ephemeral".into(),
            None,
            None,
            None,
            Category::Fact,
            vec![],
            0.5,
            DecayClass::Session,
            Source::Agent,
            None,
            now,
        );
        let exp = fact.expires_at.unwrap();
        assert!(!fact.is_expired(exp), "exactly at expiry is not yet expired");
        assert!(fact.is_expired(exp + ChronoDuration::seconds(1)));
        fact.tier = Tier::Hot;
        assert_eq!(fact.tier, Tier::Hot);
    }
}
