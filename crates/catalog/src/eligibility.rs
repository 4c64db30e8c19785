//! Content eligibility for freshly fetched works.
//!
//! [`EligibilityGate`] first consults the persisted [`Override`] for the
//! subject; without one it runs the configured [`EligibilityPolicy`].
//! The catalog's own policy is [`PairingPolicy`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use shelf_core::config::EligibilityConfig;
use shelf_core::{StoreError, SubjectKey, TagFacets, Tier};

use crate::error::CatalogError;
use crate::store::OverrideStore;

// ── Policy ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Accept,
    Reject(String),
}

/// A pluggable content predicate over a work's tag facets.
pub trait EligibilityPolicy: Send + Sync {
    fn evaluate(&self, facets: &TagFacets) -> PolicyDecision;
}

/// Requires the category fandom tag and keeps protected characters out of
/// any pairing other than the canonical one.
///
/// Pairing tags marked "past" or "minor" and friendship tags (`A & B`)
/// are ignored.
#[derive(Debug, Clone)]
pub struct PairingPolicy {
    category_tag: String,
    category_key: String,
    canonical: Vec<String>,
    protected: Vec<String>,
}

impl PairingPolicy {
    pub fn new(category_tag: &str, canonical_pairing: &str, protected: &[String]) -> Self {
        Self {
            category_tag: category_tag.trim().to_string(),
            category_key: normalize_name(category_tag),
            canonical: pairing_members(canonical_pairing),
            protected: protected.iter().map(|p| normalize_name(p)).collect(),
        }
    }

    pub fn from_config(config: &EligibilityConfig) -> Self {
        Self::new(&config.category_tag, &config.canonical_pairing, &config.protected)
    }

    fn is_protected(&self, name: &str) -> Option<usize> {
        self.protected.iter().position(|p| refers_to(name, p))
    }

    /// Whether a member list is exactly the canonical pairing.
    fn is_canonical(&self, members: &[String]) -> bool {
        members.len() == self.canonical.len()
            && members
                .iter()
                .zip(&self.canonical)
                .all(|(m, c)| refers_to(m, c))
    }

    /// The names a protected member may be paired with.
    fn partners_of(&self, protected: &str) -> Vec<&String> {
        if self.canonical.iter().any(|c| c == protected) {
            self.canonical.iter().filter(|c| *c != protected).collect()
        } else {
            Vec::new()
        }
    }

    fn offends(&self, members: &[String]) -> bool {
        members.iter().enumerate().any(|(i, name)| {
            let Some(p) = self.is_protected(name) else {
                return false;
            };
            let partners = self.partners_of(&self.protected[p]);
            members
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .any(|(_, other)| !partners.iter().any(|partner| refers_to(other, partner)))
        })
    }
}

impl EligibilityPolicy for PairingPolicy {
    fn evaluate(&self, facets: &TagFacets) -> PolicyDecision {
        if !facets
            .fandoms
            .iter()
            .any(|f| normalize_name(f) == self.category_key)
        {
            return PolicyDecision::Reject(format!(
                "missing required fandom tag '{}'",
                self.category_tag
            ));
        }

        let pairings: Vec<&String> = facets
            .relationships
            .iter()
            .filter(|t| !is_friendship(t))
            .collect();
        if pairings.is_empty() {
            return PolicyDecision::Accept;
        }
        if pairings.len() == 1 && self.is_canonical(&pairing_members(pairings[0])) {
            return PolicyDecision::Accept;
        }

        let offending: Vec<String> = pairings
            .into_iter()
            .filter(|t| !is_incidental(t))
            .filter(|t| self.offends(&pairing_members(t)))
            .map(|t| format!("'{t}'"))
            .collect();

        if offending.is_empty() {
            PolicyDecision::Accept
        } else {
            PolicyDecision::Reject(format!(
                "protected character paired outside the canonical pairing: {}",
                offending.join(", ")
            ))
        }
    }
}

// ── Tag normalization ────────────────────────────────────────────────

/// Lowercase, drop parenthetical qualifiers, trim punctuation and collapse
/// whitespace: `"  Castiel (Supernatural)."` → `"castiel"`.
fn normalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for c in raw.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

/// Names in a pairing tag, normalized and sorted so `A/B` equals `B/A`.
fn pairing_members(tag: &str) -> Vec<String> {
    let mut members: Vec<String> = tag
        .split('/')
        .map(normalize_name)
        .filter(|n| !n.is_empty())
        .collect();
    members.sort();
    members
}

/// `name` refers to `canonical` when equal, or when `name` is a single
/// word matching the canonical name's first word (`"dean"` → `"dean winchester"`).
fn refers_to(name: &str, canonical: &str) -> bool {
    name == canonical
        || (!name.contains(' ') && canonical.split(' ').next() == Some(name))
}

fn words(tag: &str) -> impl Iterator<Item = String> + '_ {
    tag.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Tags explicitly marked as past or minor.
fn is_incidental(tag: &str) -> bool {
    words(tag).any(|w| w == "past" || w == "minor")
}

/// Friendship-style tags: `A & B` without a slash, or labelled as such.
fn is_friendship(tag: &str) -> bool {
    (tag.contains('&') && !tag.contains('/'))
        || words(tag).any(|w| w == "friendship" || w == "platonic")
}

// ── Overrides ────────────────────────────────────────────────────────

/// A moderator's decision to skip the eligibility check for a subject.
/// Overrides never expire on their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Override {
    pub subject: SubjectKey,
    pub actor_id: String,
    pub tier: Tier,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of the gate for one fetched work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Accepted,
    /// The policy was skipped because of a persisted override.
    Overridden,
    Rejected { reason: String },
}

impl Verdict {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Verdict::Rejected { .. })
    }
}

pub struct EligibilityGate {
    overrides: Arc<dyn OverrideStore>,
    policy: Arc<dyn EligibilityPolicy>,
}

impl EligibilityGate {
    pub fn new(overrides: Arc<dyn OverrideStore>, policy: Arc<dyn EligibilityPolicy>) -> Self {
        Self { overrides, policy }
    }

    pub async fn has_override(&self, subject: &SubjectKey) -> Result<bool, StoreError> {
        Ok(self.overrides.get_override(subject).await?.is_some())
    }

    pub async fn check(
        &self,
        subject: &SubjectKey,
        facets: &TagFacets,
    ) -> Result<Verdict, StoreError> {
        if self.has_override(subject).await? {
            debug!(subject = %subject, "eligibility skipped by override");
            return Ok(Verdict::Overridden);
        }
        Ok(match self.policy.evaluate(facets) {
            PolicyDecision::Accept => Verdict::Accepted,
            PolicyDecision::Reject(reason) => Verdict::Rejected { reason },
        })
    }

    pub async fn set_override(
        &self,
        subject: &SubjectKey,
        tier: Tier,
        actor_id: &str,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Override, CatalogError> {
        if !tier.is_privileged() {
            return Err(CatalogError::Forbidden { tier, action: "override eligibility" });
        }
        let entry = Override {
            subject: subject.clone(),
            actor_id: actor_id.to_string(),
            tier,
            note,
            created_at: now,
        };
        self.overrides.put_override(&entry).await?;
        info!(subject = %subject, actor = actor_id, %tier, "eligibility override set");
        Ok(entry)
    }

    pub async fn clear_override(
        &self,
        subject: &SubjectKey,
        tier: Tier,
        actor_id: &str,
    ) -> Result<bool, CatalogError> {
        if !tier.is_privileged() {
            return Err(CatalogError::Forbidden { tier, action: "clear overrides" });
        }
        let removed = self.overrides.delete_override(subject).await?;
        if removed {
            info!(subject = %subject, actor = actor_id, "eligibility override cleared");
        }
        Ok(removed)
    }

    pub async fn list_overrides(&self) -> Result<Vec<Override>, StoreError> {
        self.overrides.list_overrides().await
    }
}
