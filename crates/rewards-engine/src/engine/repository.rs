use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{
    AuditRecord, BadgeGrant, BadgeId, GiftAward, GiftId, PopulationSnapshot, SubjectId,
    TierAssignment,
};

/// Read-only aggregate store supplying the population snapshot a run
/// evaluates against. Refresh cadence is owned by the surrounding system.
pub trait MetricSource: Send + Sync {
    fn snapshot(&self) -> Result<PopulationSnapshot, SnapshotError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("metric store unavailable: {0}")]
    Unavailable(String),
}

/// Storage abstraction for the assignments the engine owns. Writes are
/// keyed per subject so overlapping runs cannot duplicate grants.
pub trait AssignmentRepository: Send + Sync {
    fn tier_assignment(&self, subject: &SubjectId)
        -> Result<Option<TierAssignment>, RepositoryError>;
    fn store_tier(&self, assignment: TierAssignment) -> Result<(), RepositoryError>;

    /// Latest grant row for the pair, active or expired. Expired rows stay
    /// behind for audit; a fresh grant supersedes them.
    fn badge_grant(
        &self,
        subject: &SubjectId,
        badge: &BadgeId,
    ) -> Result<Option<BadgeGrant>, RepositoryError>;
    fn insert_badge_grant(&self, grant: BadgeGrant) -> Result<(), RepositoryError>;
    fn badge_grants(&self, subject: &SubjectId) -> Result<Vec<BadgeGrant>, RepositoryError>;

    fn gift_award(
        &self,
        subject: &SubjectId,
        gift: &GiftId,
    ) -> Result<Option<GiftAward>, RepositoryError>;
    fn insert_gift_award(&self, award: GiftAward) -> Result<(), RepositoryError>;
    fn gift_awards(&self, subject: &SubjectId) -> Result<Vec<GiftAward>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("assignment already exists")]
    Conflict,
    #[error("assignment not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Outbound audit hook receiving one record per assignment change.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditRecord) -> Result<(), AuditError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit transport unavailable: {0}")]
    Transport(String),
}

/// Sanitized read surface for one subject's current assignments.
#[derive(Debug, Clone, Serialize)]
pub struct SubjectAssignmentsView {
    pub subject_id: SubjectId,
    pub tier: TierView,
    pub badges: Vec<BadgeGrantView>,
    pub gifts: Vec<GiftAwardView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierView {
    pub name: String,
    pub level: u32,
    pub bonus_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awarded_at: Option<DateTime<Utc>>,
}

impl TierView {
    pub fn baseline() -> Self {
        Self {
            name: "Tier 0".to_string(),
            level: 0,
            bonus_percentage: 0.0,
            awarded_at: None,
        }
    }
}

impl From<&TierAssignment> for TierView {
    fn from(assignment: &TierAssignment) -> Self {
        Self {
            name: assignment.tier_name.clone(),
            level: assignment.level,
            bonus_percentage: assignment.bonus_percentage,
            awarded_at: Some(assignment.awarded_at),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BadgeGrantView {
    pub badge_id: BadgeId,
    pub unlocked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&BadgeGrant> for BadgeGrantView {
    fn from(grant: &BadgeGrant) -> Self {
        Self {
            badge_id: grant.badge.clone(),
            unlocked_at: grant.unlocked_at,
            expires_at: grant.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GiftAwardView {
    pub gift_id: GiftId,
    pub awarded_at: DateTime<Utc>,
}

impl From<&GiftAward> for GiftAwardView {
    fn from(award: &GiftAward) -> Self {
        Self {
            gift_id: award.gift.clone(),
            awarded_at: award.awarded_at,
        }
    }
}
