//! Eligibility and tier resolution engine.
//!
//! Decides which reward tier, badges, and gifts each agent currently
//! qualifies for, based on declaratively configured rules over
//! time-windowed performance metrics. Evaluation is a pure function of
//! (catalog, population snapshot, evaluation instant); the only state the
//! engine owns is the assignments it writes back.

pub mod badges;
pub mod catalog;
pub mod domain;
pub mod metrics;
pub mod operators;
pub mod repository;
pub mod router;
pub mod service;
pub mod tiers;

#[cfg(test)]
mod tests;

pub use badges::{evaluate_badge, BadgeDecision};
pub use catalog::{RuleCatalog, RuleDefinition, RuleShapeError};
pub use domain::{
    AuditRecord, Badge, BadgeGrant, BadgeId, BehaviorRequirement, Condition, GiftAward, GiftId,
    Metric, PopulationSnapshot, ReferralCounts, Rule, RuleId, RuleTarget, SubjectAttributes,
    SubjectFilter, SubjectId, SubjectRecord, Tier, TierAssignment, TierId, TimeWindow,
};
pub use metrics::{EvaluationError, MetricResolver, Ranking};
pub use repository::{
    AssignmentRepository, AuditError, AuditSink, BadgeGrantView, GiftAwardView, MetricSource,
    RepositoryError, SnapshotError, SubjectAssignmentsView, TierView,
};
pub use router::engine_router;
pub use service::{
    BatchOutcome, EngineServiceError, EvaluationService, PreviewOutcome, SubjectFailure,
};
pub use tiers::{resolve_tier, TierResolution};
