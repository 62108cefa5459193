use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use super::badges::{evaluate_badge, BadgeDecision};
use super::catalog::{RuleCatalog, RuleDefinition, RuleShapeError};
use super::domain::{
    AuditRecord, Badge, BadgeGrant, GiftAward, ReferralCounts, Rule, RuleId, RuleTarget,
    SubjectId, TierAssignment,
};
use super::metrics::{EvaluationError, MetricResolver};
use super::repository::{
    AssignmentRepository, AuditError, AuditSink, MetricSource, RepositoryError, SnapshotError,
    SubjectAssignmentsView, TierView,
};
use super::tiers::{resolve_tier, TierResolution};

const PREVIEW_SAMPLE_LIMIT: usize = 10;

/// Dry-run result for one rule over the eligible population.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewOutcome {
    pub count: usize,
    pub sample: Vec<SubjectId>,
}

/// Summary of one apply run. Failures never abort the remaining batch;
/// they are reported here alongside the successful writes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub evaluated: usize,
    pub tier_changes: usize,
    pub badge_grants: usize,
    pub gift_awards: usize,
    pub failures: Vec<SubjectFailure>,
}

/// Per-subject failure captured during an apply run.
#[derive(Debug, Clone, Serialize)]
pub struct SubjectFailure {
    pub subject: SubjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub message: String,
}

/// Service composing the rule catalog, metric source, assignment store, and
/// audit sink into the preview and apply operations.
pub struct EvaluationService<M, R, S> {
    catalog: Arc<RuleCatalog>,
    metrics: Arc<M>,
    repository: Arc<R>,
    audit: Arc<S>,
}

impl<M, R, S> EvaluationService<M, R, S>
where
    M: MetricSource + 'static,
    R: AssignmentRepository + 'static,
    S: AuditSink + 'static,
{
    pub fn new(catalog: RuleCatalog, metrics: Arc<M>, repository: Arc<R>, audit: Arc<S>) -> Self {
        Self {
            catalog: Arc::new(catalog),
            metrics,
            repository,
            audit,
        }
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    /// Dry-run one rule definition against the current population. Validates
    /// the raw shape first, takes its own snapshot, and persists nothing, so
    /// it is safe to call repeatedly and concurrently with an apply run.
    pub fn preview(
        &self,
        definition: &RuleDefinition,
    ) -> Result<PreviewOutcome, EngineServiceError> {
        let rule = RuleCatalog::validate(definition)?;
        let snapshot = self.metrics.snapshot()?;
        let resolver = MetricResolver::new(&snapshot);

        let eligible = self.eligible_subjects(&rule, &resolver)?;
        let sample = eligible
            .iter()
            .take(PREVIEW_SAMPLE_LIMIT)
            .cloned()
            .collect();

        Ok(PreviewOutcome {
            count: eligible.len(),
            sample,
        })
    }

    /// Run every active tier, badge, and gift rule against a single
    /// snapshot and persist the resulting assignments. Idempotent: a second
    /// run over unchanged inputs writes nothing and audits nothing.
    pub fn apply(&self, actor: &str, now: DateTime<Utc>) -> Result<BatchOutcome, EngineServiceError> {
        let snapshot = self.metrics.snapshot()?;
        let resolver = MetricResolver::new(&snapshot);
        let mut outcome = BatchOutcome::default();

        for (subject, record) in snapshot.subjects() {
            outcome.evaluated += 1;
            self.apply_tier(subject, &record.referrals, actor, now, &mut outcome);
        }

        for badge in self.catalog.badges() {
            for (subject, _) in snapshot.subjects() {
                self.apply_badge(badge, subject, &resolver, actor, now, &mut outcome);
            }
        }

        for rule in self.catalog.rules() {
            if matches!(rule.target, RuleTarget::Gift(_)) {
                self.apply_gift_rule(rule, &resolver, actor, now, &mut outcome);
            }
        }

        Ok(outcome)
    }

    /// Apply a single stored rule by id. Tier-targeted rules still resolve
    /// through the full ladder, since one tier cannot be assigned without
    /// comparing the others.
    pub fn apply_rule(
        &self,
        rule_id: &RuleId,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome, EngineServiceError> {
        let rule = self
            .catalog
            .rule(rule_id)
            .cloned()
            .ok_or_else(|| EngineServiceError::UnknownRule(rule_id.0.clone()))?;

        let snapshot = self.metrics.snapshot()?;
        let resolver = MetricResolver::new(&snapshot);
        let mut outcome = BatchOutcome::default();

        match &rule.target {
            RuleTarget::Tier(_) => {
                for (subject, record) in snapshot.subjects() {
                    outcome.evaluated += 1;
                    self.apply_tier(subject, &record.referrals, actor, now, &mut outcome);
                }
            }
            RuleTarget::Badge(badge_id) => {
                let badge = self
                    .catalog
                    .badge(badge_id)
                    .cloned()
                    .ok_or_else(|| EngineServiceError::UnknownRule(rule_id.0.clone()))?;
                for (subject, _) in snapshot.subjects() {
                    outcome.evaluated += 1;
                    self.apply_badge(&badge, subject, &resolver, actor, now, &mut outcome);
                }
            }
            RuleTarget::Gift(_) => {
                outcome.evaluated = resolver.population(&rule.filters).len();
                self.apply_gift_rule(&rule, &resolver, actor, now, &mut outcome);
            }
        }

        Ok(outcome)
    }

    /// Current tier, active badges, and gifts for one subject.
    pub fn assignments(
        &self,
        subject: &SubjectId,
        now: DateTime<Utc>,
    ) -> Result<SubjectAssignmentsView, EngineServiceError> {
        let tier = self
            .repository
            .tier_assignment(subject)?
            .as_ref()
            .map(TierView::from)
            .unwrap_or_else(TierView::baseline);

        let badges = self
            .repository
            .badge_grants(subject)?
            .iter()
            .filter(|grant| grant.is_active(now))
            .map(Into::into)
            .collect();

        let gifts = self
            .repository
            .gift_awards(subject)?
            .iter()
            .map(Into::into)
            .collect();

        Ok(SubjectAssignmentsView {
            subject_id: subject.clone(),
            tier,
            badges,
            gifts,
        })
    }

    /// Subjects satisfying the rule, in id order. Rank conditions evaluate
    /// against one materialized ranking; scalar conditions resolve per
    /// subject, and a subject the store has no value for simply does not
    /// satisfy a dry run.
    fn eligible_subjects(
        &self,
        rule: &Rule,
        resolver: &MetricResolver<'_>,
    ) -> Result<Vec<SubjectId>, EvaluationError> {
        let population = resolver.population(&rule.filters);
        let mut eligible = Vec::new();

        if rule.condition.is_ranked() {
            let ranking = resolver.ranking(rule.metric, rule.window, &rule.filters);
            for subject in population {
                if rule.condition.satisfied_in(subject, &ranking)? {
                    eligible.push(subject.clone());
                }
            }
        } else {
            for subject in population {
                match resolver.resolve(subject, rule.metric, rule.window, &rule.filters) {
                    Ok(value) => {
                        if rule.condition.satisfied_by(value)? {
                            eligible.push(subject.clone());
                        }
                    }
                    Err(EvaluationError::MetricResolution { .. }) => continue,
                    Err(other) => return Err(other),
                }
            }
        }

        Ok(eligible)
    }

    /// Promotion-only tier persistence: a resolved tier below the stored
    /// level leaves the assignment untouched.
    fn apply_tier(
        &self,
        subject: &SubjectId,
        counts: &ReferralCounts,
        actor: &str,
        now: DateTime<Utc>,
        outcome: &mut BatchOutcome,
    ) {
        let resolution = resolve_tier(self.catalog.tiers(), counts);
        let tier = match resolution {
            TierResolution::Qualified(tier) => tier,
            TierResolution::Baseline => return,
        };

        let result = (|| -> Result<bool, RepositoryError> {
            let current_level = self
                .repository
                .tier_assignment(subject)?
                .map(|assignment| assignment.level)
                .unwrap_or(0);
            if current_level >= tier.level {
                return Ok(false);
            }

            self.repository.store_tier(TierAssignment {
                subject: subject.clone(),
                tier: tier.id.clone(),
                tier_name: tier.name.clone(),
                level: tier.level,
                bonus_percentage: tier.bonus_percentage,
                awarded_at: now,
            })?;
            Ok(true)
        })();

        match result {
            Ok(false) => {}
            Ok(true) => {
                outcome.tier_changes += 1;
                let mut metadata = BTreeMap::new();
                metadata.insert("tier".to_string(), tier.id.0.clone());
                metadata.insert("level".to_string(), tier.level.to_string());
                metadata.insert(
                    "bonus_percentage".to_string(),
                    tier.bonus_percentage.to_string(),
                );
                self.emit_audit(
                    actor,
                    "tier.promoted",
                    "tier_assignment",
                    subject,
                    metadata,
                    now,
                    None,
                    outcome,
                );
            }
            Err(error) => {
                warn!(subject = %subject.0, error = %error, "tier assignment failed");
                outcome.failures.push(SubjectFailure {
                    subject: subject.clone(),
                    rule_id: None,
                    message: error.to_string(),
                });
            }
        }
    }

    fn apply_badge(
        &self,
        badge: &Badge,
        subject: &SubjectId,
        resolver: &MetricResolver<'_>,
        actor: &str,
        now: DateTime<Utc>,
        outcome: &mut BatchOutcome,
    ) {
        let result = (|| -> Result<Option<BadgeGrant>, EngineServiceError> {
            let existing = self.repository.badge_grant(subject, &badge.id)?;
            match evaluate_badge(badge, resolver, subject, existing.as_ref(), now)? {
                BadgeDecision::AlreadyGranted | BadgeDecision::NotEligible => Ok(None),
                BadgeDecision::Grant { expires_at } => {
                    let grant = BadgeGrant {
                        subject: subject.clone(),
                        badge: badge.id.clone(),
                        unlocked_at: now,
                        expires_at,
                    };
                    self.repository.insert_badge_grant(grant.clone())?;
                    Ok(Some(grant))
                }
            }
        })();

        match result {
            Ok(None) => {}
            Ok(Some(grant)) => {
                outcome.badge_grants += 1;
                let mut metadata = BTreeMap::new();
                metadata.insert("badge".to_string(), badge.id.0.clone());
                metadata.insert("badge_type".to_string(), badge.badge_type.clone());
                if let Some(expires_at) = grant.expires_at {
                    metadata.insert("expires_at".to_string(), expires_at.to_rfc3339());
                }
                self.emit_audit(
                    actor,
                    "badge.granted",
                    "badge_grant",
                    subject,
                    metadata,
                    now,
                    Some(badge.id.0.clone()),
                    outcome,
                );
            }
            Err(error) => {
                warn!(
                    subject = %subject.0,
                    badge = %badge.id.0,
                    error = %error,
                    "badge evaluation failed"
                );
                outcome.failures.push(SubjectFailure {
                    subject: subject.clone(),
                    rule_id: Some(badge.id.0.clone()),
                    message: error.to_string(),
                });
            }
        }
    }

    fn apply_gift_rule(
        &self,
        rule: &Rule,
        resolver: &MetricResolver<'_>,
        actor: &str,
        now: DateTime<Utc>,
        outcome: &mut BatchOutcome,
    ) {
        let gift = match &rule.target {
            RuleTarget::Gift(gift) => gift.clone(),
            _ => return,
        };

        let population = resolver.population(&rule.filters);
        let ranking = rule
            .condition
            .is_ranked()
            .then(|| resolver.ranking(rule.metric, rule.window, &rule.filters));

        for subject in population {
            let result = (|| -> Result<bool, EngineServiceError> {
                let satisfied = match &ranking {
                    Some(ranking) => rule.condition.satisfied_in(subject, ranking)?,
                    None => {
                        let value =
                            resolver.resolve(subject, rule.metric, rule.window, &rule.filters)?;
                        rule.condition.satisfied_by(value)?
                    }
                };
                if !satisfied {
                    return Ok(false);
                }
                if self.repository.gift_award(subject, &gift)?.is_some() {
                    return Ok(false);
                }
                self.repository.insert_gift_award(GiftAward {
                    subject: subject.clone(),
                    gift: gift.clone(),
                    rule: rule.id.clone(),
                    awarded_at: now,
                })?;
                Ok(true)
            })();

            match result {
                Ok(false) => {}
                Ok(true) => {
                    outcome.gift_awards += 1;
                    let mut metadata = BTreeMap::new();
                    metadata.insert("gift".to_string(), gift.0.clone());
                    metadata.insert("rule".to_string(), rule.id.0.clone());
                    self.emit_audit(
                        actor,
                        "gift.awarded",
                        "gift_award",
                        subject,
                        metadata,
                        now,
                        Some(rule.id.0.clone()),
                        outcome,
                    );
                }
                Err(error) => {
                    warn!(
                        subject = %subject.0,
                        rule = %rule.id.0,
                        error = %error,
                        "gift rule evaluation failed"
                    );
                    outcome.failures.push(SubjectFailure {
                        subject: subject.clone(),
                        rule_id: Some(rule.id.0.clone()),
                        message: error.to_string(),
                    });
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_audit(
        &self,
        actor: &str,
        action: &str,
        resource_type: &str,
        subject: &SubjectId,
        metadata: BTreeMap<String, String>,
        now: DateTime<Utc>,
        rule_id: Option<String>,
        outcome: &mut BatchOutcome,
    ) {
        let entry = AuditRecord {
            actor: actor.to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: subject.0.clone(),
            metadata,
            timestamp: now,
        };
        if let Err(error) = self.audit.record(entry) {
            warn!(subject = %subject.0, error = %error, "audit record dropped");
            outcome.failures.push(SubjectFailure {
                subject: subject.clone(),
                rule_id,
                message: error.to_string(),
            });
        }
    }
}

/// Error raised by the evaluation service.
#[derive(Debug, thiserror::Error)]
pub enum EngineServiceError {
    #[error(transparent)]
    Shape(#[from] RuleShapeError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error("rule '{0}' not found or inactive")]
    UnknownRule(String),
}
