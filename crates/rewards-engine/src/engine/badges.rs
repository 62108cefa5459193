use chrono::{DateTime, Duration, Utc};

use super::domain::{Badge, BadgeGrant, SubjectId};
use super::metrics::{EvaluationError, MetricResolver};

/// Result of evaluating one badge for one subject.
#[derive(Debug, Clone, PartialEq)]
pub enum BadgeDecision {
    /// An unexpired grant already exists; grants are never re-issued or
    /// re-timestamped.
    AlreadyGranted,
    Grant { expires_at: Option<DateTime<Utc>> },
    NotEligible,
}

/// Evaluate a badge's unlock criteria. Badges use `>=` semantics only.
pub fn evaluate_badge(
    badge: &Badge,
    resolver: &MetricResolver<'_>,
    subject: &SubjectId,
    existing: Option<&BadgeGrant>,
    now: DateTime<Utc>,
) -> Result<BadgeDecision, EvaluationError> {
    if let Some(grant) = existing {
        if grant.is_active(now) {
            return Ok(BadgeDecision::AlreadyGranted);
        }
    }

    let value = resolver.resolve(subject, badge.unlock_metric, badge.unlock_window, &[])?;
    if value < badge.unlock_threshold {
        return Ok(BadgeDecision::NotEligible);
    }

    let expires_at = badge.expires_in_days.map(|days| now + Duration::days(days));
    Ok(BadgeDecision::Grant { expires_at })
}
