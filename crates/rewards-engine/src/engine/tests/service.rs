use std::sync::Arc;

use chrono::Duration;

use super::common::*;
use crate::engine::domain::{
    Metric, PopulationSnapshot, RuleId, SubjectAttributes, SubjectRecord, TimeWindow,
};
use crate::engine::repository::AssignmentRepository;
use crate::engine::service::{EngineServiceError, EvaluationService};

#[test]
fn preview_reports_count_and_sample_without_persisting() {
    let (service, repository, audit) = build_service(full_catalog(), ten_agent_snapshot());

    let outcome = service
        .preview(&gift_rule_definition())
        .expect("preview succeeds");

    assert_eq!(outcome.count, 3);
    assert!(outcome.sample.len() <= outcome.count);
    for subject in &outcome.sample {
        assert!(["agent-02", "agent-05", "agent-08"].contains(&subject.0.as_str()));
    }

    assert_eq!(repository.write_count(), 0);
    assert!(audit.entries().is_empty());
}

#[test]
fn preview_is_repeatable() {
    let (service, _, _) = build_service(full_catalog(), ten_agent_snapshot());

    let first = service.preview(&gift_rule_definition()).expect("first preview");
    let second = service.preview(&gift_rule_definition()).expect("second preview");
    assert_eq!(first, second);
}

#[test]
fn preview_rejects_malformed_definitions_synchronously() {
    let (service, _, _) = build_service(full_catalog(), ten_agent_snapshot());

    let mut malformed = gift_rule_definition();
    malformed.value_single = None;

    match service.preview(&malformed) {
        Err(EngineServiceError::Shape(_)) => {}
        other => panic!("expected shape rejection, got {other:?}"),
    }
}

#[test]
fn preview_of_rank_rule_needs_a_population() {
    let (service, _, _) = build_service(full_catalog(), PopulationSnapshot::new(evaluation_instant()));

    let mut rank_rule = gift_rule_definition();
    rank_rule.operator = "top_n".to_string();
    rank_rule.value_single = Some(3.0);

    match service.preview(&rank_rule) {
        Ok(outcome) => assert_eq!(outcome.count, 0),
        Err(EngineServiceError::Evaluation(_)) => {}
        other => panic!("expected empty or insufficient population, got {other:?}"),
    }
}

#[test]
fn apply_assigns_tiers_badges_and_gifts() {
    let (service, repository, audit) = build_service(full_catalog(), ten_agent_snapshot());
    let now = evaluation_instant();

    let outcome = service.apply("ops@example.com", now).expect("apply succeeds");

    assert_eq!(outcome.evaluated, 10);
    // Every agent has 0..=9 total referrals, so the whole population lands
    // on Bronze.
    assert_eq!(outcome.tier_changes, 10);
    // closer badge: agents 02/05/08; streak badge: agents 02/08.
    assert_eq!(outcome.badge_grants, 5);
    assert_eq!(outcome.gift_awards, 3);
    assert!(outcome.failures.is_empty());

    let entries = audit.entries();
    assert_eq!(entries.len(), 18);
    assert!(entries.iter().all(|entry| entry.actor == "ops@example.com"));
    assert!(entries.iter().any(|entry| entry.action == "tier.promoted"));
    assert!(entries.iter().any(|entry| entry.action == "badge.granted"));
    assert!(entries.iter().any(|entry| entry.action == "gift.awarded"));

    let stored = repository
        .tier_assignment(&subject("agent-07"))
        .expect("fetch succeeds")
        .expect("tier assigned");
    assert_eq!(stored.tier_name, "Bronze");
    assert_eq!(stored.awarded_at, now);
}

#[test]
fn apply_is_idempotent_over_unchanged_inputs() {
    let (service, repository, audit) = build_service(full_catalog(), ten_agent_snapshot());
    let now = evaluation_instant();

    service.apply("system", now).expect("first run succeeds");
    let writes_after_first = repository.write_count();
    let audits_after_first = audit.entries().len();

    let second = service
        .apply("system", now + Duration::hours(1))
        .expect("second run succeeds");

    assert_eq!(second.tier_changes, 0);
    assert_eq!(second.badge_grants, 0);
    assert_eq!(second.gift_awards, 0);
    assert_eq!(repository.write_count(), writes_after_first);
    assert_eq!(audit.entries().len(), audits_after_first);
}

#[test]
fn apply_never_downgrades_a_stored_tier() {
    let now = evaluation_instant();

    let strong = PopulationSnapshot::new(now).with_subject(
        subject("agent-star"),
        SubjectRecord::new(referral_counts(12, 3, 0), SubjectAttributes::default())
            .with_metric(Metric::DealsCount, TimeWindow::AllTime, 0.0)
            .with_metric(Metric::DealsCount, TimeWindow::Last30d, 0.0),
    );
    let weakened = PopulationSnapshot::new(now).with_subject(
        subject("agent-star"),
        SubjectRecord::new(referral_counts(3, 0, 0), SubjectAttributes::default())
            .with_metric(Metric::DealsCount, TimeWindow::AllTime, 0.0)
            .with_metric(Metric::DealsCount, TimeWindow::Last30d, 0.0),
    );

    let (service, repository, audit) = build_service(full_catalog(), strong);
    service.apply("system", now).expect("first run succeeds");
    let stored = repository
        .tier_assignment(&subject("agent-star"))
        .expect("fetch succeeds")
        .expect("tier assigned");
    assert_eq!(stored.tier_name, "Silver");

    // Same repository, later snapshot where the metrics have slipped.
    let demoting = EvaluationService::new(
        full_catalog(),
        Arc::new(StaticMetricSource::new(weakened)),
        repository.clone(),
        audit.clone(),
    );
    let outcome = demoting
        .apply("system", now + Duration::days(1))
        .expect("second run succeeds");

    assert_eq!(outcome.tier_changes, 0);
    let stored = repository
        .tier_assignment(&subject("agent-star"))
        .expect("fetch succeeds")
        .expect("tier kept");
    assert_eq!(stored.tier_name, "Silver");
    assert_eq!(stored.awarded_at, now, "grants are never re-timestamped");
}

#[test]
fn per_subject_failures_do_not_abort_the_batch() {
    let now = evaluation_instant();
    // agent-gap has referral counters but no deal metrics at all, so every
    // metric-backed pass fails for it while the rest of the batch proceeds.
    let snapshot = ten_agent_snapshot().with_subject(
        subject("agent-gap"),
        SubjectRecord::new(referral_counts(4, 1, 0), SubjectAttributes::default()),
    );

    let (service, repository, _) = build_service(full_catalog(), snapshot);
    let outcome = service.apply("system", now).expect("batch completes");

    assert_eq!(outcome.evaluated, 11);
    assert!(outcome
        .failures
        .iter()
        .all(|failure| failure.subject == subject("agent-gap")));
    // closer badge, streak badge, and the gift rule each fail to resolve.
    assert_eq!(outcome.failures.len(), 3);

    // The failing subject still got its referral-based tier.
    assert!(repository
        .tier_assignment(&subject("agent-gap"))
        .expect("fetch succeeds")
        .is_some());
    assert_eq!(outcome.badge_grants, 5);
    assert_eq!(outcome.gift_awards, 3);
}

#[test]
fn apply_rule_restricts_the_run_to_one_rule() {
    let (service, repository, _) = build_service(full_catalog(), ten_agent_snapshot());
    let now = evaluation_instant();

    let outcome = service
        .apply_rule(&RuleId("rule-anniversary-gift".to_string()), "ops", now)
        .expect("single-rule apply succeeds");

    assert_eq!(outcome.gift_awards, 3);
    assert_eq!(outcome.tier_changes, 0);
    assert_eq!(outcome.badge_grants, 0);
    assert!(repository
        .tier_assignment(&subject("agent-02"))
        .expect("fetch succeeds")
        .is_none());
}

#[test]
fn apply_rule_rejects_unknown_ids() {
    let (service, _, _) = build_service(full_catalog(), ten_agent_snapshot());

    match service.apply_rule(&RuleId("rule-nope".to_string()), "ops", evaluation_instant()) {
        Err(EngineServiceError::UnknownRule(id)) => assert_eq!(id, "rule-nope"),
        other => panic!("expected unknown rule, got {other:?}"),
    }
}

#[test]
fn assignments_view_reflects_applied_state() {
    let (service, _, _) = build_service(full_catalog(), ten_agent_snapshot());
    let now = evaluation_instant();
    service.apply("system", now).expect("apply succeeds");

    let view = service
        .assignments(&subject("agent-02"), now)
        .expect("view builds");
    assert_eq!(view.tier.name, "Bronze");
    assert_eq!(view.tier.level, 1);
    assert_eq!(view.badges.len(), 2);
    assert_eq!(view.gifts.len(), 1);

    let unknown = service
        .assignments(&subject("agent-nobody"), now)
        .expect("view builds for unknown subjects");
    assert_eq!(unknown.tier.name, "Tier 0");
    assert_eq!(unknown.tier.bonus_percentage, 0.0);
    assert!(unknown.badges.is_empty());
    assert!(unknown.gifts.is_empty());
}

#[test]
fn assignments_view_hides_expired_badges() {
    let (service, _, _) = build_service(full_catalog(), ten_agent_snapshot());
    let now = evaluation_instant();
    service.apply("system", now).expect("apply succeeds");

    // The streak badge expires after 30 days; the closer badge is permanent.
    let later = now + Duration::days(45);
    let view = service
        .assignments(&subject("agent-02"), later)
        .expect("view builds");
    assert_eq!(view.badges.len(), 1);
    assert_eq!(view.badges[0].badge_id.0, "badge-closer");
}

#[test]
fn snapshot_outage_fails_the_run_up_front() {
    let service = EvaluationService::new(
        full_catalog(),
        Arc::new(OfflineMetricSource),
        Arc::new(MemoryRepository::default()),
        Arc::new(MemoryAudit::default()),
    );

    match service.apply("system", evaluation_instant()) {
        Err(EngineServiceError::Snapshot(_)) => {}
        other => panic!("expected snapshot failure, got {other:?}"),
    }
}
