use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use rewards_engine::engine::{
    AssignmentRepository, AuditError, AuditRecord, AuditSink, Badge, BadgeGrant, BadgeId,
    BehaviorRequirement, EvaluationService, GiftAward, GiftId, Metric, MetricSource,
    PopulationSnapshot, ReferralCounts, RepositoryError, RuleCatalog, RuleDefinition,
    SnapshotError, SubjectAttributes, SubjectId, SubjectRecord, Tier, TierAssignment, TierId,
    TimeWindow,
};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type ApiEvaluationService =
    EvaluationService<InMemoryMetricStore, InMemoryAssignmentRepository, LoggingAuditSink>;

pub(crate) fn build_service() -> ApiEvaluationService {
    EvaluationService::new(
        demo_catalog(),
        Arc::new(InMemoryMetricStore::with_demo_population()),
        Arc::new(InMemoryAssignmentRepository::default()),
        Arc::new(LoggingAuditSink::default()),
    )
}

/// Stand-in for the external aggregate store: serves a fixed population
/// snapshot. A production deployment implements `MetricSource` against the
/// real metrics warehouse.
#[derive(Default, Clone)]
pub(crate) struct InMemoryMetricStore {
    snapshot: Option<PopulationSnapshot>,
}

impl InMemoryMetricStore {
    pub(crate) fn with_demo_population() -> Self {
        let mut snapshot = PopulationSnapshot::new(Utc::now());
        let agents: [(&str, u32, u32, u32, f64, f64, &str); 5] = [
            ("agent-alvarez", 14, 6, 4, 31.0, 2_450_000.0, "east"),
            ("agent-brooks", 62, 57, 40, 88.0, 7_900_000.0, "east"),
            ("agent-chen", 3, 1, 0, 6.0, 410_000.0, "west"),
            ("agent-davies", 27, 22, 15, 44.0, 3_100_000.0, "west"),
            ("agent-evans", 8, 2, 1, 12.0, 950_000.0, "east"),
        ];

        for (id, total, verified, first_deal, deals, volume, region) in agents {
            let record = SubjectRecord::new(
                ReferralCounts {
                    total_referrals: total,
                    verified_referrals: verified,
                    referrals_with_first_deal: first_deal,
                },
                SubjectAttributes {
                    developer: Some("skyline-homes".to_string()),
                    region: Some(region.to_string()),
                },
            )
            .with_metric(Metric::DealsCount, TimeWindow::AllTime, deals)
            .with_metric(Metric::DealsCount, TimeWindow::Last90d, (deals / 4.0).floor())
            .with_metric(Metric::DealsVolume, TimeWindow::Year, volume)
            .with_metric(Metric::Revenue, TimeWindow::Year, volume * 0.03);
            snapshot.insert(SubjectId(id.to_string()), record);
        }

        Self {
            snapshot: Some(snapshot),
        }
    }
}

impl MetricSource for InMemoryMetricStore {
    fn snapshot(&self) -> Result<PopulationSnapshot, SnapshotError> {
        self.snapshot
            .clone()
            .ok_or_else(|| SnapshotError::Unavailable("metric store not seeded".to_string()))
    }
}

#[derive(Default)]
pub(crate) struct InMemoryAssignmentRepository {
    tiers: Mutex<HashMap<SubjectId, TierAssignment>>,
    badges: Mutex<HashMap<(SubjectId, BadgeId), Vec<BadgeGrant>>>,
    gifts: Mutex<HashMap<(SubjectId, GiftId), GiftAward>>,
}

impl AssignmentRepository for InMemoryAssignmentRepository {
    fn tier_assignment(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<TierAssignment>, RepositoryError> {
        let guard = self.tiers.lock().expect("repository mutex poisoned");
        Ok(guard.get(subject).cloned())
    }

    fn store_tier(&self, assignment: TierAssignment) -> Result<(), RepositoryError> {
        let mut guard = self.tiers.lock().expect("repository mutex poisoned");
        guard.insert(assignment.subject.clone(), assignment);
        Ok(())
    }

    fn badge_grant(
        &self,
        subject: &SubjectId,
        badge: &BadgeId,
    ) -> Result<Option<BadgeGrant>, RepositoryError> {
        let guard = self.badges.lock().expect("repository mutex poisoned");
        Ok(guard
            .get(&(subject.clone(), badge.clone()))
            .and_then(|history| history.last().cloned()))
    }

    fn insert_badge_grant(&self, grant: BadgeGrant) -> Result<(), RepositoryError> {
        let mut guard = self.badges.lock().expect("repository mutex poisoned");
        guard
            .entry((grant.subject.clone(), grant.badge.clone()))
            .or_default()
            .push(grant);
        Ok(())
    }

    fn badge_grants(&self, subject: &SubjectId) -> Result<Vec<BadgeGrant>, RepositoryError> {
        let guard = self.badges.lock().expect("repository mutex poisoned");
        Ok(guard
            .iter()
            .filter(|((grant_subject, _), _)| grant_subject == subject)
            .filter_map(|(_, history)| history.last().cloned())
            .collect())
    }

    fn gift_award(
        &self,
        subject: &SubjectId,
        gift: &GiftId,
    ) -> Result<Option<GiftAward>, RepositoryError> {
        let guard = self.gifts.lock().expect("repository mutex poisoned");
        Ok(guard.get(&(subject.clone(), gift.clone())).cloned())
    }

    fn insert_gift_award(&self, award: GiftAward) -> Result<(), RepositoryError> {
        let mut guard = self.gifts.lock().expect("repository mutex poisoned");
        guard.insert((award.subject.clone(), award.gift.clone()), award);
        Ok(())
    }

    fn gift_awards(&self, subject: &SubjectId) -> Result<Vec<GiftAward>, RepositoryError> {
        let guard = self.gifts.lock().expect("repository mutex poisoned");
        Ok(guard
            .values()
            .filter(|award| &award.subject == subject)
            .cloned()
            .collect())
    }
}

/// Audit sink that mirrors every record to the log stream so apply runs
/// are traceable from the service output. A production deployment swaps in
/// a sink backed by the durable audit store.
#[derive(Default)]
pub(crate) struct LoggingAuditSink;

impl AuditSink for LoggingAuditSink {
    fn record(&self, entry: AuditRecord) -> Result<(), AuditError> {
        info!(
            actor = %entry.actor,
            action = %entry.action,
            resource = %entry.resource_id,
            "assignment changed"
        );
        Ok(())
    }
}

pub(crate) fn demo_catalog() -> RuleCatalog {
    let tiers = vec![
        Tier {
            id: TierId("tier-bronze".to_string()),
            name: "Bronze".to_string(),
            level: 1,
            bonus_percentage: 2.0,
            min_referrals: 0,
            max_referrals: Some(9),
            behavior_requirement: BehaviorRequirement::None,
        },
        Tier {
            id: TierId("tier-silver".to_string()),
            name: "Silver".to_string(),
            level: 2,
            bonus_percentage: 5.0,
            min_referrals: 10,
            max_referrals: Some(49),
            behavior_requirement: BehaviorRequirement::None,
        },
        Tier {
            id: TierId("tier-gold".to_string()),
            name: "Gold".to_string(),
            level: 3,
            bonus_percentage: 10.0,
            min_referrals: 50,
            max_referrals: None,
            behavior_requirement: BehaviorRequirement::Verified,
        },
    ];

    let badges = vec![
        Badge {
            id: BadgeId("badge-closer".to_string()),
            badge_type: "top_closer".to_string(),
            unlock_metric: Metric::DealsCount,
            unlock_window: TimeWindow::AllTime,
            unlock_threshold: 25.0,
            benefit_type: "commission_boost".to_string(),
            benefit_value: 1.5,
            expires_in_days: None,
            is_active: true,
        },
        Badge {
            id: BadgeId("badge-rising-star".to_string()),
            badge_type: "rising_star".to_string(),
            unlock_metric: Metric::DealsCount,
            unlock_window: TimeWindow::Last90d,
            unlock_threshold: 5.0,
            benefit_type: "priority_leads".to_string(),
            benefit_value: 1.0,
            expires_in_days: Some(90),
            is_active: true,
        },
    ];

    RuleCatalog::new(tiers, badges, demo_rule_definitions())
        .expect("demo catalog is well formed")
}

pub(crate) fn demo_rule_definitions() -> Vec<RuleDefinition> {
    vec![RuleDefinition {
        id: "rule-presidents-club".to_string(),
        target_type: "gift".to_string(),
        target_id: "gift-presidents-club".to_string(),
        metric: "deals_volume".to_string(),
        time_window: "year".to_string(),
        operator: "top_n".to_string(),
        value_single: Some(3.0),
        value_min: None,
        value_max: None,
        filters: Default::default(),
        is_active: true,
    }]
}
