use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};

use crate::engine::catalog::{RuleCatalog, RuleDefinition};
use crate::engine::domain::{
    AuditRecord, Badge, BadgeGrant, BadgeId, BehaviorRequirement, GiftAward, GiftId, Metric,
    PopulationSnapshot, ReferralCounts, SubjectAttributes, SubjectId, SubjectRecord, Tier,
    TierAssignment, TierId, TimeWindow,
};
use crate::engine::repository::{
    AssignmentRepository, AuditError, AuditSink, MetricSource, RepositoryError, SnapshotError,
};
use crate::engine::service::EvaluationService;

pub(super) fn evaluation_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 20, 9, 0, 0)
        .single()
        .expect("valid instant")
}

pub(super) fn referral_counts(total: u32, verified: u32, first_deal: u32) -> ReferralCounts {
    ReferralCounts {
        total_referrals: total,
        verified_referrals: verified,
        referrals_with_first_deal: first_deal,
    }
}

/// Bronze/Silver/Gold ladder with a verified-only Gold, matching the shape
/// operators author in production.
pub(super) fn tier_ladder() -> Vec<Tier> {
    vec![
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
    ]
}

pub(super) fn closer_badge() -> Badge {
    Badge {
        id: BadgeId("badge-closer".to_string()),
        badge_type: "top_closer".to_string(),
        unlock_metric: Metric::DealsCount,
        unlock_window: TimeWindow::AllTime,
        unlock_threshold: 5.0,
        benefit_type: "commission_boost".to_string(),
        benefit_value: 1.5,
        expires_in_days: None,
        is_active: true,
    }
}

pub(super) fn streak_badge() -> Badge {
    Badge {
        id: BadgeId("badge-streak".to_string()),
        badge_type: "hot_streak".to_string(),
        unlock_metric: Metric::DealsCount,
        unlock_window: TimeWindow::Last30d,
        unlock_threshold: 3.0,
        benefit_type: "priority_leads".to_string(),
        benefit_value: 1.0,
        expires_in_days: Some(30),
        is_active: true,
    }
}

pub(super) fn gift_rule_definition() -> RuleDefinition {
    RuleDefinition {
        id: "rule-anniversary-gift".to_string(),
        target_type: "gift".to_string(),
        target_id: "gift-anniversary".to_string(),
        metric: "deals_count".to_string(),
        time_window: "all_time".to_string(),
        operator: ">=".to_string(),
        value_single: Some(5.0),
        value_min: None,
        value_max: None,
        filters: Default::default(),
        is_active: true,
    }
}

/// Ten agents; exactly three of them (02, 05, 08) have `deals_count >= 5`.
pub(super) fn ten_agent_snapshot() -> PopulationSnapshot {
    let mut snapshot = PopulationSnapshot::new(evaluation_instant());
    for index in 0..10u32 {
        let deals = match index {
            2 => 7.0,
            5 => 5.0,
            8 => 12.0,
            other => other.min(4) as f64,
        };
        let record = SubjectRecord::new(
            referral_counts(index, index / 2, index / 3),
            SubjectAttributes::default(),
        )
        .with_metric(Metric::DealsCount, TimeWindow::AllTime, deals)
        .with_metric(Metric::DealsCount, TimeWindow::Last30d, deals / 2.0);
        snapshot.insert(SubjectId(format!("agent-{index:02}")), record);
    }
    snapshot
}

pub(super) fn subject(id: &str) -> SubjectId {
    SubjectId(id.to_string())
}

#[derive(Clone)]
pub(super) struct StaticMetricSource {
    snapshot: PopulationSnapshot,
}

impl StaticMetricSource {
    pub(super) fn new(snapshot: PopulationSnapshot) -> Self {
        Self { snapshot }
    }
}

impl MetricSource for StaticMetricSource {
    fn snapshot(&self) -> Result<PopulationSnapshot, SnapshotError> {
        Ok(self.snapshot.clone())
    }
}

pub(super) struct OfflineMetricSource;

impl MetricSource for OfflineMetricSource {
    fn snapshot(&self) -> Result<PopulationSnapshot, SnapshotError> {
        Err(SnapshotError::Unavailable("aggregate store offline".to_string()))
    }
}

#[derive(Default)]
pub(super) struct MemoryRepository {
    tiers: Mutex<HashMap<SubjectId, TierAssignment>>,
    badges: Mutex<HashMap<(SubjectId, BadgeId), Vec<BadgeGrant>>>,
    gifts: Mutex<HashMap<(SubjectId, GiftId), GiftAward>>,
    writes: Mutex<usize>,
}

impl MemoryRepository {
    pub(super) fn write_count(&self) -> usize {
        *self.writes.lock().expect("repository mutex poisoned")
    }

    pub(super) fn badge_history(&self, subject: &SubjectId, badge: &BadgeId) -> Vec<BadgeGrant> {
        self.badges
            .lock()
            .expect("repository mutex poisoned")
            .get(&(subject.clone(), badge.clone()))
            .cloned()
            .unwrap_or_default()
    }

    fn bump_writes(&self) {
        *self.writes.lock().expect("repository mutex poisoned") += 1;
    }
}

impl AssignmentRepository for MemoryRepository {
    fn tier_assignment(
        &self,
        subject: &SubjectId,
    ) -> Result<Option<TierAssignment>, RepositoryError> {
        Ok(self
            .tiers
            .lock()
            .expect("repository mutex poisoned")
            .get(subject)
            .cloned())
    }

    fn store_tier(&self, assignment: TierAssignment) -> Result<(), RepositoryError> {
        self.bump_writes();
        self.tiers
            .lock()
            .expect("repository mutex poisoned")
            .insert(assignment.subject.clone(), assignment);
        Ok(())
    }

    fn badge_grant(
        &self,
        subject: &SubjectId,
        badge: &BadgeId,
    ) -> Result<Option<BadgeGrant>, RepositoryError> {
        Ok(self
            .badges
            .lock()
            .expect("repository mutex poisoned")
            .get(&(subject.clone(), badge.clone()))
            .and_then(|history| history.last().cloned()))
    }

    fn insert_badge_grant(&self, grant: BadgeGrant) -> Result<(), RepositoryError> {
        self.bump_writes();
        self.badges
            .lock()
            .expect("repository mutex poisoned")
            .entry((grant.subject.clone(), grant.badge.clone()))
            .or_default()
            .push(grant);
        Ok(())
    }

    fn badge_grants(&self, subject: &SubjectId) -> Result<Vec<BadgeGrant>, RepositoryError> {
        Ok(self
            .badges
            .lock()
            .expect("repository mutex poisoned")
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
        Ok(self
            .gifts
            .lock()
            .expect("repository mutex poisoned")
            .get(&(subject.clone(), gift.clone()))
            .cloned())
    }

    fn insert_gift_award(&self, award: GiftAward) -> Result<(), RepositoryError> {
        self.bump_writes();
        self.gifts
            .lock()
            .expect("repository mutex poisoned")
            .insert((award.subject.clone(), award.gift.clone()), award);
        Ok(())
    }

    fn gift_awards(&self, subject: &SubjectId) -> Result<Vec<GiftAward>, RepositoryError> {
        Ok(self
            .gifts
            .lock()
            .expect("repository mutex poisoned")
            .values()
            .filter(|award| &award.subject == subject)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(super) struct MemoryAudit {
    entries: Mutex<Vec<AuditRecord>>,
}

impl MemoryAudit {
    pub(super) fn entries(&self) -> Vec<AuditRecord> {
        self.entries.lock().expect("audit mutex poisoned").clone()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, entry: AuditRecord) -> Result<(), AuditError> {
        self.entries.lock().expect("audit mutex poisoned").push(entry);
        Ok(())
    }
}

pub(super) type TestService = EvaluationService<StaticMetricSource, MemoryRepository, MemoryAudit>;

pub(super) fn build_service(
    catalog: RuleCatalog,
    snapshot: PopulationSnapshot,
) -> (TestService, Arc<MemoryRepository>, Arc<MemoryAudit>) {
    let repository = Arc::new(MemoryRepository::default());
    let audit = Arc::new(MemoryAudit::default());
    let service = EvaluationService::new(
        catalog,
        Arc::new(StaticMetricSource::new(snapshot)),
        repository.clone(),
        audit.clone(),
    );
    (service, repository, audit)
}

pub(super) fn full_catalog() -> RuleCatalog {
    RuleCatalog::new(
        tier_ladder(),
        vec![closer_badge(), streak_badge()],
        vec![gift_rule_definition()],
    )
    .expect("fixture catalog is well formed")
}
