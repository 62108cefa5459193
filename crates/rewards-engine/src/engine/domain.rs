use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for the agent whose eligibility is evaluated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectId(pub String);

/// Identifier wrapper for stored rule definitions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TierId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BadgeId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GiftId(pub String);

/// Named, time-windowed numeric facts the resolver understands.
///
/// The set is closed on purpose: a rule referencing a name outside this set
/// is rejected during validation instead of silently resolving to zero.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    DealsCount,
    DealsVolume,
    Revenue,
    Referrals,
    ClaimAcceptance,
    ListingsCount,
}

impl Metric {
    pub const fn label(self) -> &'static str {
        match self {
            Metric::DealsCount => "deals_count",
            Metric::DealsVolume => "deals_volume",
            Metric::Revenue => "revenue",
            Metric::Referrals => "referrals",
            Metric::ClaimAcceptance => "claim_acceptance",
            Metric::ListingsCount => "listings_count",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "deals_count" => Some(Metric::DealsCount),
            "deals_volume" => Some(Metric::DealsVolume),
            "revenue" => Some(Metric::Revenue),
            "referrals" => Some(Metric::Referrals),
            "claim_acceptance" => Some(Metric::ClaimAcceptance),
            "listings_count" => Some(Metric::ListingsCount),
            _ => None,
        }
    }
}

/// Aggregation window a metric value was computed over.
///
/// Sliding windows are half-open `[now - window, now)`; `Quarter` and `Year`
/// run from the start of the current calendar quarter/year to `now`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    AllTime,
    Last30d,
    Last90d,
    Quarter,
    Year,
}

impl TimeWindow {
    pub const fn label(self) -> &'static str {
        match self {
            TimeWindow::AllTime => "all_time",
            TimeWindow::Last30d => "last_30d",
            TimeWindow::Last90d => "last_90d",
            TimeWindow::Quarter => "quarter",
            TimeWindow::Year => "year",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "all_time" => Some(TimeWindow::AllTime),
            "last_30d" => Some(TimeWindow::Last30d),
            "last_90d" => Some(TimeWindow::Last90d),
            "quarter" => Some(TimeWindow::Quarter),
            "year" => Some(TimeWindow::Year),
            _ => None,
        }
    }

    /// Inclusive lower bound of the window relative to the evaluation
    /// instant; `None` means unbounded (`AllTime`).
    pub fn starting_from(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimeWindow::AllTime => None,
            TimeWindow::Last30d => Some(now - Duration::days(30)),
            TimeWindow::Last90d => Some(now - Duration::days(90)),
            TimeWindow::Quarter => {
                let month = (now.month0() / 3) * 3 + 1;
                Utc.with_ymd_and_hms(now.year(), month, 1, 0, 0, 0).single()
            }
            TimeWindow::Year => Utc.with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0).single(),
        }
    }
}

/// Typed operator plus threshold values, so the shape invariant
/// (`value_single` xor `value_min`/`value_max`) holds by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    AtLeast(f64),
    AtMost(f64),
    Between { min: f64, max: f64 },
    TopN(u64),
    TopPercent(f64),
}

impl Condition {
    pub const fn operator_label(&self) -> &'static str {
        match self {
            Condition::AtLeast(_) => ">=",
            Condition::AtMost(_) => "<=",
            Condition::Between { .. } => "between",
            Condition::TopN(_) => "top_n",
            Condition::TopPercent(_) => "top_percent",
        }
    }

    /// Rank conditions need a population snapshot; scalar ones do not.
    pub const fn is_ranked(&self) -> bool {
        matches!(self, Condition::TopN(_) | Condition::TopPercent(_))
    }
}

/// Closed set of supported population filters, applied as an AND-conjunction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectFilter {
    Developer(String),
    Region(String),
}

impl SubjectFilter {
    pub fn matches(&self, attributes: &SubjectAttributes) -> bool {
        match self {
            SubjectFilter::Developer(wanted) => {
                attributes.developer.as_deref() == Some(wanted.as_str())
            }
            SubjectFilter::Region(wanted) => {
                attributes.region.as_deref() == Some(wanted.as_str())
            }
        }
    }
}

/// What a rule grants when a subject satisfies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleTarget {
    Tier(TierId),
    Badge(BadgeId),
    Gift(GiftId),
}

/// Validated, evaluable form of a stored rule definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub target: RuleTarget,
    pub metric: Metric,
    pub window: TimeWindow,
    pub condition: Condition,
    pub filters: Vec<SubjectFilter>,
}

/// Referral counter a tier compares its bounds against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorRequirement {
    None,
    Verified,
    FirstDeal,
}

/// Ordered reward level authored by operators; the engine only resolves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub id: TierId,
    pub name: String,
    pub level: u32,
    pub bonus_percentage: f64,
    pub min_referrals: u32,
    pub max_referrals: Option<u32>,
    pub behavior_requirement: BehaviorRequirement,
}

/// Achievement grant definition with an `>=` unlock threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    pub id: BadgeId,
    pub badge_type: String,
    pub unlock_metric: Metric,
    pub unlock_window: TimeWindow,
    pub unlock_threshold: f64,
    pub benefit_type: String,
    pub benefit_value: f64,
    pub expires_in_days: Option<i64>,
    pub is_active: bool,
}

/// Per-subject aggregate referral counters consumed by tier resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralCounts {
    pub total_referrals: u32,
    pub verified_referrals: u32,
    pub referrals_with_first_deal: u32,
}

impl ReferralCounts {
    pub fn for_behavior(&self, behavior: BehaviorRequirement) -> u32 {
        match behavior {
            BehaviorRequirement::None => self.total_referrals,
            BehaviorRequirement::Verified => self.verified_referrals,
            BehaviorRequirement::FirstDeal => self.referrals_with_first_deal,
        }
    }
}

/// Attributes the population filters match against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectAttributes {
    pub developer: Option<String>,
    pub region: Option<String>,
}

/// Everything the engine knows about one subject at snapshot time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub referrals: ReferralCounts,
    pub attributes: SubjectAttributes,
    values: BTreeMap<Metric, BTreeMap<TimeWindow, f64>>,
}

impl SubjectRecord {
    pub fn new(referrals: ReferralCounts, attributes: SubjectAttributes) -> Self {
        Self {
            referrals,
            attributes,
            values: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, metric: Metric, window: TimeWindow, value: f64) -> Self {
        self.values.entry(metric).or_default().insert(window, value);
        self
    }

    pub fn value(&self, metric: Metric, window: TimeWindow) -> Option<f64> {
        self.values.get(&metric).and_then(|per_window| per_window.get(&window)).copied()
    }
}

/// Immutable read snapshot taken at the start of a run. Evaluation is a pure
/// function of (catalog, snapshot, now), never of live store state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationSnapshot {
    taken_at: DateTime<Utc>,
    subjects: BTreeMap<SubjectId, SubjectRecord>,
}

impl PopulationSnapshot {
    pub fn new(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            subjects: BTreeMap::new(),
        }
    }

    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    pub fn insert(&mut self, subject: SubjectId, record: SubjectRecord) {
        self.subjects.insert(subject, record);
    }

    pub fn with_subject(mut self, subject: SubjectId, record: SubjectRecord) -> Self {
        self.insert(subject, record);
        self
    }

    pub fn record(&self, subject: &SubjectId) -> Option<&SubjectRecord> {
        self.subjects.get(subject)
    }

    pub fn subjects(&self) -> impl Iterator<Item = (&SubjectId, &SubjectRecord)> {
        self.subjects.iter()
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

/// Stored tier assignment. Promotion-only: level never decreases via runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierAssignment {
    pub subject: SubjectId,
    pub tier: TierId,
    pub tier_name: String,
    pub level: u32,
    pub bonus_percentage: f64,
    pub awarded_at: DateTime<Utc>,
}

/// Stored badge grant. Exactly one active grant per (subject, badge);
/// expired rows are retained for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeGrant {
    pub subject: SubjectId,
    pub badge: BadgeId,
    pub unlocked_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl BadgeGrant {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|expiry| expiry > now).unwrap_or(true)
    }
}

/// One-time gift award produced by gift-targeted rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftAward {
    pub subject: SubjectId,
    pub gift: GiftId,
    pub rule: RuleId,
    pub awarded_at: DateTime<Utc>,
}

/// Audit trail entry emitted for every created or changed assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub actor: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub metadata: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}
