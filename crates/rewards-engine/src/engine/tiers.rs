use serde::{Deserialize, Serialize};

use super::domain::{ReferralCounts, Tier, TierId};

/// Outcome of tier resolution: a qualifying tier, or the Tier 0 baseline
/// when the ladder is empty or nothing matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TierResolution {
    Qualified(Tier),
    Baseline,
}

impl TierResolution {
    pub fn tier_id(&self) -> Option<&TierId> {
        match self {
            TierResolution::Qualified(tier) => Some(&tier.id),
            TierResolution::Baseline => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TierResolution::Qualified(tier) => &tier.name,
            TierResolution::Baseline => "Tier 0",
        }
    }

    pub fn level(&self) -> u32 {
        match self {
            TierResolution::Qualified(tier) => tier.level,
            TierResolution::Baseline => 0,
        }
    }

    pub fn bonus_percentage(&self) -> f64 {
        match self {
            TierResolution::Qualified(tier) => tier.bonus_percentage,
            TierResolution::Baseline => 0.0,
        }
    }
}

/// Pick the tier an agent currently satisfies.
///
/// Tiers are walked in descending `min_referrals` order and the first match
/// wins. Each tier compares against the referral counter named by its own
/// `behavior_requirement`, so with mixed requirements the walk order does
/// not always pick the objectively richest qualifying tier. Downstream
/// consumers depend on that ordering, so it is kept as-is; see DESIGN.md.
pub fn resolve_tier(tiers: &[Tier], counts: &ReferralCounts) -> TierResolution {
    if tiers.is_empty() {
        return TierResolution::Baseline;
    }

    let mut ladder: Vec<&Tier> = tiers.iter().collect();
    ladder.sort_by(|left, right| {
        right
            .min_referrals
            .cmp(&left.min_referrals)
            .then_with(|| right.level.cmp(&left.level))
    });

    for tier in ladder {
        let value = counts.for_behavior(tier.behavior_requirement);
        let above_min = value >= tier.min_referrals;
        let below_max = tier.max_referrals.map(|max| value <= max).unwrap_or(true);
        if above_min && below_max {
            return TierResolution::Qualified(tier.clone());
        }
    }

    TierResolution::Baseline
}
