use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::domain::{
    Badge, BadgeId, Condition, GiftId, Metric, Rule, RuleId, RuleTarget, SubjectFilter, Tier,
    TierId, TimeWindow,
};

/// Raw rule row as authored in the rule store, before shape validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    pub target_type: String,
    pub target_id: String,
    pub metric: String,
    #[serde(default = "RuleDefinition::default_window")]
    pub time_window: String,
    pub operator: String,
    #[serde(default)]
    pub value_single: Option<f64>,
    #[serde(default)]
    pub value_min: Option<f64>,
    #[serde(default)]
    pub value_max: Option<f64>,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    #[serde(default = "RuleDefinition::default_active")]
    pub is_active: bool,
}

impl RuleDefinition {
    fn default_window() -> String {
        "all_time".to_string()
    }

    const fn default_active() -> bool {
        true
    }
}

/// Authoring-time rejection of a malformed rule. Rules that fail here never
/// reach evaluation, so a batch cannot trip over an invalid shape mid-run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleShapeError {
    #[error("rule {rule_id}: unknown target type '{target_type}'")]
    UnknownTargetType { rule_id: String, target_type: String },
    #[error("rule {rule_id}: unknown metric '{metric}'")]
    UnknownMetric { rule_id: String, metric: String },
    #[error("rule {rule_id}: unknown time window '{window}'")]
    UnknownWindow { rule_id: String, window: String },
    #[error("rule {rule_id}: unknown operator '{operator}'")]
    UnknownOperator { rule_id: String, operator: String },
    #[error("rule {rule_id}: operator '{operator}' requires {expected}")]
    ValueMismatch {
        rule_id: String,
        operator: String,
        expected: &'static str,
    },
    #[error("rule {rule_id}: value_min {min} exceeds value_max {max}")]
    InvertedRange { rule_id: String, min: f64, max: f64 },
    #[error("rule {rule_id}: unsupported filter key '{key}'")]
    UnsupportedFilter { rule_id: String, key: String },
}

/// Validated view over the active rule, tier, and badge definitions for one
/// evaluation run. Built once from store rows; inactive rows are dropped.
#[derive(Debug, Clone, Default)]
pub struct RuleCatalog {
    tiers: Vec<Tier>,
    badges: Vec<Badge>,
    rules: Vec<Rule>,
}

impl RuleCatalog {
    pub fn new(
        tiers: Vec<Tier>,
        badges: Vec<Badge>,
        definitions: Vec<RuleDefinition>,
    ) -> Result<Self, RuleShapeError> {
        let mut rules = Vec::new();
        for definition in definitions {
            if !definition.is_active {
                continue;
            }
            rules.push(Self::validate(&definition)?);
        }

        Ok(Self {
            tiers,
            badges: badges.into_iter().filter(|badge| badge.is_active).collect(),
            rules,
        })
    }

    /// Validate one raw definition into an evaluable rule.
    pub fn validate(definition: &RuleDefinition) -> Result<Rule, RuleShapeError> {
        let rule_id = definition.id.clone();

        let target = match definition.target_type.trim() {
            "tier" => RuleTarget::Tier(TierId(definition.target_id.clone())),
            "badge" => RuleTarget::Badge(BadgeId(definition.target_id.clone())),
            "gift" => RuleTarget::Gift(GiftId(definition.target_id.clone())),
            other => {
                return Err(RuleShapeError::UnknownTargetType {
                    rule_id,
                    target_type: other.to_string(),
                })
            }
        };

        let metric = Metric::parse(&definition.metric).ok_or_else(|| {
            RuleShapeError::UnknownMetric {
                rule_id: rule_id.clone(),
                metric: definition.metric.clone(),
            }
        })?;

        let window = TimeWindow::parse(&definition.time_window).ok_or_else(|| {
            RuleShapeError::UnknownWindow {
                rule_id: rule_id.clone(),
                window: definition.time_window.clone(),
            }
        })?;

        let condition = Self::validate_condition(definition)?;

        let mut filters = Vec::new();
        for (key, value) in &definition.filters {
            filters.push(match key.as_str() {
                "developer" => SubjectFilter::Developer(value.clone()),
                "region" => SubjectFilter::Region(value.clone()),
                other => {
                    return Err(RuleShapeError::UnsupportedFilter {
                        rule_id,
                        key: other.to_string(),
                    })
                }
            });
        }

        Ok(Rule {
            id: RuleId(rule_id),
            target,
            metric,
            window,
            condition,
            filters,
        })
    }

    fn validate_condition(definition: &RuleDefinition) -> Result<Condition, RuleShapeError> {
        let rule_id = definition.id.clone();
        let operator = definition.operator.trim();

        let single_only = |expected: &'static str| -> Result<f64, RuleShapeError> {
            match (
                definition.value_single,
                definition.value_min,
                definition.value_max,
            ) {
                (Some(value), None, None) => Ok(value),
                _ => Err(RuleShapeError::ValueMismatch {
                    rule_id: rule_id.clone(),
                    operator: operator.to_string(),
                    expected,
                }),
            }
        };

        match operator {
            ">=" => Ok(Condition::AtLeast(single_only("value_single only")?)),
            "<=" => Ok(Condition::AtMost(single_only("value_single only")?)),
            "between" => {
                let (min, max) = match (
                    definition.value_single,
                    definition.value_min,
                    definition.value_max,
                ) {
                    (None, Some(min), Some(max)) => (min, max),
                    _ => {
                        return Err(RuleShapeError::ValueMismatch {
                            rule_id,
                            operator: operator.to_string(),
                            expected: "value_min and value_max only",
                        })
                    }
                };
                if min > max {
                    return Err(RuleShapeError::InvertedRange { rule_id, min, max });
                }
                Ok(Condition::Between { min, max })
            }
            "top_n" => {
                let value = single_only("a positive integer value_single")?;
                if value < 1.0 || value.fract() != 0.0 {
                    return Err(RuleShapeError::ValueMismatch {
                        rule_id,
                        operator: operator.to_string(),
                        expected: "a positive integer value_single",
                    });
                }
                Ok(Condition::TopN(value as u64))
            }
            "top_percent" => {
                let value = single_only("a value_single in (0, 100]")?;
                if value <= 0.0 || value > 100.0 {
                    return Err(RuleShapeError::ValueMismatch {
                        rule_id,
                        operator: operator.to_string(),
                        expected: "a value_single in (0, 100]",
                    });
                }
                Ok(Condition::TopPercent(value))
            }
            other => Err(RuleShapeError::UnknownOperator {
                rule_id,
                operator: other.to_string(),
            }),
        }
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    pub fn badges(&self) -> &[Badge] {
        &self.badges
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, id: &RuleId) -> Option<&Rule> {
        self.rules.iter().find(|rule| &rule.id == id)
    }

    pub fn badge(&self, id: &BadgeId) -> Option<&Badge> {
        self.badges.iter().find(|badge| &badge.id == id)
    }
}
