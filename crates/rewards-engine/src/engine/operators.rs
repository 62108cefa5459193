use super::domain::{Condition, SubjectId};
use super::metrics::{EvaluationError, Ranking};

impl Condition {
    /// Scalar satisfaction check. `between` is inclusive on both ends.
    /// Rank conditions are undefined without a population and fail rather
    /// than guess.
    pub fn satisfied_by(&self, value: f64) -> Result<bool, EvaluationError> {
        match self {
            Condition::AtLeast(threshold) => Ok(value >= *threshold),
            Condition::AtMost(threshold) => Ok(value <= *threshold),
            Condition::Between { min, max } => Ok(*min <= value && value <= *max),
            Condition::TopN(_) | Condition::TopPercent(_) => {
                Err(EvaluationError::InsufficientPopulation {
                    operator: self.operator_label(),
                })
            }
        }
    }

    /// Rank satisfaction check against a materialized population ranking.
    /// Scalar conditions never reach this path.
    pub fn satisfied_in(
        &self,
        subject: &SubjectId,
        ranking: &Ranking,
    ) -> Result<bool, EvaluationError> {
        if ranking.is_empty() {
            return Err(EvaluationError::InsufficientPopulation {
                operator: self.operator_label(),
            });
        }

        let cutoff = match self {
            Condition::TopN(count) => *count as usize,
            Condition::TopPercent(percent) => {
                ((percent / 100.0) * ranking.len() as f64).ceil() as usize
            }
            _ => {
                return Err(EvaluationError::InsufficientPopulation {
                    operator: self.operator_label(),
                })
            }
        };

        Ok(ranking
            .position(subject)
            .map(|rank| rank < cutoff)
            .unwrap_or(false))
    }
}
