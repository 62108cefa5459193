use std::cmp::Ordering;

use super::domain::{Metric, PopulationSnapshot, SubjectFilter, SubjectId, TimeWindow};

/// Runtime evaluation failures. During batch apply these are caught and
/// reported per subject; preview surfaces them synchronously.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),
    #[error("unsupported filter key '{0}'")]
    UnsupportedFilter(String),
    #[error("operator '{operator}' requires a ranked population")]
    InsufficientPopulation { operator: &'static str },
    #[error("metric {metric} ({window}) unavailable for subject {subject}")]
    MetricResolution {
        subject: String,
        metric: &'static str,
        window: &'static str,
    },
}

/// Pure read over a population snapshot: single values, filtered
/// populations, and ranked orderings for the rank operators.
pub struct MetricResolver<'a> {
    snapshot: &'a PopulationSnapshot,
}

impl<'a> MetricResolver<'a> {
    pub fn new(snapshot: &'a PopulationSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &PopulationSnapshot {
        self.snapshot
    }

    /// Resolve a raw metric name, rejecting unknown names instead of
    /// defaulting to zero.
    pub fn resolve_named(
        &self,
        subject: &SubjectId,
        metric: &str,
        window: TimeWindow,
        filters: &[SubjectFilter],
    ) -> Result<f64, EvaluationError> {
        let metric = Metric::parse(metric)
            .ok_or_else(|| EvaluationError::UnknownMetric(metric.to_string()))?;
        self.resolve(subject, metric, window, filters)
    }

    /// Resolve one value for a subject. A subject outside the filtered
    /// population, or one the upstream store has no value for, is a
    /// resolution failure, never a silent zero.
    pub fn resolve(
        &self,
        subject: &SubjectId,
        metric: Metric,
        window: TimeWindow,
        filters: &[SubjectFilter],
    ) -> Result<f64, EvaluationError> {
        let missing = || EvaluationError::MetricResolution {
            subject: subject.0.clone(),
            metric: metric.label(),
            window: window.label(),
        };

        let record = self.snapshot.record(subject).ok_or_else(missing)?;
        if !filters.iter().all(|filter| filter.matches(&record.attributes)) {
            return Err(missing());
        }
        record.value(metric, window).ok_or_else(missing)
    }

    /// Subjects matching every filter, in id order.
    pub fn population(&self, filters: &[SubjectFilter]) -> Vec<&'a SubjectId> {
        self.snapshot
            .subjects()
            .filter(|(_, record)| filters.iter().all(|filter| filter.matches(&record.attributes)))
            .map(|(subject, _)| subject)
            .collect()
    }

    /// Materialize the ranking the rank operators are defined over:
    /// descending by value, ties broken by subject id for determinism.
    /// Subjects without a value for the metric cannot rank and are skipped.
    pub fn ranking(
        &self,
        metric: Metric,
        window: TimeWindow,
        filters: &[SubjectFilter],
    ) -> Ranking {
        let mut ordered: Vec<(SubjectId, f64)> = self
            .snapshot
            .subjects()
            .filter(|(_, record)| filters.iter().all(|filter| filter.matches(&record.attributes)))
            .filter_map(|(subject, record)| {
                record.value(metric, window).map(|value| (subject.clone(), value))
            })
            .collect();

        ordered.sort_by(|(left_id, left), (right_id, right)| {
            right
                .partial_cmp(left)
                .unwrap_or(Ordering::Equal)
                .then_with(|| left_id.cmp(right_id))
        });

        Ranking { ordered }
    }
}

/// Immutable ranked population snapshot for `top_n` / `top_percent`.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranking {
    ordered: Vec<(SubjectId, f64)>,
}

impl Ranking {
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Zero-based rank of the subject, if it appears in the population.
    pub fn position(&self, subject: &SubjectId) -> Option<usize> {
        self.ordered.iter().position(|(id, _)| id == subject)
    }

    pub fn entries(&self) -> &[(SubjectId, f64)] {
        &self.ordered
    }
}
