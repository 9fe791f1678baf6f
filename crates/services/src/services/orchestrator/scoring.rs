use std::collections::BTreeMap;

use serde_json::Value;

use crate::services::agents::RefinementFeedback;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityAggregate {
    /// Mean of each metric across every evaluation that reported it.
    pub metrics: BTreeMap<String, f64>,
    /// Mean of the per-metric means; `None` without any scores.
    pub composite: Option<f64>,
    pub issues: Vec<String>,
}

impl QualityAggregate {
    pub fn passes(&self, pass_score: f64) -> bool {
        self.composite.is_some_and(|score| score >= pass_score)
    }

    pub fn feedback(&self, pass_score: f64) -> RefinementFeedback {
        RefinementFeedback {
            composite_score: self.composite.unwrap_or(0.0),
            pass_score,
            failing_metrics: self
                .metrics
                .iter()
                .filter(|(_, score)| **score < pass_score)
                .map(|(metric, score)| (metric.clone(), *score))
                .collect(),
            issues: self.issues.clone(),
        }
    }
}

/// Averages `{"scores": {metric: number}, "issues": [..]}` evaluations.
/// Non-numeric scores are skipped.
pub fn aggregate<'a>(evaluations: impl IntoIterator<Item = &'a Value>) -> QualityAggregate {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    let mut issues = Vec::new();

    for evaluation in evaluations {
        if let Some(scores) = evaluation.get("scores").and_then(Value::as_object) {
            for (metric, score) in scores {
                if let Some(score) = score.as_f64() {
                    let entry = sums.entry(metric.clone()).or_insert((0.0, 0));
                    entry.0 += score;
                    entry.1 += 1;
                }
            }
        }
        if let Some(found) = evaluation.get("issues").and_then(Value::as_array) {
            issues.extend(found.iter().filter_map(Value::as_str).map(str::to_string));
        }
    }

    let metrics: BTreeMap<String, f64> = sums
        .into_iter()
        .map(|(metric, (sum, count))| (metric, sum / count as f64))
        .collect();
    let composite = if metrics.is_empty() {
        None
    } else {
        Some(metrics.values().sum::<f64>() / metrics.len() as f64)
    };

    QualityAggregate {
        metrics,
        composite,
        issues,
    }
}
