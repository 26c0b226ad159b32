//! Scoring engine: per-question statistics, weighted composite score, and
//! threshold evaluation.

use std::collections::BTreeMap;

use anyhow::anyhow;

use panelsim_common::{
    CriteriaBreakdown, PanelsimError, PersonaResponse, Question, QuestionMetrics, ResultSummary,
};

pub struct ScoringEngine;

impl ScoringEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compute metrics for each question over the personas whose match flag
    /// is set. Statistics run over the per-persona means, not the raw PMFs.
    pub fn calculate_metrics(
        &self,
        responses: &[PersonaResponse],
        questions: &[Question],
        match_flags: &[bool],
    ) -> Result<BTreeMap<String, QuestionMetrics>, PanelsimError> {
        let mut metrics = BTreeMap::new();

        for question in questions {
            let mut means = Vec::new();
            for (response, matched) in responses.iter().zip(match_flags) {
                if !matched {
                    continue;
                }
                let answer = response.responses.get(&question.id).ok_or_else(|| {
                    PanelsimError::Internal(anyhow!(
                        "Persona {} has no response for question {}",
                        response.persona_id,
                        question.id
                    ))
                })?;
                means.push(answer.mean);
            }

            if means.is_empty() {
                return Err(PanelsimError::validation(
                    "No personas matched the filters",
                ));
            }

            // Discretize for the distribution: round to nearest Likert
            // point, clamped to the valid range.
            let discrete: Vec<i64> = means
                .iter()
                .map(|m| (m.round() as i64).clamp(1, 5))
                .collect();
            let mut distribution = BTreeMap::new();
            for rating in 1..=5i64 {
                distribution.insert(
                    rating.to_string(),
                    discrete.iter().filter(|d| **d == rating).count(),
                );
            }

            let n = means.len();
            let top_2 = means.iter().filter(|m| **m >= 4.0).count() as f64 / n as f64;
            let bottom_2 = means.iter().filter(|m| **m <= 2.0).count() as f64 / n as f64;

            metrics.insert(
                question.id.clone(),
                QuestionMetrics {
                    n,
                    mean: round2(mean(&means)),
                    median: round2(median(&means)),
                    std_dev: round2(std_dev(&means)),
                    top_2_box: round2(top_2),
                    bottom_2_box: round2(bottom_2),
                    distribution,
                },
            );
        }

        Ok(metrics)
    }

    /// Weighted composite: normalize each question's raw mean from the 1..5
    /// Likert range onto 0..1, weight it, and sum in declared question
    /// order.
    pub fn calculate_composite_score(
        &self,
        metrics: &BTreeMap<String, QuestionMetrics>,
        questions: &[Question],
    ) -> Result<(f64, Vec<CriteriaBreakdown>), PanelsimError> {
        let mut breakdown = Vec::with_capacity(questions.len());
        let mut composite = 0.0;

        for question in questions {
            let question_metrics = metrics.get(&question.id).ok_or_else(|| {
                PanelsimError::Internal(anyhow!("No metrics for question {}", question.id))
            })?;
            let raw_mean = question_metrics.mean;

            let normalized = (raw_mean - 1.0) / 4.0;
            let contribution = normalized * question.weight;
            composite += contribution;

            breakdown.push(CriteriaBreakdown {
                question_id: question.id.clone(),
                weight: question.weight,
                raw_mean,
                normalized: round3(normalized),
                contribution: round3(contribution),
            });
        }

        Ok((round3(composite), breakdown))
    }

    /// Pass/fail against the threshold; meeting it exactly passes.
    pub fn evaluate_threshold(&self, composite_score: f64, threshold: f64) -> ResultSummary {
        let passed = composite_score >= threshold;
        let margin = round3(composite_score - threshold);

        let reason = if passed {
            format!("PASS: Composite score {composite_score} meets threshold {threshold}")
        } else {
            format!("FAIL: Composite score {composite_score} is below threshold {threshold}")
        };

        ResultSummary {
            passed,
            composite_score,
            threshold,
            margin,
            reason,
        }
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use panelsim_common::{QuestionAnswer, REFERENCE_SET_COUNT};

    fn question(id: &str, weight: f64) -> Question {
        Question {
            id: id.to_string(),
            text: "How appealing is this?".to_string(),
            weight,
            ssr_reference_sets: vec![vec![String::new(); 5]; REFERENCE_SET_COUNT],
        }
    }

    fn response(persona_id: &str, answers: &[(&str, f64)]) -> PersonaResponse {
        let responses = answers
            .iter()
            .map(|(q_id, mean)| {
                (
                    q_id.to_string(),
                    QuestionAnswer {
                        raw_text: "a response".to_string(),
                        pmf: vec![0.2; 5],
                        mean: *mean,
                    },
                )
            })
            .collect();
        PersonaResponse {
            persona_id: persona_id.to_string(),
            responses,
        }
    }

    #[test]
    fn metrics_basic() {
        let engine = ScoringEngine::new();
        let responses = vec![
            response("p1", &[("q1", 4.0)]),
            response("p2", &[("q1", 3.5)]),
            response("p3", &[("q1", 4.2)]),
        ];
        let metrics = engine
            .calculate_metrics(&responses, &[question("q1", 1.0)], &[true, true, true])
            .unwrap();

        let m = &metrics["q1"];
        assert_eq!(m.n, 3);
        assert!((m.mean - 3.9).abs() < 0.01);
        assert!((m.median - 4.0).abs() < 0.01);
    }

    #[test]
    fn metrics_respect_match_flags() {
        let engine = ScoringEngine::new();
        let responses = vec![
            response("p1", &[("q1", 5.0)]),
            response("p2", &[("q1", 1.0)]),
        ];
        let metrics = engine
            .calculate_metrics(&responses, &[question("q1", 1.0)], &[true, false])
            .unwrap();

        let m = &metrics["q1"];
        assert_eq!(m.n, 1);
        assert!((m.mean - 5.0).abs() < 1e-9);
    }

    #[test]
    fn zero_matches_is_validation_error() {
        let engine = ScoringEngine::new();
        let responses = vec![response("p1", &[("q1", 4.0)])];
        let result = engine.calculate_metrics(&responses, &[question("q1", 1.0)], &[false]);
        assert!(matches!(result, Err(PanelsimError::Validation(_))));
    }

    #[test]
    fn distribution_rounds_and_clamps() {
        let engine = ScoringEngine::new();
        let responses = vec![
            response("p1", &[("q1", 1.2)]),
            response("p2", &[("q1", 3.6)]),
            response("p3", &[("q1", 4.4)]),
            response("p4", &[("q1", 4.6)]),
        ];
        let metrics = engine
            .calculate_metrics(&responses, &[question("q1", 1.0)], &[true; 4])
            .unwrap();

        let dist = &metrics["q1"].distribution;
        assert_eq!(dist["1"], 1);
        assert_eq!(dist["2"], 0);
        assert_eq!(dist["3"], 0);
        assert_eq!(dist["4"], 2);
        assert_eq!(dist["5"], 1);
    }

    #[test]
    fn top_and_bottom_box() {
        let engine = ScoringEngine::new();
        let responses = vec![
            response("p1", &[("q1", 4.5)]),
            response("p2", &[("q1", 4.0)]),
            response("p3", &[("q1", 2.0)]),
            response("p4", &[("q1", 3.0)]),
        ];
        let metrics = engine
            .calculate_metrics(&responses, &[question("q1", 1.0)], &[true; 4])
            .unwrap();

        let m = &metrics["q1"];
        assert!((m.top_2_box - 0.5).abs() < 1e-9);
        assert!((m.bottom_2_box - 0.25).abs() < 1e-9);
    }

    #[test]
    fn std_dev_is_population() {
        let engine = ScoringEngine::new();
        let responses = vec![
            response("p1", &[("q1", 2.0)]),
            response("p2", &[("q1", 4.0)]),
        ];
        let metrics = engine
            .calculate_metrics(&responses, &[question("q1", 1.0)], &[true, true])
            .unwrap();
        // Population std-dev of [2, 4] is 1.0 (sample would be ~1.41).
        assert!((metrics["q1"].std_dev - 1.0).abs() < 1e-9);
    }

    #[test]
    fn composite_single_question() {
        let engine = ScoringEngine::new();
        let responses = vec![
            response("p1", &[("q1", 4.0)]),
            response("p2", &[("q1", 3.5)]),
            response("p3", &[("q1", 4.2)]),
        ];
        let questions = vec![question("q1", 1.0)];
        let metrics = engine
            .calculate_metrics(&responses, &questions, &[true; 3])
            .unwrap();
        let (composite, breakdown) = engine
            .calculate_composite_score(&metrics, &questions)
            .unwrap();

        assert!((composite - 0.725).abs() < 1e-9);
        assert_eq!(breakdown.len(), 1);
        assert!((breakdown[0].normalized - 0.725).abs() < 1e-9);
        assert!((breakdown[0].contribution - 0.725).abs() < 1e-9);
    }

    #[test]
    fn composite_weighted_sum_preserves_order() {
        let engine = ScoringEngine::new();
        let responses = vec![response("p1", &[("appeal", 5.0), ("value", 3.0)])];
        let questions = vec![question("appeal", 0.6), question("value", 0.4)];
        let metrics = engine
            .calculate_metrics(&responses, &questions, &[true])
            .unwrap();
        let (composite, breakdown) = engine
            .calculate_composite_score(&metrics, &questions)
            .unwrap();

        // appeal: 1.0 * 0.6, value: 0.5 * 0.4
        assert!((composite - 0.8).abs() < 1e-9);
        assert_eq!(breakdown[0].question_id, "appeal");
        assert_eq!(breakdown[1].question_id, "value");

        let contribution_sum: f64 = breakdown.iter().map(|b| b.contribution).sum();
        assert!((contribution_sum - composite).abs() < 0.002);
    }

    #[test]
    fn normalization_maps_likert_onto_unit_interval() {
        assert!(((1.0f64 - 1.0) / 4.0).abs() < 1e-9);
        assert!(((5.0f64 - 1.0) / 4.0 - 1.0).abs() < 1e-9);
        assert!(((3.0f64 - 1.0) / 4.0 - 0.5).abs() < 1e-9);
    }

    #[test]
    fn threshold_pass() {
        let engine = ScoringEngine::new();
        let result = engine.evaluate_threshold(0.85, 0.70);
        assert!(result.passed);
        assert!((result.margin - 0.15).abs() < 1e-9);
        assert!(result.reason.starts_with("PASS"));
        assert!(result.reason.contains("0.85"));
        assert!(result.reason.contains("0.7"));
    }

    #[test]
    fn threshold_fail() {
        let engine = ScoringEngine::new();
        let result = engine.evaluate_threshold(0.65, 0.70);
        assert!(!result.passed);
        assert!((result.margin + 0.05).abs() < 1e-9);
        assert!(result.reason.starts_with("FAIL"));
    }

    #[test]
    fn threshold_exact_match_passes() {
        let engine = ScoringEngine::new();
        let result = engine.evaluate_threshold(0.70, 0.70);
        assert!(result.passed);
        assert!(result.margin.abs() < 1e-9);
    }
}
