//! Markdown report generation from computed test results. Pure formatting,
//! no decisions.

use std::collections::BTreeMap;

use panelsim_common::{
    Concept, ContentType, CriteriaBreakdown, DatasetRow, Meta, Question, QuestionMetrics,
    ResultSummary,
};

const SAMPLE_RESPONSE_COUNT: usize = 5;

pub struct ReportContext<'a> {
    pub result: &'a ResultSummary,
    pub concept: &'a Concept,
    pub personas_total: usize,
    pub personas_matched: usize,
    pub criteria_breakdown: &'a [CriteriaBreakdown],
    pub metrics: &'a BTreeMap<String, QuestionMetrics>,
    pub meta: &'a Meta,
    pub dataset: Option<&'a [DatasetRow]>,
    pub filters_applied: &'a [String],
    pub questions: &'a [Question],
}

pub struct ReportGenerator;

impl ReportGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn generate_report(&self, ctx: &ReportContext<'_>) -> String {
        let mut sections = vec![
            self.header(ctx),
            self.overview(ctx),
            self.concept_description(ctx.concept),
            self.result_summary(ctx.result),
            self.criteria_breakdown(ctx.criteria_breakdown),
            self.insights(ctx.metrics),
            self.metrics_table(ctx.metrics),
            self.distribution_analysis(ctx.metrics),
        ];

        if let Some(dataset) = ctx.dataset {
            if !dataset.is_empty() {
                sections.push(self.sample_responses(dataset));
            }
        }

        sections.push(self.conclusions(ctx.result, ctx.metrics));
        sections.push(self.dataset_summary(ctx));
        sections.push(self.appendix(ctx.questions));

        sections.join("\n")
    }

    fn header(&self, ctx: &ReportContext<'_>) -> String {
        format!("# Concept Test Report: {}\n", ctx.concept.name)
    }

    fn overview(&self, ctx: &ReportContext<'_>) -> String {
        let seconds = ctx.meta.processing_time_ms as f64 / 1000.0;
        let minutes = ctx.meta.processing_time_ms as f64 / 60000.0;

        let mut lines = vec![
            "## Test Overview\n".to_string(),
            "| Field | Value |".to_string(),
            "|-------|-------|".to_string(),
            format!("| **Experiment ID** | `{}` |", ctx.meta.request_id),
            format!("| **Concept Name** | {} |", ctx.meta.concept_name),
            format!(
                "| **Date** | {} |",
                ctx.meta.timestamp.format("%Y-%m-%d %H:%M UTC")
            ),
            format!(
                "| **Personas Tested** | {} of {} |",
                ctx.personas_matched, ctx.personas_total
            ),
            format!("| **Processing Time** | {seconds:.1}s (~{minutes:.1} min) |"),
        ];

        if let Some(providers) = &ctx.meta.providers {
            lines.push(format!("| **Generation Model** | `{}` |", providers.generation));
            lines.push(format!("| **Embedding Model** | `{}` |", providers.embedding));
            lines.push(format!("| **Vision Model** | `{}` |", providers.vision));
        }

        if !ctx.filters_applied.is_empty() {
            lines.push(format!("| **Filters** | {} |", ctx.filters_applied.join(", ")));
        }

        lines.push("\n---\n".to_string());
        lines.join("\n")
    }

    fn concept_description(&self, concept: &Concept) -> String {
        let has_text = concept
            .content
            .iter()
            .any(|c| c.content_type == ContentType::Text);
        let has_image = concept.has_images();
        let has_video = concept.has_video();

        let concept_type = match (has_video, has_image, has_text) {
            (true, _, _) => "Video",
            (false, true, true) => "Text + Image",
            (false, true, false) => "Image",
            _ => "Text",
        };

        let mut lines = vec![
            "## Concept Description\n".to_string(),
            format!("**Concept:** {}", concept.name),
            format!(
                "**Format:** {} ({} content items)\n",
                concept_type,
                concept.content.len()
            ),
        ];

        for item in concept
            .content
            .iter()
            .filter(|c| c.content_type == ContentType::Text)
        {
            let text = if item.data.len() > 500 {
                format!("{}...", truncated(&item.data, 497))
            } else {
                item.data.clone()
            };
            lines.push(format!("> {text}\n"));
        }

        if has_image {
            let count = concept
                .content
                .iter()
                .filter(|c| c.content_type == ContentType::Image)
                .count();
            lines.push(format!("*{count} image(s) included in concept stimulus.*\n"));
        }
        if has_video {
            lines.push("*Video stimulus included in concept.*\n".to_string());
        }

        lines.push("---\n".to_string());
        lines.join("\n")
    }

    fn result_summary(&self, result: &ResultSummary) -> String {
        let status = if result.passed { "PASSED" } else { "FAILED" };
        let margin_pct = result.margin.abs() * 100.0;

        let strength = if margin_pct < 5.0 {
            "Marginal"
        } else if margin_pct < 15.0 {
            "Moderate"
        } else {
            "Clear"
        };

        let margin_sign = if result.margin >= 0.0 { "+" } else { "" };
        let verdict_action = if result.passed { "exceeded" } else { "fell short" };

        [
            format!("## Overall Result: {status} ({strength})\n"),
            "| Metric | Value |".to_string(),
            "|--------|-------|".to_string(),
            format!("| **Composite Score** | {:.3} |", result.composite_score),
            format!("| **Threshold** | {:.2} |", result.threshold),
            format!("| **Margin** | {margin_sign}{:.3} |", result.margin),
            format!("| **Verdict** | **{status}** ({verdict_action} by {margin_pct:.1}%) |"),
            "\n---\n".to_string(),
        ]
        .join("\n")
    }

    fn criteria_breakdown(&self, breakdown: &[CriteriaBreakdown]) -> String {
        let mut lines = vec![
            "## Criteria Breakdown\n".to_string(),
            "| Question | Weight | Raw Mean | Normalized | Contribution |".to_string(),
            "|----------|--------|----------|------------|--------------|".to_string(),
        ];

        for c in breakdown {
            lines.push(format!(
                "| {} | {:.0}% | {:.2} | {:.3} | {:.3} |",
                c.question_id,
                c.weight * 100.0,
                c.raw_mean,
                c.normalized,
                c.contribution
            ));
        }

        lines.push("\n---\n".to_string());
        lines.join("\n")
    }

    fn insights(&self, metrics: &BTreeMap<String, QuestionMetrics>) -> String {
        let sorted = sorted_by_mean(metrics);
        let strengths = &sorted[..sorted.len().min(3)];
        let weaknesses = &sorted[sorted.len().saturating_sub(2)..];

        let mut lines = vec!["## Key Insights\n".to_string(), "### Strengths\n".to_string()];

        for (i, (qid, m)) in strengths.iter().enumerate() {
            lines.push(format!(
                "{}. **{}** ({:.2}) - Top 2 box: {:.0}%, median: {:.2}, {} spread (std: {:.2})\n",
                i + 1,
                qid,
                m.mean,
                m.top_2_box * 100.0,
                m.median,
                spread_label(m.std_dev),
                m.std_dev
            ));
        }

        lines.push("\n### Weaknesses\n".to_string());

        for (i, (qid, m)) in weaknesses.iter().enumerate() {
            lines.push(format!(
                "{}. **{}** ({:.2}) - Bottom 2 box: {:.0}%, median: {:.2}, {} spread (std: {:.2})\n",
                i + 1,
                qid,
                m.mean,
                m.bottom_2_box * 100.0,
                m.median,
                spread_label(m.std_dev),
                m.std_dev
            ));
        }

        lines.push("\n---\n".to_string());
        lines.join("\n")
    }

    fn metrics_table(&self, metrics: &BTreeMap<String, QuestionMetrics>) -> String {
        let mut lines = vec![
            "## Metrics Summary\n".to_string(),
            "| Question | Mean | Median | Std Dev | Top 2 Box | Bottom 2 Box |".to_string(),
            "|----------|------|--------|---------|-----------|--------------|".to_string(),
        ];

        for (qid, m) in metrics {
            lines.push(format!(
                "| {} | {:.2} | {:.2} | {:.2} | {:.0}% | {:.0}% |",
                qid,
                m.mean,
                m.median,
                m.std_dev,
                m.top_2_box * 100.0,
                m.bottom_2_box * 100.0
            ));
        }

        lines.push("\n---\n".to_string());
        lines.join("\n")
    }

    fn distribution_analysis(&self, metrics: &BTreeMap<String, QuestionMetrics>) -> String {
        let mut total_dist: BTreeMap<&str, usize> = BTreeMap::new();
        for m in metrics.values() {
            for (rating, count) in &m.distribution {
                *total_dist.entry(rating.as_str()).or_default() += count;
            }
        }

        let total_responses: usize = total_dist.values().sum();
        if total_responses == 0 {
            return String::new();
        }

        let labels = [
            ("1", "Strongly Negative"),
            ("2", "Negative"),
            ("3", "Neutral"),
            ("4", "Positive"),
            ("5", "Strongly Positive"),
        ];

        let mut lines = vec![
            "### Distribution Analysis (All Questions Combined)\n".to_string(),
            "| Rating | Count | Percentage |".to_string(),
            "|--------|-------|------------|".to_string(),
        ];

        for (rating, label) in labels {
            let count = total_dist.get(rating).copied().unwrap_or(0);
            let pct = count as f64 / total_responses as f64 * 100.0;
            lines.push(format!("| {rating} ({label}) | {count} | {pct:.1}% |"));
        }

        let positive = total_dist.get("4").copied().unwrap_or(0)
            + total_dist.get("5").copied().unwrap_or(0);
        let negative = total_dist.get("1").copied().unwrap_or(0)
            + total_dist.get("2").copied().unwrap_or(0);
        let neutral = total_dist.get("3").copied().unwrap_or(0);
        let pos_pct = positive as f64 / total_responses as f64 * 100.0;
        let neg_pct = negative as f64 / total_responses as f64 * 100.0;
        let neu_pct = neutral as f64 / total_responses as f64 * 100.0;

        let sentiment = if pos_pct > neg_pct * 2.0 {
            "predominantly positive"
        } else if neg_pct > pos_pct * 2.0 {
            "predominantly negative"
        } else if neu_pct > 40.0 {
            "largely neutral with limited polarisation"
        } else {
            "mixed"
        };

        lines.push(String::new());
        lines.push(format!(
            "Overall sentiment is {sentiment}, with {pos_pct:.0}% positive, \
             {neu_pct:.0}% neutral, and {neg_pct:.0}% negative responses.\n"
        ));
        lines.push("---\n".to_string());
        lines.join("\n")
    }

    fn sample_responses(&self, dataset: &[DatasetRow]) -> String {
        let mut lines = vec!["## Sample Responses\n".to_string()];

        // A cross-section spaced evenly through the dataset.
        let step = (dataset.len() / SAMPLE_RESPONSE_COUNT).max(1);
        let samples = (0..SAMPLE_RESPONSE_COUNT.min(dataset.len()))
            .map(|i| &dataset[i * step]);

        for row in samples {
            let field = |key: &str| -> String {
                row.get(key)
                    .map(display_value)
                    .unwrap_or_else(|| "?".to_string())
            };

            lines.push(format!(
                "### {} ({}y, {}, {}, {})\n",
                row.get("persona_id")
                    .map(display_value)
                    .unwrap_or_else(|| "Unknown".to_string()),
                field("age"),
                field("gender"),
                field("country"),
                field("education")
            ));

            let text_fields: Vec<&String> =
                row.keys().filter(|k| k.ends_with("_text")).collect();

            for text_field in text_fields.iter().take(2) {
                let qid = text_field.trim_end_matches("_text");
                let text = row
                    .get(text_field.as_str())
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let mean = row
                    .get(&format!("{qid}_mean"))
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);

                let text = if text.len() > 300 {
                    format!("{}...", truncated(text, 297))
                } else {
                    text.to_string()
                };

                lines.push(format!("**{qid}** ({mean:.2}):"));
                lines.push(format!("> \"{text}\"\n"));
            }

            lines.push("---\n".to_string());
        }

        lines.join("\n")
    }

    fn conclusions(
        &self,
        result: &ResultSummary,
        metrics: &BTreeMap<String, QuestionMetrics>,
    ) -> String {
        let sorted = sorted_by_mean(metrics);
        let strongest = &sorted[0];
        let weakest = &sorted[sorted.len() - 1];

        let status = if result.passed { "passed" } else { "failed" };
        let margin_pct = result.margin.abs() * 100.0;
        let overall_mean =
            metrics.values().map(|m| m.mean).sum::<f64>() / metrics.len() as f64;
        let most_polarised = metrics
            .iter()
            .max_by(|a, b| a.1.std_dev.total_cmp(&b.1.std_dev))
            .expect("metrics is non-empty");

        let mut lines = vec![
            "## Conclusions\n".to_string(),
            format!(
                "1. **Overall Result**: The concept {status} with a composite score of \
                 {:.3} against a threshold of {:.2} (margin: {margin_pct:.1}%). The \
                 overall mean across all metrics is {overall_mean:.2}/5.\n",
                result.composite_score, result.threshold
            ),
            format!(
                "2. **Strongest Metric**: {} scored {:.2} with {:.0}% top 2 box and median {:.2}.\n",
                strongest.0,
                strongest.1.mean,
                strongest.1.top_2_box * 100.0,
                strongest.1.median
            ),
            format!(
                "3. **Weakest Metric**: {} scored {:.2} with {:.0}% bottom 2 box and median {:.2}.\n",
                weakest.0,
                weakest.1.mean,
                weakest.1.bottom_2_box * 100.0,
                weakest.1.median
            ),
            format!(
                "4. **Response Consistency**: {} showed the most variation (std dev: {:.2}), \
                 suggesting differing reactions across personas.\n",
                most_polarised.0, most_polarised.1.std_dev
            ),
        ];

        if result.passed {
            lines.push(
                "5. **Recommendation**: The concept meets the threshold criteria. \
                 Consider addressing the weakest metrics to further strengthen the concept \
                 before proceeding to market.\n"
                    .to_string(),
            );
        } else if result.margin.abs() < 0.05 {
            lines.push(
                "5. **Recommendation**: The concept narrowly missed the threshold. \
                 Minor refinements to the weakest metrics could bring it to a passing score. \
                 Consider targeted iteration rather than a full rework.\n"
                    .to_string(),
            );
        } else {
            lines.push(
                "5. **Recommendation**: The concept did not meet the threshold by a significant \
                 margin. Focus on improving the weakest metrics and consider concept refinement \
                 or alternative creative directions.\n"
                    .to_string(),
            );
        }

        lines.join("\n")
    }

    fn dataset_summary(&self, ctx: &ReportContext<'_>) -> String {
        let mut lines = vec![
            "---\n".to_string(),
            "## Dataset Summary\n".to_string(),
            format!(
                "The full dataset contains {} persona responses with:",
                ctx.personas_matched
            ),
            format!(
                "- Raw text responses for all {} questions",
                ctx.questions.len()
            ),
            "- 5-point probability distributions (PMF) from SSR scoring".to_string(),
            "- Mean Likert scores (1-5) for each question".to_string(),
        ];

        if let Some(dataset) = ctx.dataset {
            if let Some(first) = dataset.first() {
                let demo_keys: Vec<&str> = first
                    .keys()
                    .filter(|k| {
                        !k.ends_with("_text")
                            && !k.ends_with("_pmf")
                            && !k.ends_with("_mean")
                            && k.as_str() != "persona_id"
                            && k.as_str() != "matched_filter"
                    })
                    .map(String::as_str)
                    .collect();
                if !demo_keys.is_empty() {
                    lines.push(format!("- Demographics: {}", demo_keys.join(", ")));
                }
            }
        }

        lines.push(String::new());
        lines.join("\n")
    }

    fn appendix(&self, questions: &[Question]) -> String {
        let mut lines = vec![
            "---\n".to_string(),
            "## Appendix: Survey Questions and Response Scales\n".to_string(),
        ];

        for (i, q) in questions.iter().enumerate() {
            lines.push(format!("### Q{}: {}", i + 1, q.id));
            lines.push(format!("**\"{}\"**\n", q.text));

            if let Some(scale) = q.ssr_reference_sets.first() {
                lines.push("| Score | Response |".to_string());
                lines.push("|-------|----------|".to_string());
                for (score, label) in scale.iter().enumerate() {
                    lines.push(format!("| {} | {} |", score + 1, label));
                }
                lines.push(String::new());
            }
        }

        lines.join("\n")
    }
}

impl Default for ReportGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_by_mean(
    metrics: &BTreeMap<String, QuestionMetrics>,
) -> Vec<(&String, &QuestionMetrics)> {
    let mut sorted: Vec<_> = metrics.iter().collect();
    sorted.sort_by(|a, b| b.1.mean.total_cmp(&a.1.mean));
    sorted
}

fn spread_label(std_dev: f64) -> &'static str {
    if std_dev < 0.3 {
        "tight"
    } else if std_dev < 0.6 {
        "moderate"
    } else {
        "wide"
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Cut to at most `max_bytes` at a char boundary.
fn truncated(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use panelsim_common::REFERENCE_SET_COUNT;

    fn metrics() -> BTreeMap<String, QuestionMetrics> {
        let mut map = BTreeMap::new();
        map.insert(
            "appeal".to_string(),
            QuestionMetrics {
                n: 4,
                mean: 4.1,
                median: 4.2,
                std_dev: 0.25,
                top_2_box: 0.75,
                bottom_2_box: 0.0,
                distribution: [("1", 0), ("2", 0), ("3", 1), ("4", 2), ("5", 1)]
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            },
        );
        map.insert(
            "value".to_string(),
            QuestionMetrics {
                n: 4,
                mean: 2.8,
                median: 2.9,
                std_dev: 0.7,
                top_2_box: 0.25,
                bottom_2_box: 0.5,
                distribution: [("1", 1), ("2", 1), ("3", 1), ("4", 1), ("5", 0)]
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            },
        );
        map
    }

    fn context<'a>(
        result: &'a ResultSummary,
        concept: &'a Concept,
        metrics: &'a BTreeMap<String, QuestionMetrics>,
        breakdown: &'a [CriteriaBreakdown],
        meta: &'a Meta,
        questions: &'a [Question],
    ) -> ReportContext<'a> {
        ReportContext {
            result,
            concept,
            personas_total: 5,
            personas_matched: 4,
            criteria_breakdown: breakdown,
            metrics,
            meta,
            dataset: None,
            filters_applied: &[],
            questions,
        }
    }

    #[test]
    fn report_contains_all_major_sections() {
        let result = ResultSummary {
            passed: true,
            composite_score: 0.76,
            threshold: 0.7,
            margin: 0.06,
            reason: "PASS".to_string(),
        };
        let concept = Concept {
            name: "Solar Backpack".to_string(),
            content: vec![panelsim_common::ContentItem {
                content_type: ContentType::Text,
                data: "A backpack that charges your devices.".to_string(),
                label: None,
            }],
        };
        let metrics = metrics();
        let breakdown = vec![CriteriaBreakdown {
            question_id: "appeal".to_string(),
            weight: 0.6,
            raw_mean: 4.1,
            normalized: 0.775,
            contribution: 0.465,
        }];
        let meta = Meta {
            request_id: "abc12345".to_string(),
            concept_name: "Solar Backpack".to_string(),
            timestamp: chrono::Utc::now(),
            processing_time_ms: 42_000,
            providers: None,
        };
        let questions = vec![Question {
            id: "appeal".to_string(),
            text: "How appealing is this concept?".to_string(),
            weight: 0.6,
            ssr_reference_sets: vec![
                vec![
                    "Not appealing at all".to_string(),
                    "Slightly appealing".to_string(),
                    "Somewhat appealing".to_string(),
                    "Very appealing".to_string(),
                    "Extremely appealing".to_string(),
                ];
                REFERENCE_SET_COUNT
            ],
        }];

        let report = ReportGenerator::new().generate_report(&context(
            &result, &concept, &metrics, &breakdown, &meta, &questions,
        ));

        assert!(report.contains("# Concept Test Report: Solar Backpack"));
        assert!(report.contains("## Test Overview"));
        assert!(report.contains("## Overall Result: PASSED"));
        assert!(report.contains("## Criteria Breakdown"));
        assert!(report.contains("## Key Insights"));
        assert!(report.contains("## Metrics Summary"));
        assert!(report.contains("## Conclusions"));
        assert!(report.contains("## Appendix: Survey Questions"));
        assert!(report.contains("| 1 | Not appealing at all |"));
    }

    #[test]
    fn margin_strength_labels() {
        let gen = ReportGenerator::new();
        let base = ResultSummary {
            passed: true,
            composite_score: 0.72,
            threshold: 0.7,
            margin: 0.02,
            reason: String::new(),
        };
        assert!(gen.result_summary(&base).contains("(Marginal)"));

        let moderate = ResultSummary {
            margin: 0.1,
            ..base.clone()
        };
        assert!(gen.result_summary(&moderate).contains("(Moderate)"));

        let clear = ResultSummary {
            margin: 0.2,
            ..base
        };
        assert!(gen.result_summary(&clear).contains("(Clear)"));
    }

    #[test]
    fn failed_report_recommends_iteration() {
        let gen = ReportGenerator::new();
        let result = ResultSummary {
            passed: false,
            composite_score: 0.68,
            threshold: 0.7,
            margin: -0.02,
            reason: String::new(),
        };
        let conclusions = gen.conclusions(&result, &metrics());
        assert!(conclusions.contains("narrowly missed"));

        let result = ResultSummary {
            margin: -0.2,
            ..result
        };
        let conclusions = gen.conclusions(&result, &metrics());
        assert!(conclusions.contains("significant"));
    }

    #[test]
    fn distribution_analysis_sums_across_questions() {
        let gen = ReportGenerator::new();
        let section = gen.distribution_analysis(&metrics());
        assert!(section.contains("| 4 (Positive) | 3 |"));
        assert!(section.contains("Overall sentiment is"));
    }

    #[test]
    fn spread_labels() {
        assert_eq!(spread_label(0.1), "tight");
        assert_eq!(spread_label(0.5), "moderate");
        assert_eq!(spread_label(0.9), "wide");
    }
}
