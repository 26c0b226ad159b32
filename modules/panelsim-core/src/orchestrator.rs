//! Request pipeline: validate, filter, fan out generation + SSR rating
//! under a global concurrency bound, score, and assemble the result.
//!
//! Filtering runs before generation: responses are only generated for
//! personas that match the filters, since generation is the expensive step.
//! The filter flags over the original persona list still drive the counts
//! and the optional dataset.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use futures::future::try_join_all;
use tokio::sync::Semaphore;
use tracing::info;
use uuid::Uuid;

use panelsim_common::{
    Concept, Config, DatasetRow, FullResponse, Meta, MinimalResponse, PanelsimError, Persona,
    PersonaResponse, Question, QuestionAnswer, TestConceptRequest, TestResponse,
};

use crate::filter::FilterEngine;
use crate::llm::LlmService;
use crate::report::{ReportContext, ReportGenerator};
use crate::scoring::{round2, round3, ScoringEngine};
use crate::ssr::{AnchorCache, SsrEngine};
use crate::video::VideoResolver;

pub struct Orchestrator {
    config: Config,
    filter_engine: FilterEngine,
    scoring_engine: ScoringEngine,
    report_generator: ReportGenerator,
    anchor_cache: Arc<AnchorCache>,
    video_resolver: Arc<VideoResolver>,
    #[cfg(any(test, feature = "test-support"))]
    llm_override: Option<Arc<LlmService>>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            filter_engine: FilterEngine::new(),
            scoring_engine: ScoringEngine::new(),
            report_generator: ReportGenerator::new(),
            anchor_cache: Arc::new(AnchorCache::default()),
            video_resolver: Arc::new(VideoResolver::new()),
            #[cfg(any(test, feature = "test-support"))]
            llm_override: None,
        }
    }

    /// Replace the provider-backed LLM service with a pre-built one.
    #[cfg(any(test, feature = "test-support"))]
    pub fn with_llm_service(mut self, llm: Arc<LlmService>) -> Self {
        self.llm_override = Some(llm);
        self
    }

    pub async fn process_request(
        &self,
        request: TestConceptRequest,
    ) -> Result<TestResponse, PanelsimError> {
        let start = Instant::now();
        let request_id = Uuid::new_v4().to_string()[..8].to_string();

        info!(
            request_id = %request_id,
            concept = %request.concept.name,
            personas = request.personas.len(),
            questions = request.survey_config.questions.len(),
            "Starting concept test"
        );

        request.validate()?;

        // Fail-fast gate: filter syntax is checked before any generation
        // work is queued.
        let filter_errors = self.filter_engine.validate_filters(&request.filters);
        if !filter_errors.is_empty() {
            return Err(PanelsimError::validation(format!(
                "Invalid filters: {}",
                filter_errors.join("; ")
            )));
        }

        let (matched, match_flags) = self
            .filter_engine
            .apply_filters(&request.personas, &request.filters)?;
        let personas_matched = matched.len();

        if personas_matched == 0 {
            return Err(PanelsimError::validation(
                "No personas matched the specified filters",
            ));
        }

        let llm = self.llm_service(&request)?;
        let ssr = SsrEngine::new(
            llm.clone(),
            self.config.ssr_temperature,
            self.anchor_cache.clone(),
        );

        let responses = self
            .generate_all_responses(
                &llm,
                &ssr,
                &matched,
                &request.concept,
                &request.survey_config.questions,
            )
            .await?;

        // Everything generated is in the scoring subset by construction.
        let scored_flags = vec![true; responses.len()];
        let metrics = self.scoring_engine.calculate_metrics(
            &responses,
            &request.survey_config.questions,
            &scored_flags,
        )?;
        let (composite_score, criteria_breakdown) = self
            .scoring_engine
            .calculate_composite_score(&metrics, &request.survey_config.questions)?;
        let result = self
            .scoring_engine
            .evaluate_threshold(composite_score, request.threshold);

        let processing_time_ms = start.elapsed().as_millis() as u64;
        info!(
            request_id = %request_id,
            composite_score,
            passed = result.passed,
            elapsed_ms = processing_time_ms,
            "Pipeline complete"
        );

        if !request.verbose {
            return Ok(TestResponse::Minimal(MinimalResponse {
                passed: result.passed,
                composite_score: result.composite_score,
                threshold: result.threshold,
            }));
        }

        let meta = Meta {
            request_id,
            concept_name: request.concept.name.clone(),
            timestamp: chrono::Utc::now(),
            processing_time_ms,
            providers: Some(llm.provider_info()),
        };

        let dataset = if request.output_dataset {
            Some(build_dataset(
                &request.personas,
                &match_flags,
                &responses,
                &request.survey_config.questions,
            ))
        } else {
            None
        };

        let report = if request.include_report {
            Some(self.report_generator.generate_report(&ReportContext {
                result: &result,
                concept: &request.concept,
                personas_total: request.personas.len(),
                personas_matched,
                criteria_breakdown: &criteria_breakdown,
                metrics: &metrics,
                meta: &meta,
                dataset: dataset.as_deref(),
                filters_applied: &request.filters,
                questions: &request.survey_config.questions,
            }))
        } else {
            None
        };

        Ok(TestResponse::Full(Box::new(FullResponse {
            result,
            filters_applied: request.filters.clone(),
            personas_total: request.personas.len(),
            personas_matched,
            criteria_breakdown,
            metrics,
            dataset,
            report,
            meta,
        })))
    }

    /// Fan out one task per (persona, question) unit, each holding one
    /// permit from a single global semaphore, so peak outstanding provider
    /// calls equal the configured limit exactly.
    async fn generate_all_responses(
        &self,
        llm: &Arc<LlmService>,
        ssr: &SsrEngine,
        personas: &[Persona],
        concept: &Concept,
        questions: &[Question],
    ) -> Result<Vec<PersonaResponse>, PanelsimError> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency_limit));

        info!(
            personas = personas.len(),
            concurrency_limit = self.config.concurrency_limit,
            "Generating responses"
        );

        let persona_futures = personas.iter().map(|persona| {
            let semaphore = semaphore.clone();
            async move {
                let question_futures = questions.iter().map(|question| {
                    let semaphore = semaphore.clone();
                    async move {
                        let _permit = semaphore.acquire().await.map_err(|_| {
                            PanelsimError::Internal(anyhow!("Concurrency semaphore closed"))
                        })?;

                        let raw_text =
                            llm.generate_response(persona, concept, question).await?;
                        let (pmf, mean) = ssr
                            .map_response_to_likert(&raw_text, &question.ssr_reference_sets)
                            .await?;

                        Ok::<_, PanelsimError>((
                            question.id.clone(),
                            QuestionAnswer {
                                raw_text,
                                pmf: pmf.iter().map(|p| round3(*p)).collect(),
                                mean: round2(mean),
                            },
                        ))
                    }
                });

                let answers = try_join_all(question_futures).await?;
                let persona_id = persona.id().unwrap_or_default();
                info!(persona_id = %persona_id, "Persona complete");

                Ok::<_, PanelsimError>(PersonaResponse {
                    persona_id,
                    responses: answers.into_iter().collect(),
                })
            }
        });

        try_join_all(persona_futures).await
    }

    fn llm_service(&self, request: &TestConceptRequest) -> Result<Arc<LlmService>, PanelsimError> {
        #[cfg(any(test, feature = "test-support"))]
        if let Some(llm) = &self.llm_override {
            return Ok(llm.clone());
        }

        Ok(Arc::new(LlmService::from_options(
            request.options.resolve(&self.config),
            &self.config,
            &request.concept,
            self.video_resolver.clone(),
        )?))
    }
}

/// Flatten personas and responses into one row per persona. Matched
/// personas carry per-question text/PMF/mean columns; unmatched personas
/// appear with their attributes and the flag only, since no responses were
/// generated for them.
fn build_dataset(
    personas: &[Persona],
    match_flags: &[bool],
    responses: &[PersonaResponse],
    questions: &[Question],
) -> Vec<DatasetRow> {
    let by_id: HashMap<&str, &PersonaResponse> = responses
        .iter()
        .map(|r| (r.persona_id.as_str(), r))
        .collect();

    personas
        .iter()
        .zip(match_flags)
        .map(|(persona, matched)| {
            let mut row = DatasetRow::new();
            for (key, value) in &persona.attributes {
                row.insert(
                    key.clone(),
                    serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
                );
            }
            row.insert("matched_filter".to_string(), serde_json::Value::Bool(*matched));

            if let Some(response) = persona
                .id()
                .and_then(|id| by_id.get(id.as_str()).copied())
            {
                for question in questions {
                    if let Some(answer) = response.responses.get(&question.id) {
                        row.insert(
                            format!("{}_text", question.id),
                            serde_json::Value::String(answer.raw_text.clone()),
                        );
                        row.insert(
                            format!("{}_pmf", question.id),
                            serde_json::to_value(&answer.pmf)
                                .unwrap_or(serde_json::Value::Null),
                        );
                        row.insert(
                            format!("{}_mean", question.id),
                            serde_json::to_value(answer.mean)
                                .unwrap_or(serde_json::Value::Null),
                        );
                    }
                }
            }

            row
        })
        .collect()
}
