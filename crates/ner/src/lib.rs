//! Typed entity spans from a generative NER model.
//!
//! The model is asked one question per entity category. Its answer, a list
//! of phrases, is parsed strictly and each phrase is then located in the
//! source text to produce `(type, text, span)` records.

pub mod error;
pub mod llm;
pub mod parser;
pub mod prompt;
pub mod resolver;
pub mod retry;
pub mod schema;

pub use error::{GenerationError, NerError, ParseError};
pub use llm::{GenerationRequest, OllamaClient, TextGenerator, TgiClient};
pub use parser::parse_entity_list;
pub use prompt::{ConversationTemplate, IE_AS_QA};
pub use resolver::{MatchMode, SpanResolver, slice_span};
pub use retry::RetryPolicy;
pub use schema::{
    CategoryOutcome, CategoryReport, ENTITY_TYPES, EntityType, ExtractionReport, ItemizedEntity,
    RawExtraction, Span,
};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub entity_types: Vec<EntityType>,
    pub max_new_tokens: usize,
    pub template: String,
    /// Category calls in flight at once.
    pub max_concurrency: usize,
    /// Budget for a single generation attempt.
    pub request_timeout_secs: u64,
    pub retry: RetryPolicy,
    pub match_mode: MatchMode,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            entity_types: ENTITY_TYPES.to_vec(),
            max_new_tokens: llm::DEFAULT_MAX_NEW_TOKENS,
            template: IE_AS_QA.name.to_string(),
            max_concurrency: 1,
            request_timeout_secs: 60,
            retry: RetryPolicy::default(),
            match_mode: MatchMode::Literal,
        }
    }
}

pub struct Extractor<G> {
    generator: G,
    config: ExtractorConfig,
    template: ConversationTemplate,
}

impl<G: TextGenerator> Extractor<G> {
    /// Build an extractor, rejecting unusable configuration up front.
    pub fn new(generator: G, config: ExtractorConfig) -> Result<Self, NerError> {
        if config.entity_types.is_empty() {
            return Err(NerError::NoEntityTypes);
        }
        if config.max_new_tokens == 0 {
            return Err(NerError::InvalidConfig("max_new_tokens must be positive".into()));
        }
        if config.max_concurrency == 0 {
            return Err(NerError::InvalidConfig("max_concurrency must be positive".into()));
        }
        if config.request_timeout_secs == 0 {
            return Err(NerError::InvalidConfig("request_timeout_secs must be positive".into()));
        }
        let template = ConversationTemplate::by_name(&config.template)?;

        Ok(Self {
            generator,
            config,
            template,
        })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Run every configured category and locate the results.
    pub async fn run(&self, text: &str) -> Result<ExtractionReport, NerError> {
        self.run_with(text, &self.config.entity_types, self.config.match_mode)
            .await
    }

    /// Like [`Extractor::run`], returning only the entities.
    pub async fn entities(&self, text: &str) -> Result<Vec<ItemizedEntity>, NerError> {
        Ok(self.run(text).await?.entities)
    }

    /// Run a specific category list with a specific match mode.
    pub async fn run_with(
        &self,
        text: &str,
        entity_types: &[EntityType],
        match_mode: MatchMode,
    ) -> Result<ExtractionReport, NerError> {
        let started = Instant::now();
        let (raw, outcomes) = self.extract_raw(text, entity_types).await?;
        let entities = SpanResolver::new(match_mode).itemize(text, &raw);

        info!(
            categories = entity_types.len(),
            categories_with_entities = raw.len(),
            entities = entities.len(),
            failed = outcomes.iter().filter(|r| r.outcome.is_failure()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Extraction finished"
        );

        Ok(ExtractionReport { entities, outcomes })
    }

    /// Ask the model about each category, keeping the non-empty answers in
    /// category order.
    pub async fn extract_raw(
        &self,
        text: &str,
        entity_types: &[EntityType],
    ) -> Result<(Vec<RawExtraction>, Vec<CategoryReport>), NerError> {
        if text.trim().is_empty() {
            return Err(NerError::EmptyText);
        }
        if entity_types.is_empty() {
            return Err(NerError::NoEntityTypes);
        }

        let calls: Vec<_> = entity_types
            .iter()
            .map(|&entity_type| async move {
                let (entities, outcome) = self.run_category(text, entity_type).await;
                (entity_type, entities, outcome)
            })
            .collect();
        let results: Vec<(EntityType, Option<Vec<String>>, CategoryOutcome)> = stream::iter(calls)
            .buffered(self.config.max_concurrency)
            .collect()
            .await;

        let mut raw = Vec::new();
        let mut outcomes = Vec::with_capacity(results.len());
        for (entity_type, entities, outcome) in results {
            if let Some(entities) = entities.filter(|e| !e.is_empty()) {
                raw.push(RawExtraction {
                    entity_type,
                    entities,
                });
            }
            outcomes.push(CategoryReport {
                entity_type,
                outcome,
            });
        }

        Ok((raw, outcomes))
    }

    /// One category: prompt, generate, parse. Never fails the run.
    async fn run_category(
        &self,
        text: &str,
        entity_type: EntityType,
    ) -> (Option<Vec<String>>, CategoryOutcome) {
        let prompt = prompt::build_extraction_prompt(&self.template, text, entity_type);
        let request = GenerationRequest::new(prompt).with_max_new_tokens(self.config.max_new_tokens);

        let generated = match self.generate(&request, entity_type).await {
            Ok(generated) => generated,
            Err(e) => {
                warn!(
                    entity_type = %entity_type,
                    backend = self.generator.name(),
                    error = %e,
                    "Generation failed, treating category as empty"
                );
                return (None, CategoryOutcome::Failed(e.to_string()));
            }
        };

        match parse_entity_list(&generated) {
            Ok(entities) => {
                debug!(entity_type = %entity_type, count = entities.len(), "Parsed model answer");
                let outcome = if entities.is_empty() {
                    CategoryOutcome::Empty
                } else {
                    CategoryOutcome::Found(entities.len())
                };
                (Some(entities), outcome)
            }
            Err(e) => {
                warn!(
                    entity_type = %entity_type,
                    error = %e,
                    output = %generated,
                    "Model answer is not a list of strings, treating category as empty"
                );
                (None, CategoryOutcome::Malformed)
            }
        }
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        entity_type: EntityType,
    ) -> Result<String, GenerationError> {
        let budget = Duration::from_secs(self.config.request_timeout_secs);
        let generator = &self.generator;

        self.config
            .retry
            .retry(entity_type.label(), move || async move {
                match tokio::time::timeout(budget, generator.generate(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(GenerationError::Timeout(budget)),
                }
            })
            .await
    }
}
