//! End-to-end extraction against in-memory generators.

use async_trait::async_trait;
use ner::{
    CategoryOutcome, EntityType, ExtractionReport, Extractor, ExtractorConfig, GenerationError,
    GenerationRequest, MatchMode, RetryPolicy, TextGenerator, slice_span,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Same answer for every category.
struct FixedGenerator(&'static str);

#[async_trait]
impl TextGenerator for FixedGenerator {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        Ok(self.0.to_string())
    }
}

/// A backend that is down.
struct UnavailableGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for UnavailableGenerator {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(GenerationError::Status {
            backend: "unavailable",
            status: 503,
            body: "loading model".into(),
        })
    }
}

/// Hangs on one category, answers the rest.
struct SlowOnDate;

#[async_trait]
impl TextGenerator for SlowOnDate {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        if request.prompt.contains("What describes DATE ") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(r#"["Paris"]"#.to_string())
    }
}

fn config(entity_types: &[EntityType]) -> ExtractorConfig {
    ExtractorConfig {
        entity_types: entity_types.to_vec(),
        retry: RetryPolicy::none(),
        ..Default::default()
    }
}

fn assert_spans_match(text: &str, report: &ExtractionReport) {
    for entity in &report.entities {
        assert_eq!(slice_span(text, entity.span), Some(entity.entity.as_str()));
    }
}

#[tokio::test]
async fn test_duplicate_phrases_resolve_every_occurrence() {
    let text = "Paris is near Paris, not London.";
    let extractor = Extractor::new(
        FixedGenerator(r#"["Paris", "Paris", "London"]"#),
        config(&[EntityType::Location]),
    )
    .unwrap();

    let report = extractor.run(text).await.unwrap();
    let spans: Vec<_> = report.entities.iter().map(|e| (e.entity.as_str(), e.span)).collect();
    assert_eq!(
        spans,
        vec![("Paris", (0, 5)), ("Paris", (14, 19)), ("London", (25, 31))]
    );
    assert_spans_match(text, &report);
}

#[tokio::test]
async fn test_concurrent_calls_keep_category_order() {
    let text = "Paris, Paris.";
    let extractor = Extractor::new(FixedGenerator(r#"["Paris"]"#), ExtractorConfig {
        max_concurrency: 4,
        retry: RetryPolicy::none(),
        ..Default::default()
    })
    .unwrap();

    let report = extractor.run(text).await.unwrap();
    let types: Vec<EntityType> = report.entities.iter().map(|e| e.entity_type).collect();
    assert_eq!(types, ner::ENTITY_TYPES.to_vec());
    assert_spans_match(text, &report);
}

#[tokio::test]
async fn test_hallucinated_phrases_are_dropped() {
    let text = "The meeting is on Monday.";
    let extractor = Extractor::new(
        FixedGenerator(r#"["Monday", "Tuesday"]"#),
        config(&[EntityType::Date]),
    )
    .unwrap();

    let entities = extractor.entities(text).await.unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].entity, "Monday");
}

#[tokio::test]
async fn test_unsafe_output_is_never_run() {
    let text = "Some text about Paris.";
    let extractor = Extractor::new(
        FixedGenerator("__import__('os').system('echo pwned')"),
        config(&[EntityType::Location]),
    )
    .unwrap();

    let report = extractor.run(text).await.unwrap();
    assert!(report.entities.is_empty());
    assert_eq!(report.outcomes[0].outcome, CategoryOutcome::Malformed);
}

#[tokio::test(start_paused = true)]
async fn test_backend_down_yields_empty_result() {
    let generator = UnavailableGenerator {
        calls: AtomicUsize::new(0),
    };
    let extractor = Extractor::new(generator, ExtractorConfig {
        entity_types: vec![EntityType::Person, EntityType::Event],
        retry: RetryPolicy::new(1, 10, 10),
        ..Default::default()
    })
    .unwrap();

    let report = extractor.run("Anything at all.").await.unwrap();
    assert!(report.entities.is_empty());
    assert!(report.backend_unavailable());
    // one retry per category
    assert_eq!(extractor.generator().calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_category_keeps_partial_results() {
    let extractor = Extractor::new(SlowOnDate, ExtractorConfig {
        entity_types: vec![EntityType::Location, EntityType::Date],
        request_timeout_secs: 5,
        retry: RetryPolicy::none(),
        ..Default::default()
    })
    .unwrap();

    let report = extractor.run("Paris in spring.").await.unwrap();
    assert_eq!(report.entities.len(), 1);
    assert_eq!(report.entities[0].entity_type, EntityType::Location);
    assert!(matches!(report.outcomes[1].outcome, CategoryOutcome::Failed(_)));
    assert!(!report.backend_unavailable());
}

#[tokio::test]
async fn test_pattern_mode_is_opt_in() {
    let text = "Scores: 12 and 34.";
    let extractor = Extractor::new(
        FixedGenerator(r#"["\\d+", "\\d+"]"#),
        config(&[EntityType::Cardinal]),
    )
    .unwrap();

    assert!(extractor.entities(text).await.unwrap().is_empty());

    let report = extractor
        .run_with(text, &[EntityType::Cardinal], MatchMode::Pattern)
        .await
        .unwrap();
    let found: Vec<&str> = report.entities.iter().map(|e| e.entity.as_str()).collect();
    assert_eq!(found, vec!["12", "34"]);
    assert_spans_match(text, &report);
}
