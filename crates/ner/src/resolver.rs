//! Locating extracted phrases in the source text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use tracing::warn;

use crate::schema::{ItemizedEntity, RawExtraction, Span};

/// How a phrase is searched for in the text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Exact substring search.
    #[default]
    Literal,
    /// The phrase is compiled as a regular expression.
    Pattern,
}

#[derive(Debug, Clone, Default)]
pub struct SpanResolver {
    mode: MatchMode,
}

impl SpanResolver {
    pub fn new(mode: MatchMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Turn per-category phrase lists into located entities.
    ///
    /// A phrase listed more than once within a category yields every
    /// occurrence in the text, once. A phrase listed once yields its first
    /// occurrence. Phrases absent from the text are dropped.
    pub fn itemize(&self, text: &str, extractions: &[RawExtraction]) -> Vec<ItemizedEntity> {
        let offsets = CharOffsets::new(text);
        let mut itemized = Vec::new();

        for extraction in extractions {
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for phrase in &extraction.entities {
                *counts.entry(phrase.as_str()).or_default() += 1;
            }
            let mut completed: HashSet<&str> = HashSet::new();

            for phrase in &extraction.entities {
                let phrase = phrase.as_str();
                if phrase.is_empty() {
                    warn!(entity_type = %extraction.entity_type, "Skipping empty phrase");
                    continue;
                }

                let repeated = counts.get(phrase).copied().unwrap_or(0) > 1;
                if repeated && !completed.insert(phrase) {
                    continue;
                }

                let Some(matches) = self.find(text, phrase, repeated) else {
                    continue;
                };
                if matches.is_empty() {
                    warn!(
                        entity_type = %extraction.entity_type,
                        phrase,
                        "Phrase not found in source text, skipping"
                    );
                    continue;
                }

                for range in matches {
                    itemized.push(ItemizedEntity {
                        entity_type: extraction.entity_type,
                        entity: text[range.clone()].to_string(),
                        span: offsets.span(range),
                    });
                }
            }
        }

        itemized
    }

    /// Byte ranges of `phrase` in `text`; all of them or only the first.
    /// `None` when the phrase is not a usable pattern.
    fn find(&self, text: &str, phrase: &str, all: bool) -> Option<Vec<Range<usize>>> {
        let limit = if all { usize::MAX } else { 1 };
        match self.mode {
            MatchMode::Literal => Some(
                text.match_indices(phrase)
                    .take(limit)
                    .map(|(start, m)| start..start + m.len())
                    .collect(),
            ),
            MatchMode::Pattern => match Regex::new(phrase) {
                Ok(re) => Some(
                    re.find_iter(text)
                        .filter(|m| m.start() < m.end())
                        .take(limit)
                        .map(|m| m.range())
                        .collect(),
                ),
                Err(e) => {
                    warn!(phrase, error = %e, "Phrase is not a valid pattern, skipping");
                    None
                }
            },
        }
    }
}

/// Maps byte offsets to character offsets.
struct CharOffsets {
    boundaries: Vec<usize>,
}

impl CharOffsets {
    fn new(text: &str) -> Self {
        Self {
            boundaries: text.char_indices().map(|(i, _)| i).collect(),
        }
    }

    fn char_offset(&self, byte: usize) -> usize {
        self.boundaries.partition_point(|&b| b < byte)
    }

    fn span(&self, range: Range<usize>) -> Span {
        (self.char_offset(range.start), self.char_offset(range.end))
    }
}

/// The text covered by a character span, if the span is in bounds.
pub fn slice_span(text: &str, span: Span) -> Option<&str> {
    let (start, end) = span;
    if start > end {
        return None;
    }
    let byte_at = |char_idx: usize| {
        text.char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .nth(char_idx)
    };
    Some(&text[byte_at(start)?..byte_at(end)?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityType;

    fn raw(entity_type: EntityType, entities: &[&str]) -> RawExtraction {
        RawExtraction {
            entity_type,
            entities: entities.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_repeated_and_single_phrases() {
        let text = "Paris is near Paris, not London.";
        let items = SpanResolver::default().itemize(
            text,
            &[raw(EntityType::Location, &["Paris", "Paris", "London"])],
        );

        let spans: Vec<(&str, Span)> = items.iter().map(|i| (i.entity.as_str(), i.span)).collect();
        assert_eq!(
            spans,
            vec![("Paris", (0, 5)), ("Paris", (14, 19)), ("London", (25, 31))]
        );
    }

    #[test]
    fn test_single_phrase_takes_first_occurrence() {
        let text = "Paris and Paris";
        let items = SpanResolver::default().itemize(text, &[raw(EntityType::Location, &["Paris"])]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].span, (0, 5));
    }

    #[test]
    fn test_repeated_state_is_per_category() {
        let text = "May in May";
        let items = SpanResolver::default().itemize(
            text,
            &[
                raw(EntityType::Person, &["May", "May"]),
                raw(EntityType::Date, &["May", "May"]),
            ],
        );
        assert_eq!(items.len(), 4);
        assert_eq!(items[2].entity_type, EntityType::Date);
    }

    #[test]
    fn test_empty_list_and_missing_phrase() {
        let text = "Nothing to see.";
        let resolver = SpanResolver::default();
        assert!(resolver.itemize(text, &[raw(EntityType::Event, &[])]).is_empty());
        assert!(resolver
            .itemize(text, &[raw(EntityType::Event, &["Olympics", ""])])
            .is_empty());
    }

    #[test]
    fn test_literal_mode_ignores_metacharacters() {
        let text = "Price rose 5.5% (approx.) today, 5x5% later";
        let items = SpanResolver::default()
            .itemize(text, &[raw(EntityType::Percent, &["5.5%", "(approx.)"])]);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].span, (11, 15));
        assert_eq!(items[1].entity, "(approx.)");
    }

    #[test]
    fn test_pattern_mode() {
        let text = "Call at 10:30 or 11:45.";
        let resolver = SpanResolver::new(MatchMode::Pattern);
        let items = resolver.itemize(text, &[raw(EntityType::Time, &[r"\d+:\d+", "(unclosed"])]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].entity, "10:30");
        assert_eq!(items[0].span, (8, 13));
    }

    #[test]
    fn test_character_offsets_with_multibyte_text() {
        let text = "Zoë flew to Zürich. Zürich!";
        let items = SpanResolver::default().itemize(
            text,
            &[
                raw(EntityType::Person, &["Zoë"]),
                raw(EntityType::Location, &["Zürich", "Zürich"]),
            ],
        );
        assert_eq!(items[0].span, (0, 3));
        assert_eq!(items[1].span, (12, 18));
        assert_eq!(items[2].span, (20, 26));
        for item in &items {
            assert_eq!(slice_span(text, item.span), Some(item.entity.as_str()));
        }
    }

    #[test]
    fn test_slice_span_bounds() {
        assert_eq!(slice_span("abc", (0, 3)), Some("abc"));
        assert_eq!(slice_span("abc", (3, 3)), Some(""));
        assert_eq!(slice_span("abc", (2, 4)), None);
        assert_eq!(slice_span("abc", (2, 1)), None);
    }
}
