use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::NerError;

/// Entity categories the model is asked about, one generation call each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    #[serde(rename = "PERSON")]
    Person,
    #[serde(rename = "ORG")]
    Organization,
    #[serde(rename = "LOCATION")]
    Location,
    #[serde(rename = "PRODUCT_NAME")]
    ProductName,
    #[serde(rename = "EVENT")]
    Event,
    #[serde(rename = "LANGUAGE")]
    Language,
    #[serde(rename = "DATE")]
    Date,
    #[serde(rename = "TIME")]
    Time,
    #[serde(rename = "PERCENT")]
    Percent,
    #[serde(rename = "QUANTITY")]
    Quantity,
    #[serde(rename = "ORDINAL")]
    Ordinal,
    #[serde(rename = "CARDINAL")]
    Cardinal,
}

/// Default category list, in the order results are reported.
pub const ENTITY_TYPES: [EntityType; 12] = [
    EntityType::Person,
    EntityType::Organization,
    EntityType::Location,
    EntityType::ProductName,
    EntityType::Event,
    EntityType::Language,
    EntityType::Date,
    EntityType::Time,
    EntityType::Percent,
    EntityType::Quantity,
    EntityType::Ordinal,
    EntityType::Cardinal,
];

impl EntityType {
    /// Label used in the prompt and in serialized output.
    pub fn label(&self) -> &'static str {
        match self {
            EntityType::Person => "PERSON",
            EntityType::Organization => "ORG",
            EntityType::Location => "LOCATION",
            EntityType::ProductName => "PRODUCT_NAME",
            EntityType::Event => "EVENT",
            EntityType::Language => "LANGUAGE",
            EntityType::Date => "DATE",
            EntityType::Time => "TIME",
            EntityType::Percent => "PERCENT",
            EntityType::Quantity => "QUANTITY",
            EntityType::Ordinal => "ORDINAL",
            EntityType::Cardinal => "CARDINAL",
        }
    }

    /// Human readable name, e.g. "product name".
    pub fn display_name(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Organization => "organization",
            EntityType::Location => "location",
            EntityType::ProductName => "product name",
            EntityType::Event => "event",
            EntityType::Language => "language",
            EntityType::Date => "date",
            EntityType::Time => "time",
            EntityType::Percent => "percent",
            EntityType::Quantity => "quantity",
            EntityType::Ordinal => "ordinal",
            EntityType::Cardinal => "cardinal",
        }
    }

    /// Parse a list of labels, failing on the first unknown one.
    /// Parses every label, keeping the first occurrence of each type.
    pub fn parse_list<S: AsRef<str>>(labels: &[S]) -> Result<Vec<EntityType>, NerError> {
        let mut types = Vec::with_capacity(labels.len());
        for label in labels {
            let entity_type: EntityType = label.as_ref().parse()?;
            if !types.contains(&entity_type) {
                types.push(entity_type);
            }
        }
        Ok(types)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for EntityType {
    type Err = NerError;

    /// Accepts the canonical label or the human name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace(['_', '-'], " ");
        ENTITY_TYPES
            .iter()
            .copied()
            .find(|t| {
                t.label().to_lowercase().replace('_', " ") == wanted || t.display_name() == wanted
            })
            .ok_or_else(|| NerError::UnknownEntityType(s.to_string()))
    }
}

/// The model's parsed answer for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawExtraction {
    pub entity_type: EntityType,
    pub entities: Vec<String>,
}

/// Half-open `[start, end)` range of character offsets.
pub type Span = (usize, usize);

/// One located entity. `entity` is exactly the source text at `span`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemizedEntity {
    pub entity_type: EntityType,
    pub entity: String,
    pub span: Span,
}

/// What happened to a single category during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CategoryOutcome {
    /// The model listed this many phrases.
    Found(usize),
    /// The model answered with an empty list.
    Empty,
    /// The answer was not a list of strings.
    Malformed,
    /// The backend errored or timed out.
    Failed(String),
}

impl CategoryOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CategoryOutcome::Malformed | CategoryOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryReport {
    pub entity_type: EntityType,
    pub outcome: CategoryOutcome,
}

/// Result of a full run: the located entities plus per-category status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub entities: Vec<ItemizedEntity>,
    pub outcomes: Vec<CategoryReport>,
}

impl ExtractionReport {
    /// True when every category failed, i.e. an empty result says nothing
    /// about the text.
    pub fn backend_unavailable(&self) -> bool {
        !self.outcomes.is_empty()
            && self
                .outcomes
                .iter()
                .all(|r| matches!(r.outcome, CategoryOutcome::Failed(_)))
    }
}
