//! Prompt construction in the conversation format UniNER was tuned on.

use crate::error::NerError;
use crate::schema::EntityType;

/// Who speaks a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Human,
    Gpt,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub from: Speaker,
    pub value: String,
}

impl Turn {
    fn human(value: impl Into<String>) -> Self {
        Self {
            from: Speaker::Human,
            value: value.into(),
        }
    }

    fn gpt(value: impl Into<String>) -> Self {
        Self {
            from: Speaker::Gpt,
            value: value.into(),
        }
    }
}

/// Chat template with two roles and alternating separators.
#[derive(Debug, Clone, Copy)]
pub struct ConversationTemplate {
    pub name: &'static str,
    pub system: &'static str,
    pub roles: (&'static str, &'static str),
    pub sep: &'static str,
    pub sep2: &'static str,
}

pub const IE_AS_QA: ConversationTemplate = ConversationTemplate {
    name: "ie_as_qa",
    system: "A virtual assistant answers questions from a user based on the provided text.",
    roles: ("USER", "ASSISTANT"),
    sep: " ",
    sep2: "</s>",
};

const TEMPLATES: &[ConversationTemplate] = &[IE_AS_QA];

impl ConversationTemplate {
    pub fn by_name(name: &str) -> Result<Self, NerError> {
        TEMPLATES
            .iter()
            .copied()
            .find(|t| t.name == name)
            .ok_or_else(|| NerError::UnknownTemplate(name.to_string()))
    }

    /// Render turns. The last turn is always left open for the model.
    pub fn render(&self, turns: &[Turn]) -> String {
        let mut prompt = String::new();
        prompt.push_str(self.system);
        prompt.push_str(self.sep);

        for (i, turn) in turns.iter().enumerate() {
            let role = match turn.from {
                Speaker::Human => self.roles.0,
                Speaker::Gpt => self.roles.1,
            };
            prompt.push_str(role);
            prompt.push(':');

            if i + 1 < turns.len() {
                prompt.push(' ');
                prompt.push_str(&turn.value);
                prompt.push_str(if i % 2 == 0 { self.sep } else { self.sep2 });
            }
        }

        prompt
    }
}

/// The four-turn exchange asking about one category.
pub fn build_conversation(text: &str, entity_type: EntityType) -> Vec<Turn> {
    vec![
        Turn::human(format!("Text: {}", text)),
        Turn::gpt("I've read this text."),
        Turn::human(format!("What describes {} in the text?", entity_type.label())),
        Turn::gpt("[]"),
    ]
}

pub fn build_extraction_prompt(
    template: &ConversationTemplate,
    text: &str,
    entity_type: EntityType,
) -> String {
    template.render(&build_conversation(text, entity_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_prompt() {
        let prompt = build_extraction_prompt(&IE_AS_QA, "Paris is big.", EntityType::Location);
        assert_eq!(
            prompt,
            "A virtual assistant answers questions from a user based on the provided text. \
             USER: Text: Paris is big. ASSISTANT: I've read this text.</s>\
             USER: What describes LOCATION in the text? ASSISTANT:"
        );
    }

    #[test]
    fn test_final_turn_left_open() {
        let prompt = build_extraction_prompt(&IE_AS_QA, "x", EntityType::ProductName);
        assert!(prompt.ends_with("ASSISTANT:"));
        assert!(!prompt.contains("[]"));
        assert!(prompt.contains("What describes PRODUCT_NAME in the text?"));
    }

    #[test]
    fn test_unknown_template() {
        assert!(ConversationTemplate::by_name("ie_as_qa").is_ok());
        assert!(matches!(
            ConversationTemplate::by_name("vicuna"),
            Err(NerError::UnknownTemplate(_))
        ));
    }
}
