use crate::error::DbError;

/// A local precondition on free-text input, checked before any driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRule {
    Required,
    DiffersFrom(String),
    Numeric,
    Port,
    Identifier,
}

impl InputRule {
    pub fn check(&self, input: &str) -> Result<(), String> {
        let trimmed = input.trim();
        match self {
            Self::Required => {
                if trimmed.is_empty() {
                    return Err("a value is required".to_string());
                }
            }
            Self::DiffersFrom(current) => {
                if trimmed == current {
                    return Err(format!("new value must differ from `{current}`"));
                }
            }
            Self::Numeric => {
                if !trimmed.chars().all(|ch| ch.is_ascii_digit()) || trimmed.is_empty() {
                    return Err("value must be a number".to_string());
                }
            }
            Self::Port => {
                if trimmed.parse::<u16>().map_or(true, |port| port == 0) {
                    return Err("port must be a number between 1 and 65535".to_string());
                }
            }
            Self::Identifier => {
                if trimmed.is_empty()
                    || !trimmed
                        .chars()
                        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
                {
                    return Err("only letters, digits and `_` are allowed".to_string());
                }
            }
        }
        Ok(())
    }
}

/// First failing rule, as the message a prompt shows inline.
#[must_use]
pub fn first_violation(rules: &[InputRule], input: &str) -> Option<String> {
    rules.iter().find_map(|rule| rule.check(input).err())
}

pub fn validate(rules: &[InputRule], input: &str) -> Result<(), DbError> {
    match first_violation(rules, input) {
        Some(message) => Err(DbError::Validation(message)),
        None => Ok(()),
    }
}
