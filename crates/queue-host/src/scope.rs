//! Singleton scope expressions.
//!
//! A scope names the logical resource a singleton lock is taken on. It is
//! derived per message from the group id, an attribute, a colon-delimited
//! path into a JSON body, or fixed for the whole function.

use crate::error::{ConfigurationError, ScopeResolutionError};
use crate::message::ReceivedMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between segments of a body path (`"order:id"`)
pub const PATH_SEPARATOR: char = ':';

/// Where the singleton scope of a message comes from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ScopeExpression {
    /// The message group id
    #[default]
    GroupId,
    /// A flat attribute lookup
    Attribute { name: String },
    /// A colon-delimited path into the JSON body
    BodyPath { path: String },
    /// One scope shared by every message
    Fixed { name: String },
}

impl ScopeExpression {
    /// Check the expression can ever resolve
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            Self::GroupId => Ok(()),
            Self::Attribute { name } | Self::Fixed { name } if name.trim().is_empty() => {
                Err(ConfigurationError::Invalid {
                    message: "scope name must not be empty".to_string(),
                })
            }
            Self::Attribute { .. } | Self::Fixed { .. } => Ok(()),
            Self::BodyPath { path } => {
                if path.split(PATH_SEPARATOR).any(|segment| segment.is_empty()) {
                    return Err(ConfigurationError::Invalid {
                        message: format!("scope body path '{}' has an empty segment", path),
                    });
                }
                Ok(())
            }
        }
    }

    /// Derive the scope name for `message`
    pub fn resolve(&self, message: &ReceivedMessage) -> Result<String, ScopeResolutionError> {
        let missing = |path: &str| ScopeResolutionError::Missing {
            message_id: message.message_id.to_string(),
            path: path.to_string(),
        };

        match self {
            Self::Fixed { name } => Ok(name.clone()),
            Self::GroupId => message
                .group_id
                .clone()
                .filter(|group| !group.is_empty())
                .ok_or_else(|| missing("group_id")),
            Self::Attribute { name } => message
                .attributes
                .get(name)
                .cloned()
                .ok_or_else(|| missing(name.as_str())),
            Self::BodyPath { path } => {
                let body: Value = serde_json::from_slice(&message.body).map_err(|source| {
                    ScopeResolutionError::InvalidBody {
                        message_id: message.message_id.to_string(),
                        source,
                    }
                })?;

                let mut current = &body;
                for segment in path.split(PATH_SEPARATOR) {
                    current = current.get(segment).ok_or_else(|| missing(path.as_str()))?;
                }

                scalar_to_scope(current).ok_or_else(|| ScopeResolutionError::NotScalar {
                    message_id: message.message_id.to_string(),
                    path: path.clone(),
                })
            }
        }
    }
}

impl std::fmt::Display for ScopeExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GroupId => write!(f, "group_id"),
            Self::Attribute { name } => write!(f, "attribute:{}", name),
            Self::BodyPath { path } => write!(f, "body:{}", path),
            Self::Fixed { name } => write!(f, "fixed:{}", name),
        }
    }
}

fn scalar_to_scope(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
#[path = "scope_tests.rs"]
mod tests;
