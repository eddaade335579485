//! Structured command replies.
//!
//! A [`CommandResponse`] is transport-agnostic: the caller decides whether
//! it becomes an embed, a plain message or a log line.

use std::fmt;

use serde::Serialize;

use crate::error::CommandError;

/// A named field in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseField {
    /// Field heading.
    pub name: String,
    /// Field body.
    pub value: String,
}

/// What a command answers with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResponse {
    /// Heading.
    pub title: String,
    /// Body text.
    pub description: String,
    /// Extra named sections.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<ResponseField>,
    /// Whether this reports a failure.
    pub is_error: bool,
}

impl CommandResponse {
    /// A successful reply.
    pub fn success(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            fields: Vec::new(),
            is_error: false,
        }
    }

    /// A failure reply.
    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::success(title, description)
        }
    }

    /// Append a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(ResponseField {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

impl From<&CommandError> for CommandResponse {
    fn from(err: &CommandError) -> Self {
        match err {
            CommandError::NotFound { name } => Self::error(
                "Unknown command",
                format!("`{name}` is not a command. Try `help` for a list."),
            ),
            CommandError::NotAuthorized {
                command,
                required,
                actual,
            } => Self::error(
                "Not authorized",
                format!("`{command}` requires {required}. You are {actual}."),
            ),
            CommandError::RateLimited { retry_after_ms, .. } => Self::error(
                "Slow down",
                format!("Wait {retry_after_ms} ms before your next command."),
            ),
            CommandError::FlowInProgress => Self::error(
                "Command in progress",
                "Finish or cancel the command you already started first.",
            ),
            CommandError::InvalidArgument { reason } => Self::error("Invalid arguments", reason),
            CommandError::HierarchyViolation { violations } => {
                violations.iter().fold(
                    Self::error("Command configuration error", err.to_string()),
                    |response, violation| response.with_field(&violation.path, violation.to_string()),
                )
            }
            CommandError::Execution { command, reason } => {
                Self::error("Command failed", format!("`{command}`: {reason}"))
            }
        }
    }
}

impl From<CommandError> for CommandResponse {
    fn from(err: CommandError) -> Self {
        Self::from(&err)
    }
}

impl fmt::Display for CommandResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.description)?;
        for field in &self.fields {
            write!(f, "\n  {}: {}", field.name, field.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::permission::PermissionLevel;

    #[test]
    fn errors_become_error_replies() {
        let response = CommandResponse::from(CommandError::NotAuthorized {
            command: "warn force".to_owned(),
            required: PermissionLevel::Moderator,
            actual: PermissionLevel::StandardUser,
        });
        assert!(response.is_error);
        assert_eq!(response.title, "Not authorized");
        assert_eq!(
            response.description,
            "`warn force` requires Moderator. You are Standard User."
        );
    }

    #[test]
    fn display_lists_fields() {
        let response = CommandResponse::success("Ping", "pong").with_field("Latency", "12 ms");
        assert_eq!(response.to_string(), "Ping: pong\n  Latency: 12 ms");
    }

    #[test]
    fn serializes_without_empty_fields() {
        let json = serde_json::to_value(CommandResponse::success("a", "b")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"title": "a", "description": "b", "is_error": false})
        );
    }
}
