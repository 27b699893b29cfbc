//! Protocol error taxonomy.
//!
//! Every failure surfaced by validation, dispatch or storage carries an
//! [`ErrorKind`]. The kind decides the JSON-RPC error code sent to clients and
//! whether the convergence loop may retry the message later.

use std::fmt;
use thiserror::Error;

/// Classification of a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The method or `object#action` pair is not valid for the target.
    InvalidAction,
    /// The referenced resource (usually a channel) does not exist.
    InvalidResource,
    /// The resource already exists.
    DuplicateResource,
    /// A field of the message or its payload failed validation.
    InvalidMessageField,
    /// The sender is not allowed to perform the action.
    AccessDenied,
    /// Reading from storage failed.
    QueryDatabase,
    /// Writing to storage failed.
    StoreDatabase,
    /// Any other server-side failure.
    Internal,
}

impl ErrorKind {
    /// Returns the JSON-RPC error code for this kind.
    pub fn code(self) -> i64 {
        match self {
            Self::InvalidAction => -1,
            Self::InvalidResource => -2,
            Self::DuplicateResource => -3,
            Self::InvalidMessageField => -4,
            Self::AccessDenied => -5,
            Self::QueryDatabase | Self::StoreDatabase | Self::Internal => -6,
        }
    }

    /// Returns the snake_case label for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidAction => "invalid_action",
            Self::InvalidResource => "invalid_resource",
            Self::DuplicateResource => "duplicate_resource",
            Self::InvalidMessageField => "invalid_message_field",
            Self::AccessDenied => "access_denied",
            Self::QueryDatabase => "query_database",
            Self::StoreDatabase => "store_database",
            Self::Internal => "internal",
        }
    }

    /// Whether a message failing with this kind may succeed on a later attempt.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::QueryDatabase | Self::StoreDatabase | Self::Internal
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol error with its kind, a description and the call-site
/// breadcrumbs it travelled through.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {description}{}", trail(.breadcrumbs))]
pub struct PopError {
    kind: ErrorKind,
    description: String,
    breadcrumbs: Vec<&'static str>,
}

fn trail(breadcrumbs: &[&'static str]) -> String {
    if breadcrumbs.is_empty() {
        String::new()
    } else {
        format!(" (at {})", breadcrumbs.join(" <- "))
    }
}

impl PopError {
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            breadcrumbs: Vec::new(),
        }
    }

    pub fn invalid_action(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidAction, description)
    }

    pub fn invalid_resource(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidResource, description)
    }

    pub fn duplicate_resource(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateResource, description)
    }

    pub fn invalid_field(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidMessageField, description)
    }

    pub fn access_denied(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::AccessDenied, description)
    }

    pub fn query_database(description: impl fmt::Display) -> Self {
        Self::new(ErrorKind::QueryDatabase, description.to_string())
    }

    pub fn store_database(description: impl fmt::Display) -> Self {
        Self::new(ErrorKind::StoreDatabase, description.to_string())
    }

    pub fn internal(description: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Internal, description.to_string())
    }

    /// Records a call-site breadcrumb. The kind never changes.
    #[must_use]
    pub fn wrap(mut self, location: &'static str) -> Self {
        self.breadcrumbs.push(location);
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> i64 {
        self.kind.code()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn breadcrumbs(&self) -> &[&'static str] {
        &self.breadcrumbs
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<serde_json::Error> for PopError {
    fn from(e: serde_json::Error) -> Self {
        Self::invalid_field(format!("malformed json: {e}"))
    }
}
