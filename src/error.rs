//! Structured error types for materialization responses.

use crate::materialize::validate::NameCollision;
use rusqlite::ffi;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Machine-checkable reason codes carried by error responses.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Lookup failures
    NotFound,

    // Conflicts
    DuplicateName,
    InvalidReference,

    // Malformed payloads
    ValidationError,

    // Internal errors
    StorageError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::DuplicateName => "duplicate_name",
            ErrorCode::InvalidReference => "invalid_reference",
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::StorageError => "storage_error",
        }
    }
}

/// Kind of entity a not-found error refers to.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Project,
    CatalogSuper,
    CatalogGroup,
    Template,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Entity::Project => "Project",
            Entity::CatalogSuper => "Catalog super",
            Entity::CatalogGroup => "Catalog group",
            Entity::Template => "Template",
        };
        f.write_str(label)
    }
}

/// Every way a materialization call can fail.
///
/// Any of these aborts the whole unit of work; nothing written by the call
/// survives.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    #[error("Duplicate work item names: {}", format_collisions(.collisions))]
    DuplicateName { collisions: Vec<NameCollision> },

    #[error("Invalid parent reference: {message}")]
    InvalidReference { message: String },

    #[error("{field} is required")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{message}")]
    Storage { message: String },
}

fn format_collisions(collisions: &[NameCollision]) -> String {
    if collisions.is_empty() {
        return "a work item with the same name already exists".to_string();
    }
    collisions
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl MaterializeError {
    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_reference(message: impl Into<String>) -> Self {
        Self::InvalidReference {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            MaterializeError::NotFound { .. } => ErrorCode::NotFound,
            MaterializeError::DuplicateName { .. } => ErrorCode::DuplicateName,
            MaterializeError::InvalidReference { .. } => ErrorCode::InvalidReference,
            MaterializeError::MissingField { .. } | MaterializeError::InvalidValue { .. } => {
                ErrorCode::ValidationError
            }
            MaterializeError::Storage { .. } => ErrorCode::StorageError,
        }
    }

    /// Colliding names, for `duplicate_name` errors.
    pub fn collisions(&self) -> &[NameCollision] {
        match self {
            MaterializeError::DuplicateName { collisions } => collisions,
            _ => &[],
        }
    }

    /// Convert into the wire-level error response.
    pub fn to_response(&self) -> ErrorResponse {
        let field = match self {
            MaterializeError::MissingField { field }
            | MaterializeError::InvalidValue { field, .. } => Some(field.clone()),
            _ => None,
        };
        let duplicates = match self {
            MaterializeError::DuplicateName { collisions } => Some(collisions.clone()),
            _ => None,
        };
        ErrorResponse {
            success: false,
            reason: self.code(),
            message: self.to_string(),
            field,
            duplicates,
        }
    }
}

/// Storage errors are translated here; raw constraint text never reaches the
/// caller.
impl From<rusqlite::Error> for MaterializeError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(inner, detail) = &err {
            let detail = detail.as_deref().unwrap_or_default();
            match inner.extended_code {
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    tracing::warn!(error = %detail, "foreign key violation during materialization");
                    return MaterializeError::invalid_reference(
                        "a work item references a parent or group that does not exist",
                    );
                }
                ffi::SQLITE_CONSTRAINT_UNIQUE if detail.contains("work_items") => {
                    tracing::warn!(error = %detail, "work item name collision at storage layer");
                    return MaterializeError::DuplicateName {
                        collisions: Vec::new(),
                    };
                }
                _ => {}
            }
        }
        tracing::error!(error = %err, "unexpected storage error during materialization");
        MaterializeError::storage("The materialization could not be stored and was rolled back")
    }
}

/// Structured error body returned to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub reason: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicates: Option<Vec<NameCollision>>,
}

/// Result type for materialization operations.
pub type MaterializeResult<T> = std::result::Result<T, MaterializeError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32, message: &str) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), Some(message.to_string()))
    }

    #[test]
    fn foreign_key_violation_becomes_invalid_reference() {
        let err: MaterializeError =
            sqlite_failure(ffi::SQLITE_CONSTRAINT_FOREIGNKEY, "FOREIGN KEY constraint failed").into();
        assert_eq!(err.code(), ErrorCode::InvalidReference);
        assert!(!err.to_string().contains("FOREIGN KEY"));
    }

    #[test]
    fn work_item_unique_violation_becomes_duplicate_name() {
        let err: MaterializeError = sqlite_failure(
            ffi::SQLITE_CONSTRAINT_UNIQUE,
            "UNIQUE constraint failed: work_items.project_id, work_items.name",
        )
        .into();
        assert_eq!(err.code(), ErrorCode::DuplicateName);
        assert!(err.collisions().is_empty());
    }

    #[test]
    fn other_storage_errors_hide_raw_text() {
        let err: MaterializeError =
            sqlite_failure(ffi::SQLITE_CONSTRAINT_CHECK, "CHECK constraint failed: item_type").into();
        assert_eq!(err.code(), ErrorCode::StorageError);
        assert!(!err.to_string().contains("CHECK"));
    }

    #[test]
    fn missing_field_response_names_the_field() {
        let response = MaterializeError::missing_field("projectId").to_response();
        assert!(!response.success);
        assert_eq!(response.reason, ErrorCode::ValidationError);
        assert_eq!(response.field.as_deref(), Some("projectId"));
        assert_eq!(response.message, "projectId is required");

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["reason"], "validation_error");
        assert!(json.get("duplicates").is_none());
    }

    #[test]
    fn not_found_message_names_entity_and_id() {
        let err = MaterializeError::not_found(Entity::CatalogSuper, "S9");
        assert_eq!(err.to_string(), "Catalog super not found: S9");
        assert_eq!(err.code().as_str(), "not_found");
    }
}
