use thiserror::Error;

use crate::model::diff::EntityClass;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("{class} entity `{external_id}` is not known to this document")]
    UnknownEntity {
        class: EntityClass,
        external_id: String,
    },

    #[error("no sketch geometry found for entity `{external_id}`")]
    MissingGeometry { external_id: String },

    #[error("constraint `{name}` not found in sketch")]
    MissingConstraint { name: String },

    #[error("malformed {class} record{}: {reason}", fmt_id(.external_id))]
    MalformedRecord {
        class: EntityClass,
        external_id: Option<String>,
        reason: String,
    },

    #[error("cannot apply `{field}` to {class} entity `{external_id}`: {reason}")]
    StructuralMismatch {
        class: EntityClass,
        external_id: String,
        field: String,
        reason: String,
    },

    #[error("sketch kernel rejected operation: {reason}")]
    Kernel { reason: String },

    #[error("invalid value for field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("container is no longer part of the model")]
    UnknownContainer,

    #[error("json encode failed: {0}")]
    Encode(String),

    #[error("json decode failed: {0}")]
    Decode(String),

    #[error("i/o failed for `{path}`: {reason}")]
    Io { path: String, reason: String },

    #[error("document owner task is unavailable")]
    OwnerClosed,

    #[error("runtime task join failed: {0}")]
    RuntimeJoin(String),
}

impl SyncError {
    pub(crate) fn kernel(reason: impl Into<String>) -> Self {
        Self::Kernel {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_field(field: &str, err: impl std::fmt::Display) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            reason: err.to_string(),
        }
    }
}

fn fmt_id(external_id: &Option<String>) -> String {
    match external_id {
        Some(id) => format!(" `{id}`"),
        None => String::new(),
    }
}
