//! Error types for the deformation core

use serde::{Deserialize, Serialize};

/// Result type used across the crate
pub type Result<T> = core::result::Result<T, DeformError>;

/// Errors surfaced by skeleton construction, store access and (de)serialization.
///
/// Lookups of optional data (unknown bone or morph names, missing keyframes)
/// do not produce errors; they resolve to `None` or an identity value.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DeformError {
    /// Index outside the fixed range of a pose store
    #[error("Bone index {index} is out of range (bone count {len})")]
    BoneIndexOutOfRange { index: usize, len: usize },

    /// Bone name not present in the skeleton
    #[error("Bone not found: {name}")]
    BoneNotFound { name: String },

    /// Skeleton description failed validation
    #[error("Invalid skeleton: {reason}")]
    InvalidSkeleton { reason: String },

    /// Serialization error
    #[error("Serialization error: {reason}")]
    SerializationError { reason: String },
}

impl DeformError {
    pub(crate) fn invalid_skeleton(reason: impl Into<String>) -> Self {
        Self::InvalidSkeleton {
            reason: reason.into(),
        }
    }

    /// Check if the caller can continue evaluating after this error.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BoneIndexOutOfRange { .. }
                | Self::BoneNotFound { .. }
        )
    }

    /// Get error category for logging
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::BoneIndexOutOfRange { .. } => "contract",
            Self::BoneNotFound { .. } => "lookup",
            Self::InvalidSkeleton { .. } => "skeleton",
            Self::SerializationError { .. } => "serialization",
        }
    }
}

impl From<serde_json::Error> for DeformError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError {
            reason: err.to_string(),
        }
    }
}
