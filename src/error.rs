//! Error types for mask derivation and detail passes.
//!
//! Detector and generation-engine failures are not represented here: they
//! travel through `anyhow::Error` unchanged so the caller sees exactly what
//! the external collaborator reported.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetailError {
    /// Lockstep replacement got a different number of masks than instances.
    #[error("mask count {actual} does not match detection count {expected}")]
    Alignment { expected: usize, actual: usize },

    /// Union of an empty mask list.
    #[error("cannot combine an empty mask list")]
    EmptyInput,

    #[error("mask dimensions differ: {left:?} vs {right:?}")]
    DimensionMismatch {
        left: (u32, u32),
        right: (u32, u32),
    },

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("detection model not found: {identifier}")]
    ModelNotFound { identifier: String },

    #[error("cannot tell whether {path} is a bbox or segm model")]
    UnknownModelKind { path: String },

    #[error("img2img request has no init image")]
    MissingInitImage,

    #[error("generation engine returned no images")]
    EmptyGeneration,

    #[error("segmentation model returned no mask for instance {index}")]
    MissingMask { index: usize },
}

impl DetailError {
    pub fn config(message: impl Into<String>) -> Self {
        DetailError::InvalidConfig {
            message: message.into(),
        }
    }
}

pub type DetailResult<T> = Result<T, DetailError>;
