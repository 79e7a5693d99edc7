mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from dddetail for tests
pub use dddetail::{
    BitwiseOp, DetailOutput, Detailer, DetailerConfig, DetectionInstance, DetectionResult,
    GenerationRequest, MaskImage, ModelEntry, ModelKind, ModelSettings, RunMode,
};
