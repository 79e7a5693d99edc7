pub mod config;
pub mod detailer;
pub mod detection;
pub mod engine;
pub mod error;
pub mod models;
pub mod persist;
pub mod pipeline;

pub use config::{BitwiseOp, DetailerConfig, ModelSettings, SaveOptions, load_config};
pub use detailer::{DetailOutput, Detailer, RunMode};
pub use detection::{Detector, InferenceBackend, ModelCatalog, ModelDetector, PreviewRenderer, RegionFinder};
pub use engine::{GenerationEngine, GenerationRequest, Processed};
pub use error::DetailError;
pub use models::{BoundingBox, DetectionInstance, DetectionResult, MaskImage, ModelEntry, ModelKind};
pub use persist::{ArtifactSink, DirectorySink, NullSink};
pub use pipeline::{PassOutcome, PassPlan, RegionPasses, RunState};
