pub mod artifact_store;
pub mod conversion;
pub mod pipeline;
pub mod resolver;

pub use artifact_store::{ArtifactScope, ArtifactStore};
pub use conversion::ConversionChain;
pub use pipeline::{IngestionPipeline, PipelineState};
pub use resolver::{ResolveStrategy, VoiceFileResolver};
