use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{AudioFormat, RetryPolicy};

/// Failure of a single conversion attempt, classified explicitly so the
/// chain retries transient causes (a failed process launch) and never
/// deterministic ones (unsupported codec, corrupt input).
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("transient conversion failure: {0}")]
    Transient(String),
    #[error("conversion failed: {0}")]
    Permanent(String),
}

impl StrategyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StrategyError::Transient(_))
    }
}

/// Port for one conversion backend in the strategy chain.
#[async_trait]
pub trait ConversionStrategy: Send + Sync {
    /// Stable identifier used in logs and outcome diagnostics.
    fn name(&self) -> &'static str;

    /// Whether this backend can attempt the given conversion at all.
    async fn can_handle(&self, input: AudioFormat, target: AudioFormat) -> bool;

    /// Convert `input` into `output`. The output file is validated by the
    /// caller with the format sniffer; writing garbage with a zero exit is
    /// still a failure.
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), StrategyError>;

    /// Per-strategy retry budget, applied by the chain to transient errors.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::single()
    }
}
