pub mod config_store;
pub mod http_fetcher;
pub mod raw_fallback;
pub mod symphonia_decoder;
pub mod transcoder;

pub use config_store::TomlConfigStore;
pub use http_fetcher::HttpFetcher;
pub use raw_fallback::RawPcmFallback;
pub use symphonia_decoder::SymphoniaStrategy;
pub use transcoder::{FfmpegLocator, FfmpegStrategy};
