//! Harvest module - package extraction and fingerprinting pipeline.
//!
//! - **Decoding**: container chains (ar, tar, cpio under gzip/bzip2/xz/lzma/zstd) via [`decode`]
//! - **Classification**: license text vs. ELF executable vs. irrelevant via [`classify`]
//! - **Formats**: deb, apk and rpm parsers in [`formats`]
//! - **Pipeline**: async driver with per-stage timeout via [`pipeline::HarvestPipeline`]

pub mod classify;
pub mod decode;
pub mod formats;
pub mod license;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod fixtures;

pub use classify::{Classification, Classifier};
pub use decode::{Chain, DecodeError, Transform};
pub use formats::{detect_os, ParserRegistry};
pub use pipeline::{HarvestPipeline, HarvestResult, HarvestStats, PackageSource, PipelineError};
