use crate::harvest::decode::DecodeError;
use crate::model::PackageRecord;
use std::io::Read;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("Failed to parse section '{section}': {source}")]
    Section {
        section: String,
        #[source]
        source: Box<ParseError>,
    },
    #[error("Unsupported payload compression: {0}")]
    UnsupportedCompression(String),
    #[error("Invalid package header: {0}")]
    InvalidHeader(String),
    #[error("No parser accepts '{0}'")]
    NoParser(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// One package format (deb, apk, rpm).
///
/// Parsing is synchronous, CPU-bound work; the pipeline runs it on the
/// blocking thread pool.
pub trait PackageParser: Send + Sync {
    /// Returns the package manager family this parser handles (e.g., "dpkg", "rpm").
    fn manager(&self) -> &str;

    /// Returns `true` when a file with this name is in this parser's format.
    fn check(&self, name: &str) -> bool;

    /// Reads a whole package file into its canonical record.
    fn parse(&self, reader: &mut dyn Read, origin_name: &str) -> Result<PackageRecord, ParseError>;
}
