//! Container-chain decoding.
//!
//! A [`Chain`] is derived from a member or file name suffix and lists the
//! byte filters (decompressors) to apply followed by exactly one archive
//! reader. [`decode`] runs the chain left to right and hands every regular
//! file member to a visitor, one at a time, without buffering members.

use std::error::Error as StdError;
use std::fmt;
use std::io::{self, Read};

use bzip2::read::MultiBzDecoder;
use cpio_archive::{CpioHeader, CpioReader, NewcReader};
use flate2::read::MultiGzDecoder;
use thiserror::Error;
use xz2::read::XzDecoder;
use xz2::stream::Stream;

/// One step of a container chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    Ar,
    Tar,
    Cpio,
    Gzip,
    Bzip2,
    Xz,
    /// Legacy `.lzma` (LZMA-alone) streams.
    Lzma,
    Zstd,
}

impl Transform {
    /// Archive transforms yield members; everything else is a byte filter.
    pub fn is_archive(self) -> bool {
        matches!(self, Transform::Ar | Transform::Tar | Transform::Cpio)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Transform::Ar => "ar",
            Transform::Tar => "tar",
            Transform::Cpio => "cpio",
            Transform::Gzip => "gzip",
            Transform::Bzip2 => "bzip2",
            Transform::Xz => "xz",
            Transform::Lzma => "lzma",
            Transform::Zstd => "zstd",
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use Transform::{Ar, Bzip2, Cpio, Gzip, Lzma, Tar, Xz, Zstd};

/// Suffix → chain table. New formats are added as rows.
const SUFFIX_TABLE: &[(&str, &[Transform])] = &[
    (".tar.gz", &[Gzip, Tar]),
    (".tgz", &[Gzip, Tar]),
    (".tar.bz2", &[Bzip2, Tar]),
    (".tar.xz", &[Xz, Tar]),
    (".tar.lzma", &[Lzma, Tar]),
    (".tar.zst", &[Zstd, Tar]),
    (".tar", &[Tar]),
    (".cpio.gz", &[Gzip, Cpio]),
    (".cpio.xz", &[Xz, Cpio]),
    (".cpio", &[Cpio]),
    (".deb", &[Ar]),
    (".udeb", &[Ar]),
    (".apk", &[Gzip, Tar]),
];

/// cpio mode bits identifying a regular file.
const MODE_TYPE_MASK: u32 = 0o170000;
const MODE_REGULAR: u32 = 0o100000;

/// Errors raised while unwrapping a container chain.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt archive '{member}' at {stage} stage: {source}")]
    Corrupt {
        member: String,
        stage: Transform,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read member '{member}': {source}")]
    Read {
        member: String,
        #[source]
        source: io::Error,
    },
}

/// Read failure raised inside a filter, tagged with the filter's stage so the
/// archive reader that hit it does not take the blame.
#[derive(Error, Debug)]
#[error("{stage} stream: {source}")]
struct FilterError {
    stage: Transform,
    source: io::Error,
}

struct Filtered<R> {
    inner: R,
    stage: Transform,
}

impl<R: Read> Read for Filtered<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|source| {
            if failed_filter(&source).is_some() {
                return source;
            }
            io::Error::new(
                source.kind(),
                FilterError {
                    stage: self.stage,
                    source,
                },
            )
        })
    }
}

/// Stage of the innermost filter error carried by `error`, if any.
fn failed_filter(error: &io::Error) -> Option<Transform> {
    let mut current = error.get_ref().map(|inner| inner as &(dyn StdError + 'static));
    while let Some(err) = current {
        if let Some(filter) = err.downcast_ref::<FilterError>() {
            return Some(filter.stage);
        }
        current = match err.downcast_ref::<io::Error>().and_then(io::Error::get_ref) {
            Some(inner) => Some(inner as &(dyn StdError + 'static)),
            None => err.source(),
        };
    }
    None
}

/// An ordered decode plan: zero or more filters, then one archive reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    label: String,
    filters: Vec<Transform>,
    archive: Transform,
}

impl Chain {
    /// Builds a chain from an explicit stage list.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnsupportedFormat`] unless the list is a run of
    /// filters terminated by exactly one archive stage.
    pub fn new(label: impl Into<String>, stages: &[Transform]) -> Result<Self, DecodeError> {
        let label = label.into();
        let Some((&archive, filters)) = stages.split_last() else {
            return Err(DecodeError::UnsupportedFormat(label));
        };
        if !archive.is_archive() || filters.iter().any(|t| t.is_archive()) {
            return Err(DecodeError::UnsupportedFormat(label));
        }
        Ok(Self {
            label,
            filters: filters.to_vec(),
            archive,
        })
    }

    /// Looks the name's suffix up in the chain table.
    pub fn from_name(name: &str) -> Result<Self, DecodeError> {
        SUFFIX_TABLE
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix))
            .ok_or_else(|| DecodeError::UnsupportedFormat(name.to_string()))
            .and_then(|(_, stages)| Self::new(name, stages))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn stages(&self) -> impl Iterator<Item = Transform> + '_ {
        self.filters.iter().copied().chain(std::iter::once(self.archive))
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<&str> = self.stages().map(Transform::as_str).collect();
        write!(f, "{} ({})", self.label, stages.join(" > "))
    }
}

/// Walks `reader` through `chain`, calling `visit` once per regular file.
///
/// A visitor error stops the walk and is returned as is; whatever earlier
/// visits did is not undone.
pub fn decode<'r, R, F, E>(chain: &Chain, reader: R, mut visit: F) -> Result<(), E>
where
    R: Read + 'r,
    F: FnMut(&str, &mut dyn Read) -> Result<(), E>,
    E: From<DecodeError>,
{
    let mut stream: Box<dyn Read + 'r> = Box::new(reader);
    for &filter in &chain.filters {
        stream = open_filter(filter, stream).map_err(|source| DecodeError::Corrupt {
            member: chain.label.clone(),
            stage: filter,
            source,
        })?;
    }

    let label = chain.label.as_str();
    match chain.archive {
        Ar => walk_ar(stream, label, &mut visit),
        Tar => walk_tar(stream, label, &mut visit),
        Cpio => walk_cpio(stream, label, &mut visit),
        other => Err(DecodeError::UnsupportedFormat(format!("{label}: {other}")).into()),
    }
}

fn open_filter<'r>(
    filter: Transform,
    stream: Box<dyn Read + 'r>,
) -> io::Result<Box<dyn Read + 'r>> {
    let decoder: Box<dyn Read + 'r> = match filter {
        Gzip => Box::new(MultiGzDecoder::new(stream)),
        Bzip2 => Box::new(MultiBzDecoder::new(stream)),
        Xz => Box::new(XzDecoder::new_multi_decoder(stream)),
        Lzma => {
            let raw = Stream::new_lzma_decoder(u64::MAX)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Box::new(XzDecoder::new_stream(stream, raw))
        }
        Zstd => Box::new(zstd::stream::read::Decoder::new(stream)?),
        archive => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{archive} is not a filter"),
            ))
        }
    };
    Ok(Box::new(Filtered {
        inner: decoder,
        stage: filter,
    }))
}

/// Maps an archive reader failure to [`DecodeError::Corrupt`]. Failures that
/// started in a filter are reported at that filter's stage.
fn corrupt(label: &str, stage: Transform) -> impl Fn(io::Error) -> DecodeError + '_ {
    move |source| DecodeError::Corrupt {
        member: label.to_string(),
        stage: failed_filter(&source).unwrap_or(stage),
        source,
    }
}

fn walk_ar<R, F, E>(stream: R, label: &str, visit: &mut F) -> Result<(), E>
where
    R: Read,
    F: FnMut(&str, &mut dyn Read) -> Result<(), E>,
    E: From<DecodeError>,
{
    let mut archive = ar::Archive::new(stream);
    while let Some(entry) = archive.next_entry() {
        let mut entry = entry.map_err(corrupt(label, Ar))?;
        let name = String::from_utf8_lossy(entry.header().identifier())
            .trim_end_matches('/')
            .to_string();
        visit(&name, &mut entry)?;
    }
    Ok(())
}

fn walk_tar<R, F, E>(stream: R, label: &str, visit: &mut F) -> Result<(), E>
where
    R: Read,
    F: FnMut(&str, &mut dyn Read) -> Result<(), E>,
    E: From<DecodeError>,
{
    let mut archive = tar::Archive::new(stream);
    for entry in archive.entries().map_err(corrupt(label, Tar))? {
        let mut entry = entry.map_err(corrupt(label, Tar))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry
            .path()
            .map_err(corrupt(label, Tar))?
            .to_string_lossy()
            .into_owned();
        visit(&name, &mut entry)?;
    }
    Ok(())
}

fn walk_cpio<R, F, E>(stream: R, label: &str, visit: &mut F) -> Result<(), E>
where
    R: Read,
    F: FnMut(&str, &mut dyn Read) -> Result<(), E>,
    E: From<DecodeError>,
{
    let mut archive = NewcReader::new(stream);
    while let Some(header) = archive
        .read_next()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        .map_err(corrupt(label, Cpio))?
    {
        if header.mode() & MODE_TYPE_MASK != MODE_REGULAR {
            continue;
        }
        let name = header.name().to_string();
        visit(&name, &mut Read::take(&mut archive, header.file_size()))?;
    }
    Ok(())
}

/// Reads a whole member into memory, tagging failures with its name.
pub fn read_member(name: &str, reader: &mut dyn Read) -> Result<Vec<u8>, DecodeError> {
    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .map_err(|source| DecodeError::Read {
            member: name.to_string(),
            source,
        })?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::fixtures;

    fn collect(chain: &Chain, bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, DecodeError> {
        let mut members = Vec::new();
        decode(chain, bytes, |name, reader| {
            members.push((name.to_string(), read_member(name, reader)?));
            Ok::<(), DecodeError>(())
        })?;
        Ok(members)
    }

    fn sample_tar() -> Vec<u8> {
        fixtures::tar(&[("control", b"Package: foo\n"), ("md5sums", b"x\n")])
    }

    #[test]
    fn test_every_tar_suffix_decodes() {
        let tar = sample_tar();
        let cases = [
            ("control.tar", tar.clone()),
            ("control.tar.gz", fixtures::gzip(&tar)),
            ("data.tar.bz2", fixtures::bzip2(&tar)),
            ("data.tar.xz", fixtures::xz(&tar)),
            ("data.tar.lzma", fixtures::lzma(&tar)),
            ("control.tar.zst", fixtures::zstd(&tar)),
        ];

        for (name, bytes) in cases {
            let chain = Chain::from_name(name).unwrap();
            let members = collect(&chain, &bytes).unwrap_or_else(|e| panic!("{name}: {e}"));
            let names: Vec<&str> = members.iter().map(|(n, _)| n.as_str()).collect();
            assert_eq!(names, vec!["control", "md5sums"], "{name}");
            assert_eq!(members[0].1, b"Package: foo\n");
        }
    }

    #[test]
    fn test_directories_are_skipped() {
        let bytes = fixtures::tar_with_dir("usr/bin/", &[("usr/bin/foo", b"bin")]);
        let chain = Chain::from_name("data.tar").unwrap();
        let members = collect(&chain, &bytes).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].0, "usr/bin/foo");
    }

    #[test]
    fn test_ar_members_are_yielded_in_order() {
        let bytes = fixtures::ar(&[("debian-binary", b"2.0\n"), ("control.tar.gz", b"abc")]);
        let chain = Chain::from_name("pkg.deb").unwrap();
        let members = collect(&chain, &bytes).unwrap();
        assert_eq!(members[0].0, "debian-binary");
        assert_eq!(members[1], ("control.tar.gz".to_string(), b"abc".to_vec()));
    }

    #[test]
    fn test_cpio_xz_chain() {
        let cpio = fixtures::cpio(&[("./usr/bin/tool", b"payload")]);
        let chain = Chain::from_name("payload.cpio.xz").unwrap();
        let members = collect(&chain, &fixtures::xz(&cpio)).unwrap();
        assert_eq!(members, vec![("./usr/bin/tool".to_string(), b"payload".to_vec())]);
    }

    #[test]
    fn test_cpio_skips_directories_and_unread_data() {
        let cpio = fixtures::cpio_entries(&[
            ("./usr", 0o040755, b""),
            ("./usr/bin/a", 0o100755, b"0123456789"),
            ("./usr/bin/b", 0o100644, b"xy"),
        ]);
        let chain = Chain::from_name("payload.cpio").unwrap();
        let mut names = Vec::new();
        decode(&chain, cpio.as_slice(), |name, reader| {
            names.push(name.to_string());
            if name.ends_with('b') {
                assert_eq!(read_member(name, reader)?, b"xy");
            }
            Ok::<(), DecodeError>(())
        })
        .unwrap();
        assert_eq!(names, vec!["./usr/bin/a", "./usr/bin/b"]);
    }

    #[test]
    fn test_cpio_bad_magic_is_corrupt() {
        let chain = Chain::from_name("payload.cpio").unwrap();
        let err = collect(&chain, &[b'x'; 200]).unwrap_err();
        assert!(matches!(err, DecodeError::Corrupt { stage: Cpio, .. }), "{err}");
    }

    #[test]
    fn test_unknown_suffix_is_unsupported() {
        let err = Chain::from_name("data.tar.lz4").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(name) if name == "data.tar.lz4"));
        assert!(Chain::from_name("control").is_err());
    }

    #[test]
    fn test_chain_requires_single_trailing_archive() {
        assert!(Chain::new("x", &[]).is_err());
        assert!(Chain::new("x", &[Gzip]).is_err());
        assert!(Chain::new("x", &[Tar, Gzip]).is_err());
        assert!(Chain::new("x", &[Ar, Tar]).is_err());
        let chain = Chain::new("x", &[Zstd, Tar]).unwrap();
        assert_eq!(chain.stages().collect::<Vec<_>>(), vec![Zstd, Tar]);
        assert_eq!(chain.to_string(), "x (zstd > tar)");
    }

    #[test]
    fn test_corrupt_stream_names_member_and_stage() {
        let chain = Chain::from_name("data.tar.gz").unwrap();
        let err = collect(&chain, b"definitely not gzip").unwrap_err();
        match err {
            DecodeError::Corrupt { member, stage, .. } => {
                assert_eq!(member, "data.tar.gz");
                assert_eq!(stage, Gzip);
            }
            other => panic!("unexpected error: {other}"),
        }

        let chain = Chain::from_name("payload.cpio.xz").unwrap();
        let err = collect(&chain, b"not xz either").unwrap_err();
        assert!(matches!(err, DecodeError::Corrupt { stage: Xz, .. }), "{err}");

        // Archive-level damage under a healthy filter stays with the archive.
        let chain = Chain::from_name("data.tar.gz").unwrap();
        let err = collect(&chain, &fixtures::gzip(&[7u8; 1024])).unwrap_err();
        assert!(matches!(err, DecodeError::Corrupt { stage: Tar, .. }), "{err}");
    }

    #[test]
    fn test_visitor_error_stops_walk() {
        let tar = sample_tar();
        let chain = Chain::from_name("control.tar").unwrap();
        let mut seen = 0;
        let result = decode(&chain, tar.as_slice(), |_, _| {
            seen += 1;
            Err(DecodeError::UnsupportedFormat("stop".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(seen, 1);
    }
}
