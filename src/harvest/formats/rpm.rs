//! RPM packages.
//!
//! Layout: a 96-byte lead, a signature header padded to an 8-byte boundary,
//! the main header, then the compressed cpio payload. Headers share one
//! structure: a 16-byte intro, `nindex` 16-byte index entries and a data
//! store of `hsize` bytes.

use std::io::{self, Read};

use crate::harvest::classify::Classifier;
use crate::harvest::decode::{decode, Chain, Transform};
use crate::harvest::formats::collect_payload;
use crate::model::PackageRecord;
use crate::traits::{PackageParser, ParseError};

const LEAD_LEN: usize = 96;
const LEAD_MAGIC: [u8; 4] = [0xed, 0xab, 0xee, 0xdb];
const HEADER_MAGIC: [u8; 3] = [0x8e, 0xad, 0xe8];
const MAX_INDEX_ENTRIES: u32 = 0x1_0000;
const MAX_STORE_LEN: u32 = 256 * 1024 * 1024;

const TAG_NAME: u32 = 1000;
const TAG_VERSION: u32 = 1001;
const TAG_RELEASE: u32 = 1002;
const TAG_EPOCH: u32 = 1003;
const TAG_SUMMARY: u32 = 1004;
const TAG_DESCRIPTION: u32 = 1005;
const TAG_BUILDTIME: u32 = 1006;
const TAG_VENDOR: u32 = 1011;
const TAG_LICENSE: u32 = 1014;
const TAG_PACKAGER: u32 = 1015;
const TAG_URL: u32 = 1020;
const TAG_ARCH: u32 = 1022;
const TAG_SOURCERPM: u32 = 1044;
const TAG_REQUIRENAME: u32 = 1049;
const TAG_REQUIREVERSION: u32 = 1050;
const TAG_PAYLOADCOMPRESSOR: u32 = 1125;

const TYPE_INT32: u32 = 4;
const TYPE_STRING: u32 = 6;
const TYPE_STRING_ARRAY: u32 = 8;
const TYPE_I18NSTRING: u32 = 9;

/// The only payload compression the parser decodes.
const SUPPORTED_COMPRESSOR: &str = "xz";
/// Assumed when the header does not name a compressor.
const DEFAULT_COMPRESSOR: &str = "gzip";

#[derive(Debug, Clone, Default)]
pub struct RpmParser {
    classifier: Classifier,
}

impl RpmParser {
    pub fn new(classifier: Classifier) -> Self {
        Self { classifier }
    }
}

impl PackageParser for RpmParser {
    fn manager(&self) -> &str {
        "rpm"
    }

    fn check(&self, name: &str) -> bool {
        name.ends_with(".rpm")
    }

    fn parse(&self, reader: &mut dyn Read, origin_name: &str) -> Result<PackageRecord, ParseError> {
        read_lead(reader)?;
        let (_, signature_len) = Header::read(reader, "signature")?;
        skip(reader, (8 - signature_len % 8) % 8)?;
        let (header, _) = Header::read(reader, "main")?;
        let metadata = header.record();

        let compressor = header
            .string(TAG_PAYLOADCOMPRESSOR)
            .unwrap_or_else(|| DEFAULT_COMPRESSOR.to_string());
        if compressor != SUPPORTED_COMPRESSOR {
            return Err(ParseError::UnsupportedCompression(compressor));
        }

        let chain = Chain::new(
            format!("{origin_name} payload"),
            &[Transform::Xz, Transform::Cpio],
        )?;
        let mut payload = PackageRecord::default();
        decode(&chain, reader, |name, member| {
            collect_payload(&self.classifier, name, member, &mut payload)
        })?;

        Ok(PackageRecord {
            manager: self.manager().to_string(),
            ..PackageRecord::new(origin_name)
        }
        .merge(metadata)
        .merge(payload))
    }
}

fn read_lead(reader: &mut dyn Read) -> Result<(), ParseError> {
    let mut lead = [0u8; LEAD_LEN];
    reader
        .read_exact(&mut lead)
        .map_err(|e| ParseError::InvalidHeader(format!("lead: {e}")))?;
    if lead[..4] != LEAD_MAGIC {
        return Err(ParseError::InvalidHeader("not an rpm file".to_string()));
    }
    Ok(())
}

fn skip(reader: &mut dyn Read, count: u64) -> Result<(), ParseError> {
    let skipped = io::copy(&mut reader.take(count), &mut io::sink())?;
    if skipped < count {
        return Err(ParseError::InvalidHeader("truncated header padding".to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    tag: u32,
    kind: u32,
    offset: u32,
    count: u32,
}

#[derive(Debug)]
struct Header {
    entries: Vec<IndexEntry>,
    store: Vec<u8>,
}

impl Header {
    /// Reads one header structure, returning it with the number of bytes consumed.
    fn read(reader: &mut dyn Read, section: &str) -> Result<(Self, u64), ParseError> {
        let invalid =
            |detail: &str| ParseError::InvalidHeader(format!("{section} header: {detail}"));

        let mut intro = [0u8; 16];
        reader
            .read_exact(&mut intro)
            .map_err(|e| invalid(&e.to_string()))?;
        if intro[..3] != HEADER_MAGIC {
            return Err(invalid("bad magic"));
        }
        let nindex = be32(&intro[8..12]);
        let hsize = be32(&intro[12..16]);
        if nindex > MAX_INDEX_ENTRIES || hsize > MAX_STORE_LEN {
            return Err(invalid("size out of range"));
        }

        let mut index = vec![0u8; nindex as usize * 16];
        reader.read_exact(&mut index).map_err(|e| invalid(&e.to_string()))?;
        let mut store = vec![0u8; hsize as usize];
        reader.read_exact(&mut store).map_err(|e| invalid(&e.to_string()))?;

        let entries = index
            .chunks_exact(16)
            .map(|raw| IndexEntry {
                tag: be32(&raw[0..4]),
                kind: be32(&raw[4..8]),
                offset: be32(&raw[8..12]),
                count: be32(&raw[12..16]),
            })
            .collect();

        let consumed = 16 + u64::from(nindex) * 16 + u64::from(hsize);
        Ok((Self { entries, store }, consumed))
    }

    fn entry(&self, tag: u32) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    fn strings(&self, tag: u32) -> Vec<String> {
        let Some(entry) = self.entry(tag) else {
            return Vec::new();
        };
        if !matches!(entry.kind, TYPE_STRING | TYPE_STRING_ARRAY | TYPE_I18NSTRING) {
            return Vec::new();
        }
        let count = if entry.kind == TYPE_STRING { 1 } else { entry.count };

        let mut out = Vec::new();
        let mut pos = entry.offset as usize;
        for _ in 0..count {
            let Some(rest) = self.store.get(pos..) else { break };
            let Some(end) = rest.iter().position(|&b| b == 0) else { break };
            out.push(String::from_utf8_lossy(&rest[..end]).into_owned());
            pos += end + 1;
        }
        out
    }

    /// First string of the tag; i18n tags yield the default locale.
    fn string(&self, tag: u32) -> Option<String> {
        self.strings(tag).into_iter().next().filter(|s| !s.is_empty())
    }

    fn int32(&self, tag: u32) -> Option<u32> {
        let entry = self.entry(tag).filter(|e| e.kind == TYPE_INT32)?;
        let start = entry.offset as usize;
        self.store.get(start..start + 4).map(be32)
    }

    fn record(&self) -> PackageRecord {
        let text = |tag| self.string(tag).unwrap_or_default();
        let names = self.strings(TAG_REQUIRENAME);
        let versions = self.strings(TAG_REQUIREVERSION);
        let depends = names
            .iter()
            .enumerate()
            .map(|(i, name)| requirement(name, versions.get(i).map_or("", String::as_str)))
            .collect();

        let packager = text(TAG_PACKAGER);
        PackageRecord {
            name: text(TAG_NAME),
            version: text(TAG_VERSION),
            release: text(TAG_RELEASE),
            epoch: self.int32(TAG_EPOCH).unwrap_or(0),
            architecture: text(TAG_ARCH),
            description: self.string(TAG_DESCRIPTION).unwrap_or_else(|| text(TAG_SUMMARY)),
            vendor: text(TAG_VENDOR),
            homepage: text(TAG_URL),
            source: text(TAG_SOURCERPM),
            maintainer: packager.clone(),
            packager,
            build_date: self.int32(TAG_BUILDTIME).map(|t| t.to_string()).unwrap_or_default(),
            declared_licenses: self.string(TAG_LICENSE).into_iter().collect(),
            depends,
            ..PackageRecord::default()
        }
    }
}

/// Renders a requirement as `name;version;release;epoch` from an `[E:]V[-R]`
/// version string.
fn requirement(name: &str, evr: &str) -> String {
    let (epoch, rest) = match evr.split_once(':') {
        Some((epoch, rest)) => (epoch.parse::<u32>().unwrap_or(0), rest),
        None => (0, evr),
    };
    let (version, release) = rest.rsplit_once('-').unwrap_or((rest, ""));
    format!("{name};{version};{release};{epoch}")
}

fn be32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
