//! Package format implementations.
//!
//! Each format implements [`PackageParser`]. A [`ParserRegistry`] holds the
//! formats enabled for a run and hands out the first one that accepts a file
//! name.

pub mod apk;
pub mod control;
pub mod deb;
pub mod rpm;

use regex::Regex;
use std::io::Read;
use std::sync::{Arc, LazyLock};

use crate::harvest::classify::{Classification, Classifier};
use crate::harvest::decode::{decode, read_member, Chain};
use crate::model::PackageRecord;
use crate::traits::{PackageParser, ParseError};

pub use apk::ApkParser;
pub use deb::DebParser;
pub use rpm::RpmParser;

static UBUNTU_RELEASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ubuntu(\d+\.\d+(\.\d+)?)[-_]").expect("valid ubuntu pattern"));

/// Ordered list of enabled parsers, consulted first-match.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn PackageParser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in format sharing one classifier.
    pub fn with_defaults(classifier: Classifier) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DebParser::new(classifier.clone())));
        registry.register(Arc::new(ApkParser::new(classifier.clone())));
        registry.register(Arc::new(RpmParser::new(classifier)));
        registry
    }

    /// Appends `parser`; parsers registered earlier win ties.
    pub fn register(&mut self, parser: Arc<dyn PackageParser>) {
        if self.parsers.iter().any(|p| p.manager() == parser.manager()) {
            return;
        }
        self.parsers.push(parser);
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn PackageParser>> {
        self.parsers.iter().find(|p| p.check(name)).cloned()
    }

    pub fn accepts(&self, name: &str) -> bool {
        self.parsers.iter().any(|p| p.check(name))
    }

    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }

    pub fn managers(&self) -> impl Iterator<Item = &str> {
        self.parsers.iter().map(|p| p.manager())
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.managers()).finish()
    }
}

/// Decodes one nested section (chain taken from `name`) into a fresh partial
/// record. Any failure is wrapped with the section name.
pub(crate) fn parse_section<F>(
    name: &str,
    member: &mut dyn Read,
    mut visit: F,
) -> Result<PackageRecord, ParseError>
where
    F: FnMut(&str, &mut dyn Read, &mut PackageRecord) -> Result<(), ParseError>,
{
    let mut partial = PackageRecord::default();
    Chain::from_name(name)
        .map_err(ParseError::from)
        .and_then(|chain| {
            decode(&chain, member, |inner, reader| {
                visit(inner, reader, &mut partial)
            })
        })
        .map_err(|source| ParseError::Section {
            section: name.to_string(),
            source: Box::new(source),
        })?;
    Ok(partial)
}

/// Routes one payload member through the classifier into `record`.
pub(crate) fn collect_payload(
    classifier: &Classifier,
    name: &str,
    member: &mut dyn Read,
    record: &mut PackageRecord,
) -> Result<(), ParseError> {
    let path = member_path(name);
    if !classifier.needs_content(path) {
        return Ok(());
    }
    let data = read_member(path, member)?;
    match classifier.classify(path, &data) {
        Classification::Executable { hash } => {
            record.hashes.insert(hash, path.to_string());
        }
        Classification::License(found) => record.licenses.push(found),
        Classification::MetadataText | Classification::Irrelevant => {}
    }
    Ok(())
}

/// Archive member names without the leading `./` or `/`.
pub(crate) fn member_path(name: &str) -> &str {
    let name = name.strip_prefix("./").unwrap_or(name);
    name.trim_start_matches('/')
}

/// Distribution label for a package, derived from where it was found.
///
/// Alpine and CentOS mirrors carry the release as the path segment after the
/// distribution name; Ubuntu encodes it in the deb file name.
pub fn detect_os(manager: &str, location: &str) -> Option<String> {
    let segments: Vec<&str> = location.split('/').collect();
    let after = |distro: &str| {
        segments
            .iter()
            .position(|s| *s == distro)
            .and_then(|i| segments.get(i + 1))
            .filter(|s| !s.is_empty())
            .copied()
    };

    match manager {
        "apk" => {
            after("alpine").map(|release| format!("alpine {}", release.trim_start_matches('v')))
        }
        "rpm" => after("centos").map(|release| format!("centos {release}")),
        "dpkg" => {
            let base = segments.last().copied().unwrap_or(location);
            UBUNTU_RELEASE
                .captures(base)
                .map(|caps| format!("ubuntu {}", &caps[1]))
        }
        _ => None,
    }
}
