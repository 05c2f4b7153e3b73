//! Payload member classification and content hashing.

use md5::{Digest, Md5};
use regex::RegexSet;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::warn;

use crate::harvest::license;
use crate::model::LicenseMatch;

/// Bytes handed to magic-number detection.
const SNIFF_LEN: usize = 261;
/// Shortest ELF file the type sniffer accepts.
const MIN_ELF_LEN: usize = 53;
const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// Extensions of source and text files that are never executables.
const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "csv", "xml", "json", "html", "md", "yml", "yaml", "ini", "conf", "bat", "sh", "py",
    "java", "cpp", "js", "go", "h", "c",
];

/// Extensions a license file may carry; `""` means none.
const LICENSE_EXTENSIONS: &[&str] = &["", "md", "rst", "html", "txt"];

/// Package descriptor files, handled by the format parsers.
const METADATA_NAMES: &[&str] = &[
    ".PKGINFO", "control", "md5sums", "conffiles", "shlibs", "symbols", "triggers", "templates",
];

static LICENSE_NAMES: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)li[cs]en[cs]es?",
        r"(?i)legal",
        r"(?i)copy(left|right|ing)",
        r"(?i)unlicense",
        r"(?i)l?gpl([-_ v]?)(\d\.?\d)?",
        r"(?i)bsd",
        r"(?i)mit",
        r"(?i)apache",
    ])
    .expect("valid license file patterns")
});

/// What a container member turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    MetadataText,
    License(LicenseMatch),
    Executable { hash: String },
    Irrelevant,
}

/// Content type detection failed; the member is treated as irrelevant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassificationWarning {
    #[error("ELF magic present but header truncated at {0} bytes")]
    TruncatedElf(usize),
}

#[derive(Debug, Clone)]
pub struct Classifier {
    min_license_confidence: f64,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Classifier {
    /// `min_license_confidence` is the lowest coverage percentage reported
    /// as a license match.
    pub fn new(min_license_confidence: f64) -> Self {
        Self {
            min_license_confidence,
        }
    }

    /// Returns `false` when the name alone already decides the outcome, so the
    /// caller can skip reading the member.
    pub fn needs_content(&self, name: &str) -> bool {
        let base = base_name(name);
        if METADATA_NAMES.contains(&base) {
            return false;
        }
        let extension = extension(base);
        !TEXT_EXTENSIONS.contains(&extension) || is_license_candidate(base, extension)
    }

    /// Classifies one member. Never fails: detection problems are logged and
    /// the member is reported as [`Classification::Irrelevant`].
    pub fn classify(&self, name: &str, data: &[u8]) -> Classification {
        let base = base_name(name);
        if METADATA_NAMES.contains(&base) {
            return Classification::MetadataText;
        }

        let extension = extension(base);
        let license_candidate = is_license_candidate(base, extension);
        let text_file = TEXT_EXTENSIONS.contains(&extension);
        if text_file && !license_candidate {
            return Classification::Irrelevant;
        }

        if !text_file {
            match sniff_elf(data) {
                Ok(true) => {
                    return Classification::Executable {
                        hash: content_hash(data),
                    }
                }
                Ok(false) => {}
                Err(warning) => {
                    warn!(member = name, %warning, "Content type detection failed");
                    return Classification::Irrelevant;
                }
            }
        }

        if license_candidate {
            if let Some(report) = license::scan(&String::from_utf8_lossy(data)) {
                if report.percentage >= self.min_license_confidence {
                    return Classification::License(LicenseMatch {
                        names: report.names,
                        percentage: report.percentage,
                        path: name.to_string(),
                    });
                }
            }
        }

        Classification::Irrelevant
    }
}

/// Hex MD5 of the full member content.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

fn sniff_elf(data: &[u8]) -> Result<bool, ClassificationWarning> {
    let head = &data[..data.len().min(SNIFF_LEN)];
    match infer::get(head) {
        Some(kind) => Ok(kind.extension() == "elf"),
        None if head.starts_with(ELF_MAGIC) && head.len() < MIN_ELF_LEN => {
            Err(ClassificationWarning::TruncatedElf(head.len()))
        }
        None => Ok(false),
    }
}

fn is_license_candidate(base: &str, extension: &str) -> bool {
    LICENSE_EXTENSIONS.contains(&extension) && LICENSE_NAMES.is_match(base)
}

fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn extension(base: &str) -> &str {
    match base.rfind('.') {
        Some(0) | None => "",
        Some(dot) => &base[dot + 1..],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::fixtures::{elf, MIT_LICENSE};

    #[test]
    fn test_elf_is_hashed() {
        let binary = elf(b"hello");
        let result = Classifier::default().classify("usr/bin/foo", &binary);
        assert_eq!(
            result,
            Classification::Executable {
                hash: content_hash(&binary)
            }
        );
        assert_eq!(content_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_identical_bytes_share_a_hash() {
        let classifier = Classifier::default();
        let a = classifier.classify("usr/bin/a", &elf(b"same"));
        let b = classifier.classify("usr/lib/b.so", &elf(b"same"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_denylisted_extension_skips_sniffing() {
        let result = Classifier::default().classify("usr/share/tool.py", &elf(b"x"));
        assert_eq!(result, Classification::Irrelevant);
    }

    #[test]
    fn test_license_file_is_matched() {
        let result =
            Classifier::default().classify("usr/share/doc/foo/LICENSE", MIT_LICENSE.as_bytes());
        match result {
            Classification::License(found) => {
                assert_eq!(found.names, vec!["MIT"]);
                assert_eq!(found.path, "usr/share/doc/foo/LICENSE");
                assert!(found.percentage > 0.0);
            }
            other => panic!("expected a license, got {other:?}"),
        }

        // Text extensions on the license list are still scanned.
        let result = Classifier::default().classify("COPYING.txt", MIT_LICENSE.as_bytes());
        assert!(matches!(result, Classification::License(_)));
    }

    #[test]
    fn test_license_name_without_matching_text_is_irrelevant() {
        let result = Classifier::default().classify("LICENSE", b"see the website");
        assert_eq!(result, Classification::Irrelevant);
    }

    #[test]
    fn test_license_below_confidence_is_dropped() {
        let result = Classifier::new(101.0).classify("LICENSE", MIT_LICENSE.as_bytes());
        assert_eq!(result, Classification::Irrelevant);
    }

    #[test]
    fn test_metadata_and_other_members() {
        let classifier = Classifier::default();
        assert_eq!(classifier.classify("./control", b"Package: x"), Classification::MetadataText);
        assert_eq!(classifier.classify(".PKGINFO", b"pkgname = x"), Classification::MetadataText);
        assert_eq!(
            classifier.classify("usr/share/icon.png", b"\x89PNG\r\n"),
            Classification::Irrelevant
        );
    }

    #[test]
    fn test_truncated_elf_degrades_to_irrelevant() {
        let result = Classifier::default().classify("usr/bin/broken", b"\x7fELF\x02\x01");
        assert_eq!(result, Classification::Irrelevant);
        assert_eq!(sniff_elf(b"\x7fELF"), Err(ClassificationWarning::TruncatedElf(4)));
    }

    #[test]
    fn test_needs_content() {
        let classifier = Classifier::default();
        assert!(classifier.needs_content("usr/bin/foo"));
        assert!(classifier.needs_content("usr/share/doc/foo/COPYING.txt"));
        assert!(!classifier.needs_content("usr/share/doc/foo/README.md"));
        assert!(!classifier.needs_content("./control"));
    }

    #[test]
    fn test_extension_parsing() {
        assert_eq!(extension("LICENSE"), "");
        assert_eq!(extension(".PKGINFO"), "");
        assert_eq!(extension("COPYING.md"), "md");
        assert_eq!(base_name("./usr/bin/foo"), "foo");
    }
}
