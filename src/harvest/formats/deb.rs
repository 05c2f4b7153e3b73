use std::io::Read;

use crate::harvest::classify::Classifier;
use crate::harvest::decode::{decode, Chain, DecodeError, Transform};
use crate::harvest::formats::{collect_payload, control, member_path, parse_section};
use crate::model::PackageRecord;
use crate::traits::{PackageParser, ParseError};

/// Debian binary packages: an `ar` archive holding `control.tar.*` and
/// `data.tar.*` sections.
#[derive(Debug, Clone, Default)]
pub struct DebParser {
    classifier: Classifier,
}

impl DebParser {
    pub fn new(classifier: Classifier) -> Self {
        Self { classifier }
    }
}

impl PackageParser for DebParser {
    fn manager(&self) -> &str {
        "dpkg"
    }

    fn check(&self, name: &str) -> bool {
        name.ends_with(".deb") || name.ends_with(".udeb")
    }

    fn parse(&self, reader: &mut dyn Read, origin_name: &str) -> Result<PackageRecord, ParseError> {
        let chain = Chain::new(origin_name, &[Transform::Ar])?;
        let mut metadata = PackageRecord::default();
        let mut payload = PackageRecord::default();

        decode(&chain, reader, |name, member| {
            if name.contains("control") {
                metadata = parse_section(name, member, |inner, reader, record| {
                    if member_path(inner) == "control" {
                        control::parse_control(reader, record).map_err(|source| DecodeError::Read {
                            member: inner.to_string(),
                            source,
                        })?;
                    }
                    Ok(())
                })?;
            } else if name.contains("data") {
                payload = parse_section(name, member, |inner, reader, record| {
                    collect_payload(&self.classifier, inner, reader, record)
                })?;
            }
            Ok::<(), ParseError>(())
        })?;

        Ok(PackageRecord {
            manager: self.manager().to_string(),
            ..PackageRecord::new(origin_name)
        }
        .merge(metadata)
        .merge(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::classify::content_hash;
    use crate::harvest::fixtures::{self, elf, MIT_LICENSE};

    const CONTROL: &[u8] = b"Package: foo\nVersion: 1.0\nDepends: a, b\n";

    #[test]
    fn test_deb_record() {
        let binary = elf(b"foo binary");
        let bytes = fixtures::deb(
            &[("./control", CONTROL), ("./md5sums", b"0 usr/bin/foo\n")],
            &[("./usr/bin/foo", &binary), ("./usr/share/doc/foo/changelog.txt", b"notes")],
        );

        let record = DebParser::default()
            .parse(&mut bytes.as_slice(), "foo_1.0_amd64.deb")
            .unwrap();

        assert_eq!(record.origin_name, "foo_1.0_amd64.deb");
        assert_eq!(record.manager, "dpkg");
        assert_eq!(record.name, "foo");
        assert_eq!(record.version, "1.0");
        assert_eq!(record.depends, vec!["a", "b"]);
        assert_eq!(record.hashes.len(), 1);
        assert_eq!(record.hashes[&content_hash(&binary)], "usr/bin/foo");
    }

    #[test]
    fn test_identical_binaries_keep_last_path() {
        let binary = elf(b"shared");
        let bytes = fixtures::deb(
            &[("control", CONTROL)],
            &[("usr/bin/first", &binary), ("usr/bin/second", &binary)],
        );

        let record = DebParser::default().parse(&mut bytes.as_slice(), "x.deb").unwrap();
        assert_eq!(record.hashes.len(), 1);
        assert_eq!(record.hashes[&content_hash(&binary)], "usr/bin/second");
    }

    #[test]
    fn test_payload_license_is_detected() {
        let bytes = fixtures::deb(
            &[("control", CONTROL)],
            &[("usr/share/doc/foo/copyright", MIT_LICENSE.as_bytes())],
        );
        let record = DebParser::default().parse(&mut bytes.as_slice(), "x.deb").unwrap();
        assert_eq!(record.licenses.len(), 1);
        assert_eq!(record.licenses[0].names, vec!["MIT"]);
        assert_eq!(record.licenses[0].path, "usr/share/doc/foo/copyright");
    }

    #[test]
    fn test_unsupported_section_compression_is_named() {
        let control = fixtures::gzip(&fixtures::tar(&[("control", CONTROL)]));
        let bytes = fixtures::ar(&[
            ("debian-binary", b"2.0\n"),
            ("control.tar.gz", &control),
            ("data.tar.lz4", b"whatever"),
        ]);

        let err = DebParser::default().parse(&mut bytes.as_slice(), "x.deb").unwrap_err();
        match err {
            ParseError::Section { section, source } => {
                assert_eq!(section, "data.tar.lz4");
                assert!(matches!(*source, ParseError::Decode(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_corrupt_section_aborts_package() {
        let bytes = fixtures::ar(&[
            ("debian-binary", b"2.0\n"),
            ("control.tar.xz", b"not xz at all"),
        ]);
        let err = DebParser::default().parse(&mut bytes.as_slice(), "x.deb").unwrap_err();
        assert!(err.to_string().contains("control.tar.xz"));
    }

    #[test]
    fn test_check() {
        let parser = DebParser::default();
        assert!(parser.check("foo_1.0_amd64.deb"));
        assert!(parser.check("foo.udeb"));
        assert!(!parser.check("foo.deb.asc"));
    }
}
