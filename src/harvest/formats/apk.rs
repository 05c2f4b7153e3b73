use std::io::Read;

use crate::harvest::classify::Classifier;
use crate::harvest::decode::{decode, Chain, DecodeError, Transform};
use crate::harvest::formats::{collect_payload, control};
use crate::model::PackageRecord;
use crate::traits::{PackageParser, ParseError};

const PKGINFO: &str = ".PKGINFO";

/// Alpine packages: signature, control and data segments stored as
/// concatenated gzip members that together read as one tar stream.
#[derive(Debug, Clone, Default)]
pub struct ApkParser {
    classifier: Classifier,
}

impl ApkParser {
    pub fn new(classifier: Classifier) -> Self {
        Self { classifier }
    }
}

impl PackageParser for ApkParser {
    fn manager(&self) -> &str {
        "apk"
    }

    fn check(&self, name: &str) -> bool {
        name.ends_with(".apk")
    }

    fn parse(&self, reader: &mut dyn Read, origin_name: &str) -> Result<PackageRecord, ParseError> {
        let chain = Chain::new(origin_name, &[Transform::Gzip, Transform::Tar])?;
        let mut metadata = PackageRecord::default();
        let mut payload = PackageRecord::default();

        decode(&chain, reader, |name, member| {
            if name.ends_with(PKGINFO) {
                control::parse_pkginfo(member, &mut metadata).map_err(|source| DecodeError::Read {
                    member: name.to_string(),
                    source,
                })?;
                return Ok(());
            }
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
