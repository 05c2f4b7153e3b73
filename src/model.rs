use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical package record emitted once per processed package file.
///
/// A record starts empty, is filled by one partial parse per container
/// section, and is frozen once handed to a [`RecordSink`](crate::sink::RecordSink).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRecord {
    /// File name of the package as found on the mirror or disk.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub origin_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os: String,
    /// Package manager family: `dpkg`, `apk` or `rpm`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub manager: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub epoch: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub maintainer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub original_maintainer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub packager: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vendor: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub homepage: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub installed_size: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub section: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub priority: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_date: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggests: Vec<String>,
    /// License strings stated by the package metadata itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declared_licenses: Vec<String>,
    /// License texts detected inside the payload.
    #[serde(default, rename = "licence", skip_serializing_if = "Vec::is_empty")]
    pub licenses: Vec<LicenseMatch>,
    /// Content hash of each executable mapped to the member path it came from.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hashes: BTreeMap<String, String>,
}

/// A license text found in a payload member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseMatch {
    pub names: Vec<String>,
    #[serde(rename = "per")]
    pub percentage: f64,
    pub path: String,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl PackageRecord {
    pub fn new(origin_name: impl Into<String>) -> Self {
        Self {
            origin_name: origin_name.into(),
            ..Self::default()
        }
    }

    /// Folds a partial record produced by one container section into `self`.
    ///
    /// Non-empty scalars on `incoming` overwrite, empty ones leave `self`
    /// untouched. Collections are replaced wholesale when `incoming`'s copy is
    /// non-empty; they are never appended. The result therefore depends on the
    /// order sections are merged in: callers merge metadata sections first and
    /// payload sections second.
    #[must_use]
    pub fn merge(mut self, incoming: PackageRecord) -> Self {
        let PackageRecord {
            origin_name,
            os,
            manager,
            name,
            source,
            version,
            release,
            epoch,
            architecture,
            maintainer,
            original_maintainer,
            packager,
            vendor,
            homepage,
            description,
            installed_size,
            section,
            priority,
            build_date,
            depends,
            suggests,
            declared_licenses,
            licenses,
            hashes,
        } = incoming;

        overwrite(&mut self.origin_name, origin_name);
        overwrite(&mut self.os, os);
        overwrite(&mut self.manager, manager);
        overwrite(&mut self.name, name);
        overwrite(&mut self.source, source);
        overwrite(&mut self.version, version);
        overwrite(&mut self.release, release);
        if epoch != 0 {
            self.epoch = epoch;
        }
        overwrite(&mut self.architecture, architecture);
        overwrite(&mut self.maintainer, maintainer);
        overwrite(&mut self.original_maintainer, original_maintainer);
        overwrite(&mut self.packager, packager);
        overwrite(&mut self.vendor, vendor);
        overwrite(&mut self.homepage, homepage);
        overwrite(&mut self.description, description);
        overwrite(&mut self.installed_size, installed_size);
        overwrite(&mut self.section, section);
        overwrite(&mut self.priority, priority);
        overwrite(&mut self.build_date, build_date);
        replace(&mut self.depends, depends);
        replace(&mut self.suggests, suggests);
        replace(&mut self.declared_licenses, declared_licenses);
        replace(&mut self.licenses, licenses);
        if !hashes.is_empty() {
            self.hashes = hashes;
        }
        self
    }

    /// Returns `true` when neither metadata nor payload produced anything.
    pub fn is_blank(&self) -> bool {
        self.name.is_empty() && self.version.is_empty() && self.hashes.is_empty()
    }
}

fn overwrite(target: &mut String, value: String) {
    if !value.is_empty() {
        *target = value;
    }
}

fn replace<T>(target: &mut Vec<T>, value: Vec<T>) {
    if !value.is_empty() {
        *target = value;
    }
}
