//! Line-oriented descriptor parsing for deb `control` and apk `.PKGINFO`.

use std::io::{self, BufRead, BufReader, Read};

use crate::model::PackageRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    /// `Key: value`, continuation lines start with whitespace.
    Deb,
    /// `key = value`, `#` comments.
    Apk,
}

impl Syntax {
    fn split(self, line: &str) -> Option<(&str, &str)> {
        let (key, value) = match self {
            Syntax::Deb if line.starts_with(char::is_whitespace) => return None,
            Syntax::Deb => line.split_once(':')?,
            Syntax::Apk => line.split_once('=')?,
        };
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return None;
        }
        Some((key, value.trim()))
    }

    fn description_key(self) -> &'static str {
        match self {
            Syntax::Deb => "Description",
            Syntax::Apk => "pkgdesc",
        }
    }
}

/// Parses a Debian `control` file into `record`.
pub fn parse_control(reader: &mut dyn Read, record: &mut PackageRecord) -> io::Result<()> {
    scan(reader, Syntax::Deb, record, |key, value, record| match key {
        "Package" => record.name = value.to_string(),
        "Source" => record.source = value.to_string(),
        "Version" => record.version = value.to_string(),
        "Architecture" => record.architecture = value.to_string(),
        "Maintainer" => record.maintainer = value.to_string(),
        "Original-Maintainer" => record.original_maintainer = value.to_string(),
        "Installed-Size" => record.installed_size = value.to_string(),
        "Depends" => record.depends.extend(split_list(value)),
        "Suggests" => record.suggests.extend(split_list(value)),
        "Section" => record.section = value.to_string(),
        "Priority" => record.priority = value.to_string(),
        "Homepage" => record.homepage = value.to_string(),
        "Description" => record.description = value.to_string(),
        _ => {}
    })
}

/// Parses an Alpine `.PKGINFO` file into `record`.
pub fn parse_pkginfo(reader: &mut dyn Read, record: &mut PackageRecord) -> io::Result<()> {
    scan(reader, Syntax::Apk, record, |key, value, record| match key {
        "pkgname" => record.name = value.to_string(),
        "pkgver" => record.version = value.to_string(),
        "pkgdesc" => record.description = value.to_string(),
        "url" => record.homepage = value.to_string(),
        "packager" => record.packager = value.to_string(),
        "arch" => record.architecture = value.to_string(),
        "maintainer" => record.maintainer = value.to_string(),
        "license" => record.declared_licenses.push(value.to_string()),
        "depend" => record.depends.extend(split_list(value)),
        "builddate" => record.build_date = value.to_string(),
        "size" => record.installed_size = value.to_string(),
        "origin" => record.source = value.to_string(),
        _ => {}
    })
}

/// Comma-separated list, trimmed, order and duplicates kept.
fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
}

fn scan<F>(
    reader: &mut dyn Read,
    syntax: Syntax,
    record: &mut PackageRecord,
    mut assign: F,
) -> io::Result<()>
where
    F: FnMut(&str, &str, &mut PackageRecord),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut in_description = false;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(|c| c == '\n' || c == '\r');

        if syntax == Syntax::Apk && line.trim_start().starts_with('#') {
            continue;
        }

        match syntax.split(line) {
            Some((key, value)) => {
                in_description = key == syntax.description_key();
                assign(key, value, record);
            }
            None if in_description => append_description(record, line.trim()),
            None => {}
        }
    }
}

fn append_description(record: &mut PackageRecord, extra: &str) {
    // A lone "." is the deb paragraph separator.
    if extra.is_empty() || extra == "." {
        return;
    }
    if !record.description.is_empty() {
        record.description.push(' ');
    }
    record.description.push_str(extra);
}
