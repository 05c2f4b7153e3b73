//! License text matching.
//!
//! Each license family is described by a handful of distinctive phrases. A
//! family is reported when enough of its phrases occur in the normalized
//! text; the coverage percentage is the share of the text spanned by the
//! phrases of all reported families.

use regex::Regex;
use std::sync::LazyLock;

struct Family {
    id: &'static str,
    /// Minimum number of distinct phrases that must match.
    required: usize,
    /// Suppressed when this (more specific) family also matched.
    superseded_by: Option<&'static str>,
    phrases: Vec<Regex>,
}

macro_rules! family {
    ($id:literal, $required:literal, $superseded:expr, [$($phrase:literal),+ $(,)?]) => {
        Family {
            id: $id,
            required: $required,
            superseded_by: $superseded,
            phrases: vec![$(Regex::new($phrase).expect("valid license phrase")),+],
        }
    };
}

static FAMILIES: LazyLock<Vec<Family>> = LazyLock::new(|| {
    vec![
        family!("MIT", 2, None, [
            r"permission is hereby granted, free of charge, to any person obtaining a copy",
            r"the above copyright notice and this permission notice shall be included in all copies or substantial portions of the software",
            r#"the software is provided "as is", without warranty of any kind"#,
        ]),
        family!("ISC", 1, None, [
            r"permission to use, copy, modify, and(/or)? distribute this software for any purpose with or without fee is hereby granted",
        ]),
        family!("BSD-3-Clause", 4, None, [
            r"redistribution and use in source and binary forms, with or without modification, are permitted provided that the following conditions are met",
            r"redistributions of source code must retain the above copyright notice",
            r"redistributions in binary form must reproduce the above copyright notice",
            r"neither the name of .{1,200}? may be used to endorse or promote products derived from this software",
        ]),
        family!("BSD-2-Clause", 3, Some("BSD-3-Clause"), [
            r"redistribution and use in source and binary forms, with or without modification, are permitted provided that the following conditions are met",
            r"redistributions of source code must retain the above copyright notice",
            r"redistributions in binary form must reproduce the above copyright notice",
        ]),
        family!("Apache-2.0", 1, None, [
            r"apache license,? version 2\.0",
            r"you may not use this file except in compliance with the license",
        ]),
        family!("GPL-2.0", 2, Some("LGPL-2.1"), [
            r"gnu general public license",
            r"version 2(, june 1991| of the license)",
        ]),
        family!("GPL-3.0", 2, Some("LGPL-3.0"), [
            r"gnu general public license",
            r"version 3(, 29 june 2007| of the license)",
        ]),
        family!("LGPL-2.1", 2, None, [
            r"gnu (lesser|library) general public license",
            r"version 2\.1",
        ]),
        family!("LGPL-3.0", 2, None, [
            r"gnu lesser general public license",
            r"version 3(, 29 june 2007| of the license)",
        ]),
        family!("MPL-2.0", 1, None, [
            r"mozilla public license,? (version |v\.? ?)2\.0",
        ]),
        family!("Unlicense", 1, None, [
            r"this is free and unencumbered software released into the public domain",
        ]),
        family!("Zlib", 2, None, [
            r"this software is provided 'as-is', without any express or implied warranty",
            r"altered source versions must be plainly marked as such",
        ]),
    ]
});

static NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s#*]+").expect("valid whitespace pattern"));

/// Outcome of a license scan with at least one matched family.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub names: Vec<String>,
    pub percentage: f64,
}

/// Scans `text` for known license families.
///
/// Returns `None` when no family matched.
pub fn scan(text: &str) -> Option<ScanReport> {
    let normalized = NOISE.replace_all(&text.to_lowercase(), " ").trim().to_string();
    if normalized.is_empty() {
        return None;
    }

    let mut matched: Vec<(&Family, Vec<(usize, usize)>)> = Vec::new();
    for family in FAMILIES.iter() {
        let mut spans = Vec::new();
        let mut hits = 0;
        for phrase in &family.phrases {
            let before = spans.len();
            spans.extend(phrase.find_iter(&normalized).map(|m| (m.start(), m.end())));
            if spans.len() > before {
                hits += 1;
            }
        }
        if hits >= family.required {
            matched.push((family, spans));
        }
    }

    let ids: Vec<&str> = matched.iter().map(|(f, _)| f.id).collect();
    matched.retain(|(family, _)| family.superseded_by.map_or(true, |other| !ids.contains(&other)));
    if matched.is_empty() {
        return None;
    }

    let mut spans: Vec<(usize, usize)> = matched
        .iter()
        .flat_map(|(_, s)| s.iter().copied())
        .collect();
    spans.sort_unstable();
    let mut covered = 0;
    let mut cursor = 0;
    for (start, end) in spans {
        let start = start.max(cursor);
        if end > start {
            covered += end - start;
            cursor = end;
        }
    }

    Some(ScanReport {
        names: matched.iter().map(|(f, _)| f.id.to_string()).collect(),
        percentage: covered as f64 * 100.0 / normalized.len() as f64,
    })
}
