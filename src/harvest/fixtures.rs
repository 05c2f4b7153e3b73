//! In-memory package fixtures for unit tests.

use std::io::{self, Write};

pub const MIT_LICENSE: &str = "MIT License\n\nCopyright (c) 2020 Someone\n\n\
    Permission is hereby granted, free of charge, to any person obtaining a copy\n\
    of this software and associated documentation files (the \"Software\"), to deal\n\
    in the Software without restriction.\n\n\
    The above copyright notice and this permission notice shall be included in all\n\
    copies or substantial portions of the Software.\n\n\
    THE SOFTWARE IS PROVIDED \"AS IS\", WITHOUT WARRANTY OF ANY KIND.\n";

/// A minimal 64-bit little-endian ELF header followed by `body`.
pub fn elf(body: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; 64];
    bytes[..8].copy_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    bytes[16] = 2;
    bytes[18] = 0x3e;
    bytes[20] = 1;
    bytes.extend_from_slice(body);
    bytes
}

fn tar_builder(dir: Option<&str>, entries: &[(&str, &[u8])]) -> tar::Builder<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    if let Some(dir) = dir {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        builder.append_data(&mut header, dir, io::empty()).unwrap();
    }
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o755);
        header.set_size(data.len() as u64);
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder
}

pub fn tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
    tar_builder(None, entries).into_inner().unwrap()
}

pub fn tar_with_dir(dir: &str, entries: &[(&str, &[u8])]) -> Vec<u8> {
    tar_builder(Some(dir), entries).into_inner().unwrap()
}

pub fn ar(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut builder = ar::Builder::new(&mut out);
        for (name, data) in entries {
            let header = ar::Header::new(name.as_bytes().to_vec(), data.len() as u64);
            builder.append(&header, *data).unwrap();
        }
    }
    out
}

pub fn cpio(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let entries: Vec<(&str, u32, &[u8])> =
        entries.iter().map(|(n, d)| (*n, 0o100755, *d)).collect();
    cpio_entries(&entries)
}

pub fn cpio_entries(entries: &[(&str, u32, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (ino, (name, mode, data)) in entries.iter().enumerate() {
        write_newc(&mut out, ino + 1, name, *mode, data);
    }
    write_newc(&mut out, 0, "TRAILER!!!", 0, b"");
    out
}

fn write_newc(out: &mut Vec<u8>, ino: usize, name: &str, mode: u32, data: &[u8]) {
    let fields = [ino, mode as usize, 0, 0, 1, 0, data.len(), 0, 0, 0, 0, name.len() + 1, 0];
    out.extend_from_slice(b"070701");
    for field in fields {
        out.extend_from_slice(format!("{field:08x}").as_bytes());
    }
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    align4(out);
    out.extend_from_slice(data);
    align4(out);
}

fn align4(out: &mut Vec<u8>) {
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn bzip2(data: &[u8]) -> Vec<u8> {
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn xz(data: &[u8]) -> Vec<u8> {
    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn lzma(data: &[u8]) -> Vec<u8> {
    let options = xz2::stream::LzmaOptions::new_preset(6).unwrap();
    let stream = xz2::stream::Stream::new_lzma_encoder(&options).unwrap();
    let mut encoder = xz2::write::XzEncoder::new_stream(Vec::new(), stream);
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn zstd(data: &[u8]) -> Vec<u8> {
    zstd::stream::encode_all(data, 3).unwrap()
}

/// A `.deb` whose control and data sections are gzip-compressed tars.
pub fn deb(control: &[(&str, &[u8])], data: &[(&str, &[u8])]) -> Vec<u8> {
    let control = gzip(&tar(control));
    let data = gzip(&tar(data));
    ar(&[
        ("debian-binary", b"2.0\n"),
        ("control.tar.gz", &control),
        ("data.tar.gz", &data),
    ])
}

/// An `.apk`: the control tar (end-of-archive blocks stripped) and the data
/// tar as two concatenated gzip members.
pub fn apk(pkginfo: &str, data: &[(&str, &[u8])]) -> Vec<u8> {
    let mut control = tar(&[(".PKGINFO", pkginfo.as_bytes())]);
    control.truncate(control.len() - 1024);
    let mut bytes = gzip(&control);
    bytes.extend(gzip(&tar(data)));
    bytes
}

/// Value stored under an RPM header tag.
pub enum RpmValue {
    Str(&'static str),
    Strings(Vec<&'static str>),
    Int32(u32),
}

fn rpm_header(entries: &[(u32, RpmValue)]) -> Vec<u8> {
    let mut index = Vec::new();
    let mut store = Vec::new();
    for (tag, value) in entries {
        let (kind, count) = match value {
            RpmValue::Int32(_) => {
                align4(&mut store);
                (4u32, 1u32)
            }
            RpmValue::Str(_) => (6, 1),
            RpmValue::Strings(items) => (8, items.len() as u32),
        };
        let offset = store.len() as u32;
        match value {
            RpmValue::Int32(v) => store.extend_from_slice(&v.to_be_bytes()),
            RpmValue::Str(s) => {
                store.extend_from_slice(s.as_bytes());
                store.push(0);
            }
            RpmValue::Strings(items) => {
                for item in items {
                    store.extend_from_slice(item.as_bytes());
                    store.push(0);
                }
            }
        }
        for word in [*tag, kind, offset, count] {
            index.extend_from_slice(&word.to_be_bytes());
        }
    }

    let mut out = vec![0x8e, 0xad, 0xe8, 0x01, 0, 0, 0, 0];
    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    out.extend_from_slice(&(store.len() as u32).to_be_bytes());
    out.extend(index);
    out.extend(store);
    out
}

/// An `.rpm` with the given main header tags and raw payload bytes.
pub fn rpm(tags: &[(u32, RpmValue)], payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 96];
    out[..4].copy_from_slice(&[0xed, 0xab, 0xee, 0xdb]);
    out[4] = 3;
    // Signature header with a 5-byte store, which forces alignment padding.
    out.extend(rpm_header(&[(1000, RpmValue::Int32(42)), (1004, RpmValue::Str("x"))]));
    align8(&mut out);
    out.extend(rpm_header(tags));
    out.extend_from_slice(payload);
    out
}

fn align8(out: &mut Vec<u8>) {
    while out.len() % 8 != 0 {
        out.push(0);
    }
}
