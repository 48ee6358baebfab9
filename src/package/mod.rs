// src/package/mod.rs

//! Package container reading and writing
//!
//! Layout: an 8-byte magic, a little-endian u32 header length, the
//! CBOR-encoded header, then a tar payload running to the end of the
//! file. When the header carries a payload digest the payload bytes are
//! verified against it on read; after a successful read the file is
//! positioned at the first payload byte so it can be handed straight to
//! the payload driver.

use crate::error::{Error, Result};
use crate::header::{Header, Tag};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

/// Container magic: name, format version, reserved bytes
const MAGIC: [u8; 8] = *b"stgh\x00\x01\x00\x00";

/// Upper bound on an encoded header, against corrupt length words
const MAX_HEADER_LEN: usize = 64 << 20;

/// Signature disposition of a read package
///
/// Signature verification itself is out of scope: a package carrying a
/// `Signature` tag reads as `NotTrusted` (no trust root is configured),
/// one naming a key we do not hold reads as `NoKey`. Both are data, not
/// errors; callers decide whether to accept them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Ok,
    NotTrusted,
    NoKey,
    Fail,
}

/// Read a package, leaving `file` positioned at the payload
pub fn read(file: &mut File) -> Result<(Header, ReadStatus)> {
    file.seek(SeekFrom::Start(0))?;

    let mut magic = [0u8; 8];
    file.read_exact(&mut magic)
        .map_err(|_| Error::Package("short read on container magic".into()))?;
    if magic != MAGIC {
        return Err(Error::Package("not a package container".into()));
    }

    let mut len_bytes = [0u8; 4];
    file.read_exact(&mut len_bytes)?;
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    if header_len > MAX_HEADER_LEN {
        return Err(Error::Package(format!(
            "container header of {} bytes exceeds the {} byte limit",
            header_len, MAX_HEADER_LEN
        )));
    }

    let mut header_bytes = vec![0u8; header_len];
    file.read_exact(&mut header_bytes)
        .map_err(|_| Error::Package("truncated container header".into()))?;
    let header: Header = ciborium::de::from_reader(header_bytes.as_slice())
        .map_err(|e| Error::Package(format!("undecodable container header: {}", e)))?;

    let payload_start = file.stream_position()?;

    if let Some(expected) = header.get_str(Tag::PayloadDigest) {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let actual = hex_digest(&hasher.finalize());
        if actual != expected {
            return Err(Error::Package(format!(
                "payload digest mismatch for {}: expected {}, got {}",
                header.nevr(),
                expected,
                actual
            )));
        }
        file.seek(SeekFrom::Start(payload_start))?;
    }

    let status = match header.get_str(Tag::Signature) {
        None => ReadStatus::Ok,
        Some("") => ReadStatus::NoKey,
        Some(_) => ReadStatus::NotTrusted,
    };

    debug!("read {} ({:?})", header.nevr(), status);
    Ok((header, status))
}

/// Write a package container to `path`
///
/// `payload` lists (path, content) pairs; paths are stored relative in
/// the tar archive. The header is stamped with the file list, the
/// payload digest, and the archive size before being encoded.
pub fn write(path: &Path, header: &Header, payload: &[(&str, &[u8])]) -> Result<()> {
    let mut archive = tar::Builder::new(Vec::new());
    for (file_path, content) in payload {
        let mut tar_header = tar::Header::new_gnu();
        tar_header.set_size(content.len() as u64);
        tar_header.set_mode(0o644);
        tar_header.set_cksum();
        archive
            .append_data(
                &mut tar_header,
                file_path.trim_start_matches('/'),
                *content,
            )
            .map_err(|e| Error::Package(format!("building payload: {}", e)))?;
    }
    let payload_bytes = archive
        .into_inner()
        .map_err(|e| Error::Package(format!("finalizing payload: {}", e)))?;

    let mut stamped = header.clone();
    stamped.put_str_vec(
        Tag::FilePaths,
        payload
            .iter()
            .map(|(p, _)| ensure_absolute(p))
            .collect(),
    );
    stamped.put_str(Tag::PayloadDigest, hex_digest(&Sha256::digest(&payload_bytes)));
    stamped.put_u64(Tag::LongArchiveSize, payload_bytes.len() as u64);

    let mut header_bytes = Vec::new();
    ciborium::ser::into_writer(&stamped, &mut header_bytes)
        .map_err(|e| Error::Package(format!("encoding header: {}", e)))?;

    let mut file = File::create(path)?;
    file.write_all(&MAGIC)?;
    file.write_all(&(header_bytes.len() as u32).to_le_bytes())?;
    file.write_all(&header_bytes)?;
    file.write_all(&payload_bytes)?;
    file.sync_all()?;
    Ok(())
}

fn ensure_absolute(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
