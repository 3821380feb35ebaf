//! Format-aware content hashing.
//!
//! Every file gets a whole-file MD5 (`full_md5`). Recognized formats also
//! get a content MD5 (`md5`) over only the bytes that represent the image
//! or media stream, so that metadata edits leave `md5` unchanged:
//!
//! - JPEG: everything from the start-of-scan marker to end of file
//! - PNG: chunk type + data of every chunk except tEXt/zTXt/iTXt
//! - MP4/MOV: the payload of the first mdat box
//! - HEIC: the primary item's coded extents
//!
//! When a format parser fails (truncated file, unexpected marker) the
//! content hash falls back to the whole-file hash and a warning is logged.

use std::fs::File;
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use md5::{Digest, Md5};

use crate::orph_core::error::{OrphError, Result};
use crate::orph_core::filetype::mime_of;
use crate::orph_core::isobmff;

/// Stamped on every newly computed record. Bumped whenever any format's
/// content algorithm changes.
pub const CURRENT_HASH_VERSION: u32 = 7;

/// Chunk size for bounded byte-range hashing.
const RANGE_CHUNK: usize = 1024;

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// The digests produced for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHashes {
    pub version: u32,
    pub md5: String,
    pub full_md5: String,
}

/// Earliest algorithm version that still produces today's content hash for
/// this MIME type. Records older than this must be recomputed.
fn last_meaningful_version(mime: &str) -> u32 {
    match mime {
        "image/jpeg" => 1,
        "video/mp4v-es" => 2,
        "image/png" => 3,
        "image/heic" => 6,
        "video/quicktime" => 7,
        // Whole-file hashing never changes, so any version is current.
        _ => 0,
    }
}

/// Whether a record computed at `version` is still valid for `path`.
pub fn is_hash_version_current(path: &Path, version: u32) -> bool {
    version >= last_meaningful_version(mime_of(path))
}

/// Feed up to `len` bytes (or until EOF when `None`) from `reader` into the
/// hasher, in small chunks. Returns the byte count fed; a bounded read that
/// hits EOF early is an error.
pub(crate) fn update_md5_from_reader(
    hasher: &mut Md5,
    reader: &mut impl Read,
    len: Option<u64>,
) -> io::Result<u64> {
    let mut buf = [0u8; RANGE_CHUNK];
    let mut total = 0u64;
    loop {
        let want = match len {
            Some(limit) => {
                let remaining = limit - total;
                if remaining == 0 {
                    break;
                }
                remaining.min(RANGE_CHUNK as u64) as usize
            }
            None => RANGE_CHUNK,
        };
        match reader.read(&mut buf[..want]) {
            Ok(0) => {
                if let Some(limit) = len {
                    if total < limit {
                        return Err(io::Error::from(ErrorKind::UnexpectedEof));
                    }
                }
                break;
            }
            Ok(n) => {
                hasher.update(&buf[..n]);
                total += n as u64;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Fill `buf` from the reader. `Ok(false)` means a clean EOF before any
/// byte was read; a partial fill is an `UnexpectedEof` error.
fn read_full_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(io::Error::from(ErrorKind::UnexpectedEof));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

fn format_err(path: &Path, reason: impl Into<String>) -> OrphError {
    OrphError::Format {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// JPEG: skip the marker segments before start-of-scan, then hash from the
/// SOS marker through end of file (scan header + compressed data).
fn jpeg_content_md5(path: &Path, file: &mut File) -> Result<String> {
    let mut soi = [0u8; 2];
    file.read_exact(&mut soi)
        .map_err(|_| format_err(path, "truncated start-of-image marker"))?;
    if soi != [0xFF, 0xD8] {
        return Err(format_err(path, "missing start-of-image marker"));
    }

    loop {
        let mut header = [0u8; 4];
        file.read_exact(&mut header)
            .map_err(|_| format_err(path, "truncated segment header"))?;
        if header[0] != 0xFF {
            return Err(format_err(
                path,
                format!("bad segment marker {:02x}{:02x}", header[0], header[1]),
            ));
        }
        let marker = header[1];
        let size = u16::from_be_bytes([header[2], header[3]]);
        if size < 2 {
            return Err(format_err(path, format!("bad segment size {size}")));
        }

        if marker == 0xDA {
            file.seek(SeekFrom::Current(-4))
                .map_err(|e| OrphError::io_at(path, e))?;
            let mut hasher = Md5::new();
            update_md5_from_reader(&mut hasher, file, None)
                .map_err(|e| OrphError::io_at(path, e))?;
            return Ok(hex::encode(hasher.finalize()));
        }

        file.seek(SeekFrom::Current(i64::from(size) - 2))
            .map_err(|e| OrphError::io_at(path, e))?;
    }
}

/// PNG: hash chunk type + data of every chunk that is not a text chunk,
/// skipping lengths and CRCs. Chunk order is significant.
fn png_content_md5(path: &Path, file: &mut File) -> Result<String> {
    let mut signature = [0u8; 8];
    file.read_exact(&mut signature)
        .map_err(|_| format_err(path, "truncated signature"))?;
    if signature != PNG_SIGNATURE {
        return Err(format_err(path, "missing png signature"));
    }

    let mut hasher = Md5::new();
    loop {
        let mut header = [0u8; 8];
        match read_full_or_eof(file, &mut header) {
            Ok(false) => break,
            Ok(true) => {}
            Err(_) => return Err(format_err(path, "truncated chunk header")),
        }
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let kind = [header[4], header[5], header[6], header[7]];

        if matches!(&kind, b"tEXt" | b"zTXt" | b"iTXt") {
            file.seek(SeekFrom::Current(i64::from(length) + 4))
                .map_err(|e| OrphError::io_at(path, e))?;
            continue;
        }

        hasher.update(kind);
        update_md5_from_reader(&mut hasher, file, Some(u64::from(length)))
            .map_err(|_| format_err(path, "truncated chunk data"))?;
        file.seek(SeekFrom::Current(4))
            .map_err(|e| OrphError::io_at(path, e))?;
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the content and whole-file digests for `path`.
///
/// Files whose MIME type has no content algorithm (including TIFF) get
/// `md5 == full_md5`. A failed format parse falls back the same way.
pub fn calculate_hash(path: &Path) -> Result<ContentHashes> {
    let mime = mime_of(path);
    let mut file = File::open(path).map_err(|e| OrphError::io_at(path, e))?;

    let mut hasher = Md5::new();
    io::copy(&mut file, &mut hasher).map_err(|e| OrphError::io_at(path, e))?;
    let full_md5 = hex::encode(hasher.finalize());

    let has_content_alg = matches!(
        mime,
        "image/jpeg" | "image/png" | "video/mp4v-es" | "video/quicktime" | "image/heic"
    );

    let content_md5 = if has_content_alg {
        file.seek(SeekFrom::Start(0))
            .map_err(|e| OrphError::io_at(path, e))?;
        let parsed = match mime {
            "image/jpeg" => jpeg_content_md5(path, &mut file),
            "image/png" => png_content_md5(path, &mut file),
            "video/mp4v-es" | "video/quicktime" => isobmff::mdat_content_md5(path, &mut file),
            _ => isobmff::primary_item_content_md5(path, &mut file),
        };
        match parsed {
            Ok(digest) => Some(digest),
            Err(OrphError::Format { path, reason }) => {
                log::warn!(
                    "Content hash unavailable for {} ({reason}); using whole-file hash",
                    path.display()
                );
                None
            }
            Err(other) => return Err(other),
        }
    } else {
        None
    };

    Ok(ContentHashes {
        version: CURRENT_HASH_VERSION,
        md5: content_md5.unwrap_or_else(|| full_md5.clone()),
        full_md5,
    })
}
