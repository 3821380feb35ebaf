//! Minimal ISO Base Media File Format (MP4/MOV/HEIC container) reader.
//!
//! Only what the content hasher needs: top-level box iteration, `ftyp` brand
//! checking, locating the first `mdat` payload, and resolving the byte
//! extents of a HEIC file's primary item via `meta`/`pitm`/`iloc`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use md5::{Digest, Md5};

use crate::orph_core::error::{OrphError, Result};
use crate::orph_core::hash::update_md5_from_reader;

/// Brands accepted for plain video containers.
pub const VIDEO_BRANDS: &[&str] = &["mp41", "mp42", "qt  ", "heic", "isom"];
/// Brands accepted for HEIC still images.
pub const HEIC_BRANDS: &[&str] = &["mp41", "mp42", "heic"];

#[derive(Debug, Clone, Copy)]
struct BoxHeader {
    kind: [u8; 4],
    /// Bytes consumed by the size/type fields (8, or 16 with a largesize).
    header_len: u64,
    /// Payload length in bytes; `None` means "extends to end of file".
    payload: Option<u64>,
}

fn format_err(path: &Path, reason: impl Into<String>) -> OrphError {
    OrphError::Format {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn io_err(path: &Path, source: std::io::Error) -> OrphError {
    OrphError::io_at(path, source)
}

/// Read one box header, or `None` at a clean end of file.
fn read_box_header(path: &Path, file: &mut File) -> Result<Option<BoxHeader>> {
    let mut size_buf = [0u8; 4];
    let mut filled = 0;
    while filled < size_buf.len() {
        let n = file.read(&mut size_buf[filled..]).map_err(|e| io_err(path, e))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(format_err(path, "truncated box header"));
        }
        filled += n;
    }

    let mut kind = [0u8; 4];
    file.read_exact(&mut kind)
        .map_err(|_| format_err(path, "truncated box header"))?;

    let size32 = u32::from_be_bytes(size_buf);
    let (header_len, payload) = match size32 {
        0 => (8, None),
        1 => {
            let mut large = [0u8; 8];
            file.read_exact(&mut large)
                .map_err(|_| format_err(path, "truncated largesize"))?;
            let size64 = u64::from_be_bytes(large);
            if size64 < 16 {
                return Err(format_err(path, format!("bad largesize {size64}")));
            }
            (16, Some(size64 - 16))
        }
        2..=7 => return Err(format_err(path, format!("bad box size {size32}"))),
        _ => (8, Some(u64::from(size32) - 8)),
    };

    Ok(Some(BoxHeader {
        kind,
        header_len,
        payload,
    }))
}

fn skip_payload(path: &Path, file: &mut File, payload: Option<u64>) -> Result<()> {
    match payload {
        Some(len) => {
            let offset = i64::try_from(len)
                .map_err(|_| format_err(path, format!("implausible box size {len}")))?;
            file.seek(SeekFrom::Current(offset))
                .map_err(|e| io_err(path, e))?;
        }
        None => {
            file.seek(SeekFrom::End(0)).map_err(|e| io_err(path, e))?;
        }
    }
    Ok(())
}

/// Verify the leading `ftyp` box declares one of `accepted` as its brand.
///
/// A major brand of `isom` with exactly one non-isom compatible brand is
/// promoted to that compatible brand before the check.
fn check_ftyp(path: &Path, file: &mut File, accepted: &[&str]) -> Result<()> {
    let header = read_box_header(path, file)?
        .ok_or_else(|| format_err(path, "empty file"))?;
    if &header.kind != b"ftyp" {
        return Err(format_err(path, "missing ftyp box"));
    }
    let payload = header
        .payload
        .ok_or_else(|| format_err(path, "unbounded ftyp box"))?;
    if payload < 8 || payload % 4 != 0 {
        return Err(format_err(path, format!("bad ftyp length {payload}")));
    }

    let mut buf = vec![0u8; payload as usize];
    file.read_exact(&mut buf)
        .map_err(|_| format_err(path, "truncated ftyp box"))?;

    let major = String::from_utf8_lossy(&buf[0..4]).into_owned();
    let compatible: Vec<String> = buf[8..]
        .chunks_exact(4)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect();

    let mut brand = major;
    if brand == "isom" {
        let non_isom: Vec<&String> = compatible.iter().filter(|b| *b != "isom").collect();
        if non_isom.len() == 1 {
            brand = non_isom[0].clone();
        }
    }

    if accepted.contains(&brand.as_str()) || compatible.iter().any(|b| accepted.contains(&b.as_str())) {
        Ok(())
    } else {
        Err(format_err(path, format!("unexpected brand '{brand}'")))
    }
}

/// MD5 of the payload of the first `mdat` box (the encoded media stream).
pub fn mdat_content_md5(path: &Path, file: &mut File) -> Result<String> {
    check_ftyp(path, file, VIDEO_BRANDS)?;
    loop {
        let Some(header) = read_box_header(path, file)? else {
            return Err(format_err(path, "no mdat box"));
        };
        if &header.kind == b"mdat" {
            let mut hasher = Md5::new();
            update_md5_from_reader(&mut hasher, file, header.payload)
                .map_err(|_| format_err(path, "truncated mdat payload"))?;
            return Ok(hex::encode(hasher.finalize()));
        }
        skip_payload(path, file, header.payload)?;
    }
}

/// One byte range of an item's coded data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Extent {
    offset: u64,
    length: u64,
}

/// Big-endian field reader over an in-memory box payload.
struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        FieldReader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Unsigned integer of `n` bytes (0, 4 or 8 in practice; 0 yields 0).
    fn uint(&mut self, n: usize) -> Option<u64> {
        let bytes = self.take(n)?;
        let mut value = 0u64;
        for b in bytes {
            value = value << 8 | u64::from(*b);
        }
        Some(value)
    }
}

fn parse_pitm(buf: &[u8]) -> Option<u32> {
    let mut r = FieldReader::new(buf);
    let version = r.u8()?;
    r.take(3)?;
    if version == 0 {
        r.u16().map(u32::from)
    } else {
        r.u32()
    }
}

/// Extract the extent list for `item_id` from an `iloc` payload.
fn parse_iloc(buf: &[u8], wanted_id: u32) -> Option<Vec<Extent>> {
    let mut r = FieldReader::new(buf);
    let version = r.u8()?;
    r.take(3)?;

    let sizes = r.u8()?;
    let offset_size = usize::from(sizes >> 4);
    let length_size = usize::from(sizes & 0x0f);
    let sizes2 = r.u8()?;
    let base_offset_size = usize::from(sizes2 >> 4);
    let index_size = if version == 1 || version == 2 {
        usize::from(sizes2 & 0x0f)
    } else {
        0
    };

    let item_count = if version < 2 {
        u32::from(r.u16()?)
    } else {
        r.u32()?
    };

    for _ in 0..item_count {
        let item_id = if version < 2 {
            u32::from(r.u16()?)
        } else {
            r.u32()?
        };
        let construction_method = if version == 1 || version == 2 {
            r.u16()? & 0x0f
        } else {
            0
        };
        let data_reference_index = r.u16()?;
        let base_offset = r.uint(base_offset_size)?;
        let extent_count = r.u16()?;

        let mut extents = Vec::with_capacity(usize::from(extent_count));
        for _ in 0..extent_count {
            if index_size > 0 {
                r.uint(index_size)?;
            }
            let offset = r.uint(offset_size)?;
            let length = r.uint(length_size)?;
            extents.push(Extent {
                offset: base_offset.checked_add(offset)?,
                length,
            });
        }

        if item_id == wanted_id {
            // Coded data must live in this file at absolute offsets.
            if construction_method != 0 || data_reference_index != 0 {
                return None;
            }
            return Some(extents);
        }
    }
    None
}

/// MD5 of the primary item's coded data (the main displayable image of a
/// HEIC file), following the item-location table's extents in order.
pub fn primary_item_content_md5(path: &Path, file: &mut File) -> Result<String> {
    check_ftyp(path, file, HEIC_BRANDS)?;

    let mut primary_id: Option<u32> = None;
    let mut extents: Option<Vec<Extent>> = None;

    // Top-level scan for the meta box, then its pitm/iloc children.
    loop {
        let Some(header) = read_box_header(path, file)? else {
            break;
        };
        if &header.kind != b"meta" {
            skip_payload(path, file, header.payload)?;
            continue;
        }

        let payload = header
            .payload
            .ok_or_else(|| format_err(path, "unbounded meta box"))?;
        if payload < 4 {
            return Err(format_err(path, "meta box too small"));
        }
        // meta is a FullBox: 4 bytes of version/flags precede the children.
        let mut version_flags = [0u8; 4];
        file.read_exact(&mut version_flags)
            .map_err(|_| format_err(path, "truncated meta box"))?;

        let mut remaining = payload - 4;
        let mut pitm_buf: Option<Vec<u8>> = None;
        let mut iloc_buf: Option<Vec<u8>> = None;
        while remaining >= 8 {
            let Some(child) = read_box_header(path, file)? else {
                break;
            };
            let child_payload = child
                .payload
                .ok_or_else(|| format_err(path, "unbounded box inside meta"))?;
            let consumed = child_payload
                .checked_add(child.header_len)
                .filter(|c| *c <= remaining)
                .ok_or_else(|| format_err(path, "meta child overruns parent"))?;

            match &child.kind {
                b"pitm" | b"iloc" => {
                    let mut buf = vec![0u8; child_payload as usize];
                    file.read_exact(&mut buf)
                        .map_err(|_| format_err(path, "truncated meta child"))?;
                    if &child.kind == b"pitm" {
                        pitm_buf = Some(buf);
                    } else {
                        iloc_buf = Some(buf);
                    }
                }
                _ => skip_payload(path, file, Some(child_payload))?,
            }
            remaining -= consumed;
        }

        let id = pitm_buf
            .as_deref()
            .and_then(parse_pitm)
            .ok_or_else(|| format_err(path, "missing or bad pitm box"))?;
        primary_id = Some(id);
        extents = iloc_buf.as_deref().and_then(|b| parse_iloc(b, id));
        break;
    }

    let id = primary_id.ok_or_else(|| format_err(path, "no meta box"))?;
    let extents =
        extents.ok_or_else(|| format_err(path, format!("no location for primary item {id}")))?;
    if extents.is_empty() || extents.iter().any(|e| e.length == 0) {
        return Err(format_err(path, "primary item has empty extents"));
    }

    let mut hasher = Md5::new();
    for extent in &extents {
        file.seek(SeekFrom::Start(extent.offset))
            .map_err(|e| io_err(path, e))?;
        update_md5_from_reader(&mut hasher, file, Some(extent.length))
            .map_err(|_| format_err(path, "primary item extent out of range"))?;
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pitm_versions() {
        // version 0, u16 id
        assert_eq!(parse_pitm(&[0, 0, 0, 0, 0x00, 0x2a]), Some(42));
        // version 1, u32 id
        assert_eq!(parse_pitm(&[1, 0, 0, 0, 0, 0, 0x01, 0x00]), Some(256));
        assert_eq!(parse_pitm(&[0, 0, 0, 0, 0x00]), None);
    }

    #[test]
    fn test_parse_iloc_v0_single_extent() {
        // offset_size=4 length_size=4 base_offset_size=0, one item, one extent
        let buf = [
            0, 0, 0, 0, // version/flags
            0x44, 0x00, // sizes
            0x00, 0x01, // item_count
            0x00, 0x01, // item_id
            0x00, 0x00, // data_reference_index
            0x00, 0x01, // extent_count
            0x00, 0x00, 0x01, 0x00, // extent_offset = 256
            0x00, 0x00, 0x00, 0x80, // extent_length = 128
        ];
        let extents = parse_iloc(&buf, 1).expect("item present");
        assert_eq!(extents, vec![Extent { offset: 256, length: 128 }]);
        assert_eq!(parse_iloc(&buf, 2), None);
    }

    #[test]
    fn test_parse_iloc_base_offset_applies() {
        let buf = [
            0, 0, 0, 0, // version/flags
            0x44, 0x40, // offset/length 4, base_offset 4
            0x00, 0x01, // item_count
            0x00, 0x07, // item_id
            0x00, 0x00, // data_reference_index
            0x00, 0x00, 0x00, 0x10, // base_offset = 16
            0x00, 0x01, // extent_count
            0x00, 0x00, 0x00, 0x20, // extent_offset = 32
            0x00, 0x00, 0x00, 0x08, // extent_length = 8
        ];
        let extents = parse_iloc(&buf, 7).expect("item present");
        assert_eq!(extents, vec![Extent { offset: 48, length: 8 }]);
    }

    #[test]
    fn test_field_reader_uint_widths() {
        let mut r = FieldReader::new(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(r.uint(0), Some(0));
        assert_eq!(r.uint(2), Some(0x0102));
        assert_eq!(r.uint(2), Some(0x0304));
        assert_eq!(r.uint(1), None);
    }
}
