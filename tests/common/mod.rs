//! Shared fixtures: minimal valid media byte streams, so the tests need no
//! binary files checked in.

#![allow(dead_code)]

/// A JPEG with one APP1 segment and a tiny scan. Changing `app1_payload`
/// models a metadata edit; changing `scan` models a pixel edit.
pub fn jpeg_bytes(app1_payload: &[u8], scan: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, 0xD8];
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&((app1_payload.len() as u16 + 2).to_be_bytes()));
    out.extend_from_slice(app1_payload);
    out.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x04, 0x01, 0x02]);
    out.extend_from_slice(scan);
    out
}

fn png_chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    out.extend_from_slice(&[0, 0, 0, 0]);
    out
}

/// A PNG with an IHDR/IDAT/IEND skeleton and an optional tEXt chunk.
pub fn png_bytes(text_chunk: Option<&[u8]>, idat: &[u8]) -> Vec<u8> {
    let mut out = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
    out.extend_from_slice(&png_chunk(b"IHDR", &[0u8; 13]));
    if let Some(text) = text_chunk {
        out.extend_from_slice(&png_chunk(b"tEXt", text));
    }
    out.extend_from_slice(&png_chunk(b"IDAT", idat));
    out.extend_from_slice(&png_chunk(b"IEND", &[]));
    out
}

fn isobmff_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&((payload.len() as u32 + 8).to_be_bytes()));
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

/// An ISOBMFF video container: ftyp + free + mdat.
pub fn mp4_bytes(brand: &[u8; 4], free_payload: &[u8], mdat: &[u8]) -> Vec<u8> {
    let mut ftyp = brand.to_vec();
    ftyp.extend_from_slice(&[0, 0, 0, 0]);
    let mut out = isobmff_box(b"ftyp", &ftyp);
    out.extend_from_slice(&isobmff_box(b"free", free_payload));
    out.extend_from_slice(&isobmff_box(b"mdat", mdat));
    out
}
