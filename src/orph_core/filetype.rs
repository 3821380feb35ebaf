use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Properties of one recognized media extension.
#[derive(Debug, Clone, Copy)]
pub struct FileTypeInfo {
    pub mime: &'static str,
    /// Extensions of companion files that travel with a primary of this type.
    pub sidecars: &'static [&'static str],
    /// Tie-breaker when sorting related files; primaries sort before their
    /// sidecars, so a sidecar's order is strictly greater than its primary's.
    pub ext_order: i32,
}

/// Extension registry, keyed by uppercased extension.
///
/// Sidecar relations form a DAG: RAW -> JPG -> {AAE, MOV, MP4},
/// HEIC -> {MOV, XMP}.
const FILE_TYPES: &[(&str, FileTypeInfo)] = &[
    ("AAE", FileTypeInfo { mime: "application/xml", sidecars: &[], ext_order: 5 }),
    ("AVI", FileTypeInfo { mime: "video/x-msvideo", sidecars: &[], ext_order: 0 }),
    ("CR2", FileTypeInfo { mime: "image/x-canon-cr2", sidecars: &["JPG", "XMP"], ext_order: 1 }),
    ("CR3", FileTypeInfo { mime: "image/x-canon-cr3", sidecars: &["JPG", "XMP"], ext_order: 1 }),
    ("CRW", FileTypeInfo { mime: "image/x-canon-crw", sidecars: &["JPG", "XMP"], ext_order: 1 }),
    ("DNG", FileTypeInfo { mime: "image/x-adobe-dng", sidecars: &["JPG", "XMP"], ext_order: 1 }),
    ("HEIC", FileTypeInfo { mime: "image/heic", sidecars: &["MOV", "XMP"], ext_order: 2 }),
    ("JPEG", FileTypeInfo { mime: "image/jpeg", sidecars: &[], ext_order: 3 }),
    ("JPG", FileTypeInfo { mime: "image/jpeg", sidecars: &["AAE", "MOV", "MP4"], ext_order: 3 }),
    ("M2TS", FileTypeInfo { mime: "video/mp2t", sidecars: &[], ext_order: 0 }),
    ("M4V", FileTypeInfo { mime: "video/mp4v-es", sidecars: &[], ext_order: 4 }),
    ("MOV", FileTypeInfo { mime: "video/quicktime", sidecars: &[], ext_order: 4 }),
    ("MP4", FileTypeInfo { mime: "video/mp4v-es", sidecars: &[], ext_order: 4 }),
    ("MPG", FileTypeInfo { mime: "video/mpeg", sidecars: &[], ext_order: 0 }),
    ("MTS", FileTypeInfo { mime: "video/mp2t", sidecars: &[], ext_order: 0 }),
    ("NEF", FileTypeInfo { mime: "image/x-nikon-nef", sidecars: &["JPG", "XMP"], ext_order: 1 }),
    ("PNG", FileTypeInfo { mime: "image/png", sidecars: &[], ext_order: 3 }),
    ("PSB", FileTypeInfo { mime: "image/vnd.adobe.photoshop", sidecars: &[], ext_order: 0 }),
    ("PSD", FileTypeInfo { mime: "image/vnd.adobe.photoshop", sidecars: &[], ext_order: 0 }),
    ("RAF", FileTypeInfo { mime: "image/x-fuji-raf", sidecars: &["JPG", "XMP"], ext_order: 1 }),
    ("TIF", FileTypeInfo { mime: "image/tiff", sidecars: &["XMP"], ext_order: 1 }),
    ("TIFF", FileTypeInfo { mime: "image/tiff", sidecars: &["XMP"], ext_order: 1 }),
    ("XMP", FileTypeInfo { mime: "application/rdf+xml", sidecars: &[], ext_order: 6 }),
];

/// Suffixes appended by editors and exiftool when they back a file up:
/// `IMG_1234.jpg_original`, `IMG_1234.jpg_bak`, `IMG_1234.jpg.bak`,
/// `IMG_1234.jpg~2024-05-01`.
static BACKUP_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(_original|_bak|\.bak|~[\d.-]+)$").expect("static pattern"));

fn lookup(ext: &str) -> Option<&'static FileTypeInfo> {
    let upper = ext.to_ascii_uppercase();
    FILE_TYPES
        .iter()
        .find(|(e, _)| *e == upper)
        .map(|(_, info)| info)
}

fn file_name_of(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

/// The file name with any recognized backup suffix removed.
pub fn strip_backup_suffix(name: &str) -> &str {
    match BACKUP_SUFFIX.find(name) {
        Some(m) => &name[..m.start()],
        None => name,
    }
}

/// Whether the file name carries a backup suffix.
pub fn is_backup(path: &Path) -> bool {
    BACKUP_SUFFIX.is_match(file_name_of(path))
}

fn effective_ext(path: &Path) -> Option<String> {
    let trimmed = strip_backup_suffix(file_name_of(path));
    Path::new(trimmed)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_uppercase())
}

/// MIME type for a path, looking through backup suffixes. Returns the empty
/// string for unrecognized extensions; callers treat that as "no content
/// hasher for this file".
pub fn mime_of(path: &Path) -> &'static str {
    effective_ext(path)
        .as_deref()
        .and_then(lookup)
        .map(|info| info.mime)
        .unwrap_or("")
}

/// Sort weight of a path's extension; unrecognized extensions weigh 0.
pub fn ext_order_of(path: &Path) -> i32 {
    effective_ext(path)
        .as_deref()
        .and_then(lookup)
        .map(|info| info.ext_order)
        .unwrap_or(0)
}

/// Sidecar paths of `path` that currently exist on disk. Backups have no
/// sidecars by definition.
pub fn sidecars_of(path: &Path) -> Vec<PathBuf> {
    if is_backup(path) {
        return Vec::new();
    }
    let Some(info) = effective_ext(path).as_deref().and_then(lookup) else {
        return Vec::new();
    };
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return Vec::new();
    };
    let parent = path.parent().unwrap_or(Path::new(""));

    let mut found = Vec::new();
    for ext in info.sidecars {
        for candidate_ext in [ext.to_string(), ext.to_ascii_lowercase()] {
            let candidate = parent.join(format!("{stem}.{candidate_ext}"));
            if candidate.is_file() && !found.contains(&candidate) {
                found.push(candidate);
            }
        }
    }
    found
}

fn lower_components(path: &Path) -> Vec<String> {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().to_lowercase())
        .collect()
}

/// Stable archive ordering: parent directories compared component-wise
/// (ancestors first), then file stem, then extension sort weight, then the
/// extension string itself.
pub fn compare_paths(a: &Path, b: &Path) -> Ordering {
    let dir_a = a.parent().map(lower_components).unwrap_or_default();
    let dir_b = b.parent().map(lower_components).unwrap_or_default();
    match dir_a.cmp(&dir_b) {
        Ordering::Equal => {}
        other => return other,
    }

    let stem_a = a
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let stem_b = b
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match stem_a.cmp(&stem_b) {
        Ordering::Equal => {}
        other => return other,
    }

    match ext_order_of(a).cmp(&ext_order_of(b)) {
        Ordering::Equal => {}
        other => return other,
    }

    let ext_a = a
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let ext_b = b
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    ext_a.cmp(&ext_b)
}
