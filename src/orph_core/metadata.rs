//! Metadata collaborator: a thin wrapper over exiftool.
//!
//! The core only consumes tag -> value mappings; everything else (date
//! ladder, diffing, keyword/rating merges) is built on that. When the
//! exiftool binary is unavailable the reader degrades: dates come back
//! unknown and the metadata verbs report an error instead of running.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use exiftool::ExifTool;
use regex::Regex;
use serde_json::Value;
use time::{Date, PrimitiveDateTime, Time};

use crate::orph_core::error::{OrphError, Result};

/// Tags consulted for a capture date, most specific first.
const DATE_TAGS: &[&str] = &[
    "ExifIFD:DateTimeOriginal",
    "Keys:CreationDate",
    "QuickTime:CreateDate",
];

/// Exif "2018:09:02 15:31:22", ISO-8601 "2018-09-02T15:31:22+02:00", and
/// friends all carry the same six leading fields; the offset is dropped.
static DATE_FIELDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})\D(\d{2})\D(\d{2})\D(\d{2})\D(\d{2})\D(\d{2})").expect("static pattern")
});

pub fn parse_datetime(value: &str) -> Option<PrimitiveDateTime> {
    let caps = DATE_FIELDS.captures(value.trim())?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<i32>().ok());
    let date = Date::from_calendar_date(
        field(1)?,
        time::Month::try_from(field(2)? as u8).ok()?,
        field(3)? as u8,
    )
    .ok()?;
    let time = Time::from_hms(field(4)? as u8, field(5)? as u8, field(6)? as u8).ok()?;
    Some(PrimitiveDateTime::new(date, time))
}

pub struct MetadataReader {
    tool: Option<ExifTool>,
    unavailable: bool,
}

impl MetadataReader {
    pub fn new() -> Self {
        MetadataReader {
            tool: None,
            unavailable: false,
        }
    }

    fn tool(&mut self) -> Option<&mut ExifTool> {
        if self.tool.is_none() && !self.unavailable {
            match ExifTool::new() {
                Ok(tool) => self.tool = Some(tool),
                Err(e) => {
                    log::warn!("ExifTool unavailable: {e}");
                    self.unavailable = true;
                }
            }
        }
        self.tool.as_mut()
    }

    /// All tags of a file as a group-qualified map ("ExifIFD:DateTimeOriginal").
    pub fn tag_map(&mut self, path: &Path) -> Result<serde_json::Map<String, Value>> {
        let tool = self.tool().ok_or_else(|| OrphError::Metadata {
            path: path.to_path_buf(),
            reason: "exiftool is not available".to_string(),
        })?;
        let value: Value =
            tool.read_metadata(path, &["-G1"]).map_err(|e| OrphError::Metadata {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(OrphError::Metadata {
                path: path.to_path_buf(),
                reason: format!("unexpected exiftool output: {other}"),
            }),
        }
    }

    /// Capture date: first available of the date tag ladder, timezone
    /// dropped. `None` when no tag parses or exiftool is missing.
    pub fn date_taken(&mut self, path: &Path) -> Option<PrimitiveDateTime> {
        let tool = self.tool()?;
        let value: Value = match tool.read_metadata(
            path,
            &["-G1", "-DateTimeOriginal", "-CreationDate", "-CreateDate"],
        ) {
            Ok(v) => v,
            Err(e) => {
                log::debug!("No metadata for {}: {e}", path.display());
                return None;
            }
        };
        for tag in DATE_TAGS {
            if let Some(raw) = value.get(*tag).and_then(Value::as_str) {
                if let Some(parsed) = parse_datetime(raw) {
                    return Some(parsed);
                }
                log::debug!("Unparseable {tag} '{raw}' for {}", path.display());
            }
        }
        None
    }
}

impl Default for MetadataReader {
    fn default() -> Self {
        Self::new()
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Tags that differ across `paths`, as (tag, per-path value) rows. Tags in
/// the volatile `File:` group and the source path are not compared.
pub fn diff_tags(
    reader: &mut MetadataReader,
    paths: &[PathBuf],
) -> Result<Vec<(String, Vec<Option<String>>)>> {
    let mut maps = Vec::new();
    for path in paths {
        maps.push(reader.tag_map(path)?);
    }

    let mut tags: Vec<String> = maps
        .iter()
        .flat_map(|m| m.keys().cloned())
        .filter(|t| t != "SourceFile" && !t.starts_with("File:") && !t.starts_with("System:"))
        .collect();
    tags.sort();
    tags.dedup();

    let mut rows = Vec::new();
    for tag in tags {
        let values: Vec<Option<String>> = maps
            .iter()
            .map(|m| m.get(&tag).map(display_value))
            .collect();
        let mut distinct = values.clone();
        distinct.sort();
        distinct.dedup();
        if distinct.len() > 1 {
            rows.push((tag, values));
        }
    }
    Ok(rows)
}

fn keywords_of(map: &serde_json::Map<String, Value>) -> Vec<String> {
    for tag in ["XMP:Subject", "XMP-dc:Subject", "IPTC:Keywords"] {
        match map.get(tag) {
            Some(Value::Array(items)) => {
                return items.iter().map(display_value).collect();
            }
            Some(Value::String(s)) => return vec![s.clone()],
            _ => {}
        }
    }
    Vec::new()
}

fn rating_of(map: &serde_json::Map<String, Value>) -> Option<i64> {
    map.get("XMP:Rating")
        .or_else(|| map.get("XMP-xmp:Rating"))
        .and_then(Value::as_i64)
}

/// Merge keyword and rating metadata of `sources` into `target`.
///
/// Keywords are unioned; the rating is only filled in when the target has
/// none. The write goes through the exiftool binary, which keeps a
/// `_original` backup of the target beside it.
pub fn append_metadata(
    reader: &mut MetadataReader,
    target: &Path,
    sources: &[PathBuf],
) -> Result<()> {
    let target_map = reader.tag_map(target)?;
    let existing = keywords_of(&target_map);
    let target_rating = rating_of(&target_map);

    let mut new_keywords: Vec<String> = Vec::new();
    let mut new_rating: Option<i64> = None;
    for source in sources {
        let map = reader.tag_map(source)?;
        for keyword in keywords_of(&map) {
            if !existing.contains(&keyword) && !new_keywords.contains(&keyword) {
                new_keywords.push(keyword);
            }
        }
        if target_rating.is_none() && new_rating.is_none() {
            new_rating = rating_of(&map);
        }
    }

    if new_keywords.is_empty() && new_rating.is_none() {
        log::info!("Nothing to append into {}", target.display());
        return Ok(());
    }

    let mut cmd = Command::new("exiftool");
    for keyword in &new_keywords {
        cmd.arg(format!("-XMP:Subject+={keyword}"));
    }
    if let Some(rating) = new_rating {
        cmd.arg(format!("-XMP:Rating={rating}"));
    }
    cmd.arg(target);

    let output = cmd.output().map_err(|e| OrphError::Metadata {
        path: target.to_path_buf(),
        reason: format!("failed to run exiftool: {e}"),
    })?;
    if !output.status.success() {
        return Err(OrphError::Metadata {
            path: target.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    log::info!(
        "Appended {} keyword(s){} into {}",
        new_keywords.len(),
        if new_rating.is_some() { " and a rating" } else { "" },
        target.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datetime_formats() {
        let exif = parse_datetime("2018:09:02 15:31:22").expect("exif format");
        assert_eq!(exif.year(), 2018);
        assert_eq!(exif.month() as u8, 9);
        assert_eq!(exif.second(), 22);

        let iso = parse_datetime("2018-09-02T15:31:22+02:00").expect("iso format");
        assert_eq!(iso, exif, "timezone must be dropped");

        let subsec = parse_datetime("2018:09:02 15:31:22.123").expect("subseconds");
        assert_eq!(subsec, exif);

        assert!(parse_datetime("0000:00:00 00:00:00").is_none());
        assert!(parse_datetime("not a date").is_none());
    }

    #[test]
    fn test_keywords_of_shapes() {
        let map: serde_json::Map<String, Value> =
            serde_json::from_str(r#"{"XMP:Subject": ["alps", "ski"]}"#).expect("json");
        assert_eq!(keywords_of(&map), vec!["alps", "ski"]);

        let map: serde_json::Map<String, Value> =
            serde_json::from_str(r#"{"XMP:Subject": "single"}"#).expect("json");
        assert_eq!(keywords_of(&map), vec!["single"]);

        let map: serde_json::Map<String, Value> = serde_json::from_str("{}").expect("json");
        assert!(keywords_of(&map).is_empty());
    }
}
