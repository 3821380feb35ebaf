//! Duplicate detection and interactive triage.
//!
//! Groups are formed either from catalog records sharing a content hash or
//! from a camera/timestamp name heuristic, ordered in stable archive order,
//! and reviewed one at a time in an interactive loop that proposes an
//! action for the common cases.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;
use time::PrimitiveDateTime;

use crate::orph_core::context::Context;
use crate::orph_core::error::{OrphError, Result};
use crate::orph_core::filetype;
use crate::orph_core::metadata;
use crate::orph_core::store::{self, HashRecord, ORPHDAT_FILENAME};
use crate::orph_core::trash;
use crate::orph_core::traverse::{self, TreeVisitor};
use crate::orph_core::view::{PromptDriver, human_size};

/// How two entries of a group relate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// At least one side has no record.
    Unknown,
    /// Both hashed, nothing matches.
    NoMatch,
    /// Content hashes match; bytes differ (metadata edit).
    Content,
    /// Whole files are byte-identical.
    Full,
}

impl MatchKind {
    fn marker(self) -> char {
        match self {
            MatchKind::Unknown => '?',
            MatchKind::NoMatch => 'X',
            MatchKind::Content => '~',
            MatchKind::Full => '=',
        }
    }
}

#[derive(Debug)]
pub struct DupeEntry {
    pub path: PathBuf,
    pub exists: bool,
    pub record: Option<HashRecord>,
    pub date_taken: Option<PrimitiveDateTime>,
    pub sidecars: Vec<PathBuf>,
    /// Relation to every entry of the group, self included (self is `Full`).
    pub matches: Vec<MatchKind>,
}

#[derive(Debug)]
pub struct DupeGroup {
    pub entries: Vec<DupeEntry>,
}

/// Suggested handling for a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoAction {
    /// No safe suggestion; the operator decides.
    None,
    /// Keep everything and move on (live-photo videos).
    Continue,
    /// Trash these entry indices.
    Trash(Vec<usize>),
}

static CAMERA_STEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{4}\d{4}").expect("static pattern"));
static TIMESTAMP_STEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}[-_]\d{2}[-_]\d{2}[-_ ]\d{2}[-_]\d{2}[-_]\d{2}").expect("static pattern")
});
static DATE_DIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}|\d{2})[-_]?(\d{2})[-_]?(\d{2})([ _.-]|$)").expect("static pattern")
});
static DUP_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\s\(\d+\)|\s-\s?copy(\s\d+)?|-\d+)$").expect("static pattern")
});

/// The stable part of a file stem: a camera counter (`IMG_1234`) or a
/// timestamp (`2018-09-02 15_31_22`). `None` for free-form names.
fn name_stem(stem: &str) -> Option<&str> {
    CAMERA_STEM
        .find(stem)
        .or_else(|| TIMESTAMP_STEM.find(stem))
        .map(|m| m.as_str())
}

/// `YYYYMMDD` from a directory name like `2018-09-02 Alps` or `180902`.
fn parse_date_dir(name: &str) -> Option<String> {
    let caps = DATE_DIR.captures(name)?;
    let mut year: i32 = caps[1].parse().ok()?;
    if caps[1].len() == 2 {
        year += 2000;
    }
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(format!("{year:04}{month:02}{day:02}"))
}

/// Date key of the first ancestor directory that names a date.
fn date_dir_key(path: &Path) -> Option<String> {
    path.ancestors()
        .skip(1)
        .filter_map(|dir| dir.file_name().and_then(|n| n.to_str()))
        .find_map(parse_date_dir)
}

/// Grouping key for by-name mode: `lower(ext);stem;datedir`.
fn name_key(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem_key = match name_stem(&stem) {
        Some(prefix) => prefix.to_lowercase(),
        None => {
            log::warn!(
                "No camera or timestamp pattern in '{}'; grouping by full name",
                path.display()
            );
            stem.to_lowercase()
        }
    };
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let date = date_dir_key(path).unwrap_or_default();
    format!("{ext};{stem_key};{date}")
}

fn classify(a: Option<&HashRecord>, b: Option<&HashRecord>) -> MatchKind {
    match (a, b) {
        (Some(a), Some(b)) => {
            if a.full_md5 == b.full_md5 {
                MatchKind::Full
            } else if a.md5 == b.md5 {
                MatchKind::Content
            } else {
                MatchKind::NoMatch
            }
        }
        _ => MatchKind::Unknown,
    }
}

struct HashHarvest {
    by_md5: HashMap<String, Vec<PathBuf>>,
}

impl TreeVisitor for HashHarvest {
    fn visit(&mut self, full: &Path, _root: &Path) -> Result<()> {
        if !full.is_dir() {
            return Ok(());
        }
        let store_path = full.join(ORPHDAT_FILENAME);
        if !store_path.exists() {
            return Ok(());
        }
        for (_, record) in store::read_store(&store_path)? {
            self.by_md5
                .entry(record.md5.clone())
                .or_default()
                .push(full.join(&record.filename));
        }
        Ok(())
    }
}

struct NameHarvest {
    by_key: HashMap<String, Vec<PathBuf>>,
}

impl TreeVisitor for NameHarvest {
    fn visit(&mut self, full: &Path, _root: &Path) -> Result<()> {
        if full.is_dir() {
            return Ok(());
        }
        // Only actual media participates; sidecar documents ride along.
        let mime = filetype::mime_of(full);
        if !mime.starts_with("image/") && !mime.starts_with("video/") {
            return Ok(());
        }
        self.by_key
            .entry(name_key(full))
            .or_default()
            .push(full.to_path_buf());
        Ok(())
    }
}

fn into_sorted_groups(map: HashMap<String, Vec<PathBuf>>) -> Vec<Vec<PathBuf>> {
    let mut groups: Vec<Vec<PathBuf>> = map
        .into_values()
        .map(|mut paths| {
            paths.sort_by(|a, b| filetype::compare_paths(a, b));
            paths.dedup();
            paths
        })
        .filter(|paths| paths.len() >= 2)
        .collect();
    groups.sort_by(|a, b| filetype::compare_paths(&a[0], &b[0]));
    groups
}

/// Group every cataloged record under `roots` by content hash.
pub fn group_by_hash(roots: &[PathBuf]) -> Result<Vec<Vec<PathBuf>>> {
    let mut harvest = HashHarvest { by_md5: HashMap::new() };
    traverse::traverse(roots, &mut harvest)?;
    Ok(into_sorted_groups(harvest.by_md5))
}

/// Group media files under `roots` by the name heuristic.
pub fn group_by_name(roots: &[PathBuf]) -> Result<Vec<Vec<PathBuf>>> {
    let mut harvest = NameHarvest { by_key: HashMap::new() };
    traverse::traverse(roots, &mut harvest)?;
    Ok(into_sorted_groups(harvest.by_key))
}

fn populate_group(
    ctx: &mut Context,
    prompt: &mut dyn PromptDriver,
    paths: Vec<PathBuf>,
) -> Result<DupeGroup> {
    let mut entries = Vec::with_capacity(paths.len());
    for path in paths {
        let exists = path.exists();
        let record = if exists {
            store::resolve(ctx, prompt, &path, None, store::ResolveOptions::default())?
        } else {
            store::read_store(&store::store_path_of(&path))?
                .get(&store::key_of(&path)?)
                .cloned()
        };
        let date_taken = if exists { ctx.metadata.date_taken(&path) } else { None };
        let sidecars = if exists { filetype::sidecars_of(&path) } else { Vec::new() };
        entries.push(DupeEntry {
            path,
            exists,
            record,
            date_taken,
            sidecars,
            matches: Vec::new(),
        });
    }
    let mut group = DupeGroup { entries };
    rebuild_matches(&mut group);
    Ok(group)
}

fn rebuild_matches(group: &mut DupeGroup) {
    let records: Vec<Option<HashRecord>> =
        group.entries.iter().map(|e| e.record.clone()).collect();
    for (i, entry) in group.entries.iter_mut().enumerate() {
        entry.matches = records
            .iter()
            .enumerate()
            .map(|(j, other)| {
                if i == j {
                    MatchKind::Full
                } else {
                    classify(records[i].as_ref(), other.as_ref())
                }
            })
            .collect();
    }
}

fn entry_date_key(entry: &DupeEntry) -> Option<String> {
    entry.date_taken.map(|taken| {
        format!(
            "{:04}{:02}{:02}",
            taken.year(),
            taken.month() as u8,
            taken.day()
        )
    })
}

/// The entry sits in a dated directory that disagrees with its capture date.
fn date_mismatch(entry: &DupeEntry) -> bool {
    match (entry_date_key(entry), date_dir_key(&entry.path)) {
        (Some(taken), Some(dir)) => taken != dir,
        _ => false,
    }
}

fn has_dup_suffix(path: &Path) -> bool {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name_stem(&stem) {
        Some(prefix) => prefix.len() < stem.len(),
        None => DUP_SUFFIX.is_match(&stem),
    }
}

/// An iPhone live-photo video: a `.mov` whose same-stem `.heic` or `.jpg`
/// sibling exists at no less than half its size.
fn is_live_photo_video(entry: &DupeEntry) -> bool {
    let is_mov = entry
        .path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("mov"));
    if !is_mov {
        return false;
    }
    let Some(mov_size) = entry.record.as_ref().and_then(|r| r.size) else {
        return false;
    };
    for ext in ["heic", "HEIC", "jpg", "JPG", "jpeg", "JPEG"] {
        let sibling = entry.path.with_extension(ext);
        if let Ok(meta) = std::fs::metadata(&sibling) {
            if meta.len() * 2 >= mov_size {
                return true;
            }
        }
    }
    false
}

/// Suggested action for a group.
///
/// Candidates start from the entries that exist and carry no sidecars. When
/// more than one remains and all are byte-identical, the keeper is narrowed
/// by preferring entries whose dated directory agrees with their capture
/// date, then entries without a duplicate suffix, then the first in archive
/// order; the rest are proposed for trashing. Groups whose keepers are all
/// live-photo videos get a `c` so the videos stay with their photos.
pub fn auto_action(group: &DupeGroup) -> AutoAction {
    let eligible: Vec<usize> = group
        .entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.exists && e.sidecars.is_empty())
        .map(|(i, _)| i)
        .collect();

    let mut keepers = eligible.clone();
    let mut to_trash: Vec<usize> = Vec::new();

    let pairwise_full = eligible.len() > 1
        && eligible.iter().all(|&i| {
            eligible
                .iter()
                .all(|&j| group.entries[i].matches[j] == MatchKind::Full)
        });

    if pairwise_full {
        let (ok, mismatched): (Vec<usize>, Vec<usize>) = keepers
            .iter()
            .partition(|&&i| !date_mismatch(&group.entries[i]));
        if !ok.is_empty() {
            to_trash.extend(mismatched);
            keepers = ok;
        }

        let (plain, suffixed): (Vec<usize>, Vec<usize>) = keepers
            .iter()
            .partition(|&&i| !has_dup_suffix(&group.entries[i].path));
        if !plain.is_empty() {
            to_trash.extend(suffixed);
            keepers = plain;
        }

        if keepers.len() > 1 {
            to_trash.extend(keepers.split_off(1));
        }
    }

    if !keepers.is_empty() && keepers.iter().all(|&i| is_live_photo_video(&group.entries[i])) {
        return AutoAction::Continue;
    }

    if to_trash.is_empty() {
        AutoAction::None
    } else {
        to_trash.sort_unstable();
        AutoAction::Trash(to_trash)
    }
}

fn suggestion_text(action: &AutoAction) -> Option<String> {
    match action {
        AutoAction::None => None,
        AutoAction::Continue => Some("c".to_string()),
        AutoAction::Trash(indices) => Some(
            indices
                .iter()
                .map(|i| format!("t{}", i + 1))
                .collect::<Vec<_>>()
                .join(";"),
        ),
    }
}

fn print_group(group: &DupeGroup, number: usize, total: usize) {
    println!("\nDuplicate group {number} of {total}:");
    for (i, entry) in group.entries.iter().enumerate() {
        let marker = if !entry.exists {
            '!'
        } else if group.entries.len() > 1 {
            let other = if i == 0 { 1 } else { 0 };
            entry.matches[other].marker()
        } else {
            ' '
        };
        let date = entry
            .date_taken
            .map(|d| {
                format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}",
                    d.year(),
                    d.month() as u8,
                    d.day(),
                    d.hour(),
                    d.minute()
                )
            })
            .unwrap_or_else(|| "----------".to_string());
        let size = entry
            .record
            .as_ref()
            .and_then(|r| r.size)
            .map(human_size)
            .unwrap_or_else(|| "?".to_string());
        let mtime = entry
            .record
            .as_ref()
            .and_then(|r| r.mtime)
            .and_then(|secs| time::OffsetDateTime::from_unix_timestamp(secs).ok())
            .map(|t| format!("{:04}-{:02}-{:02}", t.year(), t.month() as u8, t.day()))
            .unwrap_or_else(|| "----------".to_string());
        let sidecar_note = if entry.sidecars.is_empty() {
            String::new()
        } else {
            format!("  (+{} sidecar(s))", entry.sidecars.len())
        };
        println!(
            "  {marker} {:>2}. {}  taken {date}  modified {mtime}  {size}{sidecar_note}",
            i + 1,
            entry.path.display()
        );
    }
}

fn print_help() {
    println!("Commands (separate several with ';'):");
    println!("  ?        this help");
    println!("  c        continue to the next group");
    println!("  d        diff metadata of the group's entries");
    println!("  q        quit");
    println!("  t#       trash entry # (and its sidecars)");
    println!("  o#       open entry # in the system viewer");
    println!("  f#       reveal entry # in its folder");
    println!("  m#,#,..  append metadata of the listed entries into the first listed");
}

fn os_open(args: &[&std::ffi::OsStr]) {
    let program = if cfg!(target_os = "macos") { "open" } else { "xdg-open" };
    if let Err(e) = Command::new(program).args(args).spawn() {
        log::error!("Failed to launch {program}: {e}");
    }
}

fn parse_index(arg: &str, len: usize) -> Option<usize> {
    let number: usize = arg.parse().ok()?;
    if (1..=len).contains(&number) {
        Some(number - 1)
    } else {
        None
    }
}

fn trash_entry(ctx: &mut Context, group: &mut DupeGroup, index: usize) -> Result<()> {
    let entry = &group.entries[index];
    if entry.exists {
        trash::trash_media(ctx, &entry.path, &entry.sidecars)?;
        println!("Trashed {}", entry.path.display());
    } else {
        store::move_record(ctx, &entry.path, None)?;
        println!("Removed record for missing {}", entry.path.display());
    }
    group.entries.remove(index);
    rebuild_matches(group);
    Ok(())
}

fn metadata_diff(ctx: &mut Context, group: &DupeGroup) -> Result<()> {
    let paths: Vec<PathBuf> = group
        .entries
        .iter()
        .filter(|e| e.exists)
        .map(|e| e.path.clone())
        .collect();
    let rows = metadata::diff_tags(&mut ctx.metadata, &paths)?;
    if rows.is_empty() {
        println!("No metadata differences.");
        return Ok(());
    }
    for (tag, values) in rows {
        println!("{tag}:");
        for (path, value) in paths.iter().zip(values) {
            println!(
                "  {}: {}",
                path.display(),
                value.unwrap_or_else(|| "(absent)".to_string())
            );
        }
    }
    Ok(())
}

fn merge_entries_metadata(ctx: &mut Context, group: &DupeGroup, list: &str) -> Result<()> {
    let indices: Vec<usize> = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| parse_index(s, group.entries.len()))
        .collect();
    if indices.len() < 2 {
        println!("m needs at least two entry numbers, e.g. m1,2");
        return Ok(());
    }
    let target = group.entries[indices[0]].path.clone();
    let sources: Vec<PathBuf> = indices[1..]
        .iter()
        .map(|&i| group.entries[i].path.clone())
        .collect();
    metadata::append_metadata(&mut ctx.metadata, &target, &sources)
}

enum GroupOutcome {
    Done,
    Quit,
}

fn review_group(
    ctx: &mut Context,
    prompt: &mut dyn PromptDriver,
    group: &mut DupeGroup,
    number: usize,
    total: usize,
) -> Result<GroupOutcome> {
    loop {
        if group.entries.len() < 2 {
            println!("Group complete.");
            return Ok(GroupOutcome::Done);
        }

        print_group(group, number, total);
        let suggestion = suggestion_text(&auto_action(group));
        if let Some(text) = &suggestion {
            println!("Suggested: {text}");
        }

        let line = prompt.read_command("Command (? for help): ")?;
        let line = if line.is_empty() {
            match &ctx.last_command {
                Some(last) if ctx.repeat_commands => last.clone(),
                _ => continue,
            }
        } else {
            line
        };
        ctx.last_command = Some(line.clone());

        for command in line.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            match command {
                "?" => print_help(),
                "c" => return Ok(GroupOutcome::Done),
                "q" => return Ok(GroupOutcome::Quit),
                "d" => {
                    if let Err(e) = metadata_diff(ctx, group) {
                        println!("Metadata diff failed: {e}");
                    }
                }
                _ => {
                    if let Some(rest) = command.strip_prefix('t') {
                        match parse_index(rest, group.entries.len()) {
                            Some(index) => {
                                match trash_entry(ctx, group, index) {
                                    Ok(()) => {}
                                    Err(e @ OrphError::MissingSidecar { .. }) => {
                                        println!("Not trashed: {e}");
                                    }
                                    Err(e) => return Err(e),
                                }
                                if group.entries.len() < 2 {
                                    break;
                                }
                            }
                            None => println!("No such entry: {command}"),
                        }
                    } else if let Some(rest) = command.strip_prefix('o') {
                        match parse_index(rest, group.entries.len()) {
                            Some(index) => os_open(&[group.entries[index].path.as_os_str()]),
                            None => println!("No such entry: {command}"),
                        }
                    } else if let Some(rest) = command.strip_prefix('f') {
                        match parse_index(rest, group.entries.len()) {
                            Some(index) => {
                                let entry_path = &group.entries[index].path;
                                if cfg!(target_os = "macos") {
                                    os_open(&[std::ffi::OsStr::new("-R"), entry_path.as_os_str()]);
                                } else if let Some(parent) = entry_path.parent() {
                                    os_open(&[parent.as_os_str()]);
                                }
                            }
                            None => println!("No such entry: {command}"),
                        }
                    } else if let Some(rest) = command.strip_prefix('m') {
                        if let Err(e) = merge_entries_metadata(ctx, group, rest) {
                            println!("Metadata merge failed: {e}");
                        }
                    } else {
                        println!("Unrecognized command '{command}' (? for help)");
                    }
                }
            }
        }
    }
}

/// Drive the whole duplicate review: group, populate, review, next.
///
/// A failure inside one group abandons that group with an error message but
/// carries on with the rest; only `q` (or a closed stdin) ends the run.
pub fn find_dupe_files(
    ctx: &mut Context,
    prompt: &mut dyn PromptDriver,
    patterns: &[String],
    by_name: bool,
) -> Result<()> {
    let roots = traverse::expand_roots(patterns)?;
    let groups = if by_name {
        group_by_name(&roots)?
    } else {
        group_by_hash(&roots)?
    };
    if groups.is_empty() {
        println!("No duplicates found.");
        return Ok(());
    }
    println!("Found {} duplicate group(s).", groups.len());

    let total = groups.len();
    for (index, paths) in groups.into_iter().enumerate() {
        let mut group = match populate_group(ctx, prompt, paths) {
            Ok(group) => group,
            Err(OrphError::UserQuit) => return Err(OrphError::UserQuit),
            Err(e) => {
                log::error!("Skipping group {}: {e}", index + 1);
                continue;
            }
        };
        match review_group(ctx, prompt, &mut group, index + 1, total) {
            Ok(GroupOutcome::Done) => {}
            Ok(GroupOutcome::Quit) => return Err(OrphError::UserQuit),
            Err(OrphError::UserQuit) => return Err(OrphError::UserQuit),
            Err(e) => {
                log::error!("Abandoning group {}: {e}", index + 1);
            }
        }
    }
    Ok(())
}
