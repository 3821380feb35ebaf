//! Trashing, restoring and moving files without losing their hash records.
//!
//! Removed files go to a hidden `.orphtrash` directory, either next to the
//! file (local trash) or mirrored under a chosen root (`collect-trash`).
//! Every move runs the corresponding record move so catalogs keep
//! describing the directories their files actually live in.

use std::fs;
use std::path::{Path, PathBuf};

use crate::orph_core::context::Context;
use crate::orph_core::error::{OrphError, Result};
use crate::orph_core::store::{self, ORPHDAT_FILENAME};

/// Trash directory name, hidden at any depth.
pub const TRASH_DIR_NAME: &str = ".orphtrash";

/// House-keeping files that do not stop a directory from being "empty".
const IGNORABLE_FILES: &[&str] = &["thumbs.db", ".ds_store", "desktop.ini"];

fn is_store_file(path: &Path) -> bool {
    path.file_name().is_some_and(|n| n == ORPHDAT_FILENAME)
}

fn is_trash_component(name: &std::ffi::OsStr) -> bool {
    name.eq_ignore_ascii_case(TRASH_DIR_NAME)
}

/// Local trash target: a sibling `.orphtrash` directory.
pub fn trash_target_for(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new(""));
    match path.file_name() {
        Some(name) => parent.join(TRASH_DIR_NAME).join(name),
        None => parent.join(TRASH_DIR_NAME),
    }
}

/// Trash target under `root`, mirroring the path's position in the tree.
/// Intermediate `.orphtrash` components collapse, so already-trashed files
/// hoist cleanly into the root trash.
pub fn trash_target_with_root(path: &Path, root: &Path) -> Result<PathBuf> {
    let rel = path.strip_prefix(root).map_err(|_| OrphError::BadPath {
        path: path.to_path_buf(),
        reason: format!("not under root {}", root.display()),
    })?;
    let mut target = root.join(TRASH_DIR_NAME);
    for component in rel.components() {
        if !is_trash_component(component.as_os_str()) {
            target.push(component);
        }
    }
    Ok(target)
}

/// Move a file or directory, carrying hash records along.
///
/// Parent directories of `new` are created as needed. Moving a catalog file
/// onto an existing catalog concatenate-merges the records; moving a
/// directory onto an existing directory merges recursively with the catalog
/// processed last. Anything else refuses to overwrite.
pub fn move_path(ctx: &mut Context, old: &Path, new: &Path) -> Result<()> {
    if old == new {
        return Ok(());
    }
    let old_meta = fs::symlink_metadata(old).map_err(|e| OrphError::io_at(old, e))?;
    if let Some(parent) = new.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| OrphError::io_at(parent, e))?;
        }
    }

    if old_meta.is_dir() {
        if new.exists() {
            if new.is_dir() {
                return merge_dirs(ctx, old, new);
            }
            return Err(OrphError::WouldOverwrite(new.to_path_buf()));
        }
        log::debug!("Moving directory {} -> {}", old.display(), new.display());
        fs::rename(old, new).map_err(|e| OrphError::io_at(old, e))?;
        return Ok(());
    }

    if new.exists() {
        if is_store_file(old) && is_store_file(new) {
            store::append_stores(ctx, new, &[old.to_path_buf()])?;
            fs::remove_file(old).map_err(|e| OrphError::io_at(old, e))?;
            ctx.cache.forget(old);
            return Ok(());
        }
        return Err(OrphError::WouldOverwrite(new.to_path_buf()));
    }

    log::debug!("Moving {} -> {}", old.display(), new.display());
    fs::rename(old, new).map_err(|e| OrphError::io_at(old, e))?;
    if is_store_file(new) {
        ctx.cache.forget(old);
        ctx.cache.forget(new);
    } else {
        store::move_record(ctx, old, Some(new))?;
    }
    Ok(())
}

/// Children of `dir`, case-insensitively sorted, with the catalog file
/// moved to the end so sibling moves have already transferred its records.
fn children_store_last(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut children = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| OrphError::io_at(dir, e))? {
        let entry = entry.map_err(|e| OrphError::io_at(dir, e))?;
        children.push(entry.path());
    }
    children.sort_by_key(|p| {
        let name = p
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        (is_store_file(p), name)
    });
    Ok(children)
}

fn merge_dirs(ctx: &mut Context, old: &Path, new: &Path) -> Result<()> {
    for child in children_store_last(old)? {
        if !child.exists() {
            // Emptied catalogs unlink themselves while their siblings move.
            continue;
        }
        let Some(name) = child.file_name() else {
            continue;
        };
        move_path(ctx, &child, &new.join(name))?;
    }
    fs::remove_dir(old).map_err(|e| OrphError::io_at(old, e))
}

fn dir_is_empty(dir: &Path) -> Result<bool> {
    let mut entries = fs::read_dir(dir).map_err(|e| OrphError::io_at(dir, e))?;
    Ok(entries.next().is_none())
}

/// Trash one path. An empty directory is simply removed; anything else is
/// moved to the local trash, record included.
pub fn trash(ctx: &mut Context, path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path).map_err(|e| OrphError::io_at(path, e))?;
    if meta.is_dir() && dir_is_empty(path)? {
        return fs::remove_dir(path).map_err(|e| OrphError::io_at(path, e));
    }
    move_path(ctx, path, &trash_target_for(path))
}

/// Trash a media file together with its sidecars. Every sidecar must still
/// exist; otherwise nothing is moved.
pub fn trash_media(ctx: &mut Context, path: &Path, sidecars: &[PathBuf]) -> Result<()> {
    for sidecar in sidecars {
        if !sidecar.exists() {
            return Err(OrphError::MissingSidecar {
                media: path.to_path_buf(),
                sidecar: sidecar.clone(),
            });
        }
    }
    trash(ctx, path)?;
    for sidecar in sidecars {
        trash(ctx, sidecar)?;
    }
    Ok(())
}

/// Trash one path into the root-level trash, mirroring its tree position.
pub fn trash_with_root(ctx: &mut Context, path: &Path, root: &Path) -> Result<()> {
    let target = trash_target_with_root(path, root)?;
    move_path(ctx, path, &target)
}

/// Move the contents of a `.orphtrash` directory back up one level, then
/// remove the emptied trash directory.
pub fn restore_trash(ctx: &mut Context, trash_dir: &Path) -> Result<()> {
    let Some(name) = trash_dir.file_name() else {
        return Err(OrphError::BadPath {
            path: trash_dir.to_path_buf(),
            reason: "no directory name".to_string(),
        });
    };
    if !is_trash_component(name) {
        return Err(OrphError::BadPath {
            path: trash_dir.to_path_buf(),
            reason: format!("not a {TRASH_DIR_NAME} directory"),
        });
    }
    let parent = trash_dir.parent().ok_or_else(|| OrphError::BadPath {
        path: trash_dir.to_path_buf(),
        reason: "no parent to restore into".to_string(),
    })?;

    for child in children_store_last(trash_dir)? {
        if !child.exists() {
            continue;
        }
        let Some(child_name) = child.file_name() else {
            continue;
        };
        move_path(ctx, &child, &parent.join(child_name))?;
    }
    fs::remove_dir(trash_dir).map_err(|e| OrphError::io_at(trash_dir, e))
}

/// Remove `dir` if it holds nothing but house-keeping files and an empty
/// catalog. Returns whether it was removed.
pub fn remove_if_empty(ctx: &mut Context, dir: &Path) -> Result<bool> {
    let mut removable_files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| OrphError::io_at(dir, e))? {
        let entry = entry.map_err(|e| OrphError::io_at(dir, e))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if entry.file_type().map_err(|e| OrphError::io_at(dir, e))?.is_dir() {
            return Ok(false);
        }
        if IGNORABLE_FILES.contains(&name.as_str()) {
            removable_files.push(path);
        } else if name == ORPHDAT_FILENAME {
            if !store::read_store(&path)?.is_empty() {
                return Ok(false);
            }
            removable_files.push(path);
        } else {
            return Ok(false);
        }
    }

    for file in removable_files {
        fs::remove_file(&file).map_err(|e| OrphError::io_at(&file, e))?;
        ctx.cache.forget(&file);
    }
    fs::remove_dir(dir).map_err(|e| OrphError::io_at(dir, e))?;
    Ok(true)
}
