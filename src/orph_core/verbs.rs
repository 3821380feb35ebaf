//! Implementations behind the CLI verbs that are not interactive reviews:
//! hashing sweeps, trash collection and restore, empties removal and
//! record purging.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::orph_core::context::Context;
use crate::orph_core::error::Result;
use crate::orph_core::store;
use crate::orph_core::trash::{self, TRASH_DIR_NAME};
use crate::orph_core::traverse::{self, TreeVisitor};
use crate::orph_core::view::PromptDriver;

struct HashCheck<'a> {
    ctx: &'a mut Context,
    prompt: &'a mut dyn PromptDriver,
    hashed: usize,
    cached: usize,
    skipped: usize,
}

impl TreeVisitor for HashCheck<'_> {
    fn visit(&mut self, full: &Path, _root: &Path) -> Result<()> {
        if full.is_dir() {
            return Ok(());
        }
        if store::is_cached(self.ctx, full)? {
            self.cached += 1;
            return Ok(());
        }
        match store::resolve(
            self.ctx,
            self.prompt,
            full,
            None,
            store::ResolveOptions::default(),
        )? {
            Some(_) => self.hashed += 1,
            None => self.skipped += 1,
        }
        Ok(())
    }
}

/// Resolve (and cache) the hash record of every file under the roots.
pub fn check_hash(
    ctx: &mut Context,
    prompt: &mut dyn PromptDriver,
    patterns: &[String],
) -> Result<()> {
    let roots = traverse::expand_roots(patterns)?;
    let mut sweep = HashCheck {
        ctx,
        prompt,
        hashed: 0,
        cached: 0,
        skipped: 0,
    };
    traverse::traverse(&roots, &mut sweep)?;
    println!(
        "{} file(s) hashed, {} already current, {} skipped.",
        sweep.hashed, sweep.cached, sweep.skipped
    );
    Ok(())
}

struct HashVerify<'a> {
    ctx: &'a mut Context,
    verified: usize,
    missing: usize,
    mismatched: usize,
}

impl TreeVisitor for HashVerify<'_> {
    fn visit(&mut self, full: &Path, _root: &Path) -> Result<()> {
        if full.is_dir() {
            return Ok(());
        }
        match store::verify(self.ctx, full)? {
            store::VerifyOutcome::Verified => self.verified += 1,
            store::VerifyOutcome::NoRecord => {
                log::info!("No record for {}", full.display());
                self.missing += 1;
            }
            store::VerifyOutcome::Mismatch {
                stored_md5,
                current_md5,
            } => {
                log::error!(
                    "Content changed: {} (recorded {stored_md5}, now {current_md5})",
                    full.display()
                );
                self.mismatched += 1;
            }
        }
        Ok(())
    }
}

/// Re-hash every file under the roots and compare against the catalogs
/// without writing anything.
pub fn verify_hash(ctx: &mut Context, patterns: &[String]) -> Result<()> {
    let roots = traverse::expand_roots(patterns)?;
    let mut sweep = HashVerify {
        ctx,
        verified: 0,
        missing: 0,
        mismatched: 0,
    };
    traverse::traverse(&roots, &mut sweep)?;
    println!(
        "{} file(s) verified, {} mismatched, {} without records.",
        sweep.verified, sweep.mismatched, sweep.missing
    );
    Ok(())
}

fn has_trash_component(rel: &Path) -> bool {
    rel.components()
        .any(|c| c.as_os_str().eq_ignore_ascii_case(TRASH_DIR_NAME))
}

fn first_component_is_trash(rel: &Path) -> bool {
    rel.components()
        .next()
        .is_some_and(|c| c.as_os_str().eq_ignore_ascii_case(TRASH_DIR_NAME))
}

/// Hoist every scattered `.orphtrash` under each root into the root-level
/// trash, mirroring tree structure, then drop the emptied trash directories.
pub fn collect_trash(ctx: &mut Context, patterns: &[String]) -> Result<()> {
    let mut collected = 0usize;
    for root in traverse::expand_roots(patterns)? {
        if !root.is_dir() {
            log::warn!("Not a directory: {}", root.display());
            continue;
        }

        // Catalogs sort last so sibling moves have emptied them already.
        let mut files = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&root) else {
                continue;
            };
            if has_trash_component(rel) && !first_component_is_trash(rel) {
                files.push(entry.path().to_path_buf());
            }
        }
        files.sort_by_key(|p| {
            p.file_name()
                .is_some_and(|n| n == store::ORPHDAT_FILENAME)
        });

        for file in files {
            if !file.exists() {
                continue;
            }
            trash::trash_with_root(ctx, &file, &root)?;
            collected += 1;
        }

        // Remove the emptied trash directories, deepest first.
        for entry in WalkDir::new(&root).follow_links(false).contents_first(true) {
            let entry = entry?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&root) else {
                continue;
            };
            if has_trash_component(rel) && !first_component_is_trash(rel) {
                match std::fs::remove_dir(entry.path()) {
                    Ok(()) => {}
                    Err(e) => log::warn!("Leaving {}: {e}", entry.path().display()),
                }
            }
        }
    }
    println!("{collected} file(s) collected into the root trash.");
    Ok(())
}

/// Restore the contents of `.orphtrash` directories under (or at) the
/// given roots back into their parent directories.
pub fn restore_trash(ctx: &mut Context, patterns: &[String]) -> Result<()> {
    let mut restored = 0usize;
    for root in traverse::expand_roots(patterns)? {
        if root
            .file_name()
            .is_some_and(|n| n.eq_ignore_ascii_case(TRASH_DIR_NAME))
        {
            trash::restore_trash(ctx, &root)?;
            restored += 1;
            continue;
        }
        if !root.is_dir() {
            log::warn!("Not a directory: {}", root.display());
            continue;
        }

        let mut trash_dirs = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_dir()
                && entry.file_name().eq_ignore_ascii_case(TRASH_DIR_NAME)
            {
                trash_dirs.push(entry.path().to_path_buf());
            }
        }
        for trash_dir in trash_dirs {
            // A restore higher up may have already moved this one.
            if trash_dir.is_dir() {
                trash::restore_trash(ctx, &trash_dir)?;
                restored += 1;
            }
        }
    }
    println!("{restored} trash directory(ies) restored.");
    Ok(())
}

struct EmptiesSweep<'a> {
    ctx: &'a mut Context,
    removed: usize,
}

impl TreeVisitor for EmptiesSweep<'_> {
    fn visit(&mut self, full: &Path, root: &Path) -> Result<()> {
        if full.is_dir() && full != root && trash::remove_if_empty(self.ctx, full)? {
            log::info!("Removed empty {}", full.display());
            self.removed += 1;
        }
        Ok(())
    }
}

/// Remove directories that hold nothing (or only house-keeping files).
/// Children are visited first, so emptied parents collapse in one pass.
pub fn remove_empties(ctx: &mut Context, patterns: &[String]) -> Result<()> {
    let roots = traverse::expand_roots(patterns)?;
    let mut sweep = EmptiesSweep { ctx, removed: 0 };
    traverse::traverse(&roots, &mut sweep)?;
    println!("{} empty directory(ies) removed.", sweep.removed);
    Ok(())
}

struct RecordPurge<'a> {
    ctx: &'a mut Context,
    purged: usize,
}

impl TreeVisitor for RecordPurge<'_> {
    fn visit(&mut self, full: &Path, _root: &Path) -> Result<()> {
        if full.is_dir() {
            self.purged += store::purge_dir(self.ctx, full)?;
        }
        Ok(())
    }
}

/// Drop hash records whose files no longer exist.
pub fn purge_md5(ctx: &mut Context, patterns: &[String]) -> Result<()> {
    let roots = traverse::expand_roots(patterns)?;
    let mut sweep = RecordPurge { ctx, purged: 0 };
    traverse::traverse(&roots, &mut sweep)?;
    println!("{} stale record(s) purged.", sweep.purged);
    Ok(())
}

/// Merge keyword/rating metadata of `sources` into `target`.
pub fn append_metadata(ctx: &mut Context, target: &Path, sources: &[PathBuf]) -> Result<()> {
    crate::orph_core::metadata::append_metadata(&mut ctx.metadata, target, sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orph_core::store::{HashRecord, read_store};
    use crate::orph_core::view::ConflictChoice;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    struct NeverPrompt;

    impl PromptDriver for NeverPrompt {
        fn read_command(&mut self, _prompt: &str) -> Result<String> {
            panic!("no prompts expected");
        }

        fn hash_conflict(
            &mut self,
            _path: &Path,
            _old: &HashRecord,
            _new: &HashRecord,
        ) -> Result<ConflictChoice> {
            panic!("no conflicts expected");
        }
    }

    fn pattern_of(dir: &TempDir) -> Vec<String> {
        vec![dir.path().to_string_lossy().into_owned()]
    }

    #[test]
    fn test_check_hash_writes_catalogs_everywhere() {
        let dir = TempDir::new().expect("tempdir");
        dir.child("a.jpg").write_binary(&[0xFF, 0xD8]).expect("write");
        dir.child("sub/b.png").write_binary(b"png-ish").expect("write");
        let mut ctx = Context::new();

        check_hash(&mut ctx, &mut NeverPrompt, &pattern_of(&dir)).expect("check");

        assert!(dir.child(".orphdat").path().exists());
        assert!(dir.child("sub/.orphdat").path().exists());
        let set = read_store(dir.child("sub/.orphdat").path()).expect("read");
        assert!(set.contains_key("b.png"));

        // Second pass finds everything current and rewrites nothing.
        check_hash(&mut ctx, &mut NeverPrompt, &pattern_of(&dir)).expect("check again");
    }

    #[test]
    fn test_collect_trash_mirrors_structure() {
        let dir = TempDir::new().expect("tempdir");
        let mut ctx = Context::new();
        for rel in [
            "A/.orphtrash/1.jpg",
            "A/.orphtrash/2.jpg",
            "B/.orphtrash/3.jpg",
            "B/C/.orphtrash/4.jpg",
        ] {
            dir.child(rel).write_binary(&[0xFF, 0xD8]).expect("write");
        }

        collect_trash(&mut ctx, &pattern_of(&dir)).expect("collect");

        for rel in [
            ".orphtrash/A/1.jpg",
            ".orphtrash/A/2.jpg",
            ".orphtrash/B/3.jpg",
            ".orphtrash/B/C/4.jpg",
        ] {
            assert!(dir.child(rel).path().exists(), "missing {rel}");
        }
        assert!(!dir.child("A/.orphtrash").path().exists());
        assert!(!dir.child("B/.orphtrash").path().exists());
        assert!(!dir.child("B/C/.orphtrash").path().exists());
    }

    #[test]
    fn test_collect_trash_carries_records() {
        let dir = TempDir::new().expect("tempdir");
        let mut ctx = Context::new();
        dir.child("A/x.jpg").write_binary(&[0xFF, 0xD8, 1]).expect("write");
        check_hash(&mut ctx, &mut NeverPrompt, &pattern_of(&dir)).expect("check");
        trash::trash(&mut ctx, dir.child("A/x.jpg").path()).expect("trash");

        collect_trash(&mut ctx, &pattern_of(&dir)).expect("collect");

        assert!(dir.child(".orphtrash/A/x.jpg").path().exists());
        let set = read_store(dir.child(".orphtrash/A/.orphdat").path()).expect("read");
        assert!(set.contains_key("x.jpg"));
    }

    #[test]
    fn test_restore_trash_undoes_local_trash() {
        let dir = TempDir::new().expect("tempdir");
        let mut ctx = Context::new();
        dir.child("A/x.jpg").write_binary(&[0xFF, 0xD8, 1]).expect("write");
        check_hash(&mut ctx, &mut NeverPrompt, &pattern_of(&dir)).expect("check");
        trash::trash(&mut ctx, dir.child("A/x.jpg").path()).expect("trash");
        assert!(!dir.child("A/x.jpg").path().exists());

        restore_trash(&mut ctx, &pattern_of(&dir)).expect("restore");

        assert!(dir.child("A/x.jpg").path().exists());
        assert!(!dir.child("A/.orphtrash").path().exists());
        let set = read_store(dir.child("A/.orphdat").path()).expect("read");
        assert!(set.contains_key("x.jpg"));
    }

    #[test]
    fn test_remove_empties_collapses_nested_dirs() {
        let dir = TempDir::new().expect("tempdir");
        let mut ctx = Context::new();
        dir.child("a/b/c").create_dir_all().expect("mkdir");
        dir.child("a/b/.DS_Store").touch().expect("touch");
        dir.child("keep/file.jpg").write_binary(&[1]).expect("write");

        remove_empties(&mut ctx, &pattern_of(&dir)).expect("sweep");

        assert!(!dir.child("a").path().exists());
        assert!(dir.child("keep/file.jpg").path().exists());
    }

    #[test]
    fn test_purge_md5_drops_records_of_missing_files() {
        let dir = TempDir::new().expect("tempdir");
        let mut ctx = Context::new();
        dir.child("a.jpg").write_binary(&[0xFF, 0xD8, 1]).expect("write");
        dir.child("b.jpg").write_binary(&[0xFF, 0xD8, 2]).expect("write");
        check_hash(&mut ctx, &mut NeverPrompt, &pattern_of(&dir)).expect("check");
        std::fs::remove_file(dir.child("b.jpg").path()).expect("remove");

        purge_md5(&mut ctx, &pattern_of(&dir)).expect("purge");

        let set = read_store(dir.child(".orphdat").path()).expect("read");
        assert!(set.contains_key("a.jpg"));
        assert!(!set.contains_key("b.jpg"));
    }
}
