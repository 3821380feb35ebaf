//! Filtered recursive tree walk.
//!
//! The walk is pre-order-filter / post-order-visit: a directory's predicate
//! decides descent before anything under it is touched, files are visited in
//! case-insensitive lexicographic order, and the directory itself is visited
//! only after all of its children. Per-directory catalog updates can
//! therefore run after the sibling file operations they describe.

use std::fs;
use std::path::{Path, PathBuf};

use crate::orph_core::error::{OrphError, Result};
use crate::orph_core::store::ORPHDAT_FILENAME;
use crate::orph_core::trash::TRASH_DIR_NAME;

/// Marker file whose presence prunes the directory containing it.
pub const ORPHIGNORE_FILENAME: &str = ".orphignore";

/// Callbacks driving one walk. Implementations override the predicates to
/// widen or narrow the default filter.
pub trait TreeVisitor {
    /// Whether to descend into a directory. Pruned directories are not
    /// traversed at all.
    fn want_dir(&mut self, full: &Path, root: &Path, name: &str) -> bool {
        let _ = root;
        default_dir_wanted(full, name)
    }

    /// Whether to visit a file.
    fn want_file(&mut self, full: &Path, root: &Path, name: &str) -> bool {
        let _ = (full, root);
        default_file_wanted(name)
    }

    /// Called for each accepted file, and for each directory after all of
    /// its children.
    fn visit(&mut self, full: &Path, root: &Path) -> Result<()>;
}

/// Default directory filter: skip trash, `.git`, and anything the user
/// marked with an `.orphignore` file.
pub fn default_dir_wanted(full: &Path, name: &str) -> bool {
    if name.eq_ignore_ascii_case(TRASH_DIR_NAME) || name == ".git" {
        return false;
    }
    !full.join(ORPHIGNORE_FILENAME).exists()
}

/// Default file filter: skip catalogs, ignore markers, and AppleDouble
/// `._*` companions.
pub fn default_file_wanted(name: &str) -> bool {
    name != ORPHDAT_FILENAME && name != ORPHIGNORE_FILENAME && !name.starts_with("._")
}

/// Expand glob patterns into walk roots. A pattern without metacharacters
/// that names an existing path is taken literally; an empty pattern list
/// yields the current directory.
pub fn expand_roots(patterns: &[String]) -> Result<Vec<PathBuf>> {
    if patterns.is_empty() {
        return Ok(vec![PathBuf::from(".")]);
    }

    let mut roots = Vec::new();
    for pattern in patterns {
        let literal = Path::new(pattern);
        if literal.exists() {
            roots.push(literal.to_path_buf());
            continue;
        }
        let matches = glob::glob(pattern).map_err(|e| OrphError::Pattern {
            pattern: pattern.clone(),
            source: e,
        })?;
        let mut matched_any = false;
        for entry in matches {
            match entry {
                Ok(path) => {
                    matched_any = true;
                    roots.push(path);
                }
                Err(e) => {
                    log::warn!("Skipping unreadable glob match: {e}");
                }
            }
        }
        if !matched_any {
            log::warn!("Pattern '{pattern}' matched nothing");
        }
    }
    roots.sort();
    roots.dedup();
    Ok(roots)
}

fn sorted_entries(dir: &Path) -> Result<Vec<(PathBuf, String, fs::FileType)>> {
    let mut entries = Vec::new();
    let read = fs::read_dir(dir).map_err(|e| OrphError::io_at(dir, e))?;
    for entry in read {
        let entry = entry.map_err(|e| OrphError::io_at(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type().map_err(|e| OrphError::io_at(dir, e))?;
        entries.push((entry.path(), name, file_type));
    }
    entries.sort_by(|a, b| a.1.to_lowercase().cmp(&b.1.to_lowercase()));
    Ok(entries)
}

fn walk_dir<V: TreeVisitor + ?Sized>(dir: &Path, root: &Path, visitor: &mut V) -> Result<()> {
    for (full, name, file_type) in sorted_entries(dir)? {
        if file_type.is_symlink() {
            log::debug!("Not following symlink {}", full.display());
        } else if file_type.is_dir() {
            if visitor.want_dir(&full, root, &name) {
                walk_dir(&full, root, visitor)?;
            }
        } else if visitor.want_file(&full, root, &name) {
            visitor.visit(&full, root)?;
        }
    }
    visitor.visit(dir, root)
}

/// Walk each root in turn. File roots are visited directly; directory roots
/// are walked recursively and visited last.
pub fn traverse<V: TreeVisitor + ?Sized>(roots: &[PathBuf], visitor: &mut V) -> Result<()> {
    for root in roots {
        let meta = fs::symlink_metadata(root).map_err(|e| OrphError::io_at(root, e))?;
        if meta.is_dir() {
            walk_dir(root, root, visitor)?;
        } else if meta.is_file() {
            visitor.visit(root, root)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    struct Recorder {
        root_len: usize,
        seen: Vec<String>,
    }

    impl Recorder {
        fn new(root: &Path) -> Self {
            Recorder {
                root_len: root.to_string_lossy().len(),
                seen: Vec::new(),
            }
        }
    }

    impl TreeVisitor for Recorder {
        fn visit(&mut self, full: &Path, _root: &Path) -> Result<()> {
            let rel = full.to_string_lossy()[self.root_len..]
                .trim_start_matches('/')
                .to_string();
            self.seen.push(if rel.is_empty() { ".".to_string() } else { rel });
            Ok(())
        }
    }

    fn build_tree(dir: &TempDir) {
        dir.child("B/deep/x.jpg").touch().expect("touch");
        dir.child("B/b.jpg").touch().expect("touch");
        dir.child("a.JPG").touch().expect("touch");
        dir.child("c.jpg").touch().expect("touch");
        dir.child(".orphdat").touch().expect("touch");
        dir.child("._resource").touch().expect("touch");
        dir.child(".orphtrash/t.jpg").touch().expect("touch");
        dir.child("ignored/.orphignore").touch().expect("touch");
        dir.child("ignored/i.jpg").touch().expect("touch");
    }

    #[test]
    fn test_walk_order_is_filtered_and_post_order() {
        let dir = TempDir::new().expect("tempdir");
        build_tree(&dir);

        let mut recorder = Recorder::new(dir.path());
        traverse(&[dir.path().to_path_buf()], &mut recorder).expect("walk");

        assert_eq!(
            recorder.seen,
            vec![
                "a.JPG",
                "B/b.jpg",
                "B/deep/x.jpg",
                "B/deep",
                "B",
                "c.jpg",
                ".", // the root itself comes last
            ],
            "trash, ignored dirs, catalogs and ._ files must not appear"
        );
    }

    #[test]
    fn test_file_root_is_visited_directly() {
        let dir = TempDir::new().expect("tempdir");
        dir.child("only.jpg").touch().expect("touch");

        let mut recorder = Recorder::new(dir.path());
        traverse(&[dir.child("only.jpg").path().to_path_buf()], &mut recorder).expect("walk");
        assert_eq!(recorder.seen, vec!["only.jpg"]);
    }

    #[test]
    fn test_expand_roots_literal_and_empty() {
        let dir = TempDir::new().expect("tempdir");
        dir.child("with space.jpg").touch().expect("touch");

        let literal = dir.child("with space.jpg").path().to_string_lossy().into_owned();
        let roots = expand_roots(&[literal]).expect("expand");
        assert_eq!(roots.len(), 1);

        let roots = expand_roots(&[]).expect("expand");
        assert_eq!(roots, vec![PathBuf::from(".")]);
    }

    #[test]
    fn test_expand_roots_glob() {
        let dir = TempDir::new().expect("tempdir");
        dir.child("a.jpg").touch().expect("touch");
        dir.child("b.jpg").touch().expect("touch");
        dir.child("c.png").touch().expect("touch");

        let pattern = format!("{}/[ab].jpg", dir.path().to_string_lossy());
        let roots = expand_roots(&[pattern]).expect("expand");
        assert_eq!(roots.len(), 2);
    }
}
