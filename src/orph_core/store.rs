//! Per-directory hash catalogs.
//!
//! Every directory with hashed media carries a hidden `.orphdat` file: a
//! JSON object mapping the lowercased file name to its hash record. Records
//! follow their files through moves and trashing, so integrity history is
//! never lost to reorganization.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::orph_core::context::Context;
use crate::orph_core::error::{OrphError, Result};
use crate::orph_core::hash;
use crate::orph_core::trash::trash_target_for;
use crate::orph_core::view::{ConflictChoice, PromptDriver};

/// Catalog file name, hidden in the directory whose files it describes.
pub const ORPHDAT_FILENAME: &str = ".orphdat";

/// Cached digests for one media file.
///
/// Field order is the serialized key order. `size`/`mtime` are absent on
/// records promoted from the legacy line format; such records never pass
/// cache validity and are re-hashed the first time they are resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRecord {
    /// Basename with original casing; ties the record to the filesystem.
    pub filename: String,
    /// Whole-file MD5, lowercase hex.
    pub full_md5: String,
    /// Content MD5 (metadata-insensitive where the format allows), lowercase hex.
    pub md5: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub version: u32,
}

/// The in-memory form of one catalog: lowercased filename -> record.
pub type OrphdatSet = BTreeMap<String, HashRecord>;

fn is_hex_digest(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Catalog path for the directory holding `media_path`.
pub fn store_path_of(media_path: &Path) -> PathBuf {
    media_path
        .parent()
        .unwrap_or(Path::new(""))
        .join(ORPHDAT_FILENAME)
}

fn basename_of(media_path: &Path) -> Result<String> {
    media_path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| OrphError::BadPath {
            path: media_path.to_path_buf(),
            reason: "no usable file name".to_string(),
        })
}

/// Catalog key for a media path: the lowercased basename.
pub fn key_of(media_path: &Path) -> Result<String> {
    Ok(basename_of(media_path)?.to_lowercase())
}

pub(crate) fn mtime_secs(meta: &fs::Metadata) -> Result<i64> {
    let modified = meta.modified()?;
    Ok(match modified.duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    })
}

fn parse_store(path: &Path, contents: &str) -> Result<OrphdatSet> {
    let trimmed = contents.trim_start();
    if trimmed.is_empty() {
        return Ok(OrphdatSet::new());
    }

    if trimmed.starts_with('{') {
        let set: OrphdatSet =
            serde_json::from_str(trimmed).map_err(|e| OrphError::StoreParse {
                path: path.to_path_buf(),
                source: e,
            })?;
        for (key, record) in &set {
            if record.filename.to_lowercase() != *key {
                return Err(OrphError::StoreFormat {
                    path: path.to_path_buf(),
                    reason: format!("key '{key}' does not match filename '{}'", record.filename),
                });
            }
            if !is_hex_digest(&record.md5) || !is_hex_digest(&record.full_md5) {
                return Err(OrphError::StoreFormat {
                    path: path.to_path_buf(),
                    reason: format!("bad digest for '{key}'"),
                });
            }
        }
        return Ok(set);
    }

    // Legacy line format: "filename: hexdigest". Read-only; the first write
    // rewrites the whole catalog as JSON.
    let mut set = OrphdatSet::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, digest)) = line.rsplit_once(": ") else {
            return Err(OrphError::StoreFormat {
                path: path.to_path_buf(),
                reason: format!("unparseable line '{line}'"),
            });
        };
        let digest = digest.trim();
        if !is_hex_digest(digest) {
            return Err(OrphError::StoreFormat {
                path: path.to_path_buf(),
                reason: format!("bad digest for '{name}'"),
            });
        }
        set.insert(
            name.to_lowercase(),
            HashRecord {
                filename: name.to_string(),
                full_md5: digest.to_string(),
                md5: digest.to_string(),
                mtime: None,
                size: None,
                version: 0,
            },
        );
    }
    Ok(set)
}

/// Read a catalog without creating it; a missing file is an empty set.
pub fn read_store(store_path: &Path) -> Result<OrphdatSet> {
    match fs::read_to_string(store_path) {
        Ok(contents) => parse_store(store_path, &contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(OrphdatSet::new()),
        Err(e) => Err(OrphError::io_at(store_path, e)),
    }
}

fn load_set(ctx: &mut Context, store_path: &Path) -> Result<OrphdatSet> {
    if let Some(set) = ctx.cache.cached_set(store_path) {
        return Ok(set.clone());
    }
    let set = read_store(store_path)?;
    ctx.cache.remember(store_path, &set);
    Ok(set)
}

/// A read-modify-write transaction over one catalog file. The file stays
/// open across the transaction; the write is a single truncate-and-emit, so
/// concurrent readers observe either the old or the new contents, never a
/// torn mix. Dropping an uncommitted transaction leaves pre-existing files
/// untouched and removes a file this transaction created.
struct StoreTxn {
    path: PathBuf,
    file: Option<File>,
    existed: bool,
    committed: bool,
    set: OrphdatSet,
}

impl StoreTxn {
    fn begin(store_path: &Path) -> Result<Self> {
        let existed = store_path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(store_path)
            .map_err(|e| OrphError::io_at(store_path, e))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| OrphError::io_at(store_path, e))?;
        let set = parse_store(store_path, &contents)?;
        Ok(StoreTxn {
            path: store_path.to_path_buf(),
            file: Some(file),
            existed,
            committed: false,
            set,
        })
    }

    fn commit(mut self, ctx: &mut Context) -> Result<()> {
        self.committed = true;
        if self.set.is_empty() {
            // Close the handle before unlinking.
            drop(self.file.take());
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(OrphError::io_at(&self.path, e)),
            }
            ctx.cache.forget(&self.path);
            return Ok(());
        }

        let json = serde_json::to_string_pretty(&self.set).map_err(|e| OrphError::StoreParse {
            path: self.path.clone(),
            source: e,
        })?;
        let file = self.file.as_mut().expect("transaction file still open");
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.set_len(0))
            .and_then(|_| file.write_all(json.as_bytes()))
            .and_then(|_| file.flush())
            .map_err(|e| OrphError::io_at(&self.path, e))?;
        ctx.cache.remember(&self.path, &self.set);
        Ok(())
    }
}

impl Drop for StoreTxn {
    fn drop(&mut self) {
        if !self.committed && !self.existed {
            drop(self.file.take());
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Options for [`resolve`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    /// Accept any existing record without validating it against the file.
    pub add_only: bool,
    /// Ignore every cache layer and recompute from bytes.
    pub force_recalc: bool,
}

fn stat_valid(path: &Path, filename: &str, size: u64, mtime: i64, record: &HashRecord) -> bool {
    record.filename.to_lowercase() == filename.to_lowercase()
        && record.size == Some(size)
        && record.mtime == Some(mtime)
        && hash::is_hash_version_current(path, record.version)
}

/// Resolve the hash record for a media file.
///
/// Tries, in order: the caller's candidate record, the one-slot cache, the
/// on-disk catalog; each is accepted only while the file's stat and the
/// algorithm version still match. On a miss the file is re-hashed and the
/// catalog updated. `Ok(None)` means the operator chose to skip the file at
/// a mismatch prompt.
pub fn resolve(
    ctx: &mut Context,
    prompt: &mut dyn PromptDriver,
    media_path: &Path,
    candidate: Option<&HashRecord>,
    opts: ResolveOptions,
) -> Result<Option<HashRecord>> {
    let filename = basename_of(media_path)?;
    let key = filename.to_lowercase();
    let store_path = store_path_of(media_path);

    let meta = fs::metadata(media_path).map_err(|e| OrphError::io_at(media_path, e))?;
    let size = meta.len();
    let mtime = mtime_secs(&meta)?;

    if !opts.force_recalc {
        if let Some(record) = candidate {
            if opts.add_only || stat_valid(media_path, &filename, size, mtime, record) {
                return Ok(Some(record.clone()));
            }
        }
        let set = load_set(ctx, &store_path)?;
        if let Some(record) = set.get(&key) {
            if opts.add_only || stat_valid(media_path, &filename, size, mtime, record) {
                return Ok(Some(record.clone()));
            }
        }
    }

    let hashes = hash::calculate_hash(media_path)?;
    let new_record = HashRecord {
        filename: filename.clone(),
        full_md5: hashes.full_md5,
        md5: hashes.md5,
        mtime: Some(mtime),
        size: Some(size),
        version: hashes.version,
    };

    let mut txn = StoreTxn::begin(&store_path)?;
    if let Some(old) = txn.set.get(&key) {
        if old.md5 != new_record.md5 {
            if old.full_md5 == new_record.full_md5 {
                if hash::is_hash_version_current(media_path, old.version) {
                    // Same bytes, same algorithm, different content hash:
                    // the catalog or the hasher is wrong. Stop here.
                    return Err(OrphError::InvariantViolation {
                        path: media_path.to_path_buf(),
                        old_version: old.version,
                        old_md5: old.md5.clone(),
                        new_version: new_record.version,
                        new_md5: new_record.md5.clone(),
                    });
                }
                log::debug!(
                    "Upgrading record for {} from v{} to v{}",
                    media_path.display(),
                    old.version,
                    new_record.version
                );
            } else {
                match prompt.hash_conflict(media_path, old, &new_record)? {
                    ConflictChoice::Ignore => return Ok(Some(new_record)),
                    ConflictChoice::Overwrite => {}
                    ConflictChoice::Skip => return Ok(None),
                    ConflictChoice::Quit => return Err(OrphError::UserQuit),
                }
            }
        }
    }
    txn.set.insert(key, new_record.clone());
    txn.commit(ctx)?;
    Ok(Some(new_record))
}

/// Whether the catalog already holds a stat-valid record for `media_path`.
pub fn is_cached(ctx: &mut Context, media_path: &Path) -> Result<bool> {
    let filename = basename_of(media_path)?;
    let key = filename.to_lowercase();
    let meta = fs::metadata(media_path).map_err(|e| OrphError::io_at(media_path, e))?;
    let mtime = mtime_secs(&meta)?;
    let set = load_set(ctx, &store_path_of(media_path))?;
    Ok(set
        .get(&key)
        .is_some_and(|record| stat_valid(media_path, &filename, meta.len(), mtime, record)))
}

/// Outcome of a read-only verification of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Bytes unchanged, or only metadata changed (content hash still equal).
    Verified,
    /// No record in the catalog to verify against.
    NoRecord,
    /// Content hash no longer matches the record.
    Mismatch { stored_md5: String, current_md5: String },
}

/// Verify a file against its stored record without writing anything.
pub fn verify(ctx: &mut Context, media_path: &Path) -> Result<VerifyOutcome> {
    let key = key_of(media_path)?;
    let store_path = store_path_of(media_path);
    let set = load_set(ctx, &store_path)?;
    let Some(stored) = set.get(&key) else {
        return Ok(VerifyOutcome::NoRecord);
    };

    let hashes = hash::calculate_hash(media_path)?;
    if hashes.full_md5 == stored.full_md5 || hashes.md5 == stored.md5 {
        Ok(VerifyOutcome::Verified)
    } else {
        Ok(VerifyOutcome::Mismatch {
            stored_md5: stored.md5.clone(),
            current_md5: hashes.md5,
        })
    }
}

/// Insert, replace or delete (when `record` is `None`) a file's record.
pub fn write_record(
    ctx: &mut Context,
    media_path: &Path,
    record: Option<&HashRecord>,
) -> Result<()> {
    let filename = basename_of(media_path)?;
    let key = filename.to_lowercase();
    let store_path = store_path_of(media_path);

    let mut txn = StoreTxn::begin(&store_path)?;
    match record {
        Some(record) => {
            let mut stored = record.clone();
            stored.filename = filename;
            txn.set.insert(key, stored);
        }
        None => {
            txn.set.remove(&key);
        }
    }
    txn.commit(ctx)
}

/// Move a file's record to another path's catalog, or delete it when
/// `new_path` is `None`. An identical record already at the target makes
/// this a plain delete; the emptied source catalog is unlinked.
pub fn move_record(ctx: &mut Context, old_path: &Path, new_path: Option<&Path>) -> Result<()> {
    let old_key = key_of(old_path)?;
    let old_store = store_path_of(old_path);

    let mut src = StoreTxn::begin(&old_store)?;
    let Some(record) = src.set.remove(&old_key) else {
        log::debug!("No record to move for {}", old_path.display());
        return Ok(());
    };

    let Some(new_path) = new_path else {
        return src.commit(ctx);
    };

    let new_name = basename_of(new_path)?;
    let new_key = new_name.to_lowercase();
    let new_store = store_path_of(new_path);
    let mut moved = record;
    moved.filename = new_name;

    if new_store == old_store {
        match src.set.get(&new_key) {
            Some(existing) if *existing == moved => {}
            _ => {
                src.set.insert(new_key, moved);
            }
        }
        return src.commit(ctx);
    }

    let mut dst = StoreTxn::begin(&new_store)?;
    match dst.set.get(&new_key) {
        Some(existing) if *existing == moved => {
            log::debug!(
                "Identical record already at {}; dropping source entry",
                new_path.display()
            );
        }
        Some(_) => {
            log::warn!(
                "Replacing differing record at {} with the moved one",
                new_path.display()
            );
            dst.set.insert(new_key, moved);
        }
        None => {
            dst.set.insert(new_key, moved);
        }
    }
    dst.commit(ctx)?;
    src.commit(ctx)
}

/// Move a file's record into its local trash target's catalog.
pub fn trash_record(ctx: &mut Context, media_path: &Path) -> Result<()> {
    let target = trash_target_for(media_path);
    move_record(ctx, media_path, Some(&target))
}

/// Merge the records of `sources` into `target_store`. Identical duplicate
/// records collapse; a key collision with differing records fails before
/// anything is written.
pub fn append_stores(ctx: &mut Context, target_store: &Path, sources: &[PathBuf]) -> Result<usize> {
    let mut txn = StoreTxn::begin(target_store)?;
    let mut added = 0;
    for source in sources {
        let source_set = read_store(source)?;
        for (key, record) in source_set {
            match txn.set.get(&key) {
                None => {
                    txn.set.insert(key, record);
                    added += 1;
                }
                Some(existing) if *existing == record => {}
                Some(_) => {
                    return Err(OrphError::ConflictingAppend {
                        key,
                        target_store: target_store.to_path_buf(),
                        source_store: source.clone(),
                    });
                }
            }
        }
    }
    txn.commit(ctx)?;
    Ok(added)
}

/// Drop records whose files no longer exist in `dir`. Returns how many
/// records were purged.
pub fn purge_dir(ctx: &mut Context, dir: &Path) -> Result<usize> {
    let store_path = dir.join(ORPHDAT_FILENAME);
    if !store_path.exists() {
        return Ok(0);
    }
    let mut txn = StoreTxn::begin(&store_path)?;
    let before = txn.set.len();
    txn.set.retain(|_, record| dir.join(&record.filename).exists());
    let purged = before - txn.set.len();
    if purged > 0 {
        txn.commit(ctx)?;
    }
    Ok(purged)
}
