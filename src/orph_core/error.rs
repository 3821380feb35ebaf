use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrphError>;

#[derive(Error, Debug)]
pub enum OrphError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path}: {source}")]
    PathIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory walker error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Bad glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Unreadable catalog {path}: {source}")]
    StoreParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed catalog entry in {path}: {reason}")]
    StoreFormat { path: PathBuf, reason: String },

    #[error("{path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error(
        "Content hash changed under an unchanged full hash for {path}\n  \
         stored:   v{old_version} {old_md5}\n  \
         computed: v{new_version} {new_md5}"
    )]
    InvariantViolation {
        path: PathBuf,
        old_version: u32,
        old_md5: String,
        new_version: u32,
        new_md5: String,
    },

    #[error("Conflicting records for '{key}' while appending {source_store} into {target_store}")]
    ConflictingAppend {
        key: String,
        target_store: PathBuf,
        source_store: PathBuf,
    },

    #[error("Refusing to overwrite existing {0}")]
    WouldOverwrite(PathBuf),

    #[error("Sidecar {sidecar} of {media} is missing; nothing was moved")]
    MissingSidecar { media: PathBuf, sidecar: PathBuf },

    #[error("Metadata error for {path}: {reason}")]
    Metadata { path: PathBuf, reason: String },

    #[error("Invalid path {path}: {reason}")]
    BadPath { path: PathBuf, reason: String },

    #[error("Quit")]
    UserQuit,
}

impl OrphError {
    /// Wrap an `io::Error` with the path the operation was acting on.
    pub fn io_at(path: &std::path::Path, source: std::io::Error) -> Self {
        OrphError::PathIo {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether this error ends the session cleanly (exit code 0).
    pub fn is_user_quit(&self) -> bool {
        matches!(self, OrphError::UserQuit)
    }
}
