use clap::{Parser, Subcommand};
use simplelog::LevelFilter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Content-addressed integrity keeper for photo and video archives")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable file logging to the given path
    #[arg(long = "log", global = true)]
    pub log: Option<PathBuf>,

    /// Log level for file logging (debug, info, warn, error)
    #[arg(long, default_value_t = LevelFilter::Debug, global = true)]
    pub log_level: LevelFilter,

    /// Do not replay the previous command on an empty input line
    #[arg(long, global = true)]
    pub no_repeat: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute or refresh the hash record of every file under the roots
    CheckHash {
        /// Directories, files or glob patterns (default: current directory)
        globs: Vec<String>,
    },

    /// Re-hash files and compare against stored records, without writing
    VerifyHash {
        /// Directories, files or glob patterns (default: current directory)
        globs: Vec<String>,
    },

    /// Review groups of duplicate files interactively
    FindDupeFiles {
        /// Group by camera/timestamp name heuristic instead of content hash
        #[arg(long)]
        by_name: bool,

        /// Directories, files or glob patterns (default: current directory)
        globs: Vec<String>,
    },

    /// Hoist scattered .orphtrash directories into one root-level trash
    CollectTrash {
        /// Root directories (default: current directory)
        globs: Vec<String>,
    },

    /// Restore trashed files back into their original directories
    RestoreTrash {
        /// Root or .orphtrash directories (default: current directory)
        globs: Vec<String>,
    },

    /// Remove directories holding nothing but housekeeping files
    RemoveEmpties {
        /// Root directories (default: current directory)
        globs: Vec<String>,
    },

    /// Drop hash records of files that no longer exist
    PurgeMd5 {
        /// Root directories (default: current directory)
        globs: Vec<String>,
    },

    /// Merge keyword and rating metadata of source files into a target
    AppendMetadata {
        /// File that receives the merged metadata
        #[arg(required = true)]
        target: PathBuf,

        /// Files whose metadata is merged in
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },
}
