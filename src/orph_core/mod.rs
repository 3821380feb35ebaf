// Core modules
pub mod cli;
pub mod context;
pub mod error;
pub mod filetype;
pub mod hash;
pub mod isobmff;
pub mod store;
pub mod view;

// Feature modules
pub mod dupe;
pub mod metadata;
pub mod trash;
pub mod traverse;
pub mod verbs;

// Re-exports for convenience
pub use cli::{Cli, Commands};
pub use context::Context;
pub use error::{OrphError, Result};
pub use store::{HashRecord, OrphdatSet};
pub use view::ConsolePrompt;
