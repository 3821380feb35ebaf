use std::io::{self, Write};
use std::path::Path;

use crate::orph_core::error::{OrphError, Result};
use crate::orph_core::store::HashRecord;

/// Operator decision when a file's content hash no longer matches its
/// stored record and the full hashes differ too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Use the new digests for this run without updating the store.
    Ignore,
    /// Replace the stored record with the new digests.
    Overwrite,
    /// Leave the store alone and skip the file.
    Skip,
    /// End the session.
    Quit,
}

/// The interactive surface of the tool, separated from the decisions it
/// feeds so that operations stay testable with a scripted driver.
pub trait PromptDriver {
    /// Read one command line from the operator.
    fn read_command(&mut self, prompt: &str) -> Result<String>;

    /// Ask what to do about a hash mismatch.
    fn hash_conflict(
        &mut self,
        path: &Path,
        old: &HashRecord,
        new: &HashRecord,
    ) -> Result<ConflictChoice>;
}

/// Stdin/stdout implementation used by the CLI.
pub struct ConsolePrompt;

impl PromptDriver for ConsolePrompt {
    fn read_command(&mut self, prompt: &str) -> Result<String> {
        print!("{prompt}");
        io::stdout().flush()?;
        let mut input = String::new();
        let n = io::stdin().read_line(&mut input)?;
        if n == 0 {
            // stdin closed; treat like quitting at the prompt
            return Err(OrphError::UserQuit);
        }
        Ok(input.trim().to_string())
    }

    fn hash_conflict(
        &mut self,
        path: &Path,
        old: &HashRecord,
        new: &HashRecord,
    ) -> Result<ConflictChoice> {
        println!("\nHash mismatch for {}:", path.display());
        println!("  stored:   v{} {} (full {})", old.version, old.md5, old.full_md5);
        println!("  computed: v{} {} (full {})", new.version, new.md5, new.full_md5);
        loop {
            let answer = self.read_command("[i]gnore / [o]verwrite / [s]kip / [q]uit: ")?;
            match answer.to_lowercase().as_str() {
                "i" | "ignore" => return Ok(ConflictChoice::Ignore),
                "o" | "overwrite" => return Ok(ConflictChoice::Overwrite),
                "s" | "skip" => return Ok(ConflictChoice::Skip),
                "q" | "quit" => return Ok(ConflictChoice::Quit),
                _ => println!("Unrecognized answer '{answer}'"),
            }
        }
    }
}

/// Human-readable byte count, e.g. "1.5 MB".
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
