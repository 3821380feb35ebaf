use anyhow::Context as _;
use clap::Parser;
use orph::orph_core::{Cli, Commands, ConsolePrompt, Context, dupe, verbs};
use simplelog::{CombinedLogger, Config, LevelFilter, SharedLogger, TermLogger, WriteLogger};
use std::fs::File;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    // Parse CLI arguments first to determine logging setup
    let cli = Cli::parse();

    // Initialize loggers
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![];

    // TermLogger is always added with the 'Warn' level filter.
    loggers.push(TermLogger::new(
        LevelFilter::Warn,
        Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    ));

    // If the --log argument is passed with a filepath, add a WriteLogger.
    if let Some(log_path) = &cli.log {
        loggers.push(WriteLogger::new(
            cli.log_level, // The level is set by the --log-level argument.
            Config::default(),
            File::create(log_path)
                .with_context(|| format!("failed to create log file {}", log_path.display()))?,
        ));
    }

    CombinedLogger::init(loggers).context("failed to initialize logging")?;

    let mut ctx = Context::new();
    ctx.repeat_commands = !cli.no_repeat;
    let mut prompt = ConsolePrompt;

    let result = match &cli.command {
        Commands::CheckHash { globs } => verbs::check_hash(&mut ctx, &mut prompt, globs),
        Commands::VerifyHash { globs } => verbs::verify_hash(&mut ctx, globs),
        Commands::FindDupeFiles { by_name, globs } => {
            dupe::find_dupe_files(&mut ctx, &mut prompt, globs, *by_name)
        }
        Commands::CollectTrash { globs } => verbs::collect_trash(&mut ctx, globs),
        Commands::RestoreTrash { globs } => verbs::restore_trash(&mut ctx, globs),
        Commands::RemoveEmpties { globs } => verbs::remove_empties(&mut ctx, globs),
        Commands::PurgeMd5 { globs } => verbs::purge_md5(&mut ctx, globs),
        Commands::AppendMetadata { target, sources } => {
            verbs::append_metadata(&mut ctx, target, sources)
        }
    };

    Ok(match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_user_quit() => {
            println!("Quit.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    })
}
