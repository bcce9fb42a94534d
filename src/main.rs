use clap::Parser;
use rbackup::commands::{self, Cli, Commands};
use rbackup::sysexits;
use std::env;
use std::ffi::OsString;
use std::process;
use tracing_subscriber::EnvFilter;

/// Entry point for the rbackup CLI application.
/// Parses command-line arguments and dispatches to the appropriate command handler.
fn main() {
    let args: Vec<OsString> = env::args_os().collect();
    let cli = match Cli::try_parse_from(&args) {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            process::exit(commands::usage_failure(&args, &e));
        }
    };
    init_logging(cli.verbose);

    let Some(command) = cli.commands.as_ref() else {
        eprintln!("rbackup requires a command to execute. See 'rbackup --help' for usage.");
        process::exit(sysexits::EX_USAGE);
    };

    let config = match commands::load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            process::exit(commands::config_failure(&cli, e));
        }
    };

    let code = match command {
        Commands::Backup {
            source,
            destination,
        } => commands::backup(&config, source, destination),
        Commands::Restore {
            archive,
            destination,
        } => commands::restore(&config, archive, destination),
        Commands::Verify { archive } => commands::verify(archive),
        Commands::List { destination } => report(commands::list(&config, destination)),
        Commands::LogPath { kind, date } => {
            commands::log_path(&config, *kind, *date);
            sysexits::EX_OK
        }
        Commands::Config => report(commands::config(&cli, &config)),
    };
    process::exit(code);
}

fn report(result: anyhow::Result<()>) -> i32 {
    match result {
        Ok(()) => sysexits::EX_OK,
        Err(e) => {
            eprintln!("Error: {e:#}");
            commands::exit_code(&e)
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
