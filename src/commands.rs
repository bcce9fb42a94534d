//! Command-line interface definition for rbackup.
//!
//! This module defines the CLI commands and their arguments, and the handlers
//! that build the session configuration and run backup, restore, verify,
//! list and the informational commands.

use crate::archive::{ArchiveName, Archiver, ProgressCallback, TarGzArchiver};
use crate::config::{self, Config, Overrides};
use crate::destination::{self, Destination};
use crate::error::BackupError;
use crate::fs_util;
use crate::human::format_size;
use crate::logger::{self, SessionKind, SessionLog};
use crate::remote::OpenSsh;
use crate::retention;
use crate::session::{self, Context, SystemTools};
use crate::sysexits;
use crate::verify;
use anyhow::Context as _;
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::cell::Cell;
use std::env;
use std::ffi::OsString;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

/// Command-line interface definition for rbackup.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub commands: Option<Commands>,

    /// Configuration file to read instead of the default one.
    #[arg(long, global = true, env = "RBACKUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print diagnostics to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub overrides: OverrideArgs,
}

/// Settings that take precedence over the configuration file.
#[derive(Args, Debug, Default)]
pub struct OverrideArgs {
    /// Number of archives kept per destination.
    #[arg(long, global = true, env = "RBACKUP_RETENTION")]
    pub retention: Option<usize>,
    /// Minimum free space at a local destination, in MB.
    #[arg(long, global = true, env = "RBACKUP_MIN_FREE_MB")]
    pub min_free_mb: Option<u64>,
    /// Source size above which progress is shown, in MB.
    #[arg(long, global = true, env = "RBACKUP_PROGRESS_THRESHOLD_MB")]
    pub progress_threshold_mb: Option<u64>,
    /// Connectivity probe timeout, in seconds.
    #[arg(long, global = true, env = "RBACKUP_TIMEOUT")]
    pub timeout: Option<u64>,
    /// SSH port of remote destinations.
    #[arg(short, long, global = true, env = "RBACKUP_PORT")]
    pub port: Option<u16>,
    /// Directory for the per-day session logs.
    #[arg(long, global = true, env = "RBACKUP_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
    /// Directory for temporary archives.
    #[arg(long, global = true, env = "RBACKUP_STAGING_DIR")]
    pub staging_dir: Option<PathBuf>,
    /// Never show progress.
    #[arg(long, global = true)]
    pub no_progress: bool,
}

impl From<&OverrideArgs> for Overrides {
    fn from(args: &OverrideArgs) -> Self {
        Self {
            retention: args.retention,
            min_free_mb: args.min_free_mb,
            progress_threshold_mb: args.progress_threshold_mb,
            connect_timeout_secs: args.timeout,
            remote_port: args.port,
            log_dir: args.log_dir.clone(),
            staging_dir: args.staging_dir.clone(),
            no_progress: args.no_progress,
        }
    }
}

/// Supported rbackup commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Archive a directory and place the archive at a destination.
    Backup {
        /// Directory to back up.
        source: String,
        /// Local directory or user@host:path.
        destination: String,
    },
    /// Verify and extract an archive into a directory.
    Restore {
        /// Archive file, directory of archives, or user@host:path of either.
        archive: String,
        /// Directory to extract into.
        destination: String,
    },
    /// Check the integrity of an archive.
    Verify {
        /// Archive file.
        archive: String,
    },
    /// List the archives at a destination, newest first.
    List {
        /// Local directory or user@host:path.
        destination: String,
    },
    /// Print the session log file path for a day.
    LogPath {
        /// Kind of session.
        #[arg(value_enum)]
        kind: KindArg,
        /// Day as YYYY-MM-DD, today by default.
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Display the configuration file path and the effective configuration.
    Config,
}

impl Commands {
    /// The kind of session log this command writes, if any.
    pub fn session_kind(&self) -> Option<SessionKind> {
        match self {
            Commands::Backup { .. } => Some(SessionKind::Backup),
            Commands::Restore { .. } => Some(SessionKind::Restore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Backup,
    Restore,
}

impl From<KindArg> for SessionKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Backup => SessionKind::Backup,
            KindArg::Restore => SessionKind::Restore,
        }
    }
}

/// Builds the session configuration from the file and the overrides.
pub fn load_config(cli: &Cli) -> crate::error::Result<Config> {
    Config::load(cli.config.as_deref(), &Overrides::from(&cli.overrides))
}

/// Options that take a separate value argument.
const VALUE_FLAGS: &[&str] = &[
    "--config",
    "--retention",
    "--min-free-mb",
    "--progress-threshold-mb",
    "--timeout",
    "--port",
    "-p",
    "--log-dir",
    "--staging-dir",
    "--date",
    "-d",
];

/// What can still be read from a command line that failed to parse.
#[derive(Debug, Default, PartialEq)]
pub struct RawInvocation {
    pub kind: Option<SessionKind>,
    pub config: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl RawInvocation {
    /// Scans `args`, program name included, for the subcommand and the
    /// options that locate the session log.
    pub fn scan<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<String> = args
            .into_iter()
            .skip(1)
            .map(|arg| arg.into().to_string_lossy().into_owned())
            .collect();
        let mut raw = Self::default();
        let mut subcommand = None;
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
                _ => (arg.as_str(), None),
            };
            if flag.starts_with('-') {
                let value = if VALUE_FLAGS.contains(&flag) && inline.is_none() {
                    iter.next().cloned()
                } else {
                    inline
                };
                match flag {
                    "--config" => raw.config = value.map(PathBuf::from),
                    "--log-dir" => raw.log_dir = value.map(PathBuf::from),
                    _ => {}
                }
            } else if subcommand.is_none() {
                subcommand = Some(arg.as_str());
            }
        }
        raw.kind = match subcommand {
            Some("backup") => Some(SessionKind::Backup),
            Some("restore") => Some(SessionKind::Restore),
            _ => None,
        };
        raw
    }
}

/// Records a failure that happened before the session could start, as an
/// ERROR record followed by the NOTIFY failure record.
pub fn early_failure(kind: SessionKind, log_dir: &Path, err: BackupError) -> i32 {
    let mut log = SessionLog::open(log_dir, kind);
    session::conclude(&mut log, Err::<(), _>(err), |_| String::new())
}

/// Exit status for a configuration that failed to load.
///
/// Backup and restore record it in their session log.
pub fn config_failure(cli: &Cli, err: BackupError) -> i32 {
    match cli.commands.as_ref().and_then(Commands::session_kind) {
        Some(kind) => {
            let overrides = Overrides::from(&cli.overrides);
            let log_dir = Config::fallback_log_dir(cli.config.as_deref(), &overrides);
            early_failure(kind, &log_dir, err)
        }
        None => err.exit_code(),
    }
}

/// Exit status for a command line clap rejected.
///
/// Backup and restore record the error in their session log.
pub fn usage_failure(args: &[OsString], err: &clap::Error) -> i32 {
    let raw = RawInvocation::scan(args);
    let Some(kind) = raw.kind else {
        return sysexits::EX_USAGE;
    };
    let config = raw
        .config
        .or_else(|| env::var_os("RBACKUP_CONFIG").map(PathBuf::from));
    let overrides = Overrides {
        log_dir: raw
            .log_dir
            .or_else(|| env::var_os("RBACKUP_LOG_DIR").map(PathBuf::from)),
        ..Default::default()
    };
    let log_dir = Config::fallback_log_dir(config.as_deref(), &overrides);
    early_failure(kind, &log_dir, BackupError::Usage(usage_message(err)))
}

/// First line of a clap error, without its `error: ` prefix.
fn usage_message(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    first.strip_prefix("error: ").unwrap_or(first).trim().to_string()
}

/// Runs a backup session and returns the process exit status.
pub fn backup(config: &Config, source: &str, destination: &str) -> i32 {
    let source = fs_util::expand_home(source);
    let mut log = SessionLog::open(&config.log_dir, SessionKind::Backup);
    let tools = SystemTools::new(config);
    let progress = CliProgress::for_stderr();
    let ctx = Context {
        config,
        tools: tools.toolkit(),
        progress: progress.as_ref().map(|p| p as &dyn ProgressCallback),
    };

    let result = session::run_backup(&ctx, &source, destination, &mut log);
    session::conclude(&mut log, result, session::describe_backup)
}

/// Runs a restore session and returns the process exit status.
pub fn restore(config: &Config, archive: &str, destination: &str) -> i32 {
    let destination = fs_util::expand_home(destination);
    let mut log = SessionLog::open(&config.log_dir, SessionKind::Restore);
    let tools = SystemTools::new(config);
    let ctx = Context {
        config,
        tools: tools.toolkit(),
        progress: None,
    };

    let result = session::run_restore(&ctx, archive, &destination, &mut log);
    session::conclude(&mut log, result, session::describe_restore)
}

/// Verifies one archive and reports it on stdout.
pub fn verify(archive: &str) -> i32 {
    let path = fs_util::expand_home(archive);
    let result = if path.is_file() {
        verify::verify(&TarGzArchiver, &path)
    } else {
        Err(BackupError::ArchiveNotFound {
            path: path.display().to_string(),
        })
    };
    match result {
        Ok(verified) => {
            println!(
                "OK {} ({}, {} entries)",
                path.display(),
                format_size(verified.size()),
                verified.entries()
            );
            sysexits::EX_OK
        }
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}

/// Lists the archives at a destination, newest first.
pub fn list(config: &Config, destination: &str) -> anyhow::Result<()> {
    let archiver = TarGzArchiver;
    let extension = archiver.extension();
    match Destination::parse(destination, config.remote_port) {
        Destination::Local(dir) => {
            let archives = retention::local_archives(&dir, extension)
                .with_context(|| format!("cannot list {}", dir.display()))?;
            print_archives(&archives, |name| {
                std::fs::metadata(dir.join(name.to_string()))
                    .map(|m| format_size(m.len()))
                    .ok()
            });
        }
        Destination::Remote(target) => {
            let ssh = OpenSsh::new(config.connect_timeout());
            destination::probe_target(&target, config, &ssh)?;
            let archives = retention::remote_archives(&ssh, &target, extension)
                .with_context(|| format!("cannot list {target}"))?;
            print_archives(&archives, |_| None);
        }
    }
    Ok(())
}

fn print_archives(archives: &[ArchiveName], size_of: impl Fn(&ArchiveName) -> Option<String>) {
    if archives.is_empty() {
        println!("No archives found.");
        return;
    }
    for name in archives {
        let created = name.timestamp().format("%Y-%m-%d %H:%M:%S");
        match size_of(name) {
            Some(size) => println!("{name}  {created}  {size}"),
            None => println!("{name}  {created}"),
        }
    }
}

/// Prints the session log path for `kind` on `date`, today by default.
pub fn log_path(config: &Config, kind: KindArg, date: Option<NaiveDate>) {
    let date = date.unwrap_or_else(|| Local::now().date_naive());
    let path = logger::log_file_path(&config.log_dir, kind.into(), date);
    println!("{}", path.display());
}

/// Displays the configuration file path and the effective configuration.
pub fn config(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let file = cli.config.clone().unwrap_or_else(config::config_file);
    let state = if file.exists() { "" } else { " (not present)" };
    println!("config file: {}{state}", file.display());
    println!();
    print!("{}", config.to_toml().context("cannot render configuration")?);
    Ok(())
}

/// Maps a command failure to an exit status.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<BackupError>()
        .map(BackupError::exit_code)
        .unwrap_or(sysexits::EX_IOERR)
}

/// Progress line on stderr, redrawn at most once per percent.
pub struct CliProgress {
    total: Cell<u64>,
    last_percent: Cell<Option<u64>>,
}

impl CliProgress {
    /// Progress for interactive runs; `None` when stderr is not a terminal.
    pub fn for_stderr() -> Option<Self> {
        io::stderr().is_terminal().then(|| Self {
            total: Cell::new(0),
            last_percent: Cell::new(None),
        })
    }

    fn draw(&self, done: u64) {
        let total = self.total.get().max(1);
        let percent = (done.min(total) * 100) / total;
        if self.last_percent.get() == Some(percent) {
            return;
        }
        self.last_percent.set(Some(percent));
        let mut stderr = io::stderr().lock();
        let _ = write!(
            stderr,
            "\rArchiving: {percent:>3}% ({} of {})",
            format_size(done),
            format_size(self.total.get())
        );
        let _ = stderr.flush();
    }
}

impl ProgressCallback for CliProgress {
    fn on_started(&self, total_bytes: u64) {
        self.total.set(total_bytes);
        self.draw(0);
    }

    fn on_progress(&self, bytes_done: u64) {
        self.draw(bytes_done);
    }

    fn on_completed(&self) {
        self.draw(self.total.get());
        eprintln!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_backup() {
        let cli = Cli::try_parse_from([
            "rbackup",
            "--retention",
            "3",
            "backup",
            "/data",
            "bk@nas:/srv/backups",
            "--port",
            "2222",
        ])
        .unwrap();
        assert_eq!(cli.overrides.retention, Some(3));
        assert_eq!(cli.overrides.port, Some(2222));
        match cli.commands {
            Some(Commands::Backup {
                source,
                destination,
            }) => {
                assert_eq!(source, "/data");
                assert_eq!(destination, "bk@nas:/srv/backups");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_log_path_date() {
        let cli =
            Cli::try_parse_from(["rbackup", "log-path", "restore", "--date", "2026-03-09"]).unwrap();
        match cli.commands {
            Some(Commands::LogPath { kind, date }) => {
                assert!(matches!(kind, KindArg::Restore));
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 3, 9));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_port() {
        assert!(Cli::try_parse_from(["rbackup", "--port", "70000", "config"]).is_err());
    }

    #[test]
    fn test_overrides_from_args() {
        let args = OverrideArgs {
            timeout: Some(9),
            no_progress: true,
            ..Default::default()
        };
        let overrides = Overrides::from(&args);
        assert_eq!(overrides.connect_timeout_secs, Some(9));
        assert!(overrides.no_progress);
        assert!(overrides.retention.is_none());
    }

    #[test]
    fn test_scan_finds_session_and_log_dir() {
        let raw = RawInvocation::scan([
            "rbackup",
            "--config",
            "/etc/rbackup.toml",
            "--log-dir=/var/log/rbackup",
            "-p",
            "2222",
            "backup",
            "/data",
        ]);
        assert_eq!(
            raw,
            RawInvocation {
                kind: Some(SessionKind::Backup),
                config: Some(PathBuf::from("/etc/rbackup.toml")),
                log_dir: Some(PathBuf::from("/var/log/rbackup")),
            }
        );
    }

    #[test]
    fn test_scan_ignores_other_commands() {
        assert_eq!(RawInvocation::scan(["rbackup", "list"]).kind, None);
        assert_eq!(RawInvocation::scan(["rbackup", "--retention", "restore"]).kind, None);
        assert_eq!(
            RawInvocation::scan(["rbackup", "--verbose", "restore", "a.tar.gz"]).kind,
            Some(SessionKind::Restore)
        );
    }

    #[test]
    fn test_usage_message_is_one_line() {
        let err = Cli::try_parse_from(["rbackup", "backup", "/data"]).unwrap_err();
        let message = usage_message(&err);
        assert!(!message.is_empty());
        assert!(!message.contains('\n'));
        assert!(!message.starts_with("error:"));
    }

    #[test]
    fn test_exit_code_of_non_session_error() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(exit_code(&err), sysexits::EX_IOERR);
        let err = anyhow::Error::from(BackupError::config("bad"));
        assert_eq!(exit_code(&err), sysexits::EX_CONFIG);
    }
}
