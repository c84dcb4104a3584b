use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use super::config::{CollectorConfig, DEFAULT_DEVICE_NAME};
use crate::error::CliConfigError;

const CONFIRMED_FILE_NAME: &str = "readings.txt";
const PENDING_FILE_NAME: &str = "newreadings.txt";

/// Command-line options for the pepperoni collector.
#[derive(Debug, Parser)]
#[command(
    name = "pepperoni",
    about = "Collect sessions from a pepperoni BLE logger and forward them to a server."
)]
pub struct Args {
    /// Exact local name advertised by the logger.
    #[arg(long, global = true, default_value = DEFAULT_DEVICE_NAME)]
    device_name: String,
    /// Base URL of the collector; sessions are posted to `<URL>/pepperoni/`.
    #[arg(long, global = true)]
    server: Option<String>,
    /// Confirmed session store. Defaults to the platform data directory.
    #[arg(long, global = true, value_name = "PATH")]
    readings: Option<PathBuf>,
    /// Pending session store. Defaults to the platform data directory.
    #[arg(long, global = true, value_name = "PATH")]
    new_readings: Option<PathBuf>,
    /// Erase device storage once the oldest fetched session is three days old.
    #[arg(long, global = true)]
    clear: bool,
    /// Debug logging, including every line the device prints.
    #[arg(long, global = true)]
    debug: bool,
    /// Query the firmware version on the first successful connection.
    #[arg(long, global = true)]
    diagnostics: bool,
    /// Maximum discovery scan time (e.g. `60s`, `2m`).
    #[arg(long, global = true, default_value = "60s", value_parser = parse_duration)]
    scan_window: Duration,
    #[command(subcommand)]
    command: Option<Command>,
}

impl Args {
    /// Splits parsed arguments into the command and the collector settings.
    ///
    /// ```
    /// use clap::Parser;
    ///
    /// let args = pepperoni::Args::try_parse_from([
    ///     "pepperoni",
    ///     "--server",
    ///     "http://collector.local",
    ///     "--readings",
    ///     "/tmp/readings.txt",
    ///     "--new-readings",
    ///     "/tmp/newreadings.txt",
    ///     "once",
    /// ])?;
    /// let (command, config) = args.into_command_and_config()?;
    /// assert_eq!(pepperoni::Command::Once, command);
    /// assert_eq!("http://collector.local", config.server());
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when no server is given, or a store path is omitted
    /// and the platform has no data directory.
    pub fn into_command_and_config(self) -> anyhow::Result<(Command, CollectorConfig)> {
        let Args {
            device_name,
            server,
            readings,
            new_readings,
            clear,
            debug,
            diagnostics,
            scan_window,
            command,
        } = self;

        let server = server.ok_or(CliConfigError::MissingServer)?;
        let confirmed_path = resolve_store_path(readings, CONFIRMED_FILE_NAME)?;
        let pending_path = resolve_store_path(new_readings, PENDING_FILE_NAME)?;

        let config = CollectorConfig::builder()
            .device_name(device_name)
            .server(server)
            .confirmed_path(confirmed_path)
            .pending_path(pending_path)
            .clear_enabled(clear)
            .debug(debug)
            .diagnostics(diagnostics)
            .scan_window(scan_window)
            .build();

        Ok((command.unwrap_or_default(), config))
    }
}

/// Supported collector commands.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Subcommand)]
pub enum Command {
    /// Poll the logger forever, collecting and forwarding new sessions.
    #[default]
    Run,
    /// Run a single collection cycle, then exit.
    Once,
    /// Merge and upload an outstanding pending store without contacting the logger.
    Flush,
}

fn resolve_store_path(
    explicit: Option<PathBuf>,
    file_name: &str,
) -> Result<PathBuf, CliConfigError> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    let project_dirs = ProjectDirs::from("org", "pepperoni", "pepperoni")
        .ok_or(CliConfigError::MissingDataDirectory)?;
    Ok(project_dirs.data_dir().join(file_name))
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(arguments: &[&str]) -> anyhow::Result<(Command, CollectorConfig)> {
        let mut all = vec!["pepperoni"];
        all.extend_from_slice(arguments);
        Args::try_parse_from(all)?.into_command_and_config()
    }

    #[test]
    fn run_is_the_default_command() -> anyhow::Result<()> {
        let (command, config) = parse(&[
            "--server",
            "http://collector.local",
            "--readings",
            "r.txt",
            "--new-readings",
            "n.txt",
        ])?;

        assert_eq!(Command::Run, command);
        assert_eq!("peppe", config.device_name());
        assert_eq!(Duration::from_secs(60), config.scan_window());
        assert!(!config.clear_enabled());
        assert!(!config.debug());
        Ok(())
    }

    #[test]
    fn flags_map_onto_config() -> anyhow::Result<()> {
        let (command, config) = parse(&[
            "flush",
            "--server",
            "http://collector.local",
            "--device-name",
            "kitchen",
            "--readings",
            "r.txt",
            "--new-readings",
            "n.txt",
            "--clear",
            "--debug",
            "--diagnostics",
            "--scan-window",
            "2m",
        ])?;

        assert_eq!(Command::Flush, command);
        assert_eq!("kitchen", config.device_name());
        assert_eq!(Path::new("r.txt"), config.confirmed_path());
        assert_eq!(Path::new("n.txt"), config.pending_path());
        assert!(config.clear_enabled());
        assert!(config.debug());
        assert!(config.diagnostics());
        assert_eq!(Duration::from_secs(120), config.scan_window());
        Ok(())
    }

    #[test]
    fn server_is_required() {
        let result = parse(&["--readings", "r.txt", "--new-readings", "n.txt"]);

        let error = result.expect_err("missing --server should be rejected");
        assert_matches!(
            error.downcast_ref::<CliConfigError>(),
            Some(CliConfigError::MissingServer)
        );
    }

    #[test]
    fn invalid_scan_window_fails_parsing() {
        let result = Args::try_parse_from(["pepperoni", "--scan-window", "soon"]);
        assert!(result.is_err());
    }
}
