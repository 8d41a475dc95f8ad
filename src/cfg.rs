//! Daemon configuration: config file, CLI flags, and the few values that can
//! be live-reloaded on `SIGHUP` (spec §6).

use std::path::{Path, PathBuf};

use clap::Parser;

use crate::algo::MetaParams;
use crate::error::{ClockError, Result};

/// `-x`/`verbose` level (spec §6): how much the daemon logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerboseLevel {
    Quiet,
    Normal,
    High,
}

impl Default for VerboseLevel {
    fn default() -> Self {
        VerboseLevel::Normal
    }
}

impl VerboseLevel {
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "0" | "quiet" => Ok(VerboseLevel::Quiet),
            "1" | "normal" => Ok(VerboseLevel::Normal),
            "2" | "high" => Ok(VerboseLevel::High),
            other => Err(ClockError::Config(format!("invalid verbose level: {other}"))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub poll_period: u64,
    pub ttl: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { host: String::new(), poll_period: 16, ttl: 64 }
    }
}

/// CLI flags (spec §6), layered over the config file: any flag present on
/// the command line overrides the corresponding config-file key.
#[derive(Parser, Debug, Default)]
#[command(name = "radclockd", about = "Feed-forward NTP time synchronization daemon")]
pub struct Cli {
    /// Path to the config file.
    #[arg(short = 'c', long = "conf")]
    pub conf: Option<PathBuf>,

    /// One or more upstream NTP servers, overriding the config file's `server` keys.
    #[arg(short = 'e', long = "server")]
    pub server: Vec<String>,

    /// Polling period in seconds, overriding the config file's `poll_period` key.
    #[arg(short = 'p', long = "poll")]
    pub poll_period: Option<u64>,

    /// Verbosity: 0 (quiet), 1 (normal), 2 (high).
    #[arg(short = 'x', long = "verbose")]
    pub verbose: Option<String>,

    /// Replay stamps from an ASCII stamp file instead of querying the network.
    #[arg(short = 'a', long = "ascii-replay")]
    pub ascii_replay: Option<PathBuf>,

    /// Run in the foreground instead of daemonizing.
    #[arg(short = 'f', long = "foreground")]
    pub foreground: bool,
}

/// Fully resolved daemon configuration (config file + CLI overrides).
#[derive(Clone, Debug)]
pub struct Config {
    pub servers: Vec<ServerConfig>,
    pub verbose: VerboseLevel,
    pub sms_path: PathBuf,
    pub leap_table_path: Option<PathBuf>,
    pub ascii_replay: Option<PathBuf>,
    pub temperature_quality: String,
    pub foreground: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            servers: Vec::new(),
            verbose: VerboseLevel::default(),
            sms_path: PathBuf::from("/var/run/radclock/radclock.sms"),
            leap_table_path: None,
            ascii_replay: None,
            temperature_quality: "good".to_string(),
            foreground: false,
        }
    }
}

impl Config {
    /// Parse a `key = value` config file (spec §6). Blank lines and lines
    /// starting with `#` are ignored; `server` may repeat.
    pub fn from_file(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)?;
        let mut cfg = Config::default();
        let mut servers: Vec<ServerConfig> = Vec::new();

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                ClockError::Config(format!("{}:{}: missing '=' in '{}'", path.display(), lineno + 1, raw))
            })?;
            let key = key.trim();
            let value = value.trim();
            match key {
                "server" => servers.push(ServerConfig { host: value.to_string(), ..ServerConfig::default() }),
                "poll_period" => {
                    let period: u64 = value
                        .parse()
                        .map_err(|_| ClockError::Config(format!("invalid poll_period: {value}")))?;
                    if let Some(last) = servers.last_mut() {
                        last.poll_period = period;
                    }
                }
                "verbose" => cfg.verbose = VerboseLevel::from_str(value)?,
                "sms_path" => cfg.sms_path = PathBuf::from(value),
                "leap_table_path" => cfg.leap_table_path = Some(PathBuf::from(value)),
                "temperature_quality" => cfg.temperature_quality = value.to_string(),
                _ => { /* unknown keys are ignored, matching the original daemon's tolerance */ }
            }
        }

        cfg.servers = servers;
        Ok(cfg)
    }

    /// Merge CLI overrides on top of a parsed config file (or the defaults,
    /// if no `--conf` was given).
    pub fn apply_cli(mut self, cli: &Cli) -> Result<Config> {
        if !cli.server.is_empty() {
            self.servers = cli
                .server
                .iter()
                .map(|host| ServerConfig { host: host.clone(), ..ServerConfig::default() })
                .collect();
        }
        if let Some(poll) = cli.poll_period {
            for s in &mut self.servers {
                s.poll_period = poll;
            }
        }
        if let Some(v) = &cli.verbose {
            self.verbose = VerboseLevel::from_str(v)?;
        }
        if let Some(path) = &cli.ascii_replay {
            self.ascii_replay = Some(path.clone());
        }
        self.foreground = self.foreground || cli.foreground;

        if self.servers.is_empty() && self.ascii_replay.is_none() {
            return Err(ClockError::Config("no servers configured and no ascii-replay file given".into()));
        }
        Ok(self)
    }

    pub fn load(cli: &Cli) -> Result<Config> {
        let base = match &cli.conf {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        base.apply_cli(cli)
    }

    /// Maps `temperature_quality` (spec §6) onto the [`MetaParams`] preset it
    /// selects. Unrecognized values fall back to `GOOD`, matching the
    /// unknown-config-key tolerance in [`Config::from_file`].
    pub fn meta_params(&self) -> MetaParams {
        match self.temperature_quality.to_lowercase().as_str() {
            "excellent" => MetaParams::EXCELLENT,
            "poor" => MetaParams::POOR,
            _ => MetaParams::GOOD,
        }
    }
}

/// Subset of config keys honored on `SIGHUP` (spec §6): servers, verbosity,
/// and poll periods can change live; the counter oracle and SMS path cannot.
pub fn reload(current: &mut Config, path: &Path) -> Result<()> {
    let fresh = Config::from_file(path)?;
    current.servers = fresh.servers;
    current.verbose = fresh.verbose;
    current.temperature_quality = fresh.temperature_quality;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_servers_and_overrides_poll_period() {
        let dir = std::env::temp_dir().join(format!("radclock-cfg-test-{}", uuid::Uuid::new_v4()));
        std::fs::write(&dir, "server = time.example.org\npoll_period = 4\nverbose = high\n").unwrap();
        let cfg = Config::from_file(&dir).unwrap();
        std::fs::remove_file(&dir).ok();

        assert_eq!(cfg.servers.len(), 1);
        assert_eq!(cfg.servers[0].host, "time.example.org");
        assert_eq!(cfg.servers[0].poll_period, 4);
        assert_eq!(cfg.verbose, VerboseLevel::High);
    }

    #[test]
    fn rejects_malformed_line() {
        let dir = std::env::temp_dir().join(format!("radclock-cfg-test-{}", uuid::Uuid::new_v4()));
        std::fs::write(&dir, "not a valid line\n").unwrap();
        let err = Config::from_file(&dir);
        std::fs::remove_file(&dir).ok();
        assert!(err.is_err());
    }
}
