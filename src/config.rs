use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use serde::Deserialize;
use tracing::info;

use crate::switch::{ReentrancyPolicy, SwitchSettings};

// ─── Embedded Default ────────────────────────────────────────────────────
/// Baked into the binary at compile time; always available as the base layer.
const DEFAULT_CONFIG_TOML: &str = include_str!("../default_config.toml");

// ─── CLI Arguments (override layer) ─────────────────────────────────────
/// Switch to a saved WiFi network and verify it with one HTTP request
#[derive(Parser, Debug, Clone)]
#[command(name = "nexus-hop", version, about, long_about = None)]
pub struct CliArgs {
    /// Path to a custom config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log file path (overrides config file; stderr when unset)
    #[arg(long, global = true)]
    pub log: Option<PathBuf>,

    /// Log level filter (overrides config file)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// WiFi interface to use (overrides config file)
    #[arg(short, long, global = true)]
    pub interface: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Switch to a saved network, then fetch URL over it
    Switch {
        /// SSID of a previously connected network
        ssid: String,

        /// URL to fetch once bound (defaults to verify.default_url)
        url: Option<String>,

        /// Seconds to wait for the network (0 = forever)
        #[arg(long)]
        bind_timeout: Option<u64>,

        /// Print the attempt as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the active WiFi connection
    Status,
    /// List saved WiFi networks
    List {
        #[arg(long)]
        json: bool,
    },
    /// Follow connectivity changes until interrupted
    Watch,
    /// Print the default config to stdout and exit
    PrintDefaultConfig,
}

// ─── TOML Structs ───────────────────────────────────────────────────────

/// Root configuration, parsed from TOML then overridden by CLI flags.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub switch: SwitchConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// WiFi interface (empty string = auto-detect)
    pub interface: String,
    pub log_level: String,
    /// Empty = log to stderr
    pub log_file: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    /// 0 = wait forever
    pub bind_timeout_secs: u64,
    pub reentrancy: ReentrancyPolicy,
    pub make_preferred: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
    pub default_url: String,
    /// 0 = no timeout
    pub request_timeout_secs: u64,
}

// ─── Defaults ───────────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG_TOML)
            .expect("BUG: embedded default_config.toml is invalid TOML")
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            log_level: "info".into(),
            log_file: String::new(),
        }
    }
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            bind_timeout_secs: 0,
            reentrancy: ReentrancyPolicy::Reject,
            make_preferred: true,
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            default_url: String::new(),
            request_timeout_secs: 30,
        }
    }
}

// ─── Path Resolution ────────────────────────────────────────────────────

impl Config {
    /// Standard config file path: ~/.config/nexus-hop/config.toml
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nexus-hop")
            .join("config.toml")
    }

    /// Interface as Option<&str> (empty = None)
    pub fn interface(&self) -> Option<&str> {
        non_empty(&self.general.interface)
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        non_empty(&self.general.log_file).map(PathBuf::from)
    }

    pub fn default_url(&self) -> Option<&str> {
        non_empty(&self.verify.default_url)
    }

    pub fn bind_timeout(&self) -> Option<Duration> {
        secs_or_none(self.switch.bind_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        secs_or_none(self.verify.request_timeout_secs)
    }

    pub fn switch_settings(&self) -> SwitchSettings {
        SwitchSettings {
            bind_timeout: self.bind_timeout(),
            reentrancy: self.switch.reentrancy,
            make_preferred: self.switch.make_preferred,
        }
    }

    /// Apply flags that only make sense for a given subcommand
    pub fn apply_command(&mut self, command: &Command) {
        if let Command::Switch {
            bind_timeout: Some(secs),
            ..
        } = command
        {
            self.switch.bind_timeout_secs = *secs;
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    if s.is_empty() { None } else { Some(s) }
}

fn secs_or_none(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

// ─── Bootloader ─────────────────────────────────────────────────────────

/// The single entry point for configuration. Called once at startup.
///
/// The config file is created with defaults when missing, parsed, and
/// then overridden by CLI flags.
pub fn load(cli: &CliArgs) -> Result<Config> {
    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);

    if !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).wrap_err_with(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&config_path, DEFAULT_CONFIG_TOML).wrap_err_with(|| {
            format!(
                "Failed to write default config to {}",
                config_path.display()
            )
        })?;
        info!("Created default config at {}", config_path.display());
    }

    let toml_str = std::fs::read_to_string(&config_path)
        .wrap_err_with(|| format!("Failed to read config from {}", config_path.display()))?;

    let mut config = parse(&toml_str).wrap_err_with(|| {
        format!(
            "Failed to parse config at {}.\n\
             Delete the file to regenerate defaults, or run:\n  \
             nexus-hop print-default-config > {:?}",
            config_path.display(),
            config_path
        )
    })?;

    // ── CLI overrides ───────────────────────────────────────────────
    if let Some(ref iface) = cli.interface {
        config.general.interface = iface.clone();
    }
    if let Some(ref level) = cli.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(ref path) = cli.log {
        config.general.log_file = path.display().to_string();
    }
    config.apply_command(&cli.command);

    Ok(config)
}

fn parse(toml_str: &str) -> std::result::Result<Config, toml::de::Error> {
    toml::from_str(toml_str)
}

pub fn default_config_toml() -> &'static str {
    DEFAULT_CONFIG_TOML
}
