// Configuration: hand-parsed command-line flags with environment-variable
// fallback for host/port, plus resolution of the shared lock directory.

use crate::session::protocol::HeaderLayout;
use anyhow::{anyhow, bail, Context, Result};
use log::warn;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 52698;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub verbose: bool,
    pub force: bool,
    /// Accepted for compatibility with the wider remote-editor CLI surface;
    /// the session already blocks until close, so this is a no-op.
    pub wait: bool,
    pub new_window: bool,
    pub display_name: Option<String>,
    pub file_type: Option<String>,
    pub line: Option<u32>,
    pub layout: HeaderLayout,
    pub files: Vec<PathBuf>,
    pub help: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            verbose: false,
            force: false,
            wait: false,
            new_window: false,
            display_name: None,
            file_type: None,
            line: None,
            layout: HeaderLayout::Full,
            files: Vec::new(),
            help: false,
        }
    }
}

impl Config {
    /// Parse command-line arguments (without the program name), then apply
    /// environment-variable fallbacks.
    pub fn parse(args: impl Iterator<Item = String>) -> Result<Self> {
        let mut config = Self::from_args(args)?;
        config.apply_env(env::var("REMATE_HOST").ok(), env::var("REMATE_PORT").ok());
        Ok(config)
    }

    fn from_args(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut config = Self::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-v" | "--verbose" => config.verbose = true,
                "-f" | "--force" => config.force = true,
                "-w" | "--wait" => config.wait = true,
                "-n" | "--new-window" => config.new_window = true,
                "--minimal-headers" => config.layout = HeaderLayout::Minimal,
                "-h" | "--help" => config.help = true,
                "-H" | "--host" => config.host = expect_value(&arg, &mut args)?,
                "-p" | "--port" => {
                    let value = expect_value(&arg, &mut args)?;
                    config.port = value
                        .parse()
                        .with_context(|| format!("invalid port {value:?}"))?;
                }
                "-m" | "--name" => config.display_name = Some(expect_value(&arg, &mut args)?),
                "-t" | "--type" => config.file_type = Some(expect_value(&arg, &mut args)?),
                "-l" | "--line" => {
                    let value = expect_value(&arg, &mut args)?;
                    config.line = Some(
                        value
                            .parse()
                            .with_context(|| format!("invalid line number {value:?}"))?,
                    );
                }
                other if other.starts_with('-') => bail!("unknown option: {other}"),
                path => config.files.push(PathBuf::from(path)),
            }
        }

        Ok(config)
    }

    /// Environment variables apply only when the corresponding flag was
    /// left at its default.
    fn apply_env(&mut self, host: Option<String>, port: Option<String>) {
        if self.host == DEFAULT_HOST {
            if let Some(host) = host.filter(|h| !h.is_empty()) {
                self.host = host;
            }
        }

        if self.port == DEFAULT_PORT {
            if let Some(port) = port {
                match port.trim().parse() {
                    Ok(parsed) => self.port = parsed,
                    Err(_) => warn!("ignoring invalid REMATE_PORT value {port:?}"),
                }
            }
        }
    }
}

fn expect_value(flag: &str, args: &mut impl Iterator<Item = String>) -> Result<String> {
    args.next().ok_or_else(|| anyhow!("{flag} requires a value"))
}

/// Shared directory holding the per-path instance lock files.
/// `REMATE_LOCK_DIR` overrides (used by tests); on Linux `XDG_RUNTIME_DIR`
/// is preferred; otherwise falls back to the home directory.
pub fn lock_dir() -> PathBuf {
    if let Ok(dir) = env::var("REMATE_LOCK_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(runtime) = env::var("XDG_RUNTIME_DIR") {
            if !runtime.is_empty() {
                return PathBuf::from(runtime).join("remate").join("locks");
            }
        }
    }

    dirs::home_dir()
        .map(|home| home.join(".remate").join("locks"))
        .unwrap_or_else(|| env::temp_dir().join("remate-locks"))
}
