use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "hostctl.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_url: String,
    pub api_key: Option<String>,
    pub cookie_file: PathBuf,
    pub request_timeout_secs: u64,
    pub ignore_empty_ports: bool,
    pub autoconnect: bool,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
            api_key: None,
            cookie_file: PathBuf::from("hostctl-cookies.json"),
            request_timeout_secs: 10,
            ignore_empty_ports: false,
            autoconnect: false,
            log_filter: "info".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    server_url: Option<String>,
    api_key: Option<String>,
    cookie_file: Option<PathBuf>,
    request_timeout_secs: Option<u64>,
    ignore_empty_ports: Option<bool>,
    autoconnect: Option<bool>,
    log_filter: Option<String>,
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    fn apply_file(&mut self, raw: &str) -> anyhow::Result<()> {
        let file: FileSettings = toml::from_str(raw)?;
        if let Some(v) = file.server_url {
            self.server_url = v;
        }
        if let Some(v) = file.api_key {
            self.api_key = Some(v);
        }
        if let Some(v) = file.cookie_file {
            self.cookie_file = v;
        }
        if let Some(v) = file.request_timeout_secs {
            self.request_timeout_secs = v;
        }
        if let Some(v) = file.ignore_empty_ports {
            self.ignore_empty_ports = v;
        }
        if let Some(v) = file.autoconnect {
            self.autoconnect = v;
        }
        if let Some(v) = file.log_filter {
            self.log_filter = v;
        }
        Ok(())
    }

    /// `HOSTCTL_*` first, then `APP__*`, so the latter wins when both are set.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| {
            lookup(&format!("APP__{name}")).or_else(|| lookup(&format!("HOSTCTL_{name}")))
        };

        if let Some(v) = var("SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = var("API_KEY") {
            self.api_key = Some(v);
        }
        if let Some(v) = var("COOKIE_FILE") {
            self.cookie_file = PathBuf::from(v);
        }
        if let Some(v) = var("REQUEST_TIMEOUT_SECS") {
            if let Ok(parsed) = v.trim().parse::<u64>() {
                self.request_timeout_secs = parsed;
            }
        }
        if let Some(v) = var("IGNORE_EMPTY_PORTS") {
            if let Some(parsed) = parse_flag(&v) {
                self.ignore_empty_ports = parsed;
            }
        }
        if let Some(v) = var("AUTOCONNECT") {
            if let Some(parsed) = parse_flag(&v) {
                self.autoconnect = parsed;
            }
        }
        if let Some(v) = var("LOG") {
            self.log_filter = v;
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Defaults, then the config file when present, then the environment.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

fn load_settings_with(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => settings
            .apply_file(&raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()))
        }
    }

    settings.apply_env(lookup);
    Ok(settings)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
