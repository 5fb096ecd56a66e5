//! Small persisted key/value store with per-entry expiry.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub trait CookieStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str, max_age: Duration);
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CookieEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

fn expiry(now: DateTime<Utc>, max_age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| now.checked_add_signed(age))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub struct MemoryCookieStore {
    entries: Mutex<HashMap<String, CookieEntry>>,
    clock: Clock,
}

impl Default for MemoryCookieStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(Utc::now))
    }
}

impl MemoryCookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

impl CookieStore for MemoryCookieStore {
    fn get(&self, name: &str) -> Option<String> {
        let now = (self.clock)();
        let mut entries = self.entries.lock().ok()?;
        match entries.get(name) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(name);
                None
            }
            None => None,
        }
    }

    fn set(&self, name: &str, value: &str, max_age: Duration) {
        let expires_at = expiry((self.clock)(), max_age);
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                name.to_string(),
                CookieEntry {
                    value: value.to_string(),
                    expires_at,
                },
            );
        }
    }
}

/// JSON file backed store for hosts that outlive a single process run.
pub struct FileCookieStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, CookieEntry>>,
    clock: Clock,
}

impl FileCookieStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(Utc::now))
    }

    pub fn open_with_clock(path: impl Into<PathBuf>, clock: Clock) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read cookie file '{}'", path.display()))?;
            if raw.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&raw).with_context(|| {
                    format!("cookie file '{}' is not valid json", path.display())
                })?
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
            clock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, CookieEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create cookie directory '{}'", parent.display())
                })?;
            }
        }
        let raw = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, raw)
            .with_context(|| format!("failed to write cookie file '{}'", self.path.display()))
    }
}

impl CookieStore for FileCookieStore {
    fn get(&self, name: &str) -> Option<String> {
        let now = (self.clock)();
        let entries = self.entries.lock().ok()?;
        entries
            .get(name)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }

    fn set(&self, name: &str, value: &str, max_age: Duration) {
        let now = (self.clock)();
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            name.to_string(),
            CookieEntry {
                value: value.to_string(),
                expires_at: expiry(now, max_age),
            },
        );
        if let Err(err) = self.persist(&entries) {
            warn!(cookie = name, "failed to persist cookie: {err:#}");
        }
    }
}

#[cfg(test)]
#[path = "tests/cookies_tests.rs"]
mod tests;
