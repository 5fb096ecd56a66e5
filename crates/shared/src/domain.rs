use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(ConnectorId);
id_newtype!(ProfileId);

/// Connector with first-class presenter support.
pub const SERIAL_CONNECTOR: &str = "serial";

impl ConnectorId {
    pub fn serial() -> Self {
        Self::new(SERIAL_CONNECTOR)
    }

    pub fn is_serial(&self) -> bool {
        self.0 == SERIAL_CONNECTOR
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Connection,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    Core,
    Plugin,
    Custom,
}

impl ActionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionSource::Core => "core",
            ActionSource::Plugin => "plugin",
            ActionSource::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action source '{0}', expected core, plugin or custom")]
pub struct UnknownActionSource(pub String);

impl FromStr for ActionSource {
    type Err = UnknownActionSource;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "core" => Ok(ActionSource::Core),
            "plugin" => Ok(ActionSource::Plugin),
            "custom" => Ok(ActionSource::Custom),
            _ => Err(UnknownActionSource(raw.to_string())),
        }
    }
}

impl fmt::Display for ActionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
