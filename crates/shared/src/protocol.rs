use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::{ActionSource, ConnectorId, ProfileId};

/// Parameter name to advertised (or chosen) value, as sent by the host.
pub type ParameterMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOptionsResponse {
    #[serde(default)]
    pub current: CurrentConnection,
    #[serde(default)]
    pub options: ConnectionOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<ConnectorId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: ParameterMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer_profile: Option<ProfileId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    #[serde(default)]
    pub connectors: Vec<ConnectorDescriptor>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub preferred_connector: PreferredConnector,
    #[serde(default)]
    pub printer_profiles: Vec<ProfileOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_profile: Option<ProfileId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorDescriptor {
    pub connector: ConnectorId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: ParameterMap,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreferredConnector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<ConnectorId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: ParameterMap,
}

/// Hosts report printer profiles either as bare ids or as `{id, name}` entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProfileOption {
    Id(ProfileId),
    Entry {
        id: ProfileId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl ProfileOption {
    pub fn id(&self) -> &ProfileId {
        match self {
            ProfileOption::Id(id) => id,
            ProfileOption::Entry { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ProfileOption::Entry {
                name: Some(name), ..
            } => name,
            _ => self.id().as_str(),
        }
    }
}

/// Reads a single parameter value as text. Numbers are rendered in decimal.
pub fn parameter_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub fn parameter_as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Option list advertised for `key`, skipping entries that are not text.
pub fn string_options(parameters: &ParameterMap, key: &str) -> Vec<String> {
    match parameters.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(parameter_as_string).collect(),
        _ => Vec::new(),
    }
}

pub fn u32_options(parameters: &ParameterMap, key: &str) -> Vec<u32> {
    match parameters.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(parameter_as_u32).collect(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ConnectionCommand {
    Connect(ConnectRequest),
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub connector: ConnectorId,
    pub parameters: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer_profile: Option<ProfileId>,
    pub autoconnect: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StateFlags {
    pub closed_or_error: bool,
    pub operational: bool,
    pub paused: bool,
    pub printing: bool,
    pub error: bool,
    pub ready: bool,
    pub loading: bool,
    pub cancelling: bool,
    pub pausing: bool,
    pub resuming: bool,
    pub finishing: bool,
    pub sd_ready: bool,
}

impl Default for StateFlags {
    /// No connection is known yet, so the snapshot reads as closed.
    fn default() -> Self {
        Self {
            closed_or_error: true,
            operational: false,
            paused: false,
            printing: false,
            error: false,
            ready: false,
            loading: false,
            cancelling: false,
            pausing: false,
            resuming: false,
            finishing: false,
            sd_ready: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrinterStateSnapshot {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub flags: StateFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `GET /api/printer`; only the state section is read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrinterStatusResponse {
    #[serde(default)]
    pub state: PrinterStateSnapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemCommandsResponse {
    #[serde(default)]
    pub core: Vec<SystemCommand>,
    #[serde(default)]
    pub plugin: Vec<SystemCommand>,
    #[serde(default)]
    pub custom: Vec<SystemCommand>,
}

impl SystemCommandsResponse {
    pub fn group(&self, source: ActionSource) -> &[SystemCommand] {
        match source {
            ActionSource::Core => &self.core,
            ActionSource::Plugin => &self.plugin,
            ActionSource::Custom => &self.custom,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemCommand {
    pub action: String,
    #[serde(default)]
    pub name: String,
    #[serde(
        default,
        deserialize_with = "confirm_message",
        skip_serializing_if = "Option::is_none"
    )]
    pub confirm: Option<String>,
    #[serde(default, rename = "async")]
    pub is_async: bool,
    #[serde(default)]
    pub ignore: bool,
}

/// `confirm` is either a prompt text or `false`/absent for no prompt.
fn confirm_message<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) if !text.is_empty() => Some(text),
        _ => None,
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartupResponse {
    #[serde(default)]
    pub startup: StartupNotices,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartupNotices {
    #[serde(
        default,
        alias = "flaggedBaseFolders",
        deserialize_with = "null_as_default"
    )]
    pub flagged_basefolders: BTreeMap<String, String>,
    #[serde(default, alias = "pythonEol", skip_serializing_if = "Option::is_none")]
    pub python_eol: Option<PythonEolNotice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PythonEolNotice {
    pub version: String,
    pub date: String,
    #[serde(default)]
    pub soon: bool,
    #[serde(
        default,
        alias = "last_octoprint",
        alias = "lastSupportingRelease",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_supporting_release: Option<String>,
}

impl PythonEolNotice {
    /// Acknowledgment token; a change of either part re-arms the notice.
    pub fn token(&self) -> String {
        format!("{};{}", self.version, self.date)
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
