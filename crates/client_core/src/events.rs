//! Lifecycle notifications shared by all presenters.

use std::{collections::BTreeMap, sync::Arc};

use shared::{
    domain::ProfileId,
    protocol::{CurrentConnection, ParameterMap, PreferredConnector, ProfileOption, StateFlags},
};
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_BUS_CAPACITY: usize = 256;

/// Connection data handed to connector bindings other than serial.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionData {
    pub current: CurrentConnection,
    pub connector_parameters: BTreeMap<String, ParameterMap>,
    pub preferred: PreferredConnector,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DashboardEvent {
    SettingsUpdated,
    Connected,
    Disconnected,
    ConnectionsAutorefreshed,
    UserLoggedIn,
    UserLoggedOut,
    UserPermissionsChanged,
    AllViewModelsBound,
    StartupComplete,
    /// Current or history state pushed by the host.
    PrinterState(StateFlags),
    PrinterProfilesUpdated {
        profiles: Vec<ProfileOption>,
        current: Option<ProfileId>,
    },
    /// The user expanded (`true`) or collapsed the connection panel.
    ConnectionPanelToggled(bool),
    ConnectionDataReceived(Arc<ConnectionData>),
}

impl DashboardEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DashboardEvent::SettingsUpdated => "settings_updated",
            DashboardEvent::Connected => "connected",
            DashboardEvent::Disconnected => "disconnected",
            DashboardEvent::ConnectionsAutorefreshed => "connections_autorefreshed",
            DashboardEvent::UserLoggedIn => "user_logged_in",
            DashboardEvent::UserLoggedOut => "user_logged_out",
            DashboardEvent::UserPermissionsChanged => "user_permissions_changed",
            DashboardEvent::AllViewModelsBound => "all_view_models_bound",
            DashboardEvent::StartupComplete => "startup_complete",
            DashboardEvent::PrinterState(_) => "printer_state",
            DashboardEvent::PrinterProfilesUpdated { .. } => "printer_profiles_updated",
            DashboardEvent::ConnectionPanelToggled(_) => "connection_panel_toggled",
            DashboardEvent::ConnectionDataReceived(_) => "connection_data_received",
        }
    }
}

/// Fan-out of dashboard events to every subscribed presenter.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DashboardEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    /// Returns the number of subscribers that will see the event.
    pub fn publish(&self, event: DashboardEvent) -> usize {
        let name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(event = name, receivers, "dashboard event published");
                receivers
            }
            Err(_) => {
                debug!(event = name, "dashboard event dropped: no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/events_tests.rs"]
mod tests;
