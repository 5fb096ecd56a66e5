use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{ActionSource, ConnectorId, Permission},
    protocol::{
        ConnectRequest, ConnectionOptionsResponse, StartupNotices, SystemCommandsResponse,
    },
};
use tracing::debug;

pub mod api;
pub mod auth;
pub mod connection;
pub mod cookies;
pub mod error;
pub mod events;
pub mod notify;
pub mod system;

pub use api::HttpApiClient;
pub use auth::LoginState;
pub use connection::{ConnectOutcome, ConnectionPresenter, ConnectionViewState};
pub use cookies::{CookieStore, FileCookieStore, MemoryCookieStore};
pub use error::{CommandError, PresenterError, RequestError};
pub use events::{ConnectionData, DashboardEvent, EventBus};
pub use notify::{
    ConfirmationPrompt, ConfirmationRequest, MissingConfirmationPrompt, Notification,
    NotificationId, NotificationKind, Notifier, TracingNotifier,
};
pub use system::{CommandOutcome, SystemAction, SystemActionsPresenter, SystemViewState};

pub trait AuthGate: Send + Sync {
    fn has_permission(&self, permission: Permission) -> bool;
}

#[async_trait]
pub trait ConnectionApi: Send + Sync {
    async fn get_options(&self) -> Result<ConnectionOptionsResponse, RequestError>;
    async fn connect(&self, request: ConnectRequest) -> Result<(), RequestError>;
    async fn disconnect(&self) -> Result<(), RequestError>;
}

#[async_trait]
pub trait SystemApi: Send + Sync {
    async fn get_commands(&self) -> Result<SystemCommandsResponse, RequestError>;
    async fn get_startup_notices(&self) -> Result<StartupNotices, RequestError>;
    async fn execute_command(&self, source: ActionSource, action: &str)
        -> Result<(), RequestError>;
}

pub struct MissingConnectionApi;

#[async_trait]
impl ConnectionApi for MissingConnectionApi {
    async fn get_options(&self) -> Result<ConnectionOptionsResponse, RequestError> {
        Err(RequestError::Unavailable(
            "connection api is unavailable".to_string(),
        ))
    }

    async fn connect(&self, request: ConnectRequest) -> Result<(), RequestError> {
        Err(RequestError::Unavailable(format!(
            "connection api is unavailable; cannot connect via {}",
            request.connector
        )))
    }

    async fn disconnect(&self) -> Result<(), RequestError> {
        Err(RequestError::Unavailable(
            "connection api is unavailable".to_string(),
        ))
    }
}

pub struct MissingSystemApi;

#[async_trait]
impl SystemApi for MissingSystemApi {
    async fn get_commands(&self) -> Result<SystemCommandsResponse, RequestError> {
        Err(RequestError::Unavailable("system api is unavailable".to_string()))
    }

    async fn get_startup_notices(&self) -> Result<StartupNotices, RequestError> {
        Err(RequestError::Unavailable("system api is unavailable".to_string()))
    }

    async fn execute_command(
        &self,
        source: ActionSource,
        action: &str,
    ) -> Result<(), RequestError> {
        Err(RequestError::Unavailable(format!(
            "system api is unavailable; cannot run {source}/{action}"
        )))
    }
}

/// Settings owned by other parts of the dashboard that the connection
/// presenter reads or refreshes.
#[async_trait]
pub trait DashboardSettings: Send + Sync {
    fn ignore_empty_ports(&self) -> bool;
    fn autoconnect(&self) -> bool;
    async fn request_settings(&self) -> Result<()>;
    async fn request_printer_profiles(&self) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StaticSettings {
    pub ignore_empty_ports: bool,
    pub autoconnect: bool,
}

#[async_trait]
impl DashboardSettings for StaticSettings {
    fn ignore_empty_ports(&self) -> bool {
        self.ignore_empty_ports
    }

    fn autoconnect(&self) -> bool {
        self.autoconnect
    }

    async fn request_settings(&self) -> Result<()> {
        Ok(())
    }

    async fn request_printer_profiles(&self) -> Result<()> {
        Ok(())
    }
}

/// Collapsible panel hosting the connection controls.
pub trait ConnectionPanel: Send + Sync {
    fn is_expanded(&self) -> bool;
    fn set_expanded(&self, expanded: bool);
}

/// Panel without a view; remembers the requested state.
#[derive(Default)]
pub struct HeadlessPanel {
    expanded: AtomicBool,
}

impl HeadlessPanel {
    pub fn new(expanded: bool) -> Self {
        Self {
            expanded: AtomicBool::new(expanded),
        }
    }
}

impl ConnectionPanel for HeadlessPanel {
    fn is_expanded(&self) -> bool {
        self.expanded.load(Ordering::SeqCst)
    }

    fn set_expanded(&self, expanded: bool) {
        debug!(expanded, "connection panel toggled");
        self.expanded.store(expanded, Ordering::SeqCst);
    }
}

/// Form binding for one connector type's parameters.
pub trait ConnectorForm: Send + Sync {
    fn connector(&self) -> ConnectorId;
    fn collect_parameters(&self) -> BTreeMap<String, String>;
}
