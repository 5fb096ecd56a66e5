//! Connection panel presenter: connector, port, baudrate and printer profile
//! selection plus connect/disconnect.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock},
};

use shared::{
    domain::{ConnectorId, Permission, ProfileId, SERIAL_CONNECTOR},
    protocol::{
        parameter_as_string, parameter_as_u32, string_options, u32_options, ConnectRequest,
        ConnectionOptionsResponse, ConnectorDescriptor, ParameterMap, ProfileOption, StateFlags,
    },
};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::{PresenterError, RequestError},
    events::{ConnectionData, DashboardEvent, EventBus},
    notify::{
        escape_html, ConfirmationPrompt, ConfirmationRequest, MissingConfirmationPrompt,
        Notification, Notifier, TracingNotifier,
    },
    AuthGate, ConnectionApi, ConnectionPanel, ConnectorForm, DashboardSettings, HeadlessPanel,
    StaticSettings,
};

const PORT_PARAMETER: &str = "port";
const BAUDRATE_PARAMETER: &str = "baudrate";

const DISCONNECT_WHILE_PRINTING: &str = "<p><strong>You are about to disconnect from the printer \
while a print is in progress.</strong></p><p>Disconnecting while a print is in progress will \
prevent the host from completing the print. If you're printing from an SD card attached directly \
to the printer, any attempt to restart the host or reconnect to the printer could interrupt the \
print.</p>";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerialConnectorState {
    pub port_options: Vec<String>,
    pub baudrate_options: Vec<u32>,
    pub current_port: Option<String>,
    pub current_baudrate: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
    pub id: ProfileId,
    pub name: String,
}

/// Everything the connection panel binds to.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionViewState {
    pub options_fetched: bool,
    pub connector_options: Vec<ConnectorDescriptor>,
    pub connector_parameters: BTreeMap<String, ParameterMap>,
    pub selected_connector: Option<ConnectorId>,
    pub serial: SerialConnectorState,
    /// Profiles the host accepts for a connection.
    pub advertised_profiles: Vec<ProfileId>,
    /// Profiles as listed by the profile manager, for display.
    pub profile_options: Vec<ProfileEntry>,
    pub current_profile: Option<ProfileId>,
    pub save_settings: bool,
    pub ignore_empty_ports: bool,
    pub flags: StateFlags,
    pub refresh_visible: bool,
}

impl Default for ConnectionViewState {
    fn default() -> Self {
        Self {
            options_fetched: false,
            connector_options: Vec::new(),
            connector_parameters: BTreeMap::new(),
            selected_connector: None,
            serial: SerialConnectorState::default(),
            advertised_profiles: Vec::new(),
            profile_options: Vec::new(),
            current_profile: None,
            save_settings: false,
            ignore_empty_ports: false,
            flags: StateFlags::default(),
            refresh_visible: true,
        }
    }
}

impl ConnectionViewState {
    fn requires_port(&self) -> bool {
        self.selected_connector
            .as_ref()
            .map_or(true, ConnectorId::is_serial)
    }

    pub fn valid_port(&self) -> bool {
        !self.options_fetched
            || !self.requires_port()
            || !self.serial.port_options.is_empty()
            || self.ignore_empty_ports
    }

    pub fn port_caption(&self) -> &'static str {
        if self.valid_port() {
            "AUTO"
        } else {
            "No serial port found"
        }
    }

    pub fn enable_port(&self) -> bool {
        self.valid_port() && self.flags.closed_or_error
    }

    pub fn button_label(&self) -> &'static str {
        if self.flags.closed_or_error {
            "Connect"
        } else {
            "Disconnect"
        }
    }

    /// Always permitted until the host can refresh ports on its own; the
    /// port-based rule stays off on purpose.
    pub fn enable_connect(&self) -> bool {
        true
    }

    pub fn enable_save_settings(&self) -> bool {
        self.enable_connect() && self.flags.closed_or_error
    }

    pub fn enable_auto_connect(&self) -> bool {
        self.enable_connect() && self.flags.closed_or_error
    }

    fn clear_options(&mut self) {
        self.options_fetched = false;
        self.connector_options.clear();
        self.connector_parameters.clear();
        self.selected_connector = None;
        self.serial = SerialConnectorState::default();
        self.advertised_profiles.clear();
        self.current_profile = None;
        self.save_settings = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    ConnectRequested,
    DisconnectRequested,
    Cancelled,
}

/// First candidate that the host currently advertises.
fn sticky_choice<T: PartialEq>(options: &[T], current: Option<T>, preferred: Option<T>) -> Option<T> {
    [current, preferred]
        .into_iter()
        .flatten()
        .find(|candidate| options.contains(candidate))
}

fn pick_connector(
    connectors: &[ConnectorDescriptor],
    reported: Option<&ConnectorId>,
) -> Option<ConnectorId> {
    reported
        .filter(|id| connectors.iter().any(|c| &c.connector == *id))
        .or_else(|| connectors.first().map(|c| &c.connector))
        .cloned()
}

#[derive(Default)]
struct ConnectionInner {
    all_bound: bool,
    startup_complete: bool,
    last_operational: Option<bool>,
}

pub struct ConnectionPresenter {
    auth: Arc<dyn AuthGate>,
    api: Arc<dyn ConnectionApi>,
    settings: Arc<dyn DashboardSettings>,
    prompt: Arc<dyn ConfirmationPrompt>,
    notifier: Arc<dyn Notifier>,
    panel: Arc<dyn ConnectionPanel>,
    bus: EventBus,
    forms: RwLock<HashMap<ConnectorId, Arc<dyn ConnectorForm>>>,
    inner: Mutex<ConnectionInner>,
    view: watch::Sender<ConnectionViewState>,
}

impl ConnectionPresenter {
    pub fn new(auth: Arc<dyn AuthGate>, api: Arc<dyn ConnectionApi>, bus: EventBus) -> Arc<Self> {
        Self::new_with_dependencies(
            auth,
            api,
            Arc::new(StaticSettings::default()),
            Arc::new(MissingConfirmationPrompt),
            Arc::new(TracingNotifier::default()),
            Arc::new(HeadlessPanel::default()),
            bus,
        )
    }

    pub fn new_with_dependencies(
        auth: Arc<dyn AuthGate>,
        api: Arc<dyn ConnectionApi>,
        settings: Arc<dyn DashboardSettings>,
        prompt: Arc<dyn ConfirmationPrompt>,
        notifier: Arc<dyn Notifier>,
        panel: Arc<dyn ConnectionPanel>,
        bus: EventBus,
    ) -> Arc<Self> {
        let (view, _) = watch::channel(ConnectionViewState::default());
        Arc::new(Self {
            auth,
            api,
            settings,
            prompt,
            notifier,
            panel,
            bus,
            forms: RwLock::new(HashMap::new()),
            inner: Mutex::new(ConnectionInner::default()),
            view,
        })
    }

    /// Replaces the form binding for the form's connector.
    pub fn register_form(&self, form: Arc<dyn ConnectorForm>) {
        if let Ok(mut forms) = self.forms.write() {
            forms.insert(form.connector(), form);
        }
    }

    pub fn view(&self) -> ConnectionViewState {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionViewState> {
        self.view.subscribe()
    }

    pub async fn request_options(&self) -> Result<(), PresenterError> {
        if !self.auth.has_permission(Permission::Connection) {
            debug!("connection: skipping options request without permission");
            return Err(PresenterError::PermissionDenied(Permission::Connection));
        }

        let response = self.api.get_options().await?;
        self.reconcile(response).await;
        Ok(())
    }

    pub async fn reconcile(&self, response: ConnectionOptionsResponse) {
        let ConnectionOptionsResponse { current, options } = response;

        let connector_parameters: BTreeMap<String, ParameterMap> = options
            .connectors
            .iter()
            .map(|c| (c.connector.as_str().to_string(), c.parameters.clone()))
            .collect();
        let selected = pick_connector(&options.connectors, current.connector.as_ref());

        let serial_parameters = connector_parameters.get(SERIAL_CONNECTOR);
        let ports = serial_parameters
            .map(|p| string_options(p, PORT_PARAMETER))
            .unwrap_or_default();
        let baudrates = serial_parameters
            .map(|p| u32_options(p, BAUDRATE_PARAMETER))
            .unwrap_or_default();

        let reported = current
            .connector
            .as_ref()
            .is_some_and(ConnectorId::is_serial)
            .then_some(&current.parameters);
        let preferred = options
            .preferred_connector
            .connector
            .as_ref()
            .is_some_and(ConnectorId::is_serial)
            .then_some(&options.preferred_connector.parameters);
        let port_of = |params: Option<&ParameterMap>| {
            params
                .and_then(|p| p.get(PORT_PARAMETER))
                .and_then(parameter_as_string)
        };
        let baudrate_of = |params: Option<&ParameterMap>| {
            params
                .and_then(|p| p.get(BAUDRATE_PARAMETER))
                .and_then(parameter_as_u32)
        };
        let (current_port, preferred_port) = (port_of(reported), port_of(preferred));
        let (current_baudrate, preferred_baudrate) =
            (baudrate_of(reported), baudrate_of(preferred));
        let ignore_empty_ports = self.settings.ignore_empty_ports();
        let advertised: Vec<ProfileId> = options
            .printer_profiles
            .iter()
            .map(|profile| profile.id().clone())
            .collect();

        // Other connector bindings default their own values from this.
        if self.inner.lock().await.all_bound {
            self.bus
                .publish(DashboardEvent::ConnectionDataReceived(Arc::new(ConnectionData {
                    current: current.clone(),
                    connector_parameters: connector_parameters.clone(),
                    preferred: options.preferred_connector.clone(),
                })));
        }

        // One update, so subscribers never see a half reconciled panel.
        self.view.send_modify(|view| {
            view.connector_options = options.connectors;
            view.connector_parameters = connector_parameters;
            view.selected_connector = selected;
            view.ignore_empty_ports = ignore_empty_ports;

            let serial = &mut view.serial;
            if serial.current_port.is_none() {
                serial.current_port = sticky_choice(&ports, current_port, preferred_port);
            }
            if serial.current_baudrate.is_none() {
                serial.current_baudrate =
                    sticky_choice(&baudrates, current_baudrate, preferred_baudrate);
            }
            serial.port_options = ports;
            serial.baudrate_options = baudrates;

            if view.current_profile.is_none() {
                view.current_profile = sticky_choice(
                    &advertised,
                    current.printer_profile,
                    options.preferred_profile,
                );
            }
            view.advertised_profiles = advertised;
            view.save_settings = false;
            view.options_fetched = true;
        });

        let view = self.view.borrow();
        debug!(
            connectors = view.connector_options.len(),
            selected = ?view.selected_connector,
            port = ?view.serial.current_port,
            baudrate = ?view.serial.current_baudrate,
            profile = ?view.current_profile,
            "connection: options reconciled"
        );
    }

    pub fn select_connector(&self, connector: ConnectorId) -> bool {
        self.view.send_if_modified(|view| {
            let known = view
                .connector_options
                .iter()
                .any(|c| c.connector == connector);
            if known {
                view.selected_connector = Some(connector);
            }
            known
        })
    }

    /// Accepts only ports the host currently advertises; `None` clears.
    pub fn set_port(&self, port: Option<String>) -> bool {
        self.view.send_if_modified(|view| match port {
            Some(port) if !view.serial.port_options.contains(&port) => false,
            port => {
                view.serial.current_port = port;
                true
            }
        })
    }

    pub fn set_baudrate(&self, baudrate: Option<u32>) -> bool {
        self.view.send_if_modified(|view| match baudrate {
            Some(rate) if !view.serial.baudrate_options.contains(&rate) => false,
            baudrate => {
                view.serial.current_baudrate = baudrate;
                true
            }
        })
    }

    pub fn select_profile(&self, profile: Option<ProfileId>) -> bool {
        self.view.send_if_modified(|view| match profile {
            Some(id) if !view.advertised_profiles.contains(&id) => false,
            profile => {
                view.current_profile = profile;
                true
            }
        })
    }

    pub fn set_save_settings(&self, save: bool) {
        self.view.send_modify(|view| view.save_settings = save);
    }

    pub fn set_printer_profiles(&self, profiles: Vec<ProfileOption>, current: Option<ProfileId>) {
        self.view.send_modify(|view| {
            view.profile_options = profiles
                .iter()
                .map(|profile| ProfileEntry {
                    id: profile.id().clone(),
                    name: profile.name().to_string(),
                })
                .collect();
            if current.is_some() {
                view.current_profile = current;
            }
        });
    }

    fn collect_parameters(
        &self,
        connector: &ConnectorId,
        view: &ConnectionViewState,
    ) -> BTreeMap<String, String> {
        let mut parameters = BTreeMap::new();
        if connector.is_serial() {
            if let Some(port) = &view.serial.current_port {
                parameters.insert(PORT_PARAMETER.to_string(), port.clone());
            }
            if let Some(baudrate) = view.serial.current_baudrate {
                parameters.insert(BAUDRATE_PARAMETER.to_string(), baudrate.to_string());
            }
        }

        // Form values win per key over the panel's own serial selection.
        let form = self
            .forms
            .read()
            .ok()
            .and_then(|forms| forms.get(connector).cloned());
        if let Some(form) = form {
            parameters.extend(form.collect_parameters());
        }
        parameters
    }

    /// Connects when closed, otherwise disconnects. Disconnecting during a
    /// print or pause needs explicit consent.
    pub async fn connect(&self) -> Result<ConnectOutcome, PresenterError> {
        let view = self.view();

        if !view.flags.closed_or_error {
            if view.flags.printing || view.flags.paused {
                let request = ConfirmationRequest {
                    title: "Are you sure?".to_string(),
                    message: DISCONNECT_WHILE_PRINTING.to_string(),
                    question: Some(
                        "Are you sure you want to disconnect from the printer?".to_string(),
                    ),
                    cancel_label: "Stay Connected".to_string(),
                    proceed_label: "Disconnect".to_string(),
                };
                if !self.prompt.confirm(request).await {
                    info!("connection: disconnect during active print cancelled");
                    return Ok(ConnectOutcome::Cancelled);
                }
            }
            return self.disconnect().await;
        }

        // The host falls back to serial when no connector is named.
        let connector = view
            .selected_connector
            .clone()
            .unwrap_or_else(ConnectorId::serial);
        let request = ConnectRequest {
            parameters: self.collect_parameters(&connector, &view),
            connector,
            printer_profile: view.current_profile.clone(),
            autoconnect: self.settings.autoconnect(),
            save: view.save_settings.then_some(true),
        };

        info!(
            connector = %request.connector,
            profile = ?request.printer_profile,
            save = request.save.unwrap_or(false),
            "connection: requesting connect"
        );
        if let Err(err) = self.api.connect(request).await {
            self.notify_failure("Connecting to the printer failed", &err);
            return Err(err.into());
        }

        if let Err(err) = self.settings.request_settings().await {
            warn!("connection: settings refresh after connect failed: {err:#}");
        }
        if let Err(err) = self.settings.request_printer_profiles().await {
            warn!("connection: printer profile refresh after connect failed: {err:#}");
        }
        Ok(ConnectOutcome::ConnectRequested)
    }

    async fn disconnect(&self) -> Result<ConnectOutcome, PresenterError> {
        info!("connection: requesting disconnect");
        if let Err(err) = self.api.disconnect().await {
            self.notify_failure("Disconnecting from the printer failed", &err);
            return Err(err.into());
        }
        self.refresh().await;
        Ok(ConnectOutcome::DisconnectRequested)
    }

    fn notify_failure(&self, summary: &str, err: &RequestError) {
        let exception = err.to_api_exception();
        warn!(code = ?exception.code, "connection: {summary}: {err}");
        let text = format!(
            "<p>{summary}.</p><pre>{}</pre>",
            escape_html(&exception.message)
        );
        self.notifier.show(Notification::error("Error", text));
    }

    pub async fn process_state(&self, flags: StateFlags) {
        self.view.send_modify(|view| view.flags = flags);

        let changed = {
            let mut inner = self.inner.lock().await;
            let previous = inner.last_operational.replace(flags.operational);
            previous != Some(flags.operational)
        };
        // Only react to edges so a manual open/close is not undone.
        if changed {
            self.open_or_close_on_state_change(false).await;
        }
    }

    pub async fn open_or_close_on_state_change(&self, force: bool) {
        if !force && !self.inner.lock().await.startup_complete {
            return;
        }

        let operational = self.view.borrow().flags.operational;
        let expanded = self.panel.is_expanded();
        if operational && expanded {
            self.panel.set_expanded(false);
            self.view.send_modify(|view| view.refresh_visible = false);
        } else if !operational && !expanded {
            self.panel.set_expanded(true);
            self.view.send_modify(|view| view.refresh_visible = true);
        }
    }

    async fn refresh(&self) {
        match self.request_options().await {
            Ok(()) | Err(PresenterError::PermissionDenied(_)) => {}
            Err(err) => warn!("connection: options request failed: {err}"),
        }
    }

    fn reset(&self) {
        debug!("connection: permission lost, clearing options");
        self.view.send_modify(ConnectionViewState::clear_options);
    }

    pub async fn handle_event(&self, event: DashboardEvent) {
        match event {
            DashboardEvent::SettingsUpdated => {
                let ignore_empty_ports = self.settings.ignore_empty_ports();
                self.view
                    .send_modify(|view| view.ignore_empty_ports = ignore_empty_ports);
                self.refresh().await;
            }
            DashboardEvent::Connected
            | DashboardEvent::Disconnected
            | DashboardEvent::ConnectionsAutorefreshed => self.refresh().await,
            DashboardEvent::UserLoggedIn
            | DashboardEvent::UserLoggedOut
            | DashboardEvent::UserPermissionsChanged => {
                if self.auth.has_permission(Permission::Connection) {
                    self.refresh().await;
                } else {
                    self.reset();
                }
            }
            DashboardEvent::AllViewModelsBound => self.inner.lock().await.all_bound = true,
            DashboardEvent::StartupComplete => {
                self.inner.lock().await.startup_complete = true;
                self.open_or_close_on_state_change(true).await;
            }
            DashboardEvent::PrinterState(flags) => self.process_state(flags).await,
            DashboardEvent::PrinterProfilesUpdated { profiles, current } => {
                self.set_printer_profiles(profiles, current)
            }
            DashboardEvent::ConnectionPanelToggled(visible) => {
                self.view.send_modify(|view| view.refresh_visible = visible)
            }
            DashboardEvent::ConnectionDataReceived(_) => {}
        }
    }

    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<DashboardEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "connection: lagged behind dashboard events")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("connection: event bus closed");
    }

    /// Subscribes before spawning so no event published afterwards is missed.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let events = self.bus.subscribe();
        tokio::spawn(Arc::clone(self).run(events))
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
