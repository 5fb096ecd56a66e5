use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    CommandOutcome, ConnectOutcome, ConnectionPresenter, ConnectionViewState, DashboardEvent,
    EventBus, FileCookieStore, HeadlessPanel, HttpApiClient, LoginState, StaticSettings,
    SystemActionsPresenter, TracingNotifier,
};
use shared::domain::{ActionSource, ConnectorId, Permission, ProfileId};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod console;

use config::{load_settings, Settings, DEFAULT_CONFIG_FILE};
use console::{ArgumentForm, TerminalPrompt};

#[derive(Parser, Debug)]
#[command(name = "hostctl", about = "Connection panel and system menu for a print host")]
struct Cli {
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    /// Answer every confirmation with proceed.
    #[arg(long, short = 'y')]
    yes: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show connection options and the current selection.
    Status,
    Connect {
        #[arg(long)]
        connector: Option<String>,
        #[arg(long)]
        port: Option<String>,
        #[arg(long)]
        baudrate: Option<u32>,
        #[arg(long)]
        profile: Option<String>,
        /// Store the selection as the host's defaults.
        #[arg(long)]
        save: bool,
        /// Connector parameter as name=value, repeatable.
        #[arg(long = "param")]
        params: Vec<String>,
    },
    Disconnect,
    /// List the host's system commands.
    Commands,
    Exec {
        source: ActionSource,
        action: String,
    },
    /// Check startup notices (flagged folders, Python end of life).
    Notices,
    /// Follow printer state and dashboard events until interrupted.
    Watch {
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
    },
}

struct Selection {
    connector: Option<String>,
    port: Option<String>,
    baudrate: Option<u32>,
    profile: Option<String>,
    save: bool,
    params: Vec<String>,
}

struct Dashboard {
    api: Arc<HttpApiClient>,
    bus: EventBus,
    connection: Arc<ConnectionPresenter>,
    system: Arc<SystemActionsPresenter>,
}

impl Dashboard {
    fn new(settings: &Settings, assume_yes: bool) -> Result<Self> {
        let api = Arc::new(
            HttpApiClient::new(
                &settings.server_url,
                settings.api_key.clone(),
                settings.request_timeout(),
            )
            .with_context(|| format!("invalid server url '{}'", settings.server_url))?,
        );
        let cookies = Arc::new(FileCookieStore::open(settings.cookie_file.clone())?);
        debug!(cookies = %cookies.path().display(), "dashboard: cookie store opened");
        let auth = Arc::new(LoginState::new([Permission::Connection, Permission::System]));
        let prompt = Arc::new(TerminalPrompt::new(assume_yes));
        let bus = EventBus::new();

        let connection = ConnectionPresenter::new_with_dependencies(
            auth.clone(),
            api.clone(),
            Arc::new(StaticSettings {
                ignore_empty_ports: settings.ignore_empty_ports,
                autoconnect: settings.autoconnect,
            }),
            prompt.clone(),
            Arc::new(TracingNotifier::default()),
            Arc::new(HeadlessPanel::new(true)),
            bus.clone(),
        );
        let system = SystemActionsPresenter::new(
            auth,
            api.clone(),
            Arc::new(TracingNotifier::default()),
            prompt,
            cookies,
            bus.clone(),
        );

        Ok(Self {
            api,
            bus,
            connection,
            system,
        })
    }

    /// Feeds the printer state and connection options into the presenter.
    async fn load_connection(&self) -> Result<String> {
        let printer = self
            .api
            .get_printer_state()
            .await
            .context("failed to read printer state")?;
        self.connection.process_state(printer.flags).await;
        // Also picks up ignore_empty_ports before fetching options.
        self.connection
            .handle_event(DashboardEvent::SettingsUpdated)
            .await;
        if !self.connection.view().options_fetched {
            bail!("connection options unavailable, see log for details");
        }
        Ok(printer.text)
    }

    async fn status(&self) -> Result<()> {
        let state = self.load_connection().await?;
        print_connection(&state, &self.connection.view());
        Ok(())
    }

    async fn connect(&self, selection: Selection) -> Result<()> {
        let state = self.load_connection().await?;
        if !self.connection.view().flags.closed_or_error {
            bail!("printer is already connected ({state})");
        }

        if let Some(connector) = selection.connector {
            let connector = ConnectorId::new(connector);
            if !self.connection.select_connector(connector.clone()) {
                bail!("connector '{connector}' is not offered by the host");
            }
        }
        if let Some(port) = selection.port {
            if !self.connection.set_port(Some(port.clone())) {
                bail!("port '{port}' is not offered by the host");
            }
        }
        if let Some(baudrate) = selection.baudrate {
            if !self.connection.set_baudrate(Some(baudrate)) {
                bail!("baudrate {baudrate} is not offered by the host");
            }
        }
        if let Some(profile) = selection.profile {
            let profile = ProfileId::new(profile);
            if !self.connection.select_profile(Some(profile.clone())) {
                bail!("printer profile '{profile}' is not offered by the host");
            }
        }
        self.connection.set_save_settings(selection.save);
        if !selection.params.is_empty() {
            let connector = self
                .connection
                .view()
                .selected_connector
                .unwrap_or_else(ConnectorId::serial);
            let form = ArgumentForm::parse(connector, &selection.params)?;
            self.connection.register_form(Arc::new(form));
        }

        let outcome = self
            .connection
            .connect()
            .await
            .context("connect request failed")?;
        print_connect_outcome(outcome);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let state = self.load_connection().await?;
        if self.connection.view().flags.closed_or_error {
            println!("printer is not connected ({state})");
            return Ok(());
        }
        let outcome = self
            .connection
            .connect()
            .await
            .context("disconnect request failed")?;
        print_connect_outcome(outcome);
        Ok(())
    }

    async fn commands(&self) -> Result<()> {
        self.system
            .fetch_commands()
            .await
            .context("failed to fetch system commands")?;
        let view = self.system.view();
        if view.actions.is_empty() {
            println!("no system commands available");
        }
        for entry in &view.actions {
            match entry.command() {
                Some((source, command)) => println!(
                    "{:<7} {:<24} {}{}",
                    source.as_str(),
                    command.action,
                    command.name,
                    if command.confirm.is_some() {
                        " (asks for confirmation)"
                    } else {
                        ""
                    }
                ),
                None => println!("{}", "-".repeat(40)),
            }
        }
        Ok(())
    }

    async fn exec(&self, source: ActionSource, action: &str) -> Result<()> {
        self.system
            .fetch_commands()
            .await
            .context("failed to fetch system commands")?;
        let command = self
            .system
            .find_command(source, action)
            .with_context(|| format!("the host offers no {source} command '{action}'"))?;

        match self.system.execute_command(source, &command).await? {
            CommandOutcome::Success => println!("{source}/{action} executed"),
            CommandOutcome::Ignored => println!("{source}/{action} failed, failure ignored"),
            CommandOutcome::Cancelled => println!("{source}/{action} cancelled"),
        }
        Ok(())
    }

    async fn notices(&self) -> Result<()> {
        self.system
            .fetch_startup_notices()
            .await
            .context("failed to fetch startup notices")?;
        println!("startup notices checked");
        Ok(())
    }

    async fn watch(&self, interval: Duration) -> Result<()> {
        let mut events = self.bus.subscribe();
        let mut view = self.connection.subscribe();
        let connection_loop = self.connection.spawn();
        let system_loop = self.system.spawn();

        self.bus.publish(DashboardEvent::AllViewModelsBound);
        self.bus.publish(DashboardEvent::SettingsUpdated);
        self.bus.publish(DashboardEvent::StartupComplete);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(interval);
        let mut last_state: Option<String> = None;
        let mut was_closed: Option<bool> = None;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => match self.api.get_printer_state().await {
                    Ok(printer) => {
                        if last_state.as_deref() != Some(printer.text.as_str()) {
                            info!(state = %printer.text, "printer state changed");
                            last_state = Some(printer.text.clone());
                        }
                        let closed = printer.flags.closed_or_error;
                        if was_closed.is_some_and(|previous| previous != closed) {
                            self.bus.publish(if closed {
                                DashboardEvent::Disconnected
                            } else {
                                DashboardEvent::Connected
                            });
                        }
                        was_closed = Some(closed);
                        self.bus.publish(DashboardEvent::PrinterState(printer.flags));
                    }
                    Err(err) => warn!("printer state poll failed: {err}"),
                },
                changed = view.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = view.borrow_and_update().clone();
                    info!(
                        connector = ?current.selected_connector,
                        port = ?current.serial.current_port,
                        profile = ?current.current_profile,
                        action = current.button_label(),
                        "connection panel updated"
                    );
                }
                event = events.recv() => match event {
                    Ok(DashboardEvent::ConnectionDataReceived(data)) => info!(
                        state = ?data.current.state,
                        connectors = data.connector_parameters.len(),
                        preferred = ?data.preferred.connector,
                        "connection data received"
                    ),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "watch lagged behind events"),
                    Err(RecvError::Closed) => break,
                },
            }
        }

        connection_loop.abort();
        system_loop.abort();
        let _ = futures::future::join(connection_loop, system_loop).await;
        info!("watch stopped");
        Ok(())
    }
}

fn print_connect_outcome(outcome: ConnectOutcome) {
    match outcome {
        ConnectOutcome::ConnectRequested => println!("connect requested"),
        ConnectOutcome::DisconnectRequested => println!("disconnect requested"),
        ConnectOutcome::Cancelled => println!("cancelled, staying connected"),
    }
}

fn print_connection(state: &str, view: &ConnectionViewState) {
    println!("state:     {state}");
    for descriptor in &view.connector_options {
        let selected = view.selected_connector.as_ref() == Some(&descriptor.connector);
        println!(
            "{} connector {} ({})",
            if selected { "*" } else { " " },
            descriptor.connector,
            descriptor
                .name
                .as_deref()
                .unwrap_or(descriptor.connector.as_str())
        );
    }

    let serial_selected = view
        .selected_connector
        .as_ref()
        .map_or(true, ConnectorId::is_serial);
    if serial_selected {
        println!(
            "port:      {} of {:?}",
            view.serial
                .current_port
                .as_deref()
                .unwrap_or(view.port_caption()),
            view.serial.port_options
        );
        println!(
            "baudrate:  {} of {:?}",
            view.serial
                .current_baudrate
                .map_or_else(|| "AUTO".to_string(), |rate| rate.to_string()),
            view.serial.baudrate_options
        );
        if !view.valid_port() {
            println!("warning:   no serial port found");
        }
    }

    for entry in &view.profile_options {
        let selected = view.current_profile.as_ref() == Some(&entry.id);
        println!(
            "{} profile {} ({})",
            if selected { "*" } else { " " },
            entry.id,
            entry.name
        );
    }
    println!("action:    {}", view.button_label());
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(&cli.config)?;
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }
    if let Some(api_key) = cli.api_key {
        settings.api_key = Some(api_key);
    }
    init_tracing(&settings.log_filter);
    info!(server = %settings.server_url, "hostctl starting");

    let dashboard = Dashboard::new(&settings, cli.yes)?;
    match cli.command {
        Command::Status => dashboard.status().await,
        Command::Connect {
            connector,
            port,
            baudrate,
            profile,
            save,
            params,
        } => {
            dashboard
                .connect(Selection {
                    connector,
                    port,
                    baudrate,
                    profile,
                    save,
                    params,
                })
                .await
        }
        Command::Disconnect => dashboard.disconnect().await,
        Command::Commands => dashboard.commands().await,
        Command::Exec { source, action } => dashboard.exec(source, &action).await,
        Command::Notices => dashboard.notices().await,
        Command::Watch { interval_secs } => {
            dashboard
                .watch(Duration::from_secs(interval_secs.max(1)))
                .await
        }
    }
}
