//! System menu presenter: host commands and startup notices.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use shared::{
    domain::{ActionSource, Permission},
    protocol::{PythonEolNotice, SystemCommand, SystemCommandsResponse},
};
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    cookies::CookieStore,
    error::{CommandError, PresenterError},
    events::{DashboardEvent, EventBus},
    notify::{
        escape_html, ConfirmationPrompt, ConfirmationRequest, Notification, NotificationId,
        Notifier,
    },
    AuthGate, SystemApi,
};

pub const PYTHON_EOL_COOKIE: &str = "python_eol_acknowledged";
/// Stored under [`PYTHON_EOL_COOKIE`] to silence the notice for good.
pub const PYTHON_EOL_DISMISSED_FOREVER: &str = "permanently dismissed";
pub const PYTHON_EOL_ACK_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

const SOURCE_ORDER: [ActionSource; 3] = [
    ActionSource::Core,
    ActionSource::Plugin,
    ActionSource::Custom,
];

#[derive(Debug, Clone, PartialEq)]
pub enum SystemAction {
    Command {
        source: ActionSource,
        command: SystemCommand,
    },
    Divider,
}

impl SystemAction {
    pub fn command(&self) -> Option<(ActionSource, &SystemCommand)> {
        match self {
            SystemAction::Command { source, command } => Some((*source, command)),
            SystemAction::Divider => None,
        }
    }
}

/// Core, plugin, then custom commands, with a divider between adjacent
/// non-empty groups only.
pub fn build_action_list(response: &SystemCommandsResponse) -> Vec<SystemAction> {
    let mut actions = Vec::new();
    for source in SOURCE_ORDER {
        let group = response.group(source);
        if group.is_empty() {
            continue;
        }
        if !actions.is_empty() {
            actions.push(SystemAction::Divider);
        }
        actions.extend(group.iter().cloned().map(|command| SystemAction::Command {
            source,
            command,
        }));
    }
    actions
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemViewState {
    pub actions: Vec<SystemAction>,
    pub last_response: Option<SystemCommandsResponse>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    /// The host reported a failure for a command marked as ignorable.
    Ignored,
    Cancelled,
}

#[derive(Default)]
struct SystemInner {
    flagged_folders_notification: Option<NotificationId>,
    python_eol_notification: Option<NotificationId>,
}

fn flagged_folders_html(folders: &BTreeMap<String, String>) -> String {
    let mut html = String::from(
        "<p>The following folder(s) were found to be unusable during startup and have been \
         turned back to the default:</p><ul>",
    );
    for (folder, reason) in folders {
        html.push_str(&format!(
            "<li><code>{}</code>: {}</li>",
            escape_html(folder),
            escape_html(reason)
        ));
    }
    html.push_str(
        "</ul><p>Please check the permissions of these folders and make sure they are writable \
         by the user running the host. In case of network shares, make sure they have been \
         mounted <em>before</em> the host starts.</p>",
    );
    html
}

fn python_eol_html(notice: &PythonEolNotice) -> String {
    let version = escape_html(&notice.version);
    let date = escape_html(&notice.date);
    let mut html = if notice.soon {
        format!(
            "<p>The Python version this host runs on, Python {version}, will reach its end of \
             life on {date}.</p>"
        )
    } else {
        format!(
            "<p>The Python version this host runs on, Python {version}, reached its end of life \
             on {date}.</p>"
        )
    };
    if let Some(release) = &notice.last_supporting_release {
        let release = escape_html(release);
        if notice.soon {
            html.push_str(&format!(
                "<p>Releases after {release} will no longer support it.</p>"
            ));
        } else {
            html.push_str(&format!(
                "<p>{release} is the last release that supports it.</p>"
            ));
        }
    }
    html.push_str("<p>Please plan an upgrade of your Python environment.</p>");
    html
}

pub struct SystemActionsPresenter {
    auth: Arc<dyn AuthGate>,
    api: Arc<dyn SystemApi>,
    notifier: Arc<dyn Notifier>,
    prompt: Arc<dyn ConfirmationPrompt>,
    cookies: Arc<dyn CookieStore>,
    bus: EventBus,
    inner: Mutex<SystemInner>,
    view: watch::Sender<SystemViewState>,
}

impl SystemActionsPresenter {
    pub fn new(
        auth: Arc<dyn AuthGate>,
        api: Arc<dyn SystemApi>,
        notifier: Arc<dyn Notifier>,
        prompt: Arc<dyn ConfirmationPrompt>,
        cookies: Arc<dyn CookieStore>,
        bus: EventBus,
    ) -> Arc<Self> {
        let (view, _) = watch::channel(SystemViewState::default());
        Arc::new(Self {
            auth,
            api,
            notifier,
            prompt,
            cookies,
            bus,
            inner: Mutex::new(SystemInner::default()),
            view,
        })
    }

    pub fn view(&self) -> SystemViewState {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SystemViewState> {
        self.view.subscribe()
    }

    fn ensure_permission(&self) -> Result<(), PresenterError> {
        if self.auth.has_permission(Permission::System) {
            Ok(())
        } else {
            debug!("system: skipping request without permission");
            Err(PresenterError::PermissionDenied(Permission::System))
        }
    }

    /// Fetches commands and startup notices; both are attempted even when
    /// the first fails.
    pub async fn request_data(&self) -> Result<(), PresenterError> {
        let commands = self.fetch_commands().await;
        let notices = self.fetch_startup_notices().await;
        commands.and(notices)
    }

    pub async fn fetch_commands(&self) -> Result<(), PresenterError> {
        self.ensure_permission()?;
        let response = self.api.get_commands().await?;
        let actions = build_action_list(&response);
        debug!(actions = actions.len(), "system: commands refreshed");
        self.view.send_modify(|view| {
            view.actions = actions;
            view.last_response = Some(response);
        });
        Ok(())
    }

    pub async fn fetch_startup_notices(&self) -> Result<(), PresenterError> {
        self.ensure_permission()?;
        let notices = self.api.get_startup_notices().await?;
        let mut inner = self.inner.lock().await;

        if !notices.flagged_basefolders.is_empty() {
            if let Some(previous) = inner.flagged_folders_notification.take() {
                self.notifier.remove(previous);
            }
            warn!(
                folders = notices.flagged_basefolders.len(),
                "system: host flagged unusable base folders"
            );
            let id = self.notifier.show(Notification::warning(
                "Warning",
                flagged_folders_html(&notices.flagged_basefolders),
            ));
            inner.flagged_folders_notification = Some(id);
        }

        if let Some(previous) = inner.python_eol_notification.take() {
            self.notifier.remove(previous);
        }
        if let Some(notice) = &notices.python_eol {
            let token = notice.token();
            let acknowledged = self.cookies.get(PYTHON_EOL_COOKIE);
            match acknowledged.as_deref() {
                Some(PYTHON_EOL_DISMISSED_FOREVER) => {
                    debug!("system: python end-of-life notice dismissed permanently")
                }
                Some(ack) if ack == token => {
                    debug!(token = %token, "system: python end-of-life notice already shown")
                }
                _ => {
                    let title = if notice.soon {
                        "Python end of life approaching"
                    } else {
                        "Python end of life reached"
                    };
                    let id = self
                        .notifier
                        .show(Notification::warning(title, python_eol_html(notice)));
                    inner.python_eol_notification = Some(id);
                    self.cookies
                        .set(PYTHON_EOL_COOKIE, &token, PYTHON_EOL_ACK_MAX_AGE);
                }
            }
        }
        Ok(())
    }

    pub fn find_command(&self, source: ActionSource, action: &str) -> Option<SystemCommand> {
        self.view.borrow().actions.iter().find_map(|entry| match entry.command() {
            Some((entry_source, command))
                if entry_source == source && command.action == action =>
            {
                Some(command.clone())
            }
            _ => None,
        })
    }

    pub async fn execute_command(
        &self,
        source: ActionSource,
        command: &SystemCommand,
    ) -> Result<CommandOutcome, CommandError> {
        if !self.auth.has_permission(Permission::System) {
            return Err(CommandError::PermissionDenied(Permission::System));
        }

        if let Some(message) = &command.confirm {
            if !self.prompt.confirm(ConfirmationRequest::new(message.clone())).await {
                info!(source = %source, action = %command.action, "system: command cancelled");
                return Ok(CommandOutcome::Cancelled);
            }
        }

        let name = escape_html(display_name(command));
        match self.api.execute_command(source, &command.action).await {
            Ok(()) => {
                let text = if command.is_async {
                    format!("The command \"{name}\" was triggered asynchronously")
                } else {
                    format!("The command \"{name}\" executed successfully")
                };
                info!(source = %source, action = %command.action, "system: command executed");
                self.notifier.show(Notification::success("Success", text));
                Ok(CommandOutcome::Success)
            }
            Err(err) if command.ignore => {
                debug!(
                    source = %source,
                    action = %command.action,
                    "system: ignoring command failure: {err}"
                );
                Ok(CommandOutcome::Ignored)
            }
            Err(err) => {
                let exception = err.to_api_exception();
                warn!(
                    source = %source,
                    action = %command.action,
                    code = ?exception.code,
                    "system: command failed: {err}"
                );
                let text = format!(
                    "<p>The command \"{name}\" could not be executed.</p><pre>{}</pre>",
                    escape_html(&exception.message)
                );
                self.notifier.show(Notification::error("Error", text));
                Err(CommandError::Failed {
                    action: command.action.clone(),
                    source: err,
                })
            }
        }
    }

    fn clear(&self) {
        debug!("system: permission lost, clearing commands");
        self.view.send_modify(|view| {
            view.actions.clear();
            view.last_response = None;
        });
    }

    async fn refresh(&self) {
        match self.request_data().await {
            Ok(()) | Err(PresenterError::PermissionDenied(_)) => {}
            Err(err) => warn!("system: data request failed: {err}"),
        }
    }

    pub async fn handle_event(&self, event: DashboardEvent) {
        match event {
            DashboardEvent::UserLoggedIn
            | DashboardEvent::UserLoggedOut
            | DashboardEvent::UserPermissionsChanged => {
                if self.auth.has_permission(Permission::System) {
                    self.refresh().await;
                } else {
                    self.clear();
                }
            }
            DashboardEvent::SettingsUpdated => {
                if self.auth.has_permission(Permission::System) {
                    self.refresh().await;
                }
            }
            _ => {}
        }
    }

    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<DashboardEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "system: lagged behind dashboard events")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("system: event bus closed");
    }

    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let events = self.bus.subscribe();
        tokio::spawn(Arc::clone(self).run(events))
    }
}

fn display_name(command: &SystemCommand) -> &str {
    if command.name.is_empty() {
        &command.action
    } else {
        &command.name
    }
}

#[cfg(test)]
#[path = "tests/system_tests.rs"]
mod tests;
