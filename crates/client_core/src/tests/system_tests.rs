use super::*;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex as StdMutex,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use shared::protocol::StartupNotices;

use crate::{
    cookies::{Clock, MemoryCookieStore},
    error::RequestError,
    notify::NotificationKind,
    LoginState,
};

#[derive(Default)]
struct TestSystemApi {
    commands: SystemCommandsResponse,
    notices: StdMutex<StartupNotices>,
    fail_commands_with: Option<u16>,
    fail_execution_with: Option<(u16, String)>,
    command_requests: AtomicUsize,
    executed: StdMutex<Vec<(ActionSource, String)>>,
}

impl TestSystemApi {
    fn with_commands(value: serde_json::Value) -> Self {
        Self {
            commands: serde_json::from_value(value).expect("commands"),
            ..Self::default()
        }
    }

    fn with_notices(notices: StartupNotices) -> Self {
        Self {
            notices: StdMutex::new(notices),
            ..Self::default()
        }
    }

    fn set_notices(&self, notices: StartupNotices) {
        *self.notices.lock().expect("notices") = notices;
    }
}

#[async_trait]
impl SystemApi for TestSystemApi {
    async fn get_commands(&self) -> Result<SystemCommandsResponse, RequestError> {
        self.command_requests.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = self.fail_commands_with {
            return Err(RequestError::Status {
                url: "/api/system/commands".to_string(),
                status,
                body: String::new(),
            });
        }
        Ok(self.commands.clone())
    }

    async fn get_startup_notices(&self) -> Result<StartupNotices, RequestError> {
        Ok(self.notices.lock().expect("notices").clone())
    }

    async fn execute_command(
        &self,
        source: ActionSource,
        action: &str,
    ) -> Result<(), RequestError> {
        self.executed
            .lock()
            .expect("executed")
            .push((source, action.to_string()));
        match &self.fail_execution_with {
            Some((status, body)) => Err(RequestError::Status {
                url: format!("/api/system/commands/{source}/{action}"),
                status: *status,
                body: body.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct RecordingNotifier {
    shown: StdMutex<Vec<(NotificationId, Notification)>>,
    removed: StdMutex<Vec<NotificationId>>,
    next: AtomicUsize,
}

impl RecordingNotifier {
    fn shown(&self) -> Vec<Notification> {
        self.shown
            .lock()
            .expect("shown")
            .iter()
            .map(|(_, n)| n.clone())
            .collect()
    }

    fn visible(&self) -> Vec<Notification> {
        let removed = self.removed.lock().expect("removed").clone();
        self.shown
            .lock()
            .expect("shown")
            .iter()
            .filter(|(id, _)| !removed.contains(id))
            .map(|(_, n)| n.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self, notification: Notification) -> NotificationId {
        let id = NotificationId(self.next.fetch_add(1, Ordering::SeqCst) as u64);
        self.shown
            .lock()
            .expect("shown")
            .push((id, notification));
        id
    }

    fn remove(&self, id: NotificationId) {
        self.removed.lock().expect("removed").push(id);
    }
}

struct TestPrompt {
    answer: bool,
    asked: AtomicUsize,
}

#[async_trait]
impl ConfirmationPrompt for TestPrompt {
    async fn confirm(&self, _request: ConfirmationRequest) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

struct Harness {
    presenter: Arc<SystemActionsPresenter>,
    api: Arc<TestSystemApi>,
    notifier: Arc<RecordingNotifier>,
    prompt: Arc<TestPrompt>,
    cookies: Arc<MemoryCookieStore>,
    auth: Arc<LoginState>,
    now: Arc<StdMutex<DateTime<Utc>>>,
}

fn start() -> DateTime<Utc> {
    "2023-05-01T12:00:00Z".parse().expect("timestamp")
}

fn harness_with(api: TestSystemApi, prompt_answer: bool) -> Harness {
    let api = Arc::new(api);
    let notifier = Arc::new(RecordingNotifier::default());
    let prompt = Arc::new(TestPrompt {
        answer: prompt_answer,
        asked: AtomicUsize::new(0),
    });
    let now = Arc::new(StdMutex::new(start()));
    let clock_now = Arc::clone(&now);
    let clock: Clock = Arc::new(move || *clock_now.lock().expect("clock"));
    let cookies = Arc::new(MemoryCookieStore::with_clock(clock));
    let auth = Arc::new(LoginState::new([Permission::System]));
    let presenter = SystemActionsPresenter::new(
        auth.clone(),
        api.clone(),
        notifier.clone(),
        prompt.clone(),
        cookies.clone(),
        EventBus::new(),
    );
    Harness {
        presenter,
        api,
        notifier,
        prompt,
        cookies,
        auth,
        now,
    }
}

fn harness(api: TestSystemApi) -> Harness {
    harness_with(api, true)
}

fn command(action: &str) -> SystemCommand {
    SystemCommand {
        action: action.to_string(),
        name: action.to_uppercase(),
        ..SystemCommand::default()
    }
}

fn sequence(actions: &[SystemAction]) -> Vec<String> {
    actions
        .iter()
        .map(|entry| match entry.command() {
            Some((_, command)) => command.action.clone(),
            None => "divider".to_string(),
        })
        .collect()
}

fn eol_notices(version: &str, date: &str, soon: bool) -> StartupNotices {
    StartupNotices {
        flagged_basefolders: BTreeMap::new(),
        python_eol: Some(PythonEolNotice {
            version: version.to_string(),
            date: date.to_string(),
            soon,
            last_supporting_release: None,
        }),
    }
}

#[test]
fn empty_plugin_group_gets_no_divider() {
    let response = SystemCommandsResponse {
        core: vec![command("a")],
        plugin: vec![],
        custom: vec![command("c")],
    };
    assert_eq!(sequence(&build_action_list(&response)), vec!["a", "divider", "c"]);
}

#[test]
fn single_group_has_no_dividers() {
    let response = SystemCommandsResponse {
        core: vec![],
        plugin: vec![command("p")],
        custom: vec![],
    };
    assert_eq!(sequence(&build_action_list(&response)), vec!["p"]);
}

#[test]
fn all_groups_are_separated_once() {
    let response = SystemCommandsResponse {
        core: vec![command("a"), command("b")],
        plugin: vec![command("p1"), command("p2")],
        custom: vec![command("c")],
    };
    let actions = build_action_list(&response);
    assert_eq!(
        sequence(&actions),
        vec!["a", "b", "divider", "p1", "p2", "divider", "c"]
    );
    assert_eq!(
        actions[3].command().map(|(source, _)| source),
        Some(ActionSource::Plugin)
    );
    assert!(actions.first().expect("first").command().is_some());
    assert!(actions.last().expect("last").command().is_some());
}

#[test]
fn no_commands_yield_empty_list() {
    assert!(build_action_list(&SystemCommandsResponse::default()).is_empty());
}

#[tokio::test]
async fn fetch_commands_publishes_ordered_actions() {
    let h = harness(TestSystemApi::with_commands(json!({
        "core": [{"action": "shutdown", "name": "Shutdown"}],
        "custom": [{"action": "backup", "name": "Backup"}]
    })));

    h.presenter.fetch_commands().await.expect("commands");

    let view = h.presenter.view();
    assert_eq!(sequence(&view.actions), vec!["shutdown", "divider", "backup"]);
    assert!(view.last_response.is_some());
    assert_eq!(
        h.presenter
            .find_command(ActionSource::Custom, "backup")
            .map(|c| c.name),
        Some("Backup".to_string())
    );
    assert!(h.presenter.find_command(ActionSource::Core, "backup").is_none());
}

#[tokio::test]
async fn failed_fetch_keeps_previous_actions() {
    let h = harness(TestSystemApi {
        fail_commands_with: Some(500),
        ..TestSystemApi::default()
    });
    let err = h.presenter.fetch_commands().await.expect_err("should fail");
    assert!(!err.is_permission_denied());
    assert!(h.presenter.view().actions.is_empty());
}

#[tokio::test]
async fn permission_loss_clears_and_regain_refetches() {
    let h = harness(TestSystemApi::with_commands(json!({
        "core": [{"action": "restart", "name": "Restart"}]
    })));
    h.presenter.request_data().await.expect("data");
    assert_eq!(h.presenter.view().actions.len(), 1);

    h.auth.replace([]);
    h.presenter
        .handle_event(DashboardEvent::UserPermissionsChanged)
        .await;
    assert_eq!(h.presenter.view(), SystemViewState::default());

    h.presenter.handle_event(DashboardEvent::SettingsUpdated).await;
    assert_eq!(h.api.command_requests.load(Ordering::SeqCst), 1);

    h.auth.replace([Permission::System]);
    h.presenter.handle_event(DashboardEvent::UserLoggedIn).await;
    assert_eq!(h.api.command_requests.load(Ordering::SeqCst), 2);
    assert_eq!(h.presenter.view().actions.len(), 1);
}

#[tokio::test]
async fn requests_without_permission_do_not_reach_the_host() {
    let h = harness(TestSystemApi::default());
    h.auth.replace([]);

    let err = h.presenter.request_data().await.expect_err("denied");
    assert!(err.is_permission_denied());
    assert_eq!(h.api.command_requests.load(Ordering::SeqCst), 0);

    let outcome = h
        .presenter
        .execute_command(ActionSource::Core, &command("shutdown"))
        .await;
    assert!(matches!(outcome, Err(CommandError::PermissionDenied(_))));
    assert!(h.api.executed.lock().expect("executed").is_empty());
}

#[tokio::test]
async fn python_eol_notice_is_acknowledged_for_thirty_days() {
    let h = harness(TestSystemApi::with_notices(eol_notices("3.7", "2023-06-01", true)));

    h.presenter.fetch_startup_notices().await.expect("notices");
    assert_eq!(h.notifier.shown().len(), 1);
    assert_eq!(h.notifier.shown()[0].kind, NotificationKind::Warning);
    assert!(h.notifier.shown()[0].text.contains("will reach its end of life"));
    assert_eq!(
        h.cookies.get(PYTHON_EOL_COOKIE).as_deref(),
        Some("3.7;2023-06-01")
    );

    *h.now.lock().expect("clock") = start() + chrono::Duration::days(10);
    h.presenter.fetch_startup_notices().await.expect("notices");
    assert_eq!(h.notifier.shown().len(), 1, "same token within 30 days");
    assert!(h.notifier.visible().is_empty(), "previous notice is cleared");

    h.api.set_notices(eol_notices("3.8", "2024-06-01", false));
    h.presenter.fetch_startup_notices().await.expect("notices");
    assert_eq!(h.notifier.shown().len(), 2, "token changed");
    assert!(h.notifier.shown()[1].text.contains("reached its end of life"));
}

#[tokio::test]
async fn python_eol_notice_returns_after_expiry() {
    let h = harness(TestSystemApi::with_notices(eol_notices("3.7", "2023-06-01", true)));

    h.presenter.fetch_startup_notices().await.expect("notices");
    *h.now.lock().expect("clock") = start() + chrono::Duration::days(31);
    h.presenter.fetch_startup_notices().await.expect("notices");

    assert_eq!(h.notifier.shown().len(), 2);
}

#[tokio::test]
async fn permanently_dismissed_eol_notice_stays_hidden() {
    let h = harness(TestSystemApi::with_notices(eol_notices("3.7", "2023-06-01", false)));
    h.cookies.set(
        PYTHON_EOL_COOKIE,
        PYTHON_EOL_DISMISSED_FOREVER,
        Duration::from_secs(10 * 365 * 24 * 60 * 60),
    );

    h.presenter.fetch_startup_notices().await.expect("notices");

    assert!(h.notifier.shown().is_empty());
    assert_eq!(
        h.cookies.get(PYTHON_EOL_COOKIE).as_deref(),
        Some(PYTHON_EOL_DISMISSED_FOREVER)
    );
}

#[tokio::test]
async fn flagged_folders_notice_replaces_previous_instance() {
    let mut folders = BTreeMap::new();
    folders.insert("uploads".to_string(), "<not writable>".to_string());
    let h = harness(TestSystemApi::with_notices(StartupNotices {
        flagged_basefolders: folders,
        python_eol: None,
    }));

    h.presenter.fetch_startup_notices().await.expect("notices");
    h.presenter.fetch_startup_notices().await.expect("notices");

    assert_eq!(h.notifier.shown().len(), 2);
    let visible = h.notifier.visible();
    assert_eq!(visible.len(), 1);
    assert!(visible[0].sticky);
    assert!(visible[0].text.contains("<code>uploads</code>: &lt;not writable&gt;"));
}

#[tokio::test]
async fn confirmed_command_reports_success() {
    let h = harness(TestSystemApi::default());
    let mut shutdown = command("shutdown");
    shutdown.confirm = Some("Shut down now?".to_string());

    let outcome = h
        .presenter
        .execute_command(ActionSource::Core, &shutdown)
        .await
        .expect("outcome");

    assert_eq!(outcome, CommandOutcome::Success);
    assert_eq!(h.prompt.asked.load(Ordering::SeqCst), 1);
    let shown = h.notifier.shown();
    assert_eq!(shown[0].kind, NotificationKind::Success);
    assert_eq!(shown[0].text, "The command \"SHUTDOWN\" executed successfully");
}

#[tokio::test]
async fn async_command_reports_trigger() {
    let h = harness(TestSystemApi::default());
    let mut backup = command("backup");
    backup.is_async = true;

    h.presenter
        .execute_command(ActionSource::Custom, &backup)
        .await
        .expect("outcome");

    assert_eq!(h.prompt.asked.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.notifier.shown()[0].text,
        "The command \"BACKUP\" was triggered asynchronously"
    );
}

#[tokio::test]
async fn cancelled_confirmation_is_an_outcome_not_an_error() {
    let h = harness_with(TestSystemApi::default(), false);
    let mut reboot = command("reboot");
    reboot.confirm = Some("Reboot?".to_string());

    let outcome = h
        .presenter
        .execute_command(ActionSource::Core, &reboot)
        .await
        .expect("outcome");

    assert_eq!(outcome, CommandOutcome::Cancelled);
    assert!(h.api.executed.lock().expect("executed").is_empty());
    assert!(h.notifier.shown().is_empty());
}

#[tokio::test]
async fn ignorable_failure_resolves_as_ignored() {
    let h = harness(TestSystemApi {
        fail_execution_with: Some((500, "exit code 1".to_string())),
        ..TestSystemApi::default()
    });
    let mut restart = command("restart");
    restart.ignore = true;

    let outcome = h
        .presenter
        .execute_command(ActionSource::Core, &restart)
        .await
        .expect("ignored failures resolve");

    assert_eq!(outcome, CommandOutcome::Ignored);
    assert!(h.notifier.shown().is_empty());
}

#[tokio::test]
async fn failure_shows_error_with_raw_body() {
    let h = harness(TestSystemApi {
        fail_execution_with: Some((500, "<stderr> exit code 1".to_string())),
        ..TestSystemApi::default()
    });

    let err = h
        .presenter
        .execute_command(ActionSource::Plugin, &command("update"))
        .await
        .expect_err("should fail");

    match err {
        CommandError::Failed { action, source } => {
            assert_eq!(action, "update");
            assert_eq!(source.status(), Some(500));
        }
        other => panic!("unexpected error {other:?}"),
    }
    let shown = h.notifier.shown();
    assert_eq!(shown[0].kind, NotificationKind::Error);
    assert!(shown[0].sticky);
    assert!(shown[0].text.contains("could not be executed"));
    assert!(shown[0].text.contains("<pre>&lt;stderr&gt; exit code 1</pre>"));
}

#[tokio::test]
async fn failure_prefers_host_error_message() {
    let h = harness(TestSystemApi {
        fail_execution_with: Some((409, r#"{"error": "Printer is busy"}"#.to_string())),
        ..TestSystemApi::default()
    });

    h.presenter
        .execute_command(ActionSource::Core, &command("shutdown"))
        .await
        .expect_err("should fail");

    let shown = h.notifier.shown();
    assert_eq!(shown.len(), 1);
    assert!(shown[0].text.contains("<pre>Printer is busy</pre>"));
    assert!(!shown[0].text.contains("&quot;error&quot;"));
}

#[tokio::test]
async fn unwired_system_api_reports_unavailable() {
    let presenter = SystemActionsPresenter::new(
        Arc::new(LoginState::new([Permission::System])),
        Arc::new(crate::MissingSystemApi),
        Arc::new(RecordingNotifier::default()),
        Arc::new(crate::MissingConfirmationPrompt),
        Arc::new(MemoryCookieStore::new()),
        EventBus::new(),
    );

    let err = presenter.request_data().await.expect_err("no api");
    assert!(matches!(
        err,
        PresenterError::Request(RequestError::Unavailable(_))
    ));
    assert_eq!(presenter.view(), SystemViewState::default());

    let mut reboot = command("reboot");
    reboot.confirm = Some("Reboot?".to_string());
    let outcome = presenter
        .execute_command(ActionSource::Core, &reboot)
        .await
        .expect("outcome");
    assert_eq!(outcome, CommandOutcome::Cancelled);
}
