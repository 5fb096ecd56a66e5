//! User-visible notifications and confirmation prompts.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use html2text::render::text_renderer::TrivialDecorator;
use tracing::{error, info, warn};

const PLAIN_TEXT_WIDTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    /// HTML fragment; interpolated values are escaped by the producer.
    pub text: String,
    pub kind: NotificationKind,
    /// Sticky notifications stay until removed or dismissed by the user.
    pub sticky: bool,
}

impl Notification {
    pub fn success(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            kind: NotificationKind::Success,
            sticky: false,
        }
    }

    pub fn warning(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            kind: NotificationKind::Warning,
            sticky: true,
        }
    }

    pub fn error(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            kind: NotificationKind::Error,
            sticky: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationId(pub u64);

pub trait Notifier: Send + Sync {
    fn show(&self, notification: Notification) -> NotificationId;
    fn remove(&self, id: NotificationId);
}

/// Renders notifications into the log; used by headless hosts.
#[derive(Default)]
pub struct TracingNotifier {
    next_id: AtomicU64,
}

impl Notifier for TracingNotifier {
    fn show(&self, notification: Notification) -> NotificationId {
        let id = NotificationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let text = strip_markup(&notification.text);
        match notification.kind {
            NotificationKind::Success => {
                info!(id = id.0, title = %notification.title, "{text}")
            }
            NotificationKind::Warning => warn!(id = id.0, title = %notification.title, "{text}"),
            NotificationKind::Error => error!(id = id.0, title = %notification.title, "{text}"),
        }
        id
    }

    fn remove(&self, _id: NotificationId) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub title: String,
    pub message: String,
    pub question: Option<String>,
    pub cancel_label: String,
    pub proceed_label: String,
}

impl ConfirmationRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            title: "Are you sure?".to_string(),
            message: message.into(),
            question: None,
            cancel_label: "Cancel".to_string(),
            proceed_label: "Proceed".to_string(),
        }
    }
}

#[async_trait]
pub trait ConfirmationPrompt: Send + Sync {
    /// `true` when the user chose to proceed.
    async fn confirm(&self, request: ConfirmationRequest) -> bool;
}

/// Declines every prompt, so nothing requiring consent runs unattended.
pub struct MissingConfirmationPrompt;

#[async_trait]
impl ConfirmationPrompt for MissingConfirmationPrompt {
    async fn confirm(&self, request: ConfirmationRequest) -> bool {
        warn!(title = %request.title, "no confirmation prompt wired; treating as cancelled");
        false
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            '`' => escaped.push_str("&#x60;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Plain text rendering of a notification or prompt body, one line per
/// block with blank lines dropped.
pub fn strip_markup(html: &str) -> String {
    let text = html2text::from_read_with_decorator(
        html.as_bytes(),
        PLAIN_TEXT_WIDTH,
        TrivialDecorator::new(),
    );
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
