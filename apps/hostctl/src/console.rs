//! Terminal bindings for the presenters' prompt and form seams.

use std::{
    collections::BTreeMap,
    io::{self, BufRead, Write},
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use client_core::{
    notify::{strip_markup, ConfirmationPrompt, ConfirmationRequest},
    ConnectorForm,
};
use shared::domain::ConnectorId;
use tracing::{info, warn};

/// Asks on stdin; `assume_yes` answers every prompt with proceed.
pub struct TerminalPrompt {
    assume_yes: bool,
}

impl TerminalPrompt {
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }
}

fn render_prompt(request: &ConfirmationRequest) -> String {
    let mut text = format!("{}\n\n{}\n", request.title, strip_markup(&request.message));
    if let Some(question) = &request.question {
        text.push_str(&format!("\n{question}\n"));
    }
    text.push_str(&format!(
        "[{}/{}] (y/N): ",
        request.proceed_label, request.cancel_label
    ));
    text
}

fn answer_proceeds(answer: &str, request: &ConfirmationRequest) -> bool {
    let answer = answer.trim();
    answer.eq_ignore_ascii_case("y")
        || answer.eq_ignore_ascii_case("yes")
        || answer.eq_ignore_ascii_case(&request.proceed_label)
}

#[async_trait]
impl ConfirmationPrompt for TerminalPrompt {
    async fn confirm(&self, request: ConfirmationRequest) -> bool {
        if self.assume_yes {
            info!(title = %request.title, "confirmation assumed");
            return true;
        }

        let asked = tokio::task::spawn_blocking(move || -> io::Result<bool> {
            let mut stdout = io::stdout().lock();
            stdout.write_all(render_prompt(&request).as_bytes())?;
            stdout.flush()?;
            let mut answer = String::new();
            io::stdin().lock().read_line(&mut answer)?;
            Ok(answer_proceeds(&answer, &request))
        })
        .await;

        match asked {
            Ok(Ok(proceed)) => proceed,
            Ok(Err(err)) => {
                warn!("confirmation prompt failed: {err}");
                false
            }
            Err(err) => {
                warn!("confirmation prompt task failed: {err}");
                false
            }
        }
    }
}

/// Connection parameters given as `--param name=value` for a connector
/// without a dedicated form.
pub struct ArgumentForm {
    connector: ConnectorId,
    parameters: BTreeMap<String, String>,
}

impl ArgumentForm {
    pub fn parse(connector: ConnectorId, raw: &[String]) -> Result<Self> {
        let mut parameters = BTreeMap::new();
        for entry in raw {
            let Some((name, value)) = entry.split_once('=') else {
                bail!("parameter '{entry}' must look like name=value");
            };
            let name = name.trim();
            if name.is_empty() {
                bail!("parameter '{entry}' has an empty name");
            }
            parameters.insert(name.to_string(), value.trim().to_string());
        }
        Ok(Self {
            connector,
            parameters,
        })
    }
}

impl ConnectorForm for ArgumentForm {
    fn connector(&self) -> ConnectorId {
        self.connector.clone()
    }

    fn collect_parameters(&self) -> BTreeMap<String, String> {
        self.parameters.clone()
    }
}
