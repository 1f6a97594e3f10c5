//! Terminal front end: prints the page on every change and turns stdin into input

use std::{path::Path, sync::Arc};

use anyhow::Context;
use base64::Engine as _;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::{
    state::{ImageAttachment, Session},
    tasks::activity::ActivityEvent,
    ui::{Document, ElementKey, TIMEOUT_NOTICE_ID},
};

const PROGRESS_WIDTH: usize = 30;

/// One line typed by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalCommand {
    Submit,
    Timeout(String),
    Hide,
    Show,
    Image(String),
    Quit,
    Text(String),
}

impl TerminalCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let (command, argument) = match trimmed.split_once(char::is_whitespace) {
            Some((command, argument)) => (command, argument.trim()),
            None => (trimmed, ""),
        };
        match command {
            ":submit" => TerminalCommand::Submit,
            ":timeout" => TerminalCommand::Timeout(argument.to_string()),
            ":hide" => TerminalCommand::Hide,
            ":show" => TerminalCommand::Show,
            ":image" if !argument.is_empty() => TerminalCommand::Image(argument.to_string()),
            ":quit" | ":q" => TerminalCommand::Quit,
            _ => TerminalCommand::Text(line.to_string()),
        }
    }
}

/// Plain-text frame of the page
pub fn render_frame(document: &Document) -> String {
    let text = |id: &str| document.element(id).map(|el| el.text).unwrap_or_default();
    let mut lines = Vec::new();

    let countdown = document.element(ElementKey::TimeoutCountdown.id());
    let tier = countdown
        .as_ref()
        .and_then(|el| el.classes.get(1).cloned())
        .unwrap_or_else(|| "normal".to_string());
    lines.push(format!(
        "[{}] {} ({})",
        text(ElementKey::TimeoutCountdown.id()),
        text(ElementKey::TimeoutMessage.id()),
        tier
    ));

    if let Some(width) = document
        .element(ElementKey::TimeoutProgressBar.id())
        .and_then(|bar| bar.width_percent)
    {
        let filled = ((width / 100.0) * PROGRESS_WIDTH as f64).round() as usize;
        let filled = filled.min(PROGRESS_WIDTH);
        lines.push(format!(
            "[{}{}] {:.0}%",
            "#".repeat(filled),
            "-".repeat(PROGRESS_WIDTH - filled),
            width
        ));
    }

    if let Some(notice) = document.element(TIMEOUT_NOTICE_ID) {
        lines.push(format!("!! {}", notice.text));
    }

    for notification in document.notifications() {
        lines.push(format!(
            "<{}> {}",
            notification.level.label(),
            notification.message
        ));
    }

    if let Some(button) = document.element(ElementKey::SubmitBtn.id()) {
        let state = if button.disabled { "disabled" } else { "enabled" };
        lines.push(format!("submit: {} ({})", button.text, state));
    }
    lines.join("\n")
}

/// Print a frame every time the document changes
pub async fn run_view(document: Arc<Document>) {
    let mut changes = document.subscribe();
    while changes.changed().await.is_ok() {
        println!("{}\n", render_frame(&document));
    }
}

/// Read stdin until EOF or `:quit`, feeding activity and commands to the session
pub async fn run_input(session: Arc<Session>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match TerminalCommand::parse(&line) {
            TerminalCommand::Quit => break,
            command => handle_command(&session, command).await,
        }
    }
    Ok(())
}

pub async fn handle_command(session: &Session, command: TerminalCommand) {
    debug!("Terminal command: {:?}", command);
    match command {
        TerminalCommand::Submit => {
            session.notify_activity(ActivityEvent::Click);
            session.submit_now().await;
        }
        TerminalCommand::Timeout(raw) => {
            session
                .renderer()
                .set_value(ElementKey::CustomTimeoutInput, &raw);
            // Rejections are already shown as notifications
            let _ = session.apply_custom_timeout_input();
        }
        TerminalCommand::Hide => {
            session.notify_activity(ActivityEvent::Visibility { hidden: true });
        }
        TerminalCommand::Show => {
            session.notify_activity(ActivityEvent::Visibility { hidden: false });
        }
        TerminalCommand::Image(path) => {
            session.notify_activity(ActivityEvent::Input);
            match load_image(Path::new(&path)).await {
                Ok(image) => {
                    if let Err(e) = session.attach_image(image) {
                        warn!("Failed to attach {}: {:#}", path, e);
                    }
                }
                Err(e) => warn!("{:#}", e),
            }
        }
        TerminalCommand::Text(text) => {
            session.notify_activity(ActivityEvent::Input);
            let renderer = session.renderer();
            let mut current = renderer.value(ElementKey::TextFeedback).unwrap_or_default();
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(&text);
            renderer.set_value(ElementKey::TextFeedback, &current);
        }
        TerminalCommand::Quit => {}
    }
}

/// Read a file into a data URL attachment
pub async fn load_image(path: &Path) -> anyhow::Result<ImageAttachment> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read image {}", path.display()))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(ImageAttachment {
        name: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        data: format!("data:{};base64,{}", mime_for_path(path), encoded),
    })
}

fn mime_for_path(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}
