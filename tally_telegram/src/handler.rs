use crate::{Command, Error, Result, TallyBot};
use tally_core::{
    Attachment, AttachmentKind, CancelReport, InboundEvent, ResetOutcome, StatusReport,
};
use teloxide::net::Download;
use teloxide::requests::Requester;
use teloxide::types::{ChatAction, Document, FileId, Message};
use tracing::info;

/// Handle bot commands
pub async fn handle_command(bot: TallyBot, msg: Message, cmd: Command) -> Result<()> {
    let chat_id = msg.chat.id.0;
    let username = msg
        .from
        .as_ref()
        .and_then(|u| u.username.as_deref())
        .unwrap_or("unknown");

    match cmd {
        Command::Start => {
            info!("[@{username}] Command: /start");
            bot.bot
                .send_message(msg.chat.id, Command::welcome_text())
                .await?;
        }
        Command::Help => {
            info!("[@{username}] Command: /help");
            bot.bot
                .send_message(msg.chat.id, Command::help_text())
                .await?;
        }
        Command::Cancel => {
            info!("[@{username}] Command: /cancel");
            // a racing /reset already answered for us
            if let Some(report) = bot.cancel(chat_id).await {
                bot.bot
                    .send_message(msg.chat.id, render_cancel(&report))
                    .await?;
            }
        }
        Command::Reset => {
            info!("[@{username}] Command: /reset");
            let outcome = bot.reset(chat_id);
            bot.bot
                .send_message(msg.chat.id, render_reset(&outcome))
                .await?;
        }
        Command::Status => {
            info!("[@{username}] Command: /status");
            let report = bot.status(chat_id);
            bot.bot
                .send_message(msg.chat.id, render_status(&report))
                .await?;
        }
    }

    Ok(())
}

/// Handle any message (commands, text, or documents)
pub async fn handle_message(bot: TallyBot, msg: Message) -> Result<()> {
    let chat_id = msg.chat.id.0;
    if !bot.is_allowed(chat_id) {
        return Err(Error::Unauthorized(chat_id));
    }

    let text = msg.text().or_else(|| msg.caption()).unwrap_or("");
    let username = msg
        .from
        .as_ref()
        .and_then(|u| u.username.as_deref())
        .unwrap_or("unknown");

    // Check if this is a command
    if let Some(cmd) = Command::parse_from_text(text) {
        return handle_command(bot, msg, cmd).await;
    }

    // Fetch whatever document came along
    let attachment = if let Some(size) = msg.photo().and_then(|sizes| sizes.last()) {
        Some(download(&bot, size.file.id.clone(), AttachmentKind::Photo, None).await?)
    } else if let Some(doc) = msg.document() {
        if !is_pdf(doc) {
            bot.bot
                .send_message(msg.chat.id, "I can only read photos and PDF documents for now.")
                .await?;
            return Ok(());
        }
        Some(download(&bot, doc.file.id.clone(), AttachmentKind::Pdf, doc.file_name.clone()).await?)
    } else {
        None
    };

    if text.is_empty() && attachment.is_none() {
        // sticker, voice note, and the like
        return Ok(());
    }

    info!("[@{username}] Message: {text}");

    // Show typing indicator
    bot.bot
        .send_chat_action(msg.chat.id, ChatAction::Typing)
        .await?;

    let user = TallyBot::chat_key(chat_id);
    let event = match attachment {
        Some(attachment) => InboundEvent::document(user, text, attachment),
        None => InboundEvent::message(user, text),
    };

    // A discarded turn means /reset wiped the conversation mid-flight;
    // answering it would resurrect a conversation the user just killed.
    let Some(response) = bot.process(event).await else {
        info!("[@{username}] Turn discarded by a reset");
        return Ok(());
    };

    info!("[@{username}] Response: {response}");
    bot.bot.send_message(msg.chat.id, response).await?;

    Ok(())
}

fn is_pdf(doc: &Document) -> bool {
    doc.mime_type
        .as_ref()
        .is_some_and(|m| m.essence_str() == "application/pdf")
        || doc
            .file_name
            .as_deref()
            .is_some_and(|n| n.to_lowercase().ends_with(".pdf"))
}

async fn download(
    bot: &TallyBot,
    file_id: FileId,
    kind: AttachmentKind,
    file_name: Option<String>,
) -> Result<Attachment> {
    let file = bot.bot.get_file(file_id).await?;
    let mut payload = Vec::new();
    bot.bot.download_file(&file.path, &mut payload).await?;
    info!(kind = %kind, bytes = payload.len(), "attachment downloaded");

    let attachment = Attachment::new(kind, payload);
    Ok(match file_name {
        Some(name) => attachment.with_file_name(name),
        None => attachment,
    })
}

fn humanize(flow: &str) -> String {
    flow.replace('_', " ")
}

fn fmt_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{secs}s")
    }
}

fn render_cancel(report: &CancelReport) -> String {
    match report {
        CancelReport::Idle => "Nothing to cancel.".to_string(),
        CancelReport::Root { flow } => {
            format!("Okay, stopped the {} conversation.", humanize(flow))
        }
        // the parent already phrased what happens next
        CancelReport::Child { reply, .. } => reply.clone(),
    }
}

fn render_reset(outcome: &ResetOutcome) -> String {
    let mut parts = Vec::new();
    if let Some(flow) = outcome.abandoned_flow {
        parts.push(format!("Dropped the {} conversation.", humanize(flow)));
    }
    if outcome.dropped_tasks > 0 {
        parts.push(format!(
            "Discarded {} queued message(s).",
            outcome.dropped_tasks
        ));
    }
    if !outcome.purged_stages.is_empty() {
        let names: Vec<String> = outcome.purged_stages.iter().map(|s| humanize(s)).collect();
        parts.push(format!("Cleared staged work: {}.", names.join(", ")));
    }
    if parts.is_empty() {
        "Nothing was in progress. Fresh start anyway!".to_string()
    } else {
        parts.join(" ")
    }
}

fn render_status(report: &StatusReport) -> String {
    let mut lines = Vec::new();
    match &report.session {
        Some(session) => {
            let mut line = if session.active == session.root {
                format!(
                    "Working on {} (step: {})",
                    humanize(session.root),
                    humanize(session.active_step)
                )
            } else {
                format!(
                    "Working on {}, currently in {} (step: {})",
                    humanize(session.root),
                    humanize(session.active),
                    humanize(session.active_step)
                )
            };
            line.push_str(&format!(", idle for {}.", fmt_duration(session.idle)));
            lines.push(line);
        }
        None => lines.push("No conversation in progress.".to_string()),
    }
    if report.queue_depth > 0 {
        lines.push(format!(
            "{} message(s) waiting in line.",
            report.queue_depth
        ));
    }
    for stage in &report.stages {
        lines.push(format!(
            "Staged {}: {} old.",
            humanize(stage.namespace),
            fmt_duration(stage.age)
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tally_core::{SessionSnapshot, StageStatus};

    #[test]
    fn cancel_rendering_covers_all_outcomes() {
        assert_eq!(render_cancel(&CancelReport::Idle), "Nothing to cancel.");
        assert_eq!(
            render_cancel(&CancelReport::Root {
                flow: "document_import"
            }),
            "Okay, stopped the document import conversation."
        );
        assert_eq!(
            render_cancel(&CancelReport::Child {
                cancelled: "category_picker",
                reply: "Recorded 5.00 spent at Cafe (uncategorized).".to_string()
            }),
            "Recorded 5.00 spent at Cafe (uncategorized)."
        );
    }

    #[test]
    fn reset_rendering_lists_what_was_swept() {
        let outcome = ResetOutcome {
            abandoned_flow: Some("expense"),
            dropped_tasks: 2,
            purged_stages: vec!["document_import"],
        };
        assert_eq!(
            render_reset(&outcome),
            "Dropped the expense conversation. Discarded 2 queued message(s). \
             Cleared staged work: document import."
        );

        let nothing = ResetOutcome {
            abandoned_flow: None,
            dropped_tasks: 0,
            purged_stages: vec![],
        };
        assert_eq!(
            render_reset(&nothing),
            "Nothing was in progress. Fresh start anyway!"
        );
    }

    #[test]
    fn status_rendering_shows_the_delegation() {
        let report = StatusReport {
            session: Some(SessionSnapshot {
                root: "expense",
                active: "category_picker",
                active_step: "awaiting_choice",
                frames: vec![],
                started_at: chrono::Utc::now(),
                last_active_at: chrono::Utc::now(),
                idle: Duration::from_secs(130),
                busy: false,
            }),
            queue_depth: 1,
            stages: vec![StageStatus {
                namespace: "category_proposal",
                age: Duration::from_secs(45),
            }],
        };
        let text = render_status(&report);
        assert!(text.contains("Working on expense"), "got: {text}");
        assert!(text.contains("currently in category picker (step: awaiting choice)"));
        assert!(text.contains("idle for 2m 10s"));
        assert!(text.contains("1 message(s) waiting in line."));
        assert!(text.contains("Staged category proposal: 45s old."));
    }

    #[test]
    fn idle_status_is_a_single_line() {
        let report = StatusReport {
            session: None,
            queue_depth: 0,
            stages: vec![],
        };
        assert_eq!(render_status(&report), "No conversation in progress.");
    }
}
