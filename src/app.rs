use anyhow::Result;
use chrono::{DateTime, Local, NaiveDateTime};
use std::sync::Arc;
use tracing::{error, info};

use crate::analysis::Analyzer;
use crate::config::Config;
use crate::digest::{self, ReportMeta};
use crate::llm::{ChatClient, TextAnalyzer};
use crate::mail::imap::ImapMailbox;
use crate::mail::smtp::{self, SmtpSender};
use crate::mail::{self, Mailbox, NormalizedMessage};

/// Lists the window and pulls every relevant message out of `mailbox`.
pub fn gather_inbox(
    mailbox: &mut dyn Mailbox,
    config: &Config,
    now: DateTime<Local>,
) -> Vec<NormalizedMessage> {
    let ids = mail::list_recent(mailbox, config.digest.window_hours, now);
    if ids.is_empty() {
        info!("no messages found in the specified time range");
        return Vec::new();
    }

    let messages = mail::collect_relevant(mailbox, &ids, config.owner());
    if messages.is_empty() {
        info!("no relevant emails found");
    }
    messages
}

/// The IMAP part of a run. The session is released before this returns.
fn read_inbox(config: &Config, now: DateTime<Local>) -> Vec<NormalizedMessage> {
    let mut mailbox = match ImapMailbox::open(&config.imap) {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "error connecting to mailbox");
            return Vec::new();
        }
    };
    if let Err(e) = mailbox.select(&config.digest.mailbox) {
        error!(error = %e, "error selecting mailbox");
        return Vec::new();
    }
    gather_inbox(&mut mailbox, config, now)
}

/// Analysis, aggregation and rendering of an already gathered batch.
pub async fn build_digest(
    client: &dyn TextAnalyzer,
    config: &Config,
    messages: Vec<NormalizedMessage>,
    generated_at: NaiveDateTime,
) -> String {
    let settings = &config.digest;
    let analyzer = Analyzer::new(client, &config.llm, settings);
    let analyzed = analyzer.analyze_all(messages, settings.concurrency).await;

    let groups = digest::group_by_category(&analyzed);
    info!(categories = groups.len(), "generating category summaries");
    let summaries =
        digest::summarize_categories(client, &config.llm, &groups, settings.concurrency).await;

    let top = digest::rank_by_importance(&analyzed, settings.top_n);

    let meta = ReportMeta {
        generated_at,
        window_hours: settings.window_hours,
        top_n: settings.top_n,
    };
    digest::render(&meta, &analyzed, &summaries, &top)
}

pub async fn run() -> Result<()> {
    let (config, created, config_path) = Config::load_or_create()?;
    if created {
        info!(
            path = %config_path.display(),
            "config.toml created. Fill in your credentials and run again."
        );
        return Ok(());
    }
    config.validate()?;
    let config = Arc::new(config);

    info!("starting inbox digest");
    let now = Local::now();

    let inbox_cfg = Arc::clone(&config);
    let messages = tokio::task::spawn_blocking(move || read_inbox(&inbox_cfg, now)).await?;
    if messages.is_empty() {
        return Ok(());
    }

    let client = ChatClient::new(&config.llm)?;
    let report = build_digest(&client, &config, messages, now.naive_local()).await;

    let subject = smtp::report_subject(now.date_naive());
    let send_cfg = Arc::clone(&config);
    tokio::task::spawn_blocking(move || {
        let sender = SmtpSender::new(&send_cfg.smtp, &send_cfg.user);
        let mut stdout = std::io::stdout().lock();
        smtp::deliver_or_print(&sender, &subject, &report, &mut stdout)
    })
    .await?;

    Ok(())
}
