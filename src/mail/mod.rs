pub mod extract;
pub mod imap;
pub mod smtp;

use chrono::{DateTime, Duration, Local, NaiveDate};
use tracing::{debug, error, info, warn};

/// IMAP message sequence number.
pub type MessageId = u32;

/// One inbox message after extraction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NormalizedMessage {
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: String,
    pub body: String,
    /// Set when the sender is the mailbox owner; the body is left empty.
    pub is_from_owner: bool,
}

impl NormalizedMessage {
    /// Whether the message goes on to analysis.
    pub fn is_relevant(&self) -> bool {
        !self.is_from_owner && !self.body.trim().is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("imap: {0}")]
    Transport(#[from] ::imap::error::Error),
    #[error("message {0} not found")]
    Missing(MessageId),
    #[error("message {0} has no body")]
    NoBody(MessageId),
}

/// The part of a mailbox session the pipeline needs.
pub trait Mailbox {
    fn search_since(&mut self, since: NaiveDate) -> Result<Vec<MessageId>, FetchError>;
    fn fetch_raw(&mut self, id: MessageId) -> Result<Vec<u8>, FetchError>;
}

/// Ids of messages that arrived within the last `window_hours`. SEARCH only
/// has day granularity, so anything from the cutoff's calendar day counts.
/// Failures are logged and come back as an empty list.
pub fn list_recent(
    mailbox: &mut dyn Mailbox,
    window_hours: u32,
    now: DateTime<Local>,
) -> Vec<MessageId> {
    let Some(cutoff) = now.checked_sub_signed(Duration::hours(i64::from(window_hours))) else {
        error!(window_hours, "search window reaches past the representable calendar");
        return Vec::new();
    };
    match mailbox.search_since(cutoff.date_naive()) {
        Ok(ids) => {
            info!(count = ids.len(), window_hours, "found messages");
            ids
        }
        Err(e) => {
            error!(error = %e, "message search failed");
            Vec::new()
        }
    }
}

/// Fetches and extracts every id in order, keeping only messages worth
/// analyzing. Per-message failures drop that message.
pub fn collect_relevant(
    mailbox: &mut dyn Mailbox,
    ids: &[MessageId],
    owner: &str,
) -> Vec<NormalizedMessage> {
    let mut out = Vec::with_capacity(ids.len());

    for &id in ids {
        let raw = match mailbox.fetch_raw(id) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(id, error = %e, "fetch failed");
                continue;
            }
        };
        let msg = match extract::extract(&raw, owner) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(id, error = %e, "extract failed");
                continue;
            }
        };
        if msg.is_relevant() {
            debug!(id, subject = %msg.subject, date = %msg.date, to = %msg.to, "kept");
            out.push(msg);
        } else {
            debug!(id, from_owner = msg.is_from_owner, "skipped");
        }
    }

    info!(kept = out.len(), fetched = ids.len(), "processed relevant messages");
    out
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::BTreeMap;

    /// In-memory mailbox keyed by sequence number.
    #[derive(Default)]
    pub struct FakeMailbox {
        pub messages: BTreeMap<MessageId, Vec<u8>>,
        pub fail_search: bool,
        pub searched: Vec<NaiveDate>,
    }

    impl FakeMailbox {
        pub fn with<S: AsRef<[u8]>>(messages: &[(MessageId, S)]) -> Self {
            Self {
                messages: messages
                    .iter()
                    .map(|(id, raw)| (*id, raw.as_ref().to_vec()))
                    .collect(),
                ..Self::default()
            }
        }
    }

    impl Mailbox for FakeMailbox {
        fn search_since(&mut self, since: NaiveDate) -> Result<Vec<MessageId>, FetchError> {
            self.searched.push(since);
            if self.fail_search {
                return Err(FetchError::Transport(::imap::error::Error::Bad(
                    "search refused".to_string(),
                )));
            }
            Ok(self.messages.keys().copied().collect())
        }

        fn fetch_raw(&mut self, id: MessageId) -> Result<Vec<u8>, FetchError> {
            self.messages.get(&id).cloned().ok_or(FetchError::Missing(id))
        }
    }
}
