use chrono::NaiveDate;
use native_tls::{TlsConnector, TlsStream};
use std::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::MailConfig;
use crate::mail::{FetchError, Mailbox, MessageId};

type Session = imap::Session<TlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("tls setup failed: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("could not connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        source: imap::error::Error,
    },
    #[error("login rejected for {user}: {source}")]
    Auth {
        user: String,
        source: imap::error::Error,
    },
    #[error("could not select {mailbox}: {source}")]
    Select {
        mailbox: String,
        source: imap::error::Error,
    },
}

fn is_localhost(host: &str) -> bool {
    host == "127.0.0.1" || host == "localhost"
}

fn tls_connector_for(cfg: &MailConfig) -> Result<TlsConnector, native_tls::Error> {
    let mut b = TlsConnector::builder();

    if is_localhost(&cfg.host) {
        b.danger_accept_invalid_certs(true);
        b.danger_accept_invalid_hostnames(true);
    }

    b.build()
}

/// IMAP format for SEARCH dates, e.g. `05-Mar-2026`.
pub fn since_criterion(since: NaiveDate) -> String {
    format!("SINCE {}", since.format("%d-%b-%Y"))
}

/// An authenticated IMAP session. Dropping it closes the selected folder and
/// logs out.
pub struct ImapMailbox {
    session: Session,
    selected: Option<String>,
}

impl ImapMailbox {
    pub fn open(cfg: &MailConfig) -> Result<Self, SessionError> {
        let tls = tls_connector_for(cfg)?;
        let addr = (cfg.host.as_str(), cfg.port);

        let connected = if cfg.starttls {
            imap::connect_starttls(addr, &cfg.host, &tls)
        } else {
            imap::connect(addr, &cfg.host, &tls)
        };
        let client = connected.map_err(|source| SessionError::Connect {
            host: cfg.host.clone(),
            port: cfg.port,
            source,
        })?;

        let session = client
            .login(&cfg.username, &cfg.password)
            .map_err(|(source, _)| SessionError::Auth {
                user: cfg.username.clone(),
                source,
            })?;

        info!(host = %cfg.host, "connected to mailbox");
        Ok(Self {
            session,
            selected: None,
        })
    }

    /// Selects a folder and returns how many messages it holds.
    pub fn select(&mut self, mailbox: &str) -> Result<u32, SessionError> {
        let status = self
            .session
            .select(mailbox)
            .map_err(|source| SessionError::Select {
                mailbox: mailbox.to_string(),
                source,
            })?;
        self.selected = Some(mailbox.to_string());
        debug!(mailbox, exists = status.exists, "folder selected");
        Ok(status.exists)
    }
}

impl Mailbox for ImapMailbox {
    fn search_since(&mut self, since: NaiveDate) -> Result<Vec<MessageId>, FetchError> {
        let mut ids: Vec<MessageId> = self
            .session
            .search(since_criterion(since))?
            .into_iter()
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn fetch_raw(&mut self, id: MessageId) -> Result<Vec<u8>, FetchError> {
        let fetches = self.session.fetch(id.to_string(), "BODY.PEEK[]")?;
        let f = fetches.iter().next().ok_or(FetchError::Missing(id))?;
        let raw = f.body().ok_or(FetchError::NoBody(id))?;
        Ok(raw.to_vec())
    }
}

impl Drop for ImapMailbox {
    fn drop(&mut self) {
        if self.selected.take().is_some() {
            if let Err(e) = self.session.close() {
                warn!(error = %e, "imap close failed");
            }
        }
        if let Err(e) = self.session.logout() {
            warn!(error = %e, "imap logout failed");
        }
        info!("mailbox connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn since_criterion_uses_imap_date_format() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        assert_eq!(since_criterion(d), "SINCE 05-Mar-2026");
    }

    #[test]
    fn localhost_detection() {
        assert!(is_localhost("127.0.0.1"));
        assert!(is_localhost("localhost"));
        assert!(!is_localhost("imap.gmail.com"));
    }
}
