use anyhow::Result;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, Message, SmtpTransport, Transport};
use std::io::Write;
use tracing::{error, info};

use crate::config::{MailConfig, UserConfig};

fn is_localhost(host: &str) -> bool {
    host == "127.0.0.1" || host == "localhost"
}

pub trait ReportSender {
    fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// Sends the digest from the owner to the owner.
pub struct SmtpSender<'a> {
    cfg: &'a MailConfig,
    user: &'a UserConfig,
}

impl<'a> SmtpSender<'a> {
    pub fn new(cfg: &'a MailConfig, user: &'a UserConfig) -> Self {
        Self { cfg, user }
    }
}

pub fn build_message(user: &UserConfig, subject: &str, body: &str) -> Result<Message> {
    let owner: Address = user.email.trim().parse()?;
    let name = Some(user.name.trim().to_string()).filter(|n| !n.is_empty());
    Ok(Message::builder()
        .from(Mailbox::new(name, owner.clone()))
        .to(Mailbox::new(None, owner))
        .subject(subject)
        .multipart(MultiPart::mixed().singlepart(SinglePart::plain(body.to_string())))?)
}

impl ReportSender for SmtpSender<'_> {
    fn send(&self, subject: &str, body: &str) -> Result<()> {
        let cfg = self.cfg;
        let email = build_message(self.user, subject, body)?;

        let creds = Credentials::new(cfg.username.clone(), cfg.password.clone());

        let mut tlsb = TlsParameters::builder(cfg.host.clone());
        if is_localhost(&cfg.host) {
            tlsb = tlsb
                .dangerous_accept_invalid_certs(true)
                .dangerous_accept_invalid_hostnames(true);
        }
        let tls = tlsb.build()?;

        let mailer = SmtpTransport::builder_dangerous(&cfg.host)
            .port(cfg.port)
            .credentials(creds)
            .tls(if cfg.starttls { Tls::Required(tls) } else { Tls::Wrapper(tls) })
            .build();

        mailer.send(&email)?;
        Ok(())
    }
}

pub fn report_subject(date: chrono::NaiveDate) -> String {
    format!("Inbox Digest - {}", date.format("%Y-%m-%d"))
}

#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Printed,
}

/// Sends the report, or writes it to `out` when sending fails.
pub fn deliver_or_print(
    sender: &dyn ReportSender,
    subject: &str,
    report: &str,
    out: &mut dyn Write,
) -> Delivery {
    info!("sending email report");
    match sender.send(subject, report) {
        Ok(()) => {
            info!("email report sent");
            Delivery::Sent
        }
        Err(e) => {
            error!(error = %e, "sending report failed, printing instead");
            if let Err(e) = writeln!(out, "Report content:\n{report}") {
                error!(error = %e, "could not print report");
            }
            Delivery::Printed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    struct Refused;

    impl ReportSender for Refused {
        fn send(&self, _: &str, _: &str) -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused").into())
        }
    }

    struct Accepts;

    impl ReportSender for Accepts {
        fn send(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    fn owner() -> UserConfig {
        UserConfig {
            name: "Me".to_string(),
            email: "me@example.com".to_string(),
        }
    }

    #[test]
    fn connection_error_prints_full_report() {
        let report = "# Inbox Digest\nline two\n";
        let mut out = Vec::new();
        assert_eq!(deliver_or_print(&Refused, "s", report, &mut out), Delivery::Printed);
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains(report));
    }

    #[test]
    fn successful_send_prints_nothing() {
        let mut out = Vec::new();
        assert_eq!(deliver_or_print(&Accepts, "s", "r", &mut out), Delivery::Sent);
        assert!(out.is_empty());
    }

    #[test]
    fn subject_carries_date() {
        let d = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        assert_eq!(report_subject(d), "Inbox Digest - 2026-10-19");
    }

    #[test]
    fn message_goes_owner_to_owner_as_plain_text() {
        let msg = build_message(&owner(), "Inbox Digest - 2026-10-19", "hello digest").unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("From: Me <me@example.com>"));
        assert!(raw.contains("To: me@example.com"));
        assert!(raw.contains("Subject: Inbox Digest - 2026-10-19"));
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("hello digest"));
    }

    #[test]
    fn bad_owner_address_is_an_error() {
        let user = UserConfig {
            name: "x".to_string(),
            email: "not an address".to_string(),
        };
        assert!(build_message(&user, "s", "b").is_err());
    }
}
