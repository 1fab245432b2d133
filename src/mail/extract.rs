use anyhow::Result;
use mailparse::{MailHeaderMap, ParsedMail};
use tracing::debug;

use crate::mail::NormalizedMessage;

const HTML_WRAP_WIDTH: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unparseable message: {0}")]
    Parse(#[from] mailparse::MailParseError),
}

type HtmlConverter = fn(&str) -> Result<String>;

fn html_primary(html: &str) -> Result<String> {
    Ok(html2text::from_read(html.as_bytes(), HTML_WRAP_WIDTH)?)
}

/// Bare text nodes of the parsed document, one per line.
fn html_text_nodes(html: &str) -> Result<String> {
    let doc = scraper::Html::parse_document(html);
    let text = doc
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if text.is_empty() {
        anyhow::bail!("no text nodes in html");
    }
    Ok(text)
}

const HTML_CONVERTERS: [HtmlConverter; 2] = [html_primary, html_text_nodes];

/// Runs each converter in turn; when all of them fail the HTML is kept as is.
fn convert_html_with(html: &str, converters: &[HtmlConverter]) -> String {
    for convert in converters {
        match convert(html) {
            Ok(text) => return text,
            Err(e) => debug!(error = %e, "html conversion failed, trying next"),
        }
    }
    html.to_string()
}

pub fn html_to_text(html: &str) -> String {
    convert_html_with(html, &HTML_CONVERTERS)
}

/// Case-insensitive substring match of the owner address against a From
/// header. "Bob via list <owner@x>" matches too.
pub fn is_owner_address(from: &str, owner: &str) -> bool {
    let owner = owner.trim();
    !owner.is_empty() && from.to_lowercase().contains(&owner.to_lowercase())
}

fn header(m: &ParsedMail, name: &str) -> String {
    m.headers.get_first_value(name).unwrap_or_default()
}

/// Decoded text of a single leaf part, or None when it is not text.
fn part_text(part: &ParsedMail, treat_other_as_plain: bool) -> Option<String> {
    let ctype = part.ctype.mimetype.to_lowercase();
    let is_html = ctype == "text/html";
    if !is_html && ctype != "text/plain" && !treat_other_as_plain {
        return None;
    }

    let raw = match part.get_body_raw() {
        Ok(raw) => raw,
        Err(e) => {
            debug!(ctype = %ctype, error = %e, "skipping undecodable part");
            return None;
        }
    };
    let text = String::from_utf8_lossy(&raw);

    if is_html {
        Some(html_to_text(&text))
    } else {
        Some(text.into_owned())
    }
}

fn walk_parts(part: &ParsedMail, out: &mut String) {
    if let Some(text) = part_text(part, false) {
        out.push_str(&text);
    }
    for sp in &part.subparts {
        walk_parts(sp, out);
    }
}

fn extract_body(m: &ParsedMail) -> String {
    let mut body = String::new();
    if m.subparts.is_empty() {
        if let Some(text) = part_text(m, true) {
            body = text;
        }
    } else {
        walk_parts(m, &mut body);
    }
    body.trim().to_string()
}

/// Turns a raw RFC 822 message into a [`NormalizedMessage`]. Messages sent by
/// the owner come back flagged and without a body.
pub fn extract(raw: &[u8], owner: &str) -> Result<NormalizedMessage, ExtractError> {
    let parsed = mailparse::parse_mail(raw)?;

    let mut msg = NormalizedMessage {
        subject: header(&parsed, "Subject"),
        from: header(&parsed, "From"),
        to: header(&parsed, "To"),
        date: header(&parsed, "Date"),
        body: String::new(),
        is_from_owner: false,
    };

    if is_owner_address(&msg.from, owner) {
        msg.is_from_owner = true;
        return Ok(msg);
    }

    msg.body = extract_body(&parsed);
    Ok(msg)
}
