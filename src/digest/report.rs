use chrono::NaiveDateTime;

use crate::analysis::AnalyzedMessage;
use crate::digest::aggregate::CategorySummary;

const BRIEF_SUBJECT_CHARS: usize = 60;
const BRIEF_SUMMARY_CHARS: usize = 80;

pub struct ReportMeta {
    pub generated_at: NaiveDateTime,
    pub window_hours: u32,
    pub top_n: usize,
}

/// Cuts to `max` chars, marking the cut with `...`.
fn ellipsize(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}

/// Renders the digest. Output depends only on the arguments.
pub fn render(
    meta: &ReportMeta,
    analyzed: &[AnalyzedMessage],
    summaries: &[CategorySummary],
    top: &[&AnalyzedMessage],
) -> String {
    let mut out = format!(
        "# Inbox Digest\nGenerated: {}\n\n## Summary\nAnalyzed {} emails from the past {} hours.\n\n## Category Summaries\n\n",
        meta.generated_at.format("%Y-%m-%d %H:%M:%S"),
        analyzed.len(),
        meta.window_hours,
    );

    for s in summaries {
        out.push_str(&format!("### {}\n{}\n\n", s.label, s.narrative));
    }

    out.push_str(&format!("## Top {} Most Important Emails (Brief)\n\n", meta.top_n));
    for (i, m) in top.iter().enumerate() {
        out.push_str(&format!(
            "{}. **{}** - {} (Importance: {}/10)\n\n",
            i + 1,
            ellipsize(&m.message.subject, BRIEF_SUBJECT_CHARS),
            ellipsize(&m.summary, BRIEF_SUMMARY_CHARS),
            m.importance,
        ));
    }

    out.push_str(&format!(
        "## Top {} Most Important Emails (Detailed Summaries)\n\n",
        meta.top_n
    ));
    for (i, m) in top.iter().enumerate() {
        out.push_str(&format!("### {}. {}\n", i + 1, m.message.subject));
        out.push_str(&format!("**From:** {}\n", m.message.from));
        out.push_str(&format!("**Categories:** {}\n", m.categories.join(", ")));
        out.push_str(&format!("**Importance:** {}/10\n", m.importance));
        out.push_str(&format!("**Summary:** {}\n\n", m.summary));
    }

    out
}
