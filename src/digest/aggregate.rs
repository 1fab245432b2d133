use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::analysis::AnalyzedMessage;
use crate::config::LlmConfig;
use crate::llm::{CompletionRequest, TextAnalyzer};

const SYSTEM_PROMPT: &str =
    "You are an expert at creating cohesive summaries from multiple sources.";

/// Messages sharing one label. A message with several labels sits in several
/// groups.
#[derive(Debug)]
pub struct CategoryGroup<'a> {
    pub label: String,
    pub members: Vec<&'a AnalyzedMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySummary {
    pub label: String,
    pub narrative: String,
}

/// Groups in the order their labels were first seen.
pub fn group_by_category(messages: &[AnalyzedMessage]) -> Vec<CategoryGroup<'_>> {
    let mut groups: Vec<CategoryGroup<'_>> = Vec::new();
    for msg in messages {
        for label in &msg.categories {
            match groups.iter_mut().find(|g| &g.label == label) {
                Some(g) => g.members.push(msg),
                None => groups.push(CategoryGroup {
                    label: label.clone(),
                    members: vec![msg],
                }),
            }
        }
    }
    groups
}

pub fn fallback_narrative(label: &str, count: usize) -> String {
    format!("Summary for {label} category with {count} emails.")
}

fn build_prompt(group: &CategoryGroup<'_>) -> String {
    let bullets = group
        .members
        .iter()
        .map(|m| format!("- {}", m.summary))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Please create a cohesive paragraph summary for the {label} category based on these individual email summaries:\n\n\
{bullets}\n\n\
Write an easy-to-read paragraph that captures the key themes and important information from these emails.",
        label = group.label,
    )
}

pub async fn summarize_category(
    client: &dyn TextAnalyzer,
    llm: &LlmConfig,
    group: &CategoryGroup<'_>,
) -> String {
    info!(category = %group.label, count = group.members.len(), "summarizing category");
    let request = CompletionRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt: build_prompt(group),
        max_tokens: llm.summary_max_tokens,
        temperature: llm.temperature,
    };

    match client.complete(request).await {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            warn!(category = %group.label, error = %e, "category summary failed");
            fallback_narrative(&group.label, group.members.len())
        }
    }
}

/// One narrative per non-empty group, in group order.
pub async fn summarize_categories(
    client: &dyn TextAnalyzer,
    llm: &LlmConfig,
    groups: &[CategoryGroup<'_>],
    concurrency: usize,
) -> Vec<CategorySummary> {
    stream::iter(groups.iter().filter(|g| !g.members.is_empty()))
        .map(|group| async move {
            CategorySummary {
                label: group.label.clone(),
                narrative: summarize_category(client, llm, group).await,
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

/// Stable sort by importance, highest first, cut to `top_n`.
pub fn rank_by_importance(messages: &[AnalyzedMessage], top_n: usize) -> Vec<&AnalyzedMessage> {
    let mut ranked: Vec<&AnalyzedMessage> = messages.iter().collect();
    ranked.sort_by(|a, b| b.importance.cmp(&a.importance));
    ranked.truncate(top_n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedAnalyzer;
    use crate::llm::LlmError;
    use crate::mail::NormalizedMessage;
    use std::time::Duration;

    fn analyzed(subject: &str, categories: &[&str], importance: u8) -> AnalyzedMessage {
        AnalyzedMessage {
            message: NormalizedMessage {
                subject: subject.to_string(),
                ..NormalizedMessage::default()
            },
            categories: categories.iter().map(|c| c.to_string()).collect(),
            summary: format!("{subject} summary"),
            importance,
        }
    }

    #[test]
    fn overlapping_categories_count_in_each_group() {
        let msgs = vec![
            analyzed("a", &["WORK"], 5),
            analyzed("b", &["WORK", "FINANCE"], 5),
            analyzed("c", &["FINANCE"], 5),
        ];
        let groups = group_by_category(&msgs);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].label, "WORK");
        assert_eq!(groups[0].members.len(), 2);
        assert_eq!(groups[1].label, "FINANCE");
        assert_eq!(groups[1].members.len(), 2);
        assert_eq!(groups[1].members[0].message.subject, "b");
    }

    #[test]
    fn rank_is_stable_and_descending() {
        let msgs = vec![
            analyzed("first-5", &["NEWS"], 5),
            analyzed("nine", &["NEWS"], 9),
            analyzed("second-5", &["NEWS"], 5),
            analyzed("one", &["NEWS"], 1),
            analyzed("third-5", &["NEWS"], 5),
        ];
        let ranked: Vec<_> = rank_by_importance(&msgs, 10)
            .iter()
            .map(|m| m.message.subject.as_str())
            .collect();
        assert_eq!(ranked, ["nine", "first-5", "second-5", "third-5", "one"]);
    }

    #[test]
    fn rank_truncates_to_min_of_top_n_and_input() {
        let msgs: Vec<_> = (1..=12).map(|i| analyzed(&i.to_string(), &["WORK"], (i % 10 + 1) as u8)).collect();
        let top = rank_by_importance(&msgs, 10);
        assert_eq!(top.len(), 10);
        assert!(top.windows(2).all(|w| w[0].importance >= w[1].importance));
        assert_eq!(rank_by_importance(&msgs[..3], 10).len(), 3);
        assert!(rank_by_importance(&[], 10).is_empty());
    }

    #[tokio::test]
    async fn narratives_follow_group_order_with_fallback() {
        let msgs = vec![
            analyzed("a", &["WORK"], 5),
            analyzed("b", &["FINANCE"], 5),
            analyzed("c", &["FINANCE"], 5),
        ];
        let groups = group_by_category(&msgs);
        let client = ScriptedAnalyzer::new(|req: &CompletionRequest| {
            if req.prompt.contains("FINANCE category") {
                Err(LlmError::EmptyReply)
            } else {
                Ok("  Work went fine.  ".to_string())
            }
        })
        // the first group answers last
        .with_delay(|req| {
            if req.prompt.contains("WORK category") {
                Duration::from_millis(80)
            } else {
                Duration::ZERO
            }
        });
        let llm = LlmConfig::default();

        let out = summarize_categories(&client, &llm, &groups, 4).await;
        assert_eq!(
            out,
            vec![
                CategorySummary {
                    label: "WORK".to_string(),
                    narrative: "Work went fine.".to_string(),
                },
                CategorySummary {
                    label: "FINANCE".to_string(),
                    narrative: "Summary for FINANCE category with 2 emails.".to_string(),
                },
            ]
        );

        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].prompt.contains("FINANCE category"));
        assert!(prompts[1].prompt.contains("WORK category"));
        let finance = prompts.iter().find(|p| p.prompt.contains("FINANCE")).unwrap();
        assert!(finance.prompt.contains("- b summary\n- c summary"));
        assert_eq!(finance.max_tokens, 300);
    }
}
