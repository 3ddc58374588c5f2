use serde::{Deserialize, Serialize};

/// Follow-up history beyond this many turns is not sent to the model
pub const MAX_HISTORY_TURNS: usize = 10;

/// Extracted article text that passed the length filter
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub url: String,
    pub title: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One earlier exchange in a follow-up conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

/// Source documents concatenated in source order
pub fn source_material(sources: &[SourceDocument]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            format!(
                "### [{}] {}\nURL: {}\n\n{}",
                i + 1,
                doc.title.as_deref().unwrap_or("Untitled"),
                doc.url,
                doc.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

pub fn report_prompt(company: &str, sources: &[SourceDocument]) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are a financial news analyst. Write a concise briefing about the company below, ");
    prompt.push_str("based ONLY on the news articles provided.\n\n");
    prompt.push_str("Format the briefing in Markdown with these sections:\n");
    prompt.push_str("## Summary\n## Key Developments\n## Risks and Concerns\n## Outlook\n\n");
    prompt.push_str("Use bullet points for developments and risks. Cite articles by their number, e.g. [2].\n");
    prompt.push_str("If the articles disagree or are inconclusive, say so rather than guessing.\n\n");
    prompt.push_str(&format!("Company: {}\n\n", company));
    prompt.push_str("ARTICLES:\n\n");
    prompt.push_str(&source_material(sources));
    prompt.push_str("\n\nBriefing:");
    prompt
}

pub fn follow_up_prompt(company: &str, report: &str, history: &[ChatTurn], question: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are a financial news analyst answering questions about a briefing you wrote.\n");
    prompt.push_str("Answer from the briefing; if it does not contain the answer, say that it does not.\n");
    prompt.push_str("Keep answers short and use Markdown where it helps.\n\n");
    prompt.push_str(&format!("Company: {}\n\nBRIEFING:\n{}\n", company, report.trim()));

    let recent = &history[history.len().saturating_sub(MAX_HISTORY_TURNS)..];
    if !recent.is_empty() {
        prompt.push_str("\nCONVERSATION SO FAR:\n");
        for turn in recent {
            let speaker = match turn.role {
                TurnRole::User => "User",
                TurnRole::Assistant => "Analyst",
            };
            prompt.push_str(&format!("{}: {}\n", speaker, turn.content.trim()));
        }
    }

    prompt.push_str(&format!("\nUser: {}\nAnalyst:", question));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(n: usize) -> SourceDocument {
        SourceDocument {
            url: format!("https://news.example.com/{}", n),
            title: Some(format!("Story {}", n)),
            text: format!("Body of story {}", n),
        }
    }

    #[test]
    fn sources_keep_their_order() {
        let material = source_material(&[doc(1), doc(2)]);
        let first = material.find("Story 1").unwrap();
        let second = material.find("Story 2").unwrap();
        assert!(first < second);
        assert!(material.contains("### [2] Story 2\nURL: https://news.example.com/2"));
    }

    #[test]
    fn follow_up_keeps_only_recent_history() {
        let history: Vec<ChatTurn> = (0..15)
            .map(|i| ChatTurn {
                role: if i % 2 == 0 { TurnRole::User } else { TurnRole::Assistant },
                content: format!("turn-{:02}", i),
            })
            .collect();

        let prompt = follow_up_prompt("Acme", "# Report", &history, "What next?");
        assert!(!prompt.contains("turn-04"));
        assert!(prompt.contains("turn-05"));
        assert!(prompt.contains("turn-14"));
        assert!(prompt.ends_with("User: What next?\nAnalyst:"));
    }
}
