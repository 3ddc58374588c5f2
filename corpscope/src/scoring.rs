//! Keyword-based attention score for a generated report.

use serde::Serialize;

/// Occurrences beyond this count add nothing for a keyword
const MAX_HITS_PER_KEYWORD: u32 = 3;
const MAX_SCORE: u32 = 100;

struct AttentionKeyword {
    term: &'static str,
    weight: u32,
}

const ATTENTION_KEYWORDS: &[AttentionKeyword] = &[
    AttentionKeyword { term: "bankruptcy", weight: 25 },
    AttentionKeyword { term: "fraud", weight: 20 },
    AttentionKeyword { term: "lawsuit", weight: 15 },
    AttentionKeyword { term: "investigation", weight: 15 },
    AttentionKeyword { term: "recall", weight: 15 },
    AttentionKeyword { term: "data breach", weight: 15 },
    AttentionKeyword { term: "scandal", weight: 15 },
    AttentionKeyword { term: "layoff", weight: 10 },
    AttentionKeyword { term: "downgrade", weight: 10 },
    AttentionKeyword { term: "fined", weight: 10 },
    AttentionKeyword { term: "strike", weight: 10 },
    AttentionKeyword { term: "resign", weight: 10 },
    AttentionKeyword { term: "acquisition", weight: 8 },
    AttentionKeyword { term: "merger", weight: 8 },
    AttentionKeyword { term: "guidance", weight: 5 },
    AttentionKeyword { term: "earnings", weight: 5 },
    AttentionKeyword { term: "partnership", weight: 3 },
    AttentionKeyword { term: "launch", weight: 3 },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttentionLevel {
    Low,
    Medium,
    High,
}

impl AttentionLevel {
    fn from_score(score: u32) -> Self {
        match score {
            0..=29 => AttentionLevel::Low,
            30..=59 => AttentionLevel::Medium,
            _ => AttentionLevel::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttentionScore {
    pub score: u32,
    pub level: AttentionLevel,
    /// Keywords that contributed, in table order
    pub matched: Vec<String>,
}

/// Sum of keyword weights times their (capped) occurrence count, clamped to 0..=100.
///
/// Matching is case-insensitive and anchored at word starts, so "layoffs" counts for
/// "layoff" but "refined" does not count for "fined".
pub fn score_attention(report: &str) -> AttentionScore {
    let text = report.to_lowercase();
    let mut score = 0u32;
    let mut matched = Vec::new();

    for keyword in ATTENTION_KEYWORDS {
        let hits = (count_word_prefixed(&text, keyword.term) as u32).min(MAX_HITS_PER_KEYWORD);
        if hits > 0 {
            score += keyword.weight * hits;
            matched.push(keyword.term.to_string());
        }
    }

    let score = score.min(MAX_SCORE);
    AttentionScore {
        score,
        level: AttentionLevel::from_score(score),
        matched,
    }
}

/// Occurrences of `term` not preceded by a letter or digit.
fn count_word_prefixed(text: &str, term: &str) -> usize {
    text.match_indices(term)
        .filter(|(start, _)| {
            text[..*start]
                .chars()
                .next_back()
                .map_or(true, |c| !c.is_alphanumeric())
        })
        .count()
}
