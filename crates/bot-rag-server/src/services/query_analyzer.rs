/// Query Analyzer
/// Decides whether a question leans on earlier turns (and so needs a
/// standalone rewrite before retrieval) and pulls topic keywords out of it.
use std::collections::HashSet;

use once_cell::sync::Lazy;
use tracing::debug;
use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Clone, PartialEq)]
pub enum QueryIntent {
    /// Can be answered as written
    /// Examples: "what are the opening hours of the library?"
    Standalone,

    /// Refers back to something said earlier
    /// Examples: "and what about it on sundays?", "why is that?"
    FollowUp,

    /// Asks to restate or expand the previous answer
    /// Examples: "what do you mean?", "can you explain more"
    Clarification,
}

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "about", "above", "after", "again", "also", "been", "before", "being", "could", "does",
        "doing", "from", "have", "having", "here", "into", "just", "like", "more", "most", "much",
        "only", "other", "over", "same", "should", "some", "such", "than", "that", "their", "them",
        "then", "there", "these", "they", "this", "those", "very", "were", "what", "when", "where",
        "which", "while", "will", "with", "would", "your", "yours", "please", "tell", "know",
    ]
    .into_iter()
    .collect()
});

const FOLLOW_UP_OPENERS: &[&str] = &[
    "and ", "but ", "so ", "also ", "then ", "what about", "how about", "why is that", "why not",
];

const REFERRING_WORDS: &[&str] = &[
    "it", "its", "that", "this", "those", "these", "they", "them", "their", "he", "she", "him",
    "her", "there", "one", "ones",
];

const CLARIFICATION_PATTERNS: &[&str] = &[
    "what do you mean",
    "explain",
    "elaborate",
    "say that again",
    "more detail",
    "tell me more",
    "can you clarify",
];

/// Questions this short are almost always continuations.
const SHORT_QUESTION_WORDS: usize = 3;

pub struct QueryAnalyzer;

impl QueryAnalyzer {
    /// Analyze query intent based on pattern matching
    pub fn analyze_intent(query: &str) -> QueryIntent {
        let query_lower = query.trim().to_lowercase();

        for pattern in CLARIFICATION_PATTERNS {
            if query_lower.contains(pattern) {
                debug!("Detected Clarification intent: matched '{}'", pattern);
                return QueryIntent::Clarification;
            }
        }

        for opener in FOLLOW_UP_OPENERS {
            if query_lower.starts_with(opener) {
                debug!("Detected FollowUp intent: opener '{}'", opener.trim());
                return QueryIntent::FollowUp;
            }
        }

        let words: Vec<&str> = query_lower.unicode_words().collect();
        if let Some(word) = words.iter().find(|w| REFERRING_WORDS.contains(w)) {
            debug!("Detected FollowUp intent: referring word '{}'", word);
            return QueryIntent::FollowUp;
        }

        if !words.is_empty() && words.len() <= SHORT_QUESTION_WORDS {
            debug!("Detected FollowUp intent: {} word question", words.len());
            return QueryIntent::FollowUp;
        }

        QueryIntent::Standalone
    }

    /// Whether the standalone-question rewrite should run.
    pub fn needs_rewrite(query: &str, has_history: bool) -> bool {
        has_history && Self::analyze_intent(query) != QueryIntent::Standalone
    }

    /// Up to `max` distinct keywords in order of appearance.
    pub fn extract_topics(text: &str, max: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        text.unicode_words()
            .map(|w| w.to_lowercase())
            .filter(|w| w.chars().count() > 3)
            .filter(|w| !STOP_WORDS.contains(w.as_str()))
            .filter(|w| !w.chars().all(|c| c.is_numeric()))
            .filter(|w| seen.insert(w.clone()))
            .take(max)
            .collect()
    }
}
