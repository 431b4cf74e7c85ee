use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::store::MemoryCategory;

/// Results under this score are noise, not recall.
pub const DEFAULT_MIN_SCORE: f64 = 10.0;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
    "can", "of", "at", "by", "for", "with", "about", "against", "between", "into", "through",
    "during", "before", "after", "above", "below", "to", "from", "up", "down", "in", "out", "on",
    "off", "over", "under", "again", "further", "then", "once", "here", "there", "when", "where",
    "why", "how", "all", "each", "few", "more", "most", "other", "some", "such", "no", "nor",
    "not", "only", "own", "same", "so", "than", "too", "very", "just", "and", "but", "if", "or",
    "because", "as", "until", "while", "this", "that", "these", "those", "it", "its", "i", "me",
    "my", "we", "our", "you", "your", "he", "him", "his", "she", "her", "they", "them", "their",
    "what", "which", "who", "whom",
];

/// A scored recall hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub content: String,
    pub category: MemoryCategory,
    pub score: f64,
}

/// Extract up to 20 keywords: lowercased words longer than one character,
/// stop words removed, first occurrence wins.
pub fn extract_keywords(content: &str) -> Vec<String> {
    let mut keywords = Vec::new();
    let mut seen = BTreeSet::new();
    for word in content
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
    {
        if word.len() <= 1 || STOP_WORDS.contains(&word) || !seen.insert(word.to_string()) {
            continue;
        }
        keywords.push(word.to_string());
        if keywords.len() == 20 {
            break;
        }
    }
    keywords
}

/// Relevance score in [0, 100] for one entry against a query.
///
/// Sums exact keyword overlap (≤40), token-set similarity (≤40), a category
/// bonus (+10 when the category name appears among the query keywords), and
/// a recency bonus (≤10, linear decay over 30 days). Recency applies only
/// when the entry's creation time is known in-process — entries loaded from
/// the plain-list files carry no timestamp.
pub fn score_entry(
    content: &str,
    category: MemoryCategory,
    recorded_at: Option<DateTime<Utc>>,
    query: &str,
    query_keywords: &[String],
    now: DateTime<Utc>,
) -> f64 {
    let mut score = 0.0;

    let entry_keywords = extract_keywords(content);
    if !query_keywords.is_empty() {
        let matches = query_keywords
            .iter()
            .filter(|k| entry_keywords.contains(k))
            .count();
        score += matches as f64 / query_keywords.len() as f64 * 40.0;
    }

    score += token_set_similarity(&query.to_lowercase(), &content.to_lowercase()) * 40.0;

    if query_keywords.iter().any(|k| k == category.as_str()) {
        score += 10.0;
    }

    if let Some(recorded) = recorded_at {
        let days_old = (now - recorded).num_days().max(0) as f64;
        score += (10.0 * (1.0 - days_old / 30.0)).max(0.0);
    }

    score.min(100.0)
}

/// Token-set similarity in [0, 1]: split both strings into word sets and
/// take the best normalized edit distance among intersection-vs-full
/// combinations. Word order and repetition don't matter.
fn token_set_similarity(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = word_tokens(a).collect();
    let tokens_b: BTreeSet<&str> = word_tokens(b).collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let joined_inter = intersection.join(" ");
    let joined_a = tokens_a.iter().copied().collect::<Vec<_>>().join(" ");
    let joined_b = tokens_b.iter().copied().collect::<Vec<_>>().join(" ");

    strsim::normalized_levenshtein(&joined_inter, &joined_a)
        .max(strsim::normalized_levenshtein(&joined_inter, &joined_b))
        .max(strsim::normalized_levenshtein(&joined_a, &joined_b))
}

fn word_tokens(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn keywords_drop_stop_words_and_short_tokens() {
        let keywords = extract_keywords("The user prefers a dark theme in the editor");
        assert!(keywords.contains(&"user".to_string()));
        assert!(keywords.contains(&"prefers".to_string()));
        assert!(keywords.contains(&"dark".to_string()));
        assert!(!keywords.contains(&"the".to_string()));
        assert!(!keywords.contains(&"a".to_string()));
        assert!(!keywords.contains(&"in".to_string()));
    }

    #[test]
    fn keywords_are_deduplicated_and_capped() {
        let keywords = extract_keywords("rust rust rust tokio tokio");
        assert_eq!(keywords, vec!["rust", "tokio"]);

        let many: String = (0..50).map(|i| format!("word{i} ")).collect();
        assert_eq!(extract_keywords(&many).len(), 20);
    }

    #[test]
    fn similarity_is_one_for_same_token_set() {
        assert!((token_set_similarity("tokio runtime async", "async tokio runtime") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn similarity_is_zero_without_tokens() {
        assert_eq!(token_set_similarity("", "anything"), 0.0);
        assert_eq!(token_set_similarity("...", "---"), 0.0);
    }

    #[test]
    fn subset_queries_score_high() {
        let sim = token_set_similarity("tokio", "the project uses the tokio runtime");
        assert!(sim > 0.9, "subset should score near 1.0, got {sim}");
    }

    #[test]
    fn relevant_entry_outscores_irrelevant() {
        let now = Utc::now();
        let query = "database connection pooling";
        let query_keywords = extract_keywords(query);

        let relevant = score_entry(
            "use deadpool for database connection pooling",
            MemoryCategory::Decisions,
            None,
            query,
            &query_keywords,
            now,
        );
        let irrelevant = score_entry(
            "the user prefers light mode",
            MemoryCategory::Preferences,
            None,
            query,
            &query_keywords,
            now,
        );
        assert!(relevant > irrelevant);
        assert!(relevant >= DEFAULT_MIN_SCORE);
    }

    #[test]
    fn category_name_in_query_adds_bonus() {
        let now = Utc::now();
        let query = "decisions about the database";
        let query_keywords = extract_keywords(query);

        let with_bonus = score_entry(
            "postgres over sqlite",
            MemoryCategory::Decisions,
            None,
            query,
            &query_keywords,
            now,
        );
        let without_bonus = score_entry(
            "postgres over sqlite",
            MemoryCategory::Facts,
            None,
            query,
            &query_keywords,
            now,
        );
        assert!((with_bonus - without_bonus - 10.0).abs() < 1e-9);
    }

    #[test]
    fn recency_bonus_decays_over_thirty_days() {
        let now = Utc::now();
        let query = "tokio runtime";
        let query_keywords = extract_keywords(query);
        let entry = "the project uses the tokio runtime";

        let fresh = score_entry(
            entry,
            MemoryCategory::Facts,
            Some(now),
            query,
            &query_keywords,
            now,
        );
        let aging = score_entry(
            entry,
            MemoryCategory::Facts,
            Some(now - Duration::days(15)),
            query,
            &query_keywords,
            now,
        );
        let expired = score_entry(
            entry,
            MemoryCategory::Facts,
            Some(now - Duration::days(60)),
            query,
            &query_keywords,
            now,
        );
        let unknown = score_entry(entry, MemoryCategory::Facts, None, query, &query_keywords, now);

        assert!(fresh > aging);
        assert!(aging > expired);
        assert!((expired - unknown).abs() < 1e-9);
    }

    #[test]
    fn score_is_capped_at_one_hundred() {
        let now = Utc::now();
        let query = "decisions tokio runtime async";
        let query_keywords = extract_keywords(query);
        let score = score_entry(
            "decisions tokio runtime async",
            MemoryCategory::Decisions,
            Some(now),
            query,
            &query_keywords,
            now,
        );
        assert!(score <= 100.0);
    }
}
