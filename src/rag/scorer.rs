//! Lexical relevance scoring between a query and a stored chunk.

/// Query tokens shorter than this (in characters) never contribute a match.
pub const MIN_TOKEN_CHARS: usize = 3;

/// Scores `chunk_text` against `query`.
///
/// Each query token of at least `MIN_TOKEN_CHARS` characters takes its best
/// partial-containment ratio against the chunk tokens: when one token contains
/// the other the ratio is `shorter / longer`, otherwise 0. The sum is divided
/// by the number of *all* query tokens, short ones included, so queries with
/// many short words score lower. Comparison is case-insensitive.
pub fn score(query: &str, chunk_text: &str) -> f64 {
    let query_lower = query.to_lowercase();
    let query_tokens: Vec<&str> = query_lower.split_whitespace().collect();
    if query_tokens.is_empty() {
        return 0.0;
    }

    let chunk_lower = chunk_text.to_lowercase();
    let chunk_tokens: Vec<(&str, usize)> = chunk_lower
        .split_whitespace()
        .map(|token| (token, token.chars().count()))
        .collect();
    if chunk_tokens.is_empty() {
        return 0.0;
    }

    let matched: f64 = query_tokens
        .iter()
        .filter_map(|token| {
            let len = token.chars().count();
            (len >= MIN_TOKEN_CHARS).then(|| best_match(token, len, &chunk_tokens))
        })
        .sum();

    matched / query_tokens.len() as f64
}

fn best_match(query_token: &str, query_len: usize, chunk_tokens: &[(&str, usize)]) -> f64 {
    chunk_tokens
        .iter()
        .filter(|(chunk_token, _)| {
            chunk_token.contains(query_token) || query_token.contains(chunk_token)
        })
        .map(|(_, chunk_len)| {
            let shorter = query_len.min(*chunk_len) as f64;
            let longer = query_len.max(*chunk_len) as f64;
            shorter / longer
        })
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(left: f64, right: f64) -> bool {
        (left - right).abs() < 1e-9
    }

    #[test]
    fn job_requirement_query_scores_high() {
        let chunk = "The role requires 5 years of experience with distributed systems.";
        let s = score("experience distributed systems", chunk);
        // "systems" vs "systems." is 7/8; the other two match exactly.
        assert!(approx_eq(s, (1.0 + 1.0 + 7.0 / 8.0) / 3.0));
        assert!(s > 0.9);
    }

    #[test]
    fn identical_text_scores_one_when_all_tokens_are_long() {
        let text = "distributed systems engineering";
        assert!(approx_eq(score(text, text), 1.0));
    }

    #[test]
    fn short_query_words_dilute_the_score() {
        // Only "good" can match, but all three tokens count in the denominator.
        assert!(approx_eq(score("is it good", "is it good"), 1.0 / 3.0));
    }

    #[test]
    fn partial_containment_uses_length_ratio() {
        assert!(approx_eq(score("engine", "engineering"), 6.0 / 11.0));
        assert!(approx_eq(score("engineering", "engine"), 6.0 / 11.0));
    }

    #[test]
    fn no_overlap_or_empty_input_scores_zero() {
        assert_eq!(score("kubernetes", "The office has a nice view."), 0.0);
        assert_eq!(score("", "anything"), 0.0);
        assert_eq!(score("anything", "   "), 0.0);
    }

    #[test]
    fn matching_ignores_case() {
        assert!(approx_eq(score("RUST", "rust"), 1.0));
    }

    #[test]
    fn scores_are_never_negative() {
        let samples = [
            ("a b c", "abc"),
            ("query with words", ""),
            ("ünïcödé text", "ÜNÏCÖDÉ"),
        ];
        for (query, chunk) in samples {
            assert!(score(query, chunk) >= 0.0);
        }
    }
}
