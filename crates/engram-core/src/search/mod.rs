//! Retrieval
//!
//! Hybrid search over the observation store: dense-vector nearest neighbor
//! (HNSW), lexical FTS5, weighted reciprocal rank fusion with a
//! short-circuit fast path, and optional cross-encoder reranking.

mod fusion;
mod manager;
mod reranker;
#[cfg(feature = "vector-search")]
mod vector;

pub use fusion::{normalize_scores, rrf_fuse, short_circuits, FusedHit, DEFAULT_RRF_K};
pub use manager::{
    RankingExplanation, SearchError, SearchHit, SearchManager, SearchMode, SearchOptions,
};
pub use reranker::{RerankOutcome, RerankedHit, Reranker, RerankerConfig, RerankerError};

#[cfg(feature = "vector-search")]
pub use vector::{VectorIndex, VectorIndexConfig, VectorIndexError, DEFAULT_CONNECTIVITY, OVER_FETCH};

/// Turn a web-style query into valid FTS5 syntax.
///
/// Supported operators: quoted phrases, `-term` negation, and OR. Bare
/// terms are quoted so user punctuation cannot break the FTS parser.
/// Negation without at least one positive term is dropped (FTS5 NOT is
/// binary).
pub fn sanitize_fts5_query(query: &str) -> String {
    let mut positives: Vec<String> = vec![];
    let mut negatives: Vec<String> = vec![];

    for token in tokenize(query) {
        match token {
            QueryToken::Or => {
                if !positives.is_empty() && positives.last().map(|s| s.as_str()) != Some("OR") {
                    positives.push("OR".to_string());
                }
            }
            QueryToken::Phrase(text) => {
                let cleaned = clean_term(&text, true);
                if !cleaned.is_empty() {
                    positives.push(format!("\"{}\"", cleaned));
                }
            }
            QueryToken::Negated(text) => {
                let cleaned = clean_term(&text, false);
                if !cleaned.is_empty() {
                    negatives.push(format!("\"{}\"", cleaned));
                }
            }
            QueryToken::Term(text) => {
                let cleaned = clean_term(&text, false);
                if !cleaned.is_empty() {
                    positives.push(format!("\"{}\"", cleaned));
                }
            }
        }
    }

    // A trailing OR has no right-hand side
    while positives.last().map(|s| s.as_str()) == Some("OR") {
        positives.pop();
    }

    if positives.is_empty() {
        return String::new();
    }

    let mut out = format!("({})", positives.join(" "));
    for negative in negatives {
        out.push_str(" NOT ");
        out.push_str(&negative);
    }
    out
}

enum QueryToken {
    Term(String),
    Phrase(String),
    Negated(String),
    Or,
}

fn tokenize(query: &str) -> Vec<QueryToken> {
    let mut tokens = vec![];
    let mut chars = query.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut phrase = String::new();
            for next in chars.by_ref() {
                if next == '"' {
                    break;
                }
                phrase.push(next);
            }
            tokens.push(QueryToken::Phrase(phrase));
            continue;
        }

        let mut word = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_whitespace() {
                break;
            }
            word.push(next);
            chars.next();
        }

        if word == "OR" {
            tokens.push(QueryToken::Or);
        } else if let Some(stripped) = word.strip_prefix('-') {
            if !stripped.is_empty() {
                tokens.push(QueryToken::Negated(stripped.to_string()));
            }
        } else {
            tokens.push(QueryToken::Term(word));
        }
    }

    tokens
}

fn clean_term(term: &str, keep_spaces: bool) -> String {
    term.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' || (keep_spaces && c == ' ') {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_terms_are_quoted() {
        assert_eq!(sanitize_fts5_query("index timeout"), r#"("index" "timeout")"#);
    }

    #[test]
    fn phrases_survive() {
        assert_eq!(
            sanitize_fts5_query(r#""row level lock" timeout"#),
            r#"("row level lock" "timeout")"#
        );
    }

    #[test]
    fn negation_becomes_binary_not() {
        assert_eq!(
            sanitize_fts5_query("postgres -mysql"),
            r#"("postgres") NOT "mysql""#
        );
        // Negation alone cannot be expressed
        assert_eq!(sanitize_fts5_query("-mysql"), "");
    }

    #[test]
    fn or_is_preserved_between_terms() {
        assert_eq!(
            sanitize_fts5_query("postgres OR sqlite"),
            r#"("postgres" OR "sqlite")"#
        );
        // Dangling OR is dropped
        assert_eq!(sanitize_fts5_query("postgres OR"), r#"("postgres")"#);
    }

    #[test]
    fn punctuation_cannot_break_the_parser() {
        assert_eq!(
            sanitize_fts5_query("fn main() { panic!(\"boom\") }"),
            r#"("fn" "main" "panic boom")"#
        );
        let sanitized = sanitize_fts5_query("a:b* c(d)");
        assert!(sanitized.starts_with('('));
        assert!(!sanitized.contains('*'));
    }

    #[test]
    fn empty_input_empty_output() {
        assert_eq!(sanitize_fts5_query(""), "");
        assert_eq!(sanitize_fts5_query("   "), "");
        assert_eq!(sanitize_fts5_query("()!@#"), "");
    }
}
