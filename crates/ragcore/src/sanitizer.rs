//! Query sanitizer.
//!
//! Normalizes raw question text into the lexical and embedding-ready forms
//! consumed by the hybrid retriever. Never raises errors; empty input
//! yields empty artifacts.

use std::collections::HashSet;
use std::sync::LazyLock;

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "and", "or", "but",
        "if", "then", "than", "so", "of", "to", "in", "on", "at", "by", "for", "with", "about",
        "as", "into", "like", "through", "after", "over", "between", "out", "against", "during",
        "without", "before", "under", "around", "among", "i", "you", "he", "she", "it", "we",
        "they", "this", "that", "these", "those", "do", "does", "did", "what", "which", "who",
        "whom", "can", "could", "would", "should", "will", "shall", "may", "might", "must", "not",
        "no", "nor", "also", "just", "up", "down", "from",
    ]
    .into_iter()
    .collect()
});

/// Output of sanitizing a raw question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedQuery {
    /// Lowercased, punctuation-stripped, diacritic-folded, whitespace-collapsed.
    pub lexical_query: String,
    /// Terms of length >= 2 after stop-word removal, used for term-coverage scoring.
    pub terms: Vec<String>,
    /// The original unmodified string, passed through for embedding.
    pub embedding_input: String,
}

/// Fold a character to its base (diacritic-stripped) ASCII form where one
/// exists; otherwise return it unchanged. Covers the common Latin-1
/// supplement and Latin Extended-A ranges a question is likely to contain.
fn fold_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => 'a',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'ĭ' | 'į' => 'i',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ō' | 'ŏ' | 'ő' | 'ø' => 'o',
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => 'u',
        'ý' | 'ÿ' => 'y',
        'ñ' | 'ń' | 'ň' => 'n',
        'ç' | 'ć' | 'č' => 'c',
        'ß' => 's',
        other => other,
    }
}

/// Normalize raw question text.
pub fn sanitize(raw: &str) -> SanitizedQuery {
    let mut lexical = String::with_capacity(raw.len());
    let mut last_was_space = true;

    for c in raw.chars() {
        let lowered = if c.is_alphabetic() {
            let lower = c.to_lowercase().next().unwrap_or(c);
            fold_diacritic(lower)
        } else {
            c
        };

        if lowered.is_alphanumeric() {
            lexical.push(lowered);
            last_was_space = false;
        } else if !last_was_space {
            lexical.push(' ');
            last_was_space = true;
        }
    }

    let lexical_query = lexical.trim().to_string();

    let terms: Vec<String> = lexical_query
        .split_whitespace()
        .filter(|t| t.chars().count() >= 2 && !STOP_WORDS.contains(*t))
        .map(|t| t.to_string())
        .collect();

    SanitizedQuery {
        lexical_query,
        terms,
        embedding_input: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_artifacts() {
        let s = sanitize("");
        assert_eq!(s.lexical_query, "");
        assert!(s.terms.is_empty());
        assert_eq!(s.embedding_input, "");
    }

    #[test]
    fn lowercases_and_strips_punctuation() {
        let s = sanitize("What does Figure 3 show?!");
        assert_eq!(s.lexical_query, "what does figure 3 show");
    }

    #[test]
    fn collapses_whitespace() {
        let s = sanitize("   hello   world  ");
        assert_eq!(s.lexical_query, "hello world");
    }

    #[test]
    fn folds_diacritics() {
        let s = sanitize("Café naïve");
        assert_eq!(s.lexical_query, "cafe naive");
    }

    #[test]
    fn drops_stop_words_and_short_terms() {
        let s = sanitize("What is the meaning of orbital mechanics?");
        assert!(s.terms.contains(&"meaning".to_string()));
        assert!(s.terms.contains(&"orbital".to_string()));
        assert!(s.terms.contains(&"mechanics".to_string()));
        assert!(!s.terms.contains(&"the".to_string()));
        assert!(!s.terms.contains(&"of".to_string()));
    }

    #[test]
    fn only_stop_words_yields_zero_terms() {
        let s = sanitize("What is the of and");
        assert!(s.terms.is_empty());
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize("What does Figure 3 show?!");
        let twice = sanitize(&once.lexical_query);
        assert_eq!(once.lexical_query, twice.lexical_query);
    }

    #[test]
    fn embedding_input_preserves_original() {
        let s = sanitize("What Does Figure-3 Show?");
        assert_eq!(s.embedding_input, "What Does Figure-3 Show?");
    }
}
