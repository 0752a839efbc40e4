//! Salient-term extraction from the text surrounding an image.
//!
//! Two cheap heuristics, no NLP model:
//!
//! 1. case-insensitive substring matches against a curated vocabulary of
//!    programming/education terms;
//! 2. the first two capitalised, purely alphabetic tokens longer than three
//!    characters (likely proper nouns or section words).
//!
//! The union is deduplicated case-insensitively, vocabulary matches first.

/// Terms looked for in the context text. French first (the documents this
/// pipeline was built for are French coding worksheets), then English.
pub const DEFAULT_VOCABULARY: &[&str] = &[
    "algorithme",
    "programme",
    "code",
    "fonction",
    "variable",
    "boucle",
    "condition",
    "scratch",
    "python",
    "javascript",
    "html",
    "css",
    "données",
    "tableau",
    "liste",
    "graphique",
    "diagramme",
    "schéma",
    "étape",
    "processus",
    "méthode",
    "résultat",
    "exemple",
    "exercice",
    "problème",
    "solution",
    "calcul",
    "formule",
    "équation",
    "loop",
    "function",
    "chart",
    "step",
];

/// How many capitalised candidate tokens are kept.
const MAX_CANDIDATES: usize = 2;

/// Keyword extractor with a configurable vocabulary.
#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    vocabulary: Vec<String>,
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self::with_vocabulary(DEFAULT_VOCABULARY.iter().copied())
    }
}

impl KeywordExtractor {
    pub fn with_vocabulary<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            vocabulary: terms.into_iter().map(|t| t.into().to_lowercase()).collect(),
        }
    }

    pub fn vocabulary(&self) -> &[String] {
        &self.vocabulary
    }

    /// Salient terms of `context`, deduplicated. Empty input gives an empty list.
    pub fn extract(&self, context: &str) -> Vec<String> {
        if context.trim().is_empty() {
            return Vec::new();
        }

        let lowered = context.to_lowercase();
        let matches = self
            .vocabulary
            .iter()
            .filter(|term| lowered.contains(term.as_str()))
            .cloned();

        let candidates = context
            .split_whitespace()
            .map(|word| word.trim_end_matches(['.', ',', '!', '?', ';', ':']))
            .filter(|word| is_candidate(word))
            .take(MAX_CANDIDATES)
            .map(str::to_string);

        let mut seen = std::collections::HashSet::new();
        matches
            .chain(candidates)
            .filter(|k| seen.insert(k.to_lowercase()))
            .collect()
    }
}

fn is_candidate(word: &str) -> bool {
    word.chars().count() > 3
        && word.chars().all(char::is_alphabetic)
        && word.chars().next().is_some_and(char::is_uppercase)
}

/// [`KeywordExtractor::extract`] with the default vocabulary.
pub fn extract_keywords(context: &str) -> Vec<String> {
    KeywordExtractor::default().extract(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn set(v: &[String]) -> HashSet<String> {
        v.iter().map(|s| s.to_lowercase()).collect()
    }

    #[test]
    fn empty_input_has_no_keywords() {
        assert!(extract_keywords("").is_empty());
        assert!(extract_keywords("   \n\t ").is_empty());
    }

    #[test]
    fn plain_lowercase_text_has_no_keywords() {
        assert!(extract_keywords("the cat sat on a mat near the door").is_empty());
        // capitalised but too short, or not alphabetic
        assert!(extract_keywords("The cat sat. Ok R2D2 went home").is_empty());
    }

    #[test]
    fn french_sentence() {
        let k = extract_keywords("Dans Scratch, nous créons une boucle");
        assert_eq!(
            set(&k),
            ["scratch", "boucle", "dans"].iter().map(|s| s.to_string()).collect()
        );
        assert!(k.contains(&"Dans".to_string()));
    }

    #[test]
    fn capitalised_duplicate_of_vocabulary_term_is_dropped() {
        let k = extract_keywords("Step one: create a variable in Scratch");
        assert_eq!(k.len(), 3, "got {k:?}");
        assert_eq!(
            set(&k),
            ["scratch", "variable", "step"].iter().map(|s| s.to_string()).collect()
        );
    }

    #[test]
    fn only_first_two_candidates_are_kept() {
        let k = extract_keywords("Alice Bobby Carol Danny");
        assert_eq!(k, vec!["Alice".to_string(), "Bobby".to_string()]);
    }

    #[test]
    fn trailing_punctuation_is_stripped_from_candidates() {
        let k = extract_keywords("Bonjour! Hello.");
        assert_eq!(k, vec!["Bonjour".to_string(), "Hello".to_string()]);
    }

    #[test]
    fn vocabulary_matches_are_substrings() {
        let k = extract_keywords("les algorithmes du programme");
        assert!(k.contains(&"algorithme".to_string()));
        assert!(k.contains(&"programme".to_string()));
    }

    #[test]
    fn custom_vocabulary() {
        let ex = KeywordExtractor::with_vocabulary(["Robot", "capteur"]);
        assert_eq!(ex.vocabulary(), &["robot".to_string(), "capteur".to_string()]);
        assert_eq!(ex.extract("le robot lit le capteur"), vec!["robot", "capteur"]);
    }
}
