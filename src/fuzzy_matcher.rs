use strsim::normalized_levenshtein;

/// Definite-article prefix stripped from vocabulary terms.
const DEFINITE_ARTICLE: char = 'ה';

/// Final letter forms and the ordinary letter each one folds to.
const FINAL_FORMS: [(char, char); 5] = [('ך', 'כ'), ('ם', 'מ'), ('ן', 'נ'), ('ף', 'פ'), ('ץ', 'צ')];

/// Default acceptance threshold on the 0-100 similarity scale.
pub const DEFAULT_THRESHOLD: f64 = 80.0;

fn fold_final_form(c: char) -> char {
    FINAL_FORMS
        .iter()
        .find(|(final_form, _)| *final_form == c)
        .map(|(_, ordinary)| *ordinary)
        .unwrap_or(c)
}

/// Canonical form of a vocabulary term, used on both sides of every lookup.
///
/// - Runs of whitespace collapse to one space, ends trimmed
/// - Case-folded
/// - Final letter forms replaced with their ordinary letter
/// - A leading definite article is dropped while more than one character remains
///
/// The article is stripped repeatedly so that `normalize_term` is idempotent.
pub fn normalize_term(term: &str) -> String {
    let collapsed = term.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut normalized: String = collapsed.to_lowercase().chars().map(fold_final_form).collect();

    while normalized.chars().count() > 1 && normalized.starts_with(DEFINITE_ARTICLE) {
        normalized = normalized[DEFINITE_ARTICLE.len_utf8()..].trim_start().to_string();
    }
    normalized
}

/// Approximate matcher over normalized vocabulary terms.
#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    /// Minimum score (0-100) for a candidate to be accepted
    pub threshold: f64,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl FuzzyMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Edit-distance similarity scaled to 0-100. Inputs are expected to be normalized.
    pub fn score(&self, a: &str, b: &str) -> f64 {
        normalized_levenshtein(a, b) * 100.0
    }

    pub fn is_match(&self, a: &str, b: &str) -> bool {
        self.score(a, b) >= self.threshold
    }

    /// Index and score of the highest-scoring candidate at or above the threshold.
    ///
    /// Equal scores keep the earliest candidate in iteration order.
    pub fn best_match<'a, I>(&self, target: &str, candidates: I) -> Option<(usize, f64)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best: Option<(usize, f64)> = None;
        for (idx, candidate) in candidates.into_iter().enumerate() {
            let score = self.score(target, candidate);
            if score < self.threshold {
                continue;
            }
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((idx, score)),
            }
        }
        best
    }
}
