//! Token-containment similarity tolerant to single-character recognition errors.

use std::collections::HashSet;

/// Tokens shorter than this carry no signal ("of", "a", "§").
const MIN_TOKEN_CHARS: usize = 3;

/// Tokens at least this long may match within one edit.
const FUZZY_MIN_CHARS: usize = 4;

/// Credit for a token matched within one edit instead of exactly.
const FUZZY_CREDIT: f64 = 0.8;

/// Lowercased alphanumeric tokens of `text`, deduplicated, in first-seen order.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_lowercase)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Every string obtained by deleting exactly one character of `token`.
fn deletions(token: &str) -> impl Iterator<Item = String> + '_ {
    token.char_indices().map(move |(i, c)| {
        let mut s = String::with_capacity(token.len());
        s.push_str(&token[..i]);
        s.push_str(&token[i + c.len_utf8()..]);
        s
    })
}

/// Lookup structure for one chunk's content.
///
/// `neighbours` holds every long token plus its single-deletion variants, so a
/// query token within one substitution, insertion or deletion of a chunk
/// token shares at least one entry with it.
pub(crate) struct ChunkIndex {
    exact: HashSet<String>,
    neighbours: HashSet<String>,
}

impl ChunkIndex {
    pub(crate) fn build(content: &str) -> Self {
        let mut exact = HashSet::new();
        let mut neighbours = HashSet::new();
        for token in tokenize(content) {
            if token.chars().count() >= FUZZY_MIN_CHARS {
                neighbours.extend(deletions(&token));
                neighbours.insert(token.clone());
            }
            exact.insert(token);
        }
        Self { exact, neighbours }
    }

    fn fuzzy_hit(&self, token: &str) -> bool {
        if token.chars().count() < FUZZY_MIN_CHARS {
            return false;
        }
        self.neighbours.contains(token) || deletions(token).any(|d| self.neighbours.contains(&d))
    }

    /// Fraction of `tokens` found in the chunk, exact hits counting fully and
    /// one-edit hits counting [`FUZZY_CREDIT`].
    pub(crate) fn score(&self, tokens: &[String]) -> f64 {
        if tokens.is_empty() {
            return 0.0;
        }
        let total: f64 = tokens
            .iter()
            .map(|t| {
                if self.exact.contains(t) {
                    1.0
                } else if self.fuzzy_hit(t) {
                    FUZZY_CREDIT
                } else {
                    0.0
                }
            })
            .sum();
        total / tokens.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_drops_short_tokens_and_duplicates() {
        let t = tokenize("The Court of Appeals, the COURT held: §2 a b");
        assert_eq!(t, vec!["the", "court", "appeals", "held"]);
    }

    #[test]
    fn exact_containment_scores_one() {
        let idx = ChunkIndex::build("Plaintiff filed the motion to dismiss on March 3.");
        assert_eq!(idx.score(&tokenize("filed the motion")), 1.0);
    }

    #[test]
    fn single_recognition_error_still_scores_high() {
        let idx = ChunkIndex::build("indemnification obligations survive termination");
        // substitution, deletion and insertion of one character
        let s = idx.score(&tokenize("indemnificatlon obligatons survives"));
        assert!((s - FUZZY_CREDIT).abs() < 1e-9, "score {s}");
    }

    #[test]
    fn unrelated_text_scores_zero() {
        let idx = ChunkIndex::build("lease agreement between landlord and tenant");
        assert_eq!(idx.score(&tokenize("deposition transcript volume")), 0.0);
        assert_eq!(idx.score(&[]), 0.0);
    }
}
