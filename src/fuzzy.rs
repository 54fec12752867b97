//! Term-level fuzzy matching.
//!
//! Query text is split into lowercase alphanumeric terms, and each term may
//! match a stored term within an edit budget that grows with its length:
//!
//! | Term length | Allowed edits |
//! |-------------|---------------|
//! | 1–2 | 0 |
//! | 3–5 | 1 |
//! | 6+  | 2 |
//!
//! Edits are insertions, deletions, substitutions, and adjacent
//! transpositions (optimal string alignment distance).

/// Splits text into lowercase terms on every non-alphanumeric character.
///
/// Mirrors the SQLite `unicode61` tokenizer closely enough that query terms
/// line up with the terms stored in the full-text index.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Maximum edit distance allowed for a query term.
pub fn auto_fuzziness(term: &str) -> usize {
    match term.chars().count() {
        0..=2 => 0,
        3..=5 => 1,
        _ => 2,
    }
}

/// Optimal string alignment distance between two strings, by `char`.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let width = b.len() + 1;
    let mut d = vec![0usize; (a.len() + 1) * width];
    for i in 0..=a.len() {
        d[i * width] = i;
    }
    for j in 0..=b.len() {
        d[j] = j;
    }

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut best = (d[(i - 1) * width + j] + 1)
                .min(d[i * width + j - 1] + 1)
                .min(d[(i - 1) * width + j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                best = best.min(d[(i - 2) * width + j - 2] + 1);
            }
            d[i * width + j] = best;
        }
    }

    d[a.len() * width + b.len()]
}

/// Whether `candidate` is within the automatic edit budget of `query_term`.
///
/// Both arguments are expected to already be lowercase terms.
pub fn is_fuzzy_match(query_term: &str, candidate: &str) -> bool {
    let max = auto_fuzziness(query_term);
    let (qa, ca) = (query_term.chars().count(), candidate.chars().count());
    if qa.abs_diff(ca) > max {
        return false;
    }
    if max == 0 {
        return query_term == candidate;
    }
    edit_distance(query_term, candidate) <= max
}
