//! Text similarity used to rank recalled memories.

use std::collections::HashMap;

/// Dice coefficient over character bigrams of the lowercased inputs, in `[0, 1]`.
///
/// Whitespace runs collapse to a single space first. Two strings too short to
/// have a bigram score 1 when equal and 0 otherwise.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    if a == b {
        return 1.0;
    }
    let left = bigrams(&a);
    let right = bigrams(&b);
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<(char, char), usize> = HashMap::new();
    for pair in &left {
        *counts.entry(*pair).or_default() += 1;
    }
    let mut shared = 0usize;
    for pair in &right {
        if let Some(count) = counts.get_mut(pair)
            && *count > 0
        {
            *count -= 1;
            shared += 1;
        }
    }
    (2 * shared) as f64 / (left.len() + right.len()) as f64
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn bigrams(text: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = text.chars().collect();
    chars.windows(2).map(|pair| (pair[0], pair[1])).collect()
}
