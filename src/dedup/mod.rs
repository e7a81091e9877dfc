//! Deduplication engine: text normalization, stable fingerprints, and
//! approximate title similarity.
//!
//! Everything in this module is a pure, total function. Fingerprints feed the
//! exact-duplicate check during ingestion; title similarity backs the optional
//! near-duplicate pass.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

/// Character n-gram size for title shingling.
const SHINGLE_SIZE: usize = 4;

/// Normalize text for stable hashing and comparison.
///
/// NFC unicode normalization, lowercase, collapse whitespace runs to a
/// single space, trim. Deterministic and never fails.
pub fn normalize_text(text: &str) -> String {
    let composed: String = text.nfc().collect();
    let lowered = composed.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut in_whitespace = false;
    for ch in lowered.chars() {
        if ch.is_whitespace() {
            in_whitespace = true;
        } else {
            if in_whitespace && !out.is_empty() {
                out.push(' ');
            }
            in_whitespace = false;
            out.push(ch);
        }
    }
    out
}

/// Compute the SHA-256 deduplication fingerprint for an item.
///
/// Each field is normalized independently, then the fields are joined with a
/// NUL separator before hashing, so field boundaries stay unambiguous:
/// `("ab", "cd", "ef")` can never collide with `("abcd", "", "ef")`.
/// Returns the lowercase hex digest.
pub fn fingerprint(title: &str, source_name: &str, content: &str) -> String {
    let combined = format!(
        "{}\0{}\0{}",
        normalize_text(title),
        normalize_text(source_name),
        normalize_text(content)
    );
    let mut hasher = Sha256::new();
    hasher.update(combined.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Character shingle Jaccard similarity between two titles, in [0, 1].
///
/// Titles are normalized first. A title shorter than the shingle size
/// collapses to a single shingle. An empty title yields 0.0 - even when both
/// titles are empty, so malformed empty titles never pair up as duplicates.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_text(a);
    let b = normalize_text(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let shingles_a = shingles(&a);
    let shingles_b = shingles(&b);

    let intersection = shingles_a.intersection(&shingles_b).count();
    let union = shingles_a.union(&shingles_b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

fn shingles(text: &str) -> HashSet<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < SHINGLE_SIZE {
        let mut set = HashSet::new();
        set.insert(text.to_string());
        return set;
    }
    chars
        .windows(SHINGLE_SIZE)
        .map(|w| w.iter().collect())
        .collect()
}
