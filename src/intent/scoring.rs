// Intent Analyzer — scoring strategies.
// Three independent signals are computed per intent and blended by
// `combine` before context and entity adjustments are applied in `mod.rs`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::atoms::types::IntentType;
use crate::intent::keywords::INTENT_PATTERNS;

pub const KEYWORD_WEIGHT: f64 = 0.4;
pub const FUZZY_WEIGHT: f64 = 0.3;
pub const PATTERN_WEIGHT: f64 = 0.3;

static QUESTION_WORDS: &[&str] = &["what", "where", "when", "why", "how", "who", "which", "can", "do", "does", "is", "are"];
static ORDER_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)#?[A-Z]{0,3}\d{4,12}").unwrap());
static GREETING_WORDS: &[&str] = &["hi", "hello", "hey", "yo"];

/// Substring-count scoring: for each intent, count how many of its
/// keywords appear in the message, normalize by keyword-set size, and
/// scale by the intent's weight.
pub fn keyword_matching(message: &str) -> HashMap<IntentType, (f64, Vec<String>)> {
    let lower = message.to_lowercase();
    let mut scores = HashMap::new();

    for pattern in INTENT_PATTERNS {
        let mut matched = Vec::new();
        for kw in pattern.keywords {
            if lower.contains(kw) {
                matched.push((*kw).to_string());
            }
        }
        if matched.is_empty() {
            continue;
        }
        let ratio = matched.len() as f64 / pattern.keywords.len() as f64;
        scores.insert(pattern.intent, (ratio * pattern.weight, matched));
    }

    scores
}

/// Best-substring-alignment fuzzy score for a keyword against a message,
/// analogous to a `partial_ratio`: slide a same-length window across the
/// message and keep the highest normalized similarity found.
fn partial_ratio(keyword: &str, message: &str) -> f64 {
    let kw_chars: Vec<char> = keyword.chars().collect();
    let msg_chars: Vec<char> = message.chars().collect();

    if msg_chars.len() <= kw_chars.len() {
        return strsim::normalized_levenshtein(keyword, message);
    }

    let mut best = 0.0f64;
    for start in 0..=(msg_chars.len() - kw_chars.len()) {
        let window: String = msg_chars[start..start + kw_chars.len()].iter().collect();
        let score = strsim::normalized_levenshtein(keyword, &window);
        if score > best {
            best = score;
        }
    }
    best
}

/// Fuzzy keyword scoring: average per-keyword partial-ratio similarity,
/// scaled by the intent's weight. A keyword only counts toward
/// `matched_patterns` once its similarity clears [`crate::atoms::constants::INTENT_FUZZY_THRESHOLD`].
pub fn fuzzy_matching(message: &str) -> HashMap<IntentType, (f64, Vec<String>)> {
    let lower = message.to_lowercase();
    let mut scores = HashMap::new();

    for pattern in INTENT_PATTERNS {
        let mut matched = Vec::new();
        let mut total = 0.0f64;
        for kw in pattern.keywords {
            let sim = partial_ratio(kw, &lower);
            total += sim;
            if sim >= crate::atoms::constants::INTENT_FUZZY_THRESHOLD {
                matched.push((*kw).to_string());
            }
        }
        let avg = total / pattern.keywords.len() as f64;
        if avg > 0.0 {
            scores.insert(pattern.intent, (avg * pattern.weight, matched));
        }
    }

    scores
}

/// Heuristic structural scoring: question phrasing, an order-id-shaped
/// token, or a short greeting-only message each nudge a specific intent.
pub fn pattern_matching(message: &str) -> HashMap<IntentType, (f64, Vec<String>)> {
    let lower = message.to_lowercase();
    let mut scores = HashMap::new();
    let words: Vec<&str> = lower.split_whitespace().collect();

    if let Some(first) = words.first() {
        if QUESTION_WORDS.contains(first) {
            scores.insert(IntentType::ProductDetailsFollowup, (0.5, vec!["question_phrasing".to_string()]));
        }
    }

    if ORDER_ID_PATTERN.is_match(&lower) {
        scores.insert(IntentType::OrderStatus, (0.6, vec!["order_id_shaped_token".to_string()]));
    }

    if words.len() <= 3 && words.iter().any(|w| GREETING_WORDS.contains(w)) {
        scores.insert(IntentType::Greeting, (0.7, vec!["short_greeting".to_string()]));
    }

    scores
}

/// Blend the three strategies' per-intent scores with the fixed weights
/// `[0.4, 0.3, 0.3]`, returning every intent that scored anything, along
/// with the union of matched pattern labels that contributed to it.
pub fn combine(
    keyword: &HashMap<IntentType, (f64, Vec<String>)>,
    fuzzy: &HashMap<IntentType, (f64, Vec<String>)>,
    pattern: &HashMap<IntentType, (f64, Vec<String>)>,
) -> HashMap<IntentType, (f64, Vec<String>)> {
    let mut combined: HashMap<IntentType, (f64, Vec<String>)> = HashMap::new();

    for (source, weight) in [(keyword, KEYWORD_WEIGHT), (fuzzy, FUZZY_WEIGHT), (pattern, PATTERN_WEIGHT)] {
        for (intent, (score, matched)) in source {
            let entry = combined.entry(*intent).or_insert((0.0, Vec::new()));
            entry.0 += score * weight;
            entry.1.extend(matched.iter().cloned());
        }
    }

    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_matching_finds_greeting() {
        let scores = keyword_matching("hello there");
        assert!(scores.contains_key(&IntentType::Greeting));
    }

    #[test]
    fn fuzzy_matching_tolerates_typos() {
        let scores = fuzzy_matching("helo there, track my order pls");
        assert!(scores.get(&IntentType::OrderStatus).is_some());
    }

    #[test]
    fn pattern_matching_flags_order_id_token() {
        let scores = pattern_matching("any update on AB123456");
        assert!(scores.contains_key(&IntentType::OrderStatus));
    }

    #[test]
    fn pattern_matching_flags_short_greeting() {
        let scores = pattern_matching("hi there");
        assert!(scores.contains_key(&IntentType::Greeting));
    }

    #[test]
    fn combine_sums_weighted_contributions() {
        let mut kw = HashMap::new();
        kw.insert(IntentType::Greeting, (1.0, vec!["hello".to_string()]));
        let fz = HashMap::new();
        let pt = HashMap::new();
        let combined = combine(&kw, &fz, &pt);
        let (score, _) = combined.get(&IntentType::Greeting).unwrap();
        assert!((score - KEYWORD_WEIGHT).abs() < 1e-9);
    }
}
