//! Extraction of structured answers from raw model output.

use once_cell::sync::Lazy;
use regex::Regex;

const RELEVANT_WORD: &str = "relevant";
const NOT_RELEVANT_WORD: &str = "not relevant";

static ANSWER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<answer>(.*?)</answer>").expect("valid answer pattern"));
static TITLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<title>(.*?)</title>").expect("valid title pattern"));
static BODY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<body>(.*?)</body>").expect("valid body pattern"));

/// Read the relevance verdict wrapped in `<answer>` tags.
///
/// Returns `None` when the tag is missing or holds anything other than
/// "Relevant" / "Not relevant" (case-insensitive).
pub fn extract_relevance(text: &str) -> Option<bool> {
    let answer = ANSWER_PATTERN.captures(text)?.get(1)?.as_str().trim();
    if answer.eq_ignore_ascii_case(NOT_RELEVANT_WORD) {
        Some(false)
    } else if answer.eq_ignore_ascii_case(RELEVANT_WORD) {
        Some(true)
    } else {
        None
    }
}

/// Read the `<title>` and `<body>` of a summary. Both must be present.
pub fn extract_summary(text: &str) -> Option<(String, String)> {
    let title = TITLE_PATTERN.captures(text)?.get(1)?.as_str().trim();
    let body = BODY_PATTERN.captures(text)?.get(1)?.as_str().trim();
    Some((title.to_string(), body.to_string()))
}
