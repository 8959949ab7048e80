//! Derives the short token to write from raw OCR text.
//!
//! The rules form a strict fallback chain: each one only runs when every rule
//! before it declined. Reordering them changes the output for ambiguous text.

use regex::Regex;
use tracing::warn;

/// Returned when no rule could derive anything from the text.
pub const NO_USER: &str = "NO USER";

/// Maximum length of the run captured after the marker phrase.
const MAX_MARKER_RUN: usize = 60;

/// Number of leading words used by the last-resort rule.
const FALLBACK_WORD_COUNT: usize = 3;

/// Outcome of a rule that fired.
#[derive(Debug, Clone, PartialEq)]
enum Verdict {
    /// The capture is unusable; the token is empty.
    Reject,
    /// The token was found.
    Accept(String),
}

/// A named step of the chain. Returns `None` to defer to the next rule.
struct Rule {
    name: &'static str,
    apply: fn(&str, &Normalizer) -> Option<Verdict>,
}

const RULES: [Rule; 5] = [
    Rule {
        name: "min-length",
        apply: reject_too_short,
    },
    Rule {
        name: "excluded-pattern",
        apply: reject_excluded,
    },
    Rule {
        name: "marker-with-ellipsis",
        apply: marker_with_ellipsis,
    },
    Rule {
        name: "marker",
        apply: marker_without_ellipsis,
    },
    Rule {
        name: "leading-words",
        apply: leading_words,
    },
];

/// Compiled normalization settings for one cycle.
#[derive(Debug, Clone)]
pub struct Normalizer {
    min_text_length: usize,
    excluded_patterns: Vec<String>,
    marker_ellipsis: Option<Regex>,
    marker_open: Option<Regex>,
}

impl Normalizer {
    pub fn new(min_text_length: usize, excluded_patterns: &[String], marker_phrase: &str) -> Self {
        let marker = regex::escape(marker_phrase.trim());
        let compile = |pattern: String| match Regex::new(&pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("Marker pattern disabled ({}): {}", pattern, e);
                None
            }
        };

        Self {
            min_text_length,
            excluded_patterns: excluded_patterns
                .iter()
                .map(|p| p.trim().to_uppercase())
                .filter(|p| !p.is_empty())
                .collect(),
            marker_ellipsis: compile(format!(
                r"(?i){}\s+([^\n\r]{{1,{}}}?)(?:\.\.\.|…)",
                marker, MAX_MARKER_RUN
            )),
            marker_open: compile(format!(
                r"(?i){}\s+([^\n\r]{{1,{}}})",
                marker, MAX_MARKER_RUN
            )),
        }
    }

    /// Settings for one capture, taken from the cycle's config snapshot.
    ///
    /// Whole-page captures carry proportionally less of the wanted text, so
    /// the minimum length is halved for them (never below 1).
    pub fn from_config(config: &crate::automation::AutomationConfig, full_page: bool) -> Self {
        let min_text_length = if full_page {
            (config.min_text_length / 2).max(1)
        } else {
            config.min_text_length
        };
        Self::new(min_text_length, &config.excluded_patterns, &config.marker_phrase)
    }

    pub fn min_text_length(&self) -> usize {
        self.min_text_length
    }

    /// Runs the rule chain. An empty string means the capture was rejected.
    pub fn normalize(&self, raw_text: &str) -> String {
        for rule in &RULES {
            match (rule.apply)(raw_text, self) {
                Some(Verdict::Reject) => {
                    tracing::debug!("normalize: rejected by {}", rule.name);
                    return String::new();
                }
                Some(Verdict::Accept(token)) => {
                    tracing::debug!("normalize: '{}' via {}", token, rule.name);
                    return token;
                }
                None => continue,
            }
        }
        NO_USER.to_string()
    }

    /// Explains why a token is not acceptable for writing, if it is not.
    pub fn validate_token(&self, token: &str) -> Result<(), String> {
        if token.trim().is_empty() {
            return Err("No text detected in the selected region.".to_string());
        }
        if token.chars().count() < self.min_text_length {
            return Err(format!(
                "Text too short (minimum {} characters).",
                self.min_text_length
            ));
        }
        if let Some(pattern) = self.matching_exclusion(token) {
            return Err(format!("Excluded pattern detected: {}", pattern));
        }
        Ok(())
    }

    fn matching_exclusion(&self, text: &str) -> Option<&str> {
        let upper = text.to_uppercase();
        self.excluded_patterns
            .iter()
            .find(|p| upper.contains(p.as_str()))
            .map(String::as_str)
    }
}

fn reject_too_short(raw: &str, n: &Normalizer) -> Option<Verdict> {
    (raw.trim().chars().count() < n.min_text_length).then_some(Verdict::Reject)
}

fn reject_excluded(raw: &str, n: &Normalizer) -> Option<Verdict> {
    n.matching_exclusion(raw).map(|_| Verdict::Reject)
}

fn marker_with_ellipsis(raw: &str, n: &Normalizer) -> Option<Verdict> {
    let re = n.marker_ellipsis.as_ref()?;
    let run = re.captures(raw.trim())?.get(1)?.as_str().trim_end();
    accept_non_empty(run)
}

fn marker_without_ellipsis(raw: &str, n: &Normalizer) -> Option<Verdict> {
    let re = n.marker_open.as_ref()?;
    let run = re.captures(raw.trim())?.get(1)?.as_str().trim_end();
    let run = run
        .strip_suffix("...")
        .or_else(|| run.strip_suffix('…'))
        .unwrap_or(run)
        .trim_end();
    accept_non_empty(run)
}

fn leading_words(raw: &str, _n: &Normalizer) -> Option<Verdict> {
    let words: Vec<&str> = raw.split_whitespace().take(FALLBACK_WORD_COUNT).collect();
    accept_non_empty(&words.join(" "))
}

fn accept_non_empty(token: &str) -> Option<Verdict> {
    let token = token.trim();
    (!token.is_empty()).then(|| Verdict::Accept(token.to_string()))
}
