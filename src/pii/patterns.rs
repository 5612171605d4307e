// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordered PII detection patterns, one regex set per [`super::PiiType`].
//!
//! Patterns are compiled once into a process-wide table. The address
//! patterns in particular are picky about trailing context (e.g. requiring
//! a comma after "Drive") specifically to avoid false-positiving on phrases
//! like "Google Drive".

use std::sync::OnceLock;

use regex::Regex;

use super::PiiType;

/// All patterns for one [`PiiType`], tried in order.
pub struct PatternSet {
    /// Compiled regexes, most specific first.
    pub regexes: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("invalid builtin pii pattern {p:?}: {e}")))
        .collect()
}

/// Patterns for a single PII type, in detection order.
#[must_use]
pub fn patterns_for(pii_type: PiiType) -> &'static PatternSet {
    static TABLE: OnceLock<[PatternSet; 8]> = OnceLock::new();
    let table = TABLE.get_or_init(|| {
        [
            PatternSet {
                regexes: compile(&[
                    r"\b\d{3}-\d{2}-\d{4}\b",
                    r"\b\d{3}-\d{3}-\d{3}\b",
                    r"\b\d{3}\s\d{3}\s\d{3}\b",
                ]),
            },
            PatternSet {
                regexes: compile(&[
                    r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b",
                    r"\b(?:4[0-9]{12}(?:[0-9]{3})?|5[1-5][0-9]{14}|3[47][0-9]{13}|6(?:011|5[0-9]{2})[0-9]{12})\b",
                ]),
            },
            PatternSet {
                regexes: compile(&[
                    r"(?i)(?:account|acct|routing)[#:\s]*\d{8,16}",
                    r"(?i)(?:bank\s*account)[#:\s]*\d{6,17}",
                ]),
            },
            PatternSet {
                regexes: compile(&[r"[\w.\-+]+@[\w.-]+\.[a-zA-Z]{2,}"]),
            },
            PatternSet {
                regexes: compile(&[
                    r"\+\d{1,3}[-.\s]?\(?\d{2,3}\)?[-.\s]?\d{3,4}[-.\s]?\d{4}\b",
                    r"\(\d{3}\)\s*\d{3}[-.\s]?\d{4}",
                    r"\b\d{3}[-.\s]\d{3}[-.\s]\d{4}\b",
                ]),
            },
            PatternSet {
                regexes: compile(&[
                    r"(?i)\b\d{1,5}\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+){0,3}\s+(?:Street|Avenue|Road|Boulevard|Lane|Way|Court|Circle|Place|Highway|Parkway)\b",
                    r"(?i)\b\d{1,5}\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+){0,3}\s+Drive\s*,",
                    r"(?i)\b\d{1,5}\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+){0,3}\s+(?:St|Ave|Rd|Blvd|Dr|Ln|Ct|Pl)\.",
                    r"(?i)\b\d{1,5}\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+){0,3}\s+(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Drive|Dr|Lane|Ln|Way|Court|Ct|Circle|Cir|Place|Pl)[.,]?\s+[A-Z][a-z]+(?:\s+[A-Z][a-z]+)?,?\s+[A-Z]{2}\s+\d{5}",
                ]),
            },
            PatternSet {
                regexes: compile(&[r"(?i)(?:born|birthday|dob|date\s+of\s+birth)[:\s]*\d{1,2}[-/]\d{1,2}[-/]\d{2,4}"]),
            },
            PatternSet {
                regexes: compile(&[r"\b(?:\d{1,3}\.){3}\d{1,3}\b"]),
            },
        ]
    });

    &table[pii_type as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_pattern_does_not_match_google_drive() {
        let set = patterns_for(PiiType::Address);
        assert!(!set.regexes.iter().any(|re| re.is_match("I stored it on Google Drive")));
    }

    #[test]
    fn address_pattern_matches_numbered_drive_with_trailing_comma() {
        let set = patterns_for(PiiType::Address);
        assert!(set.regexes.iter().any(|re| re.is_match("123 Oak Drive, Springfield")));
    }

    #[test]
    fn ssn_pattern_matches_dashed_form() {
        let set = patterns_for(PiiType::Ssn);
        assert!(set.regexes.iter().any(|re| re.is_match("123-45-6789")));
    }
}
