//! Keyword heuristic for crisis screening
//!
//! Fast local screen run on every message before any external call.
//! Matches three curated term tiers against case-folded text and applies
//! a negation window: a negator shortly before a term downgrades that
//! match one tier and leaves the screen inconclusive so the inference
//! path can refine it.

use crate::classify::RiskLevel;
use crate::config::ClassifierConfig;
use crate::error::{Error, Result};
use regex::Regex;

/// Outcome of the keyword screen
#[derive(Debug, Clone)]
pub struct ScreenOutcome {
    /// Risk level the heuristic settled on
    pub level: RiskLevel,
    /// Matched indicators (`term`, `negated:term`, `distress:term`,
    /// `history:term`)
    pub indicators: Vec<String>,
    /// True when the screen is decisive on its own; false when the
    /// inference path should be consulted
    pub conclusive: bool,
}

/// Keyword screen over curated crisis-term tiers.
pub struct KeywordScreen {
    critical_terms: Vec<String>,
    high_terms: Vec<String>,
    distress_terms: Vec<String>,
    negation: Regex,
    window_chars: usize,
}

impl KeywordScreen {
    /// Build a screen from configuration. Term lists are lowercased once
    /// at construction.
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let negation = Regex::new(r"\b(never|not|don'?t|won'?t|wouldn'?t|no longer)\s*$")
            .map_err(|e| Error::Config(format!("negation pattern: {}", e)))?;

        Ok(Self {
            critical_terms: lowercase_all(&config.critical_terms),
            high_terms: lowercase_all(&config.high_terms),
            distress_terms: lowercase_all(&config.distress_terms),
            negation,
            window_chars: config.negation_window_chars,
        })
    }

    /// Screen one message plus optional recent history.
    ///
    /// History never raises the tier on its own; it contributes
    /// `history:` indicators and can turn a silent message into an
    /// inconclusive screen when prior messages show repeated distress.
    pub fn screen(&self, message: &str, history: &[String]) -> ScreenOutcome {
        let text = message.to_lowercase();
        let mut indicators = Vec::new();

        let mut level = RiskLevel::Minimal;
        let mut conclusive = true;

        for term in &self.critical_terms {
            if let Some(start) = text.find(term.as_str()) {
                if self.is_negated(&text, start) {
                    indicators.push(format!("negated:{}", term));
                    level = level.max(RiskLevel::High);
                    conclusive = false;
                } else {
                    indicators.push(term.clone());
                    level = RiskLevel::Critical;
                }
            }
        }

        for term in &self.high_terms {
            if let Some(start) = text.find(term.as_str()) {
                if self.is_negated(&text, start) {
                    indicators.push(format!("negated:{}", term));
                    level = level.max(RiskLevel::Moderate);
                    conclusive = false;
                } else {
                    indicators.push(term.clone());
                    level = level.max(RiskLevel::High);
                }
            }
        }

        // A non-negated crisis-tier match is decisive regardless of what
        // the distress tier adds.
        if level >= RiskLevel::High && indicators.iter().any(|i| !i.starts_with("negated:")) {
            conclusive = true;
        }

        for term in &self.distress_terms {
            if text.find(term.as_str()).is_some() {
                indicators.push(format!("distress:{}", term));
                if level < RiskLevel::Moderate {
                    level = RiskLevel::Moderate;
                    conclusive = false;
                }
            }
        }

        let history_hits = self.scan_history(history, &mut indicators);
        if history_hits >= 2 && level == RiskLevel::Minimal {
            level = RiskLevel::Low;
            conclusive = false;
        }

        ScreenOutcome {
            level,
            indicators,
            conclusive,
        }
    }

    /// Check the window immediately before `start` for a trailing negator.
    fn is_negated(&self, text: &str, start: usize) -> bool {
        let from = char_floor(text, start.saturating_sub(self.window_chars + 8));
        let window = &text[from..start];
        self.negation.is_match(window.trim_end())
    }

    fn scan_history(&self, history: &[String], indicators: &mut Vec<String>) -> usize {
        let mut hits = 0;
        for entry in history {
            let lower = entry.to_lowercase();
            for term in self
                .distress_terms
                .iter()
                .chain(self.high_terms.iter())
                .chain(self.critical_terms.iter())
            {
                if lower.contains(term.as_str()) {
                    let tag = format!("history:{}", term);
                    if !indicators.contains(&tag) {
                        indicators.push(tag);
                    }
                    hits += 1;
                }
            }
        }
        hits
    }
}

fn lowercase_all(terms: &[String]) -> Vec<String> {
    terms.iter().map(|t| t.to_lowercase()).collect()
}

/// Largest char boundary at or below `idx`.
fn char_floor(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
