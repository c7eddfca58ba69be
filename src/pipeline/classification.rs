//! Classification collaborators: turn a comparison into a report.
//!
//! Reports start with a status line (`MATCH`, `PARTIAL MATCH`, `MISMATCH` for
//! the rule-based classifier); the batch summary shows that first line.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::collaborator::{CollaboratorError, ReportClassifier};
use super::llm::LlmClient;

const EXCERPT_CHARS: usize = 200;

static AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[$€£¥]\s?\d[\d,]*(?:\.\d+)?").unwrap());

/// Currency amounts of `text`, in reading order.
pub fn amounts(text: &str) -> Vec<&str> {
    AMOUNT.find_iter(text).map(|m| m.as_str()).collect()
}

/// Divergent merged lines (`a <> b`) whose amounts disagree.
fn amount_conflicts(merged_text: &str) -> Vec<(String, String)> {
    merged_text
        .lines()
        .filter_map(|line| line.split_once(" <> "))
        .filter_map(|(left, right)| {
            let (a, b) = (amounts(left), amounts(right));
            (a != b).then(|| (a.join(" "), b.join(" ")))
        })
        .collect()
}

/// Verdict of the rule-based classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Match,
    PartialMatch,
    Mismatch,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Match => "MATCH",
            Self::PartialMatch => "PARTIAL MATCH",
            Self::Mismatch => "MISMATCH",
        }
    }
}

/// Threshold classifier.
#[derive(Debug, Clone, Copy)]
pub struct RuleBasedClassifier {
    /// At or above: MATCH.
    pub match_threshold: f64,
    /// At or above (and below `match_threshold`): PARTIAL MATCH.
    pub review_threshold: f64,
}

impl Default for RuleBasedClassifier {
    fn default() -> Self {
        Self {
            match_threshold: 0.95,
            review_threshold: 0.70,
        }
    }
}

impl RuleBasedClassifier {
    pub fn status(&self, similarity: f64) -> MatchStatus {
        if similarity >= self.match_threshold {
            MatchStatus::Match
        } else if similarity >= self.review_threshold {
            MatchStatus::PartialMatch
        } else {
            MatchStatus::Mismatch
        }
    }
}

fn excerpt(text: &str) -> String {
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(EXCERPT_CHARS - 3).collect();
    format!("{cut}...")
}

impl ReportClassifier for RuleBasedClassifier {
    fn classify(
        &self,
        _document_path: &Path,
        document_name: &str,
        merged_text: &str,
        similarity: f64,
    ) -> Result<String, CollaboratorError> {
        let status = self.status(similarity);
        tracing::debug!(document = document_name, status = status.as_str(), "Rule-based classification");

        let mut report = format!(
            "{}\nDocument: {document_name}\nSimilarity: {similarity:.2}",
            status.as_str()
        );
        for (left, right) in amount_conflicts(merged_text) {
            let left = if left.is_empty() { "(none)".to_string() } else { left };
            let right = if right.is_empty() { "(none)".to_string() } else { right };
            report.push_str(&format!("\nAmount differs: {left} vs {right}"));
        }
        report.push_str(&format!("\nExcerpt: {}", excerpt(merged_text)));
        Ok(report)
    }
}

// ═══════════════════════════════════════════════════════════
// LLM classifier
// ═══════════════════════════════════════════════════════════

const CLASSIFY_SYSTEM: &str = "You audit invoice extractions. Start your answer with one of \
MATCH, PARTIAL MATCH or MISMATCH on its own line, then explain briefly.";

pub struct LlmClassifier {
    client: Box<dyn LlmClient>,
    model: String,
}

impl LlmClassifier {
    pub fn new(client: Box<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

impl ReportClassifier for LlmClassifier {
    fn classify(
        &self,
        document_path: &Path,
        document_name: &str,
        merged_text: &str,
        similarity: f64,
    ) -> Result<String, CollaboratorError> {
        let prompt = format!(
            "Invoice file: {document_name} ({})\nSimilarity between readings: {similarity:.2}\n\n\
             Reconciled text:\n{merged_text}",
            document_path.display()
        );
        let report = self.client.generate(&self.model, &prompt, CLASSIFY_SYSTEM)?;
        let report = report.trim();
        if report.is_empty() {
            return Err(CollaboratorError::Classification("model returned an empty report".into()));
        }
        Ok(report.to_string())
    }
}
