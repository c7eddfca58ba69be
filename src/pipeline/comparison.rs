//! Comparison collaborators: merge two extractions and score their agreement.

use std::collections::HashMap;

use serde::Deserialize;

use super::collaborator::{CollaboratorError, Comparison, ResultComparator};
use super::llm::{extract_json_object, LlmClient};

/// Dice coefficient over whitespace tokens (case-insensitive, multiset).
///
/// Two empty texts agree fully; one empty text agrees with nothing.
pub fn token_similarity(a: &str, b: &str) -> f64 {
    let left = token_counts(a);
    let right = token_counts(b);
    let left_total: usize = left.values().sum();
    let right_total: usize = right.values().sum();

    if left_total == 0 && right_total == 0 {
        return 1.0;
    }
    if left_total == 0 || right_total == 0 {
        return 0.0;
    }

    let shared: usize = left
        .iter()
        .map(|(token, n)| right.get(token).map_or(0, |m| (*n).min(*m)))
        .sum();

    (2 * shared) as f64 / (left_total + right_total) as f64
}

fn token_counts(text: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for token in text.split_whitespace() {
        *counts.entry(token.to_lowercase()).or_insert(0) += 1;
    }
    counts
}

/// Line-by-line merge; divergent lines keep both readings.
pub fn merge_lines(primary: &str, secondary: &str) -> String {
    if primary == secondary {
        return primary.to_string();
    }

    let left: Vec<&str> = primary.lines().collect();
    let right: Vec<&str> = secondary.lines().collect();
    let mut merged = Vec::with_capacity(left.len().max(right.len()));

    for i in 0..left.len().max(right.len()) {
        match (left.get(i), right.get(i)) {
            (Some(a), Some(b)) if a == b => merged.push((*a).to_string()),
            (Some(a), Some(b)) => merged.push(format!("{a} <> {b}")),
            (Some(a), None) => merged.push(format!("{a} <> (missing)")),
            (None, Some(b)) => merged.push(format!("(missing) <> {b}")),
            (None, None) => {}
        }
    }
    merged.join("\n")
}

// ═══════════════════════════════════════════════════════════
// Rule-based comparator
// ═══════════════════════════════════════════════════════════

/// Deterministic comparator needing no model.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedComparator;

impl ResultComparator for RuleBasedComparator {
    fn compare(
        &self,
        document_name: &str,
        primary: &str,
        secondary: &str,
    ) -> Result<Comparison, CollaboratorError> {
        let similarity = token_similarity(primary, secondary);
        tracing::debug!(document = document_name, similarity, "Rule-based comparison");
        Ok(Comparison {
            merged_text: merge_lines(primary, secondary),
            similarity,
        })
    }
}

// ═══════════════════════════════════════════════════════════
// LLM comparator
// ═══════════════════════════════════════════════════════════

const COMPARE_SYSTEM: &str = "You reconcile two OCR readings of the same invoice. \
Output valid JSON only: {\"content\": <reconciled text>, \"similarity\": <0.0-1.0>}.";

#[derive(Deserialize)]
struct LlmComparison {
    content: String,
    similarity: Option<f64>,
}

/// Asks a local model to reconcile the two readings.
///
/// A reply without a score falls back to [`token_similarity`].
pub struct LlmComparator {
    client: Box<dyn LlmClient>,
    model: String,
}

impl LlmComparator {
    pub fn new(client: Box<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    fn build_prompt(document_name: &str, primary: &str, secondary: &str) -> String {
        format!(
            "Invoice file: {document_name}\n\n\
             Reading A:\n{primary}\n\n\
             Reading B:\n{secondary}\n\n\
             Reconcile both readings into one invoice text and rate how similar they are."
        )
    }
}

impl ResultComparator for LlmComparator {
    fn compare(
        &self,
        document_name: &str,
        primary: &str,
        secondary: &str,
    ) -> Result<Comparison, CollaboratorError> {
        let prompt = Self::build_prompt(document_name, primary, secondary);
        let raw = self.client.generate(&self.model, &prompt, COMPARE_SYSTEM)?;

        let json = extract_json_object(&raw).ok_or_else(|| {
            CollaboratorError::Comparison("model reply contained no JSON object".into())
        })?;
        let parsed: LlmComparison = serde_json::from_str(json)
            .map_err(|e| CollaboratorError::Comparison(format!("malformed model reply: {e}")))?;

        let similarity = parsed
            .similarity
            .unwrap_or_else(|| token_similarity(primary, secondary));
        let comparison = Comparison {
            merged_text: parsed.content,
            similarity,
        };
        if !comparison.in_range() {
            tracing::warn!(document = document_name, similarity, "Model score out of range, clamping");
        }
        Ok(comparison.clamped())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::llm::MockLlmClient;

    #[test]
    fn identical_texts_score_one() {
        assert_eq!(token_similarity("INV-100 $50.00", "INV-100 $50.00"), 1.0);
        assert_eq!(token_similarity("", ""), 1.0);
    }

    #[test]
    fn disjoint_texts_score_zero() {
        assert_eq!(token_similarity("$50.00", "$55.00"), 0.0);
        assert_eq!(token_similarity("INV-100", ""), 0.0);
    }

    #[test]
    fn partial_overlap_is_dice() {
        // shared = {inv-100}; 2*1 / (2+2)
        assert!((token_similarity("INV-100 $50.00", "inv-100 $55.00") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn merge_keeps_both_readings_of_divergent_lines() {
        let merged = merge_lines("INV-100\n$50.00", "INV-100\n$55.00\nPaid");
        assert_eq!(merged, "INV-100\n$50.00 <> $55.00\n(missing) <> Paid");
    }

    #[test]
    fn rule_based_comparator_merges_identical_text_verbatim() {
        let result = RuleBasedComparator
            .compare("sample.pdf", "INV-100 $50.00", "INV-100 $50.00")
            .unwrap();
        assert_eq!(result.merged_text, "INV-100 $50.00");
        assert_eq!(result.similarity, 1.0);
    }

    #[test]
    fn llm_comparator_parses_fenced_reply() {
        let client = MockLlmClient::new("```json\n{\"content\": \"INV-100 $50.00\", \"similarity\": 0.92}\n```");
        let result = LlmComparator::new(Box::new(client), "m")
            .compare("a.pdf", "x", "y")
            .unwrap();
        assert_eq!(result.merged_text, "INV-100 $50.00");
        assert!((result.similarity - 0.92).abs() < 1e-9);
    }

    #[test]
    fn llm_comparator_clamps_and_falls_back() {
        let clamped = LlmComparator::new(Box::new(MockLlmClient::new("{\"content\": \"c\", \"similarity\": 3.5}")), "m")
            .compare("a.pdf", "x", "y")
            .unwrap();
        assert_eq!(clamped.similarity, 1.0);

        let fallback = LlmComparator::new(Box::new(MockLlmClient::new("{\"content\": \"c\"}")), "m")
            .compare("a.pdf", "same", "same")
            .unwrap();
        assert_eq!(fallback.similarity, 1.0);
    }

    #[test]
    fn llm_comparator_rejects_non_json() {
        let err = LlmComparator::new(Box::new(MockLlmClient::new("I cannot help")), "m")
            .compare("a.pdf", "x", "y")
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Comparison(_)));
    }
}
