pub mod collaborator;
pub mod extraction;
pub mod comparison;
pub mod classification;
pub mod llm;

pub use collaborator::{
    CollaboratorError, Comparison, Lease, Provider, ReportClassifier, ResultComparator,
    TextExtractor,
};
pub use classification::{LlmClassifier, MatchStatus, RuleBasedClassifier};
pub use comparison::{LlmComparator, RuleBasedComparator};
pub use extraction::{ContentStreamExtractor, PdfTextExtractor};
pub use llm::{ensure_model_available, LlmClient, LlmError, MockLlmClient, OllamaClient};
