//! The invoice pipeline: start, two concurrent extractions, comparison, classification.
//!
//! ```text
//! Start -> start -> DocumentReady -+-> extract_primary   -> PrimaryExtracted   -+-> compare -> Compared -> classify -> Classified
//!                                  +-> extract_secondary -> SecondaryExtracted -+
//! ```

use std::path::PathBuf;

use super::error::{StepError, WorkflowError};
use super::events::{Event, EventKind};
use super::registry::{Step, StepContext, StepDescriptor, StepRegistry};
use super::state::StateError;
use super::supervisor::{CompletedRun, RunResult, RunSupervisor};
use crate::config::WorkflowConfig;
use crate::pipeline::{
    ContentStreamExtractor, LlmClassifier, LlmComparator, OllamaClient, PdfTextExtractor, Provider,
    ReportClassifier, ResultComparator, RuleBasedClassifier, RuleBasedComparator, TextExtractor,
};

pub const STEP_START: &str = "start";
pub const STEP_EXTRACT_PRIMARY: &str = "extract_primary";
pub const STEP_EXTRACT_SECONDARY: &str = "extract_secondary";
pub const STEP_COMPARE: &str = "compare";
pub const STEP_CLASSIFY: &str = "classify";

// ═══════════════════════════════════════════════════════════
// Collaborators
// ═══════════════════════════════════════════════════════════

/// Providers for every external capability the pipeline calls.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub primary: Provider<dyn TextExtractor>,
    pub secondary: Provider<dyn TextExtractor>,
    pub comparator: Provider<dyn ResultComparator>,
    pub classifier: Provider<dyn ReportClassifier>,
}

impl Collaborators {
    /// Local collaborators only: two PDF readers plus rule-based scoring.
    pub fn reference() -> Self {
        Self {
            primary: Provider::extractor("pdf-extract", || Ok(PdfTextExtractor)),
            secondary: Provider::extractor("lopdf", || Ok(ContentStreamExtractor)),
            comparator: Provider::comparator("rule-based", || Ok(RuleBasedComparator)),
            classifier: Provider::classifier("rule-based", || Ok(RuleBasedClassifier::default())),
        }
    }

    /// Local extractors; comparison and classification through Ollama.
    ///
    /// The HTTP client is built inside the factory, i.e. on the blocking pool.
    pub fn with_llm(host: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Self {
        let host = host.into();
        let model = model.into();
        let (cmp_host, cmp_model) = (host.clone(), model.clone());
        Self {
            comparator: Provider::comparator("ollama", move || {
                let client = OllamaClient::new(&cmp_host, timeout_secs)?;
                Ok(LlmComparator::new(Box::new(client), cmp_model.clone()))
            }),
            classifier: Provider::classifier("ollama", move || {
                let client = OllamaClient::new(&host, timeout_secs)?;
                Ok(LlmClassifier::new(Box::new(client), model.clone()))
            }),
            ..Self::reference()
        }
    }

    /// Leases still held across all providers.
    pub fn live_leases(&self) -> usize {
        self.primary.live_leases()
            + self.secondary.live_leases()
            + self.comparator.live_leases()
            + self.classifier.live_leases()
    }
}

// ═══════════════════════════════════════════════════════════
// Steps
// ═══════════════════════════════════════════════════════════

fn single(inputs: Vec<Event>) -> Result<Event, StepError> {
    let count = inputs.len();
    let mut inputs = inputs.into_iter();
    match (inputs.next(), inputs.next()) {
        (Some(event), None) => Ok(event),
        _ => Err(StepError::InvalidInput(format!("expected one input event, got {count}"))),
    }
}

fn document_of(event: &Event) -> Result<(PathBuf, String), StepError> {
    event
        .document()
        .map(|(path, name)| (path.clone(), name.to_string()))
        .ok_or_else(|| StepError::InvalidInput(format!("'{}' carries no document", event.kind())))
}

/// Records document identity and fans out to both extractors.
struct StartStep;

impl Step for StartStep {
    fn run(&self, ctx: &StepContext, inputs: Vec<Event>) -> Result<Option<Event>, StepError> {
        let (path, name) = document_of(&single(inputs)?)?;
        tracing::info!(run_id = %ctx.run_id, document = %name, "Starting invoice processing");

        ctx.state.edit_scoped(|s| -> Result<(), StateError> {
            s.document_path.set(path.clone())?;
            s.document_name.set(name.clone())
        })?;

        Ok(Some(Event::DocumentReady {
            file_path: path,
            file_name: name,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reading {
    Primary,
    Secondary,
}

struct ExtractStep {
    reading: Reading,
    extractor: Provider<dyn TextExtractor>,
}

impl Step for ExtractStep {
    fn run(&self, ctx: &StepContext, inputs: Vec<Event>) -> Result<Option<Event>, StepError> {
        let (path, name) = document_of(&single(inputs)?)?;
        tracing::info!(
            run_id = %ctx.run_id,
            step = ctx.step,
            document = %name,
            collaborator = self.extractor.label(),
            thread = ?std::thread::current().id(),
            "Extraction started"
        );

        let text = {
            let extractor = self.extractor.acquire()?;
            extractor.extract(&path, &name)?
        };

        ctx.state.edit_scoped(|s| match self.reading {
            Reading::Primary => s.primary_text.set(text.clone()),
            Reading::Secondary => s.secondary_text.set(text.clone()),
        })?;
        tracing::info!(run_id = %ctx.run_id, step = ctx.step, chars = text.len(), "Extraction finished");

        Ok(Some(match self.reading {
            Reading::Primary => Event::PrimaryExtracted { text },
            Reading::Secondary => Event::SecondaryExtracted { text },
        }))
    }
}

/// Fan-in: runs once both readings are available.
struct CompareStep {
    comparator: Provider<dyn ResultComparator>,
}

impl Step for CompareStep {
    fn run(&self, ctx: &StepContext, inputs: Vec<Event>) -> Result<Option<Event>, StepError> {
        let [primary, secondary]: [Event; 2] = inputs.try_into().map_err(|rest: Vec<Event>| {
            StepError::InvalidInput(format!("expected two readings, got {}", rest.len()))
        })?;
        let (Some(primary), Some(secondary)) = (primary.extracted_text(), secondary.extracted_text()) else {
            return Err(StepError::InvalidInput("join inputs are not extraction events".into()));
        };
        let name = ctx.state.read(|s| s.document_name.get())??;

        let comparison = {
            let comparator = self.comparator.acquire()?;
            comparator.compare(&name, primary, secondary)?
        };
        if !comparison.in_range() {
            tracing::warn!(
                run_id = %ctx.run_id,
                similarity = comparison.similarity,
                "Similarity out of range, clamping"
            );
        }
        let comparison = comparison.clamped();

        ctx.state.edit_scoped(|s| -> Result<(), StateError> {
            s.similarity.set(comparison.similarity)?;
            s.comparison_text.set(comparison.merged_text.clone())
        })?;
        tracing::info!(run_id = %ctx.run_id, document = %name, similarity = comparison.similarity, "Comparison finished");

        Ok(Some(Event::Compared {
            merged_text: comparison.merged_text,
            similarity: comparison.similarity,
        }))
    }
}

struct ClassifyStep {
    classifier: Provider<dyn ReportClassifier>,
}

impl Step for ClassifyStep {
    fn run(&self, ctx: &StepContext, inputs: Vec<Event>) -> Result<Option<Event>, StepError> {
        let Event::Compared { merged_text, similarity } = single(inputs)? else {
            return Err(StepError::InvalidInput("classification needs a comparison".into()));
        };
        let (path, name) = ctx
            .state
            .read(|s| Ok::<_, StateError>((s.document_path.get()?, s.document_name.get()?)))??;

        let report = {
            let classifier = self.classifier.acquire()?;
            classifier.classify(&path, &name, &merged_text, similarity)?
        };

        ctx.state.edit_scoped(|s| s.report.set(report.clone()))?;
        tracing::info!(
            run_id = %ctx.run_id,
            document = %name,
            verdict = report.lines().next().unwrap_or_default(),
            "Classification finished"
        );

        Ok(Some(Event::Classified { report }))
    }
}

// ═══════════════════════════════════════════════════════════
// Workflow
// ═══════════════════════════════════════════════════════════

/// The invoice pipeline wired to a set of collaborators.
pub struct Workflow {
    supervisor: RunSupervisor,
    collaborators: Collaborators,
}

impl Workflow {
    pub fn new(collaborators: Collaborators, config: WorkflowConfig) -> Result<Self, WorkflowError> {
        let registry = StepRegistry::builder(EventKind::Start, EventKind::Classified)
            .register(StepDescriptor::new(
                STEP_START,
                [EventKind::Start],
                Some(EventKind::DocumentReady),
                StartStep,
            ))
            .register(StepDescriptor::new(
                STEP_EXTRACT_PRIMARY,
                [EventKind::DocumentReady],
                Some(EventKind::PrimaryExtracted),
                ExtractStep {
                    reading: Reading::Primary,
                    extractor: collaborators.primary.clone(),
                },
            ))
            .register(StepDescriptor::new(
                STEP_EXTRACT_SECONDARY,
                [EventKind::DocumentReady],
                Some(EventKind::SecondaryExtracted),
                ExtractStep {
                    reading: Reading::Secondary,
                    extractor: collaborators.secondary.clone(),
                },
            ))
            .register(StepDescriptor::new(
                STEP_COMPARE,
                [EventKind::PrimaryExtracted, EventKind::SecondaryExtracted],
                Some(EventKind::Compared),
                CompareStep {
                    comparator: collaborators.comparator.clone(),
                },
            ))
            .register(StepDescriptor::new(
                STEP_CLASSIFY,
                [EventKind::Compared],
                Some(EventKind::Classified),
                ClassifyStep {
                    classifier: collaborators.classifier.clone(),
                },
            ))
            .build()?;

        Ok(Self {
            supervisor: RunSupervisor::new(registry, config),
            collaborators,
        })
    }

    /// Process one document.
    pub async fn run(
        &self,
        file_path: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Result<RunResult, WorkflowError> {
        self.run_traced(file_path, file_name).await.map(|done| done.result)
    }

    /// Process one document and keep its execution trace.
    pub async fn run_traced(
        &self,
        file_path: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Result<CompletedRun, WorkflowError> {
        self.supervisor.start(Event::start(file_path, file_name)).await
    }

    /// Mermaid flowchart of every possible flow through the pipeline.
    pub fn render_graph(&self) -> String {
        self.supervisor.registry().render_mermaid()
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    pub fn config(&self) -> &WorkflowConfig {
        self.supervisor.config()
    }
}
