//! Step registry: which steps exist, what triggers them, what they emit.
//!
//! The registry is assembled once through [`StepRegistryBuilder`] and frozen
//! before any run starts; routing is a lookup from [`EventKind`] to the steps
//! registered for it.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::{self, Write as _};
use std::sync::Arc;

use uuid::Uuid;

use super::error::{StepError, WorkflowError};
use super::events::{Event, EventKind};
use super::state::RunState;

/// What a step body sees of its run.
#[derive(Clone)]
pub struct StepContext {
    pub run_id: Uuid,
    pub step: &'static str,
    /// Document name of the run, for logs and error context.
    pub document: String,
    pub state: Arc<RunState>,
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("run_id", &self.run_id)
            .field("step", &self.step)
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}

/// A unit of work. Bodies run on the blocking pool and keep no per-run state.
pub trait Step: Send + Sync {
    /// `inputs` holds one event for a single-trigger step, or the complete
    /// join tuple in declared trigger order for a fan-in step.
    fn run(&self, ctx: &StepContext, inputs: Vec<Event>) -> Result<Option<Event>, StepError>;
}

struct FnStep<F>(F);

impl<F> Step for FnStep<F>
where
    F: Fn(&StepContext, Vec<Event>) -> Result<Option<Event>, StepError> + Send + Sync,
{
    fn run(&self, ctx: &StepContext, inputs: Vec<Event>) -> Result<Option<Event>, StepError> {
        (self.0)(ctx, inputs)
    }
}

// ═══════════════════════════════════════════════════════════
// Descriptor
// ═══════════════════════════════════════════════════════════

pub struct StepDescriptor {
    name: &'static str,
    triggers: Vec<EventKind>,
    output: Option<EventKind>,
    body: Arc<dyn Step>,
}

impl StepDescriptor {
    pub fn new(
        name: &'static str,
        triggers: impl IntoIterator<Item = EventKind>,
        output: Option<EventKind>,
        body: impl Step + 'static,
    ) -> Self {
        Self {
            name,
            triggers: triggers.into_iter().collect(),
            output,
            body: Arc::new(body),
        }
    }

    /// Descriptor whose body is a plain function or closure.
    pub fn from_fn<F>(
        name: &'static str,
        triggers: impl IntoIterator<Item = EventKind>,
        output: Option<EventKind>,
        body: F,
    ) -> Self
    where
        F: Fn(&StepContext, Vec<Event>) -> Result<Option<Event>, StepError> + Send + Sync + 'static,
    {
        Self::new(name, triggers, output, FnStep(body))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Trigger kinds in declared order.
    pub fn triggers(&self) -> &[EventKind] {
        &self.triggers
    }

    pub fn output(&self) -> Option<EventKind> {
        self.output
    }

    /// Fan-in steps wait for every trigger kind before running.
    pub fn is_join(&self) -> bool {
        self.triggers.len() > 1
    }

    pub(crate) fn body(&self) -> Arc<dyn Step> {
        Arc::clone(&self.body)
    }
}

impl fmt::Debug for StepDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDescriptor")
            .field("name", &self.name)
            .field("triggers", &self.triggers)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

// ═══════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════

pub struct StepRegistryBuilder {
    start: EventKind,
    terminal: EventKind,
    steps: Vec<StepDescriptor>,
}

impl StepRegistryBuilder {
    pub fn register(mut self, descriptor: StepDescriptor) -> Self {
        self.steps.push(descriptor);
        self
    }

    /// Validate the graph and freeze it.
    pub fn build(self) -> Result<StepRegistry, WorkflowError> {
        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name) {
                return Err(WorkflowError::Registry(format!(
                    "step '{}' registered twice",
                    step.name
                )));
            }
            if step.triggers.is_empty() {
                return Err(WorkflowError::Registry(format!(
                    "step '{}' has no trigger",
                    step.name
                )));
            }
            let mut seen = HashSet::new();
            for kind in &step.triggers {
                if !seen.insert(*kind) {
                    return Err(WorkflowError::Registry(format!(
                        "step '{}' lists trigger '{kind}' twice",
                        step.name
                    )));
                }
                if *kind == self.terminal {
                    return Err(WorkflowError::Registry(format!(
                        "step '{}' is triggered by the terminal event '{kind}'",
                        step.name
                    )));
                }
            }
        }

        if !self.steps.iter().any(|s| s.triggers.contains(&self.start)) {
            return Err(WorkflowError::Registry(format!(
                "no step consumes the start event '{}'",
                self.start
            )));
        }

        let steps: Vec<Arc<StepDescriptor>> = self.steps.into_iter().map(Arc::new).collect();
        let mut routes: HashMap<EventKind, Vec<Arc<StepDescriptor>>> = HashMap::new();
        for step in &steps {
            for kind in &step.triggers {
                routes.entry(*kind).or_default().push(Arc::clone(step));
            }
        }

        for step in &steps {
            if let Some(out) = step.output {
                if out != self.terminal && !routes.contains_key(&out) {
                    tracing::warn!(step = step.name, output = %out, "Step output has no consumer");
                }
            }
        }

        Ok(StepRegistry {
            start: self.start,
            terminal: self.terminal,
            steps,
            routes,
        })
    }
}

// ═══════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════

/// Frozen routing table.
pub struct StepRegistry {
    start: EventKind,
    terminal: EventKind,
    steps: Vec<Arc<StepDescriptor>>,
    routes: HashMap<EventKind, Vec<Arc<StepDescriptor>>>,
}

impl StepRegistry {
    pub fn builder(start: EventKind, terminal: EventKind) -> StepRegistryBuilder {
        StepRegistryBuilder {
            start,
            terminal,
            steps: Vec::new(),
        }
    }

    pub fn start_kind(&self) -> EventKind {
        self.start
    }

    pub fn terminal_kind(&self) -> EventKind {
        self.terminal
    }

    /// Steps in registration order.
    pub fn steps(&self) -> &[Arc<StepDescriptor>] {
        &self.steps
    }

    /// Steps registered for `kind`, in registration order.
    pub fn route(&self, kind: EventKind) -> &[Arc<StepDescriptor>] {
        self.routes.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Mermaid flowchart of every possible flow: event kinds, steps, outputs.
    pub fn render_mermaid(&self) -> String {
        let mut kinds = BTreeSet::new();
        kinds.insert(self.start);
        kinds.insert(self.terminal);
        for step in &self.steps {
            kinds.extend(step.triggers.iter().copied());
            kinds.extend(step.output);
        }

        let mut out = String::from("flowchart TD\n");
        for kind in &kinds {
            let _ = if *kind == self.terminal {
                writeln!(out, "    ev_{kind}((({kind})))")
            } else {
                writeln!(out, "    ev_{kind}([{kind}])")
            };
        }
        for step in &self.steps {
            let _ = writeln!(out, "    st_{0}[{0}]", step.name);
        }
        for step in &self.steps {
            let arity = step.triggers.len();
            for (i, kind) in step.triggers.iter().enumerate() {
                let _ = if arity > 1 {
                    writeln!(out, "    ev_{kind} -->|{}/{arity}| st_{}", i + 1, step.name)
                } else {
                    writeln!(out, "    ev_{kind} --> st_{}", step.name)
                };
            }
            if let Some(output) = step.output {
                let _ = writeln!(out, "    st_{} --> ev_{output}", step.name);
            }
        }
        out
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("start", &self.start)
            .field("terminal", &self.terminal)
            .field("steps", &self.steps)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(
        name: &'static str,
        triggers: &[EventKind],
        output: Option<EventKind>,
    ) -> StepDescriptor {
        StepDescriptor::from_fn(name, triggers.iter().copied(), output, |_, _| Ok(None))
    }

    fn builder() -> StepRegistryBuilder {
        StepRegistry::builder(EventKind::Start, EventKind::Classified)
    }

    fn registry_error(result: Result<StepRegistry, WorkflowError>) -> String {
        match result {
            Err(WorkflowError::Registry(msg)) => msg,
            other => panic!("expected registry error, got {other:?}"),
        }
    }

    #[test]
    fn routes_fan_out_to_every_registered_step() {
        let registry = builder()
            .register(noop("start", &[EventKind::Start], Some(EventKind::DocumentReady)))
            .register(noop("left", &[EventKind::DocumentReady], Some(EventKind::PrimaryExtracted)))
            .register(noop("right", &[EventKind::DocumentReady], Some(EventKind::SecondaryExtracted)))
            .build()
            .unwrap();

        let names: Vec<_> = registry
            .route(EventKind::DocumentReady)
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(names, vec!["left", "right"]);
        assert!(registry.route(EventKind::Compared).is_empty());
    }

    #[test]
    fn fan_in_step_is_routed_from_each_trigger() {
        let registry = builder()
            .register(noop("start", &[EventKind::Start], None))
            .register(noop(
                "compare",
                &[EventKind::PrimaryExtracted, EventKind::SecondaryExtracted],
                Some(EventKind::Compared),
            ))
            .build()
            .unwrap();

        let compare = &registry.route(EventKind::SecondaryExtracted)[0];
        assert!(compare.is_join());
        assert_eq!(
            compare.triggers(),
            &[EventKind::PrimaryExtracted, EventKind::SecondaryExtracted]
        );
        assert_eq!(registry.route(EventKind::PrimaryExtracted).len(), 1);
    }

    #[test]
    fn duplicate_step_name_is_rejected() {
        let msg = registry_error(
            builder()
                .register(noop("start", &[EventKind::Start], None))
                .register(noop("start", &[EventKind::Compared], None))
                .build(),
        );
        assert!(msg.contains("registered twice"));
    }

    #[test]
    fn empty_trigger_list_is_rejected() {
        let msg = registry_error(
            builder()
                .register(noop("start", &[EventKind::Start], None))
                .register(noop("orphan", &[], None))
                .build(),
        );
        assert!(msg.contains("no trigger"));
    }

    #[test]
    fn repeated_trigger_kind_is_rejected() {
        let msg = registry_error(
            builder()
                .register(noop("start", &[EventKind::Start, EventKind::Start], None))
                .build(),
        );
        assert!(msg.contains("twice"));
    }

    #[test]
    fn terminal_kind_cannot_trigger_a_step() {
        let msg = registry_error(
            builder()
                .register(noop("start", &[EventKind::Start], None))
                .register(noop("after", &[EventKind::Classified], None))
                .build(),
        );
        assert!(msg.contains("terminal"));
    }

    #[test]
    fn start_kind_needs_a_consumer() {
        let msg = registry_error(
            builder()
                .register(noop("compare", &[EventKind::Compared], None))
                .build(),
        );
        assert!(msg.contains("start event"));
    }

    #[test]
    fn mermaid_lists_events_steps_and_join_positions() {
        let registry = builder()
            .register(noop("start", &[EventKind::Start], Some(EventKind::DocumentReady)))
            .register(noop(
                "compare",
                &[EventKind::PrimaryExtracted, EventKind::SecondaryExtracted],
                Some(EventKind::Classified),
            ))
            .build()
            .unwrap();

        let chart = registry.render_mermaid();
        assert!(chart.starts_with("flowchart TD\n"));
        assert!(chart.contains("ev_start([start])"));
        assert!(chart.contains("ev_classified(((classified)))"));
        assert!(chart.contains("ev_start --> st_start"));
        assert!(chart.contains("ev_primary_extracted -->|1/2| st_compare"));
        assert!(chart.contains("ev_secondary_extracted -->|2/2| st_compare"));
        assert!(chart.contains("st_compare --> ev_classified"));
    }
}
