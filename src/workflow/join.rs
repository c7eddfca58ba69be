//! Join Accumulator: buffers fan-in inputs until a step's required set is complete.
//!
//! Per fan-in step the buffer moves `EMPTY -> PARTIAL(n of m) -> COMPLETE`.
//! Completion releases the inputs in the declared order (never arrival order)
//! and resets the buffer for the next cycle. The accumulator belongs to a
//! single run, so concurrent runs never share partial sets.

use std::collections::HashMap;

use super::events::{Event, EventKind};

/// Observable phase of one step's join buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPhase {
    Empty,
    Partial { received: usize, required: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Join input '{kind}' delivered twice to step '{step}' in one cycle")]
    Duplicate { step: &'static str, kind: EventKind },

    #[error("Step '{step}' does not join on '{kind}'")]
    Unexpected { step: &'static str, kind: EventKind },
}

/// Result of offering an event to the accumulator.
#[derive(Debug, PartialEq)]
pub enum JoinOutcome {
    /// Still waiting on other kinds.
    Pending { received: usize, required: usize },
    /// Every required kind arrived; inputs in declared order.
    Complete(Vec<Event>),
}

#[derive(Debug)]
struct JoinBuffer {
    required: Vec<EventKind>,
    slots: Vec<Option<Event>>,
}

impl JoinBuffer {
    fn new(required: &[EventKind]) -> Self {
        Self {
            required: required.to_vec(),
            slots: vec![None; required.len()],
        }
    }

    fn received(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

/// Per-run join bookkeeping, keyed by fan-in step name.
#[derive(Debug, Default)]
pub struct JoinAccumulator {
    buffers: HashMap<&'static str, JoinBuffer>,
}

impl JoinAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer `event` to `step`, which requires `required` (declared order).
    pub fn offer(
        &mut self,
        step: &'static str,
        required: &[EventKind],
        event: Event,
    ) -> Result<JoinOutcome, JoinError> {
        let kind = event.kind();
        let buffer = self
            .buffers
            .entry(step)
            .or_insert_with(|| JoinBuffer::new(required));

        let position = buffer
            .required
            .iter()
            .position(|k| *k == kind)
            .ok_or(JoinError::Unexpected { step, kind })?;

        if buffer.slots[position].is_some() {
            return Err(JoinError::Duplicate { step, kind });
        }
        buffer.slots[position] = Some(event);

        let received = buffer.received();
        let required_count = buffer.required.len();
        if received < required_count {
            return Ok(JoinOutcome::Pending {
                received,
                required: required_count,
            });
        }

        // Complete: drain in declared order and reset to EMPTY.
        let inputs = buffer.slots.iter_mut().filter_map(Option::take).collect();
        self.buffers.remove(step);
        Ok(JoinOutcome::Complete(inputs))
    }

    pub fn phase(&self, step: &str) -> JoinPhase {
        match self.buffers.get(step) {
            Some(buffer) if buffer.received() > 0 => JoinPhase::Partial {
                received: buffer.received(),
                required: buffer.required.len(),
            },
            _ => JoinPhase::Empty,
        }
    }

    /// Fan-in steps still holding a partial set.
    pub fn pending_steps(&self) -> Vec<&'static str> {
        let mut steps: Vec<_> = self
            .buffers
            .iter()
            .filter(|(_, b)| b.received() > 0)
            .map(|(name, _)| *name)
            .collect();
        steps.sort_unstable();
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [EventKind; 2] = [EventKind::PrimaryExtracted, EventKind::SecondaryExtracted];

    fn a() -> Event {
        Event::PrimaryExtracted { text: "A".into() }
    }

    fn b() -> Event {
        Event::SecondaryExtracted { text: "B".into() }
    }

    #[test]
    fn a_then_b_releases_declared_order() {
        let mut acc = JoinAccumulator::new();
        assert_eq!(
            acc.offer("compare", &REQUIRED, a()).unwrap(),
            JoinOutcome::Pending { received: 1, required: 2 }
        );
        assert_eq!(
            acc.offer("compare", &REQUIRED, b()).unwrap(),
            JoinOutcome::Complete(vec![a(), b()])
        );
    }

    #[test]
    fn b_then_a_releases_declared_order() {
        let mut acc = JoinAccumulator::new();
        acc.offer("compare", &REQUIRED, b()).unwrap();
        assert_eq!(
            acc.offer("compare", &REQUIRED, a()).unwrap(),
            JoinOutcome::Complete(vec![a(), b()])
        );
    }

    #[test]
    fn duplicate_before_completion_fails() {
        let mut acc = JoinAccumulator::new();
        acc.offer("compare", &REQUIRED, a()).unwrap();
        let err = acc.offer("compare", &REQUIRED, a()).unwrap_err();
        assert_eq!(
            err,
            JoinError::Duplicate { step: "compare", kind: EventKind::PrimaryExtracted }
        );
        // The original input is kept; the cycle can still complete.
        assert_eq!(
            acc.offer("compare", &REQUIRED, b()).unwrap(),
            JoinOutcome::Complete(vec![a(), b()])
        );
    }

    #[test]
    fn completion_resets_for_next_cycle() {
        let mut acc = JoinAccumulator::new();
        acc.offer("compare", &REQUIRED, a()).unwrap();
        acc.offer("compare", &REQUIRED, b()).unwrap();
        assert_eq!(acc.phase("compare"), JoinPhase::Empty);

        // Same kind again is a fresh cycle, not a duplicate.
        assert!(matches!(
            acc.offer("compare", &REQUIRED, a()).unwrap(),
            JoinOutcome::Pending { received: 1, .. }
        ));
        assert_eq!(acc.phase("compare"), JoinPhase::Partial { received: 1, required: 2 });
        assert_eq!(acc.pending_steps(), vec!["compare"]);
    }

    #[test]
    fn unexpected_kind_is_rejected() {
        let mut acc = JoinAccumulator::new();
        let err = acc
            .offer("compare", &REQUIRED, Event::Classified { report: "r".into() })
            .unwrap_err();
        assert_eq!(err, JoinError::Unexpected { step: "compare", kind: EventKind::Classified });
        assert_eq!(acc.phase("compare"), JoinPhase::Empty);
    }

    #[test]
    fn buffers_are_independent_per_step() {
        let mut acc = JoinAccumulator::new();
        acc.offer("left", &REQUIRED, a()).unwrap();
        acc.offer("right", &REQUIRED, b()).unwrap();
        assert_eq!(acc.pending_steps(), vec!["left", "right"]);
    }
}
