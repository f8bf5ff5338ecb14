//! The phase abstraction and its ordering.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;

use super::context::MessageProcessContext;
use super::error::PhaseError;
use super::template::MessageProcessTemplate;

/// Coarse classification used by the default phase ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    Validation,
    FlowProcessing,
    Custom,
}

/// Receives the outcome of one phase. Exactly one method is called per phase
/// run.
#[async_trait]
pub trait PhaseResultNotifier: Send + Sync {
    async fn phase_successfully(&self);

    /// The phase consumed the message; no later phase must run.
    async fn phase_consumed_message(&self);

    async fn phase_failure(&self, error: PhaseError);
}

/// One step of message processing. Phases hold no per-message state; a single
/// instance serves every message handled by an engine.
#[async_trait]
pub trait MessageProcessPhase: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> PhaseKind {
        PhaseKind::Custom
    }

    fn supports_template(&self, template: &MessageProcessTemplate) -> bool;

    /// Orders this phase against `other`. `None` means this phase has no
    /// opinion; the reverse comparison is consulted next.
    ///
    /// By default validation phases sort before every other kind.
    fn compare_to(&self, other: &dyn MessageProcessPhase) -> Option<Ordering> {
        match (self.kind(), other.kind()) {
            (PhaseKind::Validation, kind) if kind != PhaseKind::Validation => Some(Ordering::Less),
            (kind, PhaseKind::Validation) if kind != PhaseKind::Validation => {
                Some(Ordering::Greater)
            }
            _ => None,
        }
    }

    async fn run_phase(
        &self,
        template: &MessageProcessTemplate,
        context: Arc<MessageProcessContext>,
        notifier: Arc<dyn PhaseResultNotifier>,
    );
}

/// Total order over phases: `a.compare_to(b)`, then the reverse of
/// `b.compare_to(a)`, then `Equal`.
#[must_use]
pub fn compare_phases(a: &dyn MessageProcessPhase, b: &dyn MessageProcessPhase) -> Ordering {
    a.compare_to(b)
        .or_else(|| b.compare_to(a).map(Ordering::reverse))
        .unwrap_or(Ordering::Equal)
}

/// Inserts `phase` before the first phase it sorts ahead of, keeping
/// registration order among equals.
pub fn insert_sorted(phases: &mut Vec<Arc<dyn MessageProcessPhase>>, phase: Arc<dyn MessageProcessPhase>) {
    let position = phases
        .iter()
        .position(|existing| compare_phases(phase.as_ref(), existing.as_ref()) == Ordering::Less)
        .unwrap_or(phases.len());
    phases.insert(position, phase);
}

/// Orders `phases` with [`insert_sorted`].
#[must_use]
pub fn sort_phases(phases: Vec<Arc<dyn MessageProcessPhase>>) -> Vec<Arc<dyn MessageProcessPhase>> {
    let mut sorted = Vec::with_capacity(phases.len());
    for phase in phases {
        insert_sorted(&mut sorted, phase);
    }
    sorted
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    struct Named {
        name: String,
        kind: PhaseKind,
    }

    #[async_trait]
    impl MessageProcessPhase for Named {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> PhaseKind {
            self.kind
        }

        fn supports_template(&self, _template: &MessageProcessTemplate) -> bool {
            true
        }

        async fn run_phase(
            &self,
            _template: &MessageProcessTemplate,
            _context: Arc<MessageProcessContext>,
            notifier: Arc<dyn PhaseResultNotifier>,
        ) {
            notifier.phase_successfully().await;
        }
    }

    /// Only defines an ordering from its own side: always last.
    struct Trailing;

    #[async_trait]
    impl MessageProcessPhase for Trailing {
        fn name(&self) -> &str {
            "trailing"
        }

        fn compare_to(&self, _other: &dyn MessageProcessPhase) -> Option<Ordering> {
            Some(Ordering::Greater)
        }

        fn supports_template(&self, _template: &MessageProcessTemplate) -> bool {
            true
        }

        async fn run_phase(
            &self,
            _template: &MessageProcessTemplate,
            _context: Arc<MessageProcessContext>,
            notifier: Arc<dyn PhaseResultNotifier>,
        ) {
            notifier.phase_successfully().await;
        }
    }

    fn phase(name: &str, kind: PhaseKind) -> Arc<dyn MessageProcessPhase> {
        Arc::new(Named {
            name: name.to_string(),
            kind,
        })
    }

    fn names(phases: &[Arc<dyn MessageProcessPhase>]) -> Vec<String> {
        phases.iter().map(|p| p.name().to_string()).collect()
    }

    #[test]
    fn validation_sorts_first() {
        let sorted = sort_phases(vec![
            phase("flow", PhaseKind::FlowProcessing),
            phase("custom", PhaseKind::Custom),
            phase("validation", PhaseKind::Validation),
        ]);
        assert_eq!(names(&sorted), vec!["validation", "flow", "custom"]);
    }

    #[test]
    fn one_sided_ordering_is_honoured_from_either_side() {
        let sorted = sort_phases(vec![
            Arc::new(Trailing),
            phase("flow", PhaseKind::FlowProcessing),
        ]);
        assert_eq!(names(&sorted), vec!["flow", "trailing"]);

        assert_eq!(
            compare_phases(phase("flow", PhaseKind::FlowProcessing).as_ref(), &Trailing),
            Ordering::Less
        );
    }

    fn kind_strategy() -> impl Strategy<Value = PhaseKind> {
        prop_oneof![
            Just(PhaseKind::Validation),
            Just(PhaseKind::FlowProcessing),
            Just(PhaseKind::Custom),
        ]
    }

    proptest! {
        #[test]
        fn any_permutation_sorts_validation_first_and_stable(
            kinds in proptest::collection::vec(kind_strategy(), 0..12)
        ) {
            let phases: Vec<_> = kinds
                .iter()
                .enumerate()
                .map(|(i, kind)| phase(&format!("p{i}"), *kind))
                .collect();
            let sorted = sort_phases(phases);

            let first_other = sorted
                .iter()
                .position(|p| p.kind() != PhaseKind::Validation)
                .unwrap_or(sorted.len());
            prop_assert!(sorted[first_other..].iter().all(|p| p.kind() != PhaseKind::Validation));

            // Registration order is kept inside each group.
            let index = |p: &Arc<dyn MessageProcessPhase>| -> usize {
                p.name()[1..].parse().unwrap()
            };
            let (validation, others) = sorted.split_at(first_other);
            prop_assert!(validation.windows(2).all(|w| index(&w[0]) < index(&w[1])));
            prop_assert!(others.windows(2).all(|w| index(&w[0]) < index(&w[1])));
            prop_assert_eq!(sorted.len(), kinds.len());
        }
    }
}
