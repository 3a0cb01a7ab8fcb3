//! Eligibility gate set (C3): an ordered chain of predicates evaluated in
//! the Pre-Tick phase and re-checked for stability in Post-Tick.

use crate::handle::EntityHandle;

/// A single eligibility predicate. Gates are pure and side-effect-free —
/// they answer "is this entity eligible to participate this tick" without
/// observing or mutating anything beyond their own closed-over state.
pub trait EligibilityGate: Send + Sync {
    fn is_eligible(&self, entity: EntityHandle) -> bool;
}

/// Ordered chain of gates, evaluated in registration order with short
/// circuit on the first `false`.
#[derive(Default)]
pub struct EligibilityGateSet {
    gates: Vec<Box<dyn EligibilityGate>>,
}

impl EligibilityGateSet {
    pub fn new() -> Self {
        Self { gates: Vec::new() }
    }

    pub fn register(&mut self, gate: Box<dyn EligibilityGate>) {
        self.gates.push(gate);
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Evaluate every gate for `entity` in registration order, short-
    /// circuiting on the first rejection.
    pub fn evaluate(&self, entity: EntityHandle) -> bool {
        self.gates.iter().all(|gate| gate.is_eligible(entity))
    }

    /// Evaluate all entities, preserving their input order. Used for the
    /// Pre-Tick and Post-Tick eligibility maps compared by the simulation
    /// core.
    pub fn evaluate_all(&self, entities: &[EntityHandle]) -> Vec<(EntityHandle, bool)> {
        entities
            .iter()
            .map(|&entity| (entity, self.evaluate(entity)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AllowAbove(u32);
    impl EligibilityGate for AllowAbove {
        fn is_eligible(&self, entity: EntityHandle) -> bool {
            entity.value() > self.0
        }
    }

    struct AlwaysReject;
    impl EligibilityGate for AlwaysReject {
        fn is_eligible(&self, _entity: EntityHandle) -> bool {
            false
        }
    }

    #[test]
    fn empty_set_admits_everything() {
        let set = EligibilityGateSet::new();
        assert!(set.evaluate(EntityHandle::new(1)));
    }

    #[test]
    fn chain_short_circuits() {
        let mut set = EligibilityGateSet::new();
        set.register(Box::new(AllowAbove(5)));
        set.register(Box::new(AlwaysReject));
        assert!(!set.evaluate(EntityHandle::new(10)));
        assert!(!set.evaluate(EntityHandle::new(1)));
    }

    #[test]
    fn registration_order_is_preserved() {
        let mut set = EligibilityGateSet::new();
        set.register(Box::new(AllowAbove(5)));
        assert_eq!(set.len(), 1);
        assert!(set.evaluate(EntityHandle::new(6)));
        assert!(!set.evaluate(EntityHandle::new(4)));
    }

    #[test]
    fn evaluate_all_preserves_entity_order() {
        let mut set = EligibilityGateSet::new();
        set.register(Box::new(AllowAbove(5)));
        let entities = vec![EntityHandle::new(1), EntityHandle::new(9), EntityHandle::new(3)];
        let map = set.evaluate_all(&entities);
        assert_eq!(
            map,
            vec![
                (EntityHandle::new(1), false),
                (EntityHandle::new(9), true),
                (EntityHandle::new(3), false),
            ]
        );
    }
}
