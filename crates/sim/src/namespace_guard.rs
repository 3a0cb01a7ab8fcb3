//! Identifier namespace guard (C13 debug).
//!
//! Debug-only check that a canonical identifier type, once bound to a
//! namespace name during wiring, is never silently rebound to a different
//! Rust type under the same name. Elided entirely in release builds, the
//! same way `InputBuffer::has_entry`-style helpers stay test/debug-only
//! rather than shipping a runtime cost into production.

#[cfg(debug_assertions)]
use std::any::TypeId;
#[cfg(debug_assertions)]
use std::collections::HashMap;

#[derive(Default)]
pub struct NamespaceGuard {
    #[cfg(debug_assertions)]
    seen: HashMap<&'static str, TypeId>,
}

impl NamespaceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` as the canonical identifier type for `namespace`.
    /// Fatal on mismatch against a prior registration for the same name.
    #[cfg(debug_assertions)]
    pub fn assert_canonical<T: 'static>(&mut self, namespace: &'static str) {
        let type_id = TypeId::of::<T>();
        if let Some(existing) = self.seen.get(namespace) {
            assert_eq!(
                *existing, type_id,
                "namespace `{namespace}` rebound to a different identifier type"
            );
        } else {
            self.seen.insert(namespace, type_id);
        }
    }

    #[cfg(not(debug_assertions))]
    pub fn assert_canonical<T: 'static>(&mut self, _namespace: &'static str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{EntityHandle, SessionId};

    #[test]
    fn same_type_reregistered_under_same_namespace_is_fine() {
        let mut guard = NamespaceGuard::new();
        guard.assert_canonical::<EntityHandle>("entity");
        guard.assert_canonical::<EntityHandle>("entity");
    }

    #[test]
    #[should_panic(expected = "rebound to a different identifier type")]
    #[cfg(debug_assertions)]
    fn distinct_type_under_same_namespace_panics() {
        let mut guard = NamespaceGuard::new();
        guard.assert_canonical::<EntityHandle>("entity");
        guard.assert_canonical::<SessionId>("entity");
    }
}
