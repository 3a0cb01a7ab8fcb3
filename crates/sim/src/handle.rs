//! Opaque identifier/handle types (C1).
//!
//! Every handle is value-compared, ordered by its numeric value, and treats
//! `0` as the sentinel "invalid" value. Handles never carry shared ownership;
//! they are indices into arenas/maps owned elsewhere.

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $repr:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name($repr);

        impl $name {
            /// The sentinel invalid value.
            pub const INVALID: Self = Self(0);

            pub const fn new(value: $repr) -> Self {
                Self(value)
            }

            pub const fn value(self) -> $repr {
                self.0
            }

            pub const fn is_valid(self) -> bool {
                self.0 != 0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$repr> for $name {
            fn from(value: $repr) -> Self {
                Self(value)
            }
        }
    };
}

define_handle!(
    /// Dense positive 32-bit entity identifier. Ordering by value is the
    /// canonical deterministic order used throughout replication and combat.
    EntityHandle,
    u32
);
define_handle!(
    /// Opaque session handle assigned at connection accept time.
    SessionId,
    u64
);
define_handle!(
    /// Opaque per-match player identifier.
    PlayerId,
    u64
);
define_handle!(
    /// Opaque handle into the persistence save log.
    SaveId,
    u64
);
define_handle!(
    /// Opaque zone/world-shard identifier.
    ZoneId,
    u64
);
define_handle!(
    /// Opaque handle for a concrete item instance.
    ItemInstanceId,
    u64
);
define_handle!(
    /// Opaque NPC identifier.
    NpcId,
    u64
);
define_handle!(
    /// Opaque handle for a quest instance attached to a player.
    QuestInstanceId,
    u64
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_invalid() {
        assert!(!EntityHandle::INVALID.is_valid());
        assert!(!EntityHandle::new(0).is_valid());
        assert!(EntityHandle::new(1).is_valid());
    }

    #[test]
    fn ordering_is_numeric() {
        let mut handles = vec![EntityHandle::new(9), EntityHandle::new(1), EntityHandle::new(5)];
        handles.sort();
        assert_eq!(
            handles,
            vec![EntityHandle::new(1), EntityHandle::new(5), EntityHandle::new(9)]
        );
    }

    #[test]
    fn display_matches_value() {
        assert_eq!(format!("{}", EntityHandle::new(42)), "42");
        assert_eq!(format!("{}", SessionId::new(7)), "7");
    }
}
