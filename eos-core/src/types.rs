//! Strongly-typed identifiers for harness entities.
//!
//! Explicit types prevent mixing up a broker id with a partition number.

use std::fmt;

/// Declares a `u64` identifier newtype.
///
/// `$prefix` names the entity in log output: `broker-2` when displayed,
/// `broker(2)` when debugged.
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw number.
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// The raw number.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple($prefix).field(&self.0).finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(NodeId, "broker", "Identifier of a broker node in the cluster under test.");
define_id!(PartitionId, "partition", "Partition number within a topic.");

/// Stable logical name bound to one transactional producer role.
///
/// The messaging system uses it to fence zombie instances and to resolve
/// in-flight transactions after a restart, so it must never change across
/// restarts of the same copy stream.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionalId(String);

impl TransactionalId {
    /// Creates a new transactional id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TransactionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn({})", self.0)
    }
}

impl fmt::Display for TransactionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionalId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        let node = NodeId::new(2);
        assert_eq!(format!("{node}"), "broker-2");
        assert_eq!(format!("{node:?}"), "broker(2)");
    }

    #[test]
    fn test_id_conversions() {
        let partition = PartitionId::from(1);
        assert_eq!(u64::from(partition), 1);
        assert_eq!(partition.get(), 1);
    }

    #[test]
    fn test_transactional_id_display() {
        let id = TransactionalId::from("my-first-transactional-id");
        assert_eq!(format!("{id}"), "my-first-transactional-id");
        assert_eq!(id.as_str(), "my-first-transactional-id");
    }
}
