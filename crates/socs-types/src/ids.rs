//! Type-safe identifier wrappers around `i64`.
//!
//! Targets, fields and proposals are numbered by the external scheduler;
//! observations and sessions are numbered by this system. Wrapping each in
//! its own newtype prevents a target id from being written where an
//! observation id is expected.
//!
//! The scheduler marks "no value" with `-1`. Each id exposes that value as
//! [`SENTINEL`](TargetId::SENTINEL) rather than modelling it as `Option`
//! so that wire payloads keep the scheduler's shape.

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around `i64` with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// The "no value" marker used on the wire.
            pub const SENTINEL: Self = Self(-1);

            /// Create an identifier from its raw value.
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Return the inner `i64` value.
            pub const fn into_inner(self) -> i64 {
                self.0
            }

            /// Whether this identifier is the wire sentinel.
            pub const fn is_sentinel(self) -> bool {
                self.0 == Self::SENTINEL.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Identifier the scheduler assigns to a requested target.
    TargetId
}

define_id! {
    /// Identifier of a completed observation (1-based, run-wide).
    ObservationId
}

define_id! {
    /// Identifier of a sky field in the survey tessellation.
    FieldId
}

define_id! {
    /// Identifier of a science proposal.
    ProposalId
}

define_id! {
    /// Identifier of a simulation session in the storage layer.
    SessionId
}
