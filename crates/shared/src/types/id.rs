//! Typed ids for students, disciplines and ledger records.
//!
//! Every ledger entity gets its own id type, so a `StudentId` can never be
//! passed where a `DisciplineId` belongs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a `Copy` newtype over a v7 UUID.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Mints a time-ordered id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wraps a UUID read from storage or the wire.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Unwraps the UUID for storage.
            #[must_use]
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

typed_id!(StudentId, "Unique identifier for a student.");
typed_id!(DisciplineId, "Unique identifier for a discipline (school subject).");
typed_id!(TransactionId, "Unique identifier for a ledger transaction.");
typed_id!(LotId, "Unique identifier for a lot of earned coins.");
typed_id!(ActorId, "Unique identifier for a staff member acting on the ledger.");
typed_id!(AuditEntryId, "Unique identifier for an audit log entry.");

impl StudentId {
    /// The student slot owned by the system (fee pool).
    pub const SYSTEM: Self = Self(Uuid::nil());

    /// Returns true for the system-owned student slot.
    #[must_use]
    pub fn is_system(self) -> bool {
        self.0.is_nil()
    }
}

impl DisciplineId {
    /// The discipline slot owned by the system (fee pool).
    pub const SYSTEM: Self = Self(Uuid::nil());
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
