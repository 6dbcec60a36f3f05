//! Identifier types for the messaging subsystem.
//!
//! Strongly-typed UUID newtypes so a `PartyId` can never be passed where a
//! `ConversationId` is expected. All three serialize transparently as their
//! UUID string form, which is also how they are stored in SQLite.
//!
//! With the `uuid_v7` feature enabled, row identifiers use `UUIDv7` for
//! better DB insert locality; party identifiers stay random `UUIDv4` to
//! avoid leaking account-creation timestamps.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate an ID intended to have good DB insert locality.
#[inline]
#[must_use]
fn uuid_time_ordered() -> Uuid {
    #[cfg(feature = "uuid_v7")]
    {
        Uuid::now_v7()
    }
    #[cfg(not(feature = "uuid_v7"))]
    {
        Uuid::new_v4()
    }
}

/// Generate a random UUID (v4).
#[inline]
#[must_use]
fn uuid_random() -> Uuid {
    Uuid::new_v4()
}

/// Declare a UUID newtype with a consistent API.
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $name:ident,
        generator = $gen:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl Default for $name {
            #[inline]
            fn default() -> Self {
                Self::new()
            }
        }

        impl $name {
            /// Create a new identifier.
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self($gen())
            }

            /// Wrap an existing UUID.
            #[inline]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Borrow the underlying UUID.
            #[inline]
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Extract the underlying UUID.
            #[inline]
            #[must_use]
            pub const fn into_uuid(self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            #[inline]
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            #[inline]
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<Uuid> for $name {
            #[inline]
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            #[inline]
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_uuid_id!(
    /// Profile identifier of a user as known to the messaging core.
    ///
    /// Distinct from the raw authentication principal; the identity provider
    /// maps one to the other. Random `UUIDv4` so exposed IDs leak nothing.
    PartyId,
    generator = uuid_random
);

define_uuid_id!(
    /// Identifier of a DM thread between exactly two parties.
    ConversationId,
    generator = uuid_time_ordered
);

define_uuid_id!(
    /// Identifier of one immutable message within a conversation.
    MessageId,
    generator = uuid_time_ordered
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_round_trip() {
        let id = ConversationId::new();
        let parsed: ConversationId = id.to_string().parse().expect("parse own display output");
        assert_eq!(id, parsed);
    }

    #[test]
    fn serde_is_transparent() {
        let id = PartyId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn distinct_types_distinct_values() {
        assert_ne!(MessageId::new(), MessageId::new());
    }
}
