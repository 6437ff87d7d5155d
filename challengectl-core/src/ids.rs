//! Type-safe entity identifiers.
//!
//! Every entity in the data model (§3) gets its own UUID newtype so that,
//! for instance, an `AgentId` can never be passed where a `ChallengeId` is
//! expected. Transparent `Uuid` serialization keeps the wire format a plain
//! string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use uuid::Uuid;

/// Common behavior for entity ID newtypes.
pub trait EntityIdType:
    Copy
    + Clone
    + Eq
    + PartialEq
    + Hash
    + fmt::Debug
    + fmt::Display
    + FromStr
    + Serialize
    + serde::de::DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const ENTITY_NAME: &'static str;

    fn new(uuid: Uuid) -> Self;
    fn as_uuid(&self) -> Uuid;

    fn nil() -> Self {
        Self::new(Uuid::nil())
    }

    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }

    fn new_v4() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Error returned when parsing an entity ID from a string fails.
#[derive(Debug, Clone)]
pub struct EntityIdParseError {
    pub entity_name: &'static str,
    pub input: String,
    pub source: uuid::Error,
}

impl fmt::Display for EntityIdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to parse {} id from '{}': {}",
            self.entity_name, self.input, self.source
        )
    }
}

impl std::error::Error for EntityIdParseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

macro_rules! define_entity_id {
    ($name:ident, $entity:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            const ENTITY_NAME: &'static str = $entity;

            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = EntityIdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::from_str(s)
                    .map(Self::new)
                    .map_err(|e| EntityIdParseError {
                        entity_name: Self::ENTITY_NAME,
                        input: s.to_string(),
                        source: e,
                    })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                Uuid::deserialize(deserializer).map(Self::new)
            }
        }
    };
}

define_entity_id!(AgentId, "agent", "Type-safe ID for an agent (worker or receiver).");
define_entity_id!(ChallengeId, "challenge", "Type-safe ID for a challenge.");
define_entity_id!(
    TransmissionId,
    "transmission",
    "Type-safe ID for a transmission record."
);
define_entity_id!(
    EnrollmentTokenId,
    "enrollment_token",
    "Type-safe ID for an enrollment token (the token value itself is opaque, this wraps its row)."
);
define_entity_id!(
    ProvisioningKeyId,
    "provisioning_key",
    "Type-safe ID for a provisioning credential."
);
define_entity_id!(
    RecordingAssignmentId,
    "recording_assignment",
    "Type-safe ID for a recording assignment."
);
define_entity_id!(RecordingId, "recording", "Type-safe ID for a recording.");
