//! Identifiers for jobs and their work items.
//!
//! Both are random v4 UUIDs serialized as plain strings. A job id is only
//! assigned once the job has been accepted into the registry, so persisted
//! jobs carry one and freshly defined jobs do not.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }
    };
}

uuid_newtype!(
    /// Registry identity of a job, persisted with its definition.
    JobId
);

uuid_newtype!(
    /// Identity of one entry in a job's work list. Progress and result
    /// updates are addressed by this id rather than by list position.
    WorkItemId
);
