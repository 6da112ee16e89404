//! Identifier newtypes shared by the kernel and its modules.
//!
//! * [`EntityId`] is a dense, zero-based handle into every property store. Ids are issued
//!   monotonically by the population module and never reused.
//! * [`PropertyId`] names a property definition, and hence one property store.
//! * [`ModuleId`] names a module taking part in dependency-ordered initialization.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// A dense, zero-based entity handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub usize);

impl EntityId {
    /// The slot this entity occupies in dense storage.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! define_name_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(name: impl Into<String>) -> Self {
                $name(name.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                $name(name.to_string())
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                $name(name)
            }
        }

        impl From<&$name> for $name {
            fn from(id: &$name) -> Self {
                id.clone()
            }
        }
    };
}

define_name_id!(
    /// Names a property definition and the store that holds its values.
    PropertyId
);

define_name_id!(
    /// Names a module for dependency-ordered initialization.
    ModuleId
);
