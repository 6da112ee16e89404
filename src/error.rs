//! Provides `KernelError`, the typed faults returned by the kernel and its modules.
//!
//! Faults fall into three families (see [`FaultKind`]):
//! * configuration faults abort startup before any module runs;
//! * validation faults reject a single operation before any state changes;
//! * I/O faults come from loading configuration or writing snapshots.
//!
//! Fatal logic faults (scheduling into the past, reading a property that has neither a value nor
//! a default, runaway event recursion) are not represented here. They indicate a bug and panic.
use crate::dependency::{CycleReport, MissingDependency};
use crate::ids::{EntityId, ModuleId, PropertyId};
use crate::property_store::ValueKind;
use std::fmt::{self, Debug, Display};
use std::io;

/// The family a [`KernelError`] belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaultKind {
    Configuration,
    Validation,
    Io,
}

#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub enum KernelError {
    IoError(io::Error),
    JsonError(serde_json::Error),

    // Configuration faults
    /// Every dependency that names no registered module.
    MissingModuleDependency(Vec<MissingDependency>),
    CircularModuleDependency(CycleReport),
    DuplicateModule(ModuleId),
    DuplicateProperty(PropertyId),
    /// A mutation event was raised that no module handles.
    UnhandledMutation(&'static str),
    DuplicateGlobalProperty(String),

    // Validation faults
    UnknownEntity(EntityId),
    UnknownProperty(PropertyId),
    IncompatibleValue {
        property: PropertyId,
        expected: ValueKind,
        found: ValueKind,
    },
    InvalidEnumOrdinal {
        property: PropertyId,
        ordinal: u16,
        variant_count: usize,
    },
    ImmutableProperty(PropertyId),
    /// A property without a default was defined without values for these live entities.
    IncompleteInitialization {
        property: PropertyId,
        missing: Vec<EntityId>,
    },
    /// An entity was added without a value for a property that has no default.
    MissingInitialValue(PropertyId),
    TimeOutOfRange {
        time: f64,
        current_time: f64,
    },
    /// A property was mutated from within a handler observing a change to that same property.
    ReentrantPropertyMutation(PropertyId),
    UntrackedPropertyTime(PropertyId),
}

impl KernelError {
    #[must_use]
    pub fn kind(&self) -> FaultKind {
        match self {
            KernelError::IoError(_) | KernelError::JsonError(_) => FaultKind::Io,
            KernelError::MissingModuleDependency(_)
            | KernelError::CircularModuleDependency(_)
            | KernelError::DuplicateModule(_)
            | KernelError::DuplicateProperty(_)
            | KernelError::UnhandledMutation(_)
            | KernelError::DuplicateGlobalProperty(_) => FaultKind::Configuration,
            KernelError::UnknownEntity(_)
            | KernelError::UnknownProperty(_)
            | KernelError::IncompatibleValue { .. }
            | KernelError::InvalidEnumOrdinal { .. }
            | KernelError::ImmutableProperty(_)
            | KernelError::IncompleteInitialization { .. }
            | KernelError::MissingInitialValue(_)
            | KernelError::TimeOutOfRange { .. }
            | KernelError::ReentrantPropertyMutation(_)
            | KernelError::UntrackedPropertyTime(_) => FaultKind::Validation,
        }
    }
}

impl From<io::Error> for KernelError {
    fn from(error: io::Error) -> Self {
        KernelError::IoError(error)
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(error: serde_json::Error) -> Self {
        KernelError::JsonError(error)
    }
}

impl std::error::Error for KernelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KernelError::IoError(e) => Some(e),
            KernelError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

fn write_ids<T: Display>(f: &mut fmt::Formatter, ids: &[T]) -> fmt::Result {
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{id}")?;
    }
    Ok(())
}

impl Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KernelError::IoError(e) => write!(f, "I/O error: {e}"),
            KernelError::JsonError(e) => write!(f, "JSON error: {e}"),
            KernelError::MissingModuleDependency(missing) => {
                for (i, dependency) in missing.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{dependency}")?;
                }
                Ok(())
            }
            KernelError::CircularModuleDependency(report) => write!(f, "{report}"),
            KernelError::DuplicateModule(id) => write!(f, "module {id} is registered twice"),
            KernelError::DuplicateProperty(id) => write!(f, "property {id} is already defined"),
            KernelError::UnhandledMutation(event) => {
                write!(f, "no module handles mutation event {event}")
            }
            KernelError::DuplicateGlobalProperty(name) => {
                write!(f, "global property {name} already has a value")
            }
            KernelError::UnknownEntity(id) => write!(f, "entity {id} does not exist"),
            KernelError::UnknownProperty(id) => write!(f, "property {id} is not defined"),
            KernelError::IncompatibleValue {
                property,
                expected,
                found,
            } => write!(
                f,
                "property {property} holds {expected} values but was given a {found} value"
            ),
            KernelError::InvalidEnumOrdinal {
                property,
                ordinal,
                variant_count,
            } => write!(
                f,
                "enum ordinal {ordinal} is out of range for property {property} with {variant_count} variants"
            ),
            KernelError::ImmutableProperty(id) => write!(f, "property {id} is immutable"),
            KernelError::IncompleteInitialization { property, missing } => {
                write!(
                    f,
                    "property {property} has no default and no value for entities "
                )?;
                write_ids(f, missing)
            }
            KernelError::MissingInitialValue(id) => write!(
                f,
                "property {id} has no default and requires an initial value"
            ),
            KernelError::TimeOutOfRange { time, current_time } => write!(
                f,
                "time {time} is out of range at current simulation time {current_time}"
            ),
            KernelError::ReentrantPropertyMutation(id) => write!(
                f,
                "property {id} was mutated while a change to it was being observed"
            ),
            KernelError::UntrackedPropertyTime(id) => {
                write!(f, "assignment times are not tracked for property {id}")
            }
        }
    }
}
