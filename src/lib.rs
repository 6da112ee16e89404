//! A kernel for building discrete-event simulations of entity populations
//!
//! Nucleus provides the core services a population model is assembled from.
//! The central object of a simulation is the [`Context`], which is
//! responsible for managing all the behavior of the simulation. All of the
//! simulation-specific logic is embedded in modules that rely on the `Context`
//! for core services such as:
//! * Maintaining a notion of time for the simulation
//! * Scheduling plans to occur at some point in the future and executing them
//!   at that time, in a deterministic order
//! * Resolving mutation events in two phases, so that any interested module
//!   can reject a change before any module applies it
//! * Initializing modules in dependency order
//! * Holding module-specific data so that the module and other modules can
//!   access it
//!
//! Two modules ship with the kernel. The [population module](population)
//! issues entity ids and announces additions and removals, and the
//! [property module](properties) keeps one typed, columnar
//! [`PropertyStore`](property_store::PropertyStore) per property.
//!
//! A simple disease transmission model built on the kernel might add:
//! * A population loader that adds the initial entities and their
//!   properties.
//! * An infection seeder that introduces the pathogen into the population.
//! * A disease progression manager that transitions infected entities through
//!   stages of disease until recovery.
//!
//! At the end of a run every module with state can be captured in a
//! [`StateSnapshot`].
pub mod context;
pub use context::{Context, ExecutionPhase};

pub mod data_plugin;
pub use data_plugin::DataPlugin;

pub mod dependency;
pub use dependency::{CycleComponent, CycleReport, MissingDependency};

pub mod error;
pub use error::{FaultKind, KernelError};

pub mod event;
pub use event::{MutationEvent, ObservationEvent};

pub mod execution_stats;
pub use execution_stats::ExecutionStatistics;

pub mod global_properties;
pub use global_properties::{ContextGlobalPropertiesExt, GlobalProperty};

pub mod hashing;
pub use hashing::{HashMap, HashMapExt, HashSet, HashSetExt};

pub mod ids;
pub use ids::{EntityId, ModuleId, PropertyId};

pub mod log;
pub use crate::log::{debug, error, info, trace, warn};

pub mod module;
pub use module::ModuleDeclaration;

pub mod plan;
pub use plan::PlanId;

pub mod population;
pub use population::{population_module, ContextPopulationExt};

pub mod properties;
pub use properties::{properties_module, ContextPropertiesExt};

pub mod property_store;

pub mod runner;
pub use runner::{run_with_args, run_with_custom_args, BaseArgs};

pub mod snapshot;
pub use snapshot::{ContextSnapshotExt, StateSnapshot};

pub mod prelude;

// Re-exports for use by macros
pub use serde;
pub use serde_json;
