pub use crate::context::{Context, ExecutionPhase};
pub use crate::error::{FaultKind, KernelError};
pub use crate::event::{MutationEvent, ObservationEvent};
pub use crate::global_properties::ContextGlobalPropertiesExt;
pub use crate::ids::{EntityId, ModuleId, PropertyId};
pub use crate::log::{debug, error, info, trace, warn};
pub use crate::module::ModuleDeclaration;
pub use crate::population::{
    population_module, ContextPopulationExt, EntityAdditionEvent, EntityRemovalEvent,
};
pub use crate::properties::{properties_module, ContextPropertiesExt, PropertyChangeEvent};
pub use crate::property_store::{EnumType, PropertyDefinition, PropertyValue, ValueType};
pub use crate::snapshot::ContextSnapshotExt;
pub use crate::{define_data_plugin, define_global_property};
