//! The population module issues entity ids and tracks which entities are alive.
//!
//! Entity ids are dense, start at zero and are never reused: removing an entity leaves a hole in
//! the id space. Every change to the population goes through a mutation event so that other
//! modules can veto it in the validation phase:
//!
//! * [`AddEntityMutation`] carries the new entity's initial property values. When it executes the
//!   module raises [`EntityImminentAdditionEvent`], so that property-owning modules can store
//!   those values, and then [`EntityAdditionEvent`].
//! * [`RemoveEntityMutation`] raises [`EntityRemovalEvent`] once the entity is gone.
//!
//! [`ContextPopulationExt::expand_capacity`] announces bulk growth ahead of time with a
//! [`CapacityExpansionEvent`], letting storage reserve room in one step.
use crate::context::Context;
use crate::define_data_plugin;
use crate::error::KernelError;
use crate::event::{MutationEvent, ObservationEvent};
use crate::ids::{EntityId, PropertyId};
use crate::module::ModuleDeclaration;
use crate::property_store::{BitColumn, PropertyValue};
use crate::snapshot::ContextSnapshotExt;
use log::{debug, trace};
use serde_json::json;

pub const POPULATION_MODULE: &str = "population";

/// Request to add the entity with the next unissued id.
#[derive(Clone, Debug)]
pub struct AddEntityMutation {
    pub entity_id: EntityId,
    pub initial_values: Vec<(PropertyId, PropertyValue)>,
}
impl MutationEvent for AddEntityMutation {}

#[derive(Copy, Clone, Debug)]
pub struct RemoveEntityMutation {
    pub entity_id: EntityId,
}
impl MutationEvent for RemoveEntityMutation {}

/// The entity is now live but its initial values have not been stored yet.
#[derive(Clone, Debug)]
pub struct EntityImminentAdditionEvent {
    pub entity_id: EntityId,
    pub initial_values: Vec<(PropertyId, PropertyValue)>,
}
impl ObservationEvent for EntityImminentAdditionEvent {}

/// The entity and its initial values are in place.
#[derive(Copy, Clone, Debug)]
pub struct EntityAdditionEvent {
    pub entity_id: EntityId,
}
impl ObservationEvent for EntityAdditionEvent {}

#[derive(Copy, Clone, Debug)]
pub struct EntityRemovalEvent {
    pub entity_id: EntityId,
}
impl ObservationEvent for EntityRemovalEvent {}

/// Entity storage should make room for ids `0..capacity`.
#[derive(Copy, Clone, Debug)]
pub struct CapacityExpansionEvent {
    pub capacity: usize,
}
impl ObservationEvent for CapacityExpansionEvent {}

struct PopulationData {
    live: BitColumn,
    population: usize,
    next_entity_id: usize,
    capacity: usize,
}

define_data_plugin!(
    PopulationPlugin,
    PopulationData,
    PopulationData {
        live: BitColumn::new(false),
        population: 0,
        next_entity_id: 0,
        capacity: 0,
    }
);

pub trait ContextPopulationExt {
    /// Adds an entity with the given initial property values and returns its id.
    ///
    /// # Errors
    /// Any fault raised while validating the addition, e.g. an initial value of the wrong type or
    /// a missing value for a property without a default.
    fn add_entity(
        &mut self,
        initial_values: Vec<(PropertyId, PropertyValue)>,
    ) -> Result<EntityId, KernelError>;

    /// # Errors
    /// `UnknownEntity` if the entity is not live.
    fn remove_entity(&mut self, entity_id: EntityId) -> Result<(), KernelError>;

    /// Reserves storage for `count` more entities.
    fn expand_capacity(&mut self, count: usize);

    fn entity_exists(&self, entity_id: EntityId) -> bool;

    /// The number of live entities.
    fn get_population(&self) -> usize;

    /// One more than the highest id issued so far.
    fn get_entity_id_limit(&self) -> usize;

    /// The number of entity slots reserved so far.
    fn get_entity_capacity(&self) -> usize;

    /// Live entity ids in increasing order.
    fn get_entity_ids(&self) -> Vec<EntityId>;
}

impl ContextPopulationExt for Context {
    fn add_entity(
        &mut self,
        initial_values: Vec<(PropertyId, PropertyValue)>,
    ) -> Result<EntityId, KernelError> {
        let entity_id = EntityId(self.get_entity_id_limit());
        self.raise_mutation(AddEntityMutation {
            entity_id,
            initial_values,
        })?;
        Ok(entity_id)
    }

    fn remove_entity(&mut self, entity_id: EntityId) -> Result<(), KernelError> {
        self.raise_mutation(RemoveEntityMutation { entity_id })
    }

    fn expand_capacity(&mut self, count: usize) {
        let data = self.get_data_container_mut::<PopulationPlugin>();
        let capacity = data.next_entity_id + count;
        if capacity <= data.capacity {
            return;
        }
        data.capacity = capacity;
        data.live.expand_capacity(capacity);
        debug!("expanding entity capacity to {capacity}");
        self.raise_observation(CapacityExpansionEvent { capacity });
    }

    fn entity_exists(&self, entity_id: EntityId) -> bool {
        self.get_data_container::<PopulationPlugin>()
            .is_some_and(|data| data.live.get(entity_id.index()).unwrap_or(false))
    }

    fn get_population(&self) -> usize {
        self.get_data_container::<PopulationPlugin>()
            .map_or(0, |data| data.population)
    }

    fn get_entity_id_limit(&self) -> usize {
        self.get_data_container::<PopulationPlugin>()
            .map_or(0, |data| data.next_entity_id)
    }

    fn get_entity_capacity(&self) -> usize {
        self.get_data_container::<PopulationPlugin>()
            .map_or(0, |data| data.capacity)
    }

    fn get_entity_ids(&self) -> Vec<EntityId> {
        let Some(data) = self.get_data_container::<PopulationPlugin>() else {
            return Vec::new();
        };
        (0..data.next_entity_id)
            .filter(|&index| data.live.get(index).unwrap_or(false))
            .map(EntityId)
            .collect()
    }
}

fn validate_addition(context: &Context, event: &AddEntityMutation) -> Result<(), KernelError> {
    // Ids are issued in order
    if event.entity_id.index() != context.get_entity_id_limit() {
        return Err(KernelError::UnknownEntity(event.entity_id));
    }
    Ok(())
}

fn execute_addition(context: &mut Context, event: &AddEntityMutation) -> Result<(), KernelError> {
    let entity_id = event.entity_id;
    let data = context.get_data_container_mut::<PopulationPlugin>();
    data.live.set(entity_id.index(), true);
    data.next_entity_id += 1;
    data.population += 1;
    data.capacity = data.capacity.max(data.next_entity_id);
    trace!("added entity {entity_id}");

    context.raise_observation(EntityImminentAdditionEvent {
        entity_id,
        initial_values: event.initial_values.clone(),
    });
    context.raise_observation(EntityAdditionEvent { entity_id });
    Ok(())
}

fn execute_removal(context: &mut Context, event: &RemoveEntityMutation) -> Result<(), KernelError> {
    let entity_id = event.entity_id;
    let data = context.get_data_container_mut::<PopulationPlugin>();
    data.live.set(entity_id.index(), false);
    data.population -= 1;
    trace!("removed entity {entity_id}");

    context.raise_observation(EntityRemovalEvent { entity_id });
    Ok(())
}

fn snapshot_population(context: &Context) -> Result<serde_json::Value, KernelError> {
    Ok(json!({
        "entity_id_limit": context.get_entity_id_limit(),
        "live": context.get_entity_ids(),
    }))
}

fn init(context: &mut Context) -> Result<(), KernelError> {
    context.subscribe_to_validation(validate_addition);
    context.subscribe_to_execution(execute_addition);
    context.subscribe_to_validation(|context, event: &RemoveEntityMutation| {
        if context.entity_exists(event.entity_id) {
            Ok(())
        } else {
            Err(KernelError::UnknownEntity(event.entity_id))
        }
    });
    context.subscribe_to_execution(execute_removal);
    context.register_snapshot_provider(POPULATION_MODULE, snapshot_population)
}

/// Declares the population module.
#[must_use]
pub fn population_module() -> ModuleDeclaration {
    ModuleDeclaration::new(POPULATION_MODULE, init)
}
