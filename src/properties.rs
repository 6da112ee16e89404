//! The property module owns one [`PropertyStore`] per property id and exposes per-entity property
//! values to the rest of the simulation.
//!
//! Every change goes through a mutation event, so the validation phase can reject it before any
//! store is touched:
//!
//! * [`DefinePropertyMutation`] creates a store, optionally seeding values for existing entities.
//!   A property without a default must receive a value for every live entity.
//! * [`SetPropertyValueMutation`] writes one entity's value and then raises a
//!   [`PropertyChangeEvent`].
//!
//! The module also keeps its stores in step with the population: initial values carried by
//! [`EntityImminentAdditionEvent`] are stored, removed entities are cleared, and capacity
//! expansions are applied to every store.
//!
//! ```
//! use nucleus::prelude::*;
//!
//! let mut context = Context::new();
//! context.register_module(population_module()).unwrap();
//! context.register_module(properties_module()).unwrap();
//! context.init_modules().unwrap();
//!
//! let age = PropertyId::from("Age");
//! context
//!     .define_property(
//!         age.clone(),
//!         PropertyDefinition::new(ValueType::Int).with_default(0),
//!         0.0,
//!         Vec::new(),
//!     )
//!     .unwrap();
//! let person = context.add_entity(vec![(age.clone(), 40.into())]).unwrap();
//! assert_eq!(context.get_value(person, &age).unwrap(), PropertyValue::Int(40));
//! ```
use crate::context::Context;
use crate::define_data_plugin;
use crate::error::KernelError;
use crate::event::{MutationEvent, ObservationEvent};
use crate::hashing::{HashSet, HashSetExt};
use crate::ids::{EntityId, PropertyId};
use crate::module::ModuleDeclaration;
use crate::population::{
    CapacityExpansionEvent, ContextPopulationExt, EntityImminentAdditionEvent, EntityRemovalEvent,
    AddEntityMutation, POPULATION_MODULE,
};
use crate::property_store::{
    check_completeness, validate_value, PropertyDefinition, PropertyStore, PropertyValue,
};
use crate::snapshot::ContextSnapshotExt;
use indexmap::IndexMap;
use log::{debug, trace};
use serde_derive::Serialize;

pub const PROPERTIES_MODULE: &str = "properties";

/// Request to create a property store.
#[derive(Clone, Debug)]
pub struct DefinePropertyMutation {
    pub property_id: PropertyId,
    pub definition: PropertyDefinition,
    pub definition_time: f64,
    pub initial_values: Vec<(EntityId, PropertyValue)>,
}
impl MutationEvent for DefinePropertyMutation {}

#[derive(Clone, Debug)]
pub struct SetPropertyValueMutation {
    pub entity_id: EntityId,
    pub property_id: PropertyId,
    pub value: PropertyValue,
}
impl MutationEvent for SetPropertyValueMutation {}

#[derive(Clone, Debug)]
pub struct PropertyDefinitionEvent {
    pub property_id: PropertyId,
}
impl ObservationEvent for PropertyDefinitionEvent {}

/// An entity's property value was set. `previous` is `None` if the entity had no value and the
/// property has no default.
#[derive(Clone, Debug)]
pub struct PropertyChangeEvent {
    pub entity_id: EntityId,
    pub property_id: PropertyId,
    pub previous: Option<PropertyValue>,
    pub current: PropertyValue,
}
impl ObservationEvent for PropertyChangeEvent {}

#[derive(Default)]
struct PropertiesData {
    stores: IndexMap<PropertyId, PropertyStore>,
    /// Properties whose change events are being delivered, innermost last.
    observing: Vec<PropertyId>,
}

define_data_plugin!(PropertiesPlugin, PropertiesData, PropertiesData::default());

pub trait ContextPropertiesExt {
    /// Defines a property, seeding values for existing entities.
    ///
    /// Time-tracked properties record `definition_time` as the assignment time of the seeded
    /// values and of every entity that is never assigned explicitly.
    ///
    /// # Errors
    /// * `DuplicateProperty` if the id is taken
    /// * `IncompatibleValue` or `InvalidEnumOrdinal` for a mistyped default or initial value
    /// * `TimeOutOfRange` if `definition_time` is later than the current time or not finite
    /// * `UnknownEntity` for an initial value of an entity that is not live
    /// * `IncompleteInitialization` if the property has no default and some live entity has no
    ///   initial value
    fn define_property(
        &mut self,
        property_id: PropertyId,
        definition: PropertyDefinition,
        definition_time: f64,
        initial_values: Vec<(EntityId, PropertyValue)>,
    ) -> Result<(), KernelError>;

    /// Sets an entity's property value, recording the current time if the property is tracked.
    ///
    /// # Errors
    /// * `UnknownProperty`, `UnknownEntity`
    /// * `ImmutableProperty` if the property is not mutable
    /// * `IncompatibleValue` or `InvalidEnumOrdinal` for a mistyped value
    /// * `ReentrantPropertyMutation` if called while a change to the same property is being
    ///   observed
    fn set_value(
        &mut self,
        entity_id: EntityId,
        property_id: &PropertyId,
        value: impl Into<PropertyValue>,
    ) -> Result<(), KernelError>;

    /// Returns the entity's value, or the property's default if it was never set.
    ///
    /// # Errors
    /// `UnknownProperty` or `UnknownEntity`.
    fn get_value(
        &self,
        entity_id: EntityId,
        property_id: &PropertyId,
    ) -> Result<PropertyValue, KernelError>;

    /// Returns the time the entity's value was last set, or the definition time.
    ///
    /// # Errors
    /// `UnknownProperty`, `UnknownEntity`, or `UntrackedPropertyTime` if the property does not
    /// track assignment times.
    fn get_assignment_time(
        &self,
        entity_id: EntityId,
        property_id: &PropertyId,
    ) -> Result<f64, KernelError>;

    fn property_exists(&self, property_id: &PropertyId) -> bool;

    /// Property ids in definition order.
    fn get_property_ids(&self) -> Vec<PropertyId>;

    /// # Errors
    /// `UnknownProperty`.
    fn get_property_definition(
        &self,
        property_id: &PropertyId,
    ) -> Result<&PropertyDefinition, KernelError>;

    /// # Errors
    /// `UnknownProperty`.
    fn get_definition_time(&self, property_id: &PropertyId) -> Result<f64, KernelError>;

    /// Direct read access to a property's store.
    fn get_property_store(&self, property_id: &PropertyId) -> Option<&PropertyStore>;
}

impl ContextPropertiesExt for Context {
    fn define_property(
        &mut self,
        property_id: PropertyId,
        definition: PropertyDefinition,
        definition_time: f64,
        initial_values: Vec<(EntityId, PropertyValue)>,
    ) -> Result<(), KernelError> {
        self.raise_mutation(DefinePropertyMutation {
            property_id,
            definition,
            definition_time,
            initial_values,
        })
    }

    fn set_value(
        &mut self,
        entity_id: EntityId,
        property_id: &PropertyId,
        value: impl Into<PropertyValue>,
    ) -> Result<(), KernelError> {
        self.raise_mutation(SetPropertyValueMutation {
            entity_id,
            property_id: property_id.clone(),
            value: value.into(),
        })
    }

    fn get_value(
        &self,
        entity_id: EntityId,
        property_id: &PropertyId,
    ) -> Result<PropertyValue, KernelError> {
        let store = get_store(self, property_id)?;
        check_entity(self, entity_id)?;
        Ok(store.get(entity_id))
    }

    fn get_assignment_time(
        &self,
        entity_id: EntityId,
        property_id: &PropertyId,
    ) -> Result<f64, KernelError> {
        let store = get_store(self, property_id)?;
        check_entity(self, entity_id)?;
        if !store.is_time_tracked() {
            return Err(KernelError::UntrackedPropertyTime(property_id.clone()));
        }
        Ok(store.get_assignment_time(entity_id))
    }

    fn property_exists(&self, property_id: &PropertyId) -> bool {
        self.get_property_store(property_id).is_some()
    }

    fn get_property_ids(&self) -> Vec<PropertyId> {
        self.get_data_container::<PropertiesPlugin>()
            .map(|data| data.stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn get_property_definition(
        &self,
        property_id: &PropertyId,
    ) -> Result<&PropertyDefinition, KernelError> {
        get_store(self, property_id).map(PropertyStore::definition)
    }

    fn get_definition_time(&self, property_id: &PropertyId) -> Result<f64, KernelError> {
        get_store(self, property_id).map(PropertyStore::definition_time)
    }

    fn get_property_store(&self, property_id: &PropertyId) -> Option<&PropertyStore> {
        self.get_data_container::<PropertiesPlugin>()
            .and_then(|data| data.stores.get(property_id))
    }
}

fn get_store<'a>(
    context: &'a Context,
    property_id: &PropertyId,
) -> Result<&'a PropertyStore, KernelError> {
    context
        .get_property_store(property_id)
        .ok_or_else(|| KernelError::UnknownProperty(property_id.clone()))
}

fn check_entity(context: &Context, entity_id: EntityId) -> Result<(), KernelError> {
    if context.entity_exists(entity_id) {
        Ok(())
    } else {
        Err(KernelError::UnknownEntity(entity_id))
    }
}

fn stores_mut(context: &mut Context) -> &mut IndexMap<PropertyId, PropertyStore> {
    &mut context.get_data_container_mut::<PropertiesPlugin>().stores
}

fn validate_definition(
    context: &Context,
    event: &DefinePropertyMutation,
) -> Result<(), KernelError> {
    let property_id = &event.property_id;
    if context.property_exists(property_id) {
        return Err(KernelError::DuplicateProperty(property_id.clone()));
    }
    let definition = &event.definition;
    if let Some(default_value) = &definition.default_value {
        validate_value(property_id, &definition.value_type, default_value)?;
    }
    let current_time = context.get_current_time();
    if !event.definition_time.is_finite() || event.definition_time > current_time {
        return Err(KernelError::TimeOutOfRange {
            time: event.definition_time,
            current_time,
        });
    }

    let mut supplied = HashSet::with_capacity(event.initial_values.len());
    for (entity_id, value) in &event.initial_values {
        check_entity(context, *entity_id)?;
        validate_value(property_id, &definition.value_type, value)?;
        supplied.insert(*entity_id);
    }
    if definition.default_value.is_none() {
        check_completeness(property_id, context.get_entity_ids(), &supplied)?;
    }
    Ok(())
}

fn execute_definition(
    context: &mut Context,
    event: &DefinePropertyMutation,
) -> Result<(), KernelError> {
    let mut store = PropertyStore::new(
        event.property_id.clone(),
        event.definition.clone(),
        event.definition_time,
    );
    store.expand_capacity(context.get_entity_capacity());
    for (entity_id, value) in &event.initial_values {
        store.set(*entity_id, value.clone(), event.definition_time)?;
    }
    debug!(
        "defined property {} with {} initial values",
        event.property_id,
        event.initial_values.len()
    );
    stores_mut(context).insert(event.property_id.clone(), store);

    context.raise_observation(PropertyDefinitionEvent {
        property_id: event.property_id.clone(),
    });
    Ok(())
}

fn validate_set_value(
    context: &Context,
    event: &SetPropertyValueMutation,
) -> Result<(), KernelError> {
    let store = get_store(context, &event.property_id)?;
    check_entity(context, event.entity_id)?;
    if !store.definition().mutable {
        return Err(KernelError::ImmutableProperty(event.property_id.clone()));
    }
    store.validate(&event.value)?;
    let observing = context
        .get_data_container::<PropertiesPlugin>()
        .is_some_and(|data| data.observing.contains(&event.property_id));
    if observing {
        return Err(KernelError::ReentrantPropertyMutation(
            event.property_id.clone(),
        ));
    }
    Ok(())
}

fn execute_set_value(
    context: &mut Context,
    event: &SetPropertyValueMutation,
) -> Result<(), KernelError> {
    let time = context.get_current_time();
    let store = stores_mut(context)
        .get_mut(&event.property_id)
        .ok_or_else(|| KernelError::UnknownProperty(event.property_id.clone()))?;
    let previous = store.set(event.entity_id, event.value.clone(), time)?;
    trace!(
        "set property {} of entity {} at time {time}",
        event.property_id,
        event.entity_id
    );

    if context.has_subscribers::<PropertyChangeEvent>() {
        let data = context.get_data_container_mut::<PropertiesPlugin>();
        data.observing.push(event.property_id.clone());
        context.raise_observation(PropertyChangeEvent {
            entity_id: event.entity_id,
            property_id: event.property_id.clone(),
            previous,
            current: event.value.clone(),
        });
        context.get_data_container_mut::<PropertiesPlugin>().observing.pop();
    }
    Ok(())
}

/// Initial values must name defined properties, carry the right types, and cover every property
/// without a default.
fn validate_addition(context: &Context, event: &AddEntityMutation) -> Result<(), KernelError> {
    for (property_id, value) in &event.initial_values {
        get_store(context, property_id)?.validate(value)?;
    }
    let Some(data) = context.get_data_container::<PropertiesPlugin>() else {
        return Ok(());
    };
    for (property_id, store) in &data.stores {
        if store.definition().default_value.is_none()
            && !event.initial_values.iter().any(|(id, _)| id == property_id)
        {
            return Err(KernelError::MissingInitialValue(property_id.clone()));
        }
    }
    Ok(())
}

fn store_initial_values(context: &mut Context, event: &EntityImminentAdditionEvent) {
    let time = context.get_current_time();
    let stores = stores_mut(context);
    for (property_id, value) in &event.initial_values {
        let Some(store) = stores.get_mut(property_id) else {
            panic!("initial value for undefined property {property_id} was not rejected");
        };
        if let Err(error) = store.set(event.entity_id, value.clone(), time) {
            panic!("initial value was not rejected during validation: {error}");
        }
    }
}

fn clear_removed_entity(context: &mut Context, event: &EntityRemovalEvent) {
    for store in stores_mut(context).values_mut() {
        store.remove(event.entity_id);
    }
}

fn expand_stores(context: &mut Context, event: &CapacityExpansionEvent) {
    for store in stores_mut(context).values_mut() {
        store.expand_capacity(event.capacity);
    }
}

#[derive(Serialize)]
struct PropertySnapshot<'a> {
    definition: &'a PropertyDefinition,
    definition_time: f64,
    track_time: bool,
    /// Live entities whose value differs from the default
    values: Vec<(EntityId, PropertyValue)>,
    /// Live entities whose assignment time differs from the definition time
    times: Vec<(EntityId, f64)>,
}

#[allow(clippy::float_cmp)]
fn snapshot_properties(context: &Context) -> Result<serde_json::Value, KernelError> {
    let Some(data) = context.get_data_container::<PropertiesPlugin>() else {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    };
    let live = context.get_entity_ids();
    let mut properties = IndexMap::with_capacity(data.stores.len());
    for (property_id, store) in &data.stores {
        let default_value = store.definition().default_value.as_ref();
        let values = live
            .iter()
            .filter_map(|&entity_id| {
                store
                    .try_get(entity_id)
                    .filter(|value| Some(value) != default_value)
                    .map(|value| (entity_id, value))
            })
            .collect();
        let times = if store.is_time_tracked() {
            live.iter()
                .map(|&entity_id| (entity_id, store.get_assignment_time(entity_id)))
                .filter(|(_, time)| *time != store.definition_time())
                .collect()
        } else {
            Vec::new()
        };
        properties.insert(
            property_id,
            PropertySnapshot {
                definition: store.definition(),
                definition_time: store.definition_time(),
                track_time: store.is_time_tracked(),
                values,
                times,
            },
        );
    }
    Ok(serde_json::to_value(properties)?)
}

fn init(context: &mut Context) -> Result<(), KernelError> {
    context.subscribe_to_validation(validate_definition);
    context.subscribe_to_execution(execute_definition);
    context.subscribe_to_validation(validate_set_value);
    context.subscribe_to_execution(execute_set_value);
    context.subscribe_to_validation(validate_addition);
    context.subscribe_to_event(store_initial_values);
    context.subscribe_to_event(clear_removed_entity);
    context.subscribe_to_event(expand_stores);
    context.register_snapshot_provider(PROPERTIES_MODULE, snapshot_properties)
}

/// Declares the property module, which depends on the population module.
#[must_use]
pub fn properties_module() -> ModuleDeclaration {
    ModuleDeclaration::new(PROPERTIES_MODULE, init).depends_on(POPULATION_MODULE)
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::error::FaultKind;
    use crate::ids::ModuleId;
    use crate::population::population_module;
    use crate::property_store::{EnumType, ValueType};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn property_context() -> Context {
        let mut context = Context::new();
        context.register_module(properties_module()).unwrap();
        context.register_module(population_module()).unwrap();
        context.init_modules().unwrap();
        context
    }

    fn add_entities(context: &mut Context, count: usize) -> Vec<EntityId> {
        (0..count)
            .map(|_| context.add_entity(Vec::new()).unwrap())
            .collect()
    }

    fn int_with_default(default: i64) -> PropertyDefinition {
        PropertyDefinition::new(ValueType::Int).with_default(default)
    }

    #[test]
    fn property_module_requires_population() {
        let mut context = Context::new();
        context.register_module(properties_module()).unwrap();
        assert!(matches!(
            context.init_modules(),
            Err(KernelError::MissingModuleDependency(missing))
                if missing.len() == 1 && missing[0].missing.as_str() == POPULATION_MODULE
        ));
    }

    #[test]
    fn unset_value_is_default() {
        let mut context = property_context();
        let entities = add_entities(&mut context, 3);
        let p = PropertyId::from("P");
        context
            .define_property(p.clone(), int_with_default(7), 0.0, Vec::new())
            .unwrap();
        context.set_value(entities[1], &p, 9).unwrap();
        assert_eq!(context.get_value(entities[0], &p).unwrap(), PropertyValue::Int(7));
        assert_eq!(context.get_value(entities[1], &p).unwrap(), PropertyValue::Int(9));
    }

    #[test]
    fn every_value_kind_round_trips() {
        let mut context = property_context();
        let entity = add_entities(&mut context, 1)[0];
        let color = EnumType::new("Color", ["red", "green", "blue"]);
        let cases = vec![
            ("B", ValueType::Boolean, PropertyValue::Boolean(false), PropertyValue::Boolean(true)),
            ("I", ValueType::Int, PropertyValue::Int(0), PropertyValue::Int(-70_000)),
            ("F", ValueType::Float, PropertyValue::Float(0.0), PropertyValue::Float(1.5)),
            ("D", ValueType::Double, PropertyValue::Double(0.0), PropertyValue::Double(2.25)),
            (
                "E",
                ValueType::Enum(color.clone()),
                color.value("red").unwrap(),
                color.value("blue").unwrap(),
            ),
            (
                "O",
                ValueType::Object,
                PropertyValue::Object(json!(null)),
                PropertyValue::Object(json!({"household": 12})),
            ),
        ];
        for (name, value_type, default, value) in cases {
            let p = PropertyId::from(name);
            context
                .define_property(
                    p.clone(),
                    PropertyDefinition::new(value_type).with_default(default.clone()),
                    0.0,
                    Vec::new(),
                )
                .unwrap();
            assert_eq!(context.get_value(entity, &p).unwrap(), default);
            context.set_value(entity, &p, value.clone()).unwrap();
            assert_eq!(context.get_value(entity, &p).unwrap(), value);
        }
    }

    #[test]
    fn immutable_property_is_unchanged_after_rejection() {
        let mut context = property_context();
        let entity = add_entities(&mut context, 1)[0];
        let p = PropertyId::from("BirthYear");
        context
            .define_property(
                p.clone(),
                int_with_default(1990).immutable(),
                0.0,
                vec![(entity, PropertyValue::Int(1985))],
            )
            .unwrap();
        let changes = Rc::new(RefCell::new(0));
        let counted = Rc::clone(&changes);
        context.subscribe_to_event(move |_, _: &PropertyChangeEvent| {
            *counted.borrow_mut() += 1;
        });

        assert!(matches!(
            context.set_value(entity, &p, 2000),
            Err(KernelError::ImmutableProperty(id)) if id == p
        ));
        assert_eq!(context.get_value(entity, &p).unwrap(), PropertyValue::Int(1985));
        assert_eq!(*changes.borrow(), 0);
    }

    #[test]
    fn mistyped_value_is_rejected() {
        let mut context = property_context();
        let entity = add_entities(&mut context, 1)[0];
        let p = PropertyId::from("P");
        context
            .define_property(p.clone(), int_with_default(0), 0.0, Vec::new())
            .unwrap();
        let error = context.set_value(entity, &p, 1.5).unwrap_err();
        assert_eq!(error.kind(), FaultKind::Validation);
        assert!(matches!(error, KernelError::IncompatibleValue { .. }));
        assert_eq!(context.get_value(entity, &p).unwrap(), PropertyValue::Int(0));
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let mut context = property_context();
        let entity = add_entities(&mut context, 1)[0];
        let p = PropertyId::from("P");
        let missing = PropertyId::from("Missing");
        context
            .define_property(p.clone(), int_with_default(0), 0.0, Vec::new())
            .unwrap();
        assert!(matches!(
            context.set_value(entity, &missing, 1),
            Err(KernelError::UnknownProperty(_))
        ));
        assert!(matches!(
            context.set_value(EntityId(9), &p, 1),
            Err(KernelError::UnknownEntity(_))
        ));
        assert!(matches!(
            context.get_value(EntityId(9), &p),
            Err(KernelError::UnknownEntity(_))
        ));
        assert!(matches!(
            context.get_value(entity, &missing),
            Err(KernelError::UnknownProperty(_))
        ));
    }

    #[test]
    fn definition_without_default_must_cover_population() {
        let mut context = property_context();
        let entities = add_entities(&mut context, 3);
        let p = PropertyId::from("Age");

        let partial = vec![
            (entities[0], PropertyValue::Int(30)),
            (entities[2], PropertyValue::Int(50)),
        ];
        match context.define_property(
            p.clone(),
            PropertyDefinition::new(ValueType::Int),
            0.0,
            partial,
        ) {
            Err(KernelError::IncompleteInitialization { property, missing }) => {
                assert_eq!(property, p);
                assert_eq!(missing, vec![entities[1]]);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(!context.property_exists(&p));

        let complete = entities
            .iter()
            .map(|&entity| (entity, PropertyValue::Int(20)))
            .collect();
        context
            .define_property(p.clone(), PropertyDefinition::new(ValueType::Int), 0.0, complete)
            .unwrap();
        assert_eq!(context.get_value(entities[1], &p).unwrap(), PropertyValue::Int(20));
    }

    #[test]
    fn added_entities_need_values_for_properties_without_default() {
        let mut context = property_context();
        let p = PropertyId::from("Age");
        context
            .define_property(p.clone(), PropertyDefinition::new(ValueType::Int), 0.0, Vec::new())
            .unwrap();
        assert!(matches!(
            context.add_entity(Vec::new()),
            Err(KernelError::MissingInitialValue(id)) if id == p
        ));
        assert_eq!(context.get_population(), 0);

        let entity = context.add_entity(vec![(p.clone(), 4.into())]).unwrap();
        assert_eq!(context.get_value(entity, &p).unwrap(), PropertyValue::Int(4));
    }

    #[test]
    fn added_entity_initial_values_are_validated() {
        let mut context = property_context();
        let p = PropertyId::from("P");
        context
            .define_property(p.clone(), int_with_default(0), 0.0, Vec::new())
            .unwrap();
        assert!(matches!(
            context.add_entity(vec![("Nope".into(), 1.into())]),
            Err(KernelError::UnknownProperty(_))
        ));
        assert!(matches!(
            context.add_entity(vec![(p.clone(), true.into())]),
            Err(KernelError::IncompatibleValue { .. })
        ));
        assert_eq!(context.get_entity_id_limit(), 0);
    }

    #[test]
    fn definition_faults() {
        let mut context = property_context();
        let p = PropertyId::from("P");
        context
            .define_property(p.clone(), int_with_default(0), 0.0, Vec::new())
            .unwrap();
        assert!(matches!(
            context.define_property(p.clone(), int_with_default(0), 0.0, Vec::new()),
            Err(KernelError::DuplicateProperty(_))
        ));
        assert!(matches!(
            context.define_property(
                "Q".into(),
                PropertyDefinition::new(ValueType::Int).with_default(true),
                0.0,
                Vec::new()
            ),
            Err(KernelError::IncompatibleValue { .. })
        ));
        assert!(matches!(
            context.define_property("R".into(), int_with_default(0), 1.0, Vec::new()),
            Err(KernelError::TimeOutOfRange { time, .. }) if time == 1.0
        ));
        assert!(matches!(
            context.define_property(
                "S".into(),
                int_with_default(0),
                0.0,
                vec![(EntityId(0), PropertyValue::Int(1))]
            ),
            Err(KernelError::UnknownEntity(_))
        ));
        assert_eq!(context.get_property_ids(), vec![p]);
    }

    #[test]
    fn assignment_times() {
        let mut context = property_context();
        let entities = add_entities(&mut context, 2);
        let tracked = PropertyId::from("Tracked");
        let untracked = PropertyId::from("Untracked");
        context
            .define_property(tracked.clone(), int_with_default(0).track_time(), 0.0, Vec::new())
            .unwrap();
        context
            .define_property(untracked.clone(), int_with_default(0), 0.0, Vec::new())
            .unwrap();

        context.add_plan(3.0, {
            let tracked = tracked.clone();
            let entity = entities[0];
            move |context| context.set_value(entity, &tracked, 1).unwrap()
        });
        context.execute();

        assert_eq!(context.get_assignment_time(entities[0], &tracked).unwrap(), 3.0);
        assert_eq!(context.get_assignment_time(entities[1], &tracked).unwrap(), 0.0);
        assert!(matches!(
            context.get_assignment_time(entities[0], &untracked),
            Err(KernelError::UntrackedPropertyTime(_))
        ));
    }

    #[test]
    fn change_events_carry_previous_value() {
        let mut context = property_context();
        let entity = add_entities(&mut context, 1)[0];
        let p = PropertyId::from("P");
        context
            .define_property(p.clone(), int_with_default(5), 0.0, Vec::new())
            .unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let recorder = Rc::clone(&seen);
        context.subscribe_to_event(move |_, event: &PropertyChangeEvent| {
            recorder
                .borrow_mut()
                .push((event.previous.clone(), event.current.clone()));
        });
        context.set_value(entity, &p, 6).unwrap();
        context.set_value(entity, &p, 7).unwrap();
        assert_eq!(
            *seen.borrow(),
            vec![
                (Some(PropertyValue::Int(5)), PropertyValue::Int(6)),
                (Some(PropertyValue::Int(6)), PropertyValue::Int(7)),
            ]
        );
    }

    #[test]
    fn observers_cannot_mutate_the_property_they_observe() {
        let mut context = property_context();
        let entity = add_entities(&mut context, 1)[0];
        let p = PropertyId::from("P");
        let q = PropertyId::from("Q");
        context
            .define_property(p.clone(), int_with_default(0), 0.0, Vec::new())
            .unwrap();
        context
            .define_property(q.clone(), int_with_default(0), 0.0, Vec::new())
            .unwrap();
        let results = Rc::new(RefCell::new(Vec::new()));
        let recorder = Rc::clone(&results);
        let (p_id, q_id) = (p.clone(), q.clone());
        context.subscribe_to_event(move |context, event: &PropertyChangeEvent| {
            if event.property_id == p_id {
                let same = context.set_value(event.entity_id, &p_id, 100);
                let other = context.set_value(event.entity_id, &q_id, 100);
                recorder.borrow_mut().push((same.is_err(), other.is_ok()));
            }
        });

        context.set_value(entity, &p, 1).unwrap();
        assert_eq!(*results.borrow(), vec![(true, true)]);
        assert_eq!(context.get_value(entity, &p).unwrap(), PropertyValue::Int(1));
        assert_eq!(context.get_value(entity, &q).unwrap(), PropertyValue::Int(100));
        // The guard is lifted once delivery ends
        context.set_value(entity, &p, 2).unwrap();
    }

    #[test]
    fn removed_entities_are_cleared() {
        let mut context = property_context();
        let p = PropertyId::from("P");
        context
            .define_property(p.clone(), int_with_default(0).track_time(), 0.0, Vec::new())
            .unwrap();
        let entity = context.add_entity(vec![(p.clone(), 3.into())]).unwrap();
        context.remove_entity(entity).unwrap();
        assert!(matches!(
            context.get_value(entity, &p),
            Err(KernelError::UnknownEntity(_))
        ));
        let store = context.get_property_store(&p).unwrap();
        assert_eq!(store.get(entity), PropertyValue::Int(0));
    }

    #[test]
    fn capacity_expansion_reaches_stores() {
        let mut context = property_context();
        let p = PropertyId::from("P");
        context
            .define_property(p.clone(), int_with_default(0), 0.0, Vec::new())
            .unwrap();
        context.expand_capacity(100);

        // Properties defined later start with the reserved capacity
        let q = PropertyId::from("Q");
        context
            .define_property(q.clone(), int_with_default(0), 0.0, Vec::new())
            .unwrap();

        let first = context.add_entity(vec![(p.clone(), 1.into()), (q.clone(), 1.into())]).unwrap();
        let p_allocations = context.get_property_store(&p).unwrap().allocation_count();
        let q_allocations = context.get_property_store(&q).unwrap().allocation_count();
        for _ in 1..100 {
            context
                .add_entity(vec![(p.clone(), 2.into()), (q.clone(), 2.into())])
                .unwrap();
        }
        assert_eq!(first, EntityId(0));
        assert_eq!(context.get_property_store(&p).unwrap().allocation_count(), p_allocations);
        assert_eq!(context.get_property_store(&q).unwrap().allocation_count(), q_allocations);
    }

    #[test]
    fn metadata_accessors() {
        let mut context = property_context();
        let p = PropertyId::from("P");
        let definition = int_with_default(0).track_time();
        context.add_plan(2.0, |_| {});
        context.execute();
        context
            .define_property(p.clone(), definition.clone(), 1.5, Vec::new())
            .unwrap();
        assert!(context.property_exists(&p));
        assert_eq!(context.get_property_definition(&p).unwrap(), &definition);
        assert_eq!(context.get_definition_time(&p).unwrap(), 1.5);
        assert!(matches!(
            context.get_definition_time(&"Q".into()),
            Err(KernelError::UnknownProperty(_))
        ));
    }

    #[test]
    fn snapshot_reports_non_default_state() {
        let mut context = property_context();
        let entities = add_entities(&mut context, 3);
        let p = PropertyId::from("P");
        context
            .define_property(p.clone(), int_with_default(0).track_time(), 0.0, Vec::new())
            .unwrap();
        context.add_plan(2.0, {
            let p = p.clone();
            let entity = entities[2];
            move |context| context.set_value(entity, &p, 8).unwrap()
        });
        context.execute();
        context.remove_entity(entities[0]).unwrap();

        let snapshot = context.snapshot().unwrap();
        assert_eq!(
            snapshot.modules[&ModuleId::from(PROPERTIES_MODULE)],
            json!({
                "P": {
                    "definition": {
                        "value_type": "int",
                        "default_value": {"int": 0},
                        "mutable": true,
                        "track_time": true
                    },
                    "definition_time": 0.0,
                    "track_time": true,
                    "values": [[2, {"int": 8}]],
                    "times": [[2, 2.0]]
                }
            })
        );
    }
}
