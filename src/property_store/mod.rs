//! Typed, columnar storage for a single property across all entities.
//!
//! A [`PropertyStore`] holds the values of one property id, indexed by [`EntityId`]. Storage is
//! lazy: no value column exists until the first non-default value is written, and a column only
//! materializes slots up to the highest entity written so far. Reads of an unwritten slot return
//! the property's default.
//!
//! The concrete column (bit-packed booleans, width-adaptive integers, floats, doubles, enum
//! ordinals, opaque objects) is chosen once, when the column is created, from the property's
//! declared [`ValueType`]. Every variant exposes the same `get`/`set` contract.
//!
//! # Properties without a default
//!
//! If a property has no default value, every live entity must receive an explicit value before it
//! is read. The store tracks explicit assignment per slot, and [`check_completeness`] verifies at
//! definition time that a batch of initial values covers the whole live population. Reading an
//! unassigned slot of such a property is a bug in the calling module and panics.
//!
//! # Time tracking
//!
//! When a property is time-tracked, a parallel column records the simulation time of each
//! entity's most recent assignment, defaulting to the property's definition time. Asking an
//! untracked store for assignment times panics.
//!
//! # Capacity
//!
//! [`PropertyStore::expand_capacity`] reserves room for a number of entity slots up front so that
//! bulk population growth does not reallocate per insert. Columns that do not exist yet remember
//! the reservation and allocate it in one step when they are created.

mod column;
mod value;

pub(crate) use column::BitColumn;
use column::{Column, DenseColumn};
pub use value::{EnumType, PropertyValue, ValueKind, ValueType};

use crate::error::KernelError;
use crate::hashing::HashSet;
use crate::ids::{EntityId, PropertyId};
use serde::{Deserialize, Serialize};

/// The declared shape and policy of a property.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub value_type: ValueType,
    pub default_value: Option<PropertyValue>,
    pub mutable: bool,
    pub track_time: bool,
}

impl PropertyDefinition {
    /// A mutable, untracked property of the given type with no default value.
    #[must_use]
    pub fn new(value_type: ValueType) -> Self {
        PropertyDefinition {
            value_type,
            default_value: None,
            mutable: true,
            track_time: false,
        }
    }

    #[must_use]
    pub fn with_default(mut self, default_value: impl Into<PropertyValue>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    #[must_use]
    pub fn track_time(mut self) -> Self {
        self.track_time = true;
        self
    }
}

/// Checks `value` against a declared value type.
///
/// # Errors
/// `IncompatibleValue` if the value kind differs from the declared kind, `InvalidEnumOrdinal` if an
/// enum ordinal names no variant.
pub fn validate_value(
    property_id: &PropertyId,
    value_type: &ValueType,
    value: &PropertyValue,
) -> Result<(), KernelError> {
    if value.kind() != value_type.kind() {
        return Err(KernelError::IncompatibleValue {
            property: property_id.clone(),
            expected: value_type.kind(),
            found: value.kind(),
        });
    }
    if let (ValueType::Enum(enum_type), PropertyValue::Enum(ordinal)) = (value_type, value) {
        if usize::from(*ordinal) >= enum_type.variant_count() {
            return Err(KernelError::InvalidEnumOrdinal {
                property: property_id.clone(),
                ordinal: *ordinal,
                variant_count: enum_type.variant_count(),
            });
        }
    }
    Ok(())
}

/// Verifies that every live entity is among those receiving an explicit value.
///
/// Runs once per definition of a property without a default, in time linear in the population.
///
/// # Errors
/// `IncompleteInitialization`, naming the property and every live entity left without a value.
pub fn check_completeness(
    property_id: &PropertyId,
    live: impl IntoIterator<Item = EntityId>,
    supplied: &HashSet<EntityId>,
) -> Result<(), KernelError> {
    let missing: Vec<EntityId> = live
        .into_iter()
        .filter(|entity_id| !supplied.contains(entity_id))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(KernelError::IncompleteInitialization {
            property: property_id.clone(),
            missing,
        })
    }
}

/// Dense storage of one property's values, with optional assignment times.
#[derive(Debug, Clone)]
pub struct PropertyStore {
    property_id: PropertyId,
    definition: PropertyDefinition,
    definition_time: f64,
    /// Created on the first non-default write.
    values: Option<Column>,
    /// Explicit-assignment flags. Present only when the property has no default.
    assigned: Option<BitColumn>,
    /// Assignment times. Present only when the property is time-tracked.
    times: Option<DenseColumn<f64>>,
    /// The number of entity slots reserved so far.
    capacity: usize,
}

impl PropertyStore {
    #[must_use]
    pub fn new(property_id: PropertyId, definition: PropertyDefinition, definition_time: f64) -> Self {
        let assigned = definition
            .default_value
            .is_none()
            .then(|| BitColumn::new(false));
        let times = definition
            .track_time
            .then(|| DenseColumn::new(definition_time));
        PropertyStore {
            property_id,
            definition,
            definition_time,
            values: None,
            assigned,
            times,
            capacity: 0,
        }
    }

    #[must_use]
    pub fn property_id(&self) -> &PropertyId {
        &self.property_id
    }

    #[must_use]
    pub fn definition(&self) -> &PropertyDefinition {
        &self.definition
    }

    #[must_use]
    pub fn definition_time(&self) -> f64 {
        self.definition_time
    }

    #[must_use]
    pub fn is_time_tracked(&self) -> bool {
        self.times.is_some()
    }

    /// Checks `value` against this property's declared type.
    ///
    /// # Errors
    /// See [`validate_value`].
    pub fn validate(&self, value: &PropertyValue) -> Result<(), KernelError> {
        validate_value(&self.property_id, &self.definition.value_type, value)
    }

    /// Returns the entity's value, or the default if it was never assigned. Returns `None` only
    /// for a property without a default whose slot was never assigned.
    #[must_use]
    pub fn try_get(&self, entity_id: EntityId) -> Option<PropertyValue> {
        let index = entity_id.index();
        if let Some(assigned) = &self.assigned {
            if !assigned.get(index).unwrap_or(false) {
                return None;
            }
        }
        self.values
            .as_ref()
            .and_then(|column| column.get(index))
            .or_else(|| self.definition.default_value.clone())
    }

    /// Returns the entity's value, or the default if it was never assigned.
    ///
    /// # Panics
    /// If the property has no default and the entity was never assigned a value. Completeness is
    /// enforced when the property is defined and when entities are added, so this indicates a
    /// module bug.
    #[must_use]
    pub fn get(&self, entity_id: EntityId) -> PropertyValue {
        match self.try_get(entity_id) {
            Some(value) => value,
            None => panic!(
                "property {} has neither a value nor a default for entity {}",
                self.property_id, entity_id
            ),
        }
    }

    /// Writes `value` for the entity, recording `time` if the property is time-tracked. Returns
    /// the previous value, if there was one.
    ///
    /// # Errors
    /// If `value` does not match the declared type. Nothing is written in that case.
    pub fn set(
        &mut self,
        entity_id: EntityId,
        value: PropertyValue,
        time: f64,
    ) -> Result<Option<PropertyValue>, KernelError> {
        self.validate(&value)?;
        let index = entity_id.index();
        let previous = self.try_get(entity_id);

        match &mut self.values {
            Some(column) => column.set(index, value),
            None if self.definition.default_value.as_ref() == Some(&value) => {}
            None => {
                let mut column = Column::new(
                    &self.definition.value_type,
                    self.definition.default_value.as_ref(),
                );
                column.expand_capacity(self.capacity);
                column.set(index, value);
                self.values = Some(column);
            }
        }
        if let Some(assigned) = &mut self.assigned {
            assigned.set(index, true);
        }
        if let Some(times) = &mut self.times {
            times.set(index, time);
        }
        Ok(previous)
    }

    /// Returns the time of the entity's most recent assignment, or the definition time if it was
    /// never assigned.
    ///
    /// # Panics
    /// If the property is not time-tracked.
    #[must_use]
    pub fn get_assignment_time(&self, entity_id: EntityId) -> f64 {
        match &self.times {
            Some(times) => times
                .get(entity_id.index())
                .copied()
                .unwrap_or(self.definition_time),
            None => panic!(
                "assignment times are not tracked for property {}",
                self.property_id
            ),
        }
    }

    /// Reserves room for entity slots `0..capacity` in every column, present or future.
    pub fn expand_capacity(&mut self, capacity: usize) {
        if capacity <= self.capacity {
            return;
        }
        self.capacity = capacity;
        if let Some(values) = &mut self.values {
            values.expand_capacity(capacity);
        }
        if let Some(assigned) = &mut self.assigned {
            assigned.expand_capacity(capacity);
        }
        if let Some(times) = &mut self.times {
            times.expand_capacity(capacity);
        }
    }

    /// Invalidates the entity's slot: its value reverts to the default (or to unassigned), and
    /// its assignment time to the definition time.
    pub fn remove(&mut self, entity_id: EntityId) {
        let index = entity_id.index();
        if let Some(values) = &mut self.values {
            values.reset(index);
        }
        if let Some(assigned) = &mut self.assigned {
            assigned.reset(index);
        }
        if let Some(times) = &mut self.times {
            times.reset(index);
        }
    }

    /// The number of slots materialized in the value column.
    #[must_use]
    pub fn materialized_len(&self) -> usize {
        self.values.as_ref().map_or(0, Column::len)
    }

    /// How many times any backing allocation of this store has been created or grown.
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.values.as_ref().map_or(0, Column::allocations)
            + self.assigned.as_ref().map_or(0, BitColumn::allocations)
            + self.times.as_ref().map_or(0, DenseColumn::allocations)
    }
}
