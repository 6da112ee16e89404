//! Run-wide configuration values.
//!
//! A global property is a named, typed value that every module can read, typically loaded from a
//! JSON configuration file before setup. Properties are declared with
//! [`define_global_property!`](crate::define_global_property):
//!
//! ```
//! use nucleus::{define_global_property, Context, ContextGlobalPropertiesExt};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Seasonality {
//!     amplitude: f64,
//!     period: f64,
//! }
//! define_global_property!(SeasonalityParams, Seasonality);
//!
//! let mut context = Context::new();
//! context
//!     .set_global_property_value(SeasonalityParams, Seasonality { amplitude: 0.2, period: 365.0 })
//!     .unwrap();
//! let params = context.get_global_property_value(SeasonalityParams).unwrap().unwrap();
//! assert_eq!(params.period, 365.0);
//! ```
//!
//! Values are held as `serde_json::Value` so that a configuration file can be loaded before the
//! code that reads it knows the types.
use crate::context::Context;
use crate::define_data_plugin;
use crate::error::KernelError;
use crate::hashing::{HashMap, HashMapExt};
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::fs;
use std::path::Path;

/// Defines a global property with the given name and value type.
///
/// The name used in configuration files is the identifier itself.
#[macro_export]
macro_rules! define_global_property {
    ($global_property:ident, $value:ty) => {
        #[derive(Copy, Clone)]
        struct $global_property;

        impl $crate::global_properties::GlobalProperty for $global_property {
            type Value = $value;

            fn name() -> &'static str {
                stringify!($global_property)
            }
        }
    };
}

pub trait GlobalProperty: Any {
    type Value: Serialize + DeserializeOwned;

    fn name() -> &'static str;
}

struct GlobalPropertiesDataContainer {
    values: HashMap<String, serde_json::Value>,
}

impl GlobalPropertiesDataContainer {
    fn insert(&mut self, name: &str, value: serde_json::Value) -> Result<(), KernelError> {
        if self.values.contains_key(name) {
            return Err(KernelError::DuplicateGlobalProperty(name.to_string()));
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }
}

define_data_plugin!(
    GlobalPropertiesPlugin,
    GlobalPropertiesDataContainer,
    GlobalPropertiesDataContainer {
        values: HashMap::new(),
    }
);

pub trait ContextGlobalPropertiesExt {
    /// Set the value of a global property
    ///
    /// # Errors
    /// `DuplicateGlobalProperty` if the property already has a value. `JsonError` if the value
    /// cannot be serialized.
    fn set_global_property_value<T: GlobalProperty>(
        &mut self,
        property: T,
        value: T::Value,
    ) -> Result<(), KernelError>;

    /// Returns the value of a global property, or `None` if it has not been set
    ///
    /// # Errors
    /// `JsonError` if the stored value does not have the property's type, which happens when a
    /// configuration file holds a mistyped value.
    fn get_global_property_value<T: GlobalProperty>(
        &self,
        property: T,
    ) -> Result<Option<T::Value>, KernelError>;

    /// Sets global property values from a JSON file holding an object keyed by property name
    ///
    /// # Errors
    /// `IoError` or `JsonError` if the file cannot be read or parsed, and
    /// `DuplicateGlobalProperty` if a property in the file already has a value.
    fn load_global_properties(&mut self, file_name: &Path) -> Result<(), KernelError>;
}

impl ContextGlobalPropertiesExt for Context {
    fn set_global_property_value<T: GlobalProperty>(
        &mut self,
        _property: T,
        value: T::Value,
    ) -> Result<(), KernelError> {
        let value = serde_json::to_value(value)?;
        debug!("setting global property {}", T::name());
        self.get_data_container_mut::<GlobalPropertiesPlugin>()
            .insert(T::name(), value)
    }

    fn get_global_property_value<T: GlobalProperty>(
        &self,
        _property: T,
    ) -> Result<Option<T::Value>, KernelError> {
        let Some(value) = self
            .get_data_container::<GlobalPropertiesPlugin>()
            .and_then(|data_container| data_container.values.get(T::name()))
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(value.clone())?))
    }

    fn load_global_properties(&mut self, file_name: &Path) -> Result<(), KernelError> {
        info!("loading global properties from {}", file_name.display());
        let config_file = fs::read_to_string(file_name)?;
        let values: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&config_file)?;
        let data_container = self.get_data_container_mut::<GlobalPropertiesPlugin>();
        for (name, value) in values {
            data_container.insert(&name, value)?;
        }
        Ok(())
    }
}
