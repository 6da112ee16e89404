//! End-of-run state snapshots.
//!
//! Each module that owns state registers a snapshot provider during initialization. A provider
//! renders the module's complete state as plain `serde_json::Value` data; the kernel collects the
//! results into a [`StateSnapshot`] keyed by module id, in the order the providers were
//! registered. Choosing a wire format is left to whoever consumes the snapshot. [`write_snapshot`]
//! is a convenience for JSON files.
//!
//! [`write_snapshot`]: ContextSnapshotExt::write_snapshot
use crate::context::Context;
use crate::define_data_plugin;
use crate::error::KernelError;
use crate::ids::ModuleId;
use indexmap::IndexMap;
use log::{debug, info};
use serde_derive::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

/// Renders one module's state.
pub type SnapshotProvider = dyn Fn(&Context) -> Result<serde_json::Value, KernelError>;

/// The state of every module that provides one, at a point in simulated time.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub time: f64,
    pub modules: IndexMap<ModuleId, serde_json::Value>,
}

define_data_plugin!(
    SnapshotPlugin,
    IndexMap<ModuleId, Rc<SnapshotProvider>>,
    IndexMap::new()
);

pub trait ContextSnapshotExt {
    /// Registers the function that renders a module's state.
    ///
    /// # Errors
    /// `DuplicateModule` if the module already has a provider.
    fn register_snapshot_provider(
        &mut self,
        module_id: impl Into<ModuleId>,
        provider: impl Fn(&Context) -> Result<serde_json::Value, KernelError> + 'static,
    ) -> Result<(), KernelError>;

    /// Collects the state of every module with a provider.
    ///
    /// # Errors
    /// The first error returned by a provider.
    fn snapshot(&self) -> Result<StateSnapshot, KernelError>;

    /// Writes a snapshot of the current state to `path` as pretty-printed JSON.
    ///
    /// # Errors
    /// Any provider error, or an I/O or serialization error.
    fn write_snapshot(&self, path: &Path) -> Result<(), KernelError>;
}

impl ContextSnapshotExt for Context {
    fn register_snapshot_provider(
        &mut self,
        module_id: impl Into<ModuleId>,
        provider: impl Fn(&Context) -> Result<serde_json::Value, KernelError> + 'static,
    ) -> Result<(), KernelError> {
        let module_id = module_id.into();
        let providers = self.get_data_container_mut::<SnapshotPlugin>();
        if providers.contains_key(&module_id) {
            return Err(KernelError::DuplicateModule(module_id));
        }
        debug!("registered snapshot provider for module {module_id}");
        providers.insert(module_id, Rc::new(provider));
        Ok(())
    }

    fn snapshot(&self) -> Result<StateSnapshot, KernelError> {
        let mut modules = IndexMap::new();
        if let Some(providers) = self.get_data_container::<SnapshotPlugin>() {
            for (module_id, provider) in providers {
                modules.insert(module_id.clone(), provider(self)?);
            }
        }
        Ok(StateSnapshot {
            time: self.get_current_time(),
            modules,
        })
    }

    fn write_snapshot(&self, path: &Path) -> Result<(), KernelError> {
        let snapshot = self.snapshot()?;
        info!(
            "writing snapshot of {} modules at time {} to {}",
            snapshot.modules.len(),
            snapshot.time,
            path.display()
        );
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &snapshot)?;
        writer.flush()?;
        Ok(())
    }
}
