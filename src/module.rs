//! Module declarations consumed by [`Context::init_modules`](crate::Context::init_modules).
//!
//! A module is a named unit of setup code that subscribes to events, registers data and
//! snapshot providers, and may depend on other modules having been initialized first.
//!
//! ```
//! use nucleus::{Context, ModuleDeclaration};
//!
//! let mut context = Context::new();
//! context
//!     .register_module(ModuleDeclaration::new("regions", |_| Ok(())))
//!     .unwrap();
//! context
//!     .register_module(ModuleDeclaration::new("people", |_| Ok(())).depends_on("regions"))
//!     .unwrap();
//! context.init_modules().unwrap();
//! assert!(context.is_module_initialized(&"people".into()));
//! ```
use crate::context::Context;
use crate::dependency::ModuleNode;
use crate::error::KernelError;
use crate::ids::ModuleId;

pub type ModuleInitFn = dyn FnOnce(&mut Context) -> Result<(), KernelError>;

pub struct ModuleDeclaration {
    id: ModuleId,
    dependencies: Vec<ModuleId>,
    init: Box<ModuleInitFn>,
}

impl ModuleDeclaration {
    pub fn new(
        id: impl Into<ModuleId>,
        init: impl FnOnce(&mut Context) -> Result<(), KernelError> + 'static,
    ) -> Self {
        ModuleDeclaration {
            id: id.into(),
            dependencies: Vec::new(),
            init: Box::new(init),
        }
    }

    /// Declares that `dependency` must be initialized before this module.
    #[must_use]
    pub fn depends_on(mut self, dependency: impl Into<ModuleId>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    #[must_use]
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    #[must_use]
    pub fn dependencies(&self) -> &[ModuleId] {
        &self.dependencies
    }

    pub(crate) fn node(&self) -> ModuleNode {
        ModuleNode::new(self.id.clone(), self.dependencies.iter().cloned())
    }

    pub(crate) fn into_init(self) -> Box<ModuleInitFn> {
        self.init
    }
}

impl std::fmt::Debug for ModuleDeclaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDeclaration")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}
