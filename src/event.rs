//! Event types and the handler registry behind two-phase event resolution.
//!
//! There are two kinds of events:
//!
//! * A [`MutationEvent`] is a request to change shared state. Resolving one runs every
//!   validation-phase handler first; if any rejects the event nothing else happens. Otherwise
//!   every execution-phase handler runs. Validation handlers only see `&Context` and so cannot
//!   change state.
//! * An [`ObservationEvent`] is a fact that state has changed. Its handlers are notified after the
//!   fact and cannot reject it.
//!
//! Handlers for each event type run in the order they were subscribed. The registry hands out
//! snapshots of the handler lists so that handlers may subscribe further handlers, or raise
//! further events, while they run.

use crate::context::Context;
use crate::error::KernelError;
use crate::hashing::HashMap;
use std::any::{Any, TypeId};
use std::rc::Rc;

/// A request to change state, resolved with a validation phase and then an execution phase.
pub trait MutationEvent: Any {}

/// A broadcast fact that state has changed.
pub trait ObservationEvent: Any {}

pub(crate) type ValidationHandler<E> = dyn Fn(&Context, &E) -> Result<(), KernelError>;
pub(crate) type ExecutionHandler<E> = dyn Fn(&mut Context, &E) -> Result<(), KernelError>;
pub(crate) type ObservationHandler<E> = dyn Fn(&mut Context, &E);

struct MutationHandlers<E: MutationEvent> {
    validators: Vec<Rc<ValidationHandler<E>>>,
    executors: Vec<Rc<ExecutionHandler<E>>>,
}

impl<E: MutationEvent> Default for MutationHandlers<E> {
    fn default() -> Self {
        MutationHandlers {
            validators: Vec::new(),
            executors: Vec::new(),
        }
    }
}

/// The handlers to run for one resolution of a mutation event.
pub(crate) struct MutationDispatch<E: MutationEvent> {
    pub(crate) validators: Vec<Rc<ValidationHandler<E>>>,
    pub(crate) executors: Vec<Rc<ExecutionHandler<E>>>,
}

/// Ordered handler lists keyed by event type.
#[derive(Default)]
pub(crate) struct EventRegistry {
    mutation_handlers: HashMap<TypeId, Box<dyn Any>>,
    observation_handlers: HashMap<TypeId, Box<dyn Any>>,
}

impl EventRegistry {
    fn mutation_handlers_mut<E: MutationEvent>(&mut self) -> &mut MutationHandlers<E> {
        self.mutation_handlers
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(MutationHandlers::<E>::default()))
            .downcast_mut()
            .expect("Type mismatch in mutation handler registry")
    }

    fn observation_handlers_mut<E: ObservationEvent>(
        &mut self,
    ) -> &mut Vec<Rc<ObservationHandler<E>>> {
        self.observation_handlers
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<Rc<ObservationHandler<E>>>::new()))
            .downcast_mut()
            .expect("Type mismatch in observation handler registry")
    }

    pub(crate) fn add_validator<E: MutationEvent>(&mut self, handler: Rc<ValidationHandler<E>>) {
        self.mutation_handlers_mut::<E>().validators.push(handler);
    }

    pub(crate) fn add_executor<E: MutationEvent>(&mut self, handler: Rc<ExecutionHandler<E>>) {
        self.mutation_handlers_mut::<E>().executors.push(handler);
    }

    pub(crate) fn add_observer<E: ObservationEvent>(&mut self, handler: Rc<ObservationHandler<E>>) {
        self.observation_handlers_mut::<E>().push(handler);
    }

    /// Returns the current handlers for `E`, in subscription order.
    pub(crate) fn mutation_dispatch<E: MutationEvent>(&self) -> MutationDispatch<E> {
        match self
            .mutation_handlers
            .get(&TypeId::of::<E>())
            .and_then(|handlers| handlers.downcast_ref::<MutationHandlers<E>>())
        {
            Some(handlers) => MutationDispatch {
                validators: handlers.validators.clone(),
                executors: handlers.executors.clone(),
            },
            None => MutationDispatch {
                validators: Vec::new(),
                executors: Vec::new(),
            },
        }
    }

    /// Returns the current observers of `E`, in subscription order.
    pub(crate) fn observers<E: ObservationEvent>(&self) -> Vec<Rc<ObservationHandler<E>>> {
        self.observation_handlers
            .get(&TypeId::of::<E>())
            .and_then(|handlers| handlers.downcast_ref::<Vec<Rc<ObservationHandler<E>>>>())
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn has_observers<E: ObservationEvent>(&self) -> bool {
        self.observation_handlers
            .get(&TypeId::of::<E>())
            .and_then(|handlers| handlers.downcast_ref::<Vec<Rc<ObservationHandler<E>>>>())
            .is_some_and(|handlers| !handlers.is_empty())
    }
}
