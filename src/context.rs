//! A manager for the state of a discrete-event simulation
//!
//! Defines a `Context` that is intended to provide the foundational mechanics
//! for executing a simulation:
//! * a time-ordered queue of plans, plus a FIFO queue of callbacks that run at
//!   the current time before the next plan is dequeued;
//! * typed data plugins that modules use to keep their state;
//! * two-phase resolution of mutation events and broadcast of observation events;
//! * dependency-ordered initialization of registered modules.
use crate::data_plugin::DataPlugin;
use crate::dependency::{self, ModuleNode};
use crate::error::KernelError;
use crate::event::{EventRegistry, MutationDispatch, MutationEvent, ObservationEvent};
use crate::execution_stats::{
    log_execution_statistics, ExecutionProfilingCollector, ExecutionStatistics,
};
use crate::hashing::{HashMap, HashMapExt};
use crate::ids::ModuleId;
use crate::module::{ModuleDeclaration, ModuleInitFn};
use crate::plan::{PlanId, Queue};
use log::{debug, info, trace};
use std::any::{type_name, Any, TypeId};
use std::collections::VecDeque;
use std::rc::Rc;

/// The nesting depth of event resolution allowed before the run is aborted.
pub const DEFAULT_MAX_EVENT_DEPTH: usize = 100;

/// The order in which plans scheduled for the same time are executed.
///
/// All `First` plans at a given time run before `Normal` plans, which run before
/// `Last` plans. Within a phase, plans run in the order they were added.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ExecutionPhase {
    First,
    #[default]
    Normal,
    Last,
}

type Callback = dyn FnOnce(&mut Context);

struct PlanCallback {
    callback: Box<Callback>,
    /// Passive plans do not keep the simulation running on their own.
    passive: bool,
}

/// A manager for the state of a discrete-event simulation
///
/// Provides core simulation services including
/// * Maintaining a notion of time
/// * Scheduling plans to occur at some point in the future and executing them
///   at that time
/// * Storing data associated with modules in data plugins
/// * Resolving mutation events and broadcasting observation events
///
/// Plans are executed in order of time, execution phase, and then the order in
/// which they were added. Callbacks added with [`Context::queue_callback`] run
/// at the current time, before the next plan.
pub struct Context {
    plan_queue: Queue<PlanCallback, ExecutionPhase>,
    active_plan_count: usize,
    callback_queue: VecDeque<Box<Callback>>,
    data_plugins: HashMap<TypeId, Box<dyn Any>>,
    events: EventRegistry,
    current_time: f64,
    event_depth: usize,
    max_event_depth: usize,
    pending_modules: Vec<ModuleDeclaration>,
    initialized_modules: Vec<ModuleId>,
    shutdown_requested: bool,
    plans_executed: usize,
    events_raised: usize,
    collect_execution_statistics: bool,
    execution_statistics: Option<ExecutionStatistics>,
}

impl Context {
    /// Create a new empty `Context`
    #[must_use]
    pub fn new() -> Context {
        Context {
            plan_queue: Queue::new(),
            active_plan_count: 0,
            callback_queue: VecDeque::new(),
            data_plugins: HashMap::new(),
            events: EventRegistry::default(),
            current_time: 0.0,
            event_depth: 0,
            max_event_depth: DEFAULT_MAX_EVENT_DEPTH,
            pending_modules: Vec::new(),
            initialized_modules: Vec::new(),
            shutdown_requested: false,
            plans_executed: 0,
            events_raised: 0,
            collect_execution_statistics: false,
            execution_statistics: None,
        }
    }

    /// Add a plan to the future event list at the specified time in the normal
    /// phase
    ///
    /// Returns a `PlanId` for the newly-added plan that can be used to cancel it
    /// if needed.
    /// # Panics
    ///
    /// Panics if time is in the past, infinite, or NaN.
    pub fn add_plan(&mut self, time: f64, callback: impl FnOnce(&mut Context) + 'static) -> PlanId {
        self.schedule(time, Box::new(callback), ExecutionPhase::Normal, false)
    }

    /// Add a plan to the future event list at the specified time and with the
    /// specified phase (first, normal, or last among plans at the
    /// specified time)
    ///
    /// # Panics
    ///
    /// Panics if time is in the past, infinite, or NaN.
    pub fn add_plan_with_phase(
        &mut self,
        time: f64,
        callback: impl FnOnce(&mut Context) + 'static,
        phase: ExecutionPhase,
    ) -> PlanId {
        self.schedule(time, Box::new(callback), phase, false)
    }

    /// Add a plan that runs at the specified time only if the simulation is
    /// still running then
    ///
    /// Passive plans do not keep the simulation alive: once only passive plans
    /// remain, [`Context::execute`] returns.
    ///
    /// # Panics
    ///
    /// Panics if time is in the past, infinite, or NaN.
    pub fn add_passive_plan(
        &mut self,
        time: f64,
        callback: impl FnOnce(&mut Context) + 'static,
    ) -> PlanId {
        self.schedule(time, Box::new(callback), ExecutionPhase::Normal, true)
    }

    /// Add a plan that runs now and then every `period` with the given phase
    ///
    /// Periodic plans are passive. Each occurrence schedules the next one only
    /// while other, non-passive plans remain.
    ///
    /// # Panics
    ///
    /// Panics if `period` is not a positive finite number.
    pub fn add_periodic_plan_with_phase(
        &mut self,
        period: f64,
        callback: impl Fn(&mut Context) + 'static,
        phase: ExecutionPhase,
    ) {
        assert!(
            period > 0.0 && period.is_finite(),
            "Period {period} must be positive and finite"
        );
        let time = self.current_time;
        self.schedule(
            time,
            Box::new(move |context: &mut Context| {
                context.evaluate_periodic_and_schedule_next(period, callback, phase);
            }),
            phase,
            true,
        );
    }

    fn evaluate_periodic_and_schedule_next(
        &mut self,
        period: f64,
        callback: impl Fn(&mut Context) + 'static,
        phase: ExecutionPhase,
    ) {
        trace!("evaluating periodic plan at time {}", self.current_time);
        callback(self);
        if self.active_plan_count > 0 {
            let next_time = self.current_time + period;
            self.schedule(
                next_time,
                Box::new(move |context: &mut Context| {
                    context.evaluate_periodic_and_schedule_next(period, callback, phase);
                }),
                phase,
                true,
            );
        }
    }

    fn schedule(
        &mut self,
        time: f64,
        callback: Box<Callback>,
        phase: ExecutionPhase,
        passive: bool,
    ) -> PlanId {
        assert!(
            !time.is_nan() && !time.is_infinite() && time >= self.current_time,
            "Time {time} is invalid at current time {}",
            self.current_time
        );
        if !passive {
            self.active_plan_count += 1;
        }
        self.plan_queue
            .add_plan(time, PlanCallback { callback, passive }, phase)
    }

    /// Cancel a plan that has been added to the queue
    ///
    /// Returns `false` if the plan has already run or been cancelled.
    pub fn cancel_plan(&mut self, plan_id: &PlanId) -> bool {
        trace!("canceling plan {plan_id:?}");
        match self.plan_queue.cancel_plan(plan_id) {
            Some(plan) => {
                if !plan.passive {
                    self.active_plan_count -= 1;
                }
                true
            }
            None => false,
        }
    }

    /// The number of plans that have been added and have neither run nor been
    /// cancelled, passive plans included
    #[must_use]
    pub fn remaining_plan_count(&self) -> usize {
        self.plan_queue.remaining_plan_count()
    }

    /// Add a `Callback` to the queue to be executed before the next plan
    pub fn queue_callback(&mut self, callback: impl FnOnce(&mut Context) + 'static) {
        trace!("queuing callback");
        self.callback_queue.push_back(Box::new(callback));
    }

    /// Retrieve a reference to the data container associated with a
    /// `DataPlugin`, or `None` if it has not been created yet
    #[must_use]
    pub fn get_data_container<T: DataPlugin>(&self) -> Option<&T::DataContainer> {
        self.data_plugins
            .get(&TypeId::of::<T>())
            .and_then(|data| data.downcast_ref::<T::DataContainer>())
    }

    /// Retrieve a mutable reference to the data container associated with a
    /// `DataPlugin`, creating it if needed
    ///
    /// # Panics
    ///
    /// Panics if the stored container does not have the plugin's type.
    #[must_use]
    pub fn get_data_container_mut<T: DataPlugin>(&mut self) -> &mut T::DataContainer {
        self.data_plugins
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::create_data_container()))
            .downcast_mut::<T::DataContainer>()
            .expect("Type mismatch in data plugin registry")
    }

    /// Subscribe a validation-phase handler to a mutation event
    ///
    /// Validation handlers run before any execution handler and may reject the
    /// event by returning an error. They only see `&Context` and cannot change
    /// state.
    pub fn subscribe_to_validation<E: MutationEvent>(
        &mut self,
        handler: impl Fn(&Context, &E) -> Result<(), KernelError> + 'static,
    ) {
        self.events.add_validator::<E>(Rc::new(handler));
    }

    /// Subscribe an execution-phase handler to a mutation event
    pub fn subscribe_to_execution<E: MutationEvent>(
        &mut self,
        handler: impl Fn(&mut Context, &E) -> Result<(), KernelError> + 'static,
    ) {
        self.events.add_executor::<E>(Rc::new(handler));
    }

    /// Subscribe a handler to an observation event
    ///
    /// Handlers are called synchronously, in subscription order, every time the
    /// event is raised.
    pub fn subscribe_to_event<E: ObservationEvent>(
        &mut self,
        handler: impl Fn(&mut Context, &E) + 'static,
    ) {
        self.events.add_observer::<E>(Rc::new(handler));
    }

    /// Whether any handler observes events of type `E`
    #[must_use]
    pub fn has_subscribers<E: ObservationEvent>(&self) -> bool {
        self.events.has_observers::<E>()
    }

    /// Resolve a mutation event
    ///
    /// Every validation handler runs first, in subscription order. If one
    /// rejects the event its error is returned and no execution handler runs.
    /// Otherwise every execution handler runs in subscription order. Events
    /// raised by handlers are resolved before this returns.
    ///
    /// # Errors
    ///
    /// * `UnhandledMutation` if no execution handler is subscribed to `E`
    /// * the first error returned by a validation or execution handler
    ///
    /// An error from an execution handler does not undo the changes made by
    /// handlers that ran before it.
    ///
    /// # Panics
    ///
    /// Panics if events are nested deeper than the maximum event depth.
    pub fn raise_mutation<E: MutationEvent>(&mut self, event: E) -> Result<(), KernelError> {
        let dispatch = self.events.mutation_dispatch::<E>();
        if dispatch.executors.is_empty() {
            return Err(KernelError::UnhandledMutation(type_name::<E>()));
        }
        self.enter_event::<E>();
        let result = self.resolve_mutation(&dispatch, &event);
        self.event_depth -= 1;
        result
    }

    fn resolve_mutation<E: MutationEvent>(
        &mut self,
        dispatch: &MutationDispatch<E>,
        event: &E,
    ) -> Result<(), KernelError> {
        for validator in &dispatch.validators {
            validator(self, event)?;
        }
        for executor in &dispatch.executors {
            executor(self, event)?;
        }
        Ok(())
    }

    /// Broadcast an observation event to its subscribers, in subscription order
    ///
    /// # Panics
    ///
    /// Panics if events are nested deeper than the maximum event depth.
    pub fn raise_observation<E: ObservationEvent>(&mut self, event: E) {
        let observers = self.events.observers::<E>();
        if observers.is_empty() {
            return;
        }
        self.enter_event::<E>();
        for observer in &observers {
            observer(self, &event);
        }
        self.event_depth -= 1;
    }

    fn enter_event<E: Any>(&mut self) {
        self.event_depth += 1;
        self.events_raised += 1;
        assert!(
            self.event_depth <= self.max_event_depth,
            "event {} exceeded the maximum event depth of {}",
            type_name::<E>(),
            self.max_event_depth
        );
    }

    /// Sets how deeply events may be nested inside other events' handlers
    pub fn set_max_event_depth(&mut self, max_event_depth: usize) {
        self.max_event_depth = max_event_depth;
    }

    #[must_use]
    pub fn get_max_event_depth(&self) -> usize {
        self.max_event_depth
    }

    /// Register a module to be initialized by the next call to
    /// [`Context::init_modules`]
    ///
    /// # Errors
    ///
    /// Returns `DuplicateModule` if a module with the same id is already
    /// registered or initialized.
    pub fn register_module(&mut self, declaration: ModuleDeclaration) -> Result<(), KernelError> {
        if self.is_module_registered(declaration.id()) {
            return Err(KernelError::DuplicateModule(declaration.id().clone()));
        }
        debug!("registered module {}", declaration.id());
        self.pending_modules.push(declaration);
        Ok(())
    }

    /// Whether a module is registered, whether or not it has been initialized
    #[must_use]
    pub fn is_module_registered(&self, id: &ModuleId) -> bool {
        self.is_module_initialized(id) || self.pending_modules.iter().any(|m| m.id() == id)
    }

    #[must_use]
    pub fn is_module_initialized(&self, id: &ModuleId) -> bool {
        self.initialized_modules.contains(id)
    }

    /// Initialize every registered module, each after the modules it depends on
    ///
    /// Modules initialized by an earlier call satisfy dependencies but are not
    /// initialized again. Returns the ids of the modules initialized by this
    /// call, in order.
    ///
    /// # Errors
    ///
    /// Configuration faults (`MissingModuleDependency`,
    /// `CircularModuleDependency`) are detected before any module is
    /// initialized, and the pending modules are discarded. An error returned by
    /// a module's init function stops initialization at that module.
    pub fn init_modules(&mut self) -> Result<Vec<ModuleId>, KernelError> {
        let pending = std::mem::take(&mut self.pending_modules);
        let mut nodes: Vec<ModuleNode> = self
            .initialized_modules
            .iter()
            .map(|id| ModuleNode::new(id.clone(), Vec::<ModuleId>::new()))
            .collect();
        nodes.extend(pending.iter().map(ModuleDeclaration::node));

        let order = dependency::order(&nodes)?;

        let mut init_fns: HashMap<ModuleId, Box<ModuleInitFn>> = pending
            .into_iter()
            .map(|declaration| (declaration.id().clone(), declaration.into_init()))
            .collect();
        let mut initialized = Vec::with_capacity(init_fns.len());
        for id in order {
            let Some(init) = init_fns.remove(&id) else {
                continue;
            };
            debug!("initializing module {id}");
            init(self)?;
            self.initialized_modules.push(id.clone());
            initialized.push(id);
        }
        if !initialized.is_empty() {
            let names: Vec<&str> = initialized.iter().map(ModuleId::as_str).collect();
            info!("initialized modules: {}", names.join(", "));
        }
        Ok(initialized)
    }

    /// Get the current time in the simulation
    ///
    /// Returns the current time
    #[must_use]
    pub fn get_current_time(&self) -> f64 {
        self.current_time
    }

    /// Request that the simulation stop
    ///
    /// The current plan or callback runs to completion. Then [`Context::execute`]
    /// returns and every plan and callback still queued is discarded.
    pub fn shutdown(&mut self) {
        info!("shutdown requested at time {}", self.current_time);
        self.shutdown_requested = true;
    }

    /// Collect and log wall time, CPU time and memory statistics for
    /// subsequent calls to [`Context::execute`]
    pub fn enable_execution_statistics(&mut self) {
        self.collect_execution_statistics = true;
    }

    /// Statistics for the last call to [`Context::execute`], if enabled
    #[must_use]
    pub fn get_execution_statistics(&self) -> Option<&ExecutionStatistics> {
        self.execution_statistics.as_ref()
    }

    /// Execute the simulation until there are no more non-passive plans or a
    /// shutdown is requested
    pub fn execute(&mut self) {
        let mut profiler = self
            .collect_execution_statistics
            .then(ExecutionProfilingCollector::new);
        let plans_at_start = self.plans_executed;
        let events_at_start = self.events_raised;
        debug!("executing from time {}", self.current_time);

        loop {
            if self.shutdown_requested {
                self.shutdown_requested = false;
                self.plan_queue.clear();
                self.callback_queue.clear();
                self.active_plan_count = 0;
                break;
            }
            if let Some(profiler) = profiler.as_mut() {
                profiler.refresh();
            }

            // If there is a callback, run it.
            if let Some(callback) = self.callback_queue.pop_front() {
                callback(self);
                continue;
            }

            // Only passive plans left, so we're done.
            if self.active_plan_count == 0 {
                break;
            }

            match self.plan_queue.get_next_plan() {
                Some(plan) => {
                    if !plan.data.passive {
                        self.active_plan_count -= 1;
                    }
                    self.current_time = plan.time;
                    self.plans_executed += 1;
                    (plan.data.callback)(self);
                }
                None => break,
            }
        }

        debug!("execution ended at time {}", self.current_time);
        if let Some(mut profiler) = profiler {
            let stats = profiler.compute_final_statistics(
                self.plans_executed - plans_at_start,
                self.events_raised - events_at_start,
            );
            log_execution_statistics(&stats);
            self.execution_statistics = Some(stats);
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::define_data_plugin;
    use crate::error::FaultKind;
    use std::cell::RefCell;

    define_data_plugin!(ComponentA, Vec<u32>, vec![]);

    fn add_plan(context: &mut Context, time: f64, value: u32) -> PlanId {
        context.add_plan(time, move |context| {
            context.get_data_container_mut::<ComponentA>().push(value);
        })
    }

    fn add_plan_with_phase(
        context: &mut Context,
        time: f64,
        value: u32,
        phase: ExecutionPhase,
    ) -> PlanId {
        context.add_plan_with_phase(
            time,
            move |context| {
                context.get_data_container_mut::<ComponentA>().push(value);
            },
            phase,
        )
    }

    fn recorded(context: &Context) -> Vec<u32> {
        context
            .get_data_container::<ComponentA>()
            .cloned()
            .unwrap_or_default()
    }

    #[test]
    #[should_panic(expected = "Time -1 is invalid")]
    fn negative_plan_time() {
        let mut context = Context::new();
        add_plan(&mut context, -1.0, 0);
    }

    #[test]
    #[should_panic(expected = "is invalid")]
    fn infinite_plan_time() {
        let mut context = Context::new();
        add_plan(&mut context, f64::INFINITY, 0);
    }

    #[test]
    #[should_panic(expected = "is invalid")]
    fn nan_plan_time() {
        let mut context = Context::new();
        add_plan(&mut context, f64::NAN, 0);
    }

    #[test]
    #[should_panic(expected = "Time 1 is invalid at current time 2")]
    fn plan_before_current_time() {
        let mut context = Context::new();
        context.add_plan(2.0, |context| {
            add_plan(context, 1.0, 0);
        });
        context.execute();
    }

    #[test]
    fn empty_context() {
        let mut context = Context::new();
        context.execute();
        assert_eq!(context.get_current_time(), 0.0);
        assert!(context.get_data_container::<ComponentA>().is_none());
    }

    #[test]
    fn timed_plan_only() {
        let mut context = Context::new();
        add_plan(&mut context, 1.0, 1);
        context.execute();
        assert_eq!(context.get_current_time(), 1.0);
        assert_eq!(recorded(&context), vec![1]);
    }

    #[test]
    fn callback_only() {
        let mut context = Context::new();
        context.queue_callback(|context| {
            context.get_data_container_mut::<ComponentA>().push(1);
        });
        context.execute();
        assert_eq!(context.get_current_time(), 0.0);
        assert_eq!(recorded(&context), vec![1]);
    }

    #[test]
    fn callback_before_timed_plan() {
        let mut context = Context::new();
        context.queue_callback(|context| {
            context.get_data_container_mut::<ComponentA>().push(1);
        });
        add_plan(&mut context, 1.0, 2);
        context.execute();
        assert_eq!(context.get_current_time(), 1.0);
        assert_eq!(recorded(&context), vec![1, 2]);
    }

    #[test]
    fn callback_adds_callback_and_timed_plan() {
        let mut context = Context::new();
        context.queue_callback(|context| {
            context.get_data_container_mut::<ComponentA>().push(1);
            add_plan(context, 1.0, 2);
            context.queue_callback(|context| {
                context.get_data_container_mut::<ComponentA>().push(4);
            });
            context.get_data_container_mut::<ComponentA>().push(3);
        });
        context.execute();
        assert_eq!(context.get_current_time(), 1.0);
        assert_eq!(recorded(&context), vec![1, 3, 4, 2]);
    }

    #[test]
    fn timed_plan_adds_callback_and_timed_plan() {
        let mut context = Context::new();
        context.add_plan(1.0, |context| {
            context.get_data_container_mut::<ComponentA>().push(1);
            // We add the plan first, but the callback will fire first.
            add_plan(context, 2.0, 3);
            context.queue_callback(|context| {
                context.get_data_container_mut::<ComponentA>().push(2);
            });
        });
        context.execute();
        assert_eq!(context.get_current_time(), 2.0);
        assert_eq!(recorded(&context), vec![1, 2, 3]);
    }

    #[test]
    fn cancel_plan() {
        let mut context = Context::new();
        let to_cancel = add_plan(&mut context, 2.0, 1);
        context.add_plan(1.0, move |context| {
            assert!(context.cancel_plan(&to_cancel));
        });
        context.execute();
        assert_eq!(context.get_current_time(), 1.0);
        assert_eq!(recorded(&context), Vec::<u32>::new());
    }

    #[test]
    fn cancel_executed_plan() {
        let mut context = Context::new();
        let executed = add_plan(&mut context, 1.0, 1);
        context.execute();
        assert!(!context.cancel_plan(&executed));
        assert_eq!(context.remaining_plan_count(), 0);
    }

    #[test]
    fn add_plan_with_current_time() {
        let mut context = Context::new();
        context.add_plan(1.0, move |context| {
            context.get_data_container_mut::<ComponentA>().push(1);
            add_plan(context, 1.0, 2);
            context.queue_callback(|context| {
                context.get_data_container_mut::<ComponentA>().push(3);
            });
        });
        context.execute();
        assert_eq!(context.get_current_time(), 1.0);
        assert_eq!(recorded(&context), vec![1, 3, 2]);
    }

    #[test]
    fn plans_at_same_time_fire_in_order() {
        let mut context = Context::new();
        add_plan(&mut context, 1.0, 1);
        add_plan(&mut context, 1.0, 2);
        context.execute();
        assert_eq!(context.get_current_time(), 1.0);
        assert_eq!(recorded(&context), vec![1, 2]);
    }

    #[test]
    fn plans_at_same_time_follow_phase() {
        let mut context = Context::new();
        add_plan_with_phase(&mut context, 1.0, 1, ExecutionPhase::Normal);
        add_plan_with_phase(&mut context, 1.0, 2, ExecutionPhase::Last);
        add_plan_with_phase(&mut context, 1.0, 3, ExecutionPhase::First);
        add_plan_with_phase(&mut context, 1.0, 4, ExecutionPhase::First);
        add_plan_with_phase(&mut context, 0.5, 5, ExecutionPhase::Last);
        context.execute();
        assert_eq!(recorded(&context), vec![5, 3, 4, 1, 2]);
    }

    #[test]
    fn passive_plans_do_not_keep_running() {
        let mut context = Context::new();
        context.add_passive_plan(1.0, |context| {
            context.get_data_container_mut::<ComponentA>().push(1);
        });
        context.add_passive_plan(3.0, |context| {
            context.get_data_container_mut::<ComponentA>().push(3);
        });
        add_plan(&mut context, 2.0, 2);
        context.execute();
        assert_eq!(context.get_current_time(), 2.0);
        assert_eq!(recorded(&context), vec![1, 2]);
        assert_eq!(context.remaining_plan_count(), 1);
    }

    #[test]
    fn cancelling_the_last_active_plan_ends_execution() {
        let mut context = Context::new();
        let active = add_plan(&mut context, 5.0, 5);
        context.add_passive_plan(1.0, move |context| {
            context.cancel_plan(&active);
        });
        context.add_passive_plan(2.0, |context| {
            context.get_data_container_mut::<ComponentA>().push(2);
        });
        context.execute();
        assert_eq!(context.get_current_time(), 1.0);
        assert_eq!(recorded(&context), Vec::<u32>::new());
    }

    #[test]
    fn periodic_plan_runs_while_active_plans_remain() {
        let mut context = Context::new();
        context.add_periodic_plan_with_phase(
            1.0,
            |context| {
                let time = context.get_current_time();
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                context
                    .get_data_container_mut::<ComponentA>()
                    .push(time as u32);
            },
            ExecutionPhase::Last,
        );
        add_plan(&mut context, 3.0, 100);
        context.execute();
        // The occurrence at 3.0 is left behind once the last active plan runs
        assert_eq!(recorded(&context), vec![0, 1, 2, 100]);
        assert_eq!(context.get_current_time(), 3.0);
        assert_eq!(context.remaining_plan_count(), 1);
    }

    #[test]
    #[should_panic(expected = "must be positive and finite")]
    fn periodic_plan_rejects_zero_period() {
        let mut context = Context::new();
        context.add_periodic_plan_with_phase(0.0, |_| {}, ExecutionPhase::Normal);
    }

    #[test]
    fn shutdown_discards_remaining_plans() {
        let mut context = Context::new();
        add_plan(&mut context, 1.0, 1);
        context.add_plan(2.0, |context| {
            context.get_data_container_mut::<ComponentA>().push(2);
            context.queue_callback(|context| {
                context.get_data_container_mut::<ComponentA>().push(20);
            });
            context.shutdown();
        });
        add_plan(&mut context, 3.0, 3);
        context.execute();
        assert_eq!(context.get_current_time(), 2.0);
        assert_eq!(recorded(&context), vec![1, 2]);
        assert_eq!(context.remaining_plan_count(), 0);

        // The context can be run again afterwards
        add_plan(&mut context, 4.0, 4);
        context.execute();
        assert_eq!(recorded(&context), vec![1, 2, 4]);
    }

    #[test]
    fn execution_statistics_count_plans() {
        let mut context = Context::new();
        context.enable_execution_statistics();
        add_plan(&mut context, 1.0, 1);
        add_plan(&mut context, 2.0, 2);
        context.execute();
        let stats = context.get_execution_statistics().unwrap();
        assert_eq!(stats.plans_executed, 2);
        assert_eq!(stats.events_raised, 0);
    }

    // Events

    define_data_plugin!(Trace, Vec<String>, Vec::new());

    fn trace(context: &mut Context, line: impl Into<String>) {
        context.get_data_container_mut::<Trace>().push(line.into());
    }

    fn traced(context: &Context) -> Vec<String> {
        context
            .get_data_container::<Trace>()
            .cloned()
            .unwrap_or_default()
    }

    define_data_plugin!(Counter, i64, 0);

    struct Deposit(i64);
    impl MutationEvent for Deposit {}

    struct Deposited(i64);
    impl ObservationEvent for Deposited {}

    fn subscribe_deposits(context: &mut Context) {
        context.subscribe_to_validation(|_, event: &Deposit| {
            if event.0 < 0 {
                return Err(KernelError::TimeOutOfRange {
                    time: 0.0,
                    current_time: 0.0,
                });
            }
            Ok(())
        });
        context.subscribe_to_execution(|context, event: &Deposit| {
            *context.get_data_container_mut::<Counter>() += event.0;
            context.raise_observation(Deposited(event.0));
            Ok(())
        });
    }

    #[test]
    fn mutation_runs_validation_then_execution() {
        let mut context = Context::new();
        context.subscribe_to_validation(|_, _: &Deposit| {
            // Validators cannot see a partially executed event
            Ok(())
        });
        subscribe_deposits(&mut context);
        context.subscribe_to_event(|context, event: &Deposited| {
            trace(context, format!("deposited {}", event.0));
        });

        context.raise_mutation(Deposit(5)).unwrap();
        assert_eq!(*context.get_data_container::<Counter>().unwrap(), 5);
        assert_eq!(traced(&context), vec!["deposited 5"]);
    }

    #[test]
    fn rejected_mutation_runs_no_execution_handler() {
        let mut context = Context::new();
        subscribe_deposits(&mut context);
        context.subscribe_to_event(|context, event: &Deposited| {
            trace(context, format!("deposited {}", event.0));
        });

        let error = context.raise_mutation(Deposit(-1)).unwrap_err();
        assert_eq!(error.kind(), FaultKind::Validation);
        assert!(context.get_data_container::<Counter>().is_none());
        assert!(traced(&context).is_empty());
    }

    #[test]
    fn first_rejecting_validator_stops_validation() {
        let mut context = Context::new();
        let calls = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let calls = Rc::clone(&calls);
            context.subscribe_to_validation(move |_, _: &Deposit| {
                calls.borrow_mut().push(i);
                if i == 1 {
                    Err(KernelError::UnknownEntity(crate::EntityId(7)))
                } else {
                    Ok(())
                }
            });
        }
        context.subscribe_to_execution(|_, _: &Deposit| panic!("should not execute"));
        assert!(matches!(
            context.raise_mutation(Deposit(1)),
            Err(KernelError::UnknownEntity(crate::EntityId(7)))
        ));
        assert_eq!(*calls.borrow(), vec![0, 1]);
    }

    #[test]
    fn mutation_without_executor_is_unhandled() {
        let mut context = Context::new();
        context.subscribe_to_validation(|_, _: &Deposit| Ok(()));
        let error = context.raise_mutation(Deposit(1)).unwrap_err();
        assert!(matches!(error, KernelError::UnhandledMutation(_)));
        assert_eq!(error.kind(), FaultKind::Configuration);
    }

    #[test]
    fn handlers_run_in_subscription_order() {
        let mut context = Context::new();
        for name in ["a", "b", "c"] {
            context.subscribe_to_execution(move |context, _: &Deposit| {
                trace(context, format!("execute {name}"));
                Ok(())
            });
            context.subscribe_to_event(move |context, _: &Deposited| {
                trace(context, format!("observe {name}"));
            });
        }
        context.raise_mutation(Deposit(1)).unwrap();
        context.raise_observation(Deposited(1));
        assert_eq!(
            traced(&context),
            vec![
                "execute a",
                "execute b",
                "execute c",
                "observe a",
                "observe b",
                "observe c"
            ]
        );
    }

    #[test]
    fn nested_events_resolve_depth_first() {
        let mut context = Context::new();
        subscribe_deposits(&mut context);
        context.subscribe_to_execution(|context, event: &Deposit| {
            trace(context, format!("after deposit {}", event.0));
            Ok(())
        });
        context.subscribe_to_event(|context, event: &Deposited| {
            trace(context, format!("observed {}", event.0));
            if event.0 > 1 {
                context.raise_mutation(Deposit(event.0 - 1)).unwrap();
            }
        });

        context.raise_mutation(Deposit(2)).unwrap();
        assert_eq!(*context.get_data_container::<Counter>().unwrap(), 3);
        assert_eq!(
            traced(&context),
            vec![
                "observed 2",
                "observed 1",
                "after deposit 1",
                "after deposit 2"
            ]
        );
    }

    #[test]
    fn handlers_subscribed_during_dispatch_see_later_events() {
        let mut context = Context::new();
        context.subscribe_to_event(|context, event: &Deposited| {
            trace(context, format!("first {}", event.0));
            if event.0 == 1 {
                context.subscribe_to_event(|context, event: &Deposited| {
                    trace(context, format!("second {}", event.0));
                });
            }
        });
        context.raise_observation(Deposited(1));
        context.raise_observation(Deposited(2));
        assert_eq!(traced(&context), vec!["first 1", "first 2", "second 2"]);
    }

    #[test]
    #[should_panic(expected = "exceeded the maximum event depth of 5")]
    fn runaway_recursion_is_fatal() {
        let mut context = Context::new();
        context.set_max_event_depth(5);
        context.subscribe_to_event(|context, event: &Deposited| {
            context.raise_observation(Deposited(event.0 + 1));
        });
        context.raise_observation(Deposited(0));
    }

    #[test]
    fn observation_without_subscribers() {
        let mut context = Context::new();
        assert!(!context.has_subscribers::<Deposited>());
        context.raise_observation(Deposited(1));
        context.subscribe_to_event(|_, _: &Deposited| {});
        assert!(context.has_subscribers::<Deposited>());
    }

    #[test]
    fn plans_can_raise_events() {
        let mut context = Context::new();
        subscribe_deposits(&mut context);
        context.add_plan(1.0, |context| {
            context.raise_mutation(Deposit(3)).unwrap();
        });
        context.enable_execution_statistics();
        context.execute();
        assert_eq!(*context.get_data_container::<Counter>().unwrap(), 3);
        // The observation has no subscribers and is not counted
        assert_eq!(
            context.get_execution_statistics().unwrap().events_raised,
            1
        );
    }

    // Modules

    fn module(id: &'static str, deps: &[&'static str]) -> ModuleDeclaration {
        let mut declaration = ModuleDeclaration::new(id, move |context: &mut Context| {
            trace(context, id);
            Ok(())
        });
        for dep in deps {
            declaration = declaration.depends_on(*dep);
        }
        declaration
    }

    #[test]
    fn modules_initialize_in_dependency_order() {
        let mut context = Context::new();
        context.register_module(module("c", &["b"])).unwrap();
        context.register_module(module("a", &[])).unwrap();
        context.register_module(module("b", &["a"])).unwrap();
        let order = context.init_modules().unwrap();
        assert_eq!(order, vec![ModuleId::from("a"), "b".into(), "c".into()]);
        assert_eq!(traced(&context), vec!["a", "b", "c"]);
        assert!(context.is_module_initialized(&"b".into()));
    }

    #[test]
    fn duplicate_module_is_rejected() {
        let mut context = Context::new();
        context.register_module(module("a", &[])).unwrap();
        assert!(matches!(
            context.register_module(module("a", &[])),
            Err(KernelError::DuplicateModule(id)) if id.as_str() == "a"
        ));
        context.init_modules().unwrap();
        assert!(matches!(
            context.register_module(module("a", &[])),
            Err(KernelError::DuplicateModule(_))
        ));
    }

    #[test]
    fn configuration_faults_abort_before_any_module_runs() {
        let mut context = Context::new();
        context.register_module(module("a", &[])).unwrap();
        context.register_module(module("b", &["c"])).unwrap();
        context.register_module(module("c", &["b"])).unwrap();
        let error = context.init_modules().unwrap_err();
        match error {
            KernelError::CircularModuleDependency(report) => {
                assert_eq!(
                    report.involved_modules(),
                    vec![ModuleId::from("b"), ModuleId::from("c")]
                );
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(traced(&context).is_empty());
        assert!(!context.is_module_registered(&"a".into()));
    }

    #[test]
    fn missing_dependency_is_a_configuration_fault() {
        let mut context = Context::new();
        context.register_module(module("b", &["a"])).unwrap();
        let error = context.init_modules().unwrap_err();
        assert_eq!(error.kind(), FaultKind::Configuration);
        assert!(traced(&context).is_empty());
    }

    #[test]
    fn later_modules_depend_on_initialized_ones() {
        let mut context = Context::new();
        context.register_module(module("a", &[])).unwrap();
        context.init_modules().unwrap();
        context.register_module(module("b", &["a"])).unwrap();
        assert_eq!(context.init_modules().unwrap(), vec![ModuleId::from("b")]);
        assert_eq!(traced(&context), vec!["a", "b"]);
    }

    #[test]
    fn module_init_error_propagates() {
        let mut context = Context::new();
        context
            .register_module(ModuleDeclaration::new("broken", |_| {
                Err(KernelError::UnknownProperty("missing".into()))
            }))
            .unwrap();
        assert!(matches!(
            context.init_modules(),
            Err(KernelError::UnknownProperty(_))
        ));
        assert!(!context.is_module_initialized(&"broken".into()));
    }
}
