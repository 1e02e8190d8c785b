//! Delivery of engine notifications to the host.
//!
//! The host registers at most one callback per category (log, navigation,
//! message, device event). Engines never call those directly; they go through
//! an [`EventSink`], which routes every event through the [`Dispatcher`] so
//! that two guarantees hold:
//!
//! - nothing is delivered once the shutdown signal is raised, and
//! - no delivery for a handle starts after [`Dispatcher::retire`] returned.
//!
//! Engine log lines are tagged with their instance and follow the same rule.
//!
//! In [`DispatchMode::Immediate`] callbacks run on the thread that produced
//! the event. In [`DispatchMode::Queued`] events wait in a FIFO until the host
//! drains them with [`Dispatcher::dispatch_pending`].

use std::cell::Cell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::Duration;

use derivative::Derivative;

use crate::config::DispatchMode;
use crate::shutdown::ShutdownSignal;
use crate::types::{InstanceHandle, NavigationId};

pub type LogCallback = Arc<dyn Fn(log::Level, &str) + Send + Sync>;
pub type NavigationCallback = Arc<dyn Fn(&NavigationCompleted) + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(InstanceHandle, &str) + Send + Sync>;
pub type DeviceEventCallback = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// Completion of exactly one navigation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationCompleted
{
        pub handle: InstanceHandle,
        pub navigation_id: NavigationId,

        /// Final URL on success, the requested one on failure.
        pub url: String,

        pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum DeviceEvent
{
        Lost = 0,
        Restored = 1,
}

#[derive(Debug, Clone)]
enum Event
{
        Log
        {
                handle: Option<InstanceHandle>,
                level: log::Level,
                message: String,
        },
        Navigation(NavigationCompleted),
        Message
        {
                handle: InstanceHandle,
                payload: String,
        },
        Device(DeviceEvent),
}

impl Event
{
        fn handle(&self) -> Option<InstanceHandle>
        {
                match self
                {
                        Event::Navigation(completed) => Some(completed.handle),
                        Event::Message {
                                handle, ..
                        } => Some(*handle),
                        Event::Log {
                                handle, ..
                        } => *handle,
                        Event::Device(_) => None,
                }
        }
}

#[derive(Default)]
struct Callbacks
{
        log: Option<LogCallback>,
        navigation: Option<NavigationCallback>,
        message: Option<MessageCallback>,
        device: Option<DeviceEventCallback>,
}

/// Handles that may still receive events, and how many deliveries are
/// executing for each right now.
#[derive(Debug, Default)]
struct Liveness
{
        live: HashSet<InstanceHandle>,
        in_flight: HashMap<InstanceHandle, usize>,
}

/// How long [`Dispatcher::retire`] waits for deliveries running on other
/// threads before giving up on them.
pub const RETIRE_GRACE: Duration = Duration::from_millis(250);

thread_local! {
        /// Number of deliveries running further up this thread's stack.
        static DELIVERY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

fn inside_delivery() -> bool
{
        DELIVERY_DEPTH.with(|depth| depth.get() > 0)
}

struct DeliveryGuard;

impl DeliveryGuard
{
        fn enter() -> Self
        {
                DELIVERY_DEPTH.with(|depth| depth.set(depth.get() + 1));

                Self
        }
}

impl Drop for DeliveryGuard
{
        fn drop(&mut self)
        {
                DELIVERY_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
        }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Dispatcher
{
        mode: DispatchMode,

        shutdown: RwLock<ShutdownSignal>,

        #[derivative(Debug = "ignore")]
        callbacks: RwLock<Callbacks>,

        liveness: Mutex<Liveness>,

        #[derivative(Debug = "ignore")]
        delivered: Condvar,

        queue: Mutex<VecDeque<Event>>,
}

impl Dispatcher
{
        pub fn new(
                mode: DispatchMode,
                shutdown: ShutdownSignal,
        ) -> Self
        {
                Self {
                        mode,
                        shutdown: RwLock::new(shutdown),
                        callbacks: RwLock::new(Callbacks::default()),
                        liveness: Mutex::new(Liveness::default()),
                        delivered: Condvar::new(),
                        queue: Mutex::new(VecDeque::new()),
                }
        }

        /// Binds the dispatcher to the signal of a new Initialize/Shutdown
        /// cycle.
        pub fn rebind(
                &self,
                shutdown: ShutdownSignal,
        )
        {
                *self.shutdown.write().unwrap_or_else(|e| e.into_inner()) = shutdown;
        }

        fn is_shut_down(&self) -> bool
        {
                self.shutdown
                        .read()
                        .unwrap_or_else(|e| e.into_inner())
                        .is_signaled()
        }

        pub fn set_log_callback(
                &self,
                callback: Option<LogCallback>,
        )
        {
                self.callbacks.write().unwrap_or_else(|e| e.into_inner()).log = callback;
        }

        pub fn set_navigation_callback(
                &self,
                callback: Option<NavigationCallback>,
        )
        {
                self.callbacks.write().unwrap_or_else(|e| e.into_inner()).navigation = callback;
        }

        pub fn set_message_callback(
                &self,
                callback: Option<MessageCallback>,
        )
        {
                self.callbacks.write().unwrap_or_else(|e| e.into_inner()).message = callback;
        }

        pub fn set_device_event_callback(
                &self,
                callback: Option<DeviceEventCallback>,
        )
        {
                self.callbacks.write().unwrap_or_else(|e| e.into_inner()).device = callback;
        }

        /// Allows events for `handle` to reach the host.
        pub fn register(
                &self,
                handle: InstanceHandle,
        )
        {
                let mut liveness = self.liveness.lock().unwrap_or_else(|e| e.into_inner());

                liveness.live.insert(handle);
        }

        pub fn is_live(
                &self,
                handle: InstanceHandle,
        ) -> bool
        {
                self.liveness
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .live
                        .contains(&handle)
        }

        /// Stops all delivery for `handle`: no delivery for it starts once
        /// this returns.
        ///
        /// Called from inside a callback it never waits, so callbacks may
        /// destroy any instance, their own included. Called from anywhere else
        /// it waits up to [`RETIRE_GRACE`] for deliveries already running on
        /// other threads, then returns regardless.
        pub fn retire(
                &self,
                handle: InstanceHandle,
        )
        {
                let mut liveness = self.liveness.lock().unwrap_or_else(|e| e.into_inner());

                liveness.live.remove(&handle);

                if inside_delivery()
                {
                        return;
                }

                let (liveness, waited) = self
                        .delivered
                        .wait_timeout_while(liveness, RETIRE_GRACE, |liveness| {
                                liveness.in_flight.contains_key(&handle)
                        })
                        .unwrap_or_else(|e| e.into_inner());

                drop(liveness);

                if waited.timed_out()
                {
                        log::warn!("{handle} retired while a callback for it is still running");
                }
        }

        /// Forgets every handle, drops queued events and unregisters all
        /// callbacks. Called at the end of shutdown.
        pub fn clear(&self)
        {
                {
                        let mut liveness = self.liveness.lock().unwrap_or_else(|e| e.into_inner());

                        liveness.live.clear();
                }

                self.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();

                *self.callbacks.write().unwrap_or_else(|e| e.into_inner()) = Callbacks::default();
        }

        pub fn pending(&self) -> usize
        {
                self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
        }

        /// Logs through the `log` facade and forwards the message to the host
        /// log callback.
        pub fn log(
                &self,
                level: log::Level,
                message: impl Into<String>,
        )
        {
                let message = message.into();

                log::log!(level, "{message}");

                self.emit(Event::Log {
                        handle: None,
                        level,
                        message,
                });
        }

        pub fn navigation_completed(
                &self,
                completed: NavigationCompleted,
        )
        {
                self.emit(Event::Navigation(completed));
        }

        pub fn message_received(
                &self,
                handle: InstanceHandle,
                payload: impl Into<String>,
        )
        {
                self.emit(Event::Message {
                        handle,
                        payload: payload.into(),
                });
        }

        pub fn device_event(
                &self,
                event: DeviceEvent,
        )
        {
                self.emit(Event::Device(event));
        }

        /// Delivers queued events in arrival order on the calling thread.
        /// Returns how many events reached a callback.
        pub fn dispatch_pending(&self) -> usize
        {
                let mut delivered = 0;

                loop
                {
                        let event = self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();

                        let Some(event) = event
                        else
                        {
                                break;
                        };

                        if self.deliver(event)
                        {
                                delivered += 1;
                        }
                }

                delivered
        }

        fn emit(
                &self,
                event: Event,
        )
        {
                if self.is_shut_down()
                {
                        return;
                }

                match self.mode
                {
                        DispatchMode::Immediate =>
                        {
                                self.deliver(event);
                        }
                        DispatchMode::Queued =>
                        {
                                if let Some(handle) = event.handle()
                                {
                                        if !self.is_live(handle)
                                        {
                                                return;
                                        }
                                }

                                self.queue.lock().unwrap_or_else(|e| e.into_inner()).push_back(event);
                        }
                }
        }

        fn deliver(
                &self,
                event: Event,
        ) -> bool
        {
                if self.is_shut_down()
                {
                        return false;
                }

                match event.handle()
                {
                        Some(handle) => self.deliver_for(handle, event),
                        None => self.invoke(&event),
                }
        }

        fn deliver_for(
                &self,
                handle: InstanceHandle,
                event: Event,
        ) -> bool
        {
                {
                        let mut liveness = self.liveness.lock().unwrap_or_else(|e| e.into_inner());

                        if !liveness.live.contains(&handle)
                        {
                                return false;
                        }

                        *liveness.in_flight.entry(handle).or_insert(0) += 1;
                }

                let delivered = {
                        let _guard = DeliveryGuard::enter();

                        self.invoke(&event)
                };

                let mut liveness = self.liveness.lock().unwrap_or_else(|e| e.into_inner());

                if let Some(count) = liveness.in_flight.get_mut(&handle)
                {
                        *count -= 1;

                        if *count == 0
                        {
                                liveness.in_flight.remove(&handle);
                        }
                }

                self.delivered.notify_all();

                delivered
        }

        /// Runs the callback for `event` without holding the callback lock, so
        /// callbacks may replace callbacks.
        fn invoke(
                &self,
                event: &Event,
        ) -> bool
        {
                let callbacks = self.callbacks.read().unwrap_or_else(|e| e.into_inner());

                match event
                {
                        Event::Log {
                                level,
                                message,
                                ..
                        } =>
                        {
                                let Some(callback) = callbacks.log.clone()
                                else
                                {
                                        return false;
                                };

                                drop(callbacks);

                                callback(*level, message);
                        }
                        Event::Navigation(completed) =>
                        {
                                let Some(callback) = callbacks.navigation.clone()
                                else
                                {
                                        return false;
                                };

                                drop(callbacks);

                                callback(completed);
                        }
                        Event::Message {
                                handle,
                                payload,
                        } =>
                        {
                                let Some(callback) = callbacks.message.clone()
                                else
                                {
                                        return false;
                                };

                                drop(callbacks);

                                callback(*handle, payload);
                        }
                        Event::Device(device_event) =>
                        {
                                let Some(callback) = callbacks.device.clone()
                                else
                                {
                                        return false;
                                };

                                drop(callbacks);

                                callback(*device_event);
                        }
                }

                true
        }
}

/// Per-instance emitter handed to an engine session.
#[derive(Debug, Clone)]
pub struct EventSink
{
        handle: InstanceHandle,
        dispatcher: Arc<Dispatcher>,
}

impl EventSink
{
        pub fn new(
                handle: InstanceHandle,
                dispatcher: Arc<Dispatcher>,
        ) -> Self
        {
                Self {
                        handle,
                        dispatcher,
                }
        }

        pub fn handle(&self) -> InstanceHandle
        {
                self.handle
        }

        pub fn navigation_completed(
                &self,
                navigation_id: NavigationId,
                url: impl Into<String>,
                success: bool,
        )
        {
                self.dispatcher.navigation_completed(NavigationCompleted {
                        handle: self.handle,
                        navigation_id,
                        url: url.into(),
                        success,
                });
        }

        pub fn message_received(
                &self,
                payload: impl Into<String>,
        )
        {
                self.dispatcher.message_received(self.handle, payload);
        }

        /// Logs a line tagged with this instance. The host callback only sees
        /// it while the instance is live.
        pub fn log(
                &self,
                level: log::Level,
                message: impl std::fmt::Display,
        )
        {
                let message = format!("[{}] {message}", self.handle);

                log::log!(level, "{message}");

                self.dispatcher.emit(Event::Log {
                        handle: Some(self.handle),
                        level,
                        message,
                });
        }

        /// Reports an asynchronous engine failure. The instance stays usable.
        pub fn report_error(
                &self,
                error: &crate::engine::EngineError,
        )
        {
                self.log(log::Level::Error, error);
        }

        /// `true` once the instance was destroyed or the registry shut down.
        /// Engines use this to stop producing work early.
        pub fn is_closed(&self) -> bool
        {
                self.dispatcher.is_shut_down() || !self.dispatcher.is_live(self.handle)
        }
}
