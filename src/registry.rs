//! The instance registry.
//!
//! # Locks
//!
//! Two registry locks exist and are always taken in this order:
//!
//! 1. `backend`, the bound graphics device. Written by initialize, device
//!    loss, device restore and shutdown; read by everything that touches
//!    textures, including the per-frame sync point.
//! 2. `instances`, the handle map. Written only to insert or remove an entry;
//!    read to look a handle up or to snapshot the live set.
//!
//! Engine calls are never made while `instances` is held, and host callbacks
//! are never invoked while either lock is held, so a callback may call back
//! into the registry.
//!
//! Each instance additionally guards its texture binding with its own mutex
//! (see [`WebViewInstance`]).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use derivative::Derivative;

use crate::backend::{BackendTexture, GraphicsApi, GraphicsBackend, GraphicsContext};
use crate::config::Config;
use crate::dispatch::{
        DeviceEvent, DeviceEventCallback, Dispatcher, EventSink, LogCallback, MessageCallback,
        NavigationCallback,
};
use crate::engine::{HeadlessEngine, SessionParams, WebEngine};
use crate::error::{Error, Result};
use crate::instance::{InstanceState, WebViewInstance};
use crate::shutdown::ShutdownSignal;
use crate::types::{CreateParams, InstanceHandle, KeyEvent, MouseEvent, NavigationId, RenderEvent};

/// Storage directory used when neither the instance nor the config names one.
pub fn default_user_data_dir() -> PathBuf
{
        std::env::temp_dir().join("webtex")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle
{
        Uninitialized,
        Active,
        DeviceLost,
        ShuttingDown,
        Terminated,
}

/// The device binding of one Initialize/Shutdown cycle. `backend` is `None`
/// while the device is lost.
#[derive(Debug)]
struct BackendSlot
{
        api: GraphicsApi,
        backend: Option<GraphicsBackend>,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Registry
{
        config: Config,

        #[derivative(Debug = "ignore")]
        engine: Arc<dyn WebEngine>,

        backend: RwLock<Option<BackendSlot>>,
        instances: RwLock<HashMap<InstanceHandle, Arc<WebViewInstance>>>,
        next_handle: AtomicU32,
        next_navigation: AtomicU64,
        next_epoch: AtomicU64,
        dispatcher: Arc<Dispatcher>,
        shutdown: RwLock<ShutdownSignal>,
}

impl Registry
{
        pub fn new(
                config: Config,
                engine: Arc<dyn WebEngine>,
        ) -> Self
        {
                let shutdown = ShutdownSignal::new();

                let dispatcher = Arc::new(Dispatcher::new(config.dispatch, shutdown.clone()));

                log::info!("Registry created with the {} engine", engine.name());

                Self {
                        config,
                        engine,
                        backend: RwLock::new(None),
                        instances: RwLock::new(HashMap::new()),
                        next_handle: AtomicU32::new(1),
                        next_navigation: AtomicU64::new(1),
                        next_epoch: AtomicU64::new(1),
                        dispatcher,
                        shutdown: RwLock::new(shutdown),
                }
        }

        /// A registry backed by the built-in headless engine.
        pub fn with_headless_engine(config: Config) -> Self
        {
                let engine = Arc::new(HeadlessEngine::from_config(&config.engine));

                Self::new(config, engine)
        }

        fn signal(&self) -> ShutdownSignal
        {
                self.shutdown.read().unwrap_or_else(|e| e.into_inner()).clone()
        }

        /// Fails unless the registry is bound to a device and no shutdown was
        /// signalled.
        fn ensure_running(&self) -> Result<()>
        {
                if self.signal().is_signaled()
                {
                        return Err(Error::NotInitialized);
                }

                if self.backend.read().unwrap_or_else(|e| e.into_inner()).is_none()
                {
                        return Err(Error::NotInitialized);
                }

                Ok(())
        }

        fn lookup(
                &self,
                handle: InstanceHandle,
        ) -> Result<Arc<WebViewInstance>>
        {
                self.ensure_running()?;

                self.instances
                        .read()
                        .unwrap_or_else(|e| e.into_inner())
                        .get(&handle)
                        .cloned()
                        .ok_or(Error::InvalidHandle(handle.raw()))
        }

        fn snapshot(&self) -> Vec<Arc<WebViewInstance>>
        {
                self.instances
                        .read()
                        .unwrap_or_else(|e| e.into_inner())
                        .values()
                        .cloned()
                        .collect()
        }

        fn next_navigation_id(&self) -> NavigationId
        {
                NavigationId(self.next_navigation.fetch_add(1, Ordering::Relaxed))
        }

        fn allocate_handle(&self) -> Result<InstanceHandle>
        {
                self.next_handle
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
                        .ok()
                        .and_then(InstanceHandle::from_raw)
                        .ok_or_else(|| Error::Unknown("instance handle space exhausted".into()))
        }

        fn log(
                &self,
                level: log::Level,
                message: impl Into<String>,
        )
        {
                self.dispatcher.log(level, message);
        }

        // Lifecycle

        /// Binds the registry to the host's graphics device and starts a new
        /// Initialize/Shutdown cycle.
        pub fn initialize(
                &self,
                context: GraphicsContext,
        ) -> Result<()>
        {
                let api = context.api();

                {
                        let mut slot = self.backend.write().unwrap_or_else(|e| e.into_inner());

                        if slot.is_some()
                        {
                                return Err(Error::AlreadyInitialized);
                        }

                        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);

                        let backend = GraphicsBackend::new(context, self.config.texture_format, epoch)?;

                        let signal = ShutdownSignal::new();

                        self.dispatcher.rebind(signal.clone());

                        *self.shutdown.write().unwrap_or_else(|e| e.into_inner()) = signal;

                        *slot = Some(BackendSlot {
                                api,
                                backend: Some(backend),
                        });
                }

                self.log(log::Level::Info, format!("Initialized with the {api:?} backend"));

                Ok(())
        }

        pub fn is_initialized(&self) -> bool
        {
                self.ensure_running().is_ok()
        }

        pub fn graphics_api(&self) -> Option<GraphicsApi>
        {
                self.backend
                        .read()
                        .unwrap_or_else(|e| e.into_inner())
                        .as_ref()
                        .map(|slot| slot.api)
        }

        pub fn lifecycle(&self) -> Lifecycle
        {
                let signaled = self.signal().is_signaled();

                let slot = self.backend.read().unwrap_or_else(|e| e.into_inner());

                match (slot.as_ref(), signaled)
                {
                        (None, false) => Lifecycle::Uninitialized,
                        (None, true) => Lifecycle::Terminated,
                        (Some(_), true) => Lifecycle::ShuttingDown,
                        (Some(slot), false) if slot.backend.is_none() => Lifecycle::DeviceLost,
                        (Some(_), false) => Lifecycle::Active,
                }
        }

        /// First shutdown phase: raises the shutdown signal. Every later call
        /// fails with [`Error::NotInitialized`] and every engine worker stops
        /// at its next iteration. Returns `true` for the call that raised it.
        pub fn signal_shutdown(&self) -> bool
        {
                let raised = self.signal().signal();

                if raised
                {
                        log::info!("Shutdown signalled");
                }

                raised
        }

        /// Second shutdown phase: closes every instance, releases the device
        /// and unregisters all callbacks. Signals first when needed. Calling
        /// it again is a no-op.
        pub fn shutdown(&self)
        {
                self.signal_shutdown();

                let slot = self.backend.write().unwrap_or_else(|e| e.into_inner()).take();

                let instances: Vec<_> = self
                        .instances
                        .write()
                        .unwrap_or_else(|e| e.into_inner())
                        .drain()
                        .map(|(_, instance)| instance)
                        .collect();

                for instance in &instances
                {
                        self.dispatcher.retire(instance.handle());

                        instance.close();

                        instance.unbind();
                }

                if slot.is_some()
                {
                        log::info!("Shut down, {} instance(s) closed", instances.len());
                }

                self.dispatcher.clear();
        }

        // Instances

        /// Creates an instance and its texture. Navigation to
        /// `params.initial_url` starts asynchronously.
        ///
        /// While the device is lost the instance is created without a texture
        /// and gets one on restore.
        pub fn create_instance(
                &self,
                params: CreateParams,
        ) -> Result<InstanceHandle>
        {
                self.ensure_running()?;

                let handle = self.allocate_handle()?;

                let texture = {
                        let slot = self.backend.read().unwrap_or_else(|e| e.into_inner());

                        let slot = slot.as_ref().ok_or(Error::NotInitialized)?;

                        match slot.backend.as_ref()
                        {
                                Some(backend) if !backend.is_device_lost() =>
                                {
                                        Some(backend.create_texture(params.width, params.height)?)
                                }
                                _ if params.width == 0 || params.height == 0 =>
                                {
                                        return Err(Error::TextureCreationFailed(format!(
                                                "{}x{} is not a valid size",
                                                params.width, params.height
                                        )));
                                }
                                _ => None,
                        }
                };

                let user_data_dir = params
                        .user_data_dir
                        .clone()
                        .or_else(|| self.config.user_data_dir.clone())
                        .unwrap_or_else(default_user_data_dir);

                let initial_navigation = params.initial_url.as_ref().map(|_| self.next_navigation_id());

                self.dispatcher.register(handle);

                let session_params = SessionParams {
                        handle,
                        width: params.width,
                        height: params.height,
                        user_data_dir: user_data_dir.clone(),
                        initial_url: params.initial_url.clone(),
                        initial_navigation,
                        enable_dev_tools: params.enable_dev_tools,
                        shutdown: self.signal(),
                };

                let events = EventSink::new(handle, self.dispatcher.clone());

                let session = match self.engine.create_session(session_params, events)
                {
                        Ok(session) => session,
                        Err(e) =>
                        {
                                self.dispatcher.retire(handle);

                                if let Some(texture) = texture
                                {
                                        texture.release();
                                }

                                let error = Error::from(e);

                                self.log(log::Level::Error, format!("Creating instance {handle} failed: {error}"));

                                return Err(error);
                        }
                };

                let instance = Arc::new(WebViewInstance::new(
                        handle,
                        session,
                        params.width,
                        params.height,
                        texture,
                        params.enable_dev_tools,
                        user_data_dir,
                ));

                let published = {
                        let slot = self.backend.read().unwrap_or_else(|e| e.into_inner());

                        match slot.as_ref()
                        {
                                Some(slot) if !self.signal().is_signaled() =>
                                {
                                        // The device may have been lost or replaced while
                                        // the session was being created.
                                        let current_epoch = slot.backend.as_ref().map(GraphicsBackend::epoch);
                                        let bound_epoch = instance.texture().map(|t| t.epoch());

                                        let rebind_error = match slot.backend.as_ref()
                                        {
                                                Some(backend) if bound_epoch != current_epoch =>
                                                {
                                                        instance.rebind(backend).err()
                                                }
                                                Some(_) => None,
                                                None =>
                                                {
                                                        instance.unbind();
                                                        None
                                                }
                                        };

                                        self.instances
                                                .write()
                                                .unwrap_or_else(|e| e.into_inner())
                                                .insert(handle, instance.clone());

                                        Ok(rebind_error)
                                }
                                _ => Err(Error::NotInitialized),
                        }
                };

                let rebind_error = match published
                {
                        Ok(rebind_error) => rebind_error,
                        Err(error) =>
                        {
                                self.dispatcher.retire(handle);

                                instance.close();
                                instance.unbind();

                                return Err(error);
                        }
                };

                if let Some(error) = rebind_error
                {
                        self.log(
                                log::Level::Warn,
                                format!("Instance {handle} has no texture yet: {error}"),
                        );
                }

                self.log(
                        log::Level::Info,
                        format!(
                                "Created instance {handle} ({}x{}, storage {}, dev tools {})",
                                params.width,
                                params.height,
                                instance.user_data_dir().display(),
                                if instance.dev_tools() { "on" } else { "off" }
                        ),
                );

                Ok(handle)
        }

        /// Removes and closes an instance. Once this returns, no callback for
        /// `handle` is delivered. A second call fails with
        /// [`Error::InvalidHandle`].
        pub fn destroy_instance(
                &self,
                handle: InstanceHandle,
        ) -> Result<()>
        {
                self.ensure_running()?;

                let instance = self
                        .instances
                        .write()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&handle)
                        .ok_or(Error::InvalidHandle(handle.raw()))?;

                self.dispatcher.retire(handle);

                instance.close();
                instance.unbind();

                self.log(log::Level::Info, format!("Destroyed instance {handle}"));

                Ok(())
        }

        /// Recreates the texture of `handle` at the new size.
        pub fn resize_instance(
                &self,
                handle: InstanceHandle,
                width: u32,
                height: u32,
        ) -> Result<()>
        {
                let instance = self.lookup(handle)?;

                let slot = self.backend.read().unwrap_or_else(|e| e.into_inner());

                instance.resize(slot.as_ref().and_then(|slot| slot.backend.as_ref()), width, height)
        }

        pub fn instance_count(&self) -> usize
        {
                self.instances.read().unwrap_or_else(|e| e.into_inner()).len()
        }

        pub fn handles(&self) -> Vec<InstanceHandle>
        {
                let mut handles: Vec<_> = self
                        .instances
                        .read()
                        .unwrap_or_else(|e| e.into_inner())
                        .keys()
                        .copied()
                        .collect();

                handles.sort();
                handles
        }

        pub fn instance_size(
                &self,
                handle: InstanceHandle,
        ) -> Result<(u32, u32)>
        {
                Ok(self.lookup(handle)?.size())
        }

        pub fn instance_state(
                &self,
                handle: InstanceHandle,
        ) -> Result<InstanceState>
        {
                Ok(self.lookup(handle)?.state())
        }

        /// The texture the host should sample for `handle`, `None` while it
        /// waits for a device.
        pub fn texture(
                &self,
                handle: InstanceHandle,
        ) -> Result<Option<BackendTexture>>
        {
                Ok(self.lookup(handle)?.texture())
        }

        // Navigation

        pub fn navigate(
                &self,
                handle: InstanceHandle,
                url: &str,
        ) -> Result<NavigationId>
        {
                let instance = self.lookup(handle)?;

                let id = self.next_navigation_id();

                instance.navigate(url, id)?;

                Ok(id)
        }

        /// Loads `html` as a document. Its URL is reported as `about:blank`.
        pub fn navigate_to_raw(
                &self,
                handle: InstanceHandle,
                html: &str,
        ) -> Result<NavigationId>
        {
                let instance = self.lookup(handle)?;

                let id = self.next_navigation_id();

                instance.navigate_to_string(html, id)?;

                Ok(id)
        }

        pub fn execute_script(
                &self,
                handle: InstanceHandle,
                script: &str,
        ) -> Result<()>
        {
                self.lookup(handle)?.execute_script(script)
        }

        /// `None` when there is no history entry to go back to.
        pub fn go_back(
                &self,
                handle: InstanceHandle,
        ) -> Result<Option<NavigationId>>
        {
                let instance = self.lookup(handle)?;

                let id = self.next_navigation_id();

                Ok(instance.go_back(id)?.then_some(id))
        }

        /// `None` when there is no history entry to go forward to.
        pub fn go_forward(
                &self,
                handle: InstanceHandle,
        ) -> Result<Option<NavigationId>>
        {
                let instance = self.lookup(handle)?;

                let id = self.next_navigation_id();

                Ok(instance.go_forward(id)?.then_some(id))
        }

        /// Best-effort snapshot; history may change right after.
        pub fn can_go_back(
                &self,
                handle: InstanceHandle,
        ) -> Result<bool>
        {
                Ok(self.lookup(handle)?.can_go_back())
        }

        pub fn can_go_forward(
                &self,
                handle: InstanceHandle,
        ) -> Result<bool>
        {
                Ok(self.lookup(handle)?.can_go_forward())
        }

        // Input

        /// Forwards a mouse event. Coordinates outside `[0, 1]` are clamped.
        pub fn send_mouse_event(
                &self,
                handle: InstanceHandle,
                event: MouseEvent,
        ) -> Result<()>
        {
                self.lookup(handle)?.send_mouse(event)
        }

        pub fn send_key_event(
                &self,
                handle: InstanceHandle,
                event: KeyEvent,
        ) -> Result<()>
        {
                self.lookup(handle)?.send_key(event)
        }

        // Render thread

        /// Reacts to a device that reported itself lost since the last pass.
        /// Returns `true` when the device is currently lost.
        fn poll_device(&self) -> Result<bool>
        {
                let state = {
                        let slot = self.backend.read().unwrap_or_else(|e| e.into_inner());

                        let slot = slot.as_ref().ok_or(Error::NotInitialized)?;

                        slot.backend.as_ref().map(GraphicsBackend::is_device_lost)
                };

                match state
                {
                        None => Ok(true),
                        Some(true) =>
                        {
                                self.device_lost()?;
                                Ok(true)
                        }
                        Some(false) => Ok(false),
                }
        }

        /// The render-thread sync point: copies every fresh engine frame into
        /// its instance texture. Returns how many textures changed.
        ///
        /// Never creates or destroys instances. A no-op while the device is
        /// lost. A failure on one instance is logged and does not stop the
        /// pass.
        pub fn update_textures(&self) -> Result<usize>
        {
                self.ensure_running()?;

                if self.poll_device()?
                {
                        return Ok(0);
                }

                let signal = self.signal();

                let mut updated = 0;
                let mut failures = Vec::new();

                {
                        let slot = self.backend.read().unwrap_or_else(|e| e.into_inner());

                        let Some(backend) = slot.as_ref().and_then(|slot| slot.backend.as_ref())
                        else
                        {
                                return Ok(0);
                        };

                        for instance in self.snapshot()
                        {
                                if signal.is_signaled()
                                {
                                        break;
                                }

                                match instance.update_texture(backend, self.config.flip_y)
                                {
                                        Ok(true) => updated += 1,
                                        Ok(false) =>
                                        {}
                                        Err(e) => failures.push((instance.handle(), e)),
                                }
                        }
                }

                for (handle, error) in failures
                {
                        self.log(log::Level::Warn, format!("Updating texture of {handle} failed: {error}"));
                }

                Ok(updated)
        }

        /// Sync point for a single instance. Returns whether its texture
        /// changed.
        pub fn update_texture(
                &self,
                handle: InstanceHandle,
        ) -> Result<bool>
        {
                let instance = self.lookup(handle)?;

                if self.poll_device()?
                {
                        return Ok(false);
                }

                let slot = self.backend.read().unwrap_or_else(|e| e.into_inner());

                match slot.as_ref().and_then(|slot| slot.backend.as_ref())
                {
                        Some(backend) => instance.update_texture(backend, self.config.flip_y),
                        None => Ok(false),
                }
        }

        /// Entry point for render events issued from the host's graphics
        /// thread. Only [`RenderEvent::UpdateTexture`] does work; the other ids
        /// are accepted and ignored.
        pub fn on_render_event(
                &self,
                event: RenderEvent,
                handle: Option<InstanceHandle>,
        ) -> Result<()>
        {
                match (event, handle)
                {
                        (RenderEvent::UpdateTexture, Some(handle)) => self.update_texture(handle).map(|_| ()),
                        (RenderEvent::UpdateTexture, None) => self.update_textures().map(|_| ()),
                        (RenderEvent::Initialize | RenderEvent::Shutdown, _) =>
                        {
                                log::debug!("Ignoring render event {event:?}");
                                Ok(())
                        }
                }
        }

        // Device

        /// Moves to the device-lost state: every texture is released and the
        /// sync point does nothing until [`Registry::device_restored`]. Calling
        /// it while already lost is a no-op.
        pub fn device_lost(&self) -> Result<()>
        {
                self.ensure_running()?;

                let instances = {
                        let mut slot = self.backend.write().unwrap_or_else(|e| e.into_inner());

                        let slot = slot.as_mut().ok_or(Error::NotInitialized)?;

                        if slot.backend.take().is_none()
                        {
                                return Ok(());
                        }

                        let instances = self.snapshot();

                        for instance in &instances
                        {
                                instance.unbind();
                        }

                        instances
                };

                for instance in &instances
                {
                        instance.device_lost();
                }

                self.log(
                        log::Level::Warn,
                        format!("Graphics device lost, {} texture(s) released", instances.len()),
                );

                self.dispatcher.device_event(DeviceEvent::Lost);

                Ok(())
        }

        /// Binds a new device and recreates every instance texture on it
        /// before returning.
        pub fn device_restored(
                &self,
                context: GraphicsContext,
        ) -> Result<()>
        {
                self.ensure_running()?;

                let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);

                let (instances, failures) = {
                        let mut slot = self.backend.write().unwrap_or_else(|e| e.into_inner());

                        let slot = slot.as_mut().ok_or(Error::NotInitialized)?;

                        if context.api() != slot.api
                        {
                                return Err(Error::UnsupportedGraphicsApi(context.api() as i32));
                        }

                        let backend = GraphicsBackend::new(context, self.config.texture_format, epoch)?;

                        let instances = self.snapshot();

                        if slot.backend.take().is_some()
                        {
                                for instance in &instances
                                {
                                        instance.unbind();
                                }
                        }

                        let failures: Vec<_> = instances
                                .iter()
                                .filter_map(|instance| {
                                        instance.rebind(&backend).err().map(|e| (instance.handle(), e))
                                })
                                .collect();

                        slot.backend = Some(backend);

                        (instances, failures)
                };

                for instance in &instances
                {
                        instance.device_restored();
                }

                for (handle, error) in failures
                {
                        self.log(log::Level::Error, format!("Recreating texture of {handle} failed: {error}"));
                }

                self.log(
                        log::Level::Info,
                        format!("Graphics device restored, {} texture(s) recreated", instances.len()),
                );

                self.dispatcher.device_event(DeviceEvent::Restored);

                Ok(())
        }

        // Callbacks

        pub fn set_log_callback(
                &self,
                callback: Option<LogCallback>,
        )
        {
                self.dispatcher.set_log_callback(callback);
        }

        pub fn set_navigation_callback(
                &self,
                callback: Option<NavigationCallback>,
        )
        {
                self.dispatcher.set_navigation_callback(callback);
        }

        pub fn set_message_callback(
                &self,
                callback: Option<MessageCallback>,
        )
        {
                self.dispatcher.set_message_callback(callback);
        }

        pub fn set_device_event_callback(
                &self,
                callback: Option<DeviceEventCallback>,
        )
        {
                self.dispatcher.set_device_event_callback(callback);
        }

        /// Delivers queued events on the calling thread. Always zero in
        /// immediate dispatch mode.
        pub fn dispatch_pending(&self) -> usize
        {
                self.dispatcher.dispatch_pending()
        }
}

impl Drop for Registry
{
        fn drop(&mut self)
        {
                self.shutdown();
        }
}

#[cfg(test)]
mod tests
{
        use super::*;

        use crate::backend::SoftwareDevice;

        fn registry() -> Registry
        {
                let _ = env_logger::builder().is_test(true).try_init();

                let dir = std::env::temp_dir().join("webtex-registry-unit");

                let config = Config {
                        user_data_dir: Some(dir),
                        ..Config::default()
                };

                Registry::with_headless_engine(config)
        }

        #[test]
        fn lifecycle_follows_initialize_and_shutdown()
        {
                let registry = registry();

                assert_eq!(registry.lifecycle(), Lifecycle::Uninitialized);
                assert_eq!(registry.create_instance(CreateParams::new(4, 4)), Err(Error::NotInitialized));

                registry.initialize(GraphicsContext::software()).unwrap();

                assert_eq!(registry.lifecycle(), Lifecycle::Active);
                assert_eq!(registry.graphics_api(), Some(GraphicsApi::Software));
                assert_eq!(
                        registry.initialize(GraphicsContext::software()),
                        Err(Error::AlreadyInitialized)
                );

                assert!(registry.signal_shutdown());
                assert!(!registry.signal_shutdown());
                assert_eq!(registry.lifecycle(), Lifecycle::ShuttingDown);

                registry.shutdown();
                registry.shutdown();

                assert_eq!(registry.lifecycle(), Lifecycle::Terminated);
                assert!(!registry.is_initialized());
        }

        #[test]
        fn a_lost_device_cannot_be_bound()
        {
                let registry = registry();
                let device = SoftwareDevice::new();
                device.lose();

                let err = registry.initialize(GraphicsContext::Software(device)).unwrap_err();

                assert_eq!(err.code(), -101);
                assert_eq!(registry.lifecycle(), Lifecycle::Uninitialized);
        }

        #[test]
        fn handles_keep_counting_across_cycles()
        {
                let registry = registry();

                registry.initialize(GraphicsContext::software()).unwrap();
                let first = registry.create_instance(CreateParams::new(4, 4)).unwrap();
                registry.shutdown();

                registry.initialize(GraphicsContext::software()).unwrap();
                let second = registry.create_instance(CreateParams::new(4, 4)).unwrap();

                assert!(second > first);
                assert_eq!(registry.instance_count(), 1);
        }

        #[test]
        fn zero_sized_instances_are_refused()
        {
                let registry = registry();

                registry.initialize(GraphicsContext::software()).unwrap();

                let err = registry.create_instance(CreateParams::new(0, 600)).unwrap_err();

                assert_eq!(err.code(), -102);
                assert_eq!(registry.instance_count(), 0);
        }

        #[test]
        fn device_loss_and_restore_move_the_lifecycle()
        {
                let registry = registry();

                registry.initialize(GraphicsContext::software()).unwrap();
                registry.device_lost().unwrap();

                assert_eq!(registry.lifecycle(), Lifecycle::DeviceLost);
                assert_eq!(registry.update_textures(), Ok(0));

                registry.device_restored(GraphicsContext::software()).unwrap();

                assert_eq!(registry.lifecycle(), Lifecycle::Active);
        }

        #[test]
        fn render_events_route_to_the_sync_point()
        {
                let registry = registry();

                registry.initialize(GraphicsContext::software()).unwrap();

                let handle = registry.create_instance(CreateParams::new(4, 4)).unwrap();

                assert!(registry.on_render_event(RenderEvent::Initialize, None).is_ok());
                assert!(registry.on_render_event(RenderEvent::UpdateTexture, Some(handle)).is_ok());
                assert!(registry.on_render_event(RenderEvent::UpdateTexture, None).is_ok());

                let missing = InstanceHandle::from_raw(9999).unwrap();

                assert_eq!(
                        registry.on_render_event(RenderEvent::UpdateTexture, Some(missing)),
                        Err(Error::InvalidHandle(9999))
                );
        }
}
