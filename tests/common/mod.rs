#![allow(dead_code)]

use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use webtex::backend::SoftwareDevice;
use webtex::config::{Config, DispatchMode};
use webtex::dispatch::EventSink;
use webtex::engine::{EngineError, EngineSession, Frame, SessionParams, WebEngine};
use webtex::types::PixelMouseEvent;
use webtex::{
        DeviceEvent, GraphicsContext, InstanceHandle, KeyEvent, NavigationCompleted, NavigationId, Registry,
};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logging()
{
        let _ = env_logger::builder().is_test(true).try_init();
}

pub fn test_config(
        dir: &std::path::Path,
        load_delay_ms: u64,
) -> Config
{
        let mut config = Config::default();

        config.user_data_dir = Some(dir.to_path_buf());
        config.show_start_message = false;
        config.show_exit_message = false;
        config.engine.load_delay_ms = load_delay_ms;

        config
}

/// A software-backed registry with every callback wired to a channel.
pub struct Harness
{
        pub registry: Arc<Registry>,
        pub device: SoftwareDevice,
        pub navigations: Receiver<NavigationCompleted>,
        pub messages: Receiver<(InstanceHandle, String)>,
        pub device_events: Receiver<DeviceEvent>,
        pub dir: tempfile::TempDir,
}

impl Harness
{
        pub fn headless(load_delay_ms: u64) -> Self
        {
                Self::build(load_delay_ms, DispatchMode::Immediate, None)
        }

        pub fn queued(load_delay_ms: u64) -> Self
        {
                Self::build(load_delay_ms, DispatchMode::Queued, None)
        }

        pub fn with_engine(engine: Arc<dyn WebEngine>) -> Self
        {
                Self::build(0, DispatchMode::Immediate, Some(engine))
        }

        fn build(
                load_delay_ms: u64,
                dispatch: DispatchMode,
                engine: Option<Arc<dyn WebEngine>>,
        ) -> Self
        {
                Self::configured(engine, |config| {
                        config.engine.load_delay_ms = load_delay_ms;
                        config.dispatch = dispatch;
                })
        }

        /// Like `with_engine`, with a chance to adjust the configuration first.
        pub fn configured(
                engine: Option<Arc<dyn WebEngine>>,
                configure: impl FnOnce(&mut Config),
        ) -> Self
        {
                init_logging();

                let dir = tempfile::tempdir().unwrap();

                let mut config = test_config(dir.path(), 0);
                configure(&mut config);

                let registry = match engine
                {
                        Some(engine) => Registry::new(config, engine),
                        None => Registry::with_headless_engine(config),
                };

                let registry = Arc::new(registry);

                let (navigation_tx, navigations) = mpsc::channel();
                let navigation_tx = Mutex::new(navigation_tx);

                registry.set_navigation_callback(Some(Arc::new(move |completed: &NavigationCompleted| {
                        let _ = navigation_tx.lock().unwrap().send(completed.clone());
                })));

                let (message_tx, messages) = mpsc::channel();
                let message_tx = Mutex::new(message_tx);

                registry.set_message_callback(Some(Arc::new(move |handle: InstanceHandle, payload: &str| {
                        let _ = message_tx.lock().unwrap().send((handle, payload.to_string()));
                })));

                let (device_tx, device_events) = mpsc::channel();
                let device_tx = Mutex::new(device_tx);

                registry.set_device_event_callback(Some(Arc::new(move |event: DeviceEvent| {
                        let _ = device_tx.lock().unwrap().send(event);
                })));

                let device = SoftwareDevice::new();

                registry.initialize(GraphicsContext::Software(device.clone())).unwrap();

                Self {
                        registry,
                        device,
                        navigations,
                        messages,
                        device_events,
                        dir,
                }
        }

        /// Waits for the completion of `id`, skipping unrelated completions.
        pub fn wait_for(
                &self,
                id: NavigationId,
        ) -> NavigationCompleted
        {
                let deadline = Instant::now() + TIMEOUT;

                loop
                {
                        self.registry.dispatch_pending();

                        let left = deadline.saturating_duration_since(Instant::now());

                        assert!(!left.is_zero(), "navigation {id} never completed");

                        match self.navigations.recv_timeout(left.min(Duration::from_millis(20)))
                        {
                                Ok(completed) if completed.navigation_id == id => return completed,
                                _ =>
                                {}
                        }
                }
        }

        /// Runs the sync point until it copies at least one frame.
        pub fn pump_until_copied(&self) -> usize
        {
                let deadline = Instant::now() + TIMEOUT;

                loop
                {
                        let copied = self.registry.update_textures().unwrap();

                        if copied > 0
                        {
                                return copied;
                        }

                        assert!(Instant::now() < deadline, "no frame was copied");

                        std::thread::sleep(Duration::from_millis(5));
                }
        }
}

/// Input as the session received it.
#[derive(Debug, Clone, PartialEq)]
pub enum Input
{
        Mouse(PixelMouseEvent),
        Key(KeyEvent),
}

/// Session that records input and completes navigations on the calling
/// thread. Hands out at most one frame.
pub struct RecordingSession
{
        events: EventSink,
        inputs: Arc<Mutex<Vec<Input>>>,
        frame: Mutex<Option<Frame>>,
}

impl RecordingSession
{
        fn new(
                events: EventSink,
                inputs: Arc<Mutex<Vec<Input>>>,
        ) -> Self
        {
                Self {
                        events,
                        inputs,
                        frame: Mutex::new(None),
                }
        }
}

impl EngineSession for RecordingSession
{
        fn navigate(
                &self,
                url: &str,
                id: NavigationId,
        ) -> Result<(), EngineError>
        {
                self.events.navigation_completed(id, url, true);
                Ok(())
        }

        fn navigate_to_string(
                &self,
                _: &str,
                id: NavigationId,
        ) -> Result<(), EngineError>
        {
                self.events.navigation_completed(id, "about:blank", true);
                Ok(())
        }

        fn execute_script(
                &self,
                script: &str,
        ) -> Result<(), EngineError>
        {
                self.events.message_received(script);
                Ok(())
        }

        fn go_back(
                &self,
                _: NavigationId,
        ) -> Result<bool, EngineError>
        {
                Ok(false)
        }

        fn go_forward(
                &self,
                _: NavigationId,
        ) -> Result<bool, EngineError>
        {
                Ok(false)
        }

        fn can_go_back(&self) -> bool
        {
                false
        }

        fn can_go_forward(&self) -> bool
        {
                false
        }

        fn resize(
                &self,
                _: u32,
                _: u32,
        ) -> Result<(), EngineError>
        {
                Ok(())
        }

        fn send_mouse(
                &self,
                event: PixelMouseEvent,
        ) -> Result<(), EngineError>
        {
                self.inputs.lock().unwrap().push(Input::Mouse(event));
                Ok(())
        }

        fn send_key(
                &self,
                event: KeyEvent,
        ) -> Result<(), EngineError>
        {
                self.inputs.lock().unwrap().push(Input::Key(event));
                Ok(())
        }

        fn try_take_frame(&self) -> Option<Frame>
        {
                self.frame.lock().unwrap().take()
        }

        fn close(&self) {}
}

#[derive(Default)]
pub struct RecordingEngine
{
        pub inputs: Arc<Mutex<Vec<Input>>>,
}

impl WebEngine for RecordingEngine
{
        fn name(&self) -> &str
        {
                "recording"
        }

        fn create_session(
                &self,
                _: SessionParams,
                events: EventSink,
        ) -> Result<Box<dyn EngineSession>, EngineError>
        {
                Ok(Box::new(RecordingSession::new(events, self.inputs.clone())))
        }
}

pub const RED: [u8; 4] = [255, 0, 0, 255];
pub const BLUE: [u8; 4] = [0, 0, 255, 255];

/// Engine whose sessions render a single frame: a red top row over blue.
pub struct BannerEngine;

impl WebEngine for BannerEngine
{
        fn name(&self) -> &str
        {
                "banner"
        }

        fn create_session(
                &self,
                params: SessionParams,
                events: EventSink,
        ) -> Result<Box<dyn EngineSession>, EngineError>
        {
                let image = image::RgbaImage::from_fn(params.width, params.height, |_, y| {
                        image::Rgba(if y == 0 { RED } else { BLUE })
                });

                let session = RecordingSession::new(events, Arc::default());
                *session.frame.lock().unwrap() = Some(Frame { sequence: 1, image });

                Ok(Box::new(session))
        }
}

/// Engine that shuts the owning registry cycle down while it creates a
/// session.
pub struct ShutdownDuringCreateEngine;

impl WebEngine for ShutdownDuringCreateEngine
{
        fn name(&self) -> &str
        {
                "shutdown-during-create"
        }

        fn create_session(
                &self,
                params: SessionParams,
                events: EventSink,
        ) -> Result<Box<dyn EngineSession>, EngineError>
        {
                params.shutdown.signal();

                Ok(Box::new(RecordingSession::new(events, Arc::default())))
        }
}

/// Engine whose sessions can never be created.
pub struct FailingEngine(pub EngineError);

impl WebEngine for FailingEngine
{
        fn name(&self) -> &str
        {
                "failing"
        }

        fn create_session(
                &self,
                _: SessionParams,
                _: EventSink,
        ) -> Result<Box<dyn EngineSession>, EngineError>
        {
                Err(self.0.clone())
        }
}

/// Engine whose sessions post messages from their own thread as fast as
/// they can until the instance is closed.
pub struct SpamEngine;

impl WebEngine for SpamEngine
{
        fn name(&self) -> &str
        {
                "spam"
        }

        fn create_session(
                &self,
                _: SessionParams,
                events: EventSink,
        ) -> Result<Box<dyn EngineSession>, EngineError>
        {
                let spammer = events.clone();

                std::thread::spawn(move || {
                        while !spammer.is_closed()
                        {
                                spammer.message_received("spam");
                                std::thread::yield_now();
                        }
                });

                Ok(Box::new(RecordingSession::new(events, Arc::default())))
        }
}
