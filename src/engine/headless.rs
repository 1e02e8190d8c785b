//! In-process stand-in for a browser engine.
//!
//! Each session runs one worker thread fed by an mpsc command queue. The
//! worker keeps a back/forward history, fakes page-load latency, bridges
//! `postMessage(...)` calls in executed scripts to the host, and paints a
//! deterministic frame: a fill colour derived from the current document plus
//! a marker under the last known cursor position.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::dispatch::EventSink;
use crate::engine::{EngineError, EngineSession, Frame, SessionParams, WebEngine};
use crate::shutdown::ShutdownSignal;
use crate::types::{KeyEvent, MouseButton, MouseEventKind, NavigationId, PixelMouseEvent};

/// URL reported for documents loaded from a string.
pub const RAW_DOCUMENT_URL: &str = "about:blank";

/// How long an idle worker sleeps before re-checking the shutdown signal.
const IDLE_POLL: Duration = Duration::from_millis(20);

const CURSOR_RADIUS: i64 = 3;

#[derive(Debug, Clone)]
pub struct HeadlessEngine
{
        load_delay: Duration,
}

impl Default for HeadlessEngine
{
        fn default() -> Self
        {
                Self::from_config(&EngineConfig::default())
        }
}

impl HeadlessEngine
{
        pub fn new(load_delay: Duration) -> Self
        {
                Self {
                        load_delay,
                }
        }

        pub fn from_config(config: &EngineConfig) -> Self
        {
                Self::new(Duration::from_millis(config.load_delay_ms))
        }
}

impl WebEngine for HeadlessEngine
{
        fn name(&self) -> &str
        {
                "headless"
        }

        fn create_session(
                &self,
                params: SessionParams,
                events: EventSink,
        ) -> Result<Box<dyn EngineSession>, EngineError>
        {
                std::fs::create_dir_all(&params.user_data_dir).map_err(|e| {
                        EngineError::CreationFailed(format!("{}: {e}", params.user_data_dir.display()))
                })?;

                if params.width == 0 || params.height == 0
                {
                        return Err(EngineError::CompositionFailed(format!(
                                "cannot composite a {}x{} viewport",
                                params.width, params.height
                        )));
                }

                let shared = Arc::new(Shared::default());
                let (commands, queue) = mpsc::channel();

                if params.enable_dev_tools
                {
                        events.log(log::Level::Info, "dev tools enabled");
                }

                let worker = Worker {
                        queue,
                        events,
                        shared: shared.clone(),
                        shutdown: params.shutdown.clone(),
                        load_delay: self.load_delay,
                        width: params.width,
                        height: params.height,
                        page: Page::blank(),
                        cursor: None,
                        pressed: false,
                        pending: None,
                        sequence: 0,
                        paused: false,
                        dirty: true,
                };

                std::thread::Builder::new()
                        .name(format!("webtex-session-{}", params.handle.raw()))
                        .spawn(move || worker.run())
                        .map_err(|e| EngineError::CreationFailed(e.to_string()))?;

                if let (Some(url), Some(id)) = (params.initial_url, params.initial_navigation)
                {
                        commands.send(Command::Navigate(Request::Url(url), id))
                                .map_err(|_| EngineError::Disconnected)?;
                }

                Ok(Box::new(HeadlessSession {
                        commands,
                        shared,
                }))
        }
}

#[derive(Debug)]
enum Request
{
        Url(String),
        Html(String),
        Back,
        Forward,
}

#[derive(Debug)]
enum Command
{
        Navigate(Request, NavigationId),
        Script(String),
        Resize(u32, u32),
        Mouse(PixelMouseEvent),
        Key(KeyEvent),
        DeviceLost,
        DeviceRestored,
        Close,
}

/// Back/forward list. `index` points at the current entry.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct History
{
        entries: Vec<String>,
        index: Option<usize>,
}

impl History
{
        fn current(&self) -> Option<&str>
        {
                self.index.and_then(|i| self.entries.get(i)).map(String::as_str)
        }

        fn can_go_back(&self) -> bool
        {
                matches!(self.index, Some(i) if i > 0)
        }

        fn can_go_forward(&self) -> bool
        {
                matches!(self.index, Some(i) if i + 1 < self.entries.len())
        }

        fn back_target(&self) -> Option<usize>
        {
                self.index.filter(|i| *i > 0).map(|i| i - 1)
        }

        fn forward_target(&self) -> Option<usize>
        {
                self.index.map(|i| i + 1).filter(|i| *i < self.entries.len())
        }

        /// Commits a fresh navigation. Loading the current URL again is a
        /// reload and leaves the list untouched.
        fn push(
                &mut self,
                url: &str,
        )
        {
                if self.current() == Some(url)
                {
                        return;
                }

                let keep = self.index.map_or(0, |i| i + 1);

                self.entries.truncate(keep);
                self.entries.push(url.to_string());
                self.index = Some(self.entries.len() - 1);
        }
}

#[derive(Debug, Default)]
struct Shared
{
        history: Mutex<History>,
        frame: Mutex<Option<Frame>>,
}

struct HeadlessSession
{
        commands: mpsc::Sender<Command>,
        shared: Arc<Shared>,
}

impl HeadlessSession
{
        fn send(
                &self,
                command: Command,
        ) -> Result<(), EngineError>
        {
                self.commands.send(command).map_err(|_| EngineError::Disconnected)
        }

        fn history(&self) -> History
        {
                self.shared.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
        }
}

impl EngineSession for HeadlessSession
{
        fn navigate(
                &self,
                url: &str,
                id: NavigationId,
        ) -> Result<(), EngineError>
        {
                self.send(Command::Navigate(Request::Url(url.to_string()), id))
        }

        fn navigate_to_string(
                &self,
                html: &str,
                id: NavigationId,
        ) -> Result<(), EngineError>
        {
                self.send(Command::Navigate(Request::Html(html.to_string()), id))
        }

        fn execute_script(
                &self,
                script: &str,
        ) -> Result<(), EngineError>
        {
                self.send(Command::Script(script.to_string()))
        }

        fn go_back(
                &self,
                id: NavigationId,
        ) -> Result<bool, EngineError>
        {
                if !self.history().can_go_back()
                {
                        return Ok(false);
                }

                self.send(Command::Navigate(Request::Back, id))?;

                Ok(true)
        }

        fn go_forward(
                &self,
                id: NavigationId,
        ) -> Result<bool, EngineError>
        {
                if !self.history().can_go_forward()
                {
                        return Ok(false);
                }

                self.send(Command::Navigate(Request::Forward, id))?;

                Ok(true)
        }

        fn can_go_back(&self) -> bool
        {
                self.history().can_go_back()
        }

        fn can_go_forward(&self) -> bool
        {
                self.history().can_go_forward()
        }

        fn resize(
                &self,
                width: u32,
                height: u32,
        ) -> Result<(), EngineError>
        {
                self.send(Command::Resize(width, height))
        }

        fn send_mouse(
                &self,
                event: PixelMouseEvent,
        ) -> Result<(), EngineError>
        {
                self.send(Command::Mouse(event))
        }

        fn send_key(
                &self,
                event: KeyEvent,
        ) -> Result<(), EngineError>
        {
                self.send(Command::Key(event))
        }

        fn try_take_frame(&self) -> Option<Frame>
        {
                self.shared.frame.lock().unwrap_or_else(|e| e.into_inner()).take()
        }

        fn on_device_lost(&self)
        {
                let _ = self.send(Command::DeviceLost);
        }

        fn on_device_restored(&self)
        {
                let _ = self.send(Command::DeviceRestored);
        }

        fn close(&self)
        {
                let _ = self.send(Command::Close);
        }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Page
{
        url: String,
        colour: [u8; 3],
}

impl Page
{
        fn blank() -> Self
        {
                Self {
                        url: RAW_DOCUMENT_URL.to_string(),
                        colour: [255, 255, 255],
                }
        }

        fn load(
                url: &str,
                body: Option<&str>,
        ) -> Self
        {
                let mut hasher = DefaultHasher::new();

                url.hash(&mut hasher);
                body.hash(&mut hasher);

                let [r, g, b, ..] = hasher.finish().to_le_bytes();

                Self {
                        url: url.to_string(),
                        colour: [r, g, b],
                }
        }
}

#[derive(Debug)]
enum Target
{
        Fresh
        {
                body: Option<String>,
        },
        History(usize),
}

#[derive(Debug)]
struct Pending
{
        id: NavigationId,
        url: String,
        target: Target,
        due: Instant,
}

struct Worker
{
        queue: mpsc::Receiver<Command>,
        events: EventSink,
        shared: Arc<Shared>,
        shutdown: ShutdownSignal,
        load_delay: Duration,
        width: u32,
        height: u32,
        page: Page,
        cursor: Option<(u32, u32)>,
        pressed: bool,
        pending: Option<Pending>,
        sequence: u64,

        /// Composition is suspended while the host device is lost.
        paused: bool,

        dirty: bool,
}

impl Worker
{
        fn run(mut self)
        {
                loop
                {
                        if self.shutdown.is_signaled() || self.events.is_closed()
                        {
                                break;
                        }

                        let wait = match &self.pending
                        {
                                Some(pending) => pending.due.saturating_duration_since(Instant::now()),
                                None => IDLE_POLL,
                        };

                        match self.queue.recv_timeout(wait)
                        {
                                Ok(Command::Close) | Err(RecvTimeoutError::Disconnected) => break,
                                Ok(command) => self.handle(command),
                                Err(RecvTimeoutError::Timeout) =>
                                {}
                        }

                        if self.shutdown.is_signaled()
                        {
                                break;
                        }

                        if self.pending.as_ref().is_some_and(|p| p.due <= Instant::now())
                        {
                                self.finish_navigation();
                        }

                        if self.dirty && !self.paused
                        {
                                self.render();
                        }
                }

                log::debug!("[{}] session worker stopped", self.events.handle());
        }

        fn handle(
                &mut self,
                command: Command,
        )
        {
                match command
                {
                        Command::Navigate(request, id) => self.start_navigation(request, id),
                        Command::Script(script) => self.run_script(&script),
                        Command::Resize(width, height) =>
                        {
                                self.width = width;
                                self.height = height;
                                self.dirty = true;
                        }
                        Command::Mouse(event) => self.mouse(event),
                        Command::Key(event) =>
                        {
                                log::trace!(
                                        "[{}] key {} (scan {}) down={}",
                                        self.events.handle(),
                                        event.virtual_key_code,
                                        event.scan_code,
                                        event.is_key_down
                                );
                        }
                        Command::DeviceLost => self.paused = true,
                        Command::DeviceRestored =>
                        {
                                self.paused = false;
                                self.dirty = true;
                        }
                        Command::Close =>
                        {}
                }
        }

        fn start_navigation(
                &mut self,
                request: Request,
                id: NavigationId,
        )
        {
                if let Some(superseded) = self.pending.take()
                {
                        self.events.log(
                                log::Level::Debug,
                                format_args!("{} superseded by {id}", superseded.id),
                        );
                        self.events.navigation_completed(superseded.id, superseded.url, false);
                }

                let history = self.shared.history.lock().unwrap_or_else(|e| e.into_inner()).clone();

                let resolved = match request
                {
                        Request::Url(url) =>
                        {
                                if is_navigable(&url)
                                {
                                        Ok((url, Target::Fresh {
                                                body: None,
                                        }))
                                }
                                else
                                {
                                        Err(url)
                                }
                        }
                        Request::Html(html) => Ok((RAW_DOCUMENT_URL.to_string(), Target::Fresh {
                                body: Some(html),
                        })),
                        Request::Back => history
                                .back_target()
                                .map(|i| (history.entries[i].clone(), Target::History(i)))
                                .ok_or_else(|| history.current().unwrap_or_default().to_string()),
                        Request::Forward => history
                                .forward_target()
                                .map(|i| (history.entries[i].clone(), Target::History(i)))
                                .ok_or_else(|| history.current().unwrap_or_default().to_string()),
                };

                match resolved
                {
                        Ok((url, target)) =>
                        {
                                self.pending = Some(Pending {
                                        id,
                                        url,
                                        target,
                                        due: Instant::now() + self.load_delay,
                                });
                        }
                        Err(url) =>
                        {
                                self.events.report_error(&EngineError::Rejected(format!(
                                        "{id} to {url:?} cannot be loaded"
                                )));
                                self.events.navigation_completed(id, url, false);
                        }
                }
        }

        fn finish_navigation(&mut self)
        {
                let Some(pending) = self.pending.take()
                else
                {
                        return;
                };

                {
                        let mut history = self.shared.history.lock().unwrap_or_else(|e| e.into_inner());

                        match &pending.target
                        {
                                Target::Fresh {
                                        ..
                                } => history.push(&pending.url),
                                Target::History(index) => history.index = Some(*index),
                        }
                }

                let body = match &pending.target
                {
                        Target::Fresh {
                                body,
                        } => body.as_deref(),
                        Target::History(_) => None,
                };

                self.page = Page::load(&pending.url, body);
                self.dirty = true;

                self.events.navigation_completed(pending.id, pending.url, true);
        }

        fn run_script(
                &mut self,
                script: &str,
        )
        {
                for payload in post_messages(script)
                {
                        self.events.message_received(payload);
                }
        }

        fn mouse(
                &mut self,
                event: PixelMouseEvent,
        )
        {
                match event.kind
                {
                        MouseEventKind::Leave =>
                        {
                                self.cursor = None;
                                self.pressed = false;
                        }
                        MouseEventKind::Down => self.pressed = event.button != MouseButton::None,
                        MouseEventKind::Up => self.pressed = false,
                        MouseEventKind::Move | MouseEventKind::Wheel =>
                        {}
                }

                if event.kind != MouseEventKind::Leave
                {
                        self.cursor = Some((event.x, event.y));
                }

                self.dirty = true;
        }

        fn render(&mut self)
        {
                let [r, g, b] = self.page.colour;
                let marker = if self.pressed
                {
                        [0, 0, 0]
                }
                else
                {
                        [255 - r, 255 - g, 255 - b]
                };
                let cursor = self.cursor;

                let image = image::RgbaImage::from_fn(self.width, self.height, |x, y| {
                        let on_cursor = cursor.is_some_and(|(cx, cy)| {
                                (x as i64 - cx as i64).abs() <= CURSOR_RADIUS
                                        && (y as i64 - cy as i64).abs() <= CURSOR_RADIUS
                        });

                        if on_cursor
                        {
                                image::Rgba([marker[0], marker[1], marker[2], 255])
                        }
                        else
                        {
                                image::Rgba([r, g, b, 255])
                        }
                });

                self.sequence += 1;

                *self.shared.frame.lock().unwrap_or_else(|e| e.into_inner()) = Some(Frame {
                        sequence: self.sequence,
                        image,
                });

                self.dirty = false;
        }
}

/// Whether `url` has a scheme the engine can load.
pub fn is_navigable(url: &str) -> bool
{
        if url.is_empty() || url.chars().any(char::is_whitespace)
        {
                return false;
        }

        let Some((scheme, rest)) = url.split_once(':')
        else
        {
                return false;
        };

        match scheme.to_ascii_lowercase().as_str()
        {
                "http" | "https" => rest.len() > 2 && rest.starts_with("//"),
                "file" => rest.starts_with("//"),
                "about" | "data" => !rest.is_empty(),
                _ => false,
        }
}

/// Extracts the string arguments of every `postMessage(...)` call in
/// `script`. Quoted literals are unquoted; anything else is passed through
/// trimmed.
pub fn post_messages(script: &str) -> Vec<String>
{
        const CALL: &str = "postMessage(";

        let mut payloads = Vec::new();
        let mut rest = script;

        while let Some(start) = rest.find(CALL)
        {
                rest = &rest[start + CALL.len()..];

                let argument = match rest.chars().next()
                {
                        Some(quote @ ('"' | '\'' | '`')) =>
                        {
                                let body = &rest[1..];

                                match body.find(quote)
                                {
                                        Some(end) =>
                                        {
                                                rest = &body[end + 1..];
                                                body[..end].to_string()
                                        }
                                        None => break,
                                }
                        }
                        _ =>
                        {
                                let Some(end) = rest.find(')')
                                else
                                {
                                        break;
                                };

                                let argument = rest[..end].trim().to_string();
                                rest = &rest[end + 1..];
                                argument
                        }
                };

                payloads.push(argument);
        }

        payloads
}
