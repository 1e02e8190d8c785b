//! Boundary to the embedded browser engine.
//!
//! The registry never talks to a browser directly. It asks a [`WebEngine`]
//! for one [`EngineSession`] per instance and from then on only enqueues
//! work on it (navigation, script, input) and pulls finished frames from it
//! on the render thread. Everything the engine wants to tell the host goes
//! through the [`EventSink`] it received at creation.

pub mod headless;

use std::path::PathBuf;

use thiserror::Error;

use crate::dispatch::EventSink;
use crate::shutdown::ShutdownSignal;
use crate::types::{InstanceHandle, KeyEvent, NavigationId, PixelMouseEvent};

pub use headless::HeadlessEngine;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError
{
        #[error("engine session could not be created: {0}")]
        CreationFailed(String),

        #[error("engine compositor could not be bound: {0}")]
        CompositionFailed(String),

        #[error("engine session is gone")]
        Disconnected,

        #[error("engine rejected the request: {0}")]
        Rejected(String),
}

impl From<EngineError> for crate::Error
{
        fn from(error: EngineError) -> Self
        {
                match error
                {
                        EngineError::CreationFailed(reason) => crate::Error::WebViewCreationFailed(reason),
                        EngineError::CompositionFailed(reason) => crate::Error::CompositionFailed(reason),
                        EngineError::Rejected(reason) => crate::Error::NavigationFailed(reason),
                        EngineError::Disconnected => crate::Error::Unknown("engine session is gone".into()),
                }
        }
}

/// Everything an engine needs to start one session.
#[derive(Debug, Clone)]
pub struct SessionParams
{
        pub handle: InstanceHandle,
        pub width: u32,
        pub height: u32,

        /// Resolved persistent storage directory for this session.
        pub user_data_dir: PathBuf,

        pub initial_url: Option<String>,

        /// Navigation token for `initial_url`, when there is one.
        pub initial_navigation: Option<NavigationId>,

        pub enable_dev_tools: bool,

        /// Signal of the registry cycle that owns the session.
        pub shutdown: ShutdownSignal,
}

/// One composited frame, tightly packed RGBA.
#[derive(Debug, Clone)]
pub struct Frame
{
        /// Increases with every frame the session produces.
        pub sequence: u64,
        pub image: image::RgbaImage,
}

impl Frame
{
        pub fn width(&self) -> u32
        {
                self.image.width()
        }

        pub fn height(&self) -> u32
        {
                self.image.height()
        }
}

/// Factory for engine sessions.
pub trait WebEngine: Send + Sync
{
        fn name(&self) -> &str;

        /// Blocks until the session and its compositor exist.
        fn create_session(
                &self,
                params: SessionParams,
                events: EventSink,
        ) -> Result<Box<dyn EngineSession>, EngineError>;
}

/// One browser session.
///
/// Navigation and input calls only enqueue work and return immediately.
/// Navigation outcomes arrive later through the session's [`EventSink`],
/// exactly once per [`NavigationId`].
pub trait EngineSession: Send + Sync
{
        fn navigate(
                &self,
                url: &str,
                id: NavigationId,
        ) -> Result<(), EngineError>;

        fn navigate_to_string(
                &self,
                html: &str,
                id: NavigationId,
        ) -> Result<(), EngineError>;

        fn execute_script(
                &self,
                script: &str,
        ) -> Result<(), EngineError>;

        /// Returns `false` when there is no entry to go back to.
        fn go_back(
                &self,
                id: NavigationId,
        ) -> Result<bool, EngineError>;

        /// Returns `false` when there is no entry to go forward to.
        fn go_forward(
                &self,
                id: NavigationId,
        ) -> Result<bool, EngineError>;

        fn can_go_back(&self) -> bool;

        fn can_go_forward(&self) -> bool;

        fn resize(
                &self,
                width: u32,
                height: u32,
        ) -> Result<(), EngineError>;

        fn send_mouse(
                &self,
                event: PixelMouseEvent,
        ) -> Result<(), EngineError>;

        fn send_key(
                &self,
                event: KeyEvent,
        ) -> Result<(), EngineError>;

        /// Newest finished frame not yet taken, if any. Older untaken frames
        /// are dropped.
        fn try_take_frame(&self) -> Option<Frame>;

        fn on_device_lost(&self) {}

        fn on_device_restored(&self) {}

        /// Stops the session. Must not block on in-flight callbacks.
        fn close(&self);
}

#[cfg(test)]
mod tests
{
        use super::*;

        #[test]
        fn engine_errors_map_onto_result_codes()
        {
                let creation: crate::Error = EngineError::CreationFailed("x".into()).into();
                let composition: crate::Error = EngineError::CompositionFailed("x".into()).into();
                let rejected: crate::Error = EngineError::Rejected("x".into()).into();
                let gone: crate::Error = EngineError::Disconnected.into();

                assert_eq!(creation.code(), -200);
                assert_eq!(composition.code(), -201);
                assert_eq!(rejected.code(), -202);
                assert_eq!(gone.code(), -1);
        }
}
