use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use derivative::Derivative;

use crate::backend::{BackendTexture, GraphicsBackend};
use crate::engine::EngineSession;
use crate::error::{Error, Result};
use crate::types::{InstanceHandle, KeyEvent, MouseEvent, NavigationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState
{
        /// Bound to a texture of the current device.
        Ready,

        /// Waiting for a device to create its texture on.
        TexturePending,

        Destroyed,
}

/// Viewport size and the texture currently shown for it.
#[derive(Debug)]
struct Binding
{
        width: u32,
        height: u32,
        texture: Option<BackendTexture>,
}

/// One web view: an engine session plus its host-visible texture.
///
/// The texture is only ever replaced while holding the binding mutex, and the
/// sync point holds that same mutex for the whole begin/write/end sequence, so
/// the host never sees a half-written or half-swapped texture.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct WebViewInstance
{
        handle: InstanceHandle,

        #[derivative(Debug = "ignore")]
        session: Box<dyn EngineSession>,

        binding: Mutex<Binding>,
        dev_tools: bool,
        user_data_dir: PathBuf,
        destroyed: AtomicBool,
}

impl WebViewInstance
{
        pub fn new(
                handle: InstanceHandle,
                session: Box<dyn EngineSession>,
                width: u32,
                height: u32,
                texture: Option<BackendTexture>,
                dev_tools: bool,
                user_data_dir: PathBuf,
        ) -> Self
        {
                Self {
                        handle,
                        session,
                        binding: Mutex::new(Binding {
                                width,
                                height,
                                texture,
                        }),
                        dev_tools,
                        user_data_dir,
                        destroyed: AtomicBool::new(false),
                }
        }

        pub fn handle(&self) -> InstanceHandle
        {
                self.handle
        }

        pub fn dev_tools(&self) -> bool
        {
                self.dev_tools
        }

        pub fn user_data_dir(&self) -> &Path
        {
                &self.user_data_dir
        }

        pub fn size(&self) -> (u32, u32)
        {
                let binding = self.binding.lock().unwrap_or_else(|e| e.into_inner());

                (binding.width, binding.height)
        }

        pub fn texture(&self) -> Option<BackendTexture>
        {
                self.binding.lock().unwrap_or_else(|e| e.into_inner()).texture.clone()
        }

        pub fn state(&self) -> InstanceState
        {
                if self.destroyed.load(Ordering::Acquire)
                {
                        return InstanceState::Destroyed;
                }

                match self.binding.lock().unwrap_or_else(|e| e.into_inner()).texture
                {
                        Some(_) => InstanceState::Ready,
                        None => InstanceState::TexturePending,
                }
        }

        /// Replaces the texture with a fresh one from `backend` at the
        /// current size. On failure the instance is left without a texture.
        pub fn rebind(
                &self,
                backend: &GraphicsBackend,
        ) -> Result<()>
        {
                let mut binding = self.binding.lock().unwrap_or_else(|e| e.into_inner());

                if let Some(old) = binding.texture.take()
                {
                        old.release();
                }

                binding.texture = Some(backend.create_texture(binding.width, binding.height)?);

                Ok(())
        }

        /// Releases the texture. Used when its device is gone or the instance
        /// is being torn down.
        pub fn unbind(&self)
        {
                let texture = self.binding.lock().unwrap_or_else(|e| e.into_inner()).texture.take();

                if let Some(old) = texture
                {
                        old.release();
                }
        }

        /// Recreates the texture at `width` x `height`, then tells the engine.
        ///
        /// Without a usable `backend` (none bound, or flagged lost) the old
        /// texture is released, only the size is recorded and the texture is
        /// created on the next rebind.
        pub fn resize(
                &self,
                backend: Option<&GraphicsBackend>,
                width: u32,
                height: u32,
        ) -> Result<()>
        {
                {
                        let mut binding = self.binding.lock().unwrap_or_else(|e| e.into_inner());

                        match backend
                        {
                                Some(backend) if !backend.is_device_lost() =>
                                {
                                        let texture = backend.create_texture(width, height)?;

                                        if let Some(old) = binding.texture.replace(texture)
                                        {
                                                old.release();
                                        }
                                }
                                _ =>
                                {
                                        if width == 0 || height == 0
                                        {
                                                return Err(Error::TextureCreationFailed(format!(
                                                        "{width}x{height} is not a valid size"
                                                )));
                                        }

                                        if let Some(old) = binding.texture.take()
                                        {
                                                old.release();
                                        }
                                }
                        }

                        binding.width = width;
                        binding.height = height;
                }

                self.session.resize(width, height)?;

                Ok(())
        }

        /// Moves the newest engine frame into the texture. Returns whether a
        /// frame was copied.
        ///
        /// Frames of a different size than the texture (in flight across a
        /// resize) are dropped.
        pub fn update_texture(
                &self,
                backend: &GraphicsBackend,
                flip_y: bool,
        ) -> Result<bool>
        {
                let binding = self.binding.lock().unwrap_or_else(|e| e.into_inner());

                let Some(texture) = binding.texture.as_ref()
                else
                {
                        return Ok(false);
                };

                if texture.epoch() != backend.epoch()
                {
                        return Ok(false);
                }

                let Some(frame) = self.session.try_take_frame()
                else
                {
                        return Ok(false);
                };

                if (frame.width(), frame.height()) != texture.size()
                {
                        log::debug!(
                                "[{}] dropping {}x{} frame {} for {}x{} texture",
                                self.handle,
                                frame.width(),
                                frame.height(),
                                frame.sequence,
                                texture.width(),
                                texture.height()
                        );

                        return Ok(false);
                }

                backend.begin_update(texture)?;

                let written = backend.write_frame(texture, &frame, flip_y);

                backend.end_update(texture)?;

                written.map(|_| true)
        }

        pub fn navigate(
                &self,
                url: &str,
                id: NavigationId,
        ) -> Result<()>
        {
                Ok(self.session.navigate(url, id)?)
        }

        pub fn navigate_to_string(
                &self,
                html: &str,
                id: NavigationId,
        ) -> Result<()>
        {
                Ok(self.session.navigate_to_string(html, id)?)
        }

        pub fn execute_script(
                &self,
                script: &str,
        ) -> Result<()>
        {
                Ok(self.session.execute_script(script)?)
        }

        pub fn go_back(
                &self,
                id: NavigationId,
        ) -> Result<bool>
        {
                Ok(self.session.go_back(id)?)
        }

        pub fn go_forward(
                &self,
                id: NavigationId,
        ) -> Result<bool>
        {
                Ok(self.session.go_forward(id)?)
        }

        pub fn can_go_back(&self) -> bool
        {
                self.session.can_go_back()
        }

        pub fn can_go_forward(&self) -> bool
        {
                self.session.can_go_forward()
        }

        /// Clamps `event` to the viewport and forwards it.
        pub fn send_mouse(
                &self,
                event: MouseEvent,
        ) -> Result<()>
        {
                let (width, height) = self.size();

                Ok(self.session.send_mouse(event.to_pixels(width, height))?)
        }

        pub fn send_key(
                &self,
                event: KeyEvent,
        ) -> Result<()>
        {
                Ok(self.session.send_key(event)?)
        }

        pub fn device_lost(&self)
        {
                self.session.on_device_lost();
        }

        pub fn device_restored(&self)
        {
                self.session.on_device_restored();
        }

        /// Stops the engine session. Safe to call more than once.
        pub fn close(&self)
        {
                if !self.destroyed.swap(true, Ordering::AcqRel)
                {
                        self.session.close();
                }
        }
}

#[cfg(test)]
mod tests
{
        use super::*;

        use std::sync::Arc;

        use crate::backend::{GraphicsContext, ResourceState, SoftwareDevice};
        use crate::config::TextureFormat;
        use crate::engine::{EngineError, Frame};
        use crate::types::{MouseButton, MouseEventKind, PixelMouseEvent};

        /// Session that hands out whatever frame the test queued and records
        /// the mouse events it received.
        #[derive(Default)]
        struct ScriptedSession
        {
                frame: Mutex<Option<Frame>>,
                mouse: Arc<Mutex<Vec<PixelMouseEvent>>>,
                sizes: Arc<Mutex<Vec<(u32, u32)>>>,
        }

        impl EngineSession for ScriptedSession
        {
                fn navigate(
                        &self,
                        _: &str,
                        _: NavigationId,
                ) -> std::result::Result<(), EngineError>
                {
                        Ok(())
                }

                fn navigate_to_string(
                        &self,
                        _: &str,
                        _: NavigationId,
                ) -> std::result::Result<(), EngineError>
                {
                        Ok(())
                }

                fn execute_script(
                        &self,
                        _: &str,
                ) -> std::result::Result<(), EngineError>
                {
                        Err(EngineError::Disconnected)
                }

                fn go_back(
                        &self,
                        _: NavigationId,
                ) -> std::result::Result<bool, EngineError>
                {
                        Ok(false)
                }

                fn go_forward(
                        &self,
                        _: NavigationId,
                ) -> std::result::Result<bool, EngineError>
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
                        width: u32,
                        height: u32,
                ) -> std::result::Result<(), EngineError>
                {
                        self.sizes.lock().unwrap().push((width, height));
                        Ok(())
                }

                fn send_mouse(
                        &self,
                        event: PixelMouseEvent,
                ) -> std::result::Result<(), EngineError>
                {
                        self.mouse.lock().unwrap().push(event);
                        Ok(())
                }

                fn send_key(
                        &self,
                        _: KeyEvent,
                ) -> std::result::Result<(), EngineError>
                {
                        Ok(())
                }

                fn try_take_frame(&self) -> Option<Frame>
                {
                        self.frame.lock().unwrap().take()
                }

                fn close(&self) {}
        }

        fn solid(
                width: u32,
                height: u32,
                value: u8,
        ) -> Frame
        {
                Frame {
                        sequence: 1,
                        image: image::RgbaImage::from_pixel(width, height, image::Rgba([value, value, value, 255])),
                }
        }

        fn backend() -> GraphicsBackend
        {
                GraphicsBackend::new(GraphicsContext::software(), TextureFormat::Rgba8, 1).unwrap()
        }

        fn instance(
                backend: &GraphicsBackend,
                session: ScriptedSession,
        ) -> WebViewInstance
        {
                let texture = backend.create_texture(4, 4).unwrap();

                WebViewInstance::new(
                        InstanceHandle::from_raw(1).unwrap(),
                        Box::new(session),
                        4,
                        4,
                        Some(texture),
                        false,
                        PathBuf::from("unused"),
                )
        }

        #[test]
        fn matching_frames_are_copied()
        {
                let backend = backend();
                let session = ScriptedSession::default();
                *session.frame.lock().unwrap() = Some(solid(4, 4, 200));

                let instance = instance(&backend, session);

                assert!(instance.update_texture(&backend, false).unwrap());
                assert!(!instance.update_texture(&backend, false).unwrap());

                let texture = instance.texture().unwrap();

                assert_eq!(texture.as_software().unwrap().pixel(0, 0), Some([200, 200, 200, 255]));
        }

        #[test]
        fn stale_sized_frames_are_discarded_after_resize()
        {
                let backend = backend();
                let session = ScriptedSession::default();
                let sizes = session.sizes.clone();
                *session.frame.lock().unwrap() = Some(solid(4, 4, 9));

                let instance = instance(&backend, session);
                let before = instance.texture().unwrap().id();

                instance.resize(Some(&backend), 8, 2).unwrap();

                let texture = instance.texture().unwrap();

                assert_ne!(texture.id(), before);
                assert_eq!(texture.size(), (8, 2));
                assert!(!instance.update_texture(&backend, false).unwrap());
                assert_eq!(texture.as_software().unwrap().pixel(0, 0), Some([0, 0, 0, 0]));
                assert_eq!(*sizes.lock().unwrap(), vec![(8, 2)]);
        }

        #[test]
        fn failed_resize_keeps_the_old_binding()
        {
                let backend = backend();
                let instance = instance(&backend, ScriptedSession::default());
                let before = instance.texture().unwrap().id();

                assert_eq!(instance.resize(Some(&backend), 0, 5).unwrap_err().code(), -102);
                assert_eq!(instance.size(), (4, 4));
                assert_eq!(instance.texture().unwrap().id(), before);
        }

        #[test]
        fn resize_on_a_lost_device_releases_the_old_texture()
        {
                let device = SoftwareDevice::new();
                let backend =
                        GraphicsBackend::new(GraphicsContext::Software(device.clone()), TextureFormat::Rgba8, 1)
                                .unwrap();

                let instance = instance(&backend, ScriptedSession::default());
                let old = instance.texture().unwrap();

                device.lose();

                instance.resize(Some(&backend), 8, 2).unwrap();

                assert_eq!(old.state(), ResourceState::Released);
                assert_eq!(instance.state(), InstanceState::TexturePending);
                assert_eq!(instance.size(), (8, 2));
        }

        #[test]
        fn unbind_releases_the_texture()
        {
                let backend = backend();
                let instance = instance(&backend, ScriptedSession::default());
                let old = instance.texture().unwrap();

                instance.unbind();

                assert_eq!(old.state(), ResourceState::Released);
                assert!(instance.texture().is_none());
        }

        #[test]
        fn mouse_events_reach_the_session_clamped()
        {
                let backend = backend();
                let session = ScriptedSession::default();
                let mouse = session.mouse.clone();
                let instance = instance(&backend, session);

                instance.send_mouse(MouseEvent::new(MouseEventKind::Down, MouseButton::Left, 2.0, -1.0))
                        .unwrap();

                let seen = mouse.lock().unwrap();

                assert_eq!((seen[0].x, seen[0].y), (3, 0));
        }

        #[test]
        fn engine_failures_surface_as_errors()
        {
                let backend = backend();
                let instance = instance(&backend, ScriptedSession::default());

                assert_eq!(instance.execute_script("1").unwrap_err().code(), -1);
        }

        #[test]
        fn close_marks_the_instance_destroyed()
        {
                let backend = backend();
                let instance = instance(&backend, ScriptedSession::default());

                assert_eq!(instance.state(), InstanceState::Ready);

                instance.unbind();

                assert_eq!(instance.state(), InstanceState::TexturePending);

                instance.close();
                instance.close();

                assert_eq!(instance.state(), InstanceState::Destroyed);
        }
}
