//! Graphics backend adapter.
//!
//! The registry is bound to exactly one [`GraphicsBackend`] per device
//! lifetime. This module is the only place that looks at which API is in
//! use; everything above it handles [`BackendTexture`]s opaquely.
//!
//! Textures follow an explicit state machine mirroring a resource barrier:
//!
//! ```text
//!            begin_update              end_update
//! ShaderRead ------------> CopyDest -------------> ShaderRead
//!      \                                  /
//!       `---------- release ------------'--> Released
//! ```
//!
//! A texture also remembers the device epoch it was created under. After a
//! device loss the backend is rebuilt with a newer epoch and any update on an
//! older texture is refused.

pub mod gpu;
pub mod software;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::TextureFormat;
use crate::engine::Frame;
use crate::error::{Error, Result};

pub use gpu::{WgpuBackend, WgpuTexture};
pub use software::{SoftwareBackend, SoftwareDevice, SoftwareTexture};

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

fn next_texture_id() -> u64
{
        NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Graphics APIs a host can bind the registry to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum GraphicsApi
{
        Wgpu = 1,
        Software = 2,
}

impl GraphicsApi
{
        pub fn from_raw(raw: i32) -> Result<Self>
        {
                match raw
                {
                        1 => Ok(Self::Wgpu),
                        2 => Ok(Self::Software),
                        other => Err(Error::UnsupportedGraphicsApi(other)),
                }
        }
}

/// The host's device, handed over at initialization and on restore.
#[derive(Debug, Clone)]
pub enum GraphicsContext
{
        Wgpu
        {
                device: wgpu::Device,
                queue: wgpu::Queue,
        },
        Software(SoftwareDevice),
}

impl GraphicsContext
{
        pub fn api(&self) -> GraphicsApi
        {
                match self
                {
                        GraphicsContext::Wgpu {
                                ..
                        } => GraphicsApi::Wgpu,
                        GraphicsContext::Software(_) => GraphicsApi::Software,
                }
        }

        /// Requests a standalone wgpu adapter and device, for hosts that do
        /// not bring their own.
        pub fn create_wgpu_headless() -> Result<Self>
        {
                let (device, queue) = gpu::request_headless_device()?;

                Ok(GraphicsContext::Wgpu {
                        device,
                        queue,
                })
        }

        pub fn software() -> Self
        {
                GraphicsContext::Software(SoftwareDevice::new())
        }
}

/// Barrier state of a [`BackendTexture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState
{
        /// Sampled by the host.
        ShaderRead,

        /// Being written by the sync point.
        CopyDest,

        Released,
}

/// Bookkeeping shared by both texture kinds.
#[derive(Debug)]
pub(crate) struct TextureMeta
{
        id: u64,
        width: u32,
        height: u32,
        epoch: u64,
        state: Mutex<ResourceState>,
}

impl TextureMeta
{
        pub(crate) fn new(
                width: u32,
                height: u32,
                epoch: u64,
        ) -> Self
        {
                Self {
                        id: next_texture_id(),
                        width,
                        height,
                        epoch,
                        state: Mutex::new(ResourceState::ShaderRead),
                }
        }

        fn state(&self) -> ResourceState
        {
                *self.state.lock().unwrap_or_else(|e| e.into_inner())
        }

        fn transition(
                &self,
                from: ResourceState,
                to: ResourceState,
        ) -> Result<()>
        {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

                if *state != from
                {
                        return Err(Error::ResourceBarrierFailed(format!(
                                "texture {} is {:?}, expected {from:?} before {to:?}",
                                self.id, *state
                        )));
                }

                *state = to;

                Ok(())
        }

        fn release(&self)
        {
                *self.state.lock().unwrap_or_else(|e| e.into_inner()) = ResourceState::Released;
        }
}

/// A host-visible texture. Cloning shares the underlying resource.
#[derive(Debug, Clone)]
pub enum BackendTexture
{
        Wgpu(Arc<WgpuTexture>),
        Software(Arc<SoftwareTexture>),
}

impl BackendTexture
{
        fn meta(&self) -> &TextureMeta
        {
                match self
                {
                        BackendTexture::Wgpu(texture) => &texture.meta,
                        BackendTexture::Software(texture) => &texture.meta,
                }
        }

        pub fn api(&self) -> GraphicsApi
        {
                match self
                {
                        BackendTexture::Wgpu(_) => GraphicsApi::Wgpu,
                        BackendTexture::Software(_) => GraphicsApi::Software,
                }
        }

        /// Process-unique id. A recreated texture always gets a new one.
        pub fn id(&self) -> u64
        {
                self.meta().id
        }

        pub fn width(&self) -> u32
        {
                self.meta().width
        }

        pub fn height(&self) -> u32
        {
                self.meta().height
        }

        pub fn size(&self) -> (u32, u32)
        {
                (self.width(), self.height())
        }

        pub fn epoch(&self) -> u64
        {
                self.meta().epoch
        }

        pub fn state(&self) -> ResourceState
        {
                self.meta().state()
        }

        pub fn as_wgpu(&self) -> Option<&WgpuTexture>
        {
                match self
                {
                        BackendTexture::Wgpu(texture) => Some(texture),
                        BackendTexture::Software(_) => None,
                }
        }

        pub fn as_software(&self) -> Option<&SoftwareTexture>
        {
                match self
                {
                        BackendTexture::Software(texture) => Some(texture),
                        BackendTexture::Wgpu(_) => None,
                }
        }

        /// Marks the texture unusable and frees its GPU memory. Works whether
        /// or not the device it came from is still bound.
        pub fn release(&self)
        {
                self.meta().release();

                if let BackendTexture::Wgpu(texture) = self
                {
                        texture.texture.destroy();
                }
        }
}

/// Packs a frame into 32-bit texels whose in-memory byte order matches
/// `format`.
pub(crate) fn pack_frame(
        frame: &Frame,
        flip_y: bool,
        format: TextureFormat,
) -> Vec<u32>
{
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let raw = frame.image.as_raw();

        let mut texels = Vec::with_capacity(width * height);

        for row in 0..height
        {
                let source_row = if flip_y
                {
                        height - 1 - row
                }
                else
                {
                        row
                };

                let start = source_row * width * 4;

                for px in raw[start..start + width * 4].chunks_exact(4)
                {
                        let bytes = match format
                        {
                                TextureFormat::Rgba8 => [px[0], px[1], px[2], px[3]],
                                TextureFormat::Bgra8 => [px[2], px[1], px[0], px[3]],
                        };

                        texels.push(u32::from_ne_bytes(bytes));
                }
        }

        texels
}

/// The bound device, tagged by API.
#[derive(Debug)]
pub enum GraphicsBackend
{
        Wgpu(WgpuBackend),
        Software(SoftwareBackend),
}

impl GraphicsBackend
{
        pub fn new(
                context: GraphicsContext,
                format: TextureFormat,
                epoch: u64,
        ) -> Result<Self>
        {
                let backend = match context
                {
                        GraphicsContext::Wgpu {
                                device,
                                queue,
                        } => GraphicsBackend::Wgpu(WgpuBackend::new(device, queue, format, epoch)),
                        GraphicsContext::Software(device) =>
                        {
                                GraphicsBackend::Software(SoftwareBackend::new(device, format, epoch)?)
                        }
                };

                Ok(backend)
        }

        pub fn api(&self) -> GraphicsApi
        {
                match self
                {
                        GraphicsBackend::Wgpu(_) => GraphicsApi::Wgpu,
                        GraphicsBackend::Software(_) => GraphicsApi::Software,
                }
        }

        pub fn epoch(&self) -> u64
        {
                match self
                {
                        GraphicsBackend::Wgpu(backend) => backend.epoch(),
                        GraphicsBackend::Software(backend) => backend.epoch(),
                }
        }

        pub fn is_device_lost(&self) -> bool
        {
                match self
                {
                        GraphicsBackend::Wgpu(backend) => backend.is_device_lost(),
                        GraphicsBackend::Software(backend) => backend.is_device_lost(),
                }
        }

        pub fn create_texture(
                &self,
                width: u32,
                height: u32,
        ) -> Result<BackendTexture>
        {
                match self
                {
                        GraphicsBackend::Wgpu(backend) =>
                        {
                                Ok(BackendTexture::Wgpu(Arc::new(backend.create_texture(width, height)?)))
                        }
                        GraphicsBackend::Software(backend) =>
                        {
                                Ok(BackendTexture::Software(Arc::new(backend.create_texture(width, height)?)))
                        }
                }
        }

        /// Refuses textures of another API or of a previous device.
        fn check_owned(
                &self,
                texture: &BackendTexture,
        ) -> Result<()>
        {
                if texture.api() != self.api()
                {
                        return Err(Error::ResourceBarrierFailed(format!(
                                "texture {} belongs to {:?}, backend is {:?}",
                                texture.id(),
                                texture.api(),
                                self.api()
                        )));
                }

                if texture.epoch() != self.epoch()
                {
                        return Err(Error::ResourceBarrierFailed(format!(
                                "texture {} was created on device epoch {}, current is {}",
                                texture.id(),
                                texture.epoch(),
                                self.epoch()
                        )));
                }

                Ok(())
        }

        /// Transitions `texture` from shader-readable to copy-destination.
        pub fn begin_update(
                &self,
                texture: &BackendTexture,
        ) -> Result<()>
        {
                self.check_owned(texture)?;

                texture.meta().transition(ResourceState::ShaderRead, ResourceState::CopyDest)
        }

        /// Copies `frame` into `texture`, which must be in copy-destination
        /// state and exactly the frame's size.
        pub fn write_frame(
                &self,
                texture: &BackendTexture,
                frame: &Frame,
                flip_y: bool,
        ) -> Result<()>
        {
                self.check_owned(texture)?;

                if texture.state() != ResourceState::CopyDest
                {
                        return Err(Error::ResourceBarrierFailed(format!(
                                "texture {} is {:?}, not a copy destination",
                                texture.id(),
                                texture.state()
                        )));
                }

                if texture.size() != (frame.width(), frame.height())
                {
                        return Err(Error::ResourceBarrierFailed(format!(
                                "frame is {}x{}, texture {} is {}x{}",
                                frame.width(),
                                frame.height(),
                                texture.id(),
                                texture.width(),
                                texture.height()
                        )));
                }

                match (self, texture)
                {
                        (GraphicsBackend::Wgpu(backend), BackendTexture::Wgpu(texture)) =>
                        {
                                backend.write_frame(texture, frame, flip_y);
                        }
                        (GraphicsBackend::Software(backend), BackendTexture::Software(texture)) =>
                        {
                                backend.write_frame(texture, frame, flip_y);
                        }
                        _ =>
                        {
                                return Err(Error::ResourceBarrierFailed(format!(
                                        "texture {} does not belong to this backend",
                                        texture.id()
                                )));
                        }
                }

                Ok(())
        }

        /// Transitions `texture` back to shader-readable and flushes the
        /// pending copy.
        pub fn end_update(
                &self,
                texture: &BackendTexture,
        ) -> Result<()>
        {
                self.check_owned(texture)?;

                texture.meta().transition(ResourceState::CopyDest, ResourceState::ShaderRead)?;

                if let GraphicsBackend::Wgpu(backend) = self
                {
                        backend.flush();
                }

                Ok(())
        }
}

#[cfg(test)]
mod tests
{
        use super::*;

        fn frame(
                width: u32,
                height: u32,
        ) -> Frame
        {
                Frame {
                        sequence: 1,
                        image: image::RgbaImage::from_fn(width, height, |x, y| {
                                image::Rgba([x as u8, y as u8, 7, 255])
                        }),
                }
        }

        fn software_backend(epoch: u64) -> GraphicsBackend
        {
                GraphicsBackend::new(GraphicsContext::software(), TextureFormat::Rgba8, epoch).unwrap()
        }

        #[test]
        fn unknown_api_ids_are_unsupported()
        {
                assert_eq!(GraphicsApi::from_raw(2), Ok(GraphicsApi::Software));
                assert_eq!(GraphicsApi::from_raw(0), Err(Error::UnsupportedGraphicsApi(0)));
                assert_eq!(GraphicsApi::from_raw(7).unwrap_err().code(), -100);
        }

        #[test]
        fn update_cycle_returns_to_shader_read()
        {
                let backend = software_backend(1);
                let texture = backend.create_texture(4, 2).unwrap();

                assert_eq!(texture.state(), ResourceState::ShaderRead);

                backend.begin_update(&texture).unwrap();
                assert_eq!(texture.state(), ResourceState::CopyDest);

                backend.write_frame(&texture, &frame(4, 2), false).unwrap();
                backend.end_update(&texture).unwrap();

                assert_eq!(texture.state(), ResourceState::ShaderRead);
                assert_eq!(texture.as_software().unwrap().pixel(3, 1), Some([3, 1, 7, 255]));
        }

        #[test]
        fn writes_outside_an_update_are_refused()
        {
                let backend = software_backend(1);
                let texture = backend.create_texture(4, 2).unwrap();

                let err = backend.write_frame(&texture, &frame(4, 2), false).unwrap_err();

                assert_eq!(err.code(), -103);
                assert!(backend.end_update(&texture).is_err());
        }

        #[test]
        fn mismatched_frames_are_refused()
        {
                let backend = software_backend(1);
                let texture = backend.create_texture(4, 2).unwrap();

                backend.begin_update(&texture).unwrap();

                assert!(backend.write_frame(&texture, &frame(2, 4), false).is_err());
        }

        #[test]
        fn released_textures_cannot_transition()
        {
                let backend = software_backend(1);
                let texture = backend.create_texture(1, 1).unwrap();

                texture.release();

                assert_eq!(texture.state(), ResourceState::Released);
                assert_eq!(backend.begin_update(&texture).unwrap_err().code(), -103);
        }

        #[test]
        fn textures_from_an_older_epoch_are_refused()
        {
                let old = software_backend(1);
                let texture = old.create_texture(2, 2).unwrap();
                let current = software_backend(2);

                assert!(matches!(current.begin_update(&texture), Err(Error::ResourceBarrierFailed(_))));
        }

        #[test]
        fn recreated_textures_get_fresh_ids()
        {
                let backend = software_backend(1);
                let a = backend.create_texture(2, 2).unwrap();
                let b = backend.create_texture(2, 2).unwrap();

                assert_ne!(a.id(), b.id());
        }

        #[test]
        fn packing_honours_flip_and_format()
        {
                let source = frame(1, 2);

                let straight = pack_frame(&source, false, TextureFormat::Rgba8);
                let flipped = pack_frame(&source, true, TextureFormat::Bgra8);

                assert_eq!(straight[0].to_ne_bytes(), [0, 0, 7, 255]);
                assert_eq!(straight[1].to_ne_bytes(), [0, 1, 7, 255]);
                assert_eq!(flipped[0].to_ne_bytes(), [7, 1, 0, 255]);
        }
}
