//! CPU-side backend.
//!
//! Used by hosts that composite on the CPU and by every test that has no GPU.
//! A [`SoftwareDevice`] can be "lost" on demand to drive the device-lost
//! state machine.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::backend::{TextureMeta, pack_frame};
use crate::config::TextureFormat;
use crate::engine::Frame;
use crate::error::{Error, Result};

/// Largest texture edge the software backend allocates.
pub const MAX_TEXTURE_DIMENSION: u32 = 16384;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// A host-side CPU compositor device.
///
/// Clones observe the same lost flag. Once lost a device stays lost; restore
/// by handing the registry a new one.
#[derive(Debug, Clone)]
pub struct SoftwareDevice
{
        id: u64,
        lost: Arc<AtomicBool>,
}

impl Default for SoftwareDevice
{
        fn default() -> Self
        {
                Self::new()
        }
}

impl SoftwareDevice
{
        pub fn new() -> Self
        {
                Self {
                        id: NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed),
                        lost: Arc::new(AtomicBool::new(false)),
                }
        }

        pub fn id(&self) -> u64
        {
                self.id
        }

        /// Simulates a driver reset or device removal.
        pub fn lose(&self)
        {
                self.lost.store(true, Ordering::Release);
        }

        pub fn is_lost(&self) -> bool
        {
                self.lost.load(Ordering::Acquire)
        }
}

#[derive(Debug)]
pub struct SoftwareBackend
{
        device: SoftwareDevice,
        format: TextureFormat,
        epoch: u64,
}

impl SoftwareBackend
{
        pub fn new(
                device: SoftwareDevice,
                format: TextureFormat,
                epoch: u64,
        ) -> Result<Self>
        {
                if device.is_lost()
                {
                        return Err(Error::DeviceCreationFailed(format!(
                                "software device {} is lost",
                                device.id()
                        )));
                }

                log::info!("Software backend bound to device {} (epoch {epoch})", device.id());

                Ok(Self {
                        device,
                        format,
                        epoch,
                })
        }

        pub fn epoch(&self) -> u64
        {
                self.epoch
        }

        pub fn is_device_lost(&self) -> bool
        {
                self.device.is_lost()
        }

        pub fn create_texture(
                &self,
                width: u32,
                height: u32,
        ) -> Result<SoftwareTexture>
        {
                if width == 0 || height == 0 || width > MAX_TEXTURE_DIMENSION || height > MAX_TEXTURE_DIMENSION
                {
                        return Err(Error::TextureCreationFailed(format!(
                                "{width}x{height} is outside 1..={MAX_TEXTURE_DIMENSION}"
                        )));
                }

                if self.is_device_lost()
                {
                        return Err(Error::TextureCreationFailed(format!(
                                "software device {} is lost",
                                self.device.id()
                        )));
                }

                Ok(SoftwareTexture {
                        meta: TextureMeta::new(width, height, self.epoch),
                        format: self.format,
                        texels: RwLock::new(vec![0; width as usize * height as usize]),
                })
        }

        pub fn write_frame(
                &self,
                texture: &SoftwareTexture,
                frame: &Frame,
                flip_y: bool,
        )
        {
                let packed = pack_frame(frame, flip_y, self.format);

                *texture.texels.write().unwrap_or_else(|e| e.into_inner()) = packed;
        }
}

/// A packed 32-bit texel surface.
#[derive(Debug)]
pub struct SoftwareTexture
{
        pub(crate) meta: TextureMeta,
        format: TextureFormat,
        texels: RwLock<Vec<u32>>,
}

impl SoftwareTexture
{
        /// Texel bytes at `(x, y)` in the texture's own channel order.
        pub fn pixel(
                &self,
                x: u32,
                y: u32,
        ) -> Option<[u8; 4]>
        {
                if x >= self.meta.width || y >= self.meta.height
                {
                        return None;
                }

                let texels = self.texels.read().unwrap_or_else(|e| e.into_inner());

                texels
                        .get(y as usize * self.meta.width as usize + x as usize)
                        .map(|texel| texel.to_ne_bytes())
        }

        /// Copies the surface into `out` as tightly packed rows. Returns the
        /// number of bytes the full surface needs; nothing is copied when
        /// `out` is smaller than that.
        pub fn copy_to(
                &self,
                out: &mut [u8],
        ) -> usize
        {
                let texels = self.texels.read().unwrap_or_else(|e| e.into_inner());
                let bytes: &[u8] = bytemuck::cast_slice(texels.as_slice());

                if out.len() >= bytes.len()
                {
                        out[..bytes.len()].copy_from_slice(bytes);
                }

                bytes.len()
        }

        /// Snapshot of the surface as an RGBA image, whatever the storage
        /// order.
        pub fn to_rgba_image(&self) -> image::RgbaImage
        {
                let texels = self.texels.read().unwrap_or_else(|e| e.into_inner());
                let mut bytes: Vec<u8> = bytemuck::cast_slice(texels.as_slice()).to_vec();

                if self.format == TextureFormat::Bgra8
                {
                        for px in bytes.chunks_exact_mut(4)
                        {
                                px.swap(0, 2);
                        }
                }

                image::RgbaImage::from_raw(self.meta.width, self.meta.height, bytes)
                        .unwrap_or_else(|| image::RgbaImage::new(self.meta.width, self.meta.height))
        }
}
