use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::{TextureMeta, pack_frame};
use crate::config::TextureFormat;
use crate::engine::Frame;
use crate::error::{Error, Result};

/// A web view texture on a wgpu device, ready to be bound by the host.
#[derive(Debug)]
pub struct WgpuTexture
{
        pub texture: wgpu::Texture,
        pub view: wgpu::TextureView,
        pub sampler: wgpu::Sampler,
        pub(crate) meta: TextureMeta,
}

#[derive(Debug)]
pub struct WgpuBackend
{
        device: wgpu::Device,
        queue: wgpu::Queue,
        format: TextureFormat,
        epoch: u64,
        lost: Arc<AtomicBool>,
}

impl WgpuBackend
{
        pub fn new(
                device: wgpu::Device,
                queue: wgpu::Queue,
                format: TextureFormat,
                epoch: u64,
        ) -> Self
        {
                let lost = Arc::new(AtomicBool::new(false));

                Self::watch_device(&device, lost.clone());

                log::info!("wgpu backend bound (epoch {epoch}, format {:?})", format.wgpu_format());

                Self {
                        device,
                        queue,
                        format,
                        epoch,
                        lost,
                }
        }

        /// Raises `lost` when the device goes away for any reason other than
        /// its own destruction.
        fn watch_device(
                device: &wgpu::Device,
                lost: Arc<AtomicBool>,
        )
        {
                device.set_device_lost_callback(move |reason, message| {
                        if matches!(reason, wgpu::DeviceLostReason::Destroyed)
                        {
                                return;
                        }

                        log::error!("wgpu device lost: {message}");

                        lost.store(true, Ordering::Release);
                });
        }

        pub fn epoch(&self) -> u64
        {
                self.epoch
        }

        pub fn is_device_lost(&self) -> bool
        {
                self.lost.load(Ordering::Acquire)
        }

        pub fn create_texture(
                &self,
                width: u32,
                height: u32,
        ) -> Result<WgpuTexture>
        {
                let limit = self.device.limits().max_texture_dimension_2d;

                if width == 0 || height == 0 || width > limit || height > limit
                {
                        return Err(Error::TextureCreationFailed(format!(
                                "{width}x{height} is outside 1..={limit}"
                        )));
                }

                let size = wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                };

                self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
                self.device.push_error_scope(wgpu::ErrorFilter::Validation);

                let texture = Self::allocate(&self.device, size, self.format.wgpu_format());

                let validation = pollster::block_on(self.device.pop_error_scope());
                let out_of_memory = pollster::block_on(self.device.pop_error_scope());

                if let Some(error) = validation.or(out_of_memory)
                {
                        return Err(Error::TextureCreationFailed(error.to_string()));
                }

                let view = Self::create_view(&texture);

                let sampler = Self::create_sampler(&self.device);

                Ok(WgpuTexture {
                        texture,
                        view,
                        sampler,
                        meta: TextureMeta::new(width, height, self.epoch),
                })
        }

        fn allocate(
                device: &wgpu::Device,
                size: wgpu::Extent3d,
                format: wgpu::TextureFormat,
        ) -> wgpu::Texture
        {
                device.create_texture(&wgpu::TextureDescriptor {
                        label: Some("webtex_view_texture"),
                        size,
                        mip_level_count: 1,
                        sample_count: 1,
                        dimension: wgpu::TextureDimension::D2,
                        format,
                        usage: wgpu::TextureUsages::TEXTURE_BINDING
                                | wgpu::TextureUsages::COPY_DST
                                | wgpu::TextureUsages::COPY_SRC,
                        view_formats: &[],
                })
        }

        fn create_view(texture: &wgpu::Texture) -> wgpu::TextureView
        {
                texture.create_view(&wgpu::TextureViewDescriptor::default())
        }

        fn create_sampler(device: &wgpu::Device) -> wgpu::Sampler
        {
                device.create_sampler(&wgpu::SamplerDescriptor {
                        address_mode_u: wgpu::AddressMode::ClampToEdge,
                        address_mode_v: wgpu::AddressMode::ClampToEdge,
                        address_mode_w: wgpu::AddressMode::ClampToEdge,
                        mag_filter: wgpu::FilterMode::Linear,
                        min_filter: wgpu::FilterMode::Nearest,
                        mipmap_filter: wgpu::FilterMode::Nearest,
                        ..Default::default()
                })
        }

        pub fn write_frame(
                &self,
                texture: &WgpuTexture,
                frame: &Frame,
                flip_y: bool,
        )
        {
                let texels = pack_frame(frame, flip_y, self.format);

                let size = wgpu::Extent3d {
                        width: frame.width(),
                        height: frame.height(),
                        depth_or_array_layers: 1,
                };

                self.queue.write_texture(
                        wgpu::TexelCopyTextureInfo {
                                aspect: wgpu::TextureAspect::All,
                                texture: &texture.texture,
                                mip_level: 0,
                                origin: wgpu::Origin3d::ZERO,
                        },
                        bytemuck::cast_slice(&texels),
                        wgpu::TexelCopyBufferLayout {
                                offset: 0,
                                bytes_per_row: Some(4 * frame.width()),
                                rows_per_image: Some(frame.height()),
                        },
                        size,
                );
        }

        /// Submits the staged texture writes.
        pub fn flush(&self)
        {
                self.queue.submit(std::iter::empty());
        }
}

async fn adapter(instance: &wgpu::Instance) -> Result<wgpu::Adapter>
{
        instance.request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,

                // No window to present to.
                compatible_surface: None,

                force_fallback_adapter: false,
        })
        .await
        .map_err(|e| Error::DeviceCreationFailed(e.to_string()))
}

async fn device_queue(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)>
{
        adapter.request_device(&wgpu::DeviceDescriptor {
                label: Some("webtex_device_queue"),
                required_features: wgpu::Features::default(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
        })
        .await
        .map_err(|e| Error::DeviceCreationFailed(e.to_string()))
}

/// Requests a device without any surface, blocking on the adapter and device
/// futures.
pub fn request_headless_device() -> Result<(wgpu::Device, wgpu::Queue)>
{
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::PRIMARY,
                ..Default::default()
        });

        let adapter = pollster::block_on(adapter(&instance))?;

        log::info!("Using adapter {:?}", adapter.get_info().name);

        pollster::block_on(device_queue(&adapter))
}
