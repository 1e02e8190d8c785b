//! C ABI over one process-wide [`Registry`].
//!
//! Hosts either call [`install`] from Rust before loading any native code or
//! let the first ABI call create a registry from the file config and the
//! headless engine. Every fallible function returns an [`Error::code`]
//! (`0` on success). Strings cross the boundary as NUL-terminated UTF-8; a
//! null string reads as empty. Strings handed to callbacks are only valid for
//! the duration of the call.
//!
//! No call hands out a texture a native host can sample directly.
//! `webtex_initialize(1)` creates a private headless wgpu device whose
//! textures live outside the host's device. Native hosts use the software
//! backend and read frames back with [`webtex_copy_texture_pixels`]. Rust hosts
//! that own a wgpu device pass it to [`Registry::initialize`] and sample
//! [`Registry::texture`] instead.

use std::borrow::Cow;
use std::ffi::{CStr, CString, c_char};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::backend::{GraphicsApi, GraphicsContext};
use crate::dispatch::{DeviceEvent, NavigationCompleted};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::types::{CreateParams, InstanceHandle, KeyEvent, MouseButton, MouseEvent, MouseEventKind, RenderEvent};

pub const WEBTEX_ABI_VERSION: u32 = 1;

pub type WebtexLogCallback = Option<extern "C" fn(level: i32, message: *const c_char)>;
pub type WebtexNavigationCallback = Option<extern "C" fn(handle: u32, url: *const c_char, success: bool)>;
pub type WebtexMessageCallback = Option<extern "C" fn(handle: u32, message: *const c_char)>;
pub type WebtexDeviceEventCallback = Option<extern "C" fn(event: i32)>;

static REGISTRY: RwLock<Option<Arc<Registry>>> = RwLock::new(None);

/// Makes `registry` the one the ABI operates on. Returns the previous one.
pub fn install(registry: Arc<Registry>) -> Option<Arc<Registry>>
{
        REGISTRY.write().unwrap_or_else(|e| e.into_inner()).replace(registry)
}

/// Detaches the process-wide registry. It shuts down once the last clone is
/// dropped.
pub fn uninstall() -> Option<Arc<Registry>>
{
        REGISTRY.write().unwrap_or_else(|e| e.into_inner()).take()
}

fn registry() -> Arc<Registry>
{
        if let Some(registry) = REGISTRY.read().unwrap_or_else(|e| e.into_inner()).as_ref()
        {
                return registry.clone();
        }

        let mut slot = REGISTRY.write().unwrap_or_else(|e| e.into_inner());

        slot.get_or_insert_with(|| {
                let config = crate::utils::bootstrap::create_config();

                Arc::new(Registry::with_headless_engine(config))
        })
        .clone()
}

/// Runs `f`, turning its result (or a panic) into an ABI code.
fn guard(f: impl FnOnce() -> Result<()>) -> i32
{
        match catch_unwind(AssertUnwindSafe(f))
        {
                Ok(result) => Error::code_of(&result),
                Err(_) =>
                {
                        log::error!("panic caught at the C boundary");
                        Error::Unknown(String::new()).code()
                }
        }
}

fn handle(raw: u32) -> Result<InstanceHandle>
{
        InstanceHandle::from_raw(raw).ok_or(Error::InvalidHandle(raw))
}

/// # Safety
/// `ptr` must be null or point at a NUL-terminated string that outlives the
/// returned value.
unsafe fn read_str<'a>(ptr: *const c_char) -> Cow<'a, str>
{
        if ptr.is_null()
        {
                return Cow::Borrowed("");
        }

        unsafe { CStr::from_ptr(ptr) }.to_string_lossy()
}

fn optional(text: Cow<'_, str>) -> Option<String>
{
        (!text.is_empty()).then(|| text.into_owned())
}

fn to_c_string(text: &str) -> CString
{
        CString::new(text.replace('\0', " ")).unwrap_or_default()
}

pub fn log_level_code(level: log::Level) -> i32
{
        match level
        {
                log::Level::Info => 0,
                log::Level::Warn => 1,
                log::Level::Error => 2,
                log::Level::Debug | log::Level::Trace => 3,
        }
}

fn context_for(api: GraphicsApi) -> Result<GraphicsContext>
{
        match api
        {
                GraphicsApi::Wgpu => GraphicsContext::create_wgpu_headless(),
                GraphicsApi::Software => Ok(GraphicsContext::software()),
        }
}

#[unsafe(no_mangle)]
pub extern "C" fn webtex_abi_version() -> u32
{
        WEBTEX_ABI_VERSION
}

#[unsafe(no_mangle)]
pub extern "C" fn webtex_initialize(api: i32) -> i32
{
        guard(|| {
                let api = GraphicsApi::from_raw(api)?;

                registry().initialize(context_for(api)?)
        })
}

#[unsafe(no_mangle)]
pub extern "C" fn webtex_shutdown() -> i32
{
        guard(|| {
                registry().shutdown();
                Ok(())
        })
}

/// First phase of shutdown, for the host's application-quit hook.
#[unsafe(no_mangle)]
pub extern "C" fn webtex_signal_application_quit() -> i32
{
        guard(|| {
                registry().signal_shutdown();
                Ok(())
        })
}

#[unsafe(no_mangle)]
pub extern "C" fn webtex_is_initialized() -> bool
{
        registry().is_initialized()
}

#[unsafe(no_mangle)]
pub extern "C" fn webtex_set_log_callback(callback: WebtexLogCallback) -> i32
{
        guard(|| {
                registry().set_log_callback(callback.map(|f| {
                        Arc::new(move |level: log::Level, message: &str| {
                                let message = to_c_string(message);

                                f(log_level_code(level), message.as_ptr());
                        }) as crate::dispatch::LogCallback
                }));

                Ok(())
        })
}

#[unsafe(no_mangle)]
pub extern "C" fn webtex_set_navigation_callback(callback: WebtexNavigationCallback) -> i32
{
        guard(|| {
                registry().set_navigation_callback(callback.map(|f| {
                        Arc::new(move |completed: &NavigationCompleted| {
                                let url = to_c_string(&completed.url);

                                f(completed.handle.raw(), url.as_ptr(), completed.success);
                        }) as crate::dispatch::NavigationCallback
                }));

                Ok(())
        })
}

#[unsafe(no_mangle)]
pub extern "C" fn webtex_set_message_callback(callback: WebtexMessageCallback) -> i32
{
        guard(|| {
                registry().set_message_callback(callback.map(|f| {
                        Arc::new(move |handle: InstanceHandle, payload: &str| {
                                let payload = to_c_string(payload);

                                f(handle.raw(), payload.as_ptr());
                        }) as crate::dispatch::MessageCallback
                }));

                Ok(())
        })
}

#[unsafe(no_mangle)]
pub extern "C" fn webtex_set_device_event_callback(callback: WebtexDeviceEventCallback) -> i32
{
        guard(|| {
                registry().set_device_event_callback(callback.map(|f| {
                        Arc::new(move |event: DeviceEvent| f(event as i32)) as crate::dispatch::DeviceEventCallback
                }));

                Ok(())
        })
}

/// # Safety
/// String arguments must be null or NUL-terminated. `out_handle` must be null
/// or valid for a `u32` write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn webtex_create_instance(
        width: u32,
        height: u32,
        user_data_dir: *const c_char,
        initial_url: *const c_char,
        enable_dev_tools: bool,
        out_handle: *mut u32,
) -> i32
{
        if out_handle.is_null()
        {
                return Error::NotInitialized.code();
        }

        unsafe { *out_handle = InstanceHandle::INVALID_RAW };

        let user_data_dir = optional(unsafe { read_str(user_data_dir) });
        let initial_url = optional(unsafe { read_str(initial_url) });

        guard(|| {
                let mut params = CreateParams::new(width, height).with_dev_tools(enable_dev_tools);

                params.user_data_dir = user_data_dir.map(PathBuf::from);
                params.initial_url = initial_url;

                let created = registry().create_instance(params)?;

                unsafe { *out_handle = created.raw() };

                Ok(())
        })
}

#[unsafe(no_mangle)]
pub extern "C" fn webtex_destroy_instance(raw: u32) -> i32
{
        guard(|| registry().destroy_instance(handle(raw)?))
}

#[unsafe(no_mangle)]
pub extern "C" fn webtex_resize(
        raw: u32,
        width: u32,
        height: u32,
) -> i32
{
        guard(|| registry().resize_instance(handle(raw)?, width, height))
}

/// # Safety
/// `out_width` and `out_height` must be null or valid for a `u32` write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn webtex_instance_size(
        raw: u32,
        out_width: *mut u32,
        out_height: *mut u32,
) -> i32
{
        guard(|| {
                let (width, height) = registry().instance_size(handle(raw)?)?;

                if !out_width.is_null()
                {
                        unsafe { *out_width = width };
                }

                if !out_height.is_null()
                {
                        unsafe { *out_height = height };
                }

                Ok(())
        })
}

/// # Safety
/// `url` must be null or NUL-terminated.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn webtex_navigate(
        raw: u32,
        url: *const c_char,
) -> i32
{
        let url = unsafe { read_str(url) };

        guard(|| registry().navigate(handle(raw)?, &url).map(|_| ()))
}

/// # Safety
/// `html` must be null or NUL-terminated.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn webtex_navigate_to_string(
        raw: u32,
        html: *const c_char,
) -> i32
{
        let html = unsafe { read_str(html) };

        guard(|| registry().navigate_to_raw(handle(raw)?, &html).map(|_| ()))
}

/// # Safety
/// `script` must be null or NUL-terminated.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn webtex_execute_script(
        raw: u32,
        script: *const c_char,
) -> i32
{
        let script = unsafe { read_str(script) };

        guard(|| registry().execute_script(handle(raw)?, &script))
}

#[unsafe(no_mangle)]
pub extern "C" fn webtex_go_back(raw: u32) -> i32
{
        guard(|| registry().go_back(handle(raw)?).map(|_| ()))
}

#[unsafe(no_mangle)]
pub extern "C" fn webtex_go_forward(raw: u32) -> i32
{
        guard(|| registry().go_forward(handle(raw)?).map(|_| ()))
}

/// `false` for unknown handles.
#[unsafe(no_mangle)]
pub extern "C" fn webtex_can_go_back(raw: u32) -> bool
{
        handle(raw).and_then(|h| registry().can_go_back(h)).unwrap_or(false)
}

/// `false` for unknown handles.
#[unsafe(no_mangle)]
pub extern "C" fn webtex_can_go_forward(raw: u32) -> bool
{
        handle(raw).and_then(|h| registry().can_go_forward(h)).unwrap_or(false)
}

#[unsafe(no_mangle)]
pub extern "C" fn webtex_send_mouse_event(
        raw: u32,
        kind: i32,
        button: i32,
        x: f32,
        y: f32,
        wheel_delta: f32,
) -> i32
{
        guard(|| {
                let kind = MouseEventKind::from_raw(kind)
                        .ok_or_else(|| Error::Unknown(format!("mouse event kind {kind}")))?;
                let button = MouseButton::from_raw(button)
                        .ok_or_else(|| Error::Unknown(format!("mouse button {button}")))?;

                let event = MouseEvent {
                        kind,
                        button,
                        x,
                        y,
                        wheel_delta,
                };

                registry().send_mouse_event(handle(raw)?, event)
        })
}

#[unsafe(no_mangle)]
pub extern "C" fn webtex_send_key_event(
        raw: u32,
        virtual_key_code: u32,
        scan_code: u32,
        is_key_down: bool,
        is_system_key: bool,
) -> i32
{
        guard(|| {
                let event = KeyEvent {
                        virtual_key_code,
                        scan_code,
                        is_key_down,
                        is_system_key,
                };

                registry().send_key_event(handle(raw)?, event)
        })
}

/// Render-thread hook. `raw` selects one instance; `0` means all of them.
#[unsafe(no_mangle)]
pub extern "C" fn webtex_render_event(
        event_id: i32,
        raw: u32,
) -> i32
{
        guard(|| {
                let event = RenderEvent::from_raw(event_id)
                        .ok_or_else(|| Error::Unknown(format!("render event {event_id}")))?;

                registry().on_render_event(event, InstanceHandle::from_raw(raw))
        })
}

#[unsafe(no_mangle)]
pub extern "C" fn webtex_device_lost() -> i32
{
        guard(|| registry().device_lost())
}

/// Binds a fresh device of the API the registry was initialized with.
#[unsafe(no_mangle)]
pub extern "C" fn webtex_device_restored() -> i32
{
        guard(|| {
                let registry = registry();

                let api = registry.graphics_api().ok_or(Error::NotInitialized)?;

                registry.device_restored(context_for(api)?)
        })
}

/// Returns how many queued events were delivered.
#[unsafe(no_mangle)]
pub extern "C" fn webtex_dispatch_pending() -> u32
{
        registry().dispatch_pending() as u32
}

/// Copies the texture of a software-backed instance as tightly packed
/// 32-bit texels. `out_required` receives the byte size of the surface;
/// nothing is copied if `len` is smaller.
///
/// # Safety
/// `out` must be null or valid for `len` bytes of writes. `out_required`
/// must be null or valid for a `usize` write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn webtex_copy_texture_pixels(
        raw: u32,
        out: *mut u8,
        len: usize,
        out_required: *mut usize,
) -> i32
{
        guard(|| {
                let texture = registry()
                        .texture(handle(raw)?)?
                        .ok_or_else(|| Error::TextureCreationFailed("texture pending".into()))?;

                let software = texture
                        .as_software()
                        .ok_or(Error::UnsupportedGraphicsApi(GraphicsApi::Wgpu as i32))?;

                let buffer: &mut [u8] = if out.is_null()
                {
                        &mut []
                }
                else
                {
                        unsafe { std::slice::from_raw_parts_mut(out, len) }
                };

                let required = software.copy_to(buffer);

                if !out_required.is_null()
                {
                        unsafe { *out_required = required };
                }

                Ok(())
        })
}
