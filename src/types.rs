//! Value types shared by the registry, the engine boundary and the C ABI.
//!
//! Everything in here is a plain value: handles, creation parameters and
//! input events. None of it retains state between calls.

use std::fmt;
use std::num::NonZeroU32;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Scale applied to normalized wheel deltas before they reach the engine.
///
/// One notch of a classic mouse wheel.
pub const WHEEL_DELTA: f32 = 120.0;

/// Opaque identifier of a web view instance.
///
/// Handles are assigned monotonically by the registry and are never reused
/// while the registry lives. The raw value `0` is reserved as the invalid
/// sentinel and is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceHandle(NonZeroU32);

impl InstanceHandle
{
        /// Raw value used by the C ABI to signal "no instance".
        pub const INVALID_RAW: u32 = 0;

        pub fn from_raw(raw: u32) -> Option<Self>
        {
                NonZeroU32::new(raw).map(Self)
        }

        pub fn raw(self) -> u32
        {
                self.0.get()
        }
}

impl fmt::Display for InstanceHandle
{
        fn fmt(
                &self,
                f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result
        {
                write!(f, "#{}", self.0)
        }
}

/// Token identifying one navigation request.
///
/// Returned by every navigation call and echoed in the matching
/// [`NavigationCompleted`](crate::dispatch::NavigationCompleted) event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NavigationId(pub u64);

impl fmt::Display for NavigationId
{
        fn fmt(
                &self,
                f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result
        {
                write!(f, "nav-{}", self.0)
        }
}

/// Parameters consumed once by [`Registry::create_instance`](crate::registry::Registry::create_instance).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateParams
{
        /// Texture and viewport width in pixels.
        pub width: u32,

        /// Texture and viewport height in pixels.
        pub height: u32,

        /// Persistent storage (cookies, cache). Falls back to the configured
        /// default, then to a directory under the system temp dir.
        pub user_data_dir: Option<PathBuf>,

        /// Destination loaded right after creation. No navigation happens when
        /// this is `None`.
        pub initial_url: Option<String>,

        pub enable_dev_tools: bool,
}

impl CreateParams
{
        pub fn new(
                width: u32,
                height: u32,
        ) -> Self
        {
                Self {
                        width,
                        height,
                        user_data_dir: None,
                        initial_url: None,
                        enable_dev_tools: false,
                }
        }

        pub fn with_initial_url(
                mut self,
                url: impl Into<String>,
        ) -> Self
        {
                self.initial_url = Some(url.into());
                self
        }

        pub fn with_user_data_dir(
                mut self,
                dir: impl Into<PathBuf>,
        ) -> Self
        {
                self.user_data_dir = Some(dir.into());
                self
        }

        pub fn with_dev_tools(
                mut self,
                enabled: bool,
        ) -> Self
        {
                self.enable_dev_tools = enabled;
                self
        }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MouseEventKind
{
        Move = 0,
        Down = 1,
        Up = 2,
        Wheel = 3,
        Leave = 4,
}

impl MouseEventKind
{
        pub fn from_raw(raw: i32) -> Option<Self>
        {
                match raw
                {
                        0 => Some(Self::Move),
                        1 => Some(Self::Down),
                        2 => Some(Self::Up),
                        3 => Some(Self::Wheel),
                        4 => Some(Self::Leave),
                        _ => None,
                }
        }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum MouseButton
{
        #[default]
        None = 0,
        Left = 1,
        Right = 2,
        Middle = 3,
}

impl MouseButton
{
        pub fn from_raw(raw: i32) -> Option<Self>
        {
                match raw
                {
                        0 => Some(Self::None),
                        1 => Some(Self::Left),
                        2 => Some(Self::Right),
                        3 => Some(Self::Middle),
                        _ => None,
                }
        }
}

/// A mouse event in normalized texture space.
///
/// `x` and `y` are UV coordinates in `[0, 1]`. Values outside that range are
/// clamped before the event is forwarded; NaN is treated as `0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseEvent
{
        pub kind: MouseEventKind,
        pub button: MouseButton,
        pub x: f32,
        pub y: f32,

        /// Wheel notches, only meaningful for [`MouseEventKind::Wheel`].
        pub wheel_delta: f32,
}

impl MouseEvent
{
        pub fn new(
                kind: MouseEventKind,
                button: MouseButton,
                x: f32,
                y: f32,
        ) -> Self
        {
                Self {
                        kind,
                        button,
                        x,
                        y,
                        wheel_delta: 0.0,
                }
        }

        pub fn wheel(
                x: f32,
                y: f32,
                delta: f32,
        ) -> Self
        {
                Self {
                        kind: MouseEventKind::Wheel,
                        button: MouseButton::None,
                        x,
                        y,
                        wheel_delta: delta,
                }
        }

        /// Clamps the coordinates and maps them onto a `width` x `height`
        /// pixel grid.
        pub fn to_pixels(
                &self,
                width: u32,
                height: u32,
        ) -> PixelMouseEvent
        {
                let wheel_delta = if self.kind == MouseEventKind::Wheel && self.wheel_delta.is_finite()
                {
                        (self.wheel_delta * WHEEL_DELTA) as i32
                }
                else
                {
                        0
                };

                PixelMouseEvent {
                        kind: self.kind,
                        button: self.button,
                        x: to_pixel(self.x, width),
                        y: to_pixel(self.y, height),
                        wheel_delta,
                }
        }
}

/// Clamps a normalized coordinate into `[0, 1]`.
pub fn clamp_unit(value: f32) -> f32
{
        if value.is_nan()
        {
                return 0.0;
        }

        value.clamp(0.0, 1.0)
}

fn to_pixel(
        value: f32,
        extent: u32,
) -> u32
{
        if extent == 0
        {
                return 0;
        }

        let scaled = (clamp_unit(value) * extent as f32) as u32;

        scaled.min(extent - 1)
}

/// A mouse event after clamping, in viewport pixels. This is the form the
/// engine receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelMouseEvent
{
        pub kind: MouseEventKind,
        pub button: MouseButton,
        pub x: u32,
        pub y: u32,
        pub wheel_delta: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyEvent
{
        pub virtual_key_code: u32,
        pub scan_code: u32,
        pub is_key_down: bool,
        pub is_system_key: bool,
}

impl KeyEvent
{
        pub fn down(
                virtual_key_code: u32,
                scan_code: u32,
        ) -> Self
        {
                Self {
                        virtual_key_code,
                        scan_code,
                        is_key_down: true,
                        is_system_key: false,
                }
        }

        pub fn up(
                virtual_key_code: u32,
                scan_code: u32,
        ) -> Self
        {
                Self {
                        virtual_key_code,
                        scan_code,
                        is_key_down: false,
                        is_system_key: false,
                }
        }
}

/// Render event ids the host may issue from its graphics thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RenderEvent
{
        Initialize = 0,
        Shutdown = 1,
        UpdateTexture = 2,
}

impl RenderEvent
{
        pub fn from_raw(raw: i32) -> Option<Self>
        {
                match raw
                {
                        0 => Some(Self::Initialize),
                        1 => Some(Self::Shutdown),
                        2 => Some(Self::UpdateTexture),
                        _ => None,
                }
        }
}
