//! webtex: embedded web views rendered into host GPU textures.
//!
//! A [`Registry`] owns any number of web view instances. Each instance is an
//! engine session (see [`engine`]) plus a texture on the host's graphics
//! device (see [`backend`]). The host drives three kinds of threads:
//!
//! - a control thread creating, navigating, resizing and destroying
//!   instances,
//! - a render thread calling [`Registry::update_textures`] once per frame,
//! - engine threads that report navigation results, script messages and log
//!   lines through the callbacks in [`dispatch`].
//!
//! Native hosts use the C ABI in [`ffi`]; Rust hosts use the registry
//! directly.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use webtex::{Config, CreateParams, GraphicsContext, Registry};
//!
//! let registry = Arc::new(Registry::with_headless_engine(Config::default()));
//!
//! registry.initialize(GraphicsContext::software()).unwrap();
//!
//! let view = registry
//!         .create_instance(CreateParams::new(800, 600).with_initial_url("https://example.com"))
//!         .unwrap();
//!
//! // Render thread, every frame:
//! registry.update_textures().unwrap();
//!
//! registry.destroy_instance(view).unwrap();
//! registry.shutdown();
//! ```

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod instance;
pub mod registry;
pub mod shutdown;
pub mod types;
pub mod utils;

use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

pub use crate::backend::{BackendTexture, GraphicsApi, GraphicsContext};
pub use crate::config::Config;
pub use crate::dispatch::{DeviceEvent, NavigationCompleted};
pub use crate::error::{Error, Result};
pub use crate::registry::{Lifecycle, Registry};
pub use crate::types::{CreateParams, InstanceHandle, KeyEvent, MouseButton, MouseEvent, MouseEventKind, NavigationId};

use crate::utils::exit::get_exit_message;

const DEMO_URLS: [&str; 2] = ["https://example.com/", "https://example.org/"];

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(5);

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Blocks until the navigation `id` completes, draining queued events while
/// waiting.
fn wait_for_navigation(
        registry: &Registry,
        completions: &mpsc::Receiver<NavigationCompleted>,
        id: NavigationId,
) -> anyhow::Result<NavigationCompleted>
{
        let started = Instant::now();

        loop
        {
                registry.dispatch_pending();

                match completions.recv_timeout(Duration::from_millis(25))
                {
                        Ok(completed) if completed.navigation_id == id => return Ok(completed),
                        Ok(_) | Err(mpsc::RecvTimeoutError::Timeout) =>
                        {}
                        Err(mpsc::RecvTimeoutError::Disconnected) =>
                        {
                                anyhow::bail!("navigation callback dropped while waiting for {id}")
                        }
                }

                if started.elapsed() > NAVIGATION_TIMEOUT
                {
                        anyhow::bail!("{id} did not complete within {NAVIGATION_TIMEOUT:?}");
                }
        }
}

/// Runs the demo: one 800x600 view, a render thread and a few navigations.
pub fn run_webtex() -> anyhow::Result<()>
{
        utils::bootstrap::config_logging();

        let config = utils::bootstrap::create_config();

        utils::bootstrap::show_start_message(&config);

        let context = GraphicsContext::create_wgpu_headless().unwrap_or_else(|err| {
                log::warn!("No GPU device available ({err}), using the software backend");
                GraphicsContext::software()
        });

        let registry = Arc::new(Registry::with_headless_engine(config.clone()));

        let (completions_tx, completions) = mpsc::channel();

        registry.set_navigation_callback(Some(Arc::new(move |completed: &NavigationCompleted| {
                log::info!(
                        "{} {} -> {} ({})",
                        completed.handle,
                        completed.navigation_id,
                        completed.url,
                        if completed.success { "ok" } else { "failed" }
                );

                let _ = completions_tx.send(completed.clone());
        })));

        registry.set_message_callback(Some(Arc::new(|handle: InstanceHandle, payload: &str| {
                log::info!("{handle} says {payload:?}");
        })));

        registry.initialize(context)?;

        let view = registry.create_instance(CreateParams::new(800, 600))?;

        let render_thread = {
                let registry = registry.clone();

                std::thread::Builder::new()
                        .name("webtex-render".into())
                        .spawn(move || {
                                let mut copied = 0;

                                while let Ok(updated) = registry.update_textures()
                                {
                                        copied += updated;

                                        std::thread::sleep(FRAME_INTERVAL);
                                }

                                copied
                        })?
        };

        for url in DEMO_URLS
        {
                let id = registry.navigate(view, url)?;

                wait_for_navigation(&registry, &completions, id)?;
        }

        registry.execute_script(view, "window.chrome.webview.postMessage('hello from the page')")?;

        if let Some(id) = registry.go_back(view)?
        {
                let completed = wait_for_navigation(&registry, &completions, id)?;

                log::info!("Back at {}", completed.url);
        }

        registry.send_mouse_event(
                view,
                MouseEvent::new(MouseEventKind::Move, MouseButton::None, 0.5, 0.5),
        )?;

        std::thread::sleep(FRAME_INTERVAL * 6);

        registry.dispatch_pending();

        if let Some(BackendTexture::Software(texture)) = registry.texture(view)?
        {
                texture.to_rgba_image().save("webtex_snapshot.png")?;

                log::info!("Wrote webtex_snapshot.png");
        }

        registry.signal_shutdown();

        let copied = render_thread
                .join()
                .map_err(|_| anyhow::anyhow!("render thread panicked"))?;

        log::info!("Render thread copied {copied} frame(s)");

        registry.shutdown();

        let msg = get_exit_message(&config);

        log::info!("{msg}");

        Ok(())
}
