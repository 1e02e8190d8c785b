use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable that points at an alternative config file.
pub const CONFIG_ENV: &str = "WEBTEX_CONFIG";

/// Config file looked up in the working directory when [`CONFIG_ENV`] is unset.
pub const CONFIG_FILE: &str = "webtex.toml";

/// When engine events reach the host callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode
{
        /// Callbacks run on the engine thread that produced the event.
        #[default]
        Immediate,

        /// Events are buffered until the host drains them with
        /// [`Registry::dispatch_pending`](crate::registry::Registry::dispatch_pending).
        Queued,
}

/// Pixel layout of the host-visible textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureFormat
{
        #[default]
        Rgba8,
        Bgra8,
}

impl TextureFormat
{
        pub fn wgpu_format(self) -> wgpu::TextureFormat
        {
                match self
                {
                        TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8UnormSrgb,
                        TextureFormat::Bgra8 => wgpu::TextureFormat::Bgra8UnormSrgb,
                }
        }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig
{
        /// Simulated page-load latency of the built-in headless engine.
        pub load_delay_ms: u64,
}

impl Default for EngineConfig
{
        fn default() -> Self
        {
                Self {
                        load_delay_ms: 15,
                }
        }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
        pub dispatch: DispatchMode,

        /// Copy frames bottom-up, for hosts whose texture origin is the
        /// bottom-left corner.
        pub flip_y: bool,

        pub texture_format: TextureFormat,

        /// Default persistent storage root for instances created without
        /// their own `user_data_dir`.
        pub user_data_dir: Option<PathBuf>,

        pub show_start_message: bool,
        pub show_exit_message: bool,

        pub engine: EngineConfig,
}

impl Default for Config
{
        fn default() -> Self
        {
                Self {
                        dispatch: DispatchMode::Immediate,
                        flip_y: false,
                        texture_format: TextureFormat::Rgba8,
                        user_data_dir: None,
                        show_start_message: true,
                        show_exit_message: true,
                        engine: EngineConfig::default(),
                }
        }
}

impl Config
{
        /// Loads the file named by `WEBTEX_CONFIG`, or `webtex.toml` in the
        /// working directory.
        pub fn from_file() -> anyhow::Result<Self>
        {
                let path = std::env::var_os(CONFIG_ENV)
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

                Self::from_path(path)
        }

        pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self>
        {
                let path = path.as_ref();

                let text = std::fs::read_to_string(path)
                        .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;

                Self::from_toml_str(&text)
        }

        pub fn from_toml_str(text: &str) -> anyhow::Result<Self>
        {
                let config = toml::from_str(text)?;

                Ok(config)
        }

        pub fn to_toml_string(&self) -> anyhow::Result<String>
        {
                Ok(toml::to_string_pretty(self)?)
        }
}

#[cfg(test)]
mod tests
{
        use super::*;

        use std::io::Write;

        #[test]
        fn missing_fields_take_defaults()
        {
                let config = Config::from_toml_str("flip_y = true\n").unwrap();

                assert!(config.flip_y);
                assert_eq!(config.dispatch, DispatchMode::Immediate);
                assert_eq!(config.engine, EngineConfig::default());
        }

        #[test]
        fn nested_engine_table_is_read()
        {
                let text = r#"
dispatch = "queued"
texture_format = "bgra8"

[engine]
load_delay_ms = 250
"#;

                let config = Config::from_toml_str(text).unwrap();

                assert_eq!(config.dispatch, DispatchMode::Queued);
                assert_eq!(config.texture_format, TextureFormat::Bgra8);
                assert_eq!(config.engine.load_delay_ms, 250);
        }

        #[test]
        fn unknown_dispatch_mode_is_rejected()
        {
                assert!(Config::from_toml_str("dispatch = \"later\"\n").is_err());
        }

        #[test]
        fn loads_from_a_file_on_disk()
        {
                let mut file = tempfile::NamedTempFile::new().unwrap();

                writeln!(file, "show_exit_message = false").unwrap();

                let config = Config::from_path(file.path()).unwrap();

                assert!(!config.show_exit_message);
                assert!(config.show_start_message);
        }

        #[test]
        fn missing_file_is_an_error()
        {
                let dir = tempfile::tempdir().unwrap();

                assert!(Config::from_path(dir.path().join("absent.toml")).is_err());
        }

        #[test]
        fn serialized_config_reads_back()
        {
                let mut config = Config::default();
                config.user_data_dir = Some(PathBuf::from("/tmp/webtex-data"));

                let text = config.to_toml_string().unwrap();

                assert_eq!(Config::from_toml_str(&text).unwrap(), config);
        }
}
