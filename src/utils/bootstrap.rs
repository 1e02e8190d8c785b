pub fn show_start_message(config: &crate::Config)
{
        if !config.show_start_message
        {
                return;
        }

        let webtex_string = r#"

 ░██       ░██ ░██████████ ░████████  ░██████████ ░██████████ ░██    ░██
 ░██       ░██ ░██         ░██    ░██     ░██     ░██          ░██  ░██
 ░██  ░██  ░██ ░██         ░██    ░██     ░██     ░██           ░██░██
 ░██ ░████ ░██ ░█████████  ░████████      ░██     ░█████████     ░███
 ░██░██ ░██░██ ░██         ░██     ░██    ░██     ░██           ░██░██
 ░████   ░████ ░██         ░██     ░██    ░██     ░██          ░██  ░██
 ░███     ░███ ░██████████ ░█████████     ░██     ░██████████ ░██    ░██

 Embedded web views rendered into host GPU textures.
(ASCII art generated @ https://www.patorjk.com/software/taag/
[font: Terrace])

            "#;

        log::info!("{webtex_string}")
}

/// Installs `env_logger`. Safe to call more than once.
pub fn config_logging()
{
        if env_logger::try_init().is_ok()
        {
                log::info!("Logging configured.");
        }
}

pub fn create_config() -> crate::Config
{
        crate::Config::from_file().unwrap_or_else(|err| {
                log::warn!("Failed to load config: {err}, falling back to default");
                crate::Config::default()
        })
}
