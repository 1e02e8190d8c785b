use colored::*;

use crate::utils::random::get_random_u128;

pub fn get_exit_message(config: &crate::Config) -> String
{
        if !config.show_exit_message
        {
                return String::from("");
        }

        let messages = [
                ("Every web view has been unbound from its texture.", "red"),
                ("The render thread sampled its last frame.", "magenta"),
                ("All pages were navigated to about:blank, permanently.", "yellow"),
                ("The compositor flushed and went quiet.", "cyan"),
                ("History cleared. There is nothing to go back to.", "green"),
                ("Textures released, handles retired, device returned.", "blue"),
                ("The last postMessage went unanswered.", "purple"),
                ("Shutdown signalled and honoured by every worker.", "white"),
                ("Stale frame on screen. It will stay there.", "bright red"),
                ("Resource state: Released.", "bright yellow"),
        ];

        let choice = get_random_u128(messages.len() as u128).unwrap_or(0) as usize;

        let Some((message, color)) = messages.get(choice)
        else
        {
                return String::new();
        };

        match *color
        {
                "red" => message.red().to_string(),
                "magenta" => message.magenta().to_string(),
                "yellow" => message.yellow().to_string(),
                "cyan" => message.cyan().to_string(),
                "green" => message.green().to_string(),
                "blue" => message.blue().to_string(),
                "purple" => message.purple().to_string(),
                "white" => message.white().to_string(),
                "bright red" => message.bright_red().to_string(),
                "bright yellow" => message.bright_yellow().to_string(),
                _ => message.to_string(),
        }
}

#[cfg(test)]
mod tests
{
        use super::*;

        #[test]
        fn silenced_by_config()
        {
                let config = crate::Config {
                        show_exit_message: false,
                        ..crate::Config::default()
                };

                assert!(get_exit_message(&config).is_empty());
                assert!(!get_exit_message(&crate::Config::default()).is_empty());
        }
}
