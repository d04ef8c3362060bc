//! `config show` and `config path`.

use super::Context;
use crate::cli::ConfigCommands;
use crate::config::Config;
use crate::error::Result;

/// Run a config subcommand.
pub fn config(ctx: &Context, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            print!("{}", serde_yaml::to_string(&ctx.config)?);
        }
        ConfigCommands::Path => {
            let config =
                Config::user_config_path().map_or_else(|| "<unknown>".to_string(), |p| p.display().to_string());
            println!("config: {config}");
            println!("state:  {}", ctx.state_path.display());
        }
    }
    Ok(())
}
