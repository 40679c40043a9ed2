pub mod auth;
pub mod reset;
pub mod status;
pub mod sync;

use color_eyre::eyre::{eyre, Context};
use episync_config::{Config, PathManager};

/// Load config.toml or explain how to create it.
pub fn load_config(paths: &PathManager) -> color_eyre::Result<Config> {
    let path = paths.config_file();
    if !path.exists() {
        return Err(eyre!(
            "No config file at {}. Create it with [trakt] client_id/client_secret/username and [serializd] email/username sections.",
            path.display()
        ));
    }
    Config::load(&path)
        .map_err(|e| eyre!(e))
        .wrap_err("failed to load configuration")
}
