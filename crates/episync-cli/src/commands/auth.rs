use crate::output::Output;
use color_eyre::eyre::eyre;
use episync_config::{CredentialStore, PathManager};
use episync_services::{SerializdClient, TraktClient, TrackingService};

pub async fn run_auth_trakt(force: bool, output: &Output) -> color_eyre::Result<()> {
    let paths = PathManager::default();
    paths.ensure_directories().map_err(|e| eyre!(e))?;
    let config = super::load_config(&paths)?;

    if force {
        let mut store = CredentialStore::new(paths.credentials_file());
        store.load().map_err(|e| eyre!(e))?;
        store.clear_trakt_tokens();
        store.save().map_err(|e| eyre!(e))?;
    }

    let mut client = TraktClient::new(
        config.trakt.client_id,
        config.trakt.client_secret,
        config.trakt.username,
    );
    client.authenticate().await?;
    output.success("Trakt authentication complete.");
    Ok(())
}

pub async fn run_auth_serializd(output: &Output) -> color_eyre::Result<()> {
    let paths = PathManager::default();
    paths.ensure_directories().map_err(|e| eyre!(e))?;
    let config = super::load_config(&paths)?;

    let mut client = SerializdClient::new(config.serializd.email, config.serializd.username);
    let password = rpassword::prompt_password(format!(
        "Serializd password for {}: ",
        client.email()
    ))?;
    client.login(&password).await?;
    output.success("Serializd authentication complete.");
    Ok(())
}
