use crate::cli::TokenCommands;
use sidecar::credential::{CredentialStore, JsonFileStore};
use sidecar::output::UserOutput;
use sidecar::Config;
use std::sync::Arc;

pub fn run_token(cmd: &TokenCommands, config: &Config, out: &dyn UserOutput) -> anyhow::Result<()> {
    let path = config.storage.credentials_path()?;
    let store = CredentialStore::new(Arc::new(JsonFileStore::open(&path)?));

    match cmd {
        TokenCommands::Get { project } => match store.get(project)? {
            Some(token) => println!("{}", token),
            None => out.warning(&format!("No token stored for '{}'", project)),
        },
        TokenCommands::Set { project, token } => {
            store.set(project, token)?;
            out.success(&format!("Stored token for '{}'", project));
        }
        TokenCommands::Clear { project } => {
            store.clear(project)?;
            out.success(&format!("Cleared token for '{}'", project));
        }
        TokenCommands::ClearAll => {
            store.clear_all()?;
            out.success(&format!("Cleared all tokens in {}", path.display()));
        }
        TokenCommands::List => {
            let keys = store.project_keys()?;
            if keys.is_empty() {
                out.status("No tokens stored.");
            }
            for key in keys {
                out.status(&key);
            }
        }
    }
    Ok(())
}
