use sidecar::output::UserOutput;
use sidecar::server::NoAppRoutes;
use sidecar::session::HeadlessSurface;
use sidecar::{Config, ProjectController};
use std::path::PathBuf;
use std::sync::Arc;

pub async fn run_serve(
    project: &str,
    dir: Option<PathBuf>,
    config: Config,
    out: Arc<dyn UserOutput>,
) -> anyhow::Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let controller = ProjectController::from_config(
        &config,
        Arc::new(HeadlessSurface::new()),
        Arc::new(NoAppRoutes),
        out.clone(),
    )?;

    let (instance, outcome) = controller.open_project(project, &dir).await?;
    tracing::info!("Initial reconciliation: {:?}", outcome);
    out.status(&format!(
        "Serving '{}' on {} (Ctrl-C to stop)",
        instance.project_key, instance.base_url
    ));

    tokio::signal::ctrl_c().await?;
    out.status("Stopping...");
    controller.close_project().await;
    Ok(())
}
