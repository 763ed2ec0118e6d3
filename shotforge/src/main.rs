use shotforge::config::AppConfig;
use shotforge::logging;
use shotforge::services::ServiceContainer;
use shotforge::supervisor::Supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;

    // Keep the guard alive so buffered file logs are flushed on exit.
    let (logging, _guard) = logging::init_logging(&config.log_dir, config.log_json)?;

    let container = ServiceContainer::new(config).await?;
    let mut supervisor = Supervisor::new(container).with_logging(logging);

    if let Err(e) = supervisor.start().await {
        tracing::error!(error = %e, "Failed to start job subsystem");
        supervisor.shutdown().await?;
        return Err(e.into());
    }

    supervisor.run_until_shutdown().await?;
    Ok(())
}
