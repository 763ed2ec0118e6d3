//! Process lifecycle: start every worker and background service, wait for a
//! termination signal, then drain and release resources.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::Result;
use crate::logging::LoggingConfig;
use crate::services::ServiceContainer;

pub struct Supervisor {
    container: ServiceContainer,
    logging: Option<Arc<LoggingConfig>>,
    background: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(container: ServiceContainer) -> Self {
        Self {
            container,
            logging: None,
            background: Vec::new(),
        }
    }

    /// Also run log retention for the installed subscriber.
    pub fn with_logging(mut self, logging: Arc<LoggingConfig>) -> Self {
        self.logging = Some(logging);
        self
    }

    pub fn container(&self) -> &ServiceContainer {
        &self.container
    }

    /// Start workers, register recurring jobs, start the scheduler, purge and log retention.
    pub async fn start(&mut self) -> Result<()> {
        for worker in &self.container.workers {
            worker.start()?;
        }

        self.container.scheduler.register_all().await?;

        let token = self.container.cancellation_token();
        self.background
            .push(self.container.scheduler.clone().start(token.clone()));
        self.background
            .push(self.container.purge.clone().start_background_task(token.clone()));
        if let Some(logging) = &self.logging {
            self.background
                .push(logging.start_retention_cleanup(token.clone()));
        }

        info!(
            workers = self.container.workers.len(),
            "Job subsystem started"
        );
        Ok(())
    }

    /// Block until SIGINT or SIGTERM, then shut down.
    pub async fn run_until_shutdown(self) -> Result<()> {
        wait_for_signal().await;
        self.shutdown().await
    }

    /// Stop leasing, drain workers within their grace periods and close the pools.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down job subsystem");
        self.container.cancellation_token().cancel();

        join_all(self.container.workers.iter().map(|worker| worker.stop())).await;

        let background = join_all(self.background);
        if tokio::time::timeout(Duration::from_secs(5), background)
            .await
            .is_err()
        {
            warn!("Background services did not stop in time");
        }

        info!("Closing database pools...");
        self.container.write_pool.close().await;
        self.container.pool.close().await;

        info!("Job subsystem shut down");
        Ok(())
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
