use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use kube::{Client, CustomResourceExt};
use restcall_operator::{BackoffConfig, Controller, KubeStore, OperatorConfig, RestCall};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "restcall-controller")]
#[command(about = "Calls the endpoint of every RestCall resource and records the response")]
struct Args {
    /// JSON config file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    workers: Option<usize>,

    /// Watch a single namespace instead of the whole cluster.
    #[arg(long)]
    namespace: Option<String>,

    #[arg(long)]
    resync_secs: Option<u64>,

    #[arg(long)]
    http_timeout_secs: Option<u64>,

    #[arg(long)]
    max_response_bytes: Option<usize>,

    #[arg(long)]
    backoff_initial_ms: Option<u64>,

    #[arg(long)]
    backoff_max_secs: Option<u64>,

    #[arg(long)]
    fail_on_error_status: bool,

    /// Print the RestCall CustomResourceDefinition and exit.
    #[arg(long)]
    print_crd: bool,
}

impl Args {
    fn operator_config(&self) -> Result<OperatorConfig> {
        let mut config = match &self.config {
            Some(path) => OperatorConfig::from_file(path)?,
            None => OperatorConfig::default(),
        };

        if let Some(workers) = self.workers {
            config.controller = config.controller.with_workers(workers);
        }
        if let Some(namespace) = &self.namespace {
            config.controller = config.controller.with_namespace(namespace.clone());
        }
        if let Some(secs) = self.resync_secs {
            config.controller = config.controller.with_resync_period(Duration::from_secs(secs));
        }
        if let Some(secs) = self.http_timeout_secs {
            config.http = config.http.with_timeout(Duration::from_secs(secs));
        }
        if let Some(bytes) = self.max_response_bytes {
            config.http = config.http.with_max_response_bytes(bytes);
        }
        if self.fail_on_error_status {
            config.http = config.http.with_fail_on_error_status(true);
        }
        if self.backoff_initial_ms.is_some() || self.backoff_max_secs.is_some() {
            let initial = self
                .backoff_initial_ms
                .map(Duration::from_millis)
                .unwrap_or(config.backoff.initial);
            let max = self
                .backoff_max_secs
                .map(Duration::from_secs)
                .unwrap_or(config.backoff.max);
            config.backoff = BackoffConfig::new(initial, max);
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crd {
        println!("{}", serde_json::to_string_pretty(&RestCall::crd())?);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = args.operator_config()?;

    tracing::info!(
        "Starting RestCall controller (workers={}, namespace={}, resync={:?})",
        config.controller.workers,
        config.controller.namespace.as_deref().unwrap_or("<all>"),
        config.controller.resync_period
    );

    let client = Client::try_default().await?;
    let store = Arc::new(KubeStore::new(client, config.controller.namespace.clone()));
    let controller = Controller::new(store, &config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received shutdown signal");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                // This task owns the sender and never finishes, so the
                // controller keeps running until the process is killed.
                std::future::pending::<()>().await;
            }
        }
    });

    controller.run(shutdown_rx).await;

    Ok(())
}
