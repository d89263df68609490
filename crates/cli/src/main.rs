use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use kwatch_store::{KindSource, OutputSink, Supervisor};
use tokio::signal;
use tracing::{debug, info, warn};

mod config;

use config::WatchConfig;

/*
    kwatch -n kube-system deployments,pods [-l "app=web"] [NAME ...]
*/

#[derive(Parser, Debug)]
#[command(name = "kwatch", version, about = "Watch Kubernetes resources and print a diff for every change")]
struct Cli {
    /// Comma-separated resource kinds, e.g. "deployments,pods" or "apps/v1/Deployment"
    kinds: String,

    /// Only show objects with these names
    names: Vec<String>,

    /// Kubernetes namespace to watch resources in
    #[arg(short = 'n', long = "namespace", env = "KWATCH_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Watch all namespaces
    #[arg(short = 'A', long = "all-namespaces", action = ArgAction::SetTrue)]
    all_namespaces: bool,

    /// Label selector as an alternative to specifying resource names
    #[arg(short = 'l', long = "labels")]
    labels: Option<String>,

    /// kubeconfig file to use (default: $KUBECONFIG or in-cluster config)
    #[arg(long = "kubeconfig")]
    kubeconfig: Option<PathBuf>,

    /// Number of unchanged lines shown around each change
    #[arg(short = 'C', long = "context-lines", env = "KWATCH_CONTEXT_LINES", default_value_t = 3)]
    context_lines: usize,

    /// Color theme for CREATE blocks (default, green, red, plain)
    #[arg(long = "create-theme", env = "KWATCH_CREATE_THEME", default_value = "green")]
    create_theme: String,

    /// Color theme for UPDATE blocks (default, green, red, plain)
    #[arg(long = "update-theme", env = "KWATCH_UPDATE_THEME", default_value = "default")]
    update_theme: String,

    /// Color theme for DELETE blocks (default, green, red, plain)
    #[arg(long = "delete-theme", env = "KWATCH_DELETE_THEME", default_value = "red")]
    delete_theme: String,

    /// Disable colored output
    #[arg(long = "no-color", action = ArgAction::SetTrue)]
    no_color: bool,

    /// Only compare the part of each object matched by this path, e.g. "{.spec}"
    #[arg(short = 'j', long = "jsonpath")]
    jsonpath: Option<String>,

    /// Remove this path from objects before comparing (repeatable)
    #[arg(short = 'e', long = "exclude")]
    exclude: Vec<String>,

    /// Keep metadata.managedFields in the output
    #[arg(long = "show-managed", action = ArgAction::SetTrue)]
    show_managed: bool,

    /// Print the last known state of deleted objects
    #[arg(long = "show-deleted", action = ArgAction::SetTrue)]
    show_deleted: bool,

    /// Enable more verbose output
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    verbose: bool,
}

impl From<&Cli> for WatchConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            kinds: vec![cli.kinds.clone()],
            names: cli.names.clone(),
            namespace: if cli.all_namespaces { None } else { Some(cli.namespace.clone()) },
            labels: cli.labels.clone(),
            context_lines: cli.context_lines,
            create_theme: cli.create_theme.clone(),
            update_theme: cli.update_theme.clone(),
            delete_theme: cli.delete_theme.clone(),
            no_color: cli.no_color,
            jsonpath: cli.jsonpath.clone(),
            exclude: cli.exclude.clone(),
            strip_managed_fields: !cli.show_managed,
            show_deleted: cli.show_deleted,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env = std::env::var("KWATCH_LOG").unwrap_or_else(|_| default.to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KWATCH_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KWATCH_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    init_metrics();

    let cfg = WatchConfig::from(&cli);
    debug!(config = %serde_json::to_string(&cfg)?, "configuration");
    let compiled = cfg.compile().context("invalid configuration")?;

    let client = kwatch_kubehub::client(cli.kubeconfig.as_deref()).await?;
    debug!("resolving resource kinds");
    let kinds = kwatch_kubehub::resolve_kinds(&client, &compiled.kinds).await?;

    let mut sources = Vec::with_capacity(kinds.len());
    for kind in &kinds {
        let stream = kwatch_kubehub::watch_kind(&client, kind, compiled.namespace.as_deref(), compiled.labels.as_deref())
            .await
            .with_context(|| format!("failed to create watch for {:?} resources", kind.kind()))?;
        sources.push(KindSource::new(kind.kind(), stream));
    }

    let supervisor = Supervisor::new(compiled.differ, OutputSink::stdout()).with_names(compiled.names);
    tokio::select! {
        summaries = supervisor.run(sources) => {
            for s in summaries {
                match &s.stream_error {
                    Some(e) => warn!(kind = %s.kind, events = s.events, failed = s.failed, error = %e, "watch ended with error"),
                    None => info!(kind = %s.kind, events = s.events, failed = s.failed, "watch ended"),
                }
            }
        }
        _ = signal::ctrl_c() => {
            info!("Ctrl-C received; shutting down");
        }
    }
    Ok(())
}
