#![warn(
    rust_2024_compatibility,
    clippy::all,
    clippy::future_not_send,
    clippy::mod_module_files,
    clippy::needless_pass_by_ref_mut,
    clippy::unused_async
)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_sdk::{resource::Resource, trace as sdktrace};
use rama::{
    Layer as RamaLayer,
    graceful::Shutdown,
    http::{layer::trace::TraceLayer, server::HttpServer},
    layer::ConsumeErrLayer,
    rt::Executor,
    tcp::server::TcpListener,
};
use scoregate::{
    config::Config,
    gate::{Policy, PolicyInput, ScoreThreshold},
    proxy::GateProxy,
};
use scoregate_certify::{Certifier, GraphqlCertifier};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Certification-gated npm registry proxy")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the proxy server
    Serve {
        /// Upstream registry base URL
        registry: Option<String>,
        /// Path to the configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Listen port
        #[arg(long, short, env = "PORT")]
        port: Option<u16>,
        /// Certification API token
        #[arg(long, env = "SCOREGATE_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// Query certification data for one package version
    Certify {
        name: String,
        version: String,
        /// Path to the configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Certification API token
        #[arg(long, env = "SCOREGATE_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            registry,
            config,
            port,
            token,
        } => run_server(config, registry, port, token),
        Command::Certify {
            name,
            version,
            config,
            token,
        } => run_certify(config, name, version, token),
    }
}

fn run_server(
    config_path: Option<PathBuf>,
    registry: Option<String>,
    port: Option<u16>,
    token: Option<String>,
) -> Result<()> {
    let mut config = Config::load(config_path).context("loading configuration")?;
    config.apply_overrides(registry, port, token);
    config
        .validate()
        .context("validating configuration (usage: SCOREGATE_TOKEN=xxx scoregate serve [REGISTRY])")?;
    let config = Arc::new(config);
    init_tracing(&config)?;

    let certifier: Arc<dyn Certifier> = Arc::new(
        GraphqlCertifier::new(&config.certification).context("creating certification client")?,
    );
    let policy: Arc<dyn Policy> = Arc::new(ScoreThreshold::new(config.policy.min_score));
    let proxy = GateProxy::new(config.clone(), certifier, policy);

    let mut errors = proxy.subscribe_errors();

    let rt_server = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers)
        .enable_all()
        .build()
        .context("constructing server runtime")?;

    rt_server.block_on(async move {
        let graceful = Shutdown::default();
        let addr = format!("{}:{}", config.server.host, config.server.port);

        let tcp_service = TcpListener::build()
            .bind(addr.clone())
            .await
            .map_err(|err| anyhow!("binding {addr}: {err}"))?;

        tracing::info!(
            %addr,
            registry = %config.registry.normalized(),
            url = %format!("http://localhost:{}/", config.server.port),
            "starting Rama HTTP server"
        );

        graceful.spawn_task_fn(move |guard| async move {
            let exec = Executor::graceful(guard.clone());
            let http_service = HttpServer::auto(exec).service(
                (TraceLayer::new_for_http(), ConsumeErrLayer::default()).into_layer(proxy),
            );

            tcp_service.serve_graceful(guard, http_service).await;
        });

        graceful.spawn_task_fn(move |guard| async move {
            loop {
                tokio::select! {
                    _ = guard.cancelled() => break,
                    report = errors.recv() => match report {
                        Ok(report) => tracing::debug!(
                            kind = report.kind,
                            status = report.status,
                            path = %report.path,
                            "error reported"
                        ),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "error reports dropped");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        // Wait for ctrl+c to initiate graceful shutdown
        tokio::signal::ctrl_c()
            .await
            .context("listening for shutdown signal")?;

        graceful
            .shutdown_with_limit(Duration::from_secs(30))
            .await?;

        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

fn run_certify(
    config_path: Option<PathBuf>,
    name: String,
    version: String,
    token: Option<String>,
) -> Result<()> {
    let mut config = Config::load(config_path).context("loading configuration")?;
    config.apply_overrides(None, None, token);
    init_tracing(&config)?;

    let certifier =
        GraphqlCertifier::new(&config.certification).context("creating certification client")?;
    let policy = ScoreThreshold::new(config.policy.min_score);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("constructing certify runtime")?;

    let (input, allowed) = rt.block_on(async {
        let result = certifier
            .certify(&name, &version)
            .await
            .with_context(|| format!("certifying {name}@{version}"))?;
        let input = PolicyInput::from(result);
        let allowed = policy.allow(&input).await?;
        Ok::<_, anyhow::Error>((input, allowed))
    })?;

    println!("{}@{}", input.name, input.version);
    match input.score {
        Some(score) => println!("  score: {score}"),
        None => println!("  score: none"),
    }
    println!(
        "  license: {}",
        input.license.as_deref().unwrap_or("unknown")
    );
    let failing: Vec<_> = input.failing().collect();
    println!("  failing checks: {}", failing.len());
    for check in failing {
        println!("    - {} [{}] {}", check.name, check.severity, check.value);
    }
    println!("  vulnerabilities: {}", input.vulnerabilities.len());
    for vuln in &input.vulnerabilities {
        println!(
            "    - {} ({})",
            vuln.title.as_deref().unwrap_or("untitled"),
            vuln.severity.as_deref().unwrap_or("unknown")
        );
    }
    println!(
        "  verdict: {} (min score {})",
        if allowed { "allow" } else { "block" },
        policy.min_score
    );

    Ok(())
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
        .context("building log filter")?;

    let fmt_layer = if config.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(config.logging.target)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(config.logging.target)
            .boxed()
    };

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        use opentelemetry_otlp::WithExportConfig;

        let resource = Resource::builder_empty()
            .with_attributes([
                KeyValue::new("service.name", "scoregate"),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ])
            .build();

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()?;

        let provider = sdktrace::SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build();

        let tracer = provider.tracer("scoregate");
        global::set_tracer_provider(provider);

        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()?;
    } else {
        registry.try_init()?;
    }
    Ok(())
}
