use anyhow::Context;
use clap::{Parser, Subcommand};
use enrichment_engine::{
    config::{Config, ObservabilityConfig},
    EnrichmentRequest, EnrichmentService, EvictionScope,
};
use futures::StreamExt;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "enrichment-engine", version)]
#[command(about = "Multi-tenant data enrichment engine", long_about = None)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "ENRICHMENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered providers
    Providers {
        /// Only providers visible to this tenant
        #[arg(short, long)]
        tenant: Option<Uuid>,

        /// Only providers serving this enrichment type
        #[arg(short = 'T', long = "type")]
        enrichment_type: Option<String>,
    },

    /// Enrich a JSON array of requests, printing one response per line
    Run {
        /// File containing the requests
        #[arg(short, long)]
        requests: PathBuf,

        /// Stop at the first failed request
        #[arg(long)]
        fail_fast: bool,

        /// Maximum concurrent enrichments
        #[arg(short, long)]
        parallelism: Option<usize>,
    },

    /// Evict cached responses for a tenant
    Evict {
        #[arg(long)]
        tenant: Uuid,

        #[arg(long)]
        provider: Option<String>,

        #[arg(long = "type", requires = "provider")]
        enrichment_type: Option<String>,
    },
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("enrichment_engine={}", config.log_level).into());

    // stdout carries command output, logs go to stderr
    let json_layer = config
        .json_logs
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!config.json_logs).then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        Config::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.observability);

    tracing::info!(
        "Starting {} v{}",
        config.observability.service_name,
        env!("CARGO_PKG_VERSION")
    );

    match cli.command {
        Commands::Providers {
            tenant,
            enrichment_type,
        } => {
            let service = EnrichmentService::from_config(&config).await?;
            for descriptor in service.discover(tenant, enrichment_type.as_deref()) {
                println!("{}", serde_json::to_string(&descriptor)?);
            }
        }

        Commands::Run {
            requests,
            fail_fast,
            parallelism,
        } => {
            if fail_fast {
                config.enrichment.fail_fast = true;
            }
            if let Some(parallelism) = parallelism {
                config.enrichment.parallelism = parallelism;
            }

            let raw = tokio::fs::read_to_string(&requests)
                .await
                .with_context(|| format!("Failed to read {}", requests.display()))?;
            let requests: Vec<EnrichmentRequest> =
                serde_json::from_str(&raw).context("Failed to parse requests")?;

            let (service, mut events) =
                EnrichmentService::from_config_with_channel(&config).await?;
            tokio::spawn(async move {
                while let Some(envelope) = events.recv().await {
                    tracing::debug!(
                        event_id = %envelope.metadata.event_id,
                        request_id = %envelope.payload.request_id(),
                        "{} event",
                        envelope.payload.event_type()
                    );
                }
            });

            let total = requests.len();
            let mut succeeded = 0;
            let mut responses = service.enrich_batch(requests);

            while let Some(item) = responses.next().await {
                let response = item?;
                if response.success {
                    succeeded += 1;
                }
                println!("{}", serde_json::to_string(&response)?);
            }

            tracing::info!(total, succeeded, "Batch finished");
        }

        Commands::Evict {
            tenant,
            provider,
            enrichment_type,
        } => {
            let scope = match (provider, enrichment_type) {
                (Some(provider), Some(enrichment_type)) => EvictionScope::TenantProviderType {
                    tenant_id: tenant,
                    provider,
                    enrichment_type,
                },
                (Some(provider), None) => EvictionScope::TenantProvider {
                    tenant_id: tenant,
                    provider,
                },
                _ => EvictionScope::Tenant(tenant),
            };

            let service = EnrichmentService::from_config(&config).await?;
            let evicted = service.evict(&scope).await?;
            println!("{}", serde_json::json!({ "evicted": evicted }));
        }
    }

    Ok(())
}
