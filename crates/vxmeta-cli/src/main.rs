use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vxmeta_cli::{Command, Config};
use vxmeta_core::{
    Credentials, DatasetDefinition, MetadataUpdateService, Settings, TemplateSet, TracingReporter,
};
use vxmeta_db::CouchbaseClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::parse();

    let settings = Settings::from_file(&config.settings).context("Failed to load settings")?;
    let credentials_path = config
        .credentials_path()
        .context("No credentials file given and $HOME is not set")?;
    let credentials =
        Credentials::from_file(&credentials_path).context("Failed to load credentials")?;
    let templates =
        TemplateSet::load_dir(&config.templates).context("Failed to load query templates")?;

    let datasets = settings.select(config.app.as_deref());
    if datasets.is_empty() {
        anyhow::bail!(
            "No dataset matches {:?} in {}",
            config.app.as_deref().unwrap_or("*"),
            config.settings.display()
        );
    }

    let target = credentials
        .target(config.target.as_deref())
        .context("Invalid connection target")?;

    info!("Connecting to {}...", credentials.cb_host);
    let client = CouchbaseClient::connect(&credentials, target.clone())
        .await
        .context("Failed to connect to Couchbase")?;

    let service =
        MetadataUpdateService::with_config(client, templates, target, config.update_config());

    match config.command() {
        Command::Update => update(&service, &datasets).await?,
        Command::Plan => plan(&service, &datasets).await?,
    }

    Ok(())
}

async fn update(
    service: &MetadataUpdateService<CouchbaseClient>,
    datasets: &[&DatasetDefinition],
) -> anyhow::Result<()> {
    let summary = service.run_with_progress(datasets, &TracingReporter).await;

    info!("═══════════════════════════════════════════════════════");
    info!("Metadata update complete");
    info!("═══════════════════════════════════════════════════════");
    for result in &summary.results {
        match (&result.stats, &result.error) {
            (Some(stats), _) if result.is_degraded() => warn!(
                "  ! {}/{}: {} model(s), {} skipped, {} deletion(s) failed",
                result.dataset,
                result.doc_type,
                stats.aggregated,
                stats.skipped,
                stats.deletion_failures
            ),
            (Some(stats), _) => info!(
                "  ✓ {}/{}: {} model(s), {} stale removed",
                result.dataset, result.doc_type, stats.aggregated, stats.deleted
            ),
            (None, error) => warn!(
                "  ✗ {}/{}: {}",
                result.dataset,
                result.doc_type,
                error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    if let Some(elapsed) = summary.elapsed() {
        info!("  Elapsed: {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);
    }
    if summary.aborted {
        warn!("Run aborted before all passes were attempted");
    }
    info!("═══════════════════════════════════════════════════════");

    summary.into_result()?;
    Ok(())
}

async fn plan(
    service: &MetadataUpdateService<CouchbaseClient>,
    datasets: &[&DatasetDefinition],
) -> anyhow::Result<()> {
    let mut failed = 0;

    for dataset in datasets {
        for doc_type in &dataset.doc_types {
            match service.plan_pass(dataset, doc_type).await {
                Ok(plan) => {
                    println!("\n{}/{}", dataset.name, doc_type);
                    println!("  required: {}", format_models(&plan.required));
                    println!("  stale:    {}", format_models(&plan.stale));
                    println!("  existing: {}", format_models(&plan.existing));
                    println!("  new:      {}", format_models(&plan.new_models));
                }
                Err(e) if e.is_fatal() => {
                    return Err(e)
                        .with_context(|| format!("Planning {}/{}", dataset.name, doc_type));
                }
                Err(e) => {
                    warn!("{}/{}: {}", dataset.name, doc_type, e);
                    failed += 1;
                }
            }
        }
    }
    println!();

    if failed > 0 {
        anyhow::bail!("{} pass(es) could not be planned", failed);
    }
    Ok(())
}

fn format_models(models: &[String]) -> String {
    if models.is_empty() {
        "-".to_string()
    } else {
        models.join(", ")
    }
}
