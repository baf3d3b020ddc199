//! `clusterdump rehydrate` command implementation

use clusterdump_common::api::IngestApi;
use clusterdump_common::types::{RehydrateLatestRequest, RehydrateLatestResponse};
use colored::Colorize;

use super::{format_bytes, format_time};
use crate::config::DumpConfig;
use crate::error::Result;
use crate::ingest::HttpIngestClient;

/// Show the latest ingested dataset for `cluster`, defaulting to the
/// configured cluster name
pub async fn run(config: &DumpConfig, cluster: Option<String>) -> Result<RehydrateLatestResponse> {
    let cluster_name = cluster.unwrap_or_else(|| config.collector.live.cluster_name.clone());
    let client = HttpIngestClient::from_config(&config.ingestor)?;

    let response = client
        .rehydrate_latest(RehydrateLatestRequest {
            cluster_name: cluster_name.clone(),
        })
        .await?;

    match &response.latest {
        Some(latest) => {
            println!("{} Latest dataset for '{}'", "✓".green(), cluster_name.bold());
            println!("  Run:      {}", latest.run_id);
            println!("  Ingested: {}", format_time(&latest.ingested_at));
            println!("  Location: {}", latest.dataset.location);
            if latest.dataset.compressed {
                println!("  Size:     {}", format_bytes(latest.dataset.size_bytes));
                println!("  SHA256:   {}", latest.dataset.sha256);
            }
        },
        None => println!("No dataset ingested yet for '{}'", cluster_name),
    }

    Ok(response)
}
