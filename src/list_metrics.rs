use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use regex::Regex;

use crate::args::BaseArgs;
use crate::ui::with_spinner;

const SCRAPE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Args)]
pub struct ListMetricsArgs {
    /// Exporter metrics URL, e.g. http://localhost:1250/metrics
    #[arg(long)]
    pub exporter: String,
}

pub async fn run(base: BaseArgs, args: ListMetricsArgs) -> Result<()> {
    let exporter = args.exporter.trim();
    if exporter.is_empty() {
        bail!("exporter endpoint is required, e.g. http://localhost:1250");
    }

    let body = with_spinner("Scraping exporter...", scrape(exporter)).await?;
    let names = metric_names(&body)?;
    if base.json {
        println!("{}", serde_json::to_string_pretty(&names)?);
    } else {
        for name in &names {
            println!("{name}");
        }
    }
    Ok(())
}

async fn scrape(exporter: &str) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(SCRAPE_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;
    let response = client
        .get(exporter)
        .send()
        .await
        .with_context(|| format!("failed to scrape {exporter}"))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("got non-200 status: {}, body: {body}", status.as_u16());
    }
    response
        .text()
        .await
        .context("failed to read response body")
}

/// Unique metric names from a text exposition body, sorted.
pub fn metric_names(body: &str) -> Result<BTreeSet<String>> {
    let name_re =
        Regex::new(r"^([a-zA-Z_:][a-zA-Z0-9_:]*)").context("failed to build metric name regex")?;
    let names = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| name_re.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect();
    Ok(names)
}
