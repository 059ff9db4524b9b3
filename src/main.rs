use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use fintail::models::Config;
use fintail::pipeline::{Pipeline, WorkItem};
use fintail::sources::{ExtractionClient, MarketDataClient};
use fintail::store::{SortField, SortOrder, Store};

#[derive(Parser)]
#[command(name = "fintail", about = "Quarterly financial data ingestion and query")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a batch ingestion plan (JSON list of work items)
    Ingest {
        /// Path to the plan file
        plan: PathBuf,
    },
    /// Refresh only the stored market caps for the given tickers
    RefreshMarketCaps {
        tickers: Vec<String>,
    },
    /// List companies, optionally filtered by sector
    Companies {
        #[arg(long)]
        sector: Option<String>,
        #[arg(long, value_enum, default_value = "name")]
        sort_by: SortField,
        #[arg(long, value_enum, default_value = "asc")]
        order: SortOrder,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show a company's quarterly time series
    History {
        ticker: String,
    },
    /// Search companies by name or ticker
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Show store statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fintail=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;
    let store = Store::open(&config.database_path).await?;

    match cli.command {
        Command::Ingest { plan } => {
            let plan_text = std::fs::read_to_string(&plan)
                .with_context(|| format!("reading plan {}", plan.display()))?;
            let items: Vec<WorkItem> =
                serde_json::from_str(&plan_text).context("parsing ingestion plan")?;

            let pipeline = build_pipeline(&config, store)?;
            let report = pipeline.run(&items).await;

            println!(
                "Processed {} items: {} written, {} skipped, {} failed",
                report.processed, report.written, report.skipped, report.failed
            );
            for (item, reason) in &report.failures {
                println!("  ❌ {}: {}", item, reason);
            }
        }
        Command::RefreshMarketCaps { tickers } => {
            let pipeline = build_pipeline(&config, store)?;
            let report = pipeline.refresh_market_caps(&tickers).await;
            println!(
                "Refreshed {} of {} tickers ({} skipped, {} failed)",
                report.written, report.processed, report.skipped, report.failed
            );
        }
        Command::Companies {
            sector,
            sort_by,
            order,
            page,
            limit,
        } => {
            let companies = store
                .list_companies(sector.as_deref(), sort_by, order, page, limit)
                .await?;
            for company in companies {
                let market_cap = company
                    .market_cap
                    .map(|mc| format!("${:.2}B", mc / 1e9))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<8} {:<40} {:<24} {}",
                    company.ticker, company.name, company.sector, market_cap
                );
            }
        }
        Command::History { ticker } => {
            let quarters = store.company_time_series(&ticker).await?;
            if quarters.is_empty() {
                println!("No quarters stored for {}", ticker.to_uppercase());
            }
            for q in quarters {
                println!(
                    "{} ({}): revenue ${:.2}B, net income ${:.2}B, eps {:.2}",
                    q.quarter,
                    q.report_date,
                    q.total_revenue / 1e9,
                    q.net_income / 1e9,
                    q.eps
                );
            }
        }
        Command::Search {
            query,
            limit,
            offset,
        } => {
            let hits = store.search(&query, limit, offset).await?;
            if hits.is_empty() {
                println!("No matches for {:?}", query);
            }
            for hit in hits {
                println!("{:<8} {:<40} rank {}", hit.ticker, hit.company_name, hit.relevance);
            }
        }
        Command::Stats => {
            let stats = store.stats().await?;
            println!("Profiles:        {}", stats.profiles);
            println!("Quarters:        {}", stats.quarters);
            println!("Segment rows:    {}", stats.segments);
            println!("Sector entries:  {}", stats.sector_entries);
            println!("Search entries:  {}", stats.search_entries);
        }
    }

    Ok(())
}

fn build_pipeline(config: &Config, store: Store) -> Result<Pipeline> {
    let market = Arc::new(MarketDataClient::new(config)?);
    let extractor = Arc::new(ExtractionClient::new(config)?);
    Ok(Pipeline::new(market, extractor, Arc::new(store), config))
}
