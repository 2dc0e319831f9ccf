use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use jgrants_sync::config;
use jgrants_sync::gemini::GeminiClient;
use jgrants_sync::jgrants::{JGrantsClient, SearchFilters};
use jgrants_sync::model::SyncResult;
use jgrants_sync::store;
use jgrants_sync::sync::SyncManager;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch listings and create draft records for the ones not yet stored
    BatchCreate {
        /// Number of listings to process (1-50)
        #[arg(long)]
        count: Option<usize>,
        /// Search keyword (at least 2 characters)
        #[arg(long)]
        keyword: Option<String>,
        /// Industry filters, repeatable
        #[arg(long)]
        industry: Vec<String>,
        /// Target area filters, repeatable
        #[arg(long)]
        area: Vec<String>,
        /// Target employee-count filter
        #[arg(long)]
        employees: Option<String>,
        /// Use-purpose filter
        #[arg(long)]
        purpose: Option<String>,
    },
    /// Publish draft records by id
    BatchPublish {
        /// Record ids to publish
        record_ids: Vec<i64>,
    },
    /// Fetch and print one subsidy listing by its external id
    Detail { subsidy_id: String },
    /// Record counts, last sync time, and upstream connectivity
    Stats,
    /// Recent sync history entries
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Probe the J-Grants API
    TestApi,
    /// Probe the Gemini API
    TestAi,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/jgrants.db", cfg.app.data_dir));

    let pool = store::init_pool(&database_url).await?;
    store::run_migrations(&pool).await?;

    let api = Arc::new(JGrantsClient::new(&cfg.api.base_url)?);
    let ai = Arc::new(GeminiClient::new(cfg.ai.clone()));
    let manager = SyncManager::new(pool, api.clone(), ai.clone(), cfg.field_mapping.clone());

    match args.command {
        Command::BatchCreate {
            count,
            keyword,
            industry,
            area,
            employees,
            purpose,
        } => {
            let count = count.unwrap_or(cfg.sync.default_count);
            let mut filters =
                SearchFilters::for_keyword(keyword.unwrap_or(cfg.sync.default_keyword));
            filters.industry = industry;
            filters.target_area = area;
            filters.target_employees = employees.unwrap_or_default();
            filters.use_purpose = purpose.unwrap_or_default();

            info!(count, keyword = %filters.keyword, "starting batch create");
            let results = manager.batch_create(count, &filters).await?;
            print_results(&results);
        }
        Command::BatchPublish { record_ids } => {
            let results = manager.batch_publish(&record_ids).await?;
            print_results(&results);
        }
        Command::Detail { subsidy_id } => {
            let subsidy = api.detail(&subsidy_id).await?;
            println!("{}", serde_json::to_string_pretty(&subsidy)?);
        }
        Command::Stats => {
            let stats = manager.statistics().await?;
            println!("total:     {}", stats.total);
            println!("published: {}", stats.published);
            println!("draft:     {}", stats.draft);
            println!("last sync: {}", stats.last_sync.as_deref().unwrap_or("-"));
            println!("api:       {}", stats.api_status);
            println!("ai:        {}", stats.ai_status);
        }
        Command::History { limit } => {
            for entry in manager.history().await?.into_iter().take(limit) {
                println!(
                    "{} {} ok={} err={}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.action.as_str(),
                    entry.success_count,
                    entry.error_count
                );
            }
        }
        Command::TestApi => {
            let check = api.test_connection().await;
            println!("success: {}", check.success);
            println!("message: {}", check.message);
            if let Some(count) = check.data_count {
                println!("data count: {count}");
            }
        }
        Command::TestAi => {
            let check = ai.test_connection().await;
            println!("success: {}", check.success);
            println!("message: {}", check.message);
        }
    }

    Ok(())
}

fn print_results(results: &[SyncResult]) {
    let success_count = results.iter().filter(|r| r.success).count();
    for result in results {
        let mark = if result.success { "ok " } else { "err" };
        let record = result
            .record_id
            .map(|id| format!("#{id}"))
            .unwrap_or_else(|| "-".to_string());
        println!("{mark} {:>8} {} {}", record, result.subsidy_id, result.message);
    }
    println!("{} succeeded, {} failed", success_count, results.len() - success_count);
}
