use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fedicrawl_common::{ConfigError, CrawlSettings, Cursor, Predicate};
use fedicrawl_engine::export::{
    export_interactions, write_accounts_csv, write_followers_csv, write_instances_csv,
};
use fedicrawl_engine::gather::{follower_rows, gather_followers, gather_instances, rank_domains};
use fedicrawl_engine::interactions::{interaction_accounts, parse_statuses};
use fedicrawl_engine::{
    export_timelines, gather_interactions, merge_timeline_files, run_job, run_sample, CrawlOptions,
    ExportFormat, ExportOptions, JobRequest, MastodonSource, SampleRequest,
};

#[derive(Parser)]
#[command(name = "fedicrawl", about = "Incremental multi-instance Mastodon crawler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start or resume collecting statuses with a hashtag
    Hashtag {
        /// Hashtag, with or without '#'
        #[arg(long)]
        tag: Option<String>,
        #[command(flatten)]
        job: JobArgs,
    },
    /// Start or resume collecting (optionally filtered) public statuses
    Public {
        /// Keep only statuses whose content contains this text
        #[arg(long)]
        filter: Option<String>,
        #[command(flatten)]
        job: JobArgs,
    },
    /// Sample public statuses at regular points in a date range
    Sample {
        #[arg(long)]
        instances: PathBuf,
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long)]
        start_date: NaiveDate,
        #[arg(long)]
        end_date: NaiveDate,
        #[arg(long, default_value_t = 1)]
        days_between: u32,
        #[arg(long, default_value_t = 200)]
        chunk_size: usize,
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        local_only: bool,
    },
    /// Rank instances by where seed accounts' followers live and describe them
    Instances {
        /// File of seed account profile URLs, one per line
        #[arg(long)]
        user_urls: Option<PathBuf>,
        /// File of instance domains to describe directly
        #[arg(long)]
        domains: Option<PathBuf>,
        #[arg(long, default_value_t = 400)]
        follower_count: usize,
        #[arg(long, default_value_t = 1)]
        min_followers: usize,
        /// Write follower rows to this CSV
        #[arg(long)]
        save_followers: Option<PathBuf>,
        /// Write instance rows to this CSV
        #[arg(long)]
        instances_file: Option<PathBuf>,
    },
    /// Collect boosts, favourites and thread replies of given statuses
    Interactions {
        /// JSON array of statuses, or a timelines file
        #[arg(long)]
        toots: PathBuf,
        #[arg(long)]
        out_file: PathBuf,
        #[arg(long, default_value = "json")]
        format: ExportFormat,
        #[arg(long)]
        parse_html: bool,
        /// Also write boosting and favouriting accounts to this CSV
        #[arg(long)]
        accounts_file: Option<PathBuf>,
    },
    /// Merge a job's timelines files and write one export
    Export {
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long, default_value = "csv")]
        format: ExportFormat,
        #[arg(long)]
        out_file: PathBuf,
        #[arg(long)]
        parse_html: bool,
        /// One row per status across instances
        #[arg(long)]
        aggregate: bool,
        /// Append to an existing CSV instead of replacing it
        #[arg(long)]
        append: bool,
    },
}

#[derive(Args)]
struct JobArgs {
    /// File of instance domains, one per line. Required for a new job.
    #[arg(long)]
    instances: Option<PathBuf>,
    #[arg(long)]
    data_dir: PathBuf,
    /// First day to collect (UTC). Required for a new job.
    #[arg(long)]
    start_date: Option<NaiveDate>,
    /// Last day to collect (UTC), inclusive
    #[arg(long)]
    end_date: Option<NaiveDate>,
    #[arg(long)]
    local_only: bool,
    /// Stop each instance after this many statuses per run
    #[arg(long)]
    max_records: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let cli = Cli::parse();
    let settings = CrawlSettings::from_env()?;
    let credentials = settings
        .load_credentials()
        .context("Failed to load credentials")?;
    info!(credentials = ?credentials, "Credentials loaded");

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing in-flight pages");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let options = CrawlOptions::builder()
        .concurrency(settings.concurrency)
        .build();
    let source = MastodonSource::new(settings.clone(), credentials);

    match cli.command {
        Command::Hashtag { tag, job } => {
            let predicate = Predicate::hashtag(tag.as_deref().unwrap_or_default());
            crawl(predicate, job, &source, options, &cancel).await?;
        }
        Command::Public { filter, job } => {
            let predicate = match filter.filter(|f| !f.is_empty()) {
                Some(text) => Predicate::Filter(text),
                None => Predicate::Public,
            };
            crawl(predicate, job, &source, options, &cancel).await?;
        }
        Command::Sample {
            instances,
            data_dir,
            start_date,
            end_date,
            days_between,
            chunk_size,
            filter,
            local_only,
        } => {
            let request = SampleRequest {
                sources: read_lines(&instances)?,
                start: start_date,
                end: end_date,
                days_between,
                chunk_size,
                filter,
                local_only,
            };
            let report = run_sample(&data_dir, &request, &source, &options, &cancel).await?;
            println!("{report}");
        }
        Command::Instances {
            user_urls,
            domains,
            follower_count,
            min_followers,
            save_followers,
            instances_file,
        } => {
            let mut targets: Vec<String> = match &domains {
                Some(path) => read_lines(path)?,
                None => Vec::new(),
            };

            if let Some(path) = &user_urls {
                let seeds = read_lines(path)?;
                let followers =
                    gather_followers(&source, &seeds, follower_count, settings.concurrency).await;
                println!("Got {} followers of {} accounts", followers.len(), seeds.len());

                if let Some(out) = &save_followers {
                    write_followers_csv(out, &follower_rows(&followers, true))?;
                    info!(path = %out.display(), "Wrote followers");
                }
                for (domain, count) in rank_domains(&followers, min_followers) {
                    println!("{domain:<40} {count}");
                    if !targets.contains(&domain) {
                        targets.push(domain);
                    }
                }
            }

            if targets.is_empty() {
                return Err(ConfigError::Missing("--user-urls or --domains").into());
            }
            if let Some(out) = &instances_file {
                let rows = gather_instances(&source, &targets, settings.concurrency, true).await;
                write_instances_csv(out, &rows, false)?;
                println!("Wrote {} instances to {}", rows.len(), out.display());
            }
        }
        Command::Interactions {
            toots,
            out_file,
            format,
            parse_html,
            accounts_file,
        } => {
            let content = std::fs::read_to_string(&toots)
                .with_context(|| format!("Failed to read {}", toots.display()))?;
            let statuses = parse_statuses(&content)?;
            let found = gather_interactions(&source, &statuses, settings.concurrency).await;
            let stats = export_interactions(&found, &out_file, format, parse_html)?;
            println!("{stats} to {}", out_file.display());

            if let Some(out) = &accounts_file {
                let rows = interaction_accounts(&found, parse_html);
                write_accounts_csv(out, &["interaction", "status_uri"], &rows)?;
                println!("Wrote {} accounts to {}", rows.len(), out.display());
            }
        }
        Command::Export {
            data_dir,
            format,
            out_file,
            parse_html,
            aggregate,
            append,
        } => {
            let timelines = merge_timeline_files(&data_dir)?;
            let options = ExportOptions {
                format,
                aggregate,
                parse_html,
                append,
            };
            let stats = export_timelines(&timelines, &out_file, &options)?;
            println!("{stats} to {}", out_file.display());
        }
    }

    Ok(())
}

async fn crawl(
    predicate: Predicate,
    job: JobArgs,
    source: &MastodonSource,
    options: CrawlOptions,
    cancel: &AtomicBool,
) -> Result<()> {
    let sources = match &job.instances {
        Some(path) => read_lines(path)?,
        None => Vec::new(),
    };
    let request = JobRequest::builder()
        .predicate(predicate)
        .sources(sources)
        .end_boundary(job.end_date.and_then(|d| d.succ_opt()).map(Cursor::from_day))
        .start(job.start_date.map(Cursor::from_day))
        .local_only(job.local_only)
        .build();
    let options = CrawlOptions {
        max_records: job.max_records,
        ..options
    };

    let run = run_job(&job.data_dir, request, source, &options, cancel).await?;
    println!("{}", run.report);
    if let Some(path) = run.output {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

/// Non-empty, trimmed lines of a list file.
fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("fedicrawl=info".parse()?)
        .add_directive("mastodon_client=info".parse()?);
    let json = std::env::var("FEDICRAWL_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}
