//! `engram`: admin CLI
//!
//! Operates on the store directly (no running worker needed): stats,
//! search, injection preview, consolidation, export, backup.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use engram_core::{
    provider_from_config, Config, Consolidator, CycleKind, ObservationFilter, SearchManager,
    SearchMode, SearchOptions, Store,
};

#[derive(Debug, Parser)]
#[command(name = "engram", version, about = "Engram memory admin CLI")]
struct Cli {
    /// SQLite database path (falls back to DATABASE_DSN)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show store counters
    Stats {
        /// Scope to one project
        #[arg(long)]
        project: Option<String>,
    },
    /// Hybrid search over a project's observations
    Search {
        project: String,
        query: String,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
        /// lexical, vector, or hybrid
        #[arg(long, default_value = "hybrid")]
        mode: String,
    },
    /// Preview what context injection would return
    Inject {
        project: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Run a consolidation cycle now
    Consolidate {
        /// decay, associate, forget, or all
        #[arg(default_value = "all")]
        cycle: String,
    },
    /// Export a project's observations as JSONL
    Export {
        project: String,
        /// Output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Online backup of the database
    Backup { dest: PathBuf },
}

fn open_store(cli: &Cli) -> anyhow::Result<(Arc<Store>, Config)> {
    let config = match &cli.database {
        Some(path) => Config::for_database(path.clone()),
        None => Config::from_env()?,
    };
    let store = Arc::new(Store::open_with_config(&config)?);
    Ok((store, config))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (store, config) = open_store(&cli)?;

    match &cli.command {
        Command::Stats { project } => {
            let stats = store.stats(project.as_deref())?;
            println!("{}", "Engram memory".bold());
            println!("  observations : {}", stats.total_observations);
            println!("  archived     : {}", stats.archived_observations);
            println!("  pending embed: {}", stats.pending_embeddings);
            println!("  relations    : {}", stats.total_relations);
            println!("  sessions     : {}", stats.total_sessions);
            println!("  patterns     : {}", stats.total_patterns);
            println!("  avg relevance: {:.3}", stats.average_relevance);
            println!("  avg importance: {:.3}", stats.average_importance);
            if let Some(oldest) = stats.oldest_observation {
                println!("  oldest       : {}", oldest.to_rfc3339());
            }
        }

        Command::Search {
            project,
            query,
            top_k,
            mode,
        } => {
            let mode = match mode.as_str() {
                "lexical" => SearchMode::Lexical,
                "vector" => SearchMode::Vector,
                _ => SearchMode::Hybrid,
            };
            let embedder = provider_from_config(&config.embedding)?;
            let search = SearchManager::new(
                Arc::clone(&store),
                embedder,
                config.search.clone(),
                config.rerank.clone(),
            );

            let options = SearchOptions {
                top_k: *top_k,
                mode,
                ..SearchOptions::default()
            };
            let hits = search.search(query, &ObservationFilter::project(project), &options)?;

            if hits.is_empty() {
                println!("{}", "no results".dimmed());
            }
            for (rank, hit) in hits.iter().enumerate() {
                let obs = &hit.observation;
                println!(
                    "{:>2}. {} {} {}",
                    rank + 1,
                    format!("[{}]", obs.kind.as_str()).cyan(),
                    obs.title.bold(),
                    format!("(#{} score {:.4})", obs.id, hit.score).dimmed()
                );
                if !obs.narrative.is_empty() {
                    let preview: String = obs.narrative.chars().take(120).collect();
                    println!("      {}", preview.dimmed());
                }
            }
        }

        Command::Inject { project, limit } => {
            let rows = store.list_by_filter(&ObservationFilter::project(project), *limit, 0)?;
            for obs in &rows {
                println!(
                    "{} {} {}",
                    format!("[{}]", obs.kind.as_str()).cyan(),
                    obs.title,
                    format!("relevance {:.3}", obs.relevance).dimmed()
                );
            }
            println!(
                "{}",
                format!("{} observations would be injected", rows.len()).green()
            );
        }

        Command::Consolidate { cycle } => {
            let consolidator = Consolidator::new(Arc::clone(&store), config.consolidation.clone());
            let outcomes = match cycle.as_str() {
                "decay" => vec![consolidator.run_cycle(CycleKind::Decay)?],
                "associate" => vec![consolidator.run_cycle(CycleKind::Associate)?],
                "forget" => vec![consolidator.run_cycle(CycleKind::Forget)?],
                _ => consolidator.run_all()?,
            };
            for outcome in outcomes {
                println!(
                    "scanned {} updated {} emitted {} archived {}{}",
                    outcome.scanned,
                    outcome.updated,
                    outcome.emitted,
                    outcome.archived,
                    if outcome.errors.is_empty() {
                        String::new()
                    } else {
                        format!(" ({} errors)", outcome.errors.len()).red().to_string()
                    }
                );
            }
        }

        Command::Export { project, out } => {
            let mut filter = ObservationFilter::project(project);
            filter.include_archived = true;
            let rows = store.list_by_filter(&filter, usize::MAX, 0)?;

            let mut lines = String::new();
            for obs in &rows {
                lines.push_str(&serde_json::to_string(obs)?);
                lines.push('\n');
            }
            match out {
                Some(path) => {
                    std::fs::write(path, lines)?;
                    eprintln!("{}", format!("exported {} observations", rows.len()).green());
                }
                None => print!("{lines}"),
            }
        }

        Command::Backup { dest } => {
            store.backup_to(dest)?;
            println!("{}", format!("backup written to {}", dest.display()).green());
        }
    }

    Ok(())
}
