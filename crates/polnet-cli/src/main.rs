//! polnet CLI - Command-line interface
//!
//! Usage:
//!   polnet ingest <path>
//!   polnet analyze [--as-of <date>]
//!   polnet export <dir>
//!   polnet review list
//!   polnet review approve <id> --target <entity>
//!   polnet merge <winner> <loser>
//!   polnet compact
//!
//! Author: hephaex@gmail.com

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use polnet_analytics::{write_exports, AnalysisResult, CancellationToken};
use polnet_core::batch::parse_timestamp;
use polnet_core::{AppConfig, ExtractionBatch, LoggingConfig, PolnetError};
use polnet_ingest::{BatchCoordinator, ReviewDecision, ReviewQueue, WorldSnapshot};
use polnet_store::{read_json, write_json_atomic, JsonlEventLog};

#[derive(Parser)]
#[command(name = "polnet")]
#[command(about = "Political network entity resolution and analytics CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the event log and snapshot
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest extraction batches from a file or directory
    Ingest {
        /// Batch file (.json or .jsonl) or directory of batch files
        path: PathBuf,
    },
    /// Run network analytics
    Analyze {
        /// Reference time for trends (defaults to now)
        #[arg(long)]
        as_of: Option<String>,

        /// Number of top influencers to print
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Write registry, graph and time-series exports
    Export {
        /// Output directory
        dir: PathBuf,

        #[arg(long)]
        as_of: Option<String>,
    },
    /// Work the manual review queue
    Review {
        #[command(subcommand)]
        action: ReviewAction,

        /// Name recorded with decisions
        #[arg(long, default_value = "cli")]
        reviewer: String,
    },
    /// Merge two canonical entities known to be the same identity
    Merge { winner: Uuid, loser: Uuid },
    /// Fold the event log into a snapshot
    Compact,
    /// Show store statistics
    Stats,
}

#[derive(Subcommand)]
enum ReviewAction {
    /// List pending mentions
    List,
    /// Attribute a mention to an existing entity
    Approve {
        id: Uuid,
        #[arg(long)]
        target: Uuid,
    },
    /// Treat a mention as a new identity
    Create { id: Uuid },
    /// Discard a mention
    Reject { id: Uuid, reason: Option<String> },
}

/// Persistent state opened from the state directory
struct State {
    config: AppConfig,
    log: Arc<JsonlEventLog>,
    coordinator: Arc<BatchCoordinator>,
}

impl State {
    fn open(config: AppConfig) -> anyhow::Result<Self> {
        let store = &config.store;
        let log = Arc::new(JsonlEventLog::open(store.event_log_path())?);
        let snapshot: Option<WorldSnapshot> = read_json(&store.snapshot_path())?;
        let review: Option<ReviewQueue> = read_json(&store.review_path())?;

        let coordinator = BatchCoordinator::open(config.clone(), log.clone(), snapshot.as_ref())?
            .with_review_queue(review.unwrap_or_default());
        Ok(Self {
            config,
            log,
            coordinator: Arc::new(coordinator),
        })
    }

    fn save_review(&self) -> anyhow::Result<()> {
        write_json_atomic(
            &self.config.store.review_path(),
            &self.coordinator.review_queue(),
        )?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config.logging, cli.json_logs);

    let state = State::open(config)?;

    match cli.command {
        Commands::Ingest { path } => ingest(&state, &path)?,
        Commands::Analyze { as_of, top } => {
            let result = analyze(&state, as_of.as_deref()).await?;
            print_analysis(&state, &result, top);
        }
        Commands::Export { dir, as_of } => {
            let result = analyze(&state, as_of.as_deref()).await?;
            let snapshot = state.coordinator.checkpoint();
            let paths = write_exports(
                &dir,
                &snapshot.entities,
                &snapshot.edges,
                &snapshot.temporal,
                Some(&result),
            )?;
            println!("Registry:    {}", paths.registry.display());
            println!("Graph:       {}", paths.graph.display());
            println!("Time series: {}", paths.timeseries.display());
            println!("Trends:      {}", paths.trends.display());
        }
        Commands::Review { action, reviewer } => review(&state, action, &reviewer)?,
        Commands::Merge { winner, loser } => {
            state.coordinator.merge_entities(winner, loser)?;
            println!("Merged {loser} into {winner}");
        }
        Commands::Compact => {
            let snapshot = state.coordinator.checkpoint();
            write_json_atomic(&state.config.store.snapshot_path(), &snapshot)?;
            state.log.truncate()?;
            println!(
                "Compacted {} events into {}",
                snapshot.sequence,
                state.config.store.snapshot_path().display()
            );
        }
        Commands::Stats => {
            let world = state.coordinator.world();
            let review = state.coordinator.review_stats();
            println!("Log sequence:     {}", state.coordinator.sequence());
            println!("Live entities:    {}", world.store.live_count());
            println!("Merged entities:  {}", world.store.len() - world.store.live_count());
            println!("Edges:            {}", world.aggregator.len());
            println!("Temporal series:  {}", world.temporal.subject_count());
            println!(
                "Review:           {} pending, {} approved, {} rejected",
                review.pending, review.approved, review.rejected
            );
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    if let Some(dir) = &cli.state_dir {
        config.store.state_dir = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if json || logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ============================================================================
// Ingest
// ============================================================================

fn ingest(state: &State, path: &Path) -> anyhow::Result<()> {
    let files = batch_files(path)?;
    println!("Ingesting {} file(s) from: {}", files.len(), path.display());

    let (mut batches, mut accepted, mut rejected, mut ambiguous) = (0, 0, 0, 0);
    for file in files {
        for batch in read_batches(&file)? {
            match state.coordinator.process(&batch) {
                Ok(summary) => {
                    batches += 1;
                    accepted += summary.accepted;
                    rejected += summary.rejected;
                    ambiguous += summary.ambiguous;
                    println!(
                        "  {}: {} accepted, {} rejected, {} for review",
                        summary.document_id, summary.accepted, summary.rejected, summary.ambiguous
                    );
                }
                Err(PolnetError::Validation(msg)) => {
                    tracing::warn!(file = %file.display(), "batch skipped: {msg}");
                }
                Err(e) => {
                    state.save_review()?;
                    return Err(e).with_context(|| format!("ingesting {}", file.display()));
                }
            }
        }
    }

    state.save_review()?;
    println!(
        "Done: {batches} batch(es), {accepted} accepted, {rejected} rejected, {ambiguous} for review"
    );
    Ok(())
}

/// Batch files under a path, in name order
fn batch_files(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files: Vec<PathBuf> = fs::read_dir(path)
        .with_context(|| format!("reading {}", path.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("json" | "jsonl")))
        .collect();
    files.sort();
    Ok(files)
}

/// One batch per `.jsonl` line, or a single batch or array of batches per `.json` file.
///
/// Batches that fail to parse are logged and skipped.
fn read_batches(file: &Path) -> anyhow::Result<Vec<ExtractionBatch>> {
    let content =
        fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;

    if file.extension().and_then(|e| e.to_str()) == Some("jsonl") {
        return Ok(content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(i, line)| match ExtractionBatch::from_json(line) {
                Ok(batch) => Some(batch),
                Err(e) => {
                    tracing::warn!(file = %file.display(), line = i + 1, error = %e, "batch skipped");
                    None
                }
            })
            .collect());
    }

    let value: serde_json::Value =
        serde_json::from_str(&content).with_context(|| format!("parsing {}", file.display()))?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        single => vec![single],
    };
    Ok(items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value(item) {
            Ok(batch) => Some(batch),
            Err(e) => {
                tracing::warn!(file = %file.display(), index = i, error = %e, "batch skipped");
                None
            }
        })
        .collect())
}

// ============================================================================
// Analyze
// ============================================================================

fn parse_as_of(as_of: Option<&str>) -> anyhow::Result<DateTime<Utc>> {
    match as_of {
        Some(s) => parse_timestamp(s).with_context(|| format!("invalid --as-of '{s}'")),
        None => Ok(Utc::now()),
    }
}

/// Run analytics on a blocking thread; Ctrl-C cancels the run
async fn analyze(state: &State, as_of: Option<&str>) -> anyhow::Result<AnalysisResult> {
    let as_of = parse_as_of(as_of)?;
    let cancel = CancellationToken::new();

    let coordinator = state.coordinator.clone();
    let token = cancel.clone();
    let mut task = tokio::task::spawn_blocking(move || coordinator.analyze(as_of, &token));

    tokio::select! {
        result = &mut task => return Ok(result??),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupt received, cancelling analysis");
            cancel.cancel();
        }
    }
    Ok(task.await??)
}

fn print_analysis(state: &State, result: &AnalysisResult, top: usize) {
    if let Some(reason) = &result.skipped_reason {
        println!("Analysis skipped: {reason}");
        return;
    }

    let metrics = &result.metrics;
    println!("As of:        {}", result.as_of);
    println!("Nodes:        {}", metrics.node_count);
    println!("Edges:        {}", metrics.edge_count);
    println!("Density:      {:.4}", metrics.density);
    println!("Components:   {}", metrics.component_count);
    println!("Communities:  {}", metrics.community_count);

    let name = |id: &Uuid| {
        state
            .coordinator
            .world()
            .store
            .get(id)
            .map(|e| e.value.canonical_name)
            .unwrap_or_else(|| id.to_string())
    };

    println!("\nTop influencers:");
    for (id, m) in result.top_influencers(top) {
        println!(
            "  {:<30} influence {:.3}  degree {:>5.1}  trend {}",
            name(&id),
            m.influence,
            m.weighted_degree,
            m.trend
        );
    }

    if !result.communities.is_empty() {
        println!("\nCommunities:");
        for community in &result.communities {
            println!(
                "  {} ({} members, density {:.2}, clustering {:.2}, avg path {:.2})",
                community.name,
                community.size,
                community.density,
                community.clustering_coefficient,
                community.average_path_length
            );
        }
    }

    if !result.trends.is_empty() {
        println!("\nTrends:");
        for trend in result.trends.iter().take(top) {
            println!(
                "  {:<30} {:<18} strength {:.2}  peak {}",
                trend.entity_name,
                trend.category.to_string(),
                trend.strength,
                trend.peak
            );
        }
    }
}

// ============================================================================
// Review
// ============================================================================

fn review(state: &State, action: ReviewAction, reviewer: &str) -> anyhow::Result<()> {
    let coordinator = &state.coordinator;
    match action {
        ReviewAction::List => {
            let queue = coordinator.review_queue();
            let pending = queue.pending();
            println!("{} pending review item(s)", pending.len());
            for item in pending {
                println!(
                    "\n{}  '{}' in {}",
                    item.id, item.mention.raw_name, item.mention.source_document_id
                );
                for candidate in &item.candidates {
                    println!(
                        "    {}  {:<30} score {:.3}",
                        candidate.id, candidate.canonical_name, candidate.score
                    );
                }
            }
            return Ok(());
        }
        ReviewAction::Approve { id, target } => {
            coordinator.decide_review(id, ReviewDecision::MergeInto(target), reviewer, None)?;
            println!("Approved {id}: merged into {target}");
        }
        ReviewAction::Create { id } => {
            if let Some(created) =
                coordinator.decide_review(id, ReviewDecision::CreateNew, reviewer, None)?
            {
                println!("Approved {id}: created entity {created}");
            }
        }
        ReviewAction::Reject { id, reason } => {
            coordinator.decide_review(id, ReviewDecision::Reject, reviewer, reason.as_deref())?;
            println!("Rejected {id}");
        }
    }
    state.save_review()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BATCH: &str = r#"{"document_id": "doc-1", "timestamp": "2025-01-06", "people": [{"name": "John Thune"}]}"#;

    #[test]
    fn test_read_batches_formats() {
        let dir = tempfile::tempdir().unwrap();
        let single = dir.path().join("a.json");
        fs::write(&single, BATCH).unwrap();
        let array = dir.path().join("b.json");
        fs::write(&array, format!("[{BATCH}, {BATCH}]")).unwrap();
        let lines = dir.path().join("c.jsonl");
        fs::write(&lines, format!("{BATCH}\n\n{BATCH}\n{BATCH}\n")).unwrap();

        assert_eq!(read_batches(&single).unwrap().len(), 1);
        assert_eq!(read_batches(&array).unwrap().len(), 2);
        assert_eq!(read_batches(&lines).unwrap().len(), 3);
    }

    #[test]
    fn test_read_batches_skips_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let lines = dir.path().join("mixed.jsonl");
        let mistyped = r#"{"document_id": "doc-2", "timestamp": "2025-01-06", "people": [{"name": "Mike Johnson", "confidence": "high"}]}"#;
        fs::write(&lines, format!("{BATCH}\nnot json\n{mistyped}\n")).unwrap();

        let batches = read_batches(&lines).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].document_id, "doc-2");
        assert!(batches[1].people.is_empty());
        assert_eq!(batches[1].malformed.len(), 1);

        let array = dir.path().join("mixed.json");
        fs::write(&array, format!(r#"[{BATCH}, {{"timestamp": "2025-01-06"}}]"#)).unwrap();
        assert_eq!(read_batches(&array).unwrap().len(), 1);
    }

    #[test]
    fn test_batch_files_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.json", "a.jsonl", "notes.txt"] {
            fs::write(dir.path().join(name), BATCH).unwrap();
        }
        let files = batch_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.jsonl", "b.json"]);
    }

    #[test]
    fn test_parse_as_of() {
        let parsed = parse_as_of(Some("2025-03-31")).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-03-31T00:00:00+00:00");
        assert!(parse_as_of(Some("yesterday")).is_err());
    }

    #[test]
    fn test_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.store.state_dir = dir.path().to_path_buf();

        let state = State::open(config.clone()).unwrap();
        let batch = ExtractionBatch::from_json(BATCH).unwrap();
        state.coordinator.process(&batch).unwrap();
        let snapshot = state.coordinator.checkpoint();
        write_json_atomic(&config.store.snapshot_path(), &snapshot).unwrap();
        state.log.truncate().unwrap();
        drop(state);

        let reopened = State::open(config).unwrap();
        assert_eq!(reopened.coordinator.checkpoint(), snapshot);
    }
}
