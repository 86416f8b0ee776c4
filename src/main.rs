//! Newsgraph CLI - operator interface to the news knowledge graph store

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use newsgraph::config::{self, NewsgraphConfig};
use newsgraph::query::{Embedder, FastEmbedder, HashingEmbedder, NeighborEngine};
use newsgraph::search::{ContentType, ListOptions, SearchFilters, SearchRequest, SortKey};
use newsgraph::storage::{HybridStore, spawn_reconciler};
use newsgraph::ui::{self, Icons, RecordRow};
use newsgraph::EntityResolver;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "newsgraph")]
#[command(version)]
#[command(about = "Knowledge graph store for entities, relations and events extracted from news")]
#[command(long_about = r#"
Newsgraph keeps a relational store and a vector index consistent and offers:
  • Hybrid (vector + full-text) search
  • Bounded neighborhood exploration around an entity
  • Context-aware entity resolution

Example usage:
  newsgraph init
  newsgraph search --query "苹果公司"
  newsgraph neighbors --id <entity-id> --depth 2
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config and create the databases
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Show record counts
    Stats,

    /// Probe both storage backends
    Health,

    /// Hybrid search over entities, relations and news
    Search {
        #[arg(short, long)]
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Use only the vector channel
        #[arg(long)]
        vector: bool,

        /// Disable the full-text channel
        #[arg(long)]
        no_text: bool,

        /// Restrict to one content type
        #[arg(long)]
        kind: Option<RecordKindArg>,
    },

    /// Show the neighborhood of an entity
    Neighbors {
        /// Center entity id
        #[arg(short, long)]
        id: String,

        #[arg(short, long)]
        depth: Option<usize>,

        #[arg(short, long)]
        max_entities: Option<usize>,

        /// Only follow relations with this predicate
        #[arg(short, long)]
        relation: Option<String>,
    },

    /// Page through stored records
    List {
        #[arg(short, long, value_enum, default_value = "entity")]
        kind: RecordKindArg,

        #[arg(long, default_value = "0")]
        skip: usize,

        #[arg(long, default_value = "20")]
        take: usize,

        /// id, name, type, created_at or updated_at
        #[arg(long, default_value = "updated_at")]
        sort: String,

        /// Sort ascending instead of descending
        #[arg(long)]
        asc: bool,
    },

    /// Check whether an entity duplicates others
    Resolve {
        /// Entity to resolve
        #[arg(short, long)]
        id: String,

        /// Candidate ids; defaults to a name search
        #[arg(long, value_delimiter = ',')]
        candidates: Vec<String>,

        /// Text surrounding the mention
        #[arg(long, default_value = "")]
        context: String,

        /// Candidate search limit
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Remove vector records whose owner no longer exists
    Reconcile {
        /// Keep sweeping on the configured interval until interrupted
        #[arg(long)]
        watch: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RecordKindArg {
    Entity,
    Relation,
    News,
}

impl From<RecordKindArg> for ContentType {
    fn from(kind: RecordKindArg) -> Self {
        match kind {
            RecordKindArg::Entity => ContentType::Entity,
            RecordKindArg::Relation => ContentType::Relation,
            RecordKindArg::News => ContentType::NewsEvent,
        }
    }
}

fn select_embedder(config: &NewsgraphConfig) -> Option<Arc<dyn Embedder>> {
    match config.vector.model.as_str() {
        "none" => None,
        "hashing" => Some(Arc::new(HashingEmbedder::new(config.vector.dimension))),
        model => match FastEmbedder::new() {
            Ok(embedder) => Some(Arc::new(embedder)),
            Err(e) => {
                tracing::warn!("embedding model {} unavailable, vector channel disabled: {}", model, e);
                None
            }
        },
    }
}

fn open_store(config: &NewsgraphConfig, base: &Path) -> anyhow::Result<HybridStore> {
    let db_path = config.database_path(base);
    let vector_path = config.vector_database_path(base);
    config::ensure_db_dir(&db_path)?;
    config::ensure_db_dir(&vector_path)?;
    Ok(HybridStore::open_with_config(config, base, select_embedder(config))?)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let base = std::env::current_dir()?;
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let config = config::load_config(Some(&config_path))?.unwrap_or_default();

    match cli.command {
        Commands::Init { force } => {
            config::write_config(&config_path, &config, force)?;
            let store = open_store(&config, &base)?;
            store.shutdown();

            ui::success(&format!("Wrote {}", config_path.display()));
            ui::info("Database", &config.database_path(&base).display().to_string());
            ui::info("Vectors", &config.vector_database_path(&base).display().to_string());
        }

        Commands::Stats => {
            let store = open_store(&config, &base)?;
            let stats = store.stats().await?;
            if cli.json {
                print_json(&stats)?;
            } else {
                ui::header(Icons::STATS, "Newsgraph Statistics");
                println!("{}", ui::stats_table(&stats));
            }
        }

        Commands::Health => {
            let store = open_store(&config, &base)?;
            let report = store.health_check().await;
            if cli.json {
                print_json(&report)?;
            } else {
                ui::header(Icons::HEART, "Backend health");
                println!(
                    "{}",
                    ui::health_table(&[("relational", &report.relational), ("vector", &report.vector)])
                );
            }
            if !report.is_healthy() {
                anyhow::bail!("one or more backends are unhealthy");
            }
        }

        Commands::Search { query, top_k, vector, no_text, kind } => {
            let store = open_store(&config, &base)?;
            let filters = SearchFilters {
                content_types: kind.map(|k| vec![ContentType::from(k)]).unwrap_or_default(),
                ..SearchFilters::default()
            };
            let request = SearchRequest::new(query.as_str())
                .top_k(top_k.unwrap_or(config.search.default_top_k))
                .channels(vector || store.has_embedder(), !(vector || no_text))
                .filters(filters);

            tracing::debug!(
                "searching '{}' (vector: {}, text: {})",
                query,
                request.use_vector,
                request.use_fulltext
            );
            let results = store.search(&request).await?;

            if cli.json {
                print_json(&results)?;
            } else if results.is_empty() {
                ui::warn("No results found.");
            } else {
                ui::header(Icons::SEARCH, &format!("Results for '{}'", query));
                println!("{}", ui::search_table(&results));
                for result in results.iter().filter(|r| r.snippet.is_some()) {
                    if let Some(snippet) = &result.snippet {
                        println!("{} {} {}", Icons::NEWS, result.payload.title(), ui::dim(snippet));
                    }
                }
            }
        }

        Commands::Neighbors { id, depth, max_entities, relation } => {
            let store = Arc::new(open_store(&config, &base)?);
            let engine = NeighborEngine::new(store, config.traversal.clone());

            let mut query = engine.query(id);
            if let Some(depth) = depth {
                query = query.depth(depth);
            }
            if let Some(max_entities) = max_entities {
                query = query.max_entities(max_entities);
            }
            if let Some(relation) = relation {
                query = query.relation_type(relation);
            }

            let graph = engine.neighbors(&query).await?;
            if cli.json {
                print_json(&graph)?;
            } else {
                ui::header(Icons::GRAPH, &format!("{} nodes, {} edges", graph.nodes.len(), graph.edges.len()));
                for node in &graph.nodes {
                    ui::node_line(
                        node.level,
                        node.is_center,
                        &node.entity.canonical_name,
                        &node.entity.entity_type,
                        &node.entity.id,
                    );
                }

                if !graph.edges.is_empty() {
                    ui::section("Relations");
                    let name_of = |id: &str| {
                        graph
                            .nodes
                            .iter()
                            .find(|n| n.entity.id == id)
                            .map(|n| n.entity.canonical_name.clone())
                            .unwrap_or_else(|| id.to_string())
                    };
                    for edge in &graph.edges {
                        let r = &edge.relation;
                        ui::edge_line(&name_of(&r.subject_id), &r.predicate, &name_of(&r.object_id), r.confidence_score);
                    }
                }
                if graph.truncated {
                    ui::warn("Entity cap reached; some neighbors were left out.");
                }
            }
        }

        Commands::List { kind, skip, take, sort, asc } => {
            let sort: SortKey = sort.parse()?;
            let opts = ListOptions::page(skip, take).sorted_by(sort, !asc);
            let store = open_store(&config, &base)?;

            let rows: Vec<RecordRow> = match kind {
                RecordKindArg::Entity => {
                    let entities = store.list_entities(&opts).await?;
                    if cli.json {
                        return print_json(&entities);
                    }
                    entities
                        .into_iter()
                        .map(|e| RecordRow {
                            label: ui::entity_label(&e.canonical_name, &e.entity_type),
                            detail: format!("confidence {:.2}, {} aliases", e.confidence_score, e.aliases.len()),
                            updated: e.updated_at.to_rfc3339(),
                            id: e.id,
                        })
                        .collect()
                }
                RecordKindArg::Relation => {
                    let relations = store.list_relations(&opts).await?;
                    if cli.json {
                        return print_json(&relations);
                    }
                    relations
                        .into_iter()
                        .map(|r| RecordRow {
                            label: r.predicate.clone(),
                            detail: format!("{} -> {}", r.subject_id, r.object_id),
                            updated: r.created_at.to_rfc3339(),
                            id: r.id,
                        })
                        .collect()
                }
                RecordKindArg::News => {
                    let events = store.list_news_events(&opts).await?;
                    if cli.json {
                        return print_json(&events);
                    }
                    events
                        .into_iter()
                        .map(|n| RecordRow {
                            label: n.title.clone(),
                            detail: n.source.clone(),
                            updated: n.created_at.to_rfc3339(),
                            id: n.id,
                        })
                        .collect()
                }
            };

            if rows.is_empty() {
                ui::warn("No records.");
            } else {
                println!("{}", ui::record_table(&rows));
            }
        }

        Commands::Resolve { id, candidates, context, limit } => {
            let store = open_store(&config, &base)?;
            let resolver = EntityResolver::new(config.resolution.clone());

            let report = if candidates.is_empty() {
                let target = store.get_entity(&id).await?;
                let found = resolver.find_candidates(&store, &target, limit).await?;
                resolver.resolve(&target, &found, &context).await?
            } else {
                resolver.resolve_ids(&store, &id, &candidates, &context).await?
            };

            if cli.json {
                print_json(&report)?;
            } else if report.outcomes.is_empty() {
                ui::warn("No candidates to compare.");
            } else {
                ui::header(Icons::LINK, &format!("Resolution for {}", report.target_id));
                for (i, outcome) in report.outcomes.iter().enumerate() {
                    let marker = if Some(i) == report.best_match {
                        Icons::CHECK
                    } else if !outcome.same {
                        Icons::CROSS
                    } else {
                        "  "
                    };
                    println!(
                        "{} {} same={} confidence={} stage={}{}",
                        marker,
                        ui::entity_label(&outcome.candidate.canonical_name, &outcome.candidate.entity_type),
                        outcome.same,
                        ui::score(outcome.confidence),
                        outcome.stage,
                        if outcome.degraded { " (degraded)" } else { "" }
                    );
                    println!("     {}", ui::dim(&outcome.rationale));
                }
                if report.any_degraded() {
                    ui::warn("Ambiguous pairs fell back to the linear score; no LLM is configured for the CLI.");
                }
            }
        }

        Commands::Reconcile { watch } => {
            let store = Arc::new(open_store(&config, &base)?);
            let removed = store.reconcile_orphans().await?;
            ui::success(&format!("{} Removed {} orphan vector records", Icons::BROOM, removed));

            if watch {
                let Some(secs) = config.reconcile.interval_secs else {
                    anyhow::bail!("--watch needs [reconcile] interval_secs in the config");
                };
                ui::info("Sweeping every", &format!("{}s (Ctrl-C to stop)", secs));
                let handle = spawn_reconciler(Arc::clone(&store), Duration::from_secs(secs.max(1)));
                tokio::signal::ctrl_c().await?;
                store.shutdown();
                handle.abort();
            }
        }
    }

    Ok(())
}
