use clap::{Parser, Subcommand};
use embedix::{
    types::metadata_from_json, DeleteOutcome, DurabilityPolicy, IndexConfig, IndexOutcome,
    IndexerService, LoadReport, Metric,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "embedix")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Embedix Contributors")]
#[command(about = "Exact embedding index with similarity search", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty index artifact
    Init {
        /// Path to the index artifact
        path: PathBuf,
    },

    /// Insert or update a document
    Index {
        /// Path to the index artifact
        path: PathBuf,

        /// Document id
        #[arg(long)]
        id: String,

        /// Comma-separated vector components, e.g. "1.0,0.0,0.25"
        #[arg(long)]
        vector: String,

        /// Flat JSON object of scalar metadata
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Rank the closest documents to a query vector
    Search {
        /// Path to the index artifact
        path: PathBuf,

        /// Comma-separated query vector
        #[arg(long)]
        vector: String,

        /// Number of results
        #[arg(short, default_value_t = 10)]
        k: usize,

        /// Similarity metric: cosine, euclidean, or dot
        #[arg(long)]
        metric: Option<Metric>,
    },

    /// Remove a document
    Delete {
        /// Path to the index artifact
        path: PathBuf,

        /// Document id
        #[arg(long)]
        id: String,
    },

    /// Show index statistics
    Stats {
        /// Path to the index artifact
        path: PathBuf,
    },
}

fn parse_vector(s: &str) -> anyhow::Result<Vec<f32>> {
    s.split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .map_err(|e| anyhow::anyhow!("invalid vector component '{}': {}", part.trim(), e))
        })
        .collect()
}

fn open_service(path: PathBuf) -> anyhow::Result<IndexerService> {
    let config = IndexConfig::new(path).with_durability(DurabilityPolicy::Manual);
    let service = IndexerService::new(config);
    if let LoadReport::Degraded(reason) = service.initialize()? {
        eprintln!("warning: starting from empty store: {}", reason);
    }
    Ok(service)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path } => {
            if path.exists() {
                eprintln!("Error: index artifact already exists: {}", path.display());
                std::process::exit(1);
            }
            let service = open_service(path.clone())?;
            service.flush()?;
            println!("Created index: {}", path.display());
        }

        Commands::Index {
            path,
            id,
            vector,
            metadata,
        } => {
            let vector = parse_vector(&vector)?;
            let metadata = match metadata {
                Some(raw) => metadata_from_json(&serde_json::from_str(&raw)?)?,
                None => Default::default(),
            };

            let service = open_service(path)?;
            let outcome = service.index(id.as_str(), vector, metadata)?;
            service.flush()?;

            match outcome {
                IndexOutcome::Inserted => println!("inserted {}", id),
                IndexOutcome::Updated => println!("updated {}", id),
            }
        }

        Commands::Search {
            path,
            vector,
            k,
            metric,
        } => {
            let query = parse_vector(&vector)?;
            let service = open_service(path)?;
            let hits = service.search(&query, k, metric)?;

            if hits.is_empty() {
                println!("no results");
            } else {
                for (rank, hit) in hits.iter().enumerate() {
                    let meta = serde_json::to_string(&hit.metadata)?;
                    println!("{:>3}. {} score={:.6} {}", rank + 1, hit.id, hit.score, meta);
                }
            }
        }

        Commands::Delete { path, id } => {
            let service = open_service(path)?;
            match service.delete(&id)? {
                DeleteOutcome::Deleted => {
                    service.flush()?;
                    println!("deleted {}", id);
                }
                DeleteOutcome::NotFound => println!("not found: {}", id),
            }
        }

        Commands::Stats { path } => {
            let service = open_service(path.clone())?;
            let status = service.status()?;

            println!("Index: {}", path.display());
            println!("Documents: {}", status.size);
            match status.dimensionality {
                Some(d) => println!("Dimensionality: {}", d),
                None => println!("Dimensionality: (unset)"),
            }
            if path.exists() {
                let file_size = std::fs::metadata(&path)?.len();
                println!("Artifact size: {:.2} KB", file_size as f64 / 1024.0);
            }
        }
    }

    Ok(())
}
