use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use serde_json::json;

use imagesearch::{
    find_matches, init, load_model, AppError, AppState, Config, EmbeddingStore, Match,
    MatchOptions, QueryContext, Result,
};

/// Find the gallery images most similar to a query image.
#[derive(Parser, Debug)]
#[command(name = "imagesearch", version, about)]
struct Cli {
    /// Gallery directory (overrides IMAGESEARCH_GALLERY_DIR)
    #[arg(long, global = true)]
    gallery: Option<PathBuf>,

    /// Embedding store file (overrides IMAGESEARCH_STORE_PATH)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Print machine readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Embed every gallery image and rewrite the store
    Init,
    /// Rank the gallery against a query image
    Match {
        /// Query image
        image: PathBuf,
        #[command(flatten)]
        ranking: RankingArgs,
        /// Also guess which body prompt describes the image
        #[arg(long)]
        guess: bool,
    },
    /// Rank the gallery against a precomputed query embedding (JSON array)
    Rank {
        /// File holding the query embedding
        #[arg(long)]
        embedding_file: PathBuf,
        #[command(flatten)]
        ranking: RankingArgs,
    },
    /// Guess which body prompt best describes an image
    Guess {
        /// Query image
        image: PathBuf,
    },
    /// List gallery images and whether the store has been built
    List,
}

#[derive(Args, Debug)]
struct RankingArgs {
    /// Minimum cosine similarity, inclusive
    #[arg(long, allow_negative_numbers = true)]
    threshold: Option<f32>,

    /// Number of matches to keep
    #[arg(long, conflicts_with = "all")]
    top_k: Option<usize>,

    /// Keep every match above the threshold
    #[arg(long)]
    all: bool,
}

impl RankingArgs {
    fn options(&self, defaults: MatchOptions) -> Result<MatchOptions> {
        let threshold = self.threshold.unwrap_or(defaults.threshold);
        let top_k = if self.all {
            None
        } else {
            self.top_k.or(defaults.top_k)
        };
        MatchOptions::new(threshold, top_k)
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init() {
        eprintln!("{}", e);
    }

    if let Err(e) = run(&cli) {
        if cli.json {
            println!("{}", json!({ "error": e.to_json() }));
        } else {
            log::error!("{}", e);
            if let Some(details) = e.to_json().details {
                eprintln!("{}", details);
            }
        }
        std::process::exit(e.exit_code());
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = Config::from_env()?;
    if let Some(gallery) = &cli.gallery {
        config.gallery_dir = gallery.clone();
    }
    if let Some(store) = &cli.store {
        config.store_path = store.clone();
    }

    match &cli.command {
        Command::Init => {
            let state = AppState::new(config.clone(), load_model(&config.model)?);
            let report = state.initialize()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for skipped in &report.skipped {
                    eprintln!("Skipped {}: {}", skipped.name, skipped.reason);
                }
                println!(
                    "Embeddings saved to {} ({} images)",
                    report.store_path.display(),
                    report.embedded
                );
            }
        }
        Command::Match {
            image,
            ranking,
            guess,
        } => {
            let options = ranking.options(config.matching)?;
            // Fail on a missing store before loading the model
            let store = EmbeddingStore::load(&config.store_path)?;
            let state = AppState::new(config.clone(), load_model(&config.model)?);
            let query = state.query_image(image, options)?;
            let matches = query.matches(&store)?;
            let guess = if *guess {
                Some(query.guess_body_prompt(&state.embedder)?)
            } else {
                None
            };

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({ "matches": matches, "guess": guess }))?
                );
            } else {
                if let Some(guess) = &guess {
                    println!("{}", guess);
                }
                print_matches(&matches);
            }
        }
        Command::Rank {
            embedding_file,
            ranking,
        } => {
            let matches = rank(&config, embedding_file, ranking)?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&json!({ "matches": matches }))?);
            } else {
                print_matches(&matches);
            }
        }
        Command::Guess { image } => {
            let state = AppState::new(config.clone(), load_model(&config.model)?);
            let query = state.query_image(image, config.matching)?;
            let guess = query.guess_body_prompt(&state.embedder)?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&guess)?);
            } else {
                println!("{}", guess);
            }
        }
        Command::List => list(&config, cli.json)?,
    }

    Ok(())
}

/// Rank the store against a query embedding read from a JSON array file
fn rank(config: &Config, embedding_file: &Path, ranking: &RankingArgs) -> Result<Vec<Match>> {
    let options = ranking.options(config.matching)?;
    let store = EmbeddingStore::load(&config.store_path)?;
    let data = std::fs::read_to_string(embedding_file)?;
    let embedding: Vec<f32> = serde_json::from_str(&data)?;
    let query = QueryContext::new(embedding, options)?;
    find_matches(&query.embedding, &store, &query.options)
}

fn gallery_listing(config: &Config, names: &[String], initialized: bool) -> serde_json::Value {
    json!({
        "gallery": config.gallery_dir.display().to_string(),
        "initialized": initialized,
        "images": names,
    })
}

fn list(config: &Config, as_json: bool) -> Result<()> {
    let images = imagesearch::scan_gallery(&config.gallery_dir, &config.extensions)?;
    let initialized = EmbeddingStore::exists(&config.store_path);
    let names: Vec<String> = images
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&gallery_listing(config, &names, initialized))?
        );
        return Ok(());
    }

    for name in &names {
        println!("{}", name);
    }
    if !initialized {
        eprintln!(
            "{}",
            AppError::NotInitialized(config.store_path.clone())
        );
    }
    Ok(())
}

fn print_matches(matches: &[Match]) {
    if matches.is_empty() {
        println!("No gallery image reached the similarity threshold");
    }
    for m in matches {
        println!("{}", m);
    }
}
