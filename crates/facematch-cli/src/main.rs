use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch_core::{FaceIdentifier, FacePipeline, ImageFileDecoder};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod annotate;
mod config;

use annotate::{load_font, AnnotatedImageWriter};
use config::Config;

#[derive(Parser)]
#[command(name = "facematch", about = "Identify known people in photographs")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory of labeled reference images
    #[arg(short, long, global = true)]
    gallery: Option<PathBuf>,

    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Name the faces in an image
    Identify {
        /// Image to search for known faces
        image: PathBuf,
        /// Maximum embedding distance for a match
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Update matched identities with the embedding seen in this image
        #[arg(long)]
        adaptive: bool,
        /// Write a copy of the image with the faces boxed
        #[arg(long, value_name = "OUTPUT")]
        annotate: Option<PathBuf>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Load the reference gallery and list its identities
    Gallery,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.gallery {
        config.gallery_dir = dir;
    }
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }

    match cli.command {
        Commands::Identify {
            image,
            threshold,
            adaptive,
            annotate,
            json,
        } => {
            if let Some(threshold) = threshold {
                config.threshold = threshold;
            }
            config.adaptive_reencode |= adaptive;
            identify(&config, &image, annotate.as_deref(), json)
        }
        Commands::Gallery => list_gallery(&config),
    }
}

fn build_identifier(config: &Config) -> Result<FaceIdentifier> {
    let (locator, encoder) = facematch_onnx::load_models(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    let locator = locator.with_confidence_threshold(config.detection_confidence);
    let pipeline = FacePipeline::new(ImageFileDecoder, locator, encoder);

    let identifier =
        FaceIdentifier::new(config.gallery_config(), config.matcher_config(), pipeline);
    tracing::debug!(
        gallery = %identifier.gallery().source_path().display(),
        extensions = ?identifier.gallery().extensions(),
        threshold = identifier.config().threshold,
        adaptive = identifier.config().adaptive_reencode,
        detection_confidence = config.detection_confidence,
        "identifier configured"
    );
    Ok(identifier)
}

fn annotation_writer(config: &Config, output: &Path) -> AnnotatedImageWriter {
    let writer = AnnotatedImageWriter::new(output);
    match load_font(&config.font) {
        Ok(font) => writer.with_font(font),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "drawing labels without names");
            writer
        }
    }
}

fn identify(config: &Config, image: &Path, annotate: Option<&Path>, json: bool) -> Result<()> {
    let identifier = build_identifier(config)?;
    let result = identifier
        .identify_image(image)
        .with_context(|| format!("identifying faces in {}", image.display()))?;

    if let Some(output) = annotate {
        result.render(&mut annotation_writer(config, output))?;
    }

    if json {
        let faces: Vec<_> = result
            .faces
            .iter()
            .map(|(bbox, face)| {
                serde_json::json!({
                    "name": face.name(),
                    "known": face.is_known(),
                    "distance": face.distance,
                    "threshold": identifier.config().threshold,
                    "box": bbox,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&faces)?);
    } else if result.faces.is_empty() {
        println!("No faces found in {}.", image.display());
    } else {
        println!("Face(s) in {}: {}.", image.display(), result.names().join(", "));
    }

    Ok(())
}

fn list_gallery(config: &Config) -> Result<()> {
    let identifier = build_identifier(config)?;
    let count = identifier
        .reload_gallery()
        .with_context(|| format!("loading gallery {}", config.gallery_dir.display()))?;

    println!(
        "{count} identities in {} (embedding size {})",
        identifier.gallery().source_path().display(),
        identifier.gallery().dim().unwrap_or(0)
    );
    for identity in identifier.gallery().cached()? {
        println!("  {}", identity.name);
    }
    Ok(())
}
