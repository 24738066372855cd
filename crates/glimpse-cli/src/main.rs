mod config;
mod source;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use glimpse_core::crop::crop_face;
use glimpse_core::scorer::{cosine_similarity, l2_distance};
use glimpse_core::stream::FrameOutcome;
use glimpse_core::{
    Embedding, FaceDetector, FaceNetEmbedder, ModelInfo, Pipeline, RecognitionState,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "glimpse", about = "Glimpse face gallery recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the available embedding model presets
    Models {
        #[arg(long)]
        json: bool,
    },
    /// Enroll a reference directory (<dir>/<label>/<image>) and summarize it
    Enroll {
        dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Compare the first face in two images under both metrics
    Compare { a: PathBuf, b: PathBuf },
    /// Enroll references, then replay a directory of frames through the matcher
    Watch {
        refs: PathBuf,
        frames: PathBuf,
        /// Frames offered per second
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..))]
        fps: u32,
        /// Number of passes over the frame directory
        #[arg(long, default_value_t = 1)]
        loops: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Models { json } => list_models(json)?,
        Commands::Enroll { dir, json } => {
            let config = Config::from_env()?;
            enroll(&config, &dir, json).await?;
        }
        Commands::Compare { a, b } => {
            let config = Config::from_env()?;
            compare(&config, &a, &b)?;
        }
        Commands::Watch {
            refs,
            frames,
            fps,
            loops,
        } => {
            let config = Config::from_env()?;
            watch(&config, &refs, &frames, fps, loops).await?;
        }
    }

    Ok(())
}

fn list_models(json: bool) -> Result<()> {
    let presets = ModelInfo::presets();
    if json {
        println!("{}", serde_json::to_string_pretty(presets)?);
        return Ok(());
    }

    let default = ModelInfo::default();
    for m in presets {
        let marker = if m.id == default.id { "*" } else { " " };
        println!(
            "{marker} {:<24} {:>4}d  input {}px  cosine > {:.2}  l2 <= {:.2}  ({})",
            m.id, m.output_dims, m.input_dims, m.cosine_threshold, m.l2_threshold, m.asset
        );
    }
    Ok(())
}

fn load_models(config: &Config) -> Result<(FaceDetector, FaceNetEmbedder)> {
    let detector = FaceDetector::load(&config.detector_model_path(), config.detector)
        .context("loading face detector")?;
    let embedder =
        FaceNetEmbedder::load(&config.model_dir, config.model).context("loading embedding model")?;
    Ok((detector, embedder))
}

fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let (detector, embedder) = load_models(config)?;
    Ok(Pipeline::new(detector, embedder, config.pipeline())?)
}

async fn enroll(config: &Config, dir: &Path, json: bool) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let images = source::load_references(dir)?;
    let total = images.len();

    let report = pipeline
        .enroll(images, |gallery, no_face| {
            tracing::info!(entries = gallery.len(), no_face, "gallery ready");
        })
        .await?;

    let mut per_label: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in &report.gallery {
        *per_label.entry(entry.label.as_str()).or_default() += 1;
    }

    if json {
        let failures: Vec<_> = report
            .failures
            .iter()
            .map(|f| serde_json::json!({ "index": f.index, "label": f.label, "error": f.error.to_string() }))
            .collect();
        let summary = serde_json::json!({
            "model": pipeline.model().id,
            "images": total,
            "entries": report.gallery.len(),
            "labels": per_label,
            "no_face": report.no_face_count,
            "failures": failures,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "Enrolled {} of {total} images with {}",
        report.gallery.len(),
        pipeline.model().name
    );
    for (label, count) in &per_label {
        println!("  {label:<20} {count}");
    }
    println!("No face detected: {}", report.no_face_count);
    for f in &report.failures {
        println!("  failed #{} ({}): {}", f.index, f.label, f.error);
    }
    Ok(())
}

fn embed_first_face(
    detector: &mut FaceDetector,
    embedder: &mut FaceNetEmbedder,
    path: &Path,
) -> Result<Embedding> {
    let image = source::load_image(path)?;
    let faces = detector.detect(&image)?;
    let face = faces
        .first()
        .with_context(|| format!("no face detected in {}", path.display()))?;
    let crop = crop_face(&image, face)
        .with_context(|| format!("face box lies outside {}", path.display()))?;
    Ok(embedder.extract(&crop)?)
}

fn compare(config: &Config, a: &Path, b: &Path) -> Result<()> {
    let (mut detector, mut embedder) = load_models(config)?;
    let ea = embed_first_face(&mut detector, &mut embedder, a)?;
    let eb = embed_first_face(&mut detector, &mut embedder, b)?;

    let model = config.model;
    let l2 = l2_distance(&ea, &eb)?;
    let cosine = cosine_similarity(&ea, &eb)?;
    let verdict = |same: bool| if same { "same person" } else { "different" };

    println!("Model: {}", model.name);
    println!(
        "L2 distance:       {l2:.4}  (threshold {:.2}) -> {}",
        model.l2_threshold,
        verdict(l2.is_finite() && l2 <= model.l2_threshold)
    );
    println!(
        "Cosine similarity: {cosine:.4}  (threshold {:.2}) -> {}",
        model.cosine_threshold,
        verdict(cosine > model.cosine_threshold)
    );
    Ok(())
}

fn describe(state: &RecognitionState) -> String {
    match state {
        RecognitionState::Init => "waiting".to_string(),
        RecognitionState::NoUser => "no single face in view".to_string(),
        RecognitionState::UserUnknown => "unknown face".to_string(),
        RecognitionState::UserRecognized { label, score } => {
            format!("recognized {label} (score {score:.3})")
        }
    }
}

async fn watch(config: &Config, refs: &Path, frames: &Path, fps: u32, loops: u32) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let references = source::load_references(refs)?;
    let report = pipeline
        .enroll(references, |gallery, no_face| {
            println!(
                "Gallery: {} entries ({} labels), {no_face} without a face",
                gallery.len(),
                gallery.labels().len()
            );
        })
        .await?;
    if report.gallery.is_empty() {
        anyhow::bail!("no reference faces enrolled from {}", refs.display());
    }

    let replay = source::FrameReplay::open(frames, loops)?;
    tracing::info!(frames = replay.total(), fps, "replaying frames");

    let mut states = pipeline.subscribe();
    let printer = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            println!("{}", describe(&state));
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_secs(1) / fps);
    let mut accepted = 0usize;
    let mut dropped = 0usize;
    let mut handles = Vec::new();
    let mut unreadable = 0usize;

    for (path, frame) in replay {
        ticker.tick().await;
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping frame");
                unreadable += 1;
                continue;
            }
        };
        match pipeline.on_frame(frame) {
            Some(handle) => {
                accepted += 1;
                handles.push(handle);
            }
            None => dropped += 1,
        }
    }

    let mut failed = 0usize;
    for handle in handles {
        if let FrameOutcome::Failed(e) = handle.await? {
            tracing::warn!(error = %e, "frame failed");
            failed += 1;
        }
    }

    // Let the printer observe the last published state.
    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();

    println!(
        "Frames: {} offered, {accepted} accepted, {dropped} dropped, {failed} failed, {unreadable} unreadable",
        accepted + dropped
    );
    println!("Final state: {}", describe(&pipeline.state()));
    Ok(())
}
