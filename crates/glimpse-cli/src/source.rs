//! Directory-backed image sources: labeled references and replayed frames.

use anyhow::{Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Image files directly inside `dir`, sorted by name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && is_image(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

pub fn load_image(path: &Path) -> Result<RgbImage> {
    Ok(image::open(path)
        .with_context(|| format!("decoding {}", path.display()))?
        .to_rgb8())
}

/// Reference images laid out as `<dir>/<label>/<image>`, sorted by label.
pub fn reference_paths(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut labels = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            labels.push(path);
        }
    }
    labels.sort();

    let mut refs = Vec::new();
    for label_dir in labels {
        let Some(label) = label_dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        for image in list_images(&label_dir)? {
            refs.push((label.to_string(), image));
        }
    }
    Ok(refs)
}

/// Decode every reference image. Undecodable files are skipped with a warning.
pub fn load_references(dir: &Path) -> Result<Vec<(String, RgbImage)>> {
    let mut images = Vec::new();
    for (label, path) in reference_paths(dir)? {
        match load_image(&path) {
            Ok(img) => images.push((label, img)),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping reference"),
        }
    }
    Ok(images)
}

/// Replays a directory of frames in name order, `loops` times over.
///
/// Frames are decoded one at a time as they are pulled, like a camera
/// producing them; only the path list is held in memory.
pub struct FrameReplay {
    paths: Vec<PathBuf>,
    loops: u32,
    pass: u32,
    next: usize,
}

impl FrameReplay {
    pub fn open(dir: &Path, loops: u32) -> Result<Self> {
        let paths = list_images(dir)?;
        if paths.is_empty() {
            anyhow::bail!("no frames found in {}", dir.display());
        }
        Ok(Self {
            paths,
            loops,
            pass: 0,
            next: 0,
        })
    }

    /// Total frames this replay will offer.
    pub fn total(&self) -> usize {
        self.paths.len() * self.loops as usize
    }
}

impl Iterator for FrameReplay {
    /// Path of the frame and its decoded image, or the decode error.
    type Item = (PathBuf, Result<RgbImage>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pass >= self.loops {
            return None;
        }
        let path = self.paths[self.next].clone();
        self.next += 1;
        if self.next == self.paths.len() {
            self.next = 0;
            self.pass += 1;
        }
        let frame = load_image(&path);
        Some((path, frame))
    }
}
