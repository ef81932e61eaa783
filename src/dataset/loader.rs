//! Image Directory Loader
//!
//! Discovers images on disk: flat directories for the segmentation arrays and
//! class-subdirectory layouts for the panel classifier.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{PanelTrainError, Result, ResultExt};

/// File extensions treated as images
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// Whether `path` has one of [`IMAGE_EXTENSIONS`]
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// All image files directly inside `dir`, sorted by path
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PanelTrainError::PathNotFound(dir.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.path().to_path_buf())
        .filter(|p| p.is_file() && is_image_file(p))
        .collect();
    files.sort();

    Ok(files)
}

/// Open and decode one image
pub fn decode_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .map_err(|e| PanelTrainError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| PanelTrainError::ImageLoad(path.to_path_buf(), e.to_string()))
}

/// Interleaved RGB pixels to planar CHW, scaled to [0, 1]
pub fn rgb_to_chw(img: &image::RgbImage) -> Vec<f32> {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let plane = width * height;
    let mut tensor = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        tensor[offset] = pixel[0] as f32 / 255.0;
        tensor[plane + offset] = pixel[1] as f32 / 255.0;
        tensor[2 * plane + offset] = pixel[2] as f32 / 255.0;
    }

    tensor
}

/// A single image with its class label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label index
    pub label: usize,
    /// Class name (the parent directory name)
    pub class_name: String,
}

/// Classification dataset laid out as `root/<class name>/<image>`
///
/// Images are decoded lazily and resized to `image_size` x `image_size`.
#[derive(Debug, Clone)]
pub struct ClassDirectoryDataset {
    pub root_dir: PathBuf,
    pub samples: Vec<ImageSample>,
    /// Class names in label order (sorted)
    pub class_names: Vec<String>,
    pub image_size: usize,
}

impl ClassDirectoryDataset {
    pub fn new<P: AsRef<Path>>(root_dir: P, image_size: usize) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Loading class directories from: {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(PanelTrainError::PathNotFound(root_dir));
        }

        let mut class_names: Vec<String> = WalkDir::new(&root_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        class_names.sort();

        let class_to_idx: HashMap<&str, usize> = class_names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();

        let mut samples = Vec::new();
        for class_name in &class_names {
            let label = class_to_idx[class_name.as_str()];
            let files = list_images(&root_dir.join(class_name))?;
            debug!(
                "Class '{}' (label {}): {} images",
                class_name,
                label,
                files.len()
            );

            samples.extend(files.into_iter().map(|path| ImageSample {
                path,
                label,
                class_name: class_name.clone(),
            }));
        }

        info!(
            "Found {} images in {} classes",
            samples.len(),
            class_names.len()
        );

        Ok(Self {
            root_dir,
            samples,
            class_names,
            image_size,
        })
    }

    /// Get the number of samples in the dataset
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the dataset is empty
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Decode sample `index` as CHW floats in [0, 1] plus its label
    pub fn load(&self, index: usize) -> Result<(Vec<f32>, usize)> {
        let sample = self.samples.get(index).with_context(|| {
            format!(
                "Sample index {} out of range ({} samples)",
                index,
                self.samples.len()
            )
        })?;

        let size = self.image_size as u32;
        let rgb = decode_image(&sample.path)?
            .resize_exact(size, size, FilterType::Triangle)
            .to_rgb8();

        Ok((rgb_to_chw(&rgb), sample.label))
    }
}
