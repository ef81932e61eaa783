//! Detection dataset assembled from an annotation table.
//!
//! Rows sharing an `image_id` become the boxes of one image, so rows
//! duplicated by oversampling become duplicated boxes of the same image.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::dataset::annotations::{class_index, AnnotationTable};
use crate::dataset::arrays::SPATIAL_MULTIPLE;
use crate::dataset::augmentation::DetectionTransform;
use crate::dataset::burn_dataset::DetectionItem;
use crate::dataset::loader::decode_image;
use crate::utils::error::{PanelTrainError, Result, ResultExt};

/// Ground truth of one image, in source pixel coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEntry {
    pub filename: String,
    pub boxes: Vec<[u32; 4]>,
    pub labels: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct DetectionDataset {
    pub images_dir: PathBuf,
    pub entries: Vec<DetectionEntry>,
    pub transform: DetectionTransform,
}

impl DetectionDataset {
    /// Group `table` by image and resolve labels.
    ///
    /// Fails on unknown labels, on images missing from `images_dir` and on
    /// images too small for the backbone after `transform`, so all of them
    /// surface before any training step.
    pub fn from_table(
        table: &AnnotationTable,
        images_dir: &Path,
        transform: DetectionTransform,
    ) -> Result<Self> {
        if !images_dir.is_dir() {
            return Err(PanelTrainError::PathNotFound(images_dir.to_path_buf()));
        }

        let mut grouped: BTreeMap<u32, DetectionEntry> = BTreeMap::new();
        for record in &table.records {
            let label = class_index(&record.class)?;
            let entry = grouped
                .entry(record.image_id)
                .or_insert_with(|| DetectionEntry {
                    filename: record.filename.clone(),
                    boxes: Vec::new(),
                    labels: Vec::new(),
                });
            entry
                .boxes
                .push([record.xmin, record.ymin, record.xmax, record.ymax]);
            entry.labels.push(label);
        }

        let entries: Vec<DetectionEntry> = grouped.into_values().collect();
        for entry in &entries {
            let path = images_dir.join(&entry.filename);
            if !path.is_file() {
                return Err(PanelTrainError::PathNotFound(path));
            }
            let (width, height) = image::image_dimensions(&path)
                .map_err(|e| PanelTrainError::ImageLoad(path.clone(), e.to_string()))?;
            let (out_w, out_h) = transform.output_size(width, height);
            if (out_w.min(out_h) as usize) < SPATIAL_MULTIPLE {
                return Err(PanelTrainError::ShapeMismatch(format!(
                    "{:?} is {}x{} after preprocessing, both sides must be at least {}",
                    path, out_w, out_h, SPATIAL_MULTIPLE
                )));
            }
        }

        info!(
            "Detection dataset: {} images, {} boxes from {:?}",
            entries.len(),
            table.len(),
            images_dir
        );

        Ok(Self {
            images_dir: images_dir.to_path_buf(),
            entries,
            transform,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode and transform image `index`; boxes are normalized by the
    /// decoded image size so they survive resizing
    pub fn load(&self, index: usize) -> Result<DetectionItem> {
        let entry = self.entries.get(index).with_context(|| {
            format!(
                "Detection index {} out of range ({} images)",
                index,
                self.entries.len()
            )
        })?;

        let image = decode_image(&self.images_dir.join(&entry.filename))?;
        let (src_w, src_h) = (image.width().max(1) as f32, image.height().max(1) as f32);

        let boxes = entry
            .boxes
            .iter()
            .map(|b| {
                [
                    (b[0] as f32 / src_w).min(1.0),
                    (b[1] as f32 / src_h).min(1.0),
                    (b[2] as f32 / src_w).min(1.0),
                    (b[3] as f32 / src_h).min(1.0),
                ]
            })
            .collect();

        let transformed = self.transform.apply(image);

        Ok(DetectionItem {
            image: transformed.data,
            height: transformed.height,
            width: transformed.width,
            boxes,
            labels: entry.labels.clone(),
        })
    }
}
