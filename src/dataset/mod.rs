//! Dataset module for satellite imagery
//!
//! This module provides functionality for:
//! - Loading image and mask arrays for segmentation
//! - Walking class-subdirectory layouts for the panel classifier
//! - Converting Pascal-VOC annotations to a CSV table and balancing its classes
//! - Burn items and batchers for all three pipelines

pub mod annotations;
pub mod arrays;
pub mod augmentation;
pub mod balance;
pub mod burn_dataset;
pub mod detection;
pub mod loader;

// Re-export main types for convenience
pub use annotations::{
    xml_to_csv, AnnotationRecord, AnnotationTable, ANNOTATION_CSV, MOUNTING_CLASSES,
};
pub use arrays::{ImageArray, MaskArray};
pub use augmentation::DetectionTransform;
pub use balance::{balance_classes, ClassBalanceTable};
pub use burn_dataset::{
    ClassificationBatch, ClassificationBatcher, ClassificationItem, DetectionBatch,
    DetectionBatcher, DetectionItem, SegmentationBatch, SegmentationBatcher, SegmentationDataset,
    SegmentationItem,
};
pub use detection::DetectionDataset;
pub use loader::{ClassDirectoryDataset, ImageSample};
