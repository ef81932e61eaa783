//! Pascal-VOC annotation conversion.
//!
//! Each detection dataset keeps one XML file per image under `annotations/`.
//! Before training the XML set is flattened into `annotations.csv` next to the
//! `images/` folder, one row per bounding box.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{PanelTrainError, Result};

/// The fixed mounting-configuration label set, in class-index order
pub const MOUNTING_CLASSES: [&str; 4] = [
    "ground-fixed",
    "carport-fixed",
    "rooftop-fixed",
    "ground-single_axis_tracker",
];

/// Name of the flattened annotation table inside a dataset directory
pub const ANNOTATION_CSV: &str = "annotations.csv";

/// Index of `label` in [`MOUNTING_CLASSES`]
pub fn class_index(label: &str) -> Result<usize> {
    MOUNTING_CLASSES
        .iter()
        .position(|c| *c == label)
        .ok_or_else(|| PanelTrainError::UnknownClass {
            label: label.to_string(),
            expected: MOUNTING_CLASSES.join(", "),
        })
}

/// One labeled bounding box
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub class: String,
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
    /// Sequential id of the XML file the row came from
    pub image_id: u32,
}

/// Flat table of annotation rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationTable {
    pub records: Vec<AnnotationRecord>,
}

impl AnnotationTable {
    pub fn new(records: Vec<AnnotationRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Occurrences per class label
    pub fn class_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.class.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Fail on the first label outside [`MOUNTING_CLASSES`]
    pub fn validate_labels(&self) -> Result<()> {
        for record in &self.records {
            class_index(&record.class)?;
        }
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        debug!("Wrote {} annotation rows to {:?}", self.len(), path);
        Ok(())
    }

    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let records = reader
            .deserialize()
            .collect::<std::result::Result<Vec<AnnotationRecord>, _>>()?;
        Ok(Self { records })
    }
}

/// Parse one Pascal-VOC XML document
pub fn parse_annotation_xml(path: &Path, image_id: u32) -> Result<Vec<AnnotationRecord>> {
    let text = std::fs::read_to_string(path)?;
    let malformed = |message: String| PanelTrainError::Annotation {
        path: path.to_path_buf(),
        message,
    };

    let doc = roxmltree::Document::parse(&text).map_err(|e| malformed(e.to_string()))?;
    let root = doc.root_element();

    let filename = child_text(root, "filename").ok_or_else(|| malformed("missing <filename>".into()))?;
    let size = child(root, "size").ok_or_else(|| malformed("missing <size>".into()))?;
    let width = parse_number(size, "width").map_err(&malformed)?;
    let height = parse_number(size, "height").map_err(&malformed)?;

    let mut records = Vec::new();
    for object in root.children().filter(|n| n.has_tag_name("object")) {
        let class = child_text(object, "name").ok_or_else(|| malformed("object without <name>".into()))?;
        let bndbox = child(object, "bndbox")
            .ok_or_else(|| malformed(format!("object '{}' without <bndbox>", class)))?;

        let xmin = parse_number(bndbox, "xmin").map_err(&malformed)?;
        let ymin = parse_number(bndbox, "ymin").map_err(&malformed)?;
        let xmax = parse_number(bndbox, "xmax").map_err(&malformed)?;
        let ymax = parse_number(bndbox, "ymax").map_err(&malformed)?;

        if xmax <= xmin || ymax <= ymin {
            return Err(malformed(format!(
                "empty box ({}, {}, {}, {}) for '{}'",
                xmin, ymin, xmax, ymax, class
            )));
        }

        records.push(AnnotationRecord {
            filename: filename.clone(),
            width,
            height,
            class,
            xmin,
            ymin,
            xmax,
            ymax,
            image_id,
        });
    }

    Ok(records)
}

/// Flatten every `*.xml` file of `annotation_dir` into a CSV table at `csv_path`.
///
/// Files are processed in sorted order and numbered from 0.
pub fn xml_to_csv(annotation_dir: &Path, csv_path: &Path) -> Result<AnnotationTable> {
    if !annotation_dir.is_dir() {
        return Err(PanelTrainError::PathNotFound(annotation_dir.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(annotation_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.path().to_path_buf())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("xml"))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(PanelTrainError::Annotation {
            path: annotation_dir.to_path_buf(),
            message: "no XML annotation files".to_string(),
        });
    }

    let mut records = Vec::new();
    for (image_id, file) in files.iter().enumerate() {
        records.extend(parse_annotation_xml(file, image_id as u32)?);
    }

    if records.is_empty() {
        return Err(PanelTrainError::Annotation {
            path: annotation_dir.to_path_buf(),
            message: "annotation files contain no labeled objects".to_string(),
        });
    }

    let table = AnnotationTable::new(records);
    table.write_csv(csv_path)?;

    info!(
        "Converted {} annotation files ({} boxes) into {:?}",
        files.len(),
        table.len(),
        csv_path
    );

    Ok(table)
}

fn child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    tag: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn child_text(node: roxmltree::Node, tag: &str) -> Option<String> {
    child(node, tag)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Numeric child value; fractional pixel coordinates are truncated
fn parse_number(node: roxmltree::Node, tag: &str) -> std::result::Result<u32, String> {
    let text = child_text(node, tag).ok_or_else(|| format!("missing <{}>", tag))?;
    let value: f64 = text
        .parse()
        .map_err(|_| format!("<{}> is not a number: '{}'", tag, text))?;

    if !value.is_finite() || value < 0.0 {
        return Err(format!("<{}> must be a non-negative number, got {}", tag, value));
    }

    Ok(value.trunc() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn voc(filename: &str, objects: &[(&str, [u32; 4])]) -> String {
        let objects: String = objects
            .iter()
            .map(|(name, b)| {
                format!(
                    "<object><name>{}</name><bndbox><xmin>{}</xmin><ymin>{}</ymin>\
                     <xmax>{}</xmax><ymax>{}</ymax></bndbox></object>",
                    name, b[0], b[1], b[2], b[3]
                )
            })
            .collect();
        format!(
            "<annotation><filename>{}</filename><size><width>640</width>\
             <height>480</height><depth>3</depth></size>{}</annotation>",
            filename, objects
        )
    }

    #[test]
    fn test_parse_voc_objects() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.xml");
        std::fs::write(
            &path,
            voc(
                "a.png",
                &[
                    ("ground-fixed", [1, 2, 30, 40]),
                    ("carport-fixed", [5, 6, 7, 8]),
                ],
            ),
        )
        .unwrap();

        let records = parse_annotation_xml(&path, 3).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].filename, "a.png");
        assert_eq!((records[0].width, records[0].height), (640, 480));
        assert_eq!(records[1].class, "carport-fixed");
        assert_eq!(
            (records[0].xmin, records[0].ymin, records[0].xmax, records[0].ymax),
            (1, 2, 30, 40)
        );
        assert!(records.iter().all(|r| r.image_id == 3));
    }

    #[test]
    fn test_fractional_coordinates_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.xml");
        std::fs::write(
            &path,
            "<annotation><filename>a.png</filename><size><width>10</width><height>10</height></size>\
             <object><name>rooftop-fixed</name><bndbox><xmin>1.7</xmin><ymin>2.2</ymin>\
             <xmax>8.9</xmax><ymax>9.0</ymax></bndbox></object></annotation>",
        )
        .unwrap();

        let records = parse_annotation_xml(&path, 0).unwrap();
        assert_eq!((records[0].xmin, records[0].xmax), (1, 8));
    }

    #[test]
    fn test_malformed_xml_is_annotation_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.xml");
        std::fs::write(&path, "<annotation><filename>a.png</filename>").unwrap();

        let result = parse_annotation_xml(&path, 0);
        assert!(matches!(result, Err(PanelTrainError::Annotation { .. })));
    }

    #[test]
    fn test_missing_bndbox_field_is_annotation_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.xml");
        std::fs::write(
            &path,
            "<annotation><filename>a.png</filename><size><width>10</width><height>10</height></size>\
             <object><name>ground-fixed</name><bndbox><xmin>1</xmin></bndbox></object></annotation>",
        )
        .unwrap();

        assert!(matches!(
            parse_annotation_xml(&path, 0),
            Err(PanelTrainError::Annotation { .. })
        ));
    }

    #[test]
    fn test_xml_to_csv_numbers_files_in_order() {
        let dir = TempDir::new().unwrap();
        let annotations = dir.path().join("annotations");
        std::fs::create_dir(&annotations).unwrap();
        std::fs::write(
            annotations.join("b.xml"),
            voc("b.png", &[("rooftop-fixed", [0, 0, 5, 5])]),
        )
        .unwrap();
        std::fs::write(
            annotations.join("a.xml"),
            voc("a.png", &[("ground-fixed", [0, 0, 5, 5]), ("ground-fixed", [1, 1, 6, 6])]),
        )
        .unwrap();

        let csv_path = dir.path().join(ANNOTATION_CSV);
        let table = xml_to_csv(&annotations, &csv_path).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.records[0].image_id, 0);
        assert_eq!(table.records[2].filename, "b.png");
        assert_eq!(table.records[2].image_id, 1);

        let header = std::fs::read_to_string(&csv_path).unwrap();
        assert!(header.starts_with("filename,width,height,class,xmin,ymin,xmax,ymax,image_id"));
        assert_eq!(AnnotationTable::read_csv(&csv_path).unwrap(), table);
    }

    #[test]
    fn test_empty_annotation_dir_is_error() {
        let dir = TempDir::new().unwrap();
        let result = xml_to_csv(dir.path(), &dir.path().join(ANNOTATION_CSV));
        assert!(matches!(result, Err(PanelTrainError::Annotation { .. })));
    }

    #[test]
    fn test_unknown_label_rejected() {
        let table = AnnotationTable::new(vec![AnnotationRecord {
            filename: "a.png".into(),
            width: 10,
            height: 10,
            class: "rooftop-tracker".into(),
            xmin: 0,
            ymin: 0,
            xmax: 5,
            ymax: 5,
            image_id: 0,
        }]);

        match table.validate_labels() {
            Err(PanelTrainError::UnknownClass { label, .. }) => assert_eq!(label, "rooftop-tracker"),
            other => panic!("expected UnknownClass, got {:?}", other),
        }
    }

    #[test]
    fn test_class_index_order() {
        assert_eq!(class_index("ground-fixed").unwrap(), 0);
        assert_eq!(class_index("ground-single_axis_tracker").unwrap(), 3);
    }
}
