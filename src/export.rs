//! COCO-style dataset export structure.
//!
//! Builds the interchange structure consumed by external format converters:
//! `images`, `annotations` and `categories` arrays with sequential 1-based
//! integer ids assigned in insertion order, distinct from the internal
//! string identities. The internal-id to integer-id mapping is stable and
//! reused across images and annotations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{Image, Label, LabelClass};

/// A COCO dataset: the top-level export structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CocoDataset {
    pub images: Vec<CocoImage>,
    pub annotations: Vec<CocoAnnotation>,
    pub categories: Vec<CocoCategory>,
}

/// A COCO category, converted from a label class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoCategory {
    /// Sequential export id, 1-based.
    pub id: u32,
    pub name: String,
    pub supercategory: String,
}

/// A COCO image record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoImage {
    /// Sequential export id, 1-based.
    pub id: u32,
    pub file_name: String,
    pub coco_url: String,
    pub width: u32,
    pub height: u32,
}

/// A COCO annotation, converted from a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CocoAnnotation {
    /// Sequential export id, 1-based.
    pub id: u32,
    /// Export id of the owning image.
    pub image_id: u32,
    /// Export id of the category; `null` for class-less labels.
    pub category_id: Option<u32>,
    /// One flattened [x0, y0, x1, y1, ...] ring per polygon.
    pub segmentation: Vec<Vec<f64>>,
    /// Bounding box area.
    pub area: f64,
    /// Bounding box as [x, y, width, height].
    pub bbox: [f64; 4],
    pub iscrowd: u8,
}

/// Convert a label class to a COCO category with the given export id.
pub fn convert_label_class_to_coco_category(class: &LabelClass, id: u32) -> CocoCategory {
    CocoCategory {
        id,
        name: class.name.clone(),
        supercategory: String::new(),
    }
}

/// Convert label classes to categories, assigning sequential ids in slice
/// order. Also returns the internal-id to export-id mapping.
pub fn convert_label_classes_to_coco_categories(
    classes: &[LabelClass],
) -> (Vec<CocoCategory>, HashMap<String, u32>) {
    let mut categories = Vec::with_capacity(classes.len());
    let mut id_map = HashMap::with_capacity(classes.len());

    for (index, class) in classes.iter().enumerate() {
        let id = (index + 1) as u32;
        categories.push(convert_label_class_to_coco_category(class, id));
        id_map.insert(class.id.clone(), id);
    }

    (categories, id_map)
}

/// Convert an image to a COCO image record with the given export id.
pub fn convert_image_to_coco_image(image: &Image, id: u32) -> CocoImage {
    CocoImage {
        id,
        file_name: image.name.clone(),
        coco_url: image.url.clone(),
        width: image.width,
        height: image.height,
    }
}

/// Convert a label to a COCO annotation.
pub fn convert_label_to_coco_annotation(
    label: &Label,
    id: u32,
    image_id: u32,
    category_id: Option<u32>,
) -> CocoAnnotation {
    let ring: Vec<f64> = label
        .geometry
        .vertices
        .iter()
        .flat_map(|point| [point.x, point.y])
        .collect();

    CocoAnnotation {
        id,
        image_id,
        category_id,
        segmentation: if ring.is_empty() { vec![] } else { vec![ring] },
        area: label.width * label.height,
        bbox: [label.x, label.y, label.width, label.height],
        iscrowd: 0,
    }
}

/// Build the full export structure from repository rows.
///
/// Images get export ids in slice order; annotation ids run sequentially
/// across all images, grouped by image. Labels whose image is not part of
/// the export are skipped.
pub fn convert_to_coco_dataset(
    images: &[Image],
    labels: &[Label],
    classes: &[LabelClass],
) -> CocoDataset {
    let (categories, class_id_map) = convert_label_classes_to_coco_categories(classes);

    let mut image_id_map: HashMap<String, u32> = HashMap::with_capacity(images.len());
    let coco_images: Vec<CocoImage> = images
        .iter()
        .enumerate()
        .map(|(index, image)| {
            let id = (index + 1) as u32;
            image_id_map.insert(image.id.clone(), id);
            convert_image_to_coco_image(image, id)
        })
        .collect();

    let mut annotations = Vec::with_capacity(labels.len());
    let mut annotation_id = 1u32;
    for image in images {
        for label in labels.iter().filter(|label| label.image_id == image.id) {
            let category_id = label
                .label_class_id
                .as_ref()
                .and_then(|class_id| class_id_map.get(class_id))
                .copied();
            annotations.push(convert_label_to_coco_annotation(
                label,
                annotation_id,
                image_id_map[&image.id],
                category_id,
            ));
            annotation_id += 1;
        }
    }

    log::debug!(
        "Converted {} images, {} annotations, {} categories",
        coco_images.len(),
        annotations.len(),
        categories.len()
    );

    CocoDataset {
        images: coco_images,
        annotations,
        categories,
    }
}
