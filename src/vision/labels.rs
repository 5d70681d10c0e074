//! Class labels for the object detector
//!
//! Exported YOLO models usually carry their class names in custom metadata.
//! The value shows up in several shapes (comma/semicolon/newline separated,
//! a JSON object, or a Python dict repr), so parsing is lenient.
//! Anything unusable falls back to the 80 COCO classes.

use std::collections::BTreeMap;
use tracing::{debug, warn};

/// COCO class names, in model index order
pub const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck",
    "boat", "traffic light", "fire hydrant", "stop sign", "parking meter", "bench",
    "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra",
    "giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee",
    "skis", "snowboard", "sports ball", "kite", "baseball bat", "baseball glove",
    "skateboard", "surfboard", "tennis racket", "bottle", "wine glass", "cup",
    "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

/// The built-in label set
pub fn default_labels() -> Vec<String> {
    COCO_LABELS.iter().map(|s| s.to_string()).collect()
}

/// Pick labels out of model metadata, falling back to COCO
///
/// The first key containing "names", "labels" or "classes" (any case) wins.
pub fn labels_from_metadata(metadata: &[(String, String)]) -> Vec<String> {
    let entry = metadata.iter().find(|(key, _)| {
        let key = key.to_lowercase();
        key.contains("names") || key.contains("labels") || key.contains("classes")
    });

    let Some((key, value)) = entry else {
        debug!("No label metadata found, using COCO labels");
        return default_labels();
    };

    match parse_label_list(value) {
        Some(labels) => {
            debug!("Loaded {} labels from metadata key {:?}", labels.len(), key);
            labels
        }
        None => {
            warn!("Could not parse labels from metadata key {:?}, using COCO labels", key);
            default_labels()
        }
    }
}

/// Parse a label list in any of the supported shapes
///
/// Returns `None` when nothing usable comes out.
pub fn parse_label_list(value: &str) -> Option<Vec<String>> {
    let trimmed = value.trim();

    let labels = if trimmed.starts_with('{') {
        parse_label_map(trimmed)?
    } else {
        let parts: Vec<&str> = if trimmed.contains(',') {
            trimmed.split(',').collect()
        } else if trimmed.contains(';') {
            trimmed.split(';').collect()
        } else if trimmed.contains('\n') {
            trimmed.split('\n').collect()
        } else {
            vec![trimmed]
        };

        parts
            .into_iter()
            .map(clean_label)
            .filter(|label| !label.is_empty())
            .collect()
    };

    if labels.is_empty() {
        None
    } else {
        Some(labels)
    }
}

/// Parse an index -> label map, ordered by index
///
/// Accepts strict JSON (`{"0": "person"}`) and the Python dict repr that
/// exporters commonly write (`{0: 'person'}`).
fn parse_label_map(value: &str) -> Option<Vec<String>> {
    let mut by_index = BTreeMap::new();

    if let Ok(map) = serde_json::from_str::<BTreeMap<String, String>>(value) {
        for (key, label) in map {
            if let Ok(index) = key.trim().parse::<usize>() {
                by_index.insert(index, label.trim().to_string());
            }
        }
    } else {
        let inner = value.trim().trim_start_matches('{').trim_end_matches('}');
        for pair in inner.split(',') {
            let Some((key, label)) = pair.split_once(':') else {
                continue;
            };
            let Ok(index) = clean_label(key).parse::<usize>() else {
                continue;
            };
            by_index.insert(index, clean_label(label));
        }
    }

    let labels: Vec<String> = by_index
        .into_values()
        .filter(|label| !label.is_empty())
        .collect();

    if labels.is_empty() {
        None
    } else {
        Some(labels)
    }
}

fn clean_label(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '{' | '}' | '[' | ']'))
        .collect::<String>()
        .trim()
        .to_string()
}
