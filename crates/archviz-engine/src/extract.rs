//! Locating base64 image payloads in loosely shaped response documents.

use serde_json::{Map, Value};

/// Returns the `data` of every inline-data node whose MIME type is `image/*`,
/// in document order.
///
/// The whole tree is searched: at each object, `inline_data` / `inlineData` is
/// checked first, then every value is visited in source order. Nodes with a
/// non-image MIME type or empty data are skipped.
pub fn extract_inline_images(payload: &Value) -> Vec<String> {
    let mut images = Vec::new();
    collect_inline_images(payload, &mut images);
    images
}

/// Inline-data walk, then Imagen `predictions` rows when the walk found
/// nothing.
pub fn extract_images(payload: &Value) -> Vec<String> {
    let images = extract_inline_images(payload);
    if !images.is_empty() {
        return images;
    }
    extract_prediction_images(payload)
}

/// Imagen `:predict` rows: `bytesBase64Encoded` directly on the row, or under
/// `image` / `generatedImage` as `imageBytes`.
pub fn extract_prediction_images(payload: &Value) -> Vec<String> {
    let rows = payload
        .get("predictions")
        .or_else(|| payload.get("generatedImages"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut out = Vec::new();
    for row in rows {
        let Some(obj) = row.as_object() else {
            continue;
        };
        if let Some(encoded) =
            first_non_empty_str(obj, &["bytesBase64Encoded", "bytes_base64_encoded"])
        {
            out.push(encoded.to_string());
            continue;
        }
        let nested = obj
            .get("image")
            .or_else(|| obj.get("generatedImage"))
            .and_then(Value::as_object);
        if let Some(encoded) = nested.and_then(|image| {
            first_non_empty_str(image, &["imageBytes", "image_bytes", "bytesBase64Encoded"])
        }) {
            out.push(encoded.to_string());
        }
    }
    out
}

fn collect_inline_images(node: &Value, out: &mut Vec<String>) {
    match node {
        Value::Object(map) => {
            if let Some(data) = inline_image_data(map) {
                out.push(data.to_string());
            }
            for value in map.values() {
                collect_inline_images(value, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_inline_images(item, out);
            }
        }
        _ => {}
    }
}

fn inline_image_data(node: &Map<String, Value>) -> Option<&str> {
    // An empty or null `inline_data` defers to `inlineData`.
    let inline = ["inline_data", "inlineData"]
        .iter()
        .filter_map(|key| node.get(*key))
        .find(|value| is_truthy(value))?
        .as_object()?;
    let mime = first_non_empty_str(inline, &["mime_type", "mimeType"]).unwrap_or_default();
    if !mime.starts_with("image/") {
        return None;
    }
    inline
        .get("data")
        .and_then(Value::as_str)
        .filter(|data| !data.is_empty())
}

fn first_non_empty_str<'a>(node: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| node.get(*key).and_then(Value::as_str))
        .find(|value| !value.is_empty())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(_) => true,
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
