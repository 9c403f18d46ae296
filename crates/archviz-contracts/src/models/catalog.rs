use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One row of the `GET /models` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default, rename = "displayName", deserialize_with = "null_as_default")]
    pub display_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(
        default,
        rename = "supportedGenerationMethods",
        deserialize_with = "null_as_default"
    )]
    pub supported_generation_methods: Vec<String>,
}

/// Explicit `null` reads the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl ModelInfo {
    /// Identifier without the `models/` resource prefix.
    pub fn id(&self) -> &str {
        self.name.strip_prefix("models/").unwrap_or(&self.name)
    }

    /// Heuristic for models that can return image parts.
    pub fn likely_image_output(&self) -> bool {
        let id = self.id().to_ascii_lowercase();
        id.starts_with("imagen") || id.contains("image")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    models: IndexMap<String, ModelInfo>,
}

impl ModelCatalog {
    /// Parses a listing body. Rows without a `name` are skipped; a missing
    /// `models` key yields an empty catalog.
    pub fn from_listing(listing: &Value) -> anyhow::Result<Self> {
        let mut models = IndexMap::new();
        let rows = listing
            .get("models")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for row in rows {
            if row.get("name").and_then(Value::as_str).is_none() {
                continue;
            }
            let model: ModelInfo = serde_json::from_value(row)?;
            models.insert(model.id().to_string(), model);
        }
        Ok(Self { models })
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelInfo> {
        self.models.values()
    }

    pub fn image_capable(&self) -> Vec<&ModelInfo> {
        self.models
            .values()
            .filter(|model| model.likely_image_output())
            .collect()
    }

    /// `- name (displayName)` lines for the first `limit` models.
    pub fn listing_lines(&self, limit: usize) -> Vec<String> {
        self.models
            .values()
            .take(limit)
            .map(|model| format!("- {} ({})", model.name, model.display_name))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ModelCatalog;

    fn listing() -> serde_json::Value {
        json!({
            "models": [
                {
                    "name": "models/gemini-2.5-flash",
                    "displayName": "Gemini 2.5 Flash",
                    "supportedGenerationMethods": ["generateContent", "countTokens"]
                },
                {
                    "name": "models/gemini-2.5-flash-image-preview",
                    "displayName": "Nano Banana",
                    "supportedGenerationMethods": ["generateContent"]
                },
                {"displayName": "nameless row"},
                {
                    "name": "models/imagen-4.0-generate-001",
                    "displayName": "Imagen 4",
                    "supportedGenerationMethods": ["predict"]
                }
            ],
            "nextPageToken": "abc"
        })
    }

    #[test]
    fn catalog_keeps_listing_order_and_skips_nameless_rows() -> anyhow::Result<()> {
        let catalog = ModelCatalog::from_listing(&listing())?;
        assert_eq!(catalog.len(), 3);
        let ids: Vec<&str> = catalog.list().map(|model| model.id()).collect();
        assert_eq!(
            ids,
            vec![
                "gemini-2.5-flash",
                "gemini-2.5-flash-image-preview",
                "imagen-4.0-generate-001"
            ]
        );
        Ok(())
    }

    #[test]
    fn null_fields_read_as_empty() -> anyhow::Result<()> {
        let catalog = ModelCatalog::from_listing(&json!({
            "models": [
                {
                    "name": "models/gemini-2.5-flash-image",
                    "displayName": null,
                    "description": null,
                    "supportedGenerationMethods": null
                },
                {"name": "models/gemini-2.5-pro", "displayName": "Gemini 2.5 Pro"}
            ]
        }))?;
        assert_eq!(catalog.len(), 2);
        let first = catalog.list().next().map(|model| {
            (
                model.display_name.clone(),
                model.description.clone(),
                model.supported_generation_methods.len(),
            )
        });
        assert_eq!(first, Some((String::new(), String::new(), 0)));
        assert_eq!(
            catalog.listing_lines(2),
            vec![
                "- models/gemini-2.5-flash-image ()".to_string(),
                "- models/gemini-2.5-pro (Gemini 2.5 Pro)".to_string(),
            ]
        );
        Ok(())
    }

    #[test]
    fn image_capable_filters_by_name() -> anyhow::Result<()> {
        let catalog = ModelCatalog::from_listing(&listing())?;
        let ids: Vec<&str> = catalog.image_capable().iter().map(|m| m.id()).collect();
        assert_eq!(
            ids,
            vec!["gemini-2.5-flash-image-preview", "imagen-4.0-generate-001"]
        );
        Ok(())
    }

    #[test]
    fn listing_lines_respect_limit() -> anyhow::Result<()> {
        let catalog = ModelCatalog::from_listing(&listing())?;
        assert_eq!(
            catalog.listing_lines(1),
            vec!["- models/gemini-2.5-flash (Gemini 2.5 Flash)".to_string()]
        );
        assert!(ModelCatalog::from_listing(&json!({}))?.is_empty());
        Ok(())
    }
}
