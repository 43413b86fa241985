#[cfg(test)]
#[path = "provider_test.rs"]
mod tests;

use std::collections::HashSet;
use std::fmt;

use anyhow::bail;
use anyhow::Result;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use serde_json::Value;

/// Providers tried in order when picking a default model. Google tends to lack
/// credentials out of the box, so it goes last.
pub const PREFERRED_PROVIDER_ORDER: [&str; 6] = [
    "anthropic",
    "openai",
    "openrouter",
    "azure",
    "aws-bedrock",
    "google",
];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ModelOptions>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub models: Vec<Model>,
}

fn parse_models(data: Option<&Value>) -> Vec<Model> {
    let entries: Vec<&Value> = match data {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Object(obj)) => obj.values().collect(),
        _ => vec![],
    };

    return entries
        .into_iter()
        .filter_map(|entry| return serde_json::from_value::<Model>(entry.clone()).ok())
        .collect();
}

fn parse_provider(data: &Value) -> Option<Provider> {
    let obj = data.as_object()?;
    let id = obj.get("id")?.as_str()?.to_string();
    let name = obj
        .get("name")
        .and_then(|val| return val.as_str())
        .unwrap_or_default()
        .to_string();

    return Some(Provider {
        id,
        name,
        models: parse_models(obj.get("models")),
    });
}

impl Provider {
    /// Normalizes the `/provider` payload. Either a plain array of providers,
    /// or `{ all, connected }` where only connected providers are usable.
    pub fn list_from_value(data: &Value) -> Vec<Provider> {
        if let Value::Array(items) = data {
            return items.iter().filter_map(parse_provider).collect();
        }

        let all = match data.get("all") {
            Some(Value::Array(items)) => items,
            _ => return vec![],
        };

        let providers = all.iter().filter_map(parse_provider);
        if let Some(Value::Array(connected)) = data.get("connected") {
            let connected_ids = connected
                .iter()
                .filter_map(|val| return val.as_str())
                .collect::<HashSet<&str>>();

            return providers
                .filter(|provider| return connected_ids.contains(provider.id.as_str()))
                .collect();
        }

        return providers.collect();
    }
}

/// A provider/model pair, serialized the way the server expects it inside
/// message requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    #[serde(rename = "providerID", default)]
    pub provider_id: String,
    #[serde(rename = "modelID", default)]
    pub model_id: String,
}

impl fmt::Display for ModelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "{}/{}", self.provider_id, self.model_id);
    }
}

impl ModelSelection {
    pub fn new(provider_id: &str, model_id: &str) -> ModelSelection {
        return ModelSelection {
            provider_id: provider_id.to_string(),
            model_id: model_id.to_string(),
        };
    }

    /// Parses `provider/model`. Model ids may contain slashes themselves, so
    /// only the first one separates.
    pub fn parse(text: &str) -> Result<ModelSelection> {
        if let Some((provider_id, model_id)) = text.trim().split_once('/') {
            if !provider_id.is_empty() && !model_id.is_empty() {
                return Ok(ModelSelection::new(provider_id, model_id));
            }
        }

        bail!(format!(
            "Invalid model '{text}', expected the format provider/model"
        ));
    }

    pub fn is_empty(&self) -> bool {
        return self.provider_id.is_empty() || self.model_id.is_empty();
    }

    pub fn is_available(&self, providers: &[Provider]) -> bool {
        return providers.iter().any(|provider| {
            return provider.id == self.provider_id
                && provider
                    .models
                    .iter()
                    .any(|model| return model.id == self.model_id);
        });
    }

    /// Picks the first model of the most preferred provider that has any
    /// models, falling back to the first provider with models.
    pub fn pick_default(providers: &[Provider]) -> Option<ModelSelection> {
        for preferred in PREFERRED_PROVIDER_ORDER {
            let found = providers.iter().find(|provider| {
                return provider
                    .id
                    .to_lowercase()
                    .contains(&preferred.to_lowercase());
            });

            if let Some(provider) = found {
                if let Some(model) = provider.models.first() {
                    return Some(ModelSelection::new(&provider.id, &model.id));
                }
            }
        }

        return providers.iter().find_map(|provider| {
            return provider
                .models
                .first()
                .map(|model| return ModelSelection::new(&provider.id, &model.id));
        });
    }
}
