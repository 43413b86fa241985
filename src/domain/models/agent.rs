#[cfg(test)]
#[path = "agent_test.rs"]
mod tests;

use serde_derive::Deserialize;
use serde_derive::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn value_str(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    return obj
        .get(key)
        .and_then(|val| return val.as_str())
        .filter(|val| return !val.is_empty())
        .map(|val| return val.to_string());
}

impl Agent {
    fn from_object(obj: &serde_json::Map<String, Value>) -> Option<Agent> {
        if obj.get("hidden").and_then(|val| return val.as_bool()) == Some(true) {
            return None;
        }

        // Agents are identified by name, older servers also send an id.
        let name = value_str(obj, "name").unwrap_or_default();
        let id = value_str(obj, "id").unwrap_or_else(|| return name.to_string());
        if id.is_empty() {
            return None;
        }

        return Some(Agent {
            id,
            name,
            description: value_str(obj, "description"),
        });
    }

    /// Normalizes the `/agent` payload. Depending on the server version it is
    /// an array, `{ agents: [...] }`, a single agent, or a map of agents.
    pub fn list_from_value(data: &Value) -> Vec<Agent> {
        let entries: Vec<&Value> = match data {
            Value::Array(items) => items.iter().collect(),
            Value::Object(obj) => {
                if let Some(Value::Array(items)) = obj.get("agents") {
                    items.iter().collect()
                } else if obj.contains_key("name") {
                    vec![data]
                } else {
                    obj.values().filter(|val| return val.is_object()).collect()
                }
            }
            _ => vec![],
        };

        return entries
            .into_iter()
            .filter_map(|entry| return entry.as_object().and_then(Agent::from_object))
            .collect();
    }
}
