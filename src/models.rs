//! Core data models shared across the pipeline.
//!
//! The category tree mirrors the provider's JSON configuration file; the
//! request types mirror the provider's download endpoint body.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider-assigned identifier of one time series.
///
/// Usually an integer, but the category file is not guaranteed to use
/// numbers, so textual ids pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModuleId {
    Number(i64),
    Text(String),
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleId::Number(n) => write!(f, "{}", n),
            ModuleId::Text(s) => f.write_str(s),
        }
    }
}

/// Root of the category configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CategoryTree {
    #[serde(default)]
    pub main: Vec<MainCategory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MainCategory {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sub: Vec<SubCategory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubCategory {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub module: ModuleBuckets,
}

/// The two module lists of a sub category.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleBuckets {
    #[serde(default)]
    pub default: Vec<Module>,
    #[serde(default)]
    pub other: Vec<Module>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    #[serde(default)]
    pub region: Vec<String>,
}

impl Module {
    pub fn serves(&self, region: &str) -> bool {
        self.region.iter().any(|r| r == region)
    }
}

/// One entry of the provider's `request_form` list.
///
/// Keys present in the settings template but unknown here are carried along
/// in `extra` so the provider still receives them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestForm {
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(rename = "moduleIds", default)]
    pub module_ids: Vec<ModuleId>,
    pub region: String,
    #[serde(default)]
    pub timestamp_from: i64,
    #[serde(default)]
    pub timestamp_to: i64,
    #[serde(rename = "type", default = "default_type")]
    pub kind: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub resolution: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_format() -> String {
    "CSV".to_string()
}
fn default_type() -> String {
    "discrete".to_string()
}
fn default_language() -> String {
    "de".to_string()
}

/// Wire body of the download request: a one-element `request_form` list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestPayload {
    request_form: [RequestForm; 1],
}

impl RequestPayload {
    pub fn new(form: RequestForm) -> Self {
        Self {
            request_form: [form],
        }
    }

    pub fn form(&self) -> &RequestForm {
        &self.request_form[0]
    }
}

/// What a completed warehouse load reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub job_id: String,
    pub rows_loaded: u64,
}

/// Whether an idempotent create call made something new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Created,
    AlreadyPresent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_module_id_untagged() {
        let ids: Vec<ModuleId> = serde_json::from_value(json!([1, "x7"])).unwrap();
        assert_eq!(ids[0], ModuleId::Number(1));
        assert_eq!(ids[1], ModuleId::Text("x7".into()));
        assert_eq!(serde_json::to_value(&ids).unwrap(), json!([1, "x7"]));
    }

    #[test]
    fn test_payload_wire_shape() {
        let form = RequestForm {
            format: "CSV".into(),
            module_ids: vec![ModuleId::Number(1), ModuleId::Number(2)],
            region: "DE-LU".into(),
            timestamp_from: 1,
            timestamp_to: 2,
            kind: "discrete".into(),
            language: "de".into(),
            resolution: String::new(),
            extra: Default::default(),
        };
        let wire = serde_json::to_value(RequestPayload::new(form)).unwrap();
        assert_eq!(
            wire,
            json!({"request_form": [{
                "format": "CSV",
                "moduleIds": [1, 2],
                "region": "DE-LU",
                "timestamp_from": 1,
                "timestamp_to": 2,
                "type": "discrete",
                "language": "de",
                "resolution": ""
            }]})
        );
    }
}
