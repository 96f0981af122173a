//! Request body construction for the provider download endpoint.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::models::{ModuleId, RequestForm, RequestPayload};

/// Region named by a payload template, required before resolving ids so that
/// the resolver and the request agree on it.
pub fn template_region(template: &Map<String, Value>) -> Result<&str> {
    template
        .get("region")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::config("payload_template has no string 'region' field"))
}

/// Combine a settings template with resolved ids and a millisecond window.
///
/// The template is copied, never modified.
pub fn build(
    template: &Map<String, Value>,
    module_ids: &[ModuleId],
    window_start_ms: i64,
    window_end_ms: i64,
) -> Result<RequestPayload> {
    template_region(template)?;

    let mut object = template.clone();
    object.insert(
        "moduleIds".to_string(),
        serde_json::to_value(module_ids)
            .map_err(|e| Error::config(format!("module ids are not serializable: {}", e)))?,
    );
    object.insert("timestamp_from".to_string(), Value::from(window_start_ms));
    object.insert("timestamp_to".to_string(), Value::from(window_end_ms));

    let form: RequestForm = serde_json::from_value(Value::Object(object))
        .map_err(|e| Error::config(format!("invalid payload_template: {}", e)))?;
    Ok(RequestPayload::new(form))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> Map<String, Value> {
        json!({
            "format": "CSV",
            "region": "DE-LU",
            "type": "discrete",
            "language": "de",
            "resolution": "",
            "moduleIds": []
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn test_build_injects_ids_and_window() {
        let tpl = template();
        let payload = build(&tpl, &[ModuleId::Number(1), ModuleId::Number(4)], 100, 200).unwrap();
        let form = payload.form();
        assert_eq!(form.region, "DE-LU");
        assert_eq!(form.module_ids.len(), 2);
        assert_eq!(form.timestamp_from, 100);
        assert_eq!(form.timestamp_to, 200);
        // template untouched
        assert_eq!(tpl.get("moduleIds"), Some(&json!([])));
        assert!(tpl.get("timestamp_from").is_none());
    }

    #[test]
    fn test_missing_region_is_configuration_error() {
        let mut tpl = template();
        tpl.remove("region");
        let err = build(&tpl, &[], 0, 1).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_extra_template_keys_are_forwarded() {
        let mut tpl = template();
        tpl.insert("client".into(), json!("mingest"));
        let payload = build(&tpl, &[], 0, 1).unwrap();
        let wire = serde_json::to_value(&payload).unwrap();
        assert_eq!(wire["request_form"][0]["client"], json!("mingest"));
        assert_eq!(wire["request_form"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_ids_still_builds() {
        let payload = build(&template(), &[], 0, 1).unwrap();
        assert!(payload.form().module_ids.is_empty());
    }
}
