//! Maps raw provider records onto [`NormalizedRecord`].
//!
//! The provider's field naming is only known here. Record keys are matched
//! loosely (case, `_`, `-` and whitespace are ignored). Attributes given as
//! an array keep their arrival order, duplicates included. Attributes given
//! as an object come out sorted by name, which is the order `serde_json`
//! stores object keys in.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::provider::{DataProviderAttribute, ProviderKey};

const EXTERNAL_ID_FIELDS: &[&str] = &["externalid", "internalid"];
const GTID_FIELDS: &[&str] = &["globaltradeidentifier", "gtin", "gtid"];
const PROVIDER_ID_FIELDS: &[&str] = &["dataproviderid", "providerid"];
const ATTRIBUTES_FIELD: &str = "attributes";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("missing external id")]
    MissingExternalId,
    #[error("missing data provider id")]
    MissingProviderId,
    #[error("attribute #{index} has no usable name")]
    InvalidAttribute { index: usize },
    #[error("attributes must be an array or an object")]
    InvalidAttributes,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedRecord {
    pub provider_id: String,
    pub external_id: String,
    pub gtid: Option<String>,
    pub attributes: Vec<DataProviderAttribute>,
}

impl NormalizedRecord {
    pub fn key(&self) -> ProviderKey {
        ProviderKey::new(self.provider_id.clone(), self.external_id.clone())
    }
}

#[derive(Clone, Debug)]
pub struct Normalizer {
    default_provider_id: Option<String>,
}

impl Normalizer {
    pub fn new(default_provider_id: impl Into<String>) -> Self {
        let provider_id = default_provider_id.into();
        let trimmed = provider_id.trim();
        Self { default_provider_id: (!trimmed.is_empty()).then(|| trimmed.to_string()) }
    }

    pub fn normalize(&self, raw: &Value) -> Result<NormalizedRecord, NormalizationError> {
        let object = raw.as_object().ok_or(NormalizationError::NotAnObject)?;

        let external_id =
            scalar_field(object, EXTERNAL_ID_FIELDS).ok_or(NormalizationError::MissingExternalId)?;
        let provider_id = scalar_field(object, PROVIDER_ID_FIELDS)
            .or_else(|| self.default_provider_id.clone())
            .ok_or(NormalizationError::MissingProviderId)?;
        let gtid = scalar_field(object, GTID_FIELDS);
        let attributes = match field(object, &[ATTRIBUTES_FIELD]) {
            None | Some(Value::Null) => Vec::new(),
            Some(value) => attributes(value)?,
        };

        Ok(NormalizedRecord { provider_id, external_id, gtid, attributes })
    }
}

fn field_key(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '_' && *ch != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn field<'a>(object: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| {
        object.iter().find(|(key, _)| field_key(key) == *alias).map(|(_, value)| value)
    })
}

fn scalar_field(object: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    let text = match field(object, aliases)? {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn attributes(value: &Value) -> Result<Vec<DataProviderAttribute>, NormalizationError> {
    match value {
        Value::Array(entries) => entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let object =
                    entry.as_object().ok_or(NormalizationError::InvalidAttribute { index })?;
                let name = match field(object, &["name"]) {
                    Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
                    _ => return Err(NormalizationError::InvalidAttribute { index }),
                };
                let value = field(object, &["value"]).map(display_value).unwrap_or_default();
                Ok(DataProviderAttribute::new(name, value))
            })
            .collect(),
        Value::Object(map) => Ok(map
            .iter()
            .filter(|(name, _)| !name.trim().is_empty())
            .map(|(name, value)| DataProviderAttribute::new(name.trim(), display_value(value)))
            .collect()),
        _ => Err(NormalizationError::InvalidAttributes),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        nested => nested.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{NormalizationError, Normalizer};

    fn normalizer() -> Normalizer {
        Normalizer::new("JsonDataProvider")
    }

    #[test]
    fn maps_provider_fields_with_loose_key_matching() {
        let record = normalizer()
            .normalize(&json!({
                " InternalId ": "EXT-1",
                "global_trade_identifier": " 4006381333931 ",
                "Attributes": [
                    {"name": " Color ", "value": "Red"},
                    {"name": "weight", "value": 12}
                ]
            }))
            .expect("normalize");

        assert_eq!(record.provider_id, "JsonDataProvider");
        assert_eq!(record.external_id, "EXT-1");
        assert_eq!(record.gtid.as_deref(), Some("4006381333931"));
        assert_eq!(record.attributes[0].name, "Color");
        assert_eq!(record.attributes[0].key(), "color");
        assert_eq!(record.attributes[0].value, "Red");
        assert_eq!(record.attributes[1].value, "12");
    }

    #[test]
    fn duplicate_attribute_names_are_all_retained_in_order() {
        let record = normalizer()
            .normalize(&json!({
                "externalId": "EXT-2",
                "attributes": [
                    {"name": "tag", "value": "a"},
                    {"name": "TAG", "value": "b"},
                    {"name": "tag", "value": "a"}
                ]
            }))
            .expect("normalize");

        let values: Vec<&str> = record.attributes.iter().map(|a| a.value.as_str()).collect();
        assert_eq!(values, vec!["a", "b", "a"]);
    }

    #[test]
    fn object_shaped_attributes_come_out_sorted_by_name() {
        let record = normalizer()
            .normalize(&json!({
                "externalId": "EXT-3",
                "attributes": {"weight": 2, "Category": "garden", "brand": "Acme"}
            }))
            .expect("normalize");

        let names: Vec<&str> = record.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Category", "brand", "weight"]);
        assert_eq!(record.attributes[2].value, "2");
    }

    #[test]
    fn record_provider_id_wins_over_default() {
        let record = normalizer()
            .normalize(&json!({"externalId": 77, "dataProviderId": "Bmecat"}))
            .expect("normalize");

        assert_eq!(record.provider_id, "Bmecat");
        assert_eq!(record.external_id, "77");
        assert!(record.gtid.is_none());
        assert!(record.attributes.is_empty());
    }

    #[test]
    fn missing_required_fields_fail() {
        assert_eq!(
            normalizer().normalize(&json!({"gtin": "123"})),
            Err(NormalizationError::MissingExternalId)
        );
        assert_eq!(
            normalizer().normalize(&json!({"externalId": "   "})),
            Err(NormalizationError::MissingExternalId)
        );
        assert_eq!(
            Normalizer::new("  ").normalize(&json!({"externalId": "E"})),
            Err(NormalizationError::MissingProviderId)
        );
        assert_eq!(normalizer().normalize(&json!("EXT")), Err(NormalizationError::NotAnObject));
    }

    #[test]
    fn unnamed_attribute_is_rejected_with_its_position() {
        let result = normalizer().normalize(&json!({
            "externalId": "E",
            "attributes": [{"name": "ok", "value": "1"}, {"value": "orphan"}]
        }));

        assert_eq!(result, Err(NormalizationError::InvalidAttribute { index: 1 }));
    }

    #[test]
    fn object_shaped_attributes_and_odd_values_are_rendered_as_text() {
        let record = normalizer()
            .normalize(&json!({
                "externalId": "E",
                "attributes": {"organic": true, "note": null, "dims": {"w": 1}}
            }))
            .expect("normalize");

        let rendered: Vec<(String, String)> =
            record.attributes.iter().map(|a| (a.name.clone(), a.value.clone())).collect();
        assert!(rendered.contains(&("organic".to_string(), "true".to_string())));
        assert!(rendered.contains(&("note".to_string(), String::new())));
        assert!(rendered.contains(&("dims".to_string(), "{\"w\":1}".to_string())));
    }
}
