use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProductId(pub String);

impl ProductId {
    /// Allocates a fresh system-assigned id. Ids are never recycled.
    pub fn generate() -> Self {
        Self(format!("PRD-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAttribute {
    pub name: String,
    pub value: String,
}

impl ProductAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    /// Comparison key for the attribute name.
    pub fn key(&self) -> String {
        canonical_name(&self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(rename = "internalId")]
    pub id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_trade_identifier: Option<String>,
    #[serde(default)]
    pub attributes: Vec<ProductAttribute>,
}

impl Product {
    pub fn new(id: impl Into<ProductId>) -> Self {
        Self { id: id.into(), global_trade_identifier: None, attributes: Vec::new() }
    }

    pub fn with_gtid(mut self, gtid: impl Into<String>) -> Self {
        self.global_trade_identifier = Some(gtid.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(ProductAttribute::new(name, value));
        self
    }

    /// GTID with surrounding whitespace removed; blank identifiers read as absent.
    pub fn gtid(&self) -> Option<&str> {
        normalize_gtid(self.global_trade_identifier.as_deref())
    }

    pub fn attributes_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a ProductAttribute> + 'a {
        let key = canonical_name(name);
        self.attributes.iter().filter(move |attribute| attribute.key() == key)
    }

    /// Case-insensitive substring search over id, GTID and attribute values.
    /// A blank term matches every product.
    pub fn mentions(&self, term: &str) -> bool {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }

        let hit = |haystack: &str| haystack.to_lowercase().contains(&needle);
        hit(self.id.as_str())
            || self.global_trade_identifier.as_deref().is_some_and(hit)
            || self.attributes.iter().any(|attribute| hit(&attribute.value))
    }

    /// Replaces the first attribute with a matching name, or appends one.
    /// Returns `false` when the product already carried exactly that value.
    pub fn set_attribute(&mut self, name: &str, value: &str) -> bool {
        let key = canonical_name(name);
        match self.attributes.iter_mut().find(|attribute| attribute.key() == key) {
            Some(existing) if existing.value == value => false,
            Some(existing) => {
                existing.value = value.to_string();
                true
            }
            None => {
                self.attributes.push(ProductAttribute::new(name, value));
                true
            }
        }
    }
}

/// Body of a create/update request: everything but the system-assigned id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDraft {
    #[serde(default)]
    pub global_trade_identifier: Option<String>,
    #[serde(default)]
    pub attributes: Vec<ProductAttribute>,
}

impl ProductDraft {
    pub fn into_product(self, id: ProductId) -> Product {
        let global_trade_identifier =
            normalize_gtid(self.global_trade_identifier.as_deref()).map(str::to_string);
        Product { id, global_trade_identifier, attributes: self.attributes }
    }
}

pub fn canonical_name(name: &str) -> String {
    name.trim().to_lowercase()
}

pub fn normalize_gtid(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{Product, ProductDraft, ProductId};

    #[test]
    fn product_serializes_with_camel_case_wire_names() {
        let product = Product::new("P1").with_gtid("X1").with_attribute("weight", "12");
        let json = serde_json::to_value(&product).expect("serialize");

        assert_eq!(json["internalId"], "P1");
        assert_eq!(json["globalTradeIdentifier"], "X1");
        assert_eq!(json["attributes"][0]["name"], "weight");
        assert_eq!(json["attributes"][0]["value"], "12");
    }

    #[test]
    fn blank_gtid_reads_as_absent() {
        let product = Product::new("P1").with_gtid("   ");
        assert_eq!(product.gtid(), None);

        let draft = ProductDraft {
            global_trade_identifier: Some(" ".to_string()),
            attributes: Vec::new(),
        };
        assert_eq!(draft.into_product(ProductId::from("P2")).global_trade_identifier, None);
    }

    #[test]
    fn set_attribute_replaces_by_canonical_name_and_reports_changes() {
        let mut product = Product::new("P1").with_attribute("Category", "tools");

        assert!(!product.set_attribute("category", "tools"));
        assert!(product.set_attribute(" CATEGORY ", "garden"));
        assert_eq!(product.attributes.len(), 1);
        assert_eq!(product.attributes[0].value, "garden");

        assert!(product.set_attribute("Brand", "Acme"));
        assert_eq!(product.attributes.len(), 2);
    }

    #[test]
    fn mentions_searches_id_gtid_and_values_case_insensitively() {
        let product = Product::new("P-42").with_gtid("0000123").with_attribute("color", "Deep Red");

        assert!(product.mentions("p-4"));
        assert!(product.mentions("0123"));
        assert!(product.mentions("deep red"));
        assert!(product.mentions("  "));
        assert!(!product.mentions("color"));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ProductId::generate(), ProductId::generate());
        assert!(ProductId::generate().as_str().starts_with("PRD-"));
    }
}
