use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::product::{canonical_name, ProductId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderKey {
    pub data_provider_id: String,
    pub external_id: String,
}

impl ProviderKey {
    pub fn new(data_provider_id: impl Into<String>, external_id: impl Into<String>) -> Self {
        Self { data_provider_id: data_provider_id.into(), external_id: external_id.into() }
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.data_provider_id, self.external_id)
    }
}

/// Rule that linked a provider record to an internal product.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssociationStrategy {
    #[serde(rename = "gtid-exact")]
    GtidExact,
    #[serde(rename = "attribute-match")]
    AttributeMatch,
}

impl AssociationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GtidExact => "gtid-exact",
            Self::AttributeMatch => "attribute-match",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "gtid-exact" => Some(Self::GtidExact),
            "attribute-match" => Some(Self::AttributeMatch),
            _ => None,
        }
    }
}

impl fmt::Display for AssociationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute as received from the provider. `name` keeps the provider's
/// spelling; comparisons go through [`DataProviderAttribute::key`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataProviderAttribute {
    pub name: String,
    pub value: String,
}

impl DataProviderAttribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    pub fn key(&self) -> String {
        canonical_name(&self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataProviderProduct {
    pub data_provider_id: String,
    pub external_id: String,
    pub global_trade_identifier: Option<String>,
    pub imported_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub association_strategy: Option<AssociationStrategy>,
    /// Non-owning link; resolve through the product repository.
    pub associated_product_id: Option<ProductId>,
    pub attributes: Vec<DataProviderAttribute>,
    #[serde(skip)]
    pub version: i64,
}

impl DataProviderProduct {
    pub fn key(&self) -> ProviderKey {
        ProviderKey::new(self.data_provider_id.clone(), self.external_id.clone())
    }

    pub fn is_associated(&self) -> bool {
        self.associated_product_id.is_some()
    }

    /// Drops the link to a product that no longer exists.
    pub fn clear_association(&mut self) {
        self.associated_product_id = None;
        self.association_strategy = None;
    }
}
