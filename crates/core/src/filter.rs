//! Structured attribute filters over the internal catalog.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::product::{canonical_name, normalize_gtid, Product, ProductAttribute};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterOperator {
    Eq,
    Contains,
    Gt,
    Lt,
    Exists,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "EQ",
            Self::Contains => "CONTAINS",
            Self::Gt => "GT",
            Self::Lt => "LT",
            Self::Exists => "EXISTS",
        }
    }

    fn needs_value(&self) -> bool {
        !matches!(self, Self::Exists)
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Self::Gt | Self::Lt)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOperator {
    type Err = QueryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "EQ" => Ok(Self::Eq),
            "CONTAINS" => Ok(Self::Contains),
            "GT" => Ok(Self::Gt),
            "LT" => Ok(Self::Lt),
            "EXISTS" => Ok(Self::Exists),
            _ => Err(QueryError::UnknownOperator(value.to_string())),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("unknown filter operator `{0}` (expected EQ|CONTAINS|GT|LT|EXISTS)")]
    UnknownOperator(String),
    #[error("attribute filter #{index} has no attribute name")]
    MissingAttributeName { index: usize },
    #[error("attribute filter #{index} ({operator}) requires an attribute value")]
    MissingAttributeValue { index: usize, operator: FilterOperator },
    #[error("attribute filter #{index} ({operator}) needs a numeric value, got `{value}`")]
    NonNumericValue { index: usize, operator: FilterOperator, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Criterion {
    Equals(String),
    Contains(String),
    GreaterThan(Number),
    LessThan(Number),
    Exists,
}

/// A validated attribute clause. Build it through [`ProductFilterRequest`] or
/// [`AttributeFilter::new`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeFilter {
    attribute_name: String,
    key: String,
    criterion: Criterion,
}

impl AttributeFilter {
    pub fn new(
        attribute_name: impl Into<String>,
        attribute_value: impl Into<String>,
        operator: FilterOperator,
    ) -> Result<Self, QueryError> {
        AttributeFilterRequest {
            attribute_name: Some(attribute_name.into()),
            attribute_value: Some(attribute_value.into()),
            operator: operator.as_str().to_string(),
        }
        .validate(0)
    }

    pub fn attribute_name(&self) -> &str {
        &self.attribute_name
    }

    pub fn operator(&self) -> FilterOperator {
        match self.criterion {
            Criterion::Equals(_) => FilterOperator::Eq,
            Criterion::Contains(_) => FilterOperator::Contains,
            Criterion::GreaterThan(_) => FilterOperator::Gt,
            Criterion::LessThan(_) => FilterOperator::Lt,
            Criterion::Exists => FilterOperator::Exists,
        }
    }

    fn accepts(&self, attribute: &ProductAttribute) -> bool {
        if attribute.key() != self.key {
            return false;
        }
        match &self.criterion {
            Criterion::Equals(expected) => attribute.value == *expected,
            Criterion::Contains(needle) => attribute.value.contains(needle.as_str()),
            Criterion::GreaterThan(bound) => Number::parse(&attribute.value).is_some_and(|v| v > *bound),
            Criterion::LessThan(bound) => Number::parse(&attribute.value).is_some_and(|v| v < *bound),
            Criterion::Exists => true,
        }
    }

    /// Any one attribute with the right name satisfying the clause suffices.
    pub fn matches(&self, product: &Product) -> bool {
        product.attributes.iter().any(|attribute| self.accepts(attribute))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProductFilter {
    pub global_trade_identifier: Option<String>,
    pub attribute_filters: Vec<AttributeFilter>,
}

impl ProductFilter {
    pub fn is_empty(&self) -> bool {
        self.global_trade_identifier.is_none() && self.attribute_filters.is_empty()
    }

    pub fn matches(&self, product: &Product) -> bool {
        if let Some(gtid) = self.global_trade_identifier.as_deref() {
            if product.gtid() != Some(gtid) {
                return false;
            }
        }
        self.attribute_filters.iter().all(|clause| clause.matches(product))
    }
}

/// Wire shape of a filter; operator names stay strings until validated.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductFilterRequest {
    #[serde(default)]
    pub global_trade_identifier: Option<String>,
    #[serde(default)]
    pub attribute_filters: Vec<AttributeFilterRequest>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeFilterRequest {
    #[serde(default)]
    pub attribute_name: Option<String>,
    #[serde(default)]
    pub attribute_value: Option<String>,
    pub operator: String,
}

impl AttributeFilterRequest {
    fn validate(self, index: usize) -> Result<AttributeFilter, QueryError> {
        let operator: FilterOperator = self.operator.parse()?;
        let attribute_name = self
            .attribute_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or(QueryError::MissingAttributeName { index })?;

        let criterion = if operator.needs_value() {
            let value = self
                .attribute_value
                .filter(|value| !value.is_empty())
                .ok_or(QueryError::MissingAttributeValue { index, operator })?;
            if operator.is_numeric() {
                let bound = Number::parse(&value)
                    .ok_or(QueryError::NonNumericValue { index, operator, value })?;
                if operator == FilterOperator::Gt {
                    Criterion::GreaterThan(bound)
                } else {
                    Criterion::LessThan(bound)
                }
            } else if operator == FilterOperator::Eq {
                Criterion::Equals(value)
            } else {
                Criterion::Contains(value)
            }
        } else {
            Criterion::Exists
        };

        Ok(AttributeFilter { key: canonical_name(&attribute_name), attribute_name, criterion })
    }
}

impl TryFrom<ProductFilterRequest> for ProductFilter {
    type Error = QueryError;

    fn try_from(request: ProductFilterRequest) -> Result<Self, Self::Error> {
        let attribute_filters = request
            .attribute_filters
            .into_iter()
            .enumerate()
            .map(|(index, clause)| clause.validate(index))
            .collect::<Result<Vec<_>, _>>()?;
        let global_trade_identifier =
            normalize_gtid(request.global_trade_identifier.as_deref()).map(str::to_string);

        Ok(Self { global_trade_identifier, attribute_filters })
    }
}

/// A plain signed decimal or scientific literal. Values beyond `Decimal`
/// range compare through their `f64` approximation instead of being dropped.
#[derive(Clone, Copy, Debug)]
struct Number {
    exact: Option<Decimal>,
    approx: f64,
}

impl Number {
    fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if !is_numeric_literal(trimmed) {
            return None;
        }
        let approx = trimmed.parse::<f64>().ok()?;
        let exact =
            Decimal::from_str(trimmed).ok().or_else(|| Decimal::from_scientific(trimmed).ok());
        Some(Self { exact, approx })
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

// `approx` comes from a validated literal, so it is never NaN.
impl Eq for Number {}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.exact, other.exact) {
            (Some(left), Some(right)) => Some(left.cmp(&right)),
            _ => self.approx.partial_cmp(&other.approx),
        }
    }
}

fn is_numeric_literal(raw: &str) -> bool {
    let digits = |part: &str| part.bytes().all(|byte| byte.is_ascii_digit());
    let unsigned = raw.strip_prefix(['+', '-']).unwrap_or(raw);
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(at) => (&unsigned[..at], Some(&unsigned[at + 1..])),
        None => (unsigned, None),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let mantissa_ok =
        !(whole.is_empty() && fraction.is_empty()) && digits(whole) && digits(fraction);
    let exponent_ok = exponent.map_or(true, |exponent| {
        let exponent = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
        !exponent.is_empty() && digits(exponent)
    });
    mantissa_ok && exponent_ok
}

/// Evaluates filters against a catalog view without reordering it.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilterEngine;

impl FilterEngine {
    pub fn apply<'a>(&self, filter: &ProductFilter, catalog: &'a [Product]) -> Vec<&'a Product> {
        catalog.iter().filter(|product| filter.matches(product)).collect()
    }
}
