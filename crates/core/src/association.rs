//! Decides which internal product, if any, a normalized provider record
//! belongs to.
//!
//! Strategies run in fixed precedence and the first decisive one wins:
//! exact GTID match, then attribute-set overlap. Ambiguity at either step is
//! returned as [`AmbiguousMatch`] and never broken arbitrarily.
//!
//! Attributes an import writes back onto products (see
//! [`CatalogSnapshot::ignoring`]) take no part in overlap scoring on either
//! side, so enrichment can never move an association.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;

use crate::domain::product::{canonical_name, normalize_gtid, Product, ProductId};
use crate::domain::provider::AssociationStrategy;
use crate::normalizer::NormalizedRecord;

pub const DEFAULT_ATTRIBUTE_THRESHOLD: f64 = 0.8;

type AttributePair = (String, String);

/// Read-only view of the catalog taken once per import batch.
#[derive(Clone, Debug, Default)]
pub struct CatalogSnapshot {
    products: Vec<Product>,
    by_gtid: HashMap<String, Vec<usize>>,
    pairs: Vec<HashSet<AttributePair>>,
    ignored: HashSet<String>,
}

impl CatalogSnapshot {
    pub fn new(products: Vec<Product>) -> Self {
        Self::ignoring(products, std::iter::empty::<String>())
    }

    /// Builds a snapshot whose overlap scoring skips the given attribute
    /// names, compared case-insensitively. Records scored against it skip
    /// the same names.
    pub fn ignoring<I, S>(products: Vec<Product>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ignored: HashSet<String> =
            names.into_iter().map(|name| canonical_name(name.as_ref())).collect();
        let mut by_gtid: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, product) in products.iter().enumerate() {
            if let Some(gtid) = product.gtid() {
                by_gtid.entry(gtid.to_string()).or_default().push(index);
            }
        }
        let pairs = products
            .iter()
            .map(|product| {
                pair_set(
                    product.attributes.iter().map(|a| (a.name.as_str(), a.value.as_str())),
                    &ignored,
                )
            })
            .collect();

        Self { products, by_gtid, pairs, ignored }
    }

    pub fn products(&self) -> &[Product] {
        &self.products
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    fn with_gtid(&self, gtid: &str) -> &[usize] {
        self.by_gtid.get(gtid).map(Vec::as_slice).unwrap_or_default()
    }

    fn ids(&self, indexes: &[usize]) -> Vec<ProductId> {
        indexes.iter().map(|index| self.products[*index].id.clone()).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssociationOutcome {
    Associated { product_id: ProductId, strategy: AssociationStrategy },
    Unassociated,
}

impl AssociationOutcome {
    pub fn product_id(&self) -> Option<&ProductId> {
        match self {
            Self::Associated { product_id, .. } => Some(product_id),
            Self::Unassociated => None,
        }
    }

    pub fn strategy(&self) -> Option<AssociationStrategy> {
        match self {
            Self::Associated { strategy, .. } => Some(*strategy),
            Self::Unassociated => None,
        }
    }
}

/// Fraction of shared `(name, value)` pairs over the union of both sets.
#[derive(Clone, Copy, Debug)]
pub struct OverlapScore {
    pub matched: usize,
    pub union: usize,
}

impl OverlapScore {
    fn between(left: &HashSet<AttributePair>, right: &HashSet<AttributePair>) -> Option<Self> {
        if left.is_empty() || right.is_empty() {
            return None;
        }
        let matched = left.intersection(right).count();
        let union = left.len() + right.len() - matched;
        Some(Self { matched, union })
    }

    pub fn ratio(&self) -> f64 {
        self.matched as f64 / self.union as f64
    }

    fn meets(&self, threshold: f64) -> bool {
        self.matched > 0 && self.ratio() >= threshold
    }
}

impl PartialEq for OverlapScore {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OverlapScore {}

impl PartialOrd for OverlapScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OverlapScore {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.matched * other.union).cmp(&(other.matched * self.union))
    }
}

impl fmt::Display for OverlapScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.matched, self.union)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AmbiguousMatch {
    #[error("ambiguous gtid match: gtid `{gtid}` is shared by internal products {}", join_ids(.candidates))]
    Gtid { gtid: String, candidates: Vec<ProductId> },
    #[error("ambiguous attribute match: internal products {} tie at overlap {score}", join_ids(.candidates))]
    Attributes { score: OverlapScore, candidates: Vec<ProductId> },
}

impl AmbiguousMatch {
    pub fn candidates(&self) -> &[ProductId] {
        match self {
            Self::Gtid { candidates, .. } | Self::Attributes { candidates, .. } => candidates,
        }
    }
}

fn join_ids(ids: &[ProductId]) -> String {
    ids.iter().map(ProductId::as_str).collect::<Vec<_>>().join(", ")
}

#[derive(Clone, Debug)]
pub struct AssociationResolver {
    attribute_threshold: f64,
}

impl Default for AssociationResolver {
    fn default() -> Self {
        Self { attribute_threshold: DEFAULT_ATTRIBUTE_THRESHOLD }
    }
}

impl AssociationResolver {
    pub fn new(attribute_threshold: f64) -> Self {
        Self { attribute_threshold }
    }

    pub fn attribute_threshold(&self) -> f64 {
        self.attribute_threshold
    }

    pub fn resolve(
        &self,
        record: &NormalizedRecord,
        catalog: &CatalogSnapshot,
    ) -> Result<AssociationOutcome, AmbiguousMatch> {
        if let Some(gtid) = normalize_gtid(record.gtid.as_deref()) {
            match catalog.with_gtid(gtid) {
                [] => {}
                [single] => {
                    return Ok(AssociationOutcome::Associated {
                        product_id: catalog.products[*single].id.clone(),
                        strategy: AssociationStrategy::GtidExact,
                    });
                }
                many => {
                    return Err(AmbiguousMatch::Gtid {
                        gtid: gtid.to_string(),
                        candidates: catalog.ids(many),
                    });
                }
            }
        }

        self.match_attributes(record, catalog)
    }

    fn match_attributes(
        &self,
        record: &NormalizedRecord,
        catalog: &CatalogSnapshot,
    ) -> Result<AssociationOutcome, AmbiguousMatch> {
        let record_pairs = pair_set(
            record.attributes.iter().map(|a| (a.name.as_str(), a.value.as_str())),
            &catalog.ignored,
        );
        if record_pairs.is_empty() {
            return Ok(AssociationOutcome::Unassociated);
        }
        let record_gtid = normalize_gtid(record.gtid.as_deref());

        let mut best: Option<OverlapScore> = None;
        let mut leaders: Vec<usize> = Vec::new();
        for (index, product) in catalog.products.iter().enumerate() {
            if let (Some(ours), Some(theirs)) = (record_gtid, product.gtid()) {
                if ours != theirs {
                    continue;
                }
            }
            let Some(score) = OverlapScore::between(&record_pairs, &catalog.pairs[index]) else {
                continue;
            };
            if !score.meets(self.attribute_threshold) {
                continue;
            }
            match best.map(|current| score.cmp(&current)) {
                None | Some(Ordering::Greater) => {
                    best = Some(score);
                    leaders.clear();
                    leaders.push(index);
                }
                Some(Ordering::Equal) => leaders.push(index),
                Some(Ordering::Less) => {}
            }
        }

        match (leaders.as_slice(), best) {
            ([single], _) => Ok(AssociationOutcome::Associated {
                product_id: catalog.products[*single].id.clone(),
                strategy: AssociationStrategy::AttributeMatch,
            }),
            ([_, _, ..], Some(score)) => {
                Err(AmbiguousMatch::Attributes { score, candidates: catalog.ids(&leaders) })
            }
            _ => Ok(AssociationOutcome::Unassociated),
        }
    }
}

fn pair_set<'a>(
    pairs: impl Iterator<Item = (&'a str, &'a str)>,
    ignored: &HashSet<String>,
) -> HashSet<AttributePair> {
    pairs
        .map(|(name, value)| (canonical_name(name), value.trim().to_string()))
        .filter(|(name, _)| !ignored.contains(name))
        .collect()
}
