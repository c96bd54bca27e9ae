pub mod association;
pub mod config;
pub mod domain;
pub mod errors;
pub mod filter;
pub mod import;
pub mod normalizer;

pub use association::{
    AmbiguousMatch, AssociationOutcome, AssociationResolver, CatalogSnapshot, OverlapScore,
};
pub use domain::product::{Product, ProductAttribute, ProductDraft, ProductId};
pub use domain::provider::{
    AssociationStrategy, DataProviderAttribute, DataProviderProduct, ProviderKey,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use filter::{
    AttributeFilter, AttributeFilterRequest, FilterEngine, FilterOperator, ProductFilter,
    ProductFilterRequest, QueryError,
};
pub use import::{ImportResult, ImportTally, RecordError, RecordErrorKind, RecordOutcome};
pub use normalizer::{NormalizationError, NormalizedRecord, Normalizer};
