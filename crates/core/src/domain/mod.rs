pub mod product;
pub mod provider;
