//! # nimbus-core
//!
//! Types shared by every Nimbus crate:
//!
//! - the request model handed over by the intent parser ([`OperationRequest`]),
//! - the classification and safety enums ([`OperationType`], [`SafetyMode`]),
//! - resource identity for the dependency graph ([`ResourceRef`]),
//! - configuration loading ([`config::NimbusConfig`]),
//! - the operation catalog adapter ([`catalog::OperationCatalog`]),
//! - the alias lookup seam ([`alias::AliasResolver`]).

pub mod alias;
pub mod catalog;
pub mod config;
pub mod error;
pub mod request;
pub mod resource;

pub use alias::{AliasResolver, InMemoryAliasStore};
pub use catalog::{
    CachedCatalog, CatalogError, DocumentCatalog, OperationCatalog, OperationDescription,
    PaginationSpec, ParamSpec, ParamType, ServiceModelCatalog,
};
pub use config::NimbusConfig;
pub use error::{ConfigError, CoreError};
pub use request::{
    AccountRef, OperationRequest, OperationType, Parameters, SafetyMode, to_snake_case,
};
pub use resource::ResourceRef;
