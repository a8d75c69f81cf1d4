//! orches core library: configuration, unit model and catalog.
//!
//! - [`config`]: [`Config`] resolved once per process
//! - [`unit`]: [`Unit`] and the closed [`UnitKind`] table
//! - [`catalog`]: [`build_catalog`] over one snapshot directory
//! - [`error`]: [`CatalogError`], [`ConfigError`]

pub mod catalog;
pub mod config;
pub mod error;
pub mod unit;

pub use catalog::{build_catalog, Catalog};
pub use config::{Config, ExecutionContext, UnitDirs, DEFAULT_SELF_UNIT};
pub use error::{CatalogError, ConfigError};
pub use unit::{Unit, UnitKind};
