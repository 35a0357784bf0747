//! Publication-specific transforms and tasks built on the resource layer.

pub mod affiliation;
pub mod handles;
pub mod resource;

pub use affiliation::{AffiliationMigration, AffiliationScope, AffiliationTask};
pub use handles::{HandleImportTask, HandleLocation, HandleReference, HandleTaskPlanner};
pub use resource::Resource;
