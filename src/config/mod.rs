//! Hub configuration and its persistent store

mod schema;
mod store;

pub use schema::{AudioConfig, HubConfig, PermissionConfig, VideoConfig};
pub use store::{ConfigChange, ConfigStore};
