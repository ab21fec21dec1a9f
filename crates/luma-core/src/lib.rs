pub mod config;
pub mod constants;
pub mod database;
pub mod identity;
pub mod models;
pub mod pagination;
pub mod runtime;
pub mod source;
pub mod store;
pub mod subscription;
pub mod sync;
pub mod tracing_setup;
pub mod transaction;

pub use config::CoreConfig;
pub use database::{Database, SubscriptionHandle};
pub use runtime::{CoreHandle, CoreRuntime};
pub use store::views;
