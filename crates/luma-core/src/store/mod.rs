pub mod entity_store;
pub mod link_graph;
pub mod views;

pub use entity_store::{EntityStore, Invalidation, StoreError};
pub use link_graph::LinkGraph;
