pub mod engine;
pub mod query;
pub mod result;

pub use engine::{Notification, SubscriptionCallback, SubscriptionEngine, SubscriptionId};
pub use query::{Filter, QueryError, QueryShape, Relation};
pub use result::{ImageNode, InteractionNode, QueryResult, QuerySnapshot, QueryStatus};
