//! Infrastructure adapters: action persistence and status notification.

pub mod notify;
pub mod store;

pub use notify::{ConnectionContext, InMemoryConnection, StatusPublisher};
pub use store::{ActionStore, InMemoryActionStore, RemoveUnscheduledAction, StoreCommand};
