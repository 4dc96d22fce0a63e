pub mod hub;

pub use hub::{ThreadEventHub, ThreadSubscription};
