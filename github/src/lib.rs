//! GitHub types, webhook signature validation, and a REST client.

pub mod client;
pub mod events;
pub mod signature;

pub use client::{GitHubClient, GitHubError, RestClient};
pub use events::{Event, EventKind, EventPayload};
