//! Test doubles shared by the workspace unit tests.
//!
//! In-memory implementations of every port so scheduler behaviour can be
//! exercised without Redis, RabbitMQ or Postgres.

pub mod builders;
pub mod mocks;

pub use builders::TaskBuilder;
pub use mocks::{
    InMemoryMessageQueue, InMemoryTaskLogStore, InMemoryTaskRepository, InMemoryTaskStateStore,
    NoopArchiver, NoopClientCallback, RecordingHandler, RecordingProgressSink,
};
