//! Deterministic adapters and workflow fixtures for tests.
//!
//! The mocks record every call so tests can assert on what the engine sent,
//! and can be scripted to fail, stall, or succeed in a fixed order.

mod fixtures;
mod mocks;

pub use fixtures::{diamond, linear_chain, refund_chunks, temp_config, web_hits};
pub use mocks::{MockProvider, MockRetrieval, MockWebSearch};
