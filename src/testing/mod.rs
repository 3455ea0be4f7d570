//! Testing infrastructure
//!
//! Substitutable platform used by unit tests, integration tests, and the
//! scan benchmark.

pub mod fake_platform;

pub use fake_platform::{FakeHandle, FakePlatform, QueryStep};
