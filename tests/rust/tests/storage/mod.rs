//! Storage integration tests
//!
//! Credential file round trips and the live-reloading rule registry.

mod credentials;
