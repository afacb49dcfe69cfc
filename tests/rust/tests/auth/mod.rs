//! Auth integration tests
//!
//! Token refresh against a real credential file and a mocked token endpoint,
//! and the PKCE login flow end to end.

mod flow;
mod refresh;
