//! OAuth support for the notification CLI's account
//!
//! - `config` - token endpoint / client id discovery from the CLI binary
//! - `pkce` - verifier, challenge and state generation
//! - `client` - token endpoint HTTP calls and error classification
//! - `flow` - authorization-code login with in-memory PKCE sessions
//! - `refresh` - single-flight refresh engine with periodic checks

pub mod client;
pub mod config;
pub mod flow;
pub mod pkce;
pub mod refresh;

pub use client::{TokenEndpointClient, TokenRequestError};
pub use config::{ConfigSource, OAuthConfig, OAuthConfigResolver};
pub use flow::{AuthorizationRequest, FlowError, OAuthFlow, PkceSession};
pub use pkce::PkcePair;
pub use refresh::{RefreshPolicy, TokenRefreshEngine, TokenRefreshEngineBuilder};
