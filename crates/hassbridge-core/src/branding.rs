//! Centralized branding constants
//!
//! All product naming comes from this module.

/// Human readable product name
pub const DISPLAY_NAME: &str = "HassBridge";

/// Directory name used under the platform data directory
pub const DATA_DIR_NAME: &str = "hassbridge";

/// Prefix for rolling log files (e.g. `hassbridge.2026-01-22.log`)
pub const LOG_PREFIX: &str = "hassbridge";

/// File name of the subscription rule store
pub const SUBSCRIPTIONS_FILE: &str = "event_subscriptions.json";

/// File name of the OAuth credential record inside the CLI config dir
pub const CREDENTIALS_FILE: &str = ".credentials.json";

/// Top-level key of the OAuth record inside the credential file
pub const CREDENTIALS_KEY: &str = "claudeAiOauth";

/// Get the platform data directory for HassBridge (e.g. `~/.local/share/hassbridge`)
pub fn data_dir() -> Option<std::path::PathBuf> {
    dirs::data_dir().map(|d| d.join(DATA_DIR_NAME))
}
