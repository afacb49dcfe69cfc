//! OAuth endpoint discovery
//!
//! The token URL and client id belong to the external CLI and may change
//! between its releases, so they are read out of the installed binary's
//! embedded strings. Anything not found there comes from compiled-in
//! fallbacks, field by field.

use std::fmt;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const FALLBACK_TOKEN_URL: &str = "https://platform.claude.com/v1/oauth/token";
pub const FALLBACK_CLIENT_ID: &str = "9d1c250a-e61b-44d9-88ed-5944d1962f5e";

/// Shortest printable run kept when scanning the binary
const MIN_STRING_LEN: usize = 4;

lazy_static! {
    static ref TOKEN_URL_PATTERNS: Vec<Regex> = vec![
        Regex::new(r#"TOKEN_URL["':=\s]+(https://[^"'\s]+/oauth/token)"#).unwrap(),
        Regex::new(r#"(https://[^"'\s]+/v1/oauth/token)"#).unwrap(),
        Regex::new(r"(https://platform\.claude\.com/v1/oauth/token)").unwrap(),
        Regex::new(r"(https://console\.anthropic\.com/v1/oauth/token)").unwrap(),
    ];
    static ref CLIENT_ID_PATTERNS: Vec<Regex> = vec![
        Regex::new(
            r#"CLIENT_ID["':=\s]+([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})"#
        )
        .unwrap(),
        Regex::new(
            r#"client_id["':=\s]+([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})"#
        )
        .unwrap(),
    ];
}

/// Where the active config came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Binary,
    Fallback,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Binary => "binary",
            Self::Fallback => "fallback",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthConfig {
    pub token_url: String,
    pub client_id: String,
    pub source: ConfigSource,
}

impl OAuthConfig {
    pub fn fallback() -> Self {
        Self {
            token_url: FALLBACK_TOKEN_URL.to_string(),
            client_id: FALLBACK_CLIENT_ID.to_string(),
            source: ConfigSource::Fallback,
        }
    }

    /// Explicit configuration (tests, manual override)
    pub fn new(token_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            source: ConfigSource::Binary,
        }
    }
}

/// Memoizing resolver; one instance per process, built at the composition root
pub struct OAuthConfigResolver {
    binary_path: Option<PathBuf>,
    cached: Mutex<Option<OAuthConfig>>,
}

impl OAuthConfigResolver {
    /// Resolve from the CLI binary at `binary_path` (a bare name is looked up on `PATH`)
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: Some(binary_path.into()),
            cached: Mutex::new(None),
        }
    }

    /// Always use the fallback constants
    pub fn fallback_only() -> Self {
        Self {
            binary_path: None,
            cached: Mutex::new(None),
        }
    }

    /// Pre-resolved config, never touches the filesystem until the cache is cleared
    pub fn fixed(config: OAuthConfig) -> Self {
        Self {
            binary_path: None,
            cached: Mutex::new(Some(config)),
        }
    }

    /// Active config, resolving on first use
    pub async fn resolve(&self) -> OAuthConfig {
        let mut cached = self.cached.lock().await;
        if let Some(config) = cached.as_ref() {
            return config.clone();
        }

        let path = self.binary_path.clone();
        let config = tokio::task::spawn_blocking(move || match path {
            Some(path) => resolve_from_binary(&path),
            None => OAuthConfig::fallback(),
        })
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "[OAuth] Config extraction task failed, using fallback");
            OAuthConfig::fallback()
        });

        info!(
            source = %config.source,
            token_url = %config.token_url,
            "[OAuth] Resolved OAuth config"
        );
        *cached = Some(config.clone());
        config
    }

    /// Source of the cached config, if resolved
    pub async fn source(&self) -> Option<ConfigSource> {
        self.cached.lock().await.as_ref().map(|c| c.source)
    }

    pub async fn clear_cache(&self) {
        self.cached.lock().await.take();
    }
}

fn resolve_from_binary(path: &Path) -> OAuthConfig {
    let located = match locate_binary(path) {
        Some(p) => p,
        None => {
            debug!(path = ?path, "[OAuth] CLI binary not found, using fallback config");
            return OAuthConfig::fallback();
        }
    };

    let bytes = match std::fs::read(&located) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = ?located, error = %e, "[OAuth] Cannot read CLI binary, using fallback config");
            return OAuthConfig::fallback();
        }
    };

    let text = printable_strings(&bytes, MIN_STRING_LEN);
    let config = config_from_strings(&text);
    debug!(path = ?located, source = %config.source, "[OAuth] Scanned CLI binary");
    config
}

/// Follow symlinks; bare command names are searched on `PATH`
fn locate_binary(path: &Path) -> Option<PathBuf> {
    let candidate = if path.components().count() == 1 && !path.is_absolute() {
        which::which(path).ok()?
    } else {
        path.to_path_buf()
    };
    std::fs::canonicalize(candidate).ok()
}

/// Runs of printable ASCII at least `min_len` long, one per line
pub fn printable_strings(bytes: &[u8], min_len: usize) -> String {
    let mut out = String::new();
    let mut start: Option<usize> = None;

    let flush = |from: usize, to: usize, out: &mut String| {
        if to - from >= min_len {
            // printable ASCII is valid UTF-8
            out.push_str(&String::from_utf8_lossy(&bytes[from..to]));
            out.push('\n');
        }
    };

    for (i, b) in bytes.iter().enumerate() {
        let printable = (0x20..=0x7e).contains(b) || *b == b'\t';
        match (printable, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                flush(s, i, &mut out);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        flush(s, bytes.len(), &mut out);
    }
    out
}

/// Pick the token URL and client id out of extracted strings
pub fn config_from_strings(text: &str) -> OAuthConfig {
    let token_url = TOKEN_URL_PATTERNS
        .iter()
        .find_map(|re| re.captures(text).map(|c| c[1].to_string()));

    let client_id = CLIENT_ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(text).map(|c| c[1].to_string()))
        .or_else(|| {
            text.contains(FALLBACK_CLIENT_ID)
                .then(|| FALLBACK_CLIENT_ID.to_string())
        });

    if token_url.is_none() && client_id.is_none() {
        return OAuthConfig::fallback();
    }

    OAuthConfig {
        token_url: token_url.unwrap_or_else(|| FALLBACK_TOKEN_URL.to_string()),
        client_id: client_id.unwrap_or_else(|| FALLBACK_CLIENT_ID.to_string()),
        source: ConfigSource::Binary,
    }
}
