//! Version information for infergate.

/// infergate version from Cargo.toml
pub const INFERGATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information reported by `/health`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub infergate: &'static str,
    /// Build of the hosting binary, when it differs from the library.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            infergate: INFERGATE_VERSION,
            server: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, version: impl Into<String>) -> Self {
        self.server = Some(version.into());
        self
    }
}
