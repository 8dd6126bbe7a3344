use serde::Deserialize;

/// Limits applied while building a query tree.
///
/// Loaded from the `config` section of a capability file, or built in code.
///
/// # Example
/// ```
/// use linqtree::SessionConfig;
///
/// let config: SessionConfig = serde_json::from_str(r#"{"max_rewrite_passes": 8}"#).unwrap();
/// assert_eq!(config.max_rewrite_passes, 8);
/// assert_eq!(config.max_depth, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Upper bound on desugaring passes before giving up on a fixed point
    pub max_rewrite_passes: usize,
    /// Deepest expression nesting accepted from a quoted lambda
    pub max_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            max_rewrite_passes: 64,
            max_depth: 256,
        }
    }
}
