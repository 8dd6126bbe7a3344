//! Metadata payloads attached to a stream with `annotate`.
//!
//! The compiler treats payloads as opaque: whatever the caller or a
//! callback supplies is emitted verbatim and in order. [`KnownMetadata`]
//! covers the two payload kinds backends are known to understand, so
//! callers do not have to spell the field names by hand.

use serde::{Deserialize, Serialize};

/// Insertion-ordered JSON object.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Build a [`Metadata`] from key/value pairs.
///
/// # Example
/// ```
/// use linqtree::metadata::metadata;
///
/// let m = metadata([("name", "calibrated"), ("metadata_type", "inject-code")]);
/// assert_eq!(m.keys().next().map(String::as_str), Some("name"));
/// ```
pub fn metadata<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Metadata
where
    K: Into<String>,
    V: Into<serde_json::Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Typed forms of the payloads backends recognise, discriminated by
/// `metadata_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metadata_type")]
pub enum KnownMetadata {
    /// A function body injected into the generated backend code.
    ///
    /// # Example
    /// ```text
    /// {"metadata_type": "add-injected-function", "name": "deltaR",
    ///  "code": ["double result = ...;"], "result_name": "result",
    ///  "arguments": ["eta1", "phi1", "eta2", "phi2"], "return_type": "double"}
    /// ```
    #[serde(rename = "add-injected-function")]
    InjectedFunction {
        name: String,
        code: Vec<String>,
        result_name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        include_files: Vec<String>,
        arguments: Vec<String>,
        return_type: String,
    },

    /// Raw code and build settings added to the backend's generated sources.
    #[serde(rename = "inject-code")]
    InjectCode {
        name: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        header_includes: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        private_members: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        instance_initialization: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        link_libraries: Vec<String>,
    },
}

impl KnownMetadata {
    /// Serialize into an ordered payload, `metadata_type` first.
    pub fn into_metadata(self) -> Metadata {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            // Both variants are structs, which always serialize to objects
            _ => Metadata::new(),
        }
    }

    /// Recognise a payload, if it is one of the known kinds
    pub fn from_metadata(m: &Metadata) -> Option<KnownMetadata> {
        serde_json::from_value(serde_json::Value::Object(m.clone())).ok()
    }
}

impl From<KnownMetadata> for Metadata {
    fn from(m: KnownMetadata) -> Self {
        m.into_metadata()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_function_payload_has_discriminator_first() {
        let m = KnownMetadata::InjectedFunction {
            name: "deltaR".into(),
            code: vec!["double r = 0;".into()],
            result_name: "r".into(),
            include_files: vec![],
            arguments: vec!["a".into(), "b".into()],
            return_type: "double".into(),
        }
        .into_metadata();

        assert_eq!(m.keys().next().map(String::as_str), Some("metadata_type"));
        assert_eq!(m["metadata_type"], "add-injected-function");
        assert!(!m.contains_key("include_files"));
        assert_eq!(KnownMetadata::from_metadata(&m).map(|k| matches!(k, KnownMetadata::InjectedFunction { .. })), Some(true));
    }

    #[test]
    fn unknown_payloads_are_not_recognised() {
        let m = metadata([("metadata_type", "something-else")]);
        assert!(KnownMetadata::from_metadata(&m).is_none());
    }
}
