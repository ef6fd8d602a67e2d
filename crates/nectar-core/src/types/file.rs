use serde::{Deserialize, Serialize};

/// A file ready to be downloaded, as returned by `getFile`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct File {
    pub file_id: String,
    pub file_unique_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Relative download path; valid for at least one hour after `getFile`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}
