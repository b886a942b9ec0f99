use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// A cached image ready to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayRecord {
    /// `data:image/{type};base64,{payload}`
    pub uri: String,
    /// The manifest filename.
    pub name: String,
}

impl DisplayRecord {
    /// Build a record from a manifest filename and its base64 payload.
    pub fn from_asset(filename: &str, encoded: &str) -> Result<Self, SyncError> {
        let subtype = image_subtype(filename)?;
        Ok(Self {
            uri: format!("data:image/{};base64,{}", subtype, encoded),
            name: filename.to_string(),
        })
    }
}

/// MIME subtype for an image filename, taken from the text after the last dot.
///
/// Filenames without an extension, with an empty extension, or with
/// nothing before the dot are rejected. `jpg` is reported as `jpeg`.
pub fn image_subtype(filename: &str) -> Result<String, SyncError> {
    let malformed = || SyncError::MalformedFilename(filename.to_string());

    let (stem, ext) = filename.rsplit_once('.').ok_or_else(malformed)?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(malformed());
    }

    let ext = ext.to_ascii_lowercase();
    Ok(match ext.as_str() {
        "jpg" => "jpeg".to_string(),
        _ => ext,
    })
}
