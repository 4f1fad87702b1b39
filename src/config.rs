//! Codec options. Defaults match the historical converter; the CLI can load
//! overrides from a JSON file and then apply its own flags on top.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::path_de::{self, PathError};

pub const DEFAULT_DISCRIMINATOR: &str = "resourceType";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodecOptions {
    /// Infer date / timestamp semantics from the text of values bound for a
    /// plain `int` or `long` that carries no logical type.
    pub shape_sniffing: bool,
    /// Record field that holds the record's own type name.
    pub discriminator: String,
    /// Treat a live property with no matching record field as a shape
    /// mismatch instead of skipping it.
    pub strict_properties: bool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            shape_sniffing: true,
            discriminator: DEFAULT_DISCRIMINATOR.to_string(),
            strict_properties: false,
        }
    }
}

impl CodecOptions {
    pub fn from_json_str(src: &str) -> Result<Self, PathError> {
        path_de::from_str_with_path(src)
    }

    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("failed to read options file {}: {e}", path.display()))?;
        Ok(path_de::from_slice_with_path(&bytes)?)
    }
}
