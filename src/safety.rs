//! Safety checks run before any artifact is written.
//!
//! Entity artifacts are JSON and mapping files are YAML. A writer asked to
//! put one format under the other's extension is a bug, so it fails before
//! the file is touched.

use anyhow::{bail, Result};
use std::path::Path;

/// Validates that an artifact path carries the extension of the format
/// about to be written (e.g. ".json", ".yaml").
pub fn validate_output_path(output: &Path, required_extension: &str) -> Result<()> {
    let output_name = output.file_name().and_then(|n| n.to_str()).unwrap_or("");

    if output_name.len() <= required_extension.len() || !output_name.ends_with(required_extension) {
        bail!(
            "Safety check failed: output file '{}' must end with '{}'",
            output.display(),
            required_extension
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_artifacts() {
        assert!(validate_output_path(&PathBuf::from("/data/animap/malid.json"), ".json").is_ok());
        assert!(validate_output_path(&PathBuf::from("/data/tmdb-mal-master.yaml"), ".yaml").is_ok());
    }

    #[test]
    fn test_wrong_extension() {
        let output = PathBuf::from("/data/animap/malid.yaml");
        let result = validate_output_path(&output, ".json");
        assert!(result.unwrap_err().to_string().contains("must end with '.json'"));
    }

    #[test]
    fn test_bare_extension_and_directory_rejected() {
        assert!(validate_output_path(&PathBuf::from("/data/.json"), ".json").is_err());
        assert!(validate_output_path(&PathBuf::from("/"), ".json").is_err());
    }
}
