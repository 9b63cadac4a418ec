use crate::error::{Error, Result};

/// Validate a knowledge-base name: non-empty, non-whitespace, and free of path traversal.
///
/// Mirrors the catalog's case-insensitive identity: callers should lower-case
/// the name themselves before using it as a lookup key; this function only
/// rejects structurally invalid names.
pub fn validate_kb_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation("knowledge base name must not be empty".into()));
    }
    if name.contains("../") {
        return Err(Error::Validation(
            "knowledge base name must not contain '../'".into(),
        ));
    }
    Ok(())
}

/// Validate a filename relative to a KB's content root: non-empty and free of
/// path traversal. Does not require posix-normalization; callers normalize
/// separately (see `blob::normalize_relative_path`).
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(Error::Validation("filename must not be empty".into()));
    }
    if filename.contains("../") {
        return Err(Error::Validation("filename must not contain '../'".into()));
    }
    Ok(())
}

/// Fold a knowledge-base or filename to its case-insensitive comparison key.
pub fn fold_case(s: &str) -> String {
    s.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        assert!(validate_kb_name("").is_err());
        assert!(validate_kb_name("   ").is_err());
    }

    #[test]
    fn rejects_traversal() {
        assert!(validate_kb_name("../etc").is_err());
        assert!(validate_kb_name("foo/../bar").is_err());
    }

    #[test]
    fn accepts_normal_name() {
        assert!(validate_kb_name("samples").is_ok());
        assert!(validate_kb_name("My KB").is_ok());
    }

    #[test]
    fn case_insensitive_fold() {
        assert_eq!(fold_case("Samples"), fold_case("samples"));
        assert_eq!(fold_case("SAMPLES"), "samples");
    }

    #[test]
    fn filename_rejects_traversal() {
        assert!(validate_filename("../secret.txt").is_err());
        assert!(validate_filename("docs/../../etc/passwd").is_err());
    }

    #[test]
    fn filename_accepts_nested_path() {
        assert!(validate_filename("docs/guide.md").is_ok());
    }
}
