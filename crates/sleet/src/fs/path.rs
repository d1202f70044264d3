//! Feed path normalization.
//!
//! Every logical resource has exactly one key: lowercase, forward slashes, no leading slash,
//! no empty or `.` segments. `..` is rejected outright.

use super::error::{FsError, Result};

pub fn normalize_path(path: &str) -> Result<String> {
  let replaced = path.replace('\\', "/");
  let mut segments = Vec::new();
  for segment in replaced.split('/') {
    match segment {
      "" | "." => continue,
      ".." => return Err(FsError::InvalidPath(path.to_string())),
      s => segments.push(s.to_lowercase()),
    }
  }
  Ok(segments.join("/"))
}

/// Documents that reference other feed files. They flush after every non-index write so a
/// partial commit never leaves one pointing at a file that was not written.
const INDEX_DOCUMENTS: &[&str] = &["sleet.packageindex.json", "search/query", "autocomplete/query"];

/// Whether a normalized key is an index document: any `index.json` or a known root query.
pub fn is_index_document(key: &str) -> bool {
  key.rsplit('/').next() == Some("index.json") || INDEX_DOCUMENTS.contains(&key)
}

/// Number of segments in a normalized key.
pub fn depth(key: &str) -> usize {
  if key.is_empty() { 0 } else { key.split('/').count() }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_normalize_variants_collapse() {
    let expected = "registration/a/index.json";
    for input in [
      "registration/a/index.json",
      "/Registration/A/Index.json",
      "registration\\a\\index.json",
      "registration//a/./index.json",
    ] {
      assert_eq!(normalize_path(input).unwrap(), expected, "input: {input}");
    }
  }

  #[test]
  fn test_parent_segments_rejected() {
    assert!(normalize_path("catalog/../index.json").is_err());
  }

  #[test]
  fn test_index_documents() {
    assert!(is_index_document("index.json"));
    assert!(is_index_document("catalog/index.json"));
    assert!(is_index_document("registration/a/index.json"));
    assert!(is_index_document("search/query"));
    assert!(!is_index_document("catalog/page.1.json"));
    assert!(!is_index_document("registration/a/1.0.0.json"));
  }

  #[test]
  fn test_depth() {
    assert_eq!(depth(""), 0);
    assert_eq!(depth("index.json"), 1);
    assert_eq!(depth("catalog/data/x.json"), 3);
  }
}
