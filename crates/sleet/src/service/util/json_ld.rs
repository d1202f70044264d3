use serde::{Deserialize, Serialize};

pub const SCHEMA_VOCAB: &str = "http://schema.nuget.org/schema#";

/// The `@context` header carried by query documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonLdContext {
  #[serde(rename = "@vocab")]
  pub vocab: String,
}

impl Default for JsonLdContext {
  fn default() -> Self {
    Self {
      vocab: SCHEMA_VOCAB.to_string(),
    }
  }
}
