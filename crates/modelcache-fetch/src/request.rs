use std::path::PathBuf;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

use crate::error::FetchError;

/// A remote artifact to materialize at a local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
  pub url: String,
  /// Destination file (or directory, for `fetch_into_dir`).
  pub dest: PathBuf,
  pub headers: Vec<(String, String)>,
  /// Registry category; inferred from `dest` when unset.
  pub category: Option<String>,
}

impl FetchRequest {
  pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
    Self {
      url: url.into(),
      dest: dest.into(),
      headers: Vec::new(),
      category: None,
    }
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// Add an `Authorization: Bearer` header. See [`resolve_token`].
  pub fn bearer_token(self, token: &str) -> Self {
    let token = resolve_token(token);
    self.header(AUTHORIZATION.as_str(), format!("Bearer {token}"))
  }

  pub fn category(mut self, category: impl Into<String>) -> Self {
    self.category = Some(category.into());
    self
  }

  pub(crate) fn header_map(&self) -> Result<HeaderMap, FetchError> {
    let mut map = HeaderMap::new();
    for (name, value) in &self.headers {
      let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| FetchError::InvalidRequest {
        message: format!("header name '{name}': {e}"),
      })?;
      let value = HeaderValue::from_str(value).map_err(|e| FetchError::InvalidRequest {
        message: format!("header '{name}' value: {e}"),
      })?;
      map.append(name, value);
    }
    Ok(map)
  }
}

/// Resolve a token of the form `$NAME` from the environment variable
/// `NAME`. Other tokens, and `$NAME` when the variable is unset, are
/// returned as given.
pub fn resolve_token(token: &str) -> String {
  token
    .strip_prefix('$')
    .and_then(|name| std::env::var(name).ok())
    .unwrap_or_else(|| token.to_string())
}
