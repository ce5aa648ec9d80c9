use std::path::{Path, PathBuf};

/// Name used when neither the response nor the URL yields one.
pub const DEFAULT_FILENAME: &str = "downloaded_model.safetensors";

const DEFAULT_EXTENSION: &str = "safetensors";

/// Temp file a download streams into before being renamed onto `dest`.
pub fn temp_path(dest: &Path) -> PathBuf {
  with_suffix(dest, ".tmp")
}

/// Lock file guarding concurrent publishes of `dest`.
pub fn lock_path(dest: &Path) -> PathBuf {
  with_suffix(dest, ".lock")
}

fn with_suffix(dest: &Path, suffix: &str) -> PathBuf {
  let mut path = dest.as_os_str().to_owned();
  path.push(suffix);
  PathBuf::from(path)
}

/// Pick a local filename for a download: the `Content-Disposition`
/// filename, else the last URL path segment, else [`DEFAULT_FILENAME`].
/// Names without an extension get `.safetensors`.
pub fn filename_from_response(content_disposition: Option<&str>, url: &str) -> String {
  let name = content_disposition
    .and_then(disposition_filename)
    .or_else(|| url_filename(url))
    .unwrap_or_else(|| DEFAULT_FILENAME.to_string());

  if Path::new(&name).extension().is_none() {
    format!("{name}.{DEFAULT_EXTENSION}")
  } else {
    name
  }
}

fn disposition_filename(header: &str) -> Option<String> {
  header
    .split(';')
    .map(str::trim)
    .find_map(|param| {
      let (key, value) = param.split_once('=')?;
      key
        .trim()
        .eq_ignore_ascii_case("filename")
        .then(|| value.trim().trim_matches('"').to_string())
    })
    .and_then(|name| sanitize(&name))
}

fn url_filename(url: &str) -> Option<String> {
  let parsed = url::Url::parse(url).ok()?;
  let segment = parsed.path_segments()?.next_back()?;
  sanitize(segment)
}

/// Keep only the final path component so a remote name cannot escape the
/// target directory.
fn sanitize(name: &str) -> Option<String> {
  let base = Path::new(name).file_name()?.to_string_lossy().into_owned();
  if base.is_empty() || base == "." || base == ".." {
    return None;
  }
  Some(base)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_temp_path_appends_suffix() {
    assert_eq!(
      temp_path(Path::new("/models/x.bin")),
      PathBuf::from("/models/x.bin.tmp")
    );
  }

  #[test]
  fn test_lock_path_appends_suffix() {
    assert_eq!(
      lock_path(Path::new("/models/x.bin")),
      PathBuf::from("/models/x.bin.lock")
    );
  }

  #[test]
  fn test_content_disposition_wins() {
    let name = filename_from_response(
      Some(r#"attachment; filename="sdxl_lightning_4step.safetensors""#),
      "https://host/resolve/main/other.bin",
    );
    assert_eq!(name, "sdxl_lightning_4step.safetensors");
  }

  #[test]
  fn test_unquoted_disposition() {
    let name = filename_from_response(Some("attachment; filename=model.ckpt"), "https://host/");
    assert_eq!(name, "model.ckpt");
  }

  #[test]
  fn test_disposition_cannot_traverse() {
    let name = filename_from_response(
      Some(r#"attachment; filename="../../etc/passwd""#),
      "https://host/",
    );
    assert_eq!(name, "passwd.safetensors");
  }

  #[test]
  fn test_url_segment_fallback() {
    let name = filename_from_response(None, "https://host/models/vae.pt?download=true");
    assert_eq!(name, "vae.pt");
  }

  #[test]
  fn test_extension_added() {
    assert_eq!(
      filename_from_response(None, "https://host/files/lora"),
      "lora.safetensors"
    );
  }

  #[test]
  fn test_default_name() {
    assert_eq!(filename_from_response(None, "https://host/"), DEFAULT_FILENAME);
    assert_eq!(filename_from_response(None, "not a url"), DEFAULT_FILENAME);
  }
}
