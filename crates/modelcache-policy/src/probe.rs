use std::io;
use std::path::Path;

/// Free and total bytes on a filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
  /// Bytes available to the current user.
  pub free_bytes: u64,
  pub total_bytes: u64,
}

/// Source of disk usage figures for the filesystem containing a path.
///
/// Implementations may block; the space monitor calls them off the async
/// executor.
pub trait DiskProbe: Send + Sync {
  fn usage(&self, path: &Path) -> io::Result<DiskUsage>;
}

/// Disk probe backed by the OS (`statvfs` / `GetDiskFreeSpaceEx`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Fs4Probe;

impl DiskProbe for Fs4Probe {
  fn usage(&self, path: &Path) -> io::Result<DiskUsage> {
    let target = nearest_existing(path)?;
    Ok(DiskUsage {
      free_bytes: fs4::available_space(target)?,
      total_bytes: fs4::total_space(target)?,
    })
  }
}

/// The path itself or its closest existing ancestor, so that a target
/// directory that has not been created yet still resolves to a filesystem.
/// The empty path, and the empty parent of a relative path, mean the
/// current directory.
fn nearest_existing(path: &Path) -> io::Result<&Path> {
  path
    .ancestors()
    .map(|candidate| {
      if candidate.as_os_str().is_empty() {
        Path::new(".")
      } else {
        candidate
      }
    })
    .find(|candidate| candidate.exists())
    .ok_or_else(|| {
      io::Error::new(
        io::ErrorKind::NotFound,
        format!("no existing ancestor for {}", path.display()),
      )
    })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_nearest_existing_walks_up() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("a").join("b");
    assert_eq!(nearest_existing(&missing).unwrap(), dir.path());
  }

  #[test]
  fn test_relative_paths_resolve_to_current_dir() {
    assert_eq!(nearest_existing(Path::new("")).unwrap(), Path::new("."));
    assert_eq!(
      nearest_existing(Path::new("no-such-dir-for-modelcache/sub")).unwrap(),
      Path::new(".")
    );
    let parent = Path::new("model.bin").parent().unwrap();
    assert!(Fs4Probe.usage(parent).is_ok());
  }

  #[test]
  fn test_fs4_probe_reports_usage() {
    let dir = tempfile::tempdir().unwrap();
    let usage = Fs4Probe.usage(dir.path()).unwrap();
    assert!(usage.total_bytes > 0);
    assert!(usage.free_bytes <= usage.total_bytes);
  }
}
