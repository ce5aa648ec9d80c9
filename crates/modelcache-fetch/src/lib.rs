//! Modelcache Fetch
//!
//! Materializes remote artifacts on local disk and keeps usage bookkeeping
//! current.
//!
//! [`DownloadCoordinator::fetch`] follows a fixed protocol:
//! 1. an existing destination is a cache hit (usage is touched, no network);
//! 2. the response's declared size is checked against free space, and a
//!    shortfall is reported with an advisory eviction plan;
//! 3. the body is streamed to `<dest>.tmp`;
//! 4. a single rename publishes the file, so `dest` is never partial;
//! 5. any failure removes the temp file and leaves `dest` untouched;
//! 6. the artifact is registered and its usage touched.
//!
//! Concurrent publishes of the same destination are refused with
//! [`FetchError::InProgress`] through an advisory lock on `<dest>.lock`.
//! Consumers that expect another writer to produce a file can poll with
//! [`wait_for_artifact`].

mod coordinator;
mod error;
mod filename;
mod progress;
mod request;
mod usage;
mod wait;

pub use coordinator::{ByteStream, DownloadCoordinator, FetchOutcome, FetchSettings};
pub use error::FetchError;
pub use filename::{DEFAULT_FILENAME, filename_from_response, lock_path, temp_path};
pub use progress::{Progress, ProgressFn};
pub use request::{FetchRequest, resolve_token};
pub use usage::{UsageTracker, infer_category, registry_key};
pub use wait::wait_for_artifact;
