//! Configuration and results caching.
//!
//! # Components
//!
//! - [`ConfigCache`]: interns `(project path, tools version, global properties)`
//!   identities to session-unique ids
//! - [`ResultsCache`]: accumulates per-target results per configuration
//! - cache files: durable, filtered snapshots used to hand results between sessions

mod config;
mod results;
mod snapshot;

pub use config::{
  BuildRequestConfiguration, ConfigCache, ConfigIdentity, ConfigurationId, IdentityError, LoadedProject,
};
pub use results::{CachedLookup, ConfigResults, ResultsCache};
pub use snapshot::{
  CacheFile, CacheSnapshotError, CachedConfiguration, CachedResults, build_cache_file, generate_run_id,
  import_cache_file, read_cache_file, write_cache_file,
};
