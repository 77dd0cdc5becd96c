/// Tools version used when a request does not name one.
pub const DEFAULT_TOOLS_VERSION: &str = "Current";

/// Node id of the in-process worker node.
pub const IN_PROC_NODE_ID: u32 = 1;

/// Version of the results cache file format.
pub const RESULTS_CACHE_VERSION: u32 = 1;

/// Environment variable overriding the worker pool size.
pub const ENV_MAX_WORKERS: &str = "KILN_MAX_WORKERS";

/// Environment variable enabling build-wide continue-past-failure.
pub const ENV_CONTINUE_ON_FAILURE: &str = "KILN_CONTINUE_ON_FAILURE";

/// Environment variable enabling project isolation.
pub const ENV_ISOLATE: &str = "KILN_ISOLATE";

/// Property holding the full path of the project file.
pub const PROJECT_PATH_PROPERTY: &str = "ProjectPath";

/// Property holding the directory of the project file.
pub const PROJECT_DIR_PROPERTY: &str = "ProjectDir";
