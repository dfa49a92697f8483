//! Host platform utility functions

use std::env;
use std::path::PathBuf;

/// Name of the environment variable pointing at the software root directory.
pub const SIM_ROOT_ENV_VAR: &str = "FLT_SIM_ROOT";

/// Get the software root directory, under which the `params` and `sessions`
/// directories are found.
pub fn get_sim_root() -> Result<PathBuf, env::VarError> {
    env::var(SIM_ROOT_ENV_VAR).map(PathBuf::from)
}

/// Short description of the host the executable is running on.
pub fn get_host_info() -> String {
    format!("{} ({})", env::consts::OS, env::consts::ARCH)
}
