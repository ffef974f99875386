//! Host platform utility functions

use std::path::PathBuf;

/// Name of the environment variable pointing at the software root directory.
pub const SW_ROOT_ENV_VAR: &str = "ARM_SW_ROOT";

/// Get the path to the software root directory.
///
/// The root is set by the `ARM_SW_ROOT` environment variable, and is the
/// directory that the `params` and `sessions` directories live under.
pub fn get_arm_sw_root() -> Result<PathBuf, std::env::VarError> {
    Ok(PathBuf::from(std::env::var(SW_ROOT_ENV_VAR)?))
}
