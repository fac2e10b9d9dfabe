//! Environment variable and path utilities.

use directories::ProjectDirs;
use std::path::PathBuf;

/// Map a resource or endpoint name onto an environment-key fragment:
/// uppercase, with every non-alphanumeric character replaced by `_`.
#[must_use]
pub fn env_fragment(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// The injected key for a referenced endpoint: `<RESOURCE>__<ENDPOINT>`.
#[must_use]
pub fn reference_env_key(resource: &str, endpoint: &str) -> String {
    format!("{}__{}", env_fragment(resource), env_fragment(endpoint))
}

/// The injected key for a referenced value resource: `<RESOURCE>__VALUE`.
#[must_use]
pub fn value_env_key(resource: &str) -> String {
    format!("{}__VALUE", env_fragment(resource))
}

/// The injected key for a resource's own endpoint port: `PORT_<ENDPOINT>`.
#[must_use]
pub fn own_port_env_key(endpoint: &str) -> String {
    format!("PORT_{}", env_fragment(endpoint))
}

/// Default root for per-resource working directories.
///
/// Resolves under the XDG data directory (`~/.local/share/appgraph/runs` on
/// Linux); callers override it for tests and sandboxes.
#[must_use]
pub fn default_workdir_root() -> PathBuf {
    ProjectDirs::from("dev", "appgraph", "appgraph").map_or_else(
        || PathBuf::from(".appgraph"),
        |dirs| dirs.data_local_dir().join("runs"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_are_uppercased_and_sanitized() {
        assert_eq!(env_fragment("api"), "API");
        assert_eq!(env_fragment("api-key"), "API_KEY");
        assert_eq!(env_fragment("my.service2"), "MY_SERVICE2");
    }

    #[test]
    fn reference_keys_join_with_double_underscore() {
        assert_eq!(reference_env_key("cache", "tcp"), "CACHE__TCP");
        assert_eq!(reference_env_key("api-key", "http"), "API_KEY__HTTP");
        assert_eq!(value_env_key("api-key"), "API_KEY__VALUE");
        assert_eq!(own_port_env_key("http"), "PORT_HTTP");
    }
}
