//! Configuration file resolution.

use std::path::PathBuf;

/// Environment variable naming the configuration document.
pub const CONFIG_ENV: &str = "DEEPSKILL_CONFIG";

/// Resolve the configuration path: explicit flag, then `DEEPSKILL_CONFIG`,
/// then `./deepskill.json`, then `~/.deepskill/deepskill.json`.
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        if !env_path.is_empty() {
            return PathBuf::from(env_path);
        }
    }

    let cwd_config = PathBuf::from("deepskill.json");
    if cwd_config.exists() {
        return cwd_config;
    }

    default_config_path()
}

fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    PathBuf::from(home).join(".deepskill").join("deepskill.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        assert_eq!(
            resolve_config_path(Some("/etc/deepskill/prod.json")),
            PathBuf::from("/etc/deepskill/prod.json")
        );
    }

    #[test]
    fn test_default_lives_under_home() {
        let path = default_config_path();
        assert!(path.ends_with(".deepskill/deepskill.json"));
    }
}
