//! Environment configuration

use std::ffi::OsString;
use std::path::PathBuf;

/// Settings read once from `ISOLATE_*` environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Execution store directory
    pub app_folder: PathBuf,
    /// Where log artifacts are written
    pub log_dir: PathBuf,
    /// Whether executions are recorded
    pub tracking_enabled: bool,
    /// Debug logging
    pub verbose: bool,
    /// Program nested levels invoke
    pub self_program: OsString,
}

impl Config {
    /// Read from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    /// Read through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let app_folder = lookup("ISOLATE_APP_FOLDER")
            .map(PathBuf::from)
            .unwrap_or_else(default_app_folder);
        let log_dir = lookup("ISOLATE_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let flag = |key: &str| lookup(key).is_some_and(|v| is_truthy(&v.to_string_lossy()));

        Self {
            app_folder,
            log_dir,
            tracking_enabled: !flag("ISOLATE_DISABLE_TRACKING"),
            verbose: flag("ISOLATE_VERBOSE"),
            self_program: lookup("ISOLATE_SELF").unwrap_or_else(|| "isolate".into()),
        }
    }
}

impl Config {
    /// The variables a nested invocation needs to resolve the same settings
    pub fn forwarded_env(&self) -> Vec<(&'static str, OsString)> {
        let mut vars = vec![
            ("ISOLATE_APP_FOLDER", self.app_folder.clone().into_os_string()),
            ("ISOLATE_LOG_DIR", self.log_dir.clone().into_os_string()),
            ("ISOLATE_SELF", self.self_program.clone()),
        ];
        if !self.tracking_enabled {
            vars.push(("ISOLATE_DISABLE_TRACKING", "1".into()));
        }
        if self.verbose {
            vars.push(("ISOLATE_VERBOSE", "1".into()));
        }
        vars
    }
}

fn default_app_folder() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".isolate")
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, OsString> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]);
        assert!(c.app_folder.ends_with(".isolate"));
        assert_eq!(c.log_dir, std::env::temp_dir());
        assert!(c.tracking_enabled);
        assert!(!c.verbose);
        assert_eq!(c.self_program, "isolate");
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("ISOLATE_APP_FOLDER", "/var/lib/isolate"),
            ("ISOLATE_LOG_DIR", "/var/log/isolate"),
            ("ISOLATE_DISABLE_TRACKING", "YES"),
            ("ISOLATE_VERBOSE", "1"),
            ("ISOLATE_SELF", "/usr/local/bin/isolate"),
        ]);
        assert_eq!(c.app_folder, PathBuf::from("/var/lib/isolate"));
        assert_eq!(c.log_dir, PathBuf::from("/var/log/isolate"));
        assert!(!c.tracking_enabled);
        assert!(c.verbose);
        assert_eq!(c.self_program, "/usr/local/bin/isolate");
    }

    #[test]
    fn test_forwarded_env_resolves_to_the_same_config() {
        let c = config(&[
            ("ISOLATE_LOG_DIR", "/var/log/isolate"),
            ("ISOLATE_DISABLE_TRACKING", "true"),
            ("ISOLATE_SELF", "/usr/local/bin/isolate"),
        ]);
        let vars: HashMap<String, OsString> = c
            .forwarded_env()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let nested = Config::from_lookup(|key| vars.get(key).cloned());
        assert_eq!(nested, c);
    }

    #[test]
    fn test_falsy_values() {
        let c = config(&[("ISOLATE_DISABLE_TRACKING", "0"), ("ISOLATE_VERBOSE", "no")]);
        assert!(c.tracking_enabled);
        assert!(!c.verbose);
    }
}
