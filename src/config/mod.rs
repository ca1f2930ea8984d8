use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Execution mode for a process group
///
/// In fork mode every instance is an independent process. In cluster mode the
/// instances are expected to share one listening socket; warden tells each
/// child its index and the group size via environment variables and leaves
/// socket sharing to the child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    #[default]
    Fork,
    Cluster,
}

impl std::fmt::Display for ExecMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecMode::Fork => write!(f, "fork"),
            ExecMode::Cluster => write!(f, "cluster"),
        }
    }
}

/// Immutable description of one supervised process group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Process group name (unique identifier)
    pub name: String,

    /// Path to the script or executable to run
    pub script: PathBuf,

    /// Command-line arguments, passed verbatim
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the process
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Environment variables merged into the child environment
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Restart instances when files under the watch directory change
    #[serde(default)]
    pub watch: bool,

    /// Directory tree to watch; defaults to the script's parent directory
    #[serde(default)]
    pub watch_dir: Option<PathBuf>,

    /// Number of instances to run
    #[serde(default = "default_instances")]
    pub instances: usize,

    /// How the instances relate to each other (fork or cluster)
    #[serde(default)]
    pub exec_mode: ExecMode,

    /// Whether to automatically restart on crash
    #[serde(default = "default_autorestart")]
    pub autorestart: bool,

    /// Maximum number of consecutive crash-restarts before giving up
    #[serde(default = "default_max_restarts")]
    pub max_restarts: usize,

    /// Initial delay before a crash-restart (in seconds)
    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,

    /// Signal to send on stop (default: SIGTERM)
    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// Timeout before force kill (in seconds)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

fn default_instances() -> usize {
    1
}

fn default_autorestart() -> bool {
    true
}

fn default_max_restarts() -> usize {
    10
}

fn default_restart_delay() -> u64 {
    1
}

fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

fn default_stop_timeout() -> u64 {
    10
}

impl ProcessSpec {
    /// Load process specs from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Vec<ProcessSpec>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WardenError::Config(format!("Failed to read spec file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        let specs = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(WardenError::InvalidConfig(format!(
                    "unsupported spec file extension {:?}, expected .toml or .json",
                    extension
                )))
            }
        };

        let mut expanded = specs;
        for spec in &mut expanded {
            spec.expand_env_vars();
            spec.validate()?;
        }

        Ok(expanded)
    }

    /// Parse a TOML spec file
    fn parse_toml(contents: &str) -> Result<Vec<ProcessSpec>> {
        #[derive(Deserialize)]
        struct SpecFile {
            #[serde(default)]
            processes: Vec<ProcessSpec>,
            #[serde(flatten)]
            single: Option<ProcessSpec>,
        }

        let spec_file: SpecFile = toml::from_str(contents)
            .map_err(|e| WardenError::InvalidConfig(format!("invalid TOML: {}", e)))?;

        // A file holds either one spec at the top level or a processes array
        if let Some(single) = spec_file.single {
            Ok(vec![single])
        } else if !spec_file.processes.is_empty() {
            Ok(spec_file.processes)
        } else {
            Err(WardenError::InvalidConfig(
                "No process spec found in file".to_string(),
            ))
        }
    }

    /// Parse a JSON spec file
    fn parse_json(contents: &str) -> Result<Vec<ProcessSpec>> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum SpecFile {
            Single(ProcessSpec),
            Multiple { processes: Vec<ProcessSpec> },
        }

        let spec_file: SpecFile = serde_json::from_str(contents)
            .map_err(|e| WardenError::InvalidConfig(format!("invalid JSON: {}", e)))?;

        match spec_file {
            SpecFile::Single(spec) => Ok(vec![spec]),
            SpecFile::Multiple { processes } => {
                if processes.is_empty() {
                    Err(WardenError::InvalidConfig(
                        "No process spec found in file".to_string(),
                    ))
                } else {
                    Ok(processes)
                }
            }
        }
    }

    /// Validate the spec
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(WardenError::MissingConfigField("name".to_string()));
        }

        if self.script.as_os_str().is_empty() {
            return Err(WardenError::MissingConfigField("script".to_string()));
        }

        if self.instances == 0 || self.instances > 100 {
            return Err(WardenError::ConfigValidation(format!(
                "instances must be between 1 and 100, got {}",
                self.instances
            )));
        }

        if self.max_restarts == 0 {
            return Err(WardenError::ConfigValidation(
                "max_restarts cannot be 0".to_string(),
            ));
        }

        let known_signals = [
            "SIGTERM", "SIGINT", "SIGQUIT", "SIGKILL", "SIGHUP", "SIGUSR1", "SIGUSR2",
        ];
        if !known_signals.contains(&self.stop_signal.as_str()) {
            return Err(WardenError::ConfigValidation(format!(
                "unrecognized stop_signal {:?}, expected one of {}",
                self.stop_signal,
                known_signals.join(", ")
            )));
        }

        if let Some(ref cwd) = self.cwd {
            if !cwd.is_dir() {
                return Err(WardenError::ConfigValidation(format!(
                    "working directory {} does not exist or is not a directory",
                    cwd.display()
                )));
            }
        }

        if let Some(ref watch_dir) = self.watch_dir {
            if !watch_dir.is_dir() {
                return Err(WardenError::ConfigValidation(format!(
                    "watch directory {} does not exist or is not a directory",
                    watch_dir.display()
                )));
            }
        }

        Ok(())
    }

    /// Expand environment variables in spec fields
    fn expand_env_vars(&mut self) {
        self.script = Self::expand_env_in_path(&self.script);

        if let Some(ref cwd) = self.cwd {
            self.cwd = Some(Self::expand_env_in_path(cwd));
        }

        if let Some(ref watch_dir) = self.watch_dir {
            self.watch_dir = Some(Self::expand_env_in_path(watch_dir));
        }

        for arg in &mut self.args {
            *arg = Self::expand_env_in_string(arg);
        }

        // Values only; the variable names are passed through as written
        for value in self.env.values_mut() {
            *value = Self::expand_env_in_string(value);
        }
    }

    /// Expand environment variables in a string ($VAR and ${VAR} syntax)
    fn expand_env_in_string(s: &str) -> String {
        if !s.contains('$') {
            return s.to_string();
        }

        // Longest names first, so $FOO does not clobber $FOO_BAR
        let mut vars: Vec<(String, String)> = std::env::vars().collect();
        vars.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let mut result = s.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("${{{}}}", key), &value);
            result = result.replace(&format!("${}", key), &value);
        }

        result
    }

    /// Expand environment variables in a path
    fn expand_env_in_path(path: &Path) -> PathBuf {
        let path_str = path.to_string_lossy();
        let expanded = Self::expand_env_in_string(&path_str);
        PathBuf::from(expanded)
    }

    /// The directory tree the watch trigger observes for this spec
    ///
    /// Defaults to the script's containing directory when no override is set.
    pub fn watch_root(&self) -> Option<PathBuf> {
        if !self.watch {
            return None;
        }
        self.watch_dir
            .clone()
            .or_else(|| self.script.parent().map(|p| p.to_path_buf()))
    }

    /// Get restart delay as Duration
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    /// Get stop timeout as Duration
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn test_spec(name: &str) -> ProcessSpec {
        ProcessSpec {
            name: name.to_string(),
            script: PathBuf::from("/bin/echo"),
            args: vec![],
            cwd: None,
            env: HashMap::new(),
            watch: false,
            watch_dir: None,
            instances: 1,
            exec_mode: ExecMode::Fork,
            autorestart: true,
            max_restarts: 10,
            restart_delay_secs: 1,
            stop_signal: "SIGTERM".to_string(),
            stop_timeout_secs: 10,
        }
    }

    #[test]
    fn test_spec_defaults() {
        let spec = test_spec("test");

        assert_eq!(spec.instances, 1);
        assert_eq!(spec.exec_mode, ExecMode::Fork);
        assert!(spec.autorestart);
        assert_eq!(spec.max_restarts, 10);
        assert_eq!(spec.restart_delay_secs, 1);
        assert_eq!(spec.stop_signal, "SIGTERM");
        assert_eq!(spec.stop_timeout_secs, 10);
    }

    #[test]
    fn test_validate_valid_spec() {
        let spec = test_spec("test");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_name() {
        let spec = test_spec("");

        assert!(matches!(
            spec.validate(),
            Err(WardenError::MissingConfigField(_))
        ));
    }

    #[test]
    fn test_validate_zero_instances() {
        let mut spec = test_spec("test");
        spec.instances = 0;

        assert!(matches!(
            spec.validate(),
            Err(WardenError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_validate_too_many_instances() {
        let mut spec = test_spec("test");
        spec.instances = 101;

        assert!(matches!(
            spec.validate(),
            Err(WardenError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_validate_invalid_signal() {
        let mut spec = test_spec("test");
        spec.stop_signal = "INVALID".to_string();

        assert!(matches!(
            spec.validate(),
            Err(WardenError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_validate_missing_watch_dir() {
        let mut spec = test_spec("test");
        spec.watch = true;
        spec.watch_dir = Some(PathBuf::from("/nonexistent/watch/dir"));

        assert!(matches!(
            spec.validate(),
            Err(WardenError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_watch_root_defaults_to_script_dir() {
        let mut spec = test_spec("test");
        spec.script = PathBuf::from("/opt/app/bin/server");
        spec.watch = true;

        assert_eq!(spec.watch_root(), Some(PathBuf::from("/opt/app/bin")));
    }

    #[test]
    fn test_watch_root_disabled() {
        let spec = test_spec("test");
        assert_eq!(spec.watch_root(), None);
    }

    #[test]
    fn test_watch_root_override() {
        let temp_dir = TempDir::new().unwrap();
        let mut spec = test_spec("test");
        spec.watch = true;
        spec.watch_dir = Some(temp_dir.path().to_path_buf());

        assert_eq!(spec.watch_root(), Some(temp_dir.path().to_path_buf()));
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("WARDEN_TEST_VAR", "test_value");
        std::env::set_var("WARDEN_TEST_PATH", "/tmp");

        let mut spec = test_spec("test");
        spec.script = PathBuf::from("$WARDEN_TEST_PATH/script.sh");
        spec.args = vec!["--arg=${WARDEN_TEST_VAR}".to_string()];
        spec.cwd = Some(PathBuf::from("${WARDEN_TEST_PATH}"));
        spec.env
            .insert("KEY".to_string(), "$WARDEN_TEST_VAR".to_string());

        spec.expand_env_vars();

        assert_eq!(spec.script, PathBuf::from("/tmp/script.sh"));
        assert_eq!(spec.args[0], "--arg=test_value");
        assert_eq!(spec.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(spec.env.get("KEY"), Some(&"test_value".to_string()));
    }

    #[test]
    fn test_parse_toml_single() {
        let toml_content = r#"
            name = "my-app"
            script = "/usr/bin/node"
            args = ["server.js"]
            instances = 2
            exec_mode = "cluster"
        "#;

        let specs = ProcessSpec::parse_toml(toml_content).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "my-app");
        assert_eq!(specs[0].instances, 2);
        assert_eq!(specs[0].exec_mode, ExecMode::Cluster);
    }

    #[test]
    fn test_parse_toml_multiple() {
        let toml_content = r#"
            [[processes]]
            name = "app1"
            script = "/usr/bin/node"
            args = ["server.js"]

            [[processes]]
            name = "app2"
            script = "/usr/bin/python"
            args = ["worker.py"]
            watch = true
        "#;

        let specs = ProcessSpec::parse_toml(toml_content).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "app1");
        assert_eq!(specs[1].name, "app2");
        assert!(specs[1].watch);
    }

    #[test]
    fn test_parse_json_single() {
        let json_content = r#"
            {
                "name": "my-app",
                "script": "/usr/bin/node",
                "args": ["server.js"],
                "instances": 2,
                "env": { "NODE_ENV": "production" }
            }
        "#;

        let specs = ProcessSpec::parse_json(json_content).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "my-app");
        assert_eq!(specs[0].instances, 2);
        assert_eq!(
            specs[0].env.get("NODE_ENV"),
            Some(&"production".to_string())
        );
    }

    #[test]
    fn test_parse_json_multiple() {
        let json_content = r#"
            {
                "processes": [
                    {
                        "name": "app1",
                        "script": "/usr/bin/node",
                        "args": ["server.js"]
                    },
                    {
                        "name": "app2",
                        "script": "/usr/bin/python",
                        "args": ["worker.py"]
                    }
                ]
            }
        "#;

        let specs = ProcessSpec::parse_json(json_content).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "app1");
        assert_eq!(specs[1].name, "app2");
    }

    #[test]
    fn test_from_file_toml() {
        let temp_dir = TempDir::new().unwrap();
        let spec_path = temp_dir.path().join("procs.toml");

        let toml_content = r#"
            name = "test-app"
            script = "/bin/echo"
            args = ["hello"]
        "#;

        fs::write(&spec_path, toml_content).unwrap();

        let specs = ProcessSpec::from_file(&spec_path).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "test-app");
    }

    #[test]
    fn test_from_file_json() {
        let temp_dir = TempDir::new().unwrap();
        let spec_path = temp_dir.path().join("procs.json");

        let json_content = r#"
            {
                "name": "test-app",
                "script": "/bin/echo",
                "args": ["hello"]
            }
        "#;

        fs::write(&spec_path, json_content).unwrap();

        let specs = ProcessSpec::from_file(&spec_path).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "test-app");
    }

    #[test]
    fn test_from_file_unsupported_format() {
        let temp_dir = TempDir::new().unwrap();
        let spec_path = temp_dir.path().join("procs.yaml");

        fs::write(&spec_path, "name: test").unwrap();

        let result = ProcessSpec::from_file(&spec_path);
        assert!(matches!(result, Err(WardenError::InvalidConfig(_))));
    }
}
