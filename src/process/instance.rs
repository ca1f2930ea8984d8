use crate::config::ProcessSpec;
use crate::process::restart::{RestartHistory, RestartPolicy};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Unique identifier for a supervised instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl InstanceId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a supervised instance
///
/// Starting -> Running -> (Stopping -> Stopped) on request, or
/// Starting/Running -> Crashed -> Restarting -> Starting on an unexpected
/// exit. Stopped and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
    Restarting,
    Failed,
}

impl InstanceState {
    /// Whether the instance has a live child process
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            InstanceState::Starting | InstanceState::Running | InstanceState::Stopping
        )
    }

    /// Whether the instance has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceState::Stopped | InstanceState::Failed)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Starting => write!(f, "starting"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Stopping => write!(f, "stopping"),
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::Crashed => write!(f, "crashed"),
            InstanceState::Restarting => write!(f, "restarting"),
            InstanceState::Failed => write!(f, "failed"),
        }
    }
}

/// Runtime counters and resource usage for an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStats {
    pub pid: u32,
    pub started_at: SystemTime,
    pub restarts: usize,
    pub last_restart: Option<SystemTime>,
    pub cpu_usage: f32,
    pub memory_usage: u64,
}

impl InstanceStats {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            started_at: SystemTime::now(),
            restarts: 0,
            last_restart: None,
            cpu_usage: 0.0,
            memory_usage: 0,
        }
    }

    pub fn uptime(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.started_at)
            .unwrap_or(Duration::from_secs(0))
    }

    /// Reset the run-scoped counters after a relaunch
    pub fn record_restart(&mut self, new_pid: u32) {
        self.restarts += 1;
        self.last_restart = Some(SystemTime::now());
        self.started_at = SystemTime::now();
        self.pid = new_pid;
        self.cpu_usage = 0.0;
        self.memory_usage = 0;
    }
}

/// One supervised child process
///
/// Owned exclusively by the supervisor control loop; the OS child handle
/// lives in a detached reaper task, so nothing here blocks on the child.
#[derive(Debug)]
pub struct ProcessInstance {
    pub id: InstanceId,
    /// Display name, unique per instance (group name plus index)
    pub name: String,
    /// Name of the spec this instance belongs to
    pub group: String,
    /// 0-based index within the group
    pub index: usize,
    pub spec: ProcessSpec,
    pub state: InstanceState,
    pub stats: InstanceStats,
    pub restart_policy: RestartPolicy,
    pub restart_history: RestartHistory,
    /// Set while a stop is in flight that should be followed by a relaunch
    pub pending_restart: bool,
}

impl ProcessInstance {
    pub fn new(id: InstanceId, spec: ProcessSpec, index: usize, pid: u32) -> Self {
        let restart_policy = RestartPolicy::from_spec(&spec);
        let name = instance_name(&spec.name, index, spec.instances);

        Self {
            id,
            name,
            group: spec.name.clone(),
            index,
            spec,
            state: InstanceState::Starting,
            stats: InstanceStats::new(pid),
            restart_policy,
            restart_history: RestartHistory::new(),
            pending_restart: false,
        }
    }

    pub fn mark_starting(&mut self) {
        self.state = InstanceState::Starting;
    }

    pub fn mark_running(&mut self) {
        self.state = InstanceState::Running;
    }

    pub fn mark_stopping(&mut self) {
        self.state = InstanceState::Stopping;
    }

    pub fn mark_stopped(&mut self) {
        self.state = InstanceState::Stopped;
        self.pending_restart = false;
    }

    pub fn mark_crashed(&mut self) {
        self.state = InstanceState::Crashed;
    }

    pub fn mark_restarting(&mut self) {
        self.state = InstanceState::Restarting;
    }

    pub fn mark_failed(&mut self) {
        self.state = InstanceState::Failed;
        self.pending_restart = false;
    }
}

/// Display name for one instance of a group
///
/// Single-instance groups keep the bare group name; multi-instance groups
/// get a `-<index>` suffix.
pub fn instance_name(group: &str, index: usize, instances: usize) -> String {
    if instances > 1 {
        format!("{}-{}", group, index)
    } else {
        group.to_string()
    }
}

/// Serializable view of an instance for callers outside the control loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    pub id: InstanceId,
    pub name: String,
    pub group: String,
    pub index: usize,
    pub state: InstanceState,
    pub stats: InstanceStats,
}

impl From<&ProcessInstance> for InstanceSnapshot {
    fn from(instance: &ProcessInstance) -> Self {
        Self {
            id: instance.id,
            name: instance.name.clone(),
            group: instance.group.clone(),
            index: instance.index,
            state: instance.state,
            stats: instance.stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecMode;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn test_spec(name: &str, instances: usize) -> ProcessSpec {
        ProcessSpec {
            name: name.to_string(),
            script: PathBuf::from("/bin/sleep"),
            args: vec!["10".to_string()],
            cwd: None,
            env: HashMap::new(),
            watch: false,
            watch_dir: None,
            instances,
            exec_mode: ExecMode::Fork,
            autorestart: true,
            max_restarts: 10,
            restart_delay_secs: 1,
            stop_signal: "SIGTERM".to_string(),
            stop_timeout_secs: 10,
        }
    }

    #[test]
    fn test_new_instance_is_starting() {
        let instance = ProcessInstance::new(InstanceId::new(1), test_spec("web", 1), 0, 1234);

        assert_eq!(instance.state, InstanceState::Starting);
        assert_eq!(instance.name, "web");
        assert_eq!(instance.group, "web");
        assert_eq!(instance.stats.pid, 1234);
        assert_eq!(instance.stats.restarts, 0);
        assert!(!instance.pending_restart);
    }

    #[test]
    fn test_instance_naming() {
        assert_eq!(instance_name("web", 0, 1), "web");
        assert_eq!(instance_name("web", 0, 4), "web-0");
        assert_eq!(instance_name("web", 3, 4), "web-3");
    }

    #[test]
    fn test_state_transitions() {
        let mut instance = ProcessInstance::new(InstanceId::new(1), test_spec("web", 1), 0, 1234);

        instance.mark_running();
        assert_eq!(instance.state, InstanceState::Running);
        assert!(instance.state.is_live());

        instance.mark_stopping();
        assert_eq!(instance.state, InstanceState::Stopping);
        assert!(instance.state.is_live());

        instance.mark_stopped();
        assert_eq!(instance.state, InstanceState::Stopped);
        assert!(instance.state.is_terminal());
        assert!(!instance.state.is_live());
    }

    #[test]
    fn test_crash_states_are_not_live() {
        let mut instance = ProcessInstance::new(InstanceId::new(1), test_spec("web", 1), 0, 1234);

        instance.mark_crashed();
        assert!(!instance.state.is_live());
        assert!(!instance.state.is_terminal());

        instance.mark_restarting();
        assert!(!instance.state.is_live());

        instance.mark_failed();
        assert!(instance.state.is_terminal());
    }

    #[test]
    fn test_mark_stopped_clears_pending_restart() {
        let mut instance = ProcessInstance::new(InstanceId::new(1), test_spec("web", 1), 0, 1234);
        instance.pending_restart = true;

        instance.mark_stopped();
        assert!(!instance.pending_restart);
    }

    #[test]
    fn test_stats_record_restart() {
        let mut stats = InstanceStats::new(100);
        stats.cpu_usage = 12.5;
        stats.memory_usage = 4096;

        stats.record_restart(200);

        assert_eq!(stats.pid, 200);
        assert_eq!(stats.restarts, 1);
        assert!(stats.last_restart.is_some());
        assert_eq!(stats.cpu_usage, 0.0);
        assert_eq!(stats.memory_usage, 0);
    }

    #[test]
    fn test_snapshot_from_instance() {
        let mut instance = ProcessInstance::new(InstanceId::new(7), test_spec("api", 2), 1, 4321);
        instance.mark_running();

        let snapshot = InstanceSnapshot::from(&instance);
        assert_eq!(snapshot.id, InstanceId::new(7));
        assert_eq!(snapshot.name, "api-1");
        assert_eq!(snapshot.group, "api");
        assert_eq!(snapshot.index, 1);
        assert_eq!(snapshot.state, InstanceState::Running);
        assert_eq!(snapshot.stats.pid, 4321);
    }
}
