use crate::process::instance::{InstanceState, ProcessInstance};
use sysinfo::{Pid, ProcessRefreshKind, System};

/// Samples cpu and memory usage for running instances
///
/// Exit detection is handled by the per-child reaper tasks; the sampler only
/// feeds the stats exposed in snapshots.
pub struct StatsSampler {
    system: System,
}

impl StatsSampler {
    pub fn new() -> Self {
        Self {
            system: System::new_all(),
        }
    }

    /// Refresh cpu/memory stats for all running instances
    pub fn refresh<'a, I>(&mut self, instances: I)
    where
        I: Iterator<Item = &'a mut ProcessInstance>,
    {
        // Refresh all processes at once for efficiency
        self.system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );

        for instance in instances {
            if instance.state != InstanceState::Running {
                continue;
            }

            let sys_pid = Pid::from_u32(instance.stats.pid);
            if let Some(sys_process) = self.system.process(sys_pid) {
                instance.stats.cpu_usage = sys_process.cpu_usage();
                instance.stats.memory_usage = sys_process.memory();
            }
        }
    }
}

impl Default for StatsSampler {
    fn default() -> Self {
        Self::new()
    }
}
