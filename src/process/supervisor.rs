use crate::config::ProcessSpec;
use crate::error::{Result, WardenError};
use crate::logs::LogRouter;
use crate::process::instance::{InstanceId, InstanceSnapshot, InstanceState, ProcessInstance};
use crate::process::launcher;
use crate::process::monitor::StatsSampler;
use crate::watch::{ChangeEvent, WatchTrigger};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Options governing a supervisor's control loop
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Directory for captured process output
    pub log_dir: PathBuf,
    /// How often to refresh cpu/memory stats (in seconds)
    pub stats_interval_secs: u64,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            log_dir: std::env::temp_dir().join("warden-logs"),
            stats_interval_secs: 2,
        }
    }
}

/// Requests sent from external callers to the control loop
enum Command {
    Start {
        spec: ProcessSpec,
        reply: oneshot::Sender<Result<Vec<InstanceId>>>,
    },
    Stop {
        id: InstanceId,
        reply: oneshot::Sender<Result<()>>,
    },
    Restart {
        id: InstanceId,
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        id: InstanceId,
        reply: oneshot::Sender<Option<InstanceSnapshot>>,
    },
    List {
        reply: oneshot::Sender<Vec<InstanceSnapshot>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Internal events delivered to the control loop by detached tasks
enum Event {
    /// A child process exited; status is None when the wait itself failed
    Exited {
        id: InstanceId,
        status: Option<ExitStatus>,
    },
    /// A restart backoff timer elapsed
    RestartDue { id: InstanceId },
    /// The grace period for a stopping instance elapsed
    StopTimeout { id: InstanceId },
}

/// Cloneable handle for talking to a running supervisor
///
/// All methods are message passing: the command is queued for the control
/// loop and the reply awaited. Every method fails with
/// `WardenError::SupervisorGone` once the loop has exited.
#[derive(Clone)]
pub struct SupervisorHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl SupervisorHandle {
    /// Start all instances of a process spec
    ///
    /// Launches `spec.instances` children. Each comes up Starting and is
    /// Running by the time this returns. If any launch fails the already
    /// launched siblings are torn down and the error is returned.
    ///
    /// # Returns
    /// * `Ok(Vec<InstanceId>)` - exactly `spec.instances` new instance ids
    /// * `Err(WardenError)` - validation or launch failure
    pub async fn start(&self, spec: ProcessSpec) -> Result<Vec<InstanceId>> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Start { spec, reply })
            .await
            .map_err(|_| WardenError::SupervisorGone)?;
        rx.await.map_err(|_| WardenError::SupervisorGone)?
    }

    /// Request a graceful stop of one instance
    ///
    /// Sends the spec's stop signal, falling back to SIGKILL after the
    /// grace period. Fails with `WardenError::NotRunning` when the instance
    /// is unknown or already terminal.
    pub async fn stop(&self, id: InstanceId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Stop { id, reply })
            .await
            .map_err(|_| WardenError::SupervisorGone)?;
        rx.await.map_err(|_| WardenError::SupervisorGone)?
    }

    /// Request a stop-then-relaunch of one instance
    ///
    /// The relaunch happens once the old child has exited; poll `status`
    /// to observe the new run.
    pub async fn restart(&self, id: InstanceId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Restart { id, reply })
            .await
            .map_err(|_| WardenError::SupervisorGone)?;
        rx.await.map_err(|_| WardenError::SupervisorGone)?
    }

    /// Snapshot of one instance, if it exists
    pub async fn status(&self, id: InstanceId) -> Result<Option<InstanceSnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Status { id, reply })
            .await
            .map_err(|_| WardenError::SupervisorGone)?;
        rx.await.map_err(|_| WardenError::SupervisorGone)
    }

    /// Snapshots of all instances, ordered by id
    pub async fn list(&self) -> Result<Vec<InstanceSnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::List { reply })
            .await
            .map_err(|_| WardenError::SupervisorGone)?;
        rx.await.map_err(|_| WardenError::SupervisorGone)
    }

    /// Stop every live instance and end the control loop
    ///
    /// Cancels watchers and pending restart timers, stops all instances
    /// within the grace period (force killing stragglers) and returns once
    /// the loop has drained. No instance is Running afterwards.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| WardenError::SupervisorGone)?;
        rx.await.map_err(|_| WardenError::SupervisorGone)
    }
}

/// Owns and supervises process instances
///
/// All instances live inside the control-loop task; external callers go
/// through a `SupervisorHandle`. Launching, exit reaping and every timer run
/// as detached tasks that report back over the event channel, so the loop
/// itself never blocks. Restarts for one instance are sequential by
/// construction: the single loop drives each instance through its state
/// machine one event at a time.
pub struct Supervisor {
    instances: HashMap<InstanceId, ProcessInstance>,
    next_id: u64,
    logs: LogRouter,
    sampler: StatsSampler,
    event_tx: mpsc::Sender<Event>,
    watch_tx: mpsc::Sender<ChangeEvent>,
    /// One active watch trigger per watched group
    watchers: HashMap<String, WatchTrigger>,
    shutting_down: bool,
}

impl Supervisor {
    /// Start the supervisor control loop and return a handle to it
    pub async fn start(options: SupervisorOptions) -> Result<SupervisorHandle> {
        let logs = LogRouter::new(&options.log_dir).await?;

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (watch_tx, watch_rx) = mpsc::channel(64);

        let supervisor = Supervisor {
            instances: HashMap::new(),
            next_id: 1,
            logs,
            sampler: StatsSampler::new(),
            event_tx,
            watch_tx,
            watchers: HashMap::new(),
            shutting_down: false,
        };

        tokio::spawn(supervisor.run(cmd_rx, event_rx, watch_rx, options.stats_interval_secs));

        Ok(SupervisorHandle { cmd_tx })
    }

    /// The control loop: commands, child exits, timers, watch events, stats
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut event_rx: mpsc::Receiver<Event>,
        mut watch_rx: mpsc::Receiver<ChangeEvent>,
        stats_interval_secs: u64,
    ) {
        let mut stats_tick =
            tokio::time::interval(Duration::from_secs(stats_interval_secs.max(1)));
        stats_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown(&mut event_rx).await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        // All handles dropped; treat as shutdown
                        self.shutdown(&mut event_rx).await;
                        break;
                    }
                },
                Some(event) = event_rx.recv() => self.handle_event(event).await,
                Some(change) = watch_rx.recv() => self.handle_change(&change.group).await,
                _ = stats_tick.tick() => self.sampler.refresh(self.instances.values_mut()),
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { spec, reply } => {
                let result = self.start_group(spec).await;
                let _ = reply.send(result);
            }
            Command::Stop { id, reply } => {
                let _ = reply.send(self.initiate_stop(id, false));
            }
            Command::Restart { id, reply } => {
                let _ = reply.send(self.initiate_stop(id, true));
            }
            Command::Status { id, reply } => {
                let _ = reply.send(self.instances.get(&id).map(InstanceSnapshot::from));
            }
            Command::List { reply } => {
                let mut list: Vec<InstanceSnapshot> =
                    self.instances.values().map(InstanceSnapshot::from).collect();
                list.sort_by_key(|s| s.id);
                let _ = reply.send(list);
            }
            // Handled by the run loop
            Command::Shutdown { .. } => {}
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Exited { id, status } => self.handle_exit(id, status).await,
            Event::RestartDue { id } => self.handle_restart_due(id).await,
            Event::StopTimeout { id } => self.handle_stop_timeout(id),
        }
    }

    /// Launch every instance of a spec and register its watch trigger
    async fn start_group(&mut self, spec: ProcessSpec) -> Result<Vec<InstanceId>> {
        spec.validate()?;

        if self
            .instances
            .values()
            .any(|i| i.group == spec.name && !i.state.is_terminal())
        {
            return Err(WardenError::GroupAlreadyExists(spec.name.clone()));
        }

        let mut ids = Vec::with_capacity(spec.instances);
        for index in 0..spec.instances {
            match self.launch_instance(&spec, index).await {
                Ok(id) => ids.push(id),
                Err(e) => {
                    // Tear down the siblings launched so far
                    self.abort_partial(&ids);
                    return Err(e);
                }
            }
        }

        if spec.watch {
            if let Some(root) = spec.watch_root() {
                let trigger =
                    WatchTrigger::spawn(spec.name.clone(), root, self.watch_tx.clone());
                self.watchers.insert(spec.name.clone(), trigger);
            }
        }

        info!(
            group = %spec.name,
            instances = spec.instances,
            mode = %spec.exec_mode,
            "process group started"
        );

        Ok(ids)
    }

    /// Launch one instance: spawn, wire log capture, spawn the reaper
    async fn launch_instance(&mut self, spec: &ProcessSpec, index: usize) -> Result<InstanceId> {
        let launched = launcher::launch(spec, index).await?;

        let id = InstanceId::new(self.next_id);
        self.next_id += 1;

        let mut instance = ProcessInstance::new(id, spec.clone(), index, launched.pid);
        let mut child = launched.child;

        if let Err(e) = self.logs.attach(&instance.name, &mut child).await {
            warn!(instance = %instance.name, "failed to attach log capture: {}", e);
        }
        self.spawn_reaper(id, child);

        instance.mark_running();
        info!(instance = %instance.name, pid = launched.pid, "instance running");

        self.instances.insert(id, instance);
        Ok(id)
    }

    /// Wait for the child in a detached task and report its exit
    fn spawn_reaper(&self, id: InstanceId, mut child: Child) {
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let status = child.wait().await.ok();
            let _ = event_tx.send(Event::Exited { id, status }).await;
        });
    }

    /// Force kill instances from a partially started group
    fn abort_partial(&mut self, ids: &[InstanceId]) {
        for &id in ids {
            if let Some(instance) = self.instances.get_mut(&id) {
                warn!(instance = %instance.name, "aborting partially started group");
                let _ = send_signal(instance.stats.pid, Signal::SIGKILL);
                instance.mark_stopped();
            }
        }
    }

    /// Relaunch an instance in place, keeping its id, name and history
    async fn relaunch(&mut self, id: InstanceId) -> Result<()> {
        let (spec, index, name) = match self.instances.get(&id) {
            Some(i) => (i.spec.clone(), i.index, i.name.clone()),
            None => return Err(WardenError::InstanceNotFound(id.to_string())),
        };

        let launched = launcher::launch(&spec, index).await?;
        let mut child = launched.child;

        if let Err(e) = self.logs.attach(&name, &mut child).await {
            warn!(instance = %name, "failed to attach log capture: {}", e);
        }
        self.spawn_reaper(id, child);

        if let Some(instance) = self.instances.get_mut(&id) {
            instance.mark_starting();
            instance.stats.record_restart(launched.pid);
            instance.mark_running();
            info!(
                instance = %name,
                pid = launched.pid,
                restarts = instance.stats.restarts,
                "instance relaunched"
            );
        }

        Ok(())
    }

    /// Begin stopping an instance; `restart_after` relaunches it on exit
    fn initiate_stop(&mut self, id: InstanceId, restart_after: bool) -> Result<()> {
        let instance = self
            .instances
            .get_mut(&id)
            .ok_or_else(|| WardenError::NotRunning(id.to_string()))?;

        match instance.state {
            InstanceState::Stopping => {
                // Already on its way down; a plain stop overrides a restart
                if !restart_after {
                    instance.pending_restart = false;
                }
                Ok(())
            }
            InstanceState::Restarting | InstanceState::Crashed => {
                // No live child. A restart request leaves the pending
                // relaunch in place; a stop cancels it.
                if !restart_after {
                    instance.mark_stopped();
                    info!(instance = %instance.name, "pending restart cancelled, instance stopped");
                    let group = instance.group.clone();
                    self.prune_watcher(&group);
                }
                Ok(())
            }
            InstanceState::Stopped | InstanceState::Failed => {
                Err(WardenError::NotRunning(instance.name.clone()))
            }
            InstanceState::Starting | InstanceState::Running => {
                let stop_signal = parse_signal(&instance.spec.stop_signal)?;

                instance.pending_restart = restart_after;
                instance.mark_stopping();

                let pid = instance.stats.pid;
                let name = instance.name.clone();
                let grace = instance.spec.stop_timeout();

                info!(
                    instance = %name,
                    pid,
                    signal = %instance.spec.stop_signal,
                    "stopping instance"
                );

                send_signal(pid, stop_signal)
                    .map_err(|e| WardenError::Stop(name, e.to_string()))?;

                // Force-kill fallback once the grace period elapses
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    let _ = event_tx.send(Event::StopTimeout { id }).await;
                });

                Ok(())
            }
        }
    }

    /// React to a child exit reported by its reaper task
    async fn handle_exit(&mut self, id: InstanceId, status: Option<ExitStatus>) {
        let (state, ran_for, name) = match self.instances.get(&id) {
            Some(i) => (i.state, i.stats.uptime(), i.name.clone()),
            None => return,
        };

        match state {
            InstanceState::Stopping => {
                let pending = self
                    .instances
                    .get(&id)
                    .map(|i| i.pending_restart)
                    .unwrap_or(false);

                if pending && !self.shutting_down {
                    if let Some(instance) = self.instances.get_mut(&id) {
                        instance.pending_restart = false;
                        instance.mark_restarting();
                    }
                    info!(instance = %name, "instance exited, relaunching");
                    if let Err(e) = self.relaunch(id).await {
                        error!(instance = %name, "relaunch failed: {}", e);
                        self.consider_restart(id, None).await;
                    }
                } else {
                    if let Some(instance) = self.instances.get_mut(&id) {
                        instance.mark_stopped();
                    }
                    info!(instance = %name, "instance stopped");
                    self.prune_watcher_for(id);
                }
            }
            InstanceState::Starting | InstanceState::Running => {
                let clean = status.map(|s| s.success()).unwrap_or(false);

                if clean {
                    // A clean exit is not a crash; never restart for it
                    if let Some(instance) = self.instances.get_mut(&id) {
                        instance.mark_stopped();
                    }
                    info!(instance = %name, "instance exited cleanly");
                    self.prune_watcher_for(id);
                } else {
                    if let Some(instance) = self.instances.get_mut(&id) {
                        instance.mark_crashed();
                    }
                    warn!(
                        instance = %name,
                        code = status.and_then(|s| s.code()),
                        "instance crashed"
                    );
                    self.consider_restart(id, Some(ran_for)).await;
                }
            }
            _ => {
                debug!(instance = %name, "ignoring stale exit event");
            }
        }
    }

    /// Decide between scheduling a backoff relaunch and failing the instance
    async fn consider_restart(&mut self, id: InstanceId, ran_for: Option<Duration>) {
        let instance = match self.instances.get_mut(&id) {
            Some(i) => i,
            None => return,
        };

        // A run that stayed up long enough clears the crash streak
        if let Some(ran_for) = ran_for {
            if ran_for >= instance.restart_policy.stable_uptime() {
                instance.restart_history.mark_stable();
            }
        }

        if !instance.restart_policy.enabled {
            // Unexpected exit with autorestart disabled is a terminal stop
            instance.mark_stopped();
            info!(instance = %instance.name, "instance crashed, autorestart disabled");
            let group = instance.group.clone();
            self.prune_watcher(&group);
            return;
        }

        if instance.restart_policy.allows(&instance.restart_history) {
            let delay = instance.restart_policy.delay(&instance.restart_history);
            instance.restart_history.record();
            instance.mark_restarting();

            info!(
                instance = %instance.name,
                attempt = instance.restart_history.streak(),
                delay_ms = delay.as_millis() as u64,
                "scheduling restart"
            );

            let event_tx = self.event_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = event_tx.send(Event::RestartDue { id }).await;
            });
        } else {
            let err = WardenError::RestartLimitExceeded(instance.name.clone());
            instance.mark_failed();
            error!(instance = %instance.name, "{}", err);

            let group = instance.group.clone();
            self.prune_watcher(&group);
        }
    }

    /// A backoff timer elapsed; relaunch unless the state moved on
    async fn handle_restart_due(&mut self, id: InstanceId) {
        match self.instances.get(&id) {
            Some(i) if i.state == InstanceState::Restarting => {}
            _ => {
                debug!(%id, "ignoring stale restart timer");
                return;
            }
        }

        if let Err(e) = self.relaunch(id).await {
            if let Some(instance) = self.instances.get(&id) {
                error!(instance = %instance.name, "relaunch failed: {}", e);
            }
            // Launch failures retry under the same policy
            self.consider_restart(id, None).await;
        }
    }

    /// The grace period for a stopping instance elapsed; force kill it
    fn handle_stop_timeout(&mut self, id: InstanceId) {
        let instance = match self.instances.get(&id) {
            Some(i) => i,
            None => return,
        };

        if instance.state != InstanceState::Stopping {
            return;
        }

        warn!(
            instance = %instance.name,
            pid = instance.stats.pid,
            "grace period expired, sending SIGKILL"
        );
        let _ = send_signal(instance.stats.pid, Signal::SIGKILL);
    }

    /// A watch trigger reported changes; restart the group's live instances
    async fn handle_change(&mut self, group: &str) {
        if self.shutting_down {
            return;
        }

        let ids: Vec<InstanceId> = self
            .instances
            .values()
            .filter(|i| {
                i.group == group
                    && matches!(i.state, InstanceState::Starting | InstanceState::Running)
            })
            .map(|i| i.id)
            .collect();

        if ids.is_empty() {
            return;
        }

        info!(group, count = ids.len(), "restarting instances after file change");

        for id in ids {
            if let Err(e) = self.initiate_stop(id, true) {
                warn!(%id, "watch restart failed: {}", e);
            }
        }
    }

    /// Drop a group's watcher once none of its instances can run again
    fn prune_watcher(&mut self, group: &str) {
        let group_active = self
            .instances
            .values()
            .any(|i| i.group == group && !i.state.is_terminal());

        if !group_active && self.watchers.remove(group).is_some() {
            debug!(group, "watch trigger removed");
        }
    }

    fn prune_watcher_for(&mut self, id: InstanceId) {
        if let Some(group) = self.instances.get(&id).map(|i| i.group.clone()) {
            self.prune_watcher(&group);
        }
    }

    /// Stop everything, drain exit events, then let the loop end
    async fn shutdown(&mut self, event_rx: &mut mpsc::Receiver<Event>) {
        self.shutting_down = true;
        self.watchers.clear();

        let live: Vec<InstanceId> = self
            .instances
            .values()
            .filter(|i| !i.state.is_terminal())
            .map(|i| i.id)
            .collect();

        info!(count = live.len(), "shutting down supervisor");

        // Overall grace: the longest per-instance timeout plus slack
        let mut grace = Duration::from_secs(1);
        for id in &live {
            if let Some(instance) = self.instances.get(id) {
                grace = grace.max(instance.spec.stop_timeout() + Duration::from_secs(2));
            }
        }

        for id in live {
            if let Err(e) = self.initiate_stop(id, false) {
                debug!(%id, "shutdown stop skipped: {}", e);
            }
        }

        let deadline = Instant::now() + grace;
        while self
            .instances
            .values()
            .any(|i| i.state == InstanceState::Stopping)
        {
            match tokio::time::timeout_at(deadline, event_rx.recv()).await {
                Ok(Some(event)) => self.handle_event(event).await,
                Ok(None) => break,
                Err(_) => {
                    // Grace expired: force kill the stragglers
                    for instance in self.instances.values_mut() {
                        if instance.state == InstanceState::Stopping {
                            warn!(instance = %instance.name, "force killing at shutdown");
                            let _ = send_signal(instance.stats.pid, Signal::SIGKILL);
                            instance.mark_stopped();
                        }
                    }
                    break;
                }
            }
        }

        info!("supervisor shutdown complete");
    }
}

/// Deliver a signal to a pid
fn send_signal(pid: u32, sig: Signal) -> Result<()> {
    signal::kill(Pid::from_raw(pid as i32), sig).map_err(|e| {
        WardenError::Signal(format!("Failed to send {} to pid {}: {}", sig, pid, e))
    })
}

/// Map a configured signal name to a Signal
fn parse_signal(signal_name: &str) -> Result<Signal> {
    match signal_name {
        "SIGTERM" => Ok(Signal::SIGTERM),
        "SIGINT" => Ok(Signal::SIGINT),
        "SIGQUIT" => Ok(Signal::SIGQUIT),
        "SIGKILL" => Ok(Signal::SIGKILL),
        "SIGHUP" => Ok(Signal::SIGHUP),
        "SIGUSR1" => Ok(Signal::SIGUSR1),
        "SIGUSR2" => Ok(Signal::SIGUSR2),
        _ => Err(WardenError::Signal(format!(
            "Invalid signal name: {}",
            signal_name
        ))),
    }
}
