//! [`ProcessFacade`] backed by the `odo` command-line tool.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, watch};

use super::describe::ComponentDescription;
use super::exec::{display_command, run_tool, run_with_deadline};
use super::{LifecycleCallbacks, ProcessError, ProcessFacade};
use crate::models::{BaseFeature, ComponentFeature, ComponentKey, Platform};

/// Line printed by `odo dev` once the first sync finished.
pub const DEFAULT_READY_MARKER: &str = "Watching for changes in the current directory";

/// How to invoke the tool and how long to wait for it.
#[derive(Debug, Clone)]
pub struct OdoSettings {
    pub binary: PathBuf,
    /// Bound for short commands such as `describe`.
    pub probe_timeout: Duration,
    /// Bound for confirming a stop.
    pub stop_timeout: Duration,
    /// Stdout text that marks a dev session as ready.
    pub ready_marker: String,
}

impl Default for OdoSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("odo"),
            probe_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(60),
            ready_marker: DEFAULT_READY_MARKER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopSignal {
    Interrupt,
    Kill,
}

/// A dev loop launched by this facade.
struct DevSession {
    feature: ComponentFeature,
    pid: Option<u32>,
    stop_tx: mpsc::UnboundedSender<StopSignal>,
    stop_requests: AtomicUsize,
    exited: watch::Receiver<bool>,
}

type SessionKey = (ComponentKey, BaseFeature);

/// Drives `odo dev`, `odo describe` and `odo delete` for components.
///
/// Sessions launched here are tracked so they can be probed and stopped
/// directly; anything else is probed and stopped through the tool.
#[derive(Clone)]
pub struct OdoCli {
    settings: Arc<OdoSettings>,
    sessions: Arc<DashMap<SessionKey, DevSession>>,
}

impl OdoCli {
    pub fn new(settings: OdoSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn settings(&self) -> &OdoSettings {
        &self.settings
    }

    /// Ask the tool about a component.
    pub async fn describe(
        &self,
        component: &ComponentKey,
    ) -> Result<ComponentDescription, ProcessError> {
        let args = describe_args(component);
        let output = run_tool(
            &self.settings.binary,
            &args,
            &component.path,
            self.settings.probe_timeout,
        )
        .await?;
        ComponentDescription::parse(&output.stdout).map_err(|e| {
            ProcessError::tool(
                display_command(&self.settings.binary, &args),
                format!("malformed describe output: {}", e),
            )
        })
    }

    /// Sessions currently launched by this facade.
    pub fn active_sessions(&self) -> Vec<(ComponentKey, ComponentFeature)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().0.clone(), entry.value().feature))
            .collect()
    }

    /// Interrupt every launched session without waiting.
    pub fn interrupt_all(&self) {
        for entry in self.sessions.iter() {
            tracing::info!(
                "Interrupting {} for {} (pid {:?})",
                entry.value().feature,
                entry.key().0,
                entry.value().pid
            );
            let _ = entry.value().stop_tx.send(StopSignal::Interrupt);
        }
    }

    async fn delete_untracked(
        &self,
        component: &ComponentKey,
        feature: ComponentFeature,
    ) -> Result<(), ProcessError> {
        let args = delete_args(component, feature);
        tracing::info!(
            "No local session for {} on {}, asking odo to delete it",
            feature,
            component
        );
        let finished = run_with_deadline(
            &self.settings.binary,
            &args,
            &component.path,
            self.settings.stop_timeout,
        )
        .await?;
        match finished {
            Some(_) => Ok(()),
            None => Err(ProcessError::StopTimeout {
                component: component.to_string(),
                timeout: self.settings.stop_timeout,
            }),
        }
    }
}

#[async_trait]
impl ProcessFacade for OdoCli {
    async fn is_running(
        &self,
        component: &ComponentKey,
        feature: ComponentFeature,
    ) -> Result<bool, ProcessError> {
        let tracked = self
            .sessions
            .get(&(component.clone(), feature.base()))
            .map(|session| session.feature);
        if let Some(running) = tracked {
            return Ok(match feature {
                ComponentFeature::Debug(_) => running.is_debug(),
                ComponentFeature::Base(_) => true,
            });
        }
        let description = self.describe(component).await?;
        Ok(description.dev_running_on(feature.platform()))
    }

    async fn start(
        &self,
        component: &ComponentKey,
        feature: ComponentFeature,
        callbacks: LifecycleCallbacks,
    ) -> Result<(), ProcessError> {
        let args = dev_args(feature);
        let command = display_command(&self.settings.binary, &args);

        let slot = match self.sessions.entry((component.clone(), feature.base())) {
            Entry::Occupied(_) => {
                return Err(ProcessError::tool(
                    command,
                    format!("a dev session is already running for {}", component),
                ));
            }
            Entry::Vacant(slot) => slot,
        };

        let mut child = Command::new(&self.settings.binary)
            .args(&args)
            .current_dir(&component.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProcessError::io(command.clone(), e))?;

        let pid = child.id();
        let stdout = child.stdout.take();
        if let Some(stderr) = child.stderr.take() {
            let command = command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "odo", "[{}] {}", command, line);
                }
            });
        }

        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        let (exited_tx, exited_rx) = watch::channel(false);
        let key = slot.key().clone();
        slot.insert(DevSession {
            feature,
            pid,
            stop_tx,
            stop_requests: AtomicUsize::new(0),
            exited: exited_rx,
        });

        tracing::info!("Started {} for {} (pid {:?})", command, component, pid);

        tokio::spawn(monitor_session(SessionMonitor {
            child,
            stdout: stdout.map(|out| BufReader::new(out).lines()),
            stop_rx,
            exited_tx,
            ready_marker: self.settings.ready_marker.clone(),
            callbacks,
            sessions: self.sessions.clone(),
            key,
            command,
        }));

        Ok(())
    }

    async fn stop(
        &self,
        component: &ComponentKey,
        feature: ComponentFeature,
    ) -> Result<(), ProcessError> {
        let exited = self
            .sessions
            .get(&(component.clone(), feature.base()))
            .map(|session| {
                // A repeated stop escalates: the first asks odo to clean up,
                // later ones kill it.
                let signal = if session.stop_requests.fetch_add(1, Ordering::SeqCst) == 0 {
                    StopSignal::Interrupt
                } else {
                    StopSignal::Kill
                };
                let _ = session.stop_tx.send(signal);
                session.exited.clone()
            });

        let Some(mut exited) = exited else {
            return self.delete_untracked(component, feature).await;
        };

        let timeout = self.settings.stop_timeout;
        let confirmed = tokio::time::timeout(timeout, exited.wait_for(|done| *done))
            .await
            .is_ok();
        if confirmed {
            Ok(())
        } else {
            Err(ProcessError::StopTimeout {
                component: component.to_string(),
                timeout,
            })
        }
    }
}

struct SessionMonitor {
    child: Child,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    stop_rx: mpsc::UnboundedReceiver<StopSignal>,
    exited_tx: watch::Sender<bool>,
    ready_marker: String,
    callbacks: LifecycleCallbacks,
    sessions: Arc<DashMap<SessionKey, DevSession>>,
    key: SessionKey,
    command: String,
}

/// Follow a dev session until its process exits.
///
/// Fires `on_started` on the first stdout line containing the ready marker.
/// On exit the session is unregistered and stop waiters are released before
/// `on_terminated` fires, so a stop in progress never waits on the callback.
async fn monitor_session(monitor: SessionMonitor) {
    let SessionMonitor {
        mut child,
        mut stdout,
        mut stop_rx,
        exited_tx,
        ready_marker,
        callbacks,
        sessions,
        key,
        command,
    } = monitor;
    let LifecycleCallbacks {
        on_started,
        on_terminated,
    } = callbacks;
    let mut on_started = Some(on_started);
    let mut stop_open = true;

    let status = loop {
        tokio::select! {
            line = next_line(&mut stdout), if stdout.is_some() => match line {
                Some(line) => {
                    tracing::debug!(target: "odo", "[{}] {}", command, line);
                    if line.contains(&ready_marker) {
                        if let Some(started) = on_started.take() {
                            tracing::info!("{} is ready for {}", command, key.0);
                            started();
                        }
                    }
                }
                None => stdout = None,
            },
            signal = stop_rx.recv(), if stop_open => match signal {
                Some(StopSignal::Interrupt) => interrupt(&mut child),
                Some(StopSignal::Kill) => {
                    tracing::warn!("Killing {} for {}", command, key.0);
                    let _ = child.start_kill();
                }
                None => stop_open = false,
            },
            status = child.wait() => break status,
        }
    };

    match status {
        Ok(status) => tracing::info!("{} for {} exited with {}", command, key.0, status),
        Err(e) => tracing::warn!("Lost track of {} for {}: {}", command, key.0, e),
    }

    sessions.remove(&key);
    let _ = exited_tx.send(true);
    on_terminated();
}

async fn next_line(lines: &mut Option<Lines<BufReader<ChildStdout>>>) -> Option<String> {
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}

#[cfg(unix)]
fn interrupt(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to a child we spawned and still own.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
        if rc == 0 {
            return;
        }
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) {
    let _ = child.start_kill();
}

fn platform_args(platform: Platform) -> Vec<String> {
    match platform {
        Platform::Cluster => Vec::new(),
        Platform::Podman => vec!["--platform".to_string(), "podman".to_string()],
    }
}

fn dev_args(feature: ComponentFeature) -> Vec<String> {
    let mut args = vec!["dev".to_string()];
    args.extend(platform_args(feature.platform()));
    if feature.is_debug() {
        args.push("--debug".to_string());
    }
    args
}

fn describe_args(component: &ComponentKey) -> Vec<String> {
    vec![
        "describe".to_string(),
        "component".to_string(),
        "--name".to_string(),
        component.name.clone(),
        "--namespace".to_string(),
        component.namespace.clone(),
        "-o".to_string(),
        "json".to_string(),
    ]
}

fn delete_args(component: &ComponentKey, feature: ComponentFeature) -> Vec<String> {
    let mut args = vec![
        "delete".to_string(),
        "component".to_string(),
        "--name".to_string(),
        component.name.clone(),
        "--namespace".to_string(),
        component.namespace.clone(),
        "--running-in".to_string(),
        "dev".to_string(),
    ];
    args.extend(platform_args(feature.platform()));
    args.push("-f".to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> ComponentKey {
        ComponentKey::new("team-a", "api", "/work/api")
    }

    #[test]
    fn dev_args_add_platform_and_debug_flags() {
        assert_eq!(dev_args(ComponentFeature::DEV), vec!["dev"]);
        assert_eq!(dev_args(ComponentFeature::DEBUG), vec!["dev", "--debug"]);
        assert_eq!(
            dev_args(ComponentFeature::DEBUG_ON_PODMAN),
            vec!["dev", "--platform", "podman", "--debug"]
        );
    }

    #[test]
    fn describe_args_target_namespace() {
        let args = describe_args(&api());
        assert_eq!(
            args,
            vec!["describe", "component", "--name", "api", "--namespace", "team-a", "-o", "json"]
        );
    }

    #[test]
    fn delete_args_are_forced_and_scoped_to_dev() {
        let args = delete_args(&api(), ComponentFeature::DEV_ON_PODMAN);
        assert_eq!(args.last().map(String::as_str), Some("-f"));
        assert!(args.windows(2).any(|w| w == ["--running-in", "dev"]));
        assert!(args.windows(2).any(|w| w == ["--platform", "podman"]));
    }
}
