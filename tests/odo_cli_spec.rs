#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use component_lifecycle::models::*;
use component_lifecycle::process::{
    LifecycleCallbacks, OdoCli, OdoSettings, ProcessError, ProcessFacade,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

/// `odo dev` that becomes ready, then exits cleanly on SIGINT.
const WELL_BEHAVED_DEV: &str = r#"
    trap 'echo "Cleaning resources"; exit 0' INT
    echo "Syncing files into the container"
    echo "Watching for changes in the current directory"
    while true; do sleep 0.1; done
"#;

/// `odo dev` that ignores SIGINT.
const STUBBORN_DEV: &str = r#"
    trap '' INT
    echo "Watching for changes in the current directory"
    while true; do sleep 0.1; done
"#;

/// `odo dev` that fails before becoming ready.
const BROKEN_DEV: &str = r#"
    echo "no devfile found" >&2
    exit 1
"#;

struct FakeOdo {
    dir: TempDir,
}

impl FakeOdo {
    fn new(dev_body: &str) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let script = format!(
            r#"#!/bin/sh
here="$(dirname "$0")"
case "$1" in
  dev)
    echo "$@" > "$here/dev-args"
    {dev_body}
    ;;
  describe)
    cat "$here/describe.json"
    ;;
  delete)
    echo "$@" > "$here/delete-args"
    ;;
  *)
    exit 2
    ;;
esac
"#
        );
        let path = dir.path().join("odo");
        fs::write(&path, script).expect("Failed to write fake odo");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("Failed to make fake odo executable");
        Self { dir }
    }

    fn binary(&self) -> PathBuf {
        self.dir.path().join("odo")
    }

    fn cli(&self, stop_timeout: Duration) -> OdoCli {
        OdoCli::new(OdoSettings {
            binary: self.binary(),
            probe_timeout: Duration::from_secs(5),
            stop_timeout,
            ..OdoSettings::default()
        })
    }

    fn component(&self) -> ComponentKey {
        ComponentKey::new("team-a", "api", self.dir.path())
    }

    fn describe(&self, json: &str) {
        fs::write(self.dir.path().join("describe.json"), json).unwrap();
    }

    fn recorded(&self, name: &str) -> String {
        read_trimmed(&self.dir.path().join(name))
    }
}

fn read_trimmed(path: &Path) -> String {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

#[derive(Debug, PartialEq, Eq)]
enum Event {
    Started,
    Terminated,
}

fn callbacks() -> (LifecycleCallbacks, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let started = tx.clone();
    let callbacks = LifecycleCallbacks::new(
        move || {
            let _ = started.send(Event::Started);
        },
        move || {
            let _ = tx.send(Event::Terminated);
        },
    );
    (callbacks, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no lifecycle event in time")
        .expect("callbacks dropped without firing")
}

mod dev_sessions {
    use super::*;

    #[tokio::test]
    async fn reports_ready_then_stops_on_interrupt() {
        let odo = FakeOdo::new(WELL_BEHAVED_DEV);
        let cli = odo.cli(Duration::from_secs(5));
        let api = odo.component();
        let (callbacks, mut events) = callbacks();

        cli.start(&api, ComponentFeature::DEV, callbacks).await.unwrap();
        assert_eq!(next_event(&mut events).await, Event::Started);

        assert!(cli.is_running(&api, ComponentFeature::DEV).await.unwrap());
        assert!(!cli.is_running(&api, ComponentFeature::DEBUG).await.unwrap());
        assert_eq!(cli.active_sessions(), vec![(api.clone(), ComponentFeature::DEV)]);

        cli.stop(&api, ComponentFeature::DEV).await.unwrap();
        assert_eq!(next_event(&mut events).await, Event::Terminated);
        assert!(cli.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn passes_platform_and_debug_flags() {
        let odo = FakeOdo::new(WELL_BEHAVED_DEV);
        let cli = odo.cli(Duration::from_secs(5));
        let api = odo.component();
        let (callbacks, mut events) = callbacks();

        cli.start(&api, ComponentFeature::DEBUG_ON_PODMAN, callbacks)
            .await
            .unwrap();
        assert_eq!(next_event(&mut events).await, Event::Started);

        assert_eq!(odo.recorded("dev-args"), "dev --platform podman --debug");
        assert!(cli
            .is_running(&api, ComponentFeature::DEV_ON_PODMAN)
            .await
            .unwrap());
        assert!(cli
            .is_running(&api, ComponentFeature::DEBUG_ON_PODMAN)
            .await
            .unwrap());

        cli.stop(&api, ComponentFeature::DEBUG_ON_PODMAN).await.unwrap();
    }

    #[tokio::test]
    async fn refuses_a_second_session_on_the_same_base() {
        let odo = FakeOdo::new(WELL_BEHAVED_DEV);
        let cli = odo.cli(Duration::from_secs(5));
        let api = odo.component();
        let (first, _events) = callbacks();
        let (second, _more) = callbacks();

        cli.start(&api, ComponentFeature::DEV, first).await.unwrap();
        let err = cli
            .start(&api, ComponentFeature::DEBUG, second)
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::ToolInvocation { .. }));
        cli.stop(&api, ComponentFeature::DEV).await.unwrap();
    }

    #[tokio::test]
    async fn early_exit_terminates_without_ready() {
        let odo = FakeOdo::new(BROKEN_DEV);
        let cli = odo.cli(Duration::from_secs(5));
        let api = odo.component();
        let (callbacks, mut events) = callbacks();

        cli.start(&api, ComponentFeature::DEV, callbacks).await.unwrap();

        assert_eq!(next_event(&mut events).await, Event::Terminated);
        assert!(events.recv().await.is_none());
        assert!(cli.active_sessions().is_empty());
    }

    #[tokio::test]
    async fn stubborn_session_times_out_then_gets_killed() {
        let odo = FakeOdo::new(STUBBORN_DEV);
        let cli = odo.cli(Duration::from_millis(500));
        let api = odo.component();
        let (callbacks, mut events) = callbacks();

        cli.start(&api, ComponentFeature::DEV, callbacks).await.unwrap();
        assert_eq!(next_event(&mut events).await, Event::Started);

        let err = cli.stop(&api, ComponentFeature::DEV).await.unwrap_err();
        assert!(err.is_warning());

        cli.stop(&api, ComponentFeature::DEV).await.unwrap();
        assert_eq!(next_event(&mut events).await, Event::Terminated);
    }

    #[tokio::test]
    async fn missing_binary_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let cli = OdoCli::new(OdoSettings {
            binary: dir.path().join("no-such-odo"),
            ..OdoSettings::default()
        });
        let api = ComponentKey::new("team-a", "api", dir.path());
        let (callbacks, _events) = callbacks();

        let err = cli
            .start(&api, ComponentFeature::DEV, callbacks)
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::Io { .. }));
        assert!(cli.active_sessions().is_empty());
    }
}

mod untracked_sessions {
    use super::*;

    #[tokio::test]
    async fn probes_through_describe() {
        let odo = FakeOdo::new(WELL_BEHAVED_DEV);
        let cli = odo.cli(Duration::from_secs(5));
        let api = odo.component();
        odo.describe(
            r#"{
                "devfilePath": "/work/api/devfile.yaml",
                "runningOn": {
                    "cluster": { "dev": false, "deploy": true },
                    "podman": { "dev": true, "deploy": false }
                },
                "supportedOdoFeatures": { "dev": true, "deploy": false, "debug": true }
            }"#,
        );

        assert!(!cli.is_running(&api, ComponentFeature::DEV).await.unwrap());
        assert!(cli
            .is_running(&api, ComponentFeature::DEV_ON_PODMAN)
            .await
            .unwrap());
        assert!(cli
            .is_running(&api, ComponentFeature::DEBUG_ON_PODMAN)
            .await
            .unwrap());

        let description = cli.describe(&api).await.unwrap();
        assert_eq!(
            description.supported_modes(),
            vec![FeatureMode::Dev, FeatureMode::Debug]
        );
    }

    #[tokio::test]
    async fn malformed_describe_output_is_a_tool_error() {
        let odo = FakeOdo::new(WELL_BEHAVED_DEV);
        let cli = odo.cli(Duration::from_secs(5));
        odo.describe("this is not json");

        let err = cli
            .is_running(&odo.component(), ComponentFeature::DEV)
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessError::ToolInvocation { .. }));
        assert!(err.to_string().contains("malformed describe output"));
    }

    #[tokio::test]
    async fn stops_through_delete() {
        let odo = FakeOdo::new(WELL_BEHAVED_DEV);
        let cli = odo.cli(Duration::from_secs(5));

        cli.stop(&odo.component(), ComponentFeature::DEV_ON_PODMAN)
            .await
            .unwrap();

        assert_eq!(
            odo.recorded("delete-args"),
            "delete component --name api --namespace team-a --running-in dev --platform podman -f"
        );
    }
}
