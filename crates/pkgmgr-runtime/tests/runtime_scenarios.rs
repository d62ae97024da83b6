mod helpers;

use std::time::Duration;

use helpers::{Harness, app, module, settings, wait_for};
use pkgmgr_runtime::RenderError;
use pkgmgr_runtime::package::kube::{KubeEvent, WatchEventType};
use pkgmgr_runtime::testing::PackageTemplate;
use pkgmgr_types::ConditionStatus::{False, True};
use pkgmgr_types::condition::{external, internal, reason};
use serde_json::json;

const WEB: &str = "ns.web";

fn web() -> PackageTemplate {
    PackageTemplate::new("web")
        .helm()
        .values(json!({"replicas": 1, "image": "web"}))
        .settings_schema(json!({
            "type": "object",
            "properties": {"replicas": {"type": "integer", "minimum": 1}}
        }))
        .hook("init.sh", "onStartup: 1\n")
        .hook(
            "watch.sh",
            "schedule:\n  - name: tick\n    crontab: \"@every 1m\"\n",
        )
        .hook("cleanup.sh", "afterDeleteHelm: 1\n")
}

async fn install_web(h: &Harness) {
    h.installer.publish("1.0.0", web());
    h.runtime
        .update_app(app("ns", "web", "1.0.0", settings(json!({"replicas": 3}))));
    wait_for("1.0.0 committed", || {
        h.published_version(WEB).as_deref() == Some("1.0.0")
    })
    .await;
    wait_for("Ready", || h.external(WEB, external::READY) == Some(True)).await;
}

/// Park a scheduled run of `watch.sh` so it is in flight.
async fn hold_watch_hook(h: &Harness) {
    h.executor.block("watch.sh");
    h.schedules.tick("@every 1m").unwrap();
    wait_for("watch.sh in flight", || h.count_calls("watch.sh") == 1).await;
}

#[tokio::test]
async fn happy_path_installs_and_commits_version() {
    let h = Harness::start();
    install_web(&h).await;

    for name in internal::ALL {
        assert_eq!(h.internal(WEB, name), Some(True), "{name}");
    }
    assert_eq!(h.external(WEB, external::INSTALLED), Some(True));
    assert_eq!(h.external(WEB, external::MANAGED), Some(True));
    assert_eq!(h.external(WEB, external::CONFIGURATION_APPLIED), Some(True));

    let calls = h.installer.calls();
    assert_eq!(calls[0], "download ns.web@1.0.0");
    assert_eq!(calls[1], "install ns.web@1.0.0");

    let upgrades = h.upgrades_of(WEB);
    assert_eq!(upgrades.last().unwrap()["replicas"], 3);
    assert_eq!(upgrades.last().unwrap()["image"], "web");
    assert_eq!(h.count_calls("init.sh"), 1);
    assert_eq!(h.schedules.crontabs(), vec!["@every 1m".to_string()]);

    h.runtime.stop().await;
}

#[tokio::test]
async fn identical_update_is_a_no_op() {
    let h = Harness::start();
    install_web(&h).await;
    let upgrades = h.upgrades_of(WEB).len();

    h.runtime
        .update_app(app("ns", "web", "1.0.0", settings(json!({"replicas": 3}))));
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.installer.calls().len(), 2);
    assert_eq!(h.upgrades_of(WEB).len(), upgrades);
    h.runtime.stop().await;
}

#[tokio::test]
async fn version_change_cancels_in_flight_hooks() {
    let h = Harness::start();
    install_web(&h).await;
    hold_watch_hook(&h).await;

    // Hold the new version in Startup so the rollout is observable.
    h.executor.block("init.sh");
    h.installer.publish("2.0.0", web());
    h.runtime
        .update_app(app("ns", "web", "2.0.0", settings(json!({"replicas": 3}))));

    wait_for("in-flight hook cancelled", || {
        h.executor.cancelled() == vec!["watch.sh".to_string()]
    })
    .await;
    wait_for("UpdateInstalled=False", || {
        h.external(WEB, external::UPDATE_INSTALLED) == Some(False)
    })
    .await;
    assert_eq!(h.published_version(WEB).as_deref(), Some("1.0.0"));

    h.executor.release("init.sh");
    wait_for("2.0.0 committed", || {
        h.published_version(WEB).as_deref() == Some("2.0.0")
    })
    .await;
    wait_for("Ready", || h.external(WEB, external::READY) == Some(True)).await;
    wait_for("UpdateInstalled=True", || {
        h.external_history(WEB, external::UPDATE_INSTALLED).contains(&True)
    })
    .await;

    let seen = h.external_history(WEB, external::UPDATE_INSTALLED);
    let first_false = seen
        .iter()
        .position(|s| *s == False)
        .unwrap_or_else(|| panic!("UpdateInstalled never False: {seen:?}"));
    assert!(seen[first_false..].contains(&True), "{seen:?}");

    assert_eq!(h.external(WEB, external::INSTALLED), Some(True));
    assert!(h.installer.calls().contains(&"download ns.web@2.0.0".to_string()));
    assert_eq!(h.runtime.package(WEB).unwrap().version(), "2.0.0");
    // Keep-disable leaves the release in place.
    assert!(h.releases.deleted().is_empty());
    h.runtime.stop().await;
}

#[tokio::test]
async fn settings_change_reschedules_without_reinstall() {
    let h = Harness::start();
    install_web(&h).await;

    h.runtime
        .update_app(app("ns", "web", "1.0.0", settings(json!({"replicas": 5}))));
    wait_for("upgrade with new settings", || {
        h.upgrades_of(WEB)
            .last()
            .is_some_and(|v| v["replicas"] == 5)
    })
    .await;

    assert_eq!(h.installer.calls().len(), 2, "no new download or install");
    assert_eq!(h.count_calls("init.sh"), 1, "startup hooks ran once");
    assert_eq!(h.runtime.package(WEB).unwrap().settings()["replicas"], 5);
    h.runtime.stop().await;
}

#[tokio::test]
async fn invalid_settings_fail_until_corrected() {
    let h = Harness::start();
    h.installer.publish("1.0.0", web());
    h.runtime
        .update_app(app("ns", "web", "1.0.0", settings(json!({"replicas": "many"}))));

    wait_for("SettingsValid=False", || {
        h.internal(WEB, internal::SETTINGS_VALID) == Some(False)
    })
    .await;
    let status = h.runtime.status().get_status(WEB).unwrap();
    let cond = status.condition(internal::SETTINGS_VALID).unwrap();
    assert_eq!(cond.reason, reason::SETTINGS_INVALID);
    assert!(cond.message.contains("replicas"), "{}", cond.message);
    wait_for("ConfigurationApplied=False", || {
        h.external(WEB, external::CONFIGURATION_APPLIED) == Some(False)
    })
    .await;
    assert!(h.upgrades_of(WEB).is_empty());

    h.runtime
        .update_app(app("ns", "web", "1.0.0", settings(json!({"replicas": 2}))));
    wait_for("Ready", || h.external(WEB, external::READY) == Some(True)).await;
    assert_eq!(h.external(WEB, external::CONFIGURATION_APPLIED), Some(True));
    assert_eq!(h.upgrades_of(WEB).last().unwrap()["replicas"], 2);
    h.runtime.stop().await;
}

#[tokio::test]
async fn unmet_requirements_block_the_update() {
    let h = Harness::start();
    h.installer.publish("1.0.0", web());
    let mut spec = app("ns", "web", "1.0.0", settings(json!({})));
    spec.constraints.deckhouse = Some(">=2.0".parse().unwrap());
    h.runtime.update_app(spec);

    wait_for("RequirementsMet=False", || {
        h.internal(WEB, internal::REQUIREMENTS_MET) == Some(False)
    })
    .await;
    wait_for("Managed=False", || h.external(WEB, external::MANAGED) == Some(False)).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(h.installer.calls().is_empty());
    assert_eq!(h.external(WEB, external::INSTALLED), None);
    assert_eq!(h.external(WEB, external::READY), None);
    assert_eq!(h.published_version(WEB), None);

    // Nothing was accepted, but the refusal still left a status entry.
    h.runtime.remove_app("ns", "web");
    assert!(h.runtime.status().get_status(WEB).is_none());
    h.runtime.stop().await;
}

#[tokio::test]
async fn remove_cancels_hooks_and_releases_state() {
    let h = Harness::start();
    install_web(&h).await;
    hold_watch_hook(&h).await;

    h.runtime.remove_app("ns", "web");

    wait_for("status entry deleted", || {
        h.runtime.status().get_status(WEB).is_none()
    })
    .await;
    assert_eq!(h.executor.cancelled(), vec!["watch.sh".to_string()]);
    assert_eq!(h.releases.deleted(), vec!["ns/web".to_string()]);
    assert_eq!(h.count_calls("cleanup.sh"), 1);
    assert!(h.installer.calls().contains(&"uninstall ns.web keep=true".to_string()));
    assert!(h.runtime.package(WEB).is_none());
    assert!(h.schedules.crontabs().is_empty());
    wait_for("queue removed", || !h.runtime.queues().contains(WEB)).await;

    // The same version can be installed again from scratch.
    h.runtime
        .update_app(app("ns", "web", "1.0.0", settings(json!({"replicas": 3}))));
    wait_for("Ready again", || {
        h.internal(WEB, internal::READY_IN_CLUSTER) == Some(True)
    })
    .await;
    h.runtime.stop().await;
}

#[tokio::test]
async fn dependents_wait_for_their_dependencies() {
    let h = Harness::start();
    h.installer.publish("1.0.0", web());
    h.installer.publish("0.1.0", PackageTemplate::new("db"));

    let mut spec = app("ns", "web", "1.0.0", settings(json!({})));
    spec.constraints.dependencies = vec!["db".into()];
    h.runtime.update_app(spec);
    wait_for("web loaded", || h.runtime.package(WEB).is_some()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.upgrades_of(WEB).is_empty());

    h.runtime.update_module(module("db", "0.1.0"));
    wait_for("db running", || {
        h.internal("db", internal::READY_IN_CLUSTER) == Some(True)
    })
    .await;
    wait_for("web upgraded", || !h.upgrades_of(WEB).is_empty()).await;
    h.runtime.stop().await;
}

#[tokio::test]
async fn download_failures_are_retried() {
    let h = Harness::start();
    h.installer.fail_downloads(2);
    install_web(&h).await;

    let downloads = h
        .installer
        .calls()
        .iter()
        .filter(|c| c.starts_with("download"))
        .count();
    assert_eq!(downloads, 3);
    h.runtime.stop().await;
}

#[tokio::test]
async fn watch_events_run_hooks_and_reschedule_on_value_change() {
    let h = Harness::start();
    let template = web().hook(
        "pods.sh",
        "kubernetes:\n  - name: pods\n    apiVersion: v1\n    kind: Pod\n",
    );
    h.watcher.set_objects("Pod", vec![json!({"metadata": {"name": "a"}})]);
    h.installer.publish("1.0.0", template);
    h.runtime
        .update_app(app("ns", "web", "1.0.0", settings(json!({"replicas": 3}))));
    wait_for("Ready", || h.external(WEB, external::READY) == Some(True)).await;

    assert_eq!(h.count_calls("pods.sh"), 1, "synchronization run");
    let monitor = "ns.web/pods.sh/pods";
    assert!(h.watcher.is_started(monitor));

    h.executor.set_patch("pods.sh", json!({"seen": true}));
    h.watcher
        .emit(KubeEvent {
            monitor_id: monitor.into(),
            event_type: WatchEventType::Modified,
            object: json!({"metadata": {"name": "a"}}),
        })
        .unwrap();

    wait_for("hook patch released", || {
        h.upgrades_of(WEB)
            .last()
            .is_some_and(|v| v["seen"] == true)
    })
    .await;
    assert_eq!(h.count_calls("pods.sh"), 2);
    h.runtime.stop().await;
}

#[tokio::test]
async fn reschedule_during_initial_sync_registers_monitors_again() {
    let h = Harness::start();
    let template = web().hook(
        "pods.sh",
        "kubernetes:\n  - name: pods\n    apiVersion: v1\n    kind: Pod\n",
    );
    h.watcher.set_objects("Pod", vec![json!({"metadata": {"name": "a"}})]);
    h.installer.publish("1.0.0", template);
    h.executor.block("pods.sh");
    h.runtime
        .update_app(app("ns", "web", "1.0.0", settings(json!({"replicas": 3}))));
    wait_for("synchronization in flight", || h.count_calls("pods.sh") == 1).await;

    h.runtime
        .update_app(app("ns", "web", "1.0.0", settings(json!({"replicas": 5}))));
    wait_for("synchronization cancelled", || {
        h.executor.cancelled() == vec!["pods.sh".to_string()]
    })
    .await;
    h.executor.release("pods.sh");

    let monitor = "ns.web/pods.sh/pods";
    wait_for("monitor unlocked", || h.watcher.is_started(monitor)).await;
    wait_for("Ready", || h.external(WEB, external::READY) == Some(True)).await;
    assert_eq!(h.count_calls("pods.sh"), 2, "synchronization ran again");
    assert_eq!(h.upgrades_of(WEB).last().unwrap()["replicas"], 5);

    // Live events reach the hook once the monitor is unlocked.
    h.watcher
        .emit(KubeEvent {
            monitor_id: monitor.into(),
            event_type: WatchEventType::Modified,
            object: json!({"metadata": {"name": "a"}}),
        })
        .unwrap();
    wait_for("event delivered", || h.count_calls("pods.sh") == 3).await;
    h.runtime.stop().await;
}

#[tokio::test]
async fn render_and_dumps() {
    let h = Harness::start();
    install_web(&h).await;
    h.installer.publish("0.1.0", PackageTemplate::new("db"));
    h.runtime.update_module(module("db", "0.1.0"));
    wait_for("db loaded", || h.runtime.package("db").is_some()).await;

    let manifest = h.runtime.render(WEB).await.unwrap();
    assert!(manifest.contains("replicas: 3"), "{manifest}");
    assert!(matches!(
        h.runtime.render("missing").await,
        Err(RenderError::NotFound(_))
    ));
    assert!(matches!(
        h.runtime.render("db").await,
        Err(RenderError::NotHelm(_))
    ));

    let dump = h.runtime.dump().unwrap();
    assert!(dump.contains("ns.web"), "{dump}");
    assert!(dump.contains("version: 1.0.0"), "{dump}");
    assert!(h.runtime.scheduler_dump().unwrap().contains("ns.web"));
    assert!(h.runtime.queues_dump().unwrap().contains("ns.web"));
    h.runtime.stop().await;
}
