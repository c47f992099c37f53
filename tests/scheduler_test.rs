//! Integration tests for the build scheduler
//!
//! Plans and runs builds against a temporary package tree with a scripted
//! executor and in-memory mounts.

mod common;

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::{Harness, Script, FOREIGN, HOST};
use forgeroot::core::rebuild::{ArtifactRecord, BuildReason, Decision, RebuildMode};
use forgeroot::core::report::Outcome;
use forgeroot::core::resolver::BuildTarget;
use forgeroot::core::strategy::{BuildStrategy, StrategyMode};

fn a_and_b(h: &Harness) {
    h.project.add_package("a", "");
    h.project.add_package("b", "build_depends = [\"a\"]");
}

#[tokio::test]
async fn test_fresh_graph_builds_in_order() {
    let h = Harness::new();
    a_and_b(&h);

    let report = h.run(h.project.context(HOST), &["b"]).await;

    let order: Vec<_> = report.targets.iter().map(|t| t.target.package.as_str()).collect();
    assert_eq!(order, ["a", "b"]);
    assert!(matches!(report.outcome_of("a"), Some(Outcome::Succeeded { pkgrel: 0, .. })));
    assert!(matches!(report.outcome_of("b"), Some(Outcome::Succeeded { .. })));
    assert_eq!(h.executor.started(), [BuildTarget::new("a", HOST), BuildTarget::new("b", HOST)]);
    assert_eq!(report.exit_code(), 0);

    let records = h.artifacts().records().await;
    assert_eq!(records.len(), 2);
    assert!(records.contains_key(&BuildTarget::new("b", HOST)));
}

#[tokio::test]
async fn test_up_to_date_targets_are_skipped() {
    let h = Harness::new();
    a_and_b(&h);
    h.run(h.project.context(HOST), &["b"]).await;

    let builds_before = h.executor.started().len();
    let report = h.run(h.project.context(HOST), &["b"]).await;

    assert_eq!(report.outcome_of("a"), Some(&Outcome::UpToDate));
    assert_eq!(report.outcome_of("b"), Some(&Outcome::UpToDate));
    assert_eq!(h.executor.started().len(), builds_before);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_stale_dependency_rebuilds_dependent() {
    let h = Harness::new();
    a_and_b(&h);
    h.run(h.project.context(HOST), &["b"]).await;

    // Only the record of a goes stale
    let store = h.artifacts();
    let a = BuildTarget::new("a", HOST);
    let mut record: ArtifactRecord = store.records().await[&a].clone();
    record.fingerprint = "stale".to_string();
    store.record(&a, record).await.unwrap();

    let ctx = h.project.context(HOST);
    let plan = h.plan(&ctx, &["b"]).await;
    assert_eq!(plan.jobs()[0].decision.decision, Decision::Build(BuildReason::FingerprintChanged));
    assert_eq!(
        plan.jobs()[1].decision.decision,
        Decision::Build(BuildReason::DependencyRebuilt { dependency: "a".into() })
    );

    let report = h.run(ctx, &["b"]).await;
    assert!(matches!(report.outcome_of("a"), Some(Outcome::Succeeded { pkgrel: 0, .. })));
    // b was rebuilt only because of a, so it moves to a new release
    assert!(matches!(report.outcome_of("b"), Some(Outcome::Succeeded { pkgrel: 1, .. })));
    assert_eq!(h.artifacts().records().await[&BuildTarget::new("b", HOST)].pkgrel, 1);
}

#[tokio::test]
async fn test_force_rebuilds_everything() {
    let h = Harness::new();
    a_and_b(&h);
    h.run(h.project.context(HOST), &["b"]).await;

    let ctx = h.project.context(HOST).with_rebuild_mode(RebuildMode::Force);
    let report = h.run(ctx, &["b"]).await;

    assert_eq!(report.count(|o| matches!(o, Outcome::Succeeded { .. })), 2);
    assert_eq!(h.executor.started().len(), 4);
}

#[tokio::test]
async fn test_unbuildable_package_blocks_dependents() {
    let h = Harness::new();
    h.project.add_package("c", "emulation = \"no\"");
    h.project.add_package("d", "build_depends = [\"c\"]");

    let report = h.run(h.project.context(FOREIGN), &["d"]).await;

    assert!(matches!(report.outcome_of("c"), Some(Outcome::Failed { .. })));
    assert_eq!(
        report.outcome_of("d"),
        Some(&Outcome::Blocked {
            by: "c [aarch64]".to_string()
        })
    );
    assert!(h.executor.started().is_empty());
    assert_eq!(h.mounts.mount_count(), 0);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_strict_mode_fails_without_cross_support() {
    let h = Harness::new();
    h.project.add_package("e", "emulation = \"yes\"");

    let ctx = h.project.context(FOREIGN).with_strategy_mode(StrategyMode::Strict);
    let report = h.run(ctx, &["e"]).await;

    match report.outcome_of("e") {
        Some(Outcome::Failed { reason }) => assert!(reason.contains("cross"), "{reason}"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_failure_blocks_transitive_dependents() {
    let h = Harness::new();
    h.project.add_package("base", "");
    h.project.add_package("mid", "build_depends = [\"base\"]");
    h.project.add_package("top", "depends = [\"mid\"]");
    h.project.add_package("other", "");
    h.executor.script("base", Script::Fail(2));

    let report = h.run(h.project.context(HOST), &["top", "other"]).await;

    assert!(matches!(report.outcome_of("base"), Some(Outcome::Failed { .. })));
    let blocked = Outcome::Blocked {
        by: "base [x86_64]".to_string(),
    };
    assert_eq!(report.outcome_of("mid"), Some(&blocked));
    assert_eq!(report.outcome_of("top"), Some(&blocked));
    assert!(matches!(report.outcome_of("other"), Some(Outcome::Succeeded { .. })));
    assert!(!h.executor.built("mid"));
    assert!(!h.executor.built("top"));
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_failure_of_unrequested_sibling_keeps_success() {
    let h = Harness::new();
    h.project.add_package("ok", "");
    h.project.add_package("broken", "");
    h.executor.script("broken", Script::Fail(1));

    let report = h.run(h.project.context(HOST), &["ok"]).await;
    assert_eq!(report.targets.len(), 1);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_cancellation_leaves_jobs_queued() {
    let h = Harness::new();
    h.project.add_package("slow", "");
    h.project.add_package("after", "build_depends = [\"slow\"]");
    h.executor.script("slow", Script::Hang);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let ctx = h.project.context(HOST);
    let (report, chroots) = h.run_with(ctx, &["after"], cancel).await;

    assert!(report.cancelled);
    assert_eq!(report.outcome_of("slow"), Some(&Outcome::Interrupted));
    assert_eq!(report.outcome_of("after"), Some(&Outcome::Interrupted));
    assert!(!h.executor.built("after"));
    assert_eq!(report.exit_code(), 130);
    assert!(h.artifacts().records().await.is_empty());

    // The chroot was released and can be leased again
    let lease = tokio::time::timeout(Duration::from_secs(5), chroots.acquire(HOST))
        .await
        .expect("chroot still held")
        .unwrap();
    chroots.release(lease);
}

#[tokio::test]
async fn test_jobs_sharing_a_chroot_serialize() {
    let h = Harness::new();
    for name in ["p1", "p2", "p3"] {
        h.project.add_package(name, "");
        h.executor.script(name, Script::Sleep(Duration::from_millis(50)));
    }

    let ctx = h.project.context(HOST).with_max_jobs(3);
    let report = h.run(ctx, &["p1", "p2", "p3"]).await;

    assert_eq!(report.exit_code(), 0);
    assert_eq!(h.executor.max_running(), 1);
}

#[tokio::test]
async fn test_independent_chroots_run_concurrently() {
    let h = Harness::new();
    h.project.add_package("docs", "arch = [\"noarch\"]");
    h.project.add_package("app", "emulation = \"yes\"");
    h.executor.script("docs", Script::Sleep(Duration::from_millis(300)));
    h.executor.script("app", Script::Sleep(Duration::from_millis(300)));
    h.project.add_emulator(FOREIGN);
    h.mounts.register_binfmt(FOREIGN);

    let ctx = h.project.context(FOREIGN).with_max_jobs(2);
    let report = h.run(ctx, &["docs", "app"]).await;

    assert_eq!(report.exit_code(), 0, "{report:?}");
    assert_eq!(h.executor.max_running(), 2);

    let app = report.targets.iter().find(|t| t.target.package == "app").unwrap();
    assert_eq!(app.strategy, Some(BuildStrategy::Emulated));
    let docs = report.targets.iter().find(|t| t.target.package == "docs").unwrap();
    assert_eq!(docs.target.arch, HOST);
    assert_eq!(docs.strategy, Some(BuildStrategy::Native));
}

#[tokio::test]
async fn test_max_jobs_bounds_concurrency() {
    let h = Harness::new();
    h.project.add_package("docs", "arch = [\"noarch\"]");
    h.project.add_package("app", "emulation = \"yes\"");
    h.executor.script("docs", Script::Sleep(Duration::from_millis(100)));
    h.executor.script("app", Script::Sleep(Duration::from_millis(100)));
    h.project.add_emulator(FOREIGN);
    h.mounts.register_binfmt(FOREIGN);

    let ctx = h.project.context(FOREIGN).with_max_jobs(1);
    let report = h.run(ctx, &["docs", "app"]).await;

    assert_eq!(report.exit_code(), 0);
    assert_eq!(h.executor.max_running(), 1);
}

#[tokio::test]
async fn test_foreign_chroot_failure_is_contained() {
    let h = Harness::new();
    h.project.add_package("docs", "arch = [\"noarch\"]");
    h.project.add_package("app", "emulation = \"yes\"");
    h.project.add_package("app-plugin", "build_depends = [\"app\"]");

    // No binfmt handler registered for the foreign arch
    let report = h.run(h.project.context(FOREIGN), &["docs", "app-plugin"]).await;

    assert!(report.aborted.is_none());
    assert!(matches!(report.outcome_of("docs"), Some(Outcome::Succeeded { .. })));
    match report.outcome_of("app") {
        Some(Outcome::Failed { reason }) => assert!(reason.contains("binfmt"), "{reason}"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(matches!(report.outcome_of("app-plugin"), Some(Outcome::Blocked { .. })));
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_native_chroot_failure_aborts_run() {
    let h = Harness::new();
    h.project.add_package("a", "");
    h.project.add_package("b", "build_depends = [\"a\"]");
    h.project.add_package("c", "");
    h.mounts.fail_on("proc");

    let ctx = h.project.context(HOST).with_max_jobs(1);
    let work = ctx.work_dir.clone();
    let report = h.run(ctx, &["b", "c"]).await;

    assert!(report.aborted.is_some());
    assert!(matches!(report.outcome_of("a"), Some(Outcome::Failed { .. })));
    assert_eq!(
        report.outcome_of("b"),
        Some(&Outcome::Blocked {
            by: "a [x86_64]".to_string()
        })
    );
    // Never started and not below the failure
    assert_eq!(report.outcome_of("c"), Some(&Outcome::Interrupted));
    assert!(h.executor.started().is_empty());
    assert_eq!(report.exit_code(), 1);
    // The half-built native chroot was destroyed
    assert!(!work.join("chroot_native").exists());
}

#[tokio::test]
async fn test_build_request_environment() {
    let h = Harness::new();
    h.project.add_package("app", "emulation = \"yes\"");
    h.project.add_emulator(FOREIGN);
    h.mounts.register_binfmt(FOREIGN);

    let ctx = h.project.context(FOREIGN);
    let work = ctx.work_dir.clone();
    let report = h.run(ctx, &["app"]).await;
    assert_eq!(report.exit_code(), 0);

    let request = &h.executor.requests()[0];
    assert_eq!(request.chroot_root, work.join("chroot_buildroot_aarch64"));
    assert_eq!(request.workdir, std::path::PathBuf::from("/mnt/aports/main/app"));
    assert_eq!(request.env["CARCH"], "aarch64");
    assert_eq!(request.env["PKGDEST"], "/home/build/packages/aarch64");
    assert_eq!(request.log_path, work.join("logs").join("aarch64").join("app.log"));
    assert!(work
        .join("chroot_buildroot_aarch64/usr/bin/qemu-aarch64-static")
        .exists());
}
