//! End-to-end bundle lifecycle scenarios against a fake content server.

mod common;

use clearbundle::bundle::{add_bundles, remove_bundles};
use clearbundle::clean::{clean_statedir, CleanOptions};
use clearbundle::error::{ExitCode, UpdaterError};
use clearbundle::scripts::{NoopHook, PostUpdateHook};
use clearbundle::state;
use common::{Entry, RecordingReporter, TestWorld};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_fresh_add_of_directory_bundle() {
    let mut world = TestWorld::new(10);
    world.add_bundle("test-bundle", &[], &[Entry::Dir("/usr/bin/test")]);
    world.publish();

    let transport = world.transport();
    let reporter = RecordingReporter::new();
    let outcome = add_bundles(
        &world.config,
        &transport,
        &NoopHook,
        &reporter,
        &names(&["test-bundle"]),
    )
    .await
    .unwrap();

    assert_eq!(outcome.code, ExitCode::Ok);
    assert_eq!(outcome.installed, 1);
    assert!(world.target("/usr/bin/test").is_dir());

    assert!(reporter.contains("Loading required manifests..."));
    assert!(reporter.contains("No packs need to be downloaded"));
    assert!(reporter.contains("Installing bundle(s) files..."));
    assert!(reporter.contains("Successfully installed 1 bundle"));
}

struct RecordingHook {
    ran: AtomicUsize,
    boot: AtomicBool,
}

impl RecordingHook {
    fn new() -> Self {
        Self {
            ran: AtomicUsize::new(0),
            boot: AtomicBool::new(false),
        }
    }
}

impl PostUpdateHook for RecordingHook {
    fn run(&self, updated_boot_files: bool) -> std::io::Result<()> {
        self.ran.fetch_add(1, Ordering::SeqCst);
        self.boot.store(updated_boot_files, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_boot_file_add_runs_post_update_hook() {
    let mut world = TestWorld::new(10);
    world.add_bundle(
        "kernel-bundle",
        &[],
        &[
            Entry::Dir("/usr/lib/kernel"),
            Entry::File("/usr/lib/kernel/test-file", b"boot asset"),
        ],
    );
    world.publish();

    let transport = world.transport();
    let reporter = RecordingReporter::new();
    let hook = RecordingHook::new();
    let outcome = add_bundles(
        &world.config,
        &transport,
        &hook,
        &reporter,
        &names(&["kernel-bundle"]),
    )
    .await
    .unwrap();

    assert_eq!(outcome.code, ExitCode::Ok);
    assert_eq!(
        std::fs::read(world.target("/usr/lib/kernel/test-file")).unwrap(),
        b"boot asset"
    );
    assert_eq!(hook.ran.load(Ordering::SeqCst), 1);
    assert!(hook.boot.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_remove_leaf_bundle_keeps_shared_files() {
    let mut world = TestWorld::new(10);
    world.add_bundle(
        "other-bundle",
        &[],
        &[Entry::File("/usr/share/shared-file", b"shared")],
    );
    world.add_bundle(
        "test-bundle",
        &[],
        &[
            Entry::File("/usr/bin/test-unique", b"unique"),
            Entry::File("/usr/share/shared-file", b"shared"),
        ],
    );
    world.publish();

    let transport = world.transport();
    let reporter = RecordingReporter::new();
    add_bundles(
        &world.config,
        &transport,
        &NoopHook,
        &reporter,
        &names(&["other-bundle", "test-bundle"]),
    )
    .await
    .unwrap();
    assert!(world.target("/usr/bin/test-unique").exists());

    let outcome = remove_bundles(
        &world.config,
        &*transport,
        &reporter,
        &names(&["test-bundle"]),
    )
    .await
    .unwrap();

    assert_eq!(outcome.code, ExitCode::Ok);
    assert_eq!(outcome.removed, 1);
    assert!(!world.target("/usr/bin/test-unique").exists());
    assert_eq!(
        std::fs::read(world.target("/usr/share/shared-file")).unwrap(),
        b"shared"
    );
    assert!(!world
        .target("/usr/share/clear/bundles/test-bundle")
        .exists());
    assert!(!state::tracking_dir(&world.config).join("test-bundle").exists());
    assert!(reporter.contains("Successfully removed 1 bundle"));
}

#[tokio::test]
async fn test_remove_os_core_is_refused() {
    let mut world = TestWorld::new(10);
    world.add_bundle("os-core", &[], &[Entry::File("/usr/bin/core-file", b"core")]);
    world.publish();

    let transport = world.transport();
    let reporter = RecordingReporter::new();
    add_bundles(
        &world.config,
        &transport,
        &NoopHook,
        &reporter,
        &names(&["os-core"]),
    )
    .await
    .unwrap();

    let before = world.live_tree_snapshot();
    let outcome = remove_bundles(&world.config, &*transport, &reporter, &names(&["os-core"]))
        .await
        .unwrap();

    assert_eq!(outcome.code, ExitCode::RequiredBundle);
    assert_eq!(outcome.failed, 1);
    assert!(reporter.contains("Bundle \"os-core\" not allowed to be removed"));
    assert_eq!(world.live_tree_snapshot(), before);
}

#[tokio::test]
async fn test_remove_with_dependants_prints_tree_and_changes_nothing() {
    let mut world = TestWorld::new(10);
    world.add_bundle("base", &[], &[Entry::File("/usr/bin/base-file", b"base")]);
    world.add_bundle("top", &["base"], &[Entry::File("/usr/bin/top-file", b"top")]);
    world.publish();

    let transport = world.transport();
    let reporter = RecordingReporter::new();
    add_bundles(
        &world.config,
        &transport,
        &NoopHook,
        &reporter,
        &names(&["top"]),
    )
    .await
    .unwrap();

    let before = world.live_tree_snapshot();
    let outcome = remove_bundles(&world.config, &*transport, &reporter, &names(&["base"]))
        .await
        .unwrap();

    assert_eq!(outcome.code, ExitCode::RequiredBundle);
    assert!(reporter.contains("required by the following bundles"));
    assert!(reporter.contains("  * top"));
    assert_eq!(world.live_tree_snapshot(), before);
    assert!(world.target("/usr/bin/base-file").exists());
}

#[tokio::test]
async fn test_add_pulls_in_included_bundle() {
    let mut world = TestWorld::new(10);
    world.add_bundle("dep", &[], &[Entry::File("/usr/bin/dep-file", b"dep")]);
    world.add_bundle("main", &["dep"], &[Entry::File("/usr/bin/main-file", b"main")]);
    world.publish();

    let transport = world.transport();
    let reporter = RecordingReporter::new();
    let outcome = add_bundles(
        &world.config,
        &transport,
        &NoopHook,
        &reporter,
        &names(&["main"]),
    )
    .await
    .unwrap();

    assert_eq!(outcome.code, ExitCode::Ok);
    assert!(world.target("/usr/bin/main-file").exists());
    assert!(world.target("/usr/bin/dep-file").exists());
    // both image tracking records exist
    assert!(world.target("/usr/share/clear/bundles/main").exists());
    assert!(world.target("/usr/share/clear/bundles/dep").exists());
    // the requested bundle is tracked as manually installed
    assert!(state::tracking_dir(&world.config).join("main").exists());
}

#[tokio::test]
async fn test_add_mix_of_valid_and_invalid_names() {
    let mut world = TestWorld::new(10);
    world.add_bundle("good", &[], &[Entry::File("/usr/bin/good-file", b"good")]);
    world.publish();

    let transport = world.transport();
    let reporter = RecordingReporter::new();
    let outcome = add_bundles(
        &world.config,
        &transport,
        &NoopHook,
        &reporter,
        &names(&["good", "no-such-bundle"]),
    )
    .await
    .unwrap();

    // the valid bundle still installs, the exit code reports the bad name
    assert_eq!(outcome.code, ExitCode::InvalidBundle);
    assert!(world.target("/usr/bin/good-file").exists());
    assert!(reporter.contains("Bundle \"no-such-bundle\" is invalid, skipping it..."));
}

#[tokio::test]
async fn test_add_unknown_bundle_only() {
    let mut world = TestWorld::new(10);
    world.add_bundle("good", &[], &[]);
    world.publish();

    let transport = world.transport();
    let reporter = RecordingReporter::new();
    let err = add_bundles(
        &world.config,
        &transport,
        &NoopHook,
        &reporter,
        &names(&["no-such-bundle"]),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, UpdaterError::InvalidBundle(_)));
    assert_eq!(err.exit_code(), ExitCode::InvalidBundle);
}

#[tokio::test]
async fn test_double_add_reports_already_installed() {
    let mut world = TestWorld::new(10);
    world.add_bundle("test-bundle", &[], &[Entry::File("/usr/bin/test", b"x")]);
    world.publish();

    let transport = world.transport();
    let reporter = RecordingReporter::new();
    add_bundles(
        &world.config,
        &transport,
        &NoopHook,
        &reporter,
        &names(&["test-bundle"]),
    )
    .await
    .unwrap();

    let reporter = RecordingReporter::new();
    let outcome = add_bundles(
        &world.config,
        &transport,
        &NoopHook,
        &reporter,
        &names(&["test-bundle"]),
    )
    .await
    .unwrap();

    assert_eq!(outcome.code, ExitCode::Ok);
    assert_eq!(outcome.installed, 0);
    assert_eq!(outcome.already_installed, 1);
    assert!(reporter.contains("Bundle \"test-bundle\" is already installed, skipping it..."));
    assert!(reporter.contains("1 bundle was already installed"));
}

#[tokio::test]
async fn test_add_same_bundle_twice_in_one_command() {
    let mut world = TestWorld::new(10);
    world.add_bundle("test-bundle", &[], &[Entry::File("/usr/bin/test", b"x")]);
    world.publish();

    let transport = world.transport();
    let reporter = RecordingReporter::new();
    let outcome = add_bundles(
        &world.config,
        &transport,
        &NoopHook,
        &reporter,
        &names(&["test-bundle", "test-bundle"]),
    )
    .await
    .unwrap();

    // same result as a single bundle-add, plus a notice for the duplicate
    assert_eq!(outcome.code, ExitCode::Ok);
    assert_eq!(outcome.installed, 1);
    assert_eq!(outcome.failed, 0);
    assert!(reporter.contains("already installed"));
    assert!(reporter.contains("Successfully installed 1 bundle"));
}

#[tokio::test]
async fn test_add_then_remove_restores_live_tree() {
    let mut world = TestWorld::new(10);
    world.add_bundle("os-core", &[], &[Entry::File("/usr/bin/core", b"core")]);
    world.add_bundle(
        "test-bundle",
        &[],
        &[
            Entry::Dir("/usr/share/test"),
            Entry::File("/usr/share/test/data", b"payload"),
        ],
    );
    world.publish();

    let transport = world.transport();
    let reporter = RecordingReporter::new();
    add_bundles(
        &world.config,
        &transport,
        &NoopHook,
        &reporter,
        &names(&["os-core"]),
    )
    .await
    .unwrap();

    let before = world.live_tree_snapshot();
    add_bundles(
        &world.config,
        &transport,
        &NoopHook,
        &reporter,
        &names(&["test-bundle"]),
    )
    .await
    .unwrap();
    remove_bundles(
        &world.config,
        &*transport,
        &reporter,
        &names(&["test-bundle"]),
    )
    .await
    .unwrap();

    assert_eq!(world.live_tree_snapshot(), before);
}

#[tokio::test]
async fn test_experimental_bundle_warns_on_add() {
    let mut world = TestWorld::new(10);
    world.add_bundle_opts(
        "labs",
        &[],
        &[Entry::File("/usr/bin/labs-tool", b"beta")],
        true,
        None,
    );
    world.publish();

    let transport = world.transport();
    let reporter = RecordingReporter::new();
    let outcome = add_bundles(
        &world.config,
        &transport,
        &NoopHook,
        &reporter,
        &names(&["labs"]),
    )
    .await
    .unwrap();

    assert_eq!(outcome.code, ExitCode::Ok);
    assert!(reporter.contains("Bundle labs is experimental"));
    assert!(world.target("/usr/bin/labs-tool").exists());
}

#[tokio::test]
async fn test_diskspace_check_rejects_oversized_bundle() {
    let mut world = TestWorld::new(10);
    world.add_bundle_opts(
        "huge",
        &[],
        &[Entry::File("/usr/bin/huge-file", b"small really")],
        false,
        Some(u64::MAX / 2),
    );
    world.publish();

    let transport = world.transport();
    let reporter = RecordingReporter::new();
    let err = add_bundles(
        &world.config,
        &transport,
        &NoopHook,
        &reporter,
        &names(&["huge"]),
    )
    .await
    .unwrap_err();

    assert_eq!(err.exit_code(), ExitCode::DiskSpace);
    assert!(!world.target("/usr/bin/huge-file").exists());

    // --skip-diskspace-check bypasses the refusal
    let mut config = world.config.clone();
    config.skip_diskspace_check = true;
    let outcome = add_bundles(&config, &transport, &NoopHook, &reporter, &names(&["huge"]))
        .await
        .unwrap();
    assert_eq!(outcome.code, ExitCode::Ok);
    assert!(world.target("/usr/bin/huge-file").exists());
}

#[tokio::test]
async fn test_symlink_install_and_remove() {
    let mut world = TestWorld::new(10);
    world.add_bundle(
        "linky",
        &[],
        &[
            Entry::File("/usr/lib/libtest.so.1", b"elf"),
            Entry::Link("/usr/lib/libtest.so", "libtest.so.1"),
        ],
    );
    world.publish();

    let transport = world.transport();
    let reporter = RecordingReporter::new();
    add_bundles(
        &world.config,
        &transport,
        &NoopHook,
        &reporter,
        &names(&["linky"]),
    )
    .await
    .unwrap();

    let link = world.target("/usr/lib/libtest.so");
    assert_eq!(
        std::fs::read_link(&link).unwrap(),
        std::path::PathBuf::from("libtest.so.1")
    );

    remove_bundles(&world.config, &*transport, &reporter, &names(&["linky"]))
        .await
        .unwrap();
    assert!(!link.exists());
    assert!(!world.target("/usr/lib/libtest.so.1").exists());
}

#[tokio::test]
async fn test_clean_after_add_preserves_current_manifests() {
    let mut world = TestWorld::new(10);
    world.add_bundle("test-bundle", &[], &[Entry::File("/usr/bin/test", b"x")]);
    world.publish();

    let transport = world.transport();
    let reporter = RecordingReporter::new();
    add_bundles(
        &world.config,
        &transport,
        &NoopHook,
        &reporter,
        &names(&["test-bundle"]),
    )
    .await
    .unwrap();

    let version_dir = state::version_dir(&world.config, 10);
    assert!(version_dir.join("Manifest.MoM").exists());
    assert!(version_dir.join("Manifest.test-bundle").exists());

    let stats = clean_statedir(&world.config, &reporter, CleanOptions::default()).unwrap();
    assert!(stats.files_removed > 0);

    // current-version manifests survive, hash hints and staged blobs do not
    assert!(version_dir.join("Manifest.MoM").exists());
    assert!(version_dir.join("Manifest.test-bundle").exists());
    let hints: Vec<_> = std::fs::read_dir(&version_dir)
        .unwrap()
        .flatten()
        .filter(|e| {
            clearbundle::hash::is_hashed_manifest_name(&e.file_name().to_string_lossy())
        })
        .collect();
    assert!(hints.is_empty());
    let staged: Vec<_> = std::fs::read_dir(state::staged_dir(&world.config))
        .unwrap()
        .flatten()
        .collect();
    assert!(staged.is_empty());
    // tracking directory is untouched
    assert!(state::tracking_dir(&world.config).join("test-bundle").exists());
}
