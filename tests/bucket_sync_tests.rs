// Bucket sync tests against real git repositories.
//
// These shell out to the git binary; each test returns early when git is not
// available in the environment.

mod test_helpers;

use poks::{InstallStatus, PoksConfig, PoksError, bucket, platform};
use std::fs;
use std::process::Command;
use test_helpers::*;

fn host() -> (&'static str, &'static str) {
    let (os, arch) = platform::current();
    (os.as_str(), arch.as_str())
}

#[test]
fn test_sync_clones_then_pulls() {
    if !git_available() {
        return;
    }
    let env = PoksEnv::new();
    let (os, arch) = host();

    let repo_dir = env.temp_dir.path().join("bucket-src");
    let manifest =
        manifest_for_archive("tool", "1.0.0", os, arch, ".zip", &env.archives.join("t"), "00");
    let url = create_bucket_repo(&repo_dir, &[("tool", &manifest)]);

    let bucket_decl = poks::PoksBucket {
        name: "main".into(),
        url,
    };
    let local = bucket::sync_bucket(&bucket_decl, &env.buckets).unwrap();
    assert!(local.join("tool.json").exists());

    // Add a second manifest upstream; a re-sync must fast-forward it in.
    fs::write(
        repo_dir.join("extra.json"),
        manifest.to_json_string().unwrap(),
    )
    .unwrap();
    let run = |args: &[&str]| {
        let status = Command::new("git")
            .current_dir(&repo_dir)
            .args(args)
            .env("GIT_AUTHOR_NAME", "poks-tests")
            .env("GIT_AUTHOR_EMAIL", "tests@example.invalid")
            .env("GIT_COMMITTER_NAME", "poks-tests")
            .env("GIT_COMMITTER_EMAIL", "tests@example.invalid")
            .status()
            .unwrap();
        assert!(status.success());
    };
    run(&["add", "."]);
    run(&["commit", "--quiet", "-m", "add extra"]);

    let local = bucket::sync_bucket(&bucket_decl, &env.buckets).unwrap();
    assert!(local.join("extra.json").exists());
}

#[test]
fn test_sync_failure_carries_git_stderr() {
    if !git_available() {
        return;
    }
    let env = PoksEnv::new();
    let bucket_decl = poks::PoksBucket {
        name: "broken".into(),
        url: file_url(&env.temp_dir.path().join("does-not-exist")),
    };
    let err = bucket::sync_bucket(&bucket_decl, &env.buckets).unwrap_err();
    match err {
        PoksError::BucketSync { name, stderr } => {
            assert_eq!(name, "broken");
            assert!(!stderr.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_install_through_git_bucket() {
    if !git_available() {
        return;
    }
    let env = PoksEnv::new();
    let (os, arch) = host();

    let (archive, sha) = create_tar_gz(
        &env.archives,
        &format!("foo-1.0.0_{os}-{arch}.tar.gz"),
        &[("bin/foo", "#!/bin/sh\necho foo\n")],
        None,
    );
    let manifest = manifest_for_archive("foo", "1.0.0", os, arch, ".tar.gz", &archive, &sha);
    let repo_dir = env.temp_dir.path().join("bucket-src");
    let url = create_bucket_repo(&repo_dir, &[("foo", &manifest)]);

    let config: PoksConfig = serde_json::from_value(serde_json::json!({
        "buckets": [{ "name": "main", "url": url }],
        "apps": [{ "name": "foo", "version": "1.0.0", "bucket": "main" }],
    }))
    .unwrap();

    let report = env.poks.install(&config).await.unwrap();
    assert_eq!(report.apps[0].status, InstallStatus::Installed);
    assert!(env.install_dir("foo", "1.0.0").join("bin/foo").exists());
    assert!(env.buckets.join("main/foo.json").exists());
}

#[tokio::test]
async fn test_install_app_clones_bucket_url_on_the_fly() {
    if !git_available() {
        return;
    }
    let env = PoksEnv::new();
    let (os, arch) = host();

    let (archive, sha) = create_zip(&env.archives, "bar.zip", &[("bin/bar", "bar")]);
    let manifest = manifest_for_archive("bar", "0.3.0", os, arch, ".zip", &archive, &sha);
    let repo_dir = env.temp_dir.path().join("tools-bucket");
    let url = create_bucket_repo(&repo_dir, &[("bar", &manifest)]);

    let report = env
        .poks
        .install_app("bar", Some("0.3.0"), Some(url.as_str()))
        .await
        .unwrap();
    assert_eq!(report.apps[0].status, InstallStatus::Installed);
    // The clone slot is derived from the URL's final path segment.
    assert!(env.buckets.join("tools-bucket/bar.json").exists());
}

#[test]
fn test_manifest_not_found_lists_searched_buckets() {
    let env = PoksEnv::new();
    fs::create_dir_all(env.buckets.join("main")).unwrap();
    fs::create_dir_all(env.buckets.join("extras")).unwrap();

    let err = bucket::search_local_buckets("ghost", &env.buckets).unwrap_err();
    match err {
        PoksError::ManifestNotFound { app, searched } => {
            assert_eq!(app, "ghost");
            assert_eq!(searched.len(), 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}
