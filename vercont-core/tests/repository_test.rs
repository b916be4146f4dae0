//! Repository integration tests

use std::fs;
use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use vercont_core::{
    BlobHash, Error, FixedClock, RepoLock, Repository, RepositoryConfig, Snapshot, VersionId,
};
use tempfile::TempDir;

fn snapshot(files: &[(&str, &str)]) -> Snapshot {
    let mut snapshot = Snapshot::new();
    for (path, data) in files {
        snapshot.insert(path, *data).unwrap();
    }
    snapshot
}

fn repo_with_branch(branch: &str) -> (TempDir, PathBuf, Repository) {
    let tmp = TempDir::new().unwrap();
    let work = tmp.path().join("work");
    let config = RepositoryConfig::new(&work).with_default_branch(branch);
    let repo = Repository::init_with_config(&tmp.path().join("repo"), config).unwrap();
    (tmp, work, repo)
}

#[test]
fn test_save_and_revert_scenario() {
    let (_tmp, work, repo) = repo_with_branch("main");

    let first = repo.save(&snapshot(&[("a.txt", "hello")]), "main", None).unwrap();
    let second = repo
        .save(&snapshot(&[("a.txt", "hello world")]), "main", None)
        .unwrap();
    assert_eq!(repo.get_version(second).unwrap().parent, Some(first));

    let third = repo.revert_to(first, None).unwrap();

    let head = repo.get_version(repo.current_head().unwrap()).unwrap();
    assert_eq!(head.id, third);
    assert_eq!(head.get("a.txt"), Some(BlobHash::from_data(b"hello")));
    assert_eq!(head.entries.len(), 1);
    assert_eq!(repo.branch_history("main").unwrap().len(), 3);
    assert_eq!(fs::read(work.join("a.txt")).unwrap(), b"hello");
}

#[test]
fn test_put_deduplicates() {
    let (_tmp, _work, repo) = repo_with_branch("trunk");
    let lock = RepoLock::new(repo.root());
    let guard = lock.write().unwrap();

    let a = repo.store().put(&guard, b"same bytes").unwrap();
    let count = repo.store().blob_count().unwrap();
    let b = repo.store().put(&guard, b"same bytes").unwrap();

    assert_eq!(a, b);
    assert_eq!(repo.store().blob_count().unwrap(), count);
}

#[test]
fn test_identical_files_share_a_blob() {
    let (_tmp, _work, repo) = repo_with_branch("trunk");
    repo.save(
        &snapshot(&[("a.txt", "shared"), ("copy/a.txt", "shared")]),
        "trunk",
        None,
    )
    .unwrap();
    assert_eq!(repo.store().blob_count().unwrap(), 1);
}

#[test]
fn test_versions_are_immutable() {
    let (_tmp, _work, repo) = repo_with_branch("trunk");
    let first = repo.save(&snapshot(&[("a.txt", "1")]), "trunk", None).unwrap();
    let before = repo.get_version(first).unwrap();

    repo.save(&snapshot(&[("a.txt", "2"), ("b.txt", "b")]), "trunk", None)
        .unwrap();
    repo.fork_branch("side").unwrap();
    repo.save(&snapshot(&[("c.txt", "c")]), "side", None).unwrap();
    repo.revert_to(first, None).unwrap();
    repo.delete_branch("side").unwrap();

    assert_eq!(repo.get_version(first).unwrap(), before);
}

#[test]
fn test_history_terminates_at_root_across_forks() {
    let (_tmp, _work, repo) = repo_with_branch("trunk");
    let root = repo.save(&snapshot(&[("f", "0")]), "trunk", None).unwrap();
    repo.save(&snapshot(&[("f", "1")]), "trunk", None).unwrap();

    repo.fork_branch("a").unwrap();
    repo.save(&snapshot(&[("f", "a1")]), "a", None).unwrap();
    repo.create_branch("b", Some(root)).unwrap();
    repo.save(&snapshot(&[("f", "b1")]), "b", None).unwrap();
    repo.save(&snapshot(&[("f", "b2")]), "b", None).unwrap();
    repo.create_branch("island", None).unwrap();
    let island = repo.save(&snapshot(&[("g", "x")]), "island", None).unwrap();

    for branch in repo.list_branches().unwrap() {
        let history = repo.branch_history(&branch.name).unwrap();
        let last = history.last().unwrap();
        assert!(last.is_root());
        assert!(history.windows(2).all(|w| w[1].id < w[0].id));
        let expected_root = if branch.name == "island" { island } else { root };
        assert_eq!(last.id, expected_root);
    }
    assert_eq!(repo.branch_history("b").unwrap().len(), 3);
}

#[test]
fn test_revert_is_additive() {
    let (_tmp, _work, repo) = repo_with_branch("trunk");
    let old = repo.save(&snapshot(&[("a.txt", "old")]), "trunk", None).unwrap();
    repo.save(&snapshot(&[("a.txt", "new")]), "trunk", None).unwrap();
    let old_version = repo.get_version(old).unwrap();
    let count = repo.branch_history("trunk").unwrap().len();

    repo.revert_to(old, Some("back")).unwrap();

    assert_eq!(repo.branch_history("trunk").unwrap().len(), count + 1);
    assert_eq!(repo.get_version(old).unwrap(), old_version);
}

#[test]
fn test_checkout_fidelity() {
    let (_tmp, work, repo) = repo_with_branch("trunk");
    let first = repo
        .save(
            &snapshot(&[("a.txt", "a"), ("dir/b.txt", "b"), ("dir/sub/c.txt", "c")]),
            "trunk",
            None,
        )
        .unwrap();
    let second = repo
        .save(&snapshot(&[("a.txt", "a2"), ("z.txt", "z")]), "trunk", None)
        .unwrap();

    repo.checkout(first, &work).unwrap();
    fs::write(work.join("notes.txt"), b"mine").unwrap();
    repo.checkout(second, &work).unwrap();

    let version = repo.get_version(second).unwrap();
    for (path, hash) in &version.entries {
        let on_disk = fs::read(work.join(path)).unwrap();
        assert_eq!(on_disk, repo.store().get(*hash).unwrap().to_vec());
    }
    assert!(!work.join("dir").exists());
    assert_eq!(fs::read(work.join("notes.txt")).unwrap(), b"mine");
}

#[test]
fn test_worktree_roundtrip_and_reopen() {
    let tmp = TempDir::new().unwrap();
    let work = tmp.path().join("work");
    let root = work.join(".vercont");
    let clock = FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());

    let repo = Repository::init(&root, &work).unwrap().with_clock(clock);
    fs::write(work.join("readme.md"), b"# title\n").unwrap();
    let id = repo.save_worktree(Some("initial")).unwrap();
    assert!(matches!(
        repo.save_worktree(None),
        Err(Error::NoChanges { .. })
    ));
    drop(repo);

    let repo = Repository::open(&root).unwrap();
    let version = repo.get_version(id).unwrap();
    assert_eq!(version.message.as_deref(), Some("initial"));
    assert_eq!(version.timestamp, clock.0);
    assert_eq!(version.branch, "trunk");
    assert_eq!(repo.resolve("head").unwrap(), id);
    assert_eq!(repo.checked_out().unwrap(), Some(id));
}

#[test]
fn test_branch_operations() {
    let (_tmp, _work, repo) = repo_with_branch("trunk");
    let head = repo.save(&snapshot(&[("a", "a")]), "trunk", None).unwrap();

    assert_eq!(repo.fork_branch("dev").unwrap(), head);
    assert!(matches!(
        repo.create_branch("dev", None),
        Err(Error::DuplicateBranch(_))
    ));
    assert!(matches!(
        repo.switch_branch("missing"),
        Err(Error::BranchNotFound(_))
    ));

    repo.switch_branch("dev").unwrap();
    assert_eq!(repo.current_head().unwrap(), head);
    assert!(matches!(
        repo.delete_branch("dev"),
        Err(Error::BranchCheckedOut(_))
    ));

    repo.rename_branch("trunk", "stable").unwrap();
    let names: Vec<String> = repo.list_branches().unwrap().into_iter().map(|b| b.name).collect();
    assert_eq!(names, vec!["dev", "stable"]);

    repo.delete_branch("stable").unwrap();
    // Versions outlive the branch that created them.
    assert!(repo.get_version(head).is_ok());
    assert!(matches!(
        repo.get_version(VersionId::new(99)),
        Err(Error::VersionNotFound(_))
    ));
}

#[test]
fn test_diff_versions_reports_patches() {
    let (_tmp, _work, repo) = repo_with_branch("trunk");
    let a = repo
        .save(&snapshot(&[("keep", "x\n"), ("edit", "one\ntwo\n"), ("gone", "g")]), "trunk", None)
        .unwrap();
    let b = repo
        .save(&snapshot(&[("keep", "x\n"), ("edit", "one\nthree\n"), ("new", "n")]), "trunk", None)
        .unwrap();

    let changes = repo.diff_versions(a, b).unwrap();
    let summary: Vec<(String, String)> = changes
        .iter()
        .map(|c| (c.path.clone(), c.change.kind().to_string()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("edit".to_string(), "M".to_string()),
            ("gone".to_string(), "D".to_string()),
            ("new".to_string(), "A".to_string()),
        ]
    );
}

#[test]
fn test_stats() {
    let (_tmp, _work, repo) = repo_with_branch("trunk");
    repo.save(&snapshot(&[("a", "1"), ("b", "2")]), "trunk", None).unwrap();
    repo.save(&snapshot(&[("a", "1"), ("b", "3")]), "trunk", None).unwrap();

    let stats = repo.stats().unwrap();
    assert_eq!(stats.versions, 2);
    assert_eq!(stats.branches, 1);
    assert_eq!(stats.store.blobs, 3);
}

#[test]
fn test_concurrent_writers_keep_every_version() {
    const THREADS: usize = 4;
    const SAVES: usize = 10;

    let (tmp, _work, repo) = repo_with_branch("trunk");
    let root = tmp.path().join("repo");
    repo.save(&snapshot(&[("seed.txt", "seed")]), "trunk", None).unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let root = root.clone();
            std::thread::spawn(move || {
                let repo = Repository::open(&root).unwrap();
                (0..SAVES)
                    .map(|i| {
                        let name = format!("t{}.txt", t);
                        let data = format!("writer {} save {}", t, i);
                        repo.save(&snapshot(&[(name.as_str(), data.as_str())]), "trunk", None)
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut saved: Vec<VersionId> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    saved.sort();
    saved.dedup();
    assert_eq!(saved.len(), THREADS * SAVES);

    let history = repo.branch_history("trunk").unwrap();
    assert_eq!(history.len(), THREADS * SAVES + 1);
    let in_history: Vec<VersionId> = history.iter().map(|v| v.id).collect();
    for id in &saved {
        assert!(in_history.contains(id), "{} missing from history", id);
    }
    for pair in history.windows(2) {
        assert_eq!(pair[0].parent, Some(pair[1].id));
    }
    assert_eq!(repo.stats().unwrap().versions, THREADS * SAVES + 1);
}
