//! The generic `Driver` conformance harness.
//!
//! Every backend-agnostic invariant a storage driver must uphold is
//! expressed here exactly once, against `&dyn Driver`, so a new backend
//! earns confidence by running the same battery an established one
//! already passes rather than by a bespoke per-backend test suite. The
//! filesystem driver is the only backend runnable without network
//! credentials, so it is the one this harness is exercised against in CI;
//! the S3-family and WebHDFS drivers are covered by unit tests against
//! mocked transports instead.

use bytes::Bytes;

use ocistore_driver::{Driver, WalkAction};

/// `Put(p, b)` followed by `Get(p)` returns exactly `b`.
pub async fn put_then_get_round_trips(driver: &dyn Driver, path: &str, body: &[u8]) {
    driver
        .put_content(path, Bytes::copy_from_slice(body))
        .await
        .expect("put_content");

    let got = driver.get_content(path).await.expect("get_content");
    assert_eq!(got.as_ref(), body, "Get must return exactly what was Put");
}

/// `Put(p, a)` then `Move(p, q)` makes `Get(q)` return `a` and `Stat(p)`
/// fail with `PathNotFound`.
pub async fn move_relocates_and_leaves_no_trace(driver: &dyn Driver, src: &str, dst: &str, body: &[u8]) {
    driver
        .put_content(src, Bytes::copy_from_slice(body))
        .await
        .expect("put_content");

    driver.move_to(src, dst).await.expect("move_to");

    let got = driver.get_content(dst).await.expect("get_content after move");
    assert_eq!(got.as_ref(), body);

    let err = driver.stat(src).await.expect_err("source must be gone after move");
    assert_eq!(err.code(), "PATH_NOT_FOUND");
}

/// `Stat` on a path that was never `Put` fails with `PathNotFound`,
/// never panics or returns a zero-valued `FileInfo`.
pub async fn stat_on_missing_path_is_path_not_found(driver: &dyn Driver, path: &str) {
    let err = driver.stat(path).await.expect_err("missing path must error");
    assert_eq!(err.code(), "PATH_NOT_FOUND");
}

/// `List` on a directory returns every immediate child exactly once, in
/// any order.
pub async fn list_returns_every_child_exactly_once(driver: &dyn Driver, dir: &str, children: &[&str]) {
    for child in children {
        driver
            .put_content(child, Bytes::from_static(b"x"))
            .await
            .expect("put_content");
    }

    let mut listed = driver.list(dir).await.expect("list");
    listed.sort();
    let mut expected: Vec<String> = children.iter().map(|c| c.to_string()).collect();
    expected.sort();
    assert_eq!(listed, expected, "list must return every child exactly once");
}

/// `Delete` on a directory path recursively removes every descendant; a
/// subsequent `Walk` over that prefix visits nothing.
pub async fn delete_is_recursive(driver: &dyn Driver, dir: &str, descendants: &[&str]) {
    for path in descendants {
        driver
            .put_content(path, Bytes::from_static(b"x"))
            .await
            .expect("put_content");
    }

    driver.delete(dir).await.expect("delete");

    let mut visited = Vec::new();
    let walked = driver
        .walk(dir, &mut |info| {
            visited.push(info.path.clone());
            Ok(WalkAction::Continue)
        })
        .await;

    // A missing root is an acceptable outcome of walking a deleted
    // prefix (filesystem semantics); what the invariant actually
    // forbids is visiting a descendant that should have been removed.
    if let Err(e) = walked {
        assert_eq!(e.code(), "PATH_NOT_FOUND");
    }
    assert!(visited.is_empty(), "delete must be recursive: {visited:?} still visible");
}

/// `Walk` visits a directory before its children, and honors `SkipDir`
/// by not descending into the skipped subtree.
pub async fn walk_skip_dir_prunes_subtree(driver: &dyn Driver, root: &str, skip: &str, inside_skip: &str, outside: &str) {
    driver
        .put_content(inside_skip, Bytes::from_static(b"x"))
        .await
        .expect("put_content");
    driver
        .put_content(outside, Bytes::from_static(b"x"))
        .await
        .expect("put_content");

    let mut visited = Vec::new();
    driver
        .walk(root, &mut |info| {
            visited.push(info.path.clone());
            if info.path == skip {
                Ok(WalkAction::SkipDir)
            } else {
                Ok(WalkAction::Continue)
            }
        })
        .await
        .expect("walk");

    assert!(visited.contains(&outside.to_string()), "non-skipped path must be visited");
    assert!(
        !visited.contains(&inside_skip.to_string()),
        "SkipDir must prune the subtree: {visited:?}"
    );
}

/// A `Writer` that is `Cancel`led leaves no bytes visible at its
/// destination path.
pub async fn cancelled_writer_leaves_no_trace(driver: &dyn Driver, path: &str) {
    let mut writer = driver.writer(path, false).await.expect("writer");
    writer.write(Bytes::from_static(b"partial")).await.expect("write");
    writer.cancel().await.expect("cancel");

    let err = driver.stat(path).await.expect_err("cancelled upload must not be visible");
    assert_eq!(err.code(), "PATH_NOT_FOUND");
}

/// A `Writer` that is `Commit`ted makes its full contents visible at the
/// destination path, and a second `Commit` fails rather than silently
/// succeeding.
pub async fn committed_writer_is_visible_and_commit_is_single_shot(driver: &dyn Driver, path: &str, body: &[u8]) {
    let mut writer = driver.writer(path, false).await.expect("writer");
    writer.write(Bytes::copy_from_slice(body)).await.expect("write");
    writer.commit(Some(body.len() as u64)).await.expect("commit");

    let got = driver.get_content(path).await.expect("get_content");
    assert_eq!(got.as_ref(), body);

    let err = writer.commit(None).await.expect_err("second commit must fail");
    assert_eq!(err.code(), "WRITER_CLOSED");
}

/// Runs the full battery against `driver`, using `prefix` to namespace
/// every path the battery touches so multiple runs (e.g. one per
/// backend) never collide inside the same root.
pub async fn run_full_battery(driver: &dyn Driver, prefix: &str) {
    put_then_get_round_trips(driver, &format!("{prefix}/roundtrip"), b"hello conformance").await;

    move_relocates_and_leaves_no_trace(
        driver,
        &format!("{prefix}/move/src"),
        &format!("{prefix}/move/dst"),
        b"move me",
    )
    .await;

    stat_on_missing_path_is_path_not_found(driver, &format!("{prefix}/never-existed")).await;

    list_returns_every_child_exactly_once(
        driver,
        &format!("{prefix}/listing"),
        &[
            &format!("{prefix}/listing/a"),
            &format!("{prefix}/listing/b"),
            &format!("{prefix}/listing/c"),
        ],
    )
    .await;

    delete_is_recursive(
        driver,
        &format!("{prefix}/deletable"),
        &[
            &format!("{prefix}/deletable/one"),
            &format!("{prefix}/deletable/nested/two"),
        ],
    )
    .await;

    walk_skip_dir_prunes_subtree(
        driver,
        &format!("{prefix}/walk"),
        &format!("{prefix}/walk/skip"),
        &format!("{prefix}/walk/skip/hidden"),
        &format!("{prefix}/walk/visible"),
    )
    .await;

    cancelled_writer_leaves_no_trace(driver, &format!("{prefix}/writer/cancelled")).await;
    committed_writer_is_visible_and_commit_is_single_shot(driver, &format!("{prefix}/writer/committed"), b"committed body")
        .await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ocistore_driver::filesystem::FilesystemDriver;

    use super::*;

    #[tokio::test]
    async fn filesystem_driver_passes_the_full_battery() {
        let tmp = tempfile::tempdir().unwrap();
        let driver: Arc<dyn Driver> = Arc::new(FilesystemDriver::new(tmp.path().to_path_buf()));
        run_full_battery(driver.as_ref(), "/conformance").await;
    }

    #[tokio::test]
    async fn two_namespaced_runs_do_not_interfere() {
        let tmp = tempfile::tempdir().unwrap();
        let driver: Arc<dyn Driver> = Arc::new(FilesystemDriver::new(tmp.path().to_path_buf()));
        run_full_battery(driver.as_ref(), "/run-a").await;
        run_full_battery(driver.as_ref(), "/run-b").await;
    }
}
