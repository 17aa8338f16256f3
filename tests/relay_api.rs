//! Integration tests for the relay HTTP API
//!
//! These tests start a real server on an ephemeral port and drive it with
//! reqwest. Repositories are local directories (`git.allow_local_repos`), so
//! no network access is needed.
//!
//! Tests that need git skip themselves when it is not installed.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test relay_api -- --nocapture
//! ```

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tempfile::TempDir;

use git_relay::config::{Config, Secret};
use git_relay::pr::{PrError, PrRequest, PrTool};
use git_relay::rest::{ApiState, RelayServer, RunningServer};

const SECRET: &str = "integration-secret";
const AUTH_HEADER: &str = "X-Auth-Key";

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn git_installed() -> bool {
    which::which("git").is_ok()
}

/// Macro to skip tests when git is unavailable
macro_rules! skip_without_git {
    () => {
        if !git_installed() {
            eprintln!("Skipping test: git not installed");
            return;
        }
    };
}

/// Run git with a fixed identity, panicking on failure
fn git(cwd: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_AUTHOR_NAME", "relay-test")
        .env("GIT_AUTHOR_EMAIL", "relay-test@example.com")
        .env("GIT_COMMITTER_NAME", "relay-test")
        .env("GIT_COMMITTER_EMAIL", "relay-test@example.com")
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A repository with one commit on `main`
fn seed_repo(parent: &Path, name: &str) -> PathBuf {
    let repo = parent.join(name);
    std::fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "-q"]);
    git(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    std::fs::write(repo.join("README.md"), "hello relay\n").unwrap();
    git(&repo, &["add", "README.md"]);
    git(&repo, &["commit", "-q", "-m", "initial"]);
    repo
}

/// Test context holding the workspace root, fixtures and a running server
struct RelayTestContext {
    temp_dir: TempDir,
    workspace_root: PathBuf,
    server: RunningServer,
    client: reqwest::Client,
}

impl RelayTestContext {
    async fn new() -> Self {
        Self::with(|_| {}, None).await
    }

    async fn with(adjust: impl FnOnce(&mut Config), pr_tool: Option<Arc<dyn PrTool>>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let workspace_root = temp_dir.path().join("workspaces");

        let mut config = Config::default();
        config.auth.secret = Some(Secret::new(SECRET));
        config.workspace.root = workspace_root.to_string_lossy().to_string();
        config.git.allow_local_repos = true;
        adjust(&mut config);

        let mut state = ApiState::new(config).expect("Failed to build state");
        if let Some(tool) = pr_tool {
            state = state.with_pr_tool(tool);
        }
        let workspace_root = state.workspaces.root().to_path_buf();

        let server = RelayServer::bind(state, "127.0.0.1", 0)
            .await
            .expect("Failed to bind")
            .spawn()
            .expect("Failed to spawn");

        Self {
            temp_dir,
            workspace_root,
            server,
            client: reqwest::Client::new(),
        }
    }

    fn fixtures(&self) -> &Path {
        self.temp_dir.path()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.url(), path)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(self.url(path)).header(AUTH_HEADER, SECRET)
    }

    /// Workspace directories currently on disk
    fn workspace_dirs(&self) -> Vec<PathBuf> {
        std::fs::read_dir(&self.workspace_root)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.path())
                    .filter(|p| {
                        p.file_name()
                            .and_then(|n| n.to_str())
                            .is_some_and(|n| n.starts_with("ws-"))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Streamed responses release their workspace right after the last chunk
    async fn assert_workspaces_cleaned(&self) {
        for _ in 0..40 {
            if self.workspace_dirs().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("workspaces left behind: {:?}", self.workspace_dirs());
    }

    async fn stop(self) {
        self.server.stop().await;
    }
}

/// PR tool double that always fails with a message containing the secret
struct FailingPrTool;

#[async_trait]
impl PrTool for FailingPrTool {
    fn name(&self) -> &str {
        "failing"
    }

    async fn create_pr(&self, _repo_dir: &Path, _request: &PrRequest) -> Result<String, PrError> {
        Err(PrError::Failed(format!("HTTP 403 using {SECRET}")))
    }
}

/// PR tool double that records the request and returns a URL
struct RecordingPrTool {
    seen: std::sync::Mutex<Vec<PrRequest>>,
}

#[async_trait]
impl PrTool for RecordingPrTool {
    fn name(&self) -> &str {
        "recording"
    }

    async fn create_pr(&self, _repo_dir: &Path, request: &PrRequest) -> Result<String, PrError> {
        self.seen.lock().unwrap().push(request.clone());
        Ok("https://github.com/acme/widgets/pull/7".to_string())
    }
}

// ─── Authentication ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_is_public() {
    let ctx = RelayTestContext::new().await;

    let response = ctx.client.get(ctx.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["workspace_root"].as_str().is_some());

    ctx.stop().await;
}

#[tokio::test]
async fn test_protected_endpoints_require_secret() {
    let ctx = RelayTestContext::new().await;

    for (method, path) in [
        ("POST", "/git-exec"),
        ("POST", "/git/fetch-bundle"),
        ("POST", "/git/push-bundle"),
        ("GET", "/workspace/list"),
    ] {
        let method = reqwest::Method::from_bytes(method.as_bytes()).unwrap();

        let missing = ctx
            .client
            .request(method.clone(), ctx.url(path))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED, "{path} without key");

        let wrong = ctx
            .client
            .request(method, ctx.url(path))
            .header(AUTH_HEADER, "not-the-secret")
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED, "{path} with wrong key");
        let body: Value = wrong.json().await.unwrap();
        assert!(!body.to_string().contains("not-the-secret"));
    }

    assert!(ctx.workspace_dirs().is_empty());
    ctx.stop().await;
}

#[tokio::test]
async fn test_response_carries_request_id() {
    let ctx = RelayTestContext::new().await;

    let response = ctx
        .client
        .get(ctx.url("/workspace/list"))
        .header(AUTH_HEADER, SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["count"], 0);

    ctx.stop().await;
}

// ─── Direct execution ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_exec_runs_in_fresh_workspace() {
    skip_without_git!();
    let ctx = RelayTestContext::new().await;

    let response = ctx
        .post("/git-exec")
        .json(&json!({ "command": ["git", "init", "-q", "scratch"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["exit_code"], 0);

    ctx.assert_workspaces_cleaned().await;
    ctx.stop().await;
}

#[tokio::test]
async fn test_exec_rejections_are_bad_requests() {
    let ctx = RelayTestContext::new().await;

    for command in [
        json!(["ls", "-la"]),
        json!(["git", "status;", "rm", "-rf", "/"]),
        json!(["git", "-c", "core.sshCommand=sh", "fetch"]),
        json!(["git", "daemon"]),
        json!(["git", "add", "../../etc/passwd"]),
        json!(["git", "clone", "ext::sh -c id", "x"]),
        json!([]),
    ] {
        let response = ctx
            .post("/git-exec")
            .json(&json!({ "command": command }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{command}");
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "validation_error", "{command}");
    }

    ctx.assert_workspaces_cleaned().await;
    ctx.stop().await;
}

#[tokio::test]
async fn test_exec_abbreviated_upload_pack_never_runs() {
    let ctx = RelayTestContext::new().await;
    let marker = ctx.fixtures().join("upload-pack-ran");
    let touch = format!("touch {}", marker.display());

    for command in [
        json!(["git", "ls-remote", format!("--upload-pac={touch}"), "."]),
        json!(["git", "clone", format!("-u{touch}"), "https://example.com/r.git"]),
        json!(["git", "fetch", format!("-qu{touch}"), "origin"]),
    ] {
        let response = ctx
            .post("/git-exec")
            .json(&json!({ "command": command }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{command}");
    }
    assert!(!marker.exists());

    ctx.assert_workspaces_cleaned().await;
    ctx.stop().await;
}

#[tokio::test]
async fn test_exec_failure_reports_stderr() {
    skip_without_git!();
    let ctx = RelayTestContext::new().await;

    // No repository in a fresh workspace
    let response = ctx
        .post("/git-exec")
        .json(&json!({ "command": ["git", "log"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "execution_failed");
    assert!(body["exit_code"].as_i64().is_some_and(|c| c != 0));
    assert!(body["stderr"].as_str().is_some_and(|s| !s.is_empty()));

    ctx.assert_workspaces_cleaned().await;
    ctx.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_exec_timeout_cleans_workspace() {
    use std::os::unix::fs::PermissionsExt;

    let scripts = TempDir::new().unwrap();
    let fake_git = scripts.path().join("slow-git");
    std::fs::write(&fake_git, "#!/bin/sh\nsleep 30\n").unwrap();
    std::fs::set_permissions(&fake_git, std::fs::Permissions::from_mode(0o755)).unwrap();

    let binary = fake_git.to_string_lossy().to_string();
    let ctx = RelayTestContext::with(
        |config| {
            config.exec.git_binary = binary;
            config.exec.short_timeout_secs = 1;
        },
        None,
    )
    .await;

    let started = std::time::Instant::now();
    let response = ctx
        .post("/git-exec")
        .json(&json!({ "command": ["git", "status"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(20));

    ctx.assert_workspaces_cleaned().await;
    ctx.stop().await;
}

// ─── Fetch bundle ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_bundle_round_trip() {
    skip_without_git!();
    let ctx = RelayTestContext::new().await;
    let origin = seed_repo(ctx.fixtures(), "widgets");
    let head = git(&origin, &["rev-parse", "HEAD"]);

    let response = ctx
        .post("/git/fetch-bundle")
        .json(&json!({ "repo_url": origin.to_string_lossy() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/octet-stream"
    );
    let disposition = response.headers()["content-disposition"].to_str().unwrap();
    assert!(disposition.contains("widgets.bundle"), "{disposition}");
    let bytes = response.bytes().await.unwrap();
    assert!(!bytes.is_empty());

    let out = TempDir::new().unwrap();
    let bundle = out.path().join("widgets.bundle");
    std::fs::write(&bundle, &bytes).unwrap();
    git(
        out.path(),
        &["clone", "-q", "-b", "main", bundle.to_str().unwrap(), "restored"],
    );
    let restored_head = git(&out.path().join("restored"), &["rev-parse", "HEAD"]);
    assert_eq!(restored_head, head);

    ctx.assert_workspaces_cleaned().await;
    ctx.stop().await;
}

#[tokio::test]
async fn test_fetch_bundle_concurrent_requests() {
    skip_without_git!();
    let ctx = RelayTestContext::new().await;

    // Distinct content per repository so every HEAD differs
    let repos: Vec<(String, String)> = (0..4)
        .map(|i| {
            let repo = seed_repo(ctx.fixtures(), &format!("repo-{i}"));
            std::fs::write(repo.join("id.txt"), format!("repository {i}\n")).unwrap();
            git(&repo, &["add", "id.txt"]);
            git(&repo, &["commit", "-q", "-m", &format!("repository {i}")]);
            let head = git(&repo, &["rev-parse", "HEAD"]);
            (repo.to_string_lossy().to_string(), head)
        })
        .collect();

    let requests = repos.iter().map(|(url, _)| {
        let request = ctx
            .post("/git/fetch-bundle")
            .json(&json!({ "repo_url": url, "ref": "main" }));
        async move {
            let response = request.send().await.unwrap();
            let status = response.status();
            let bytes = response.bytes().await.unwrap();
            (status, bytes)
        }
    });
    let results = futures_util::future::join_all(requests).await;

    let out = TempDir::new().unwrap();
    for (i, ((status, bytes), (_, head))) in results.into_iter().zip(&repos).enumerate() {
        assert_eq!(status, StatusCode::OK);
        let bundle = out.path().join(format!("repo-{i}.bundle"));
        std::fs::write(&bundle, &bytes).unwrap();
        let dest = format!("restored-{i}");
        git(
            out.path(),
            &["clone", "-q", "-b", "main", bundle.to_str().unwrap(), &dest],
        );
        let restored = git(&out.path().join(&dest), &["rev-parse", "HEAD"]);
        assert_eq!(&restored, head, "bundle {i} does not match its repository");
    }

    ctx.assert_workspaces_cleaned().await;
    ctx.stop().await;
}

#[tokio::test]
async fn test_fetch_bundle_rejects_bad_input() {
    let ctx = RelayTestContext::with(|config| config.git.allow_local_repos = false, None).await;

    for body in [
        json!({ "repo_url": "/etc" }),
        json!({ "repo_url": "ext::sh -c id" }),
        json!({ "repo_url": "--upload-pack=touch /tmp/x" }),
        json!({ "repo_url": "https://github.com/acme/widgets.git", "ref": "main..evil" }),
    ] {
        let response = ctx.post("/git/fetch-bundle").json(&body).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
    }

    ctx.assert_workspaces_cleaned().await;
    ctx.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_fetch_bundle_timeout_mid_workflow_cleans_workspace() {
    use std::os::unix::fs::PermissionsExt;

    skip_without_git!();
    let real_git = which::which("git").unwrap();
    let scripts = TempDir::new().unwrap();
    let origin = seed_repo(scripts.path(), "stalls");

    // Clone and everything else go to real git; only bundle creation hangs
    let fake_git = scripts.path().join("stalling-git");
    std::fs::write(
        &fake_git,
        format!(
            "#!/bin/sh\nif [ \"$1\" = bundle ] && [ \"$2\" = create ]; then\n  sleep 30\n  exit 1\nfi\nexec {} \"$@\"\n",
            real_git.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&fake_git, std::fs::Permissions::from_mode(0o755)).unwrap();

    let binary = fake_git.to_string_lossy().to_string();
    let ctx = RelayTestContext::with(
        |config| {
            config.exec.git_binary = binary;
            config.exec.long_timeout_secs = 2;
        },
        None,
    )
    .await;

    let started = std::time::Instant::now();
    let response = ctx
        .post("/git/fetch-bundle")
        .json(&json!({ "repo_url": origin.to_string_lossy() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(20));

    ctx.assert_workspaces_cleaned().await;
    ctx.stop().await;
}

#[tokio::test]
async fn test_fetch_bundle_clone_failure_cleans_workspace() {
    skip_without_git!();
    let ctx = RelayTestContext::new().await;
    let missing = ctx.fixtures().join("does-not-exist");

    let response = ctx
        .post("/git/fetch-bundle")
        .json(&json!({ "repo_url": missing.to_string_lossy() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "execution_failed");

    ctx.assert_workspaces_cleaned().await;
    ctx.stop().await;
}

// ─── Push bundle ──────────────────────────────────────────────────────────────

/// Bare origin plus a bundle holding a new `feature` commit on top of it
fn push_fixture(parent: &Path) -> (PathBuf, Vec<u8>, String) {
    let seed = seed_repo(parent, "seed");
    git(parent, &["clone", "-q", "--bare", "seed", "origin.git"]);
    let origin = parent.join("origin.git");

    git(&seed, &["checkout", "-q", "-b", "feature"]);
    std::fs::write(seed.join("feature.txt"), "new work\n").unwrap();
    git(&seed, &["add", "feature.txt"]);
    git(&seed, &["commit", "-q", "-m", "feature work"]);
    let commit = git(&seed, &["rev-parse", "HEAD"]);

    let bundle = parent.join("feature.bundle");
    git(
        &seed,
        &["bundle", "create", bundle.to_str().unwrap(), "feature"],
    );
    (origin, std::fs::read(&bundle).unwrap(), commit)
}

fn push_form(origin: &Path, bundle: Vec<u8>) -> Form {
    Form::new()
        .text("repo_url", origin.to_string_lossy().to_string())
        .text("branch", "feature")
        .part(
            "bundle",
            Part::bytes(bundle)
                .file_name("feature.bundle")
                .mime_str("application/octet-stream")
                .unwrap(),
        )
}

#[tokio::test]
async fn test_push_bundle_updates_remote() {
    skip_without_git!();
    let ctx = RelayTestContext::new().await;
    let (origin, bundle, commit) = push_fixture(ctx.fixtures());

    let response = ctx
        .post("/git/push-bundle")
        .multipart(push_form(&origin, bundle))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["pushed"], true);
    assert_eq!(body["branch"], "feature");
    assert_eq!(body["commit"], commit.as_str());
    assert!(body.get("pr_created").is_none());

    let remote_head = git(&origin, &["rev-parse", "refs/heads/feature"]);
    assert_eq!(remote_head, commit);

    ctx.assert_workspaces_cleaned().await;
    ctx.stop().await;
}

#[tokio::test]
async fn test_push_bundle_pr_failure_still_reports_push() {
    skip_without_git!();
    let ctx = RelayTestContext::with(|_| {}, Some(Arc::new(FailingPrTool))).await;
    let (origin, bundle, _) = push_fixture(ctx.fixtures());

    let response = ctx
        .post("/git/push-bundle")
        .multipart(push_form(&origin, bundle).text("create_pr", "true"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["pushed"], true);
    assert_eq!(body["pr_created"], false);
    let pr_error = body["pr_error"].as_str().unwrap();
    assert!(pr_error.contains("403"));
    assert!(!pr_error.contains(SECRET));

    ctx.assert_workspaces_cleaned().await;
    ctx.stop().await;
}

#[tokio::test]
async fn test_push_bundle_opens_pr_with_defaults() {
    skip_without_git!();
    let tool = Arc::new(RecordingPrTool {
        seen: std::sync::Mutex::new(Vec::new()),
    });
    let ctx = RelayTestContext::with(|_| {}, Some(tool.clone())).await;
    let (origin, bundle, _) = push_fixture(ctx.fixtures());

    let response = ctx
        .post("/git/push-bundle")
        .multipart(push_form(&origin, bundle).text("create_pr", "true"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["pr_created"], true);
    assert_eq!(body["pr_url"], "https://github.com/acme/widgets/pull/7");

    let seen = tool.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].head, "feature");
    assert_eq!(seen[0].title, "Changes from feature");

    drop(seen);
    ctx.assert_workspaces_cleaned().await;
    ctx.stop().await;
}

#[tokio::test]
async fn test_push_bundle_validation_errors() {
    let ctx = RelayTestContext::new().await;
    let origin = ctx.fixtures().join("origin.git");

    // No bundle part
    let form = Form::new()
        .text("repo_url", origin.to_string_lossy().to_string())
        .text("branch", "feature");
    let response = ctx.post("/git/push-bundle").multipart(form).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Invalid branch name
    let form = Form::new()
        .text("repo_url", origin.to_string_lossy().to_string())
        .text("branch", "feature..x")
        .part("bundle", Part::bytes(b"# v2 git bundle\n".to_vec()));
    let response = ctx.post("/git/push-bundle").multipart(form).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Missing branch
    let form = Form::new()
        .text("repo_url", origin.to_string_lossy().to_string())
        .part("bundle", Part::bytes(b"# v2 git bundle\n".to_vec()));
    let response = ctx.post("/git/push-bundle").multipart(form).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    ctx.assert_workspaces_cleaned().await;
    ctx.stop().await;
}

#[tokio::test]
async fn test_push_bundle_rejects_garbage_bundle() {
    skip_without_git!();
    let ctx = RelayTestContext::new().await;
    let (origin, _, _) = push_fixture(ctx.fixtures());

    let response = ctx
        .post("/git/push-bundle")
        .multipart(push_form(&origin, b"definitely not a bundle".to_vec()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let branches = git(&origin, &["branch", "--list", "feature"]);
    assert!(branches.is_empty());

    ctx.assert_workspaces_cleaned().await;
    ctx.stop().await;
}

#[tokio::test]
async fn test_push_bundle_upload_limit() {
    let ctx = RelayTestContext::with(|config| config.limits.max_bundle_bytes = 1024, None).await;
    let origin = ctx.fixtures().join("origin.git");

    let form = Form::new()
        .text("repo_url", origin.to_string_lossy().to_string())
        .text("branch", "feature")
        .part("bundle", Part::bytes(vec![b'x'; 4096]));
    let response = ctx.post("/git/push-bundle").multipart(form).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    ctx.assert_workspaces_cleaned().await;
    ctx.stop().await;
}
