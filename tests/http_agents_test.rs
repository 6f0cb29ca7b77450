mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use serial_test::serial;
use tower::ServiceExt;

use aiagent_console::http;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
#[serial]
async fn create_list_get_delete_round_trip() {
    let data_dir = tempfile::tempdir().unwrap();
    let repo_dir = tempfile::tempdir().unwrap();
    common::init_git_repo(repo_dir.path());
    let state = common::test_state(data_dir.path());
    let app = http::router(state);

    let create = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/agents")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"name": "demo", "sourceRepo": repo_dir.path().to_string_lossy()}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(create.status(), StatusCode::CREATED);
    let agent = body_json(create).await;
    let agent_id = agent["id"].as_str().unwrap().to_string();
    assert_eq!(agent["tabs"].as_array().unwrap().len(), 1);

    let list = app
        .clone()
        .oneshot(Request::builder().uri("/api/agents").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(list.status(), StatusCode::OK);
    let listed = body_json(list).await;
    assert_eq!(listed["agents"].as_array().unwrap().len(), 1);

    let get = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/agents/{agent_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(get.status(), StatusCode::OK);

    let delete = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/agents/{agent_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(delete.status(), StatusCode::NO_CONTENT);
    assert!(!repo_dir.path().join(".git/worktrees").join(&agent_id).exists());

    let missing = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/agents/{agent_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
#[serial]
async fn create_rejects_missing_fields() {
    let data_dir = tempfile::tempdir().unwrap();
    let state = common::test_state(data_dir.path());
    let app = http::router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/agents")
                .header("content-type", "application/json")
                .body(Body::from(json!({"name": "", "sourceRepo": ""}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[serial]
async fn pr_requires_a_title() {
    let data_dir = tempfile::tempdir().unwrap();
    let repo_dir = tempfile::tempdir().unwrap();
    common::init_git_repo(repo_dir.path());
    let state = common::test_state(data_dir.path());
    let app = http::router(state);

    let create = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/agents")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"name": "demo", "sourceRepo": repo_dir.path().to_string_lossy()}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let agent = body_json(create).await;
    let agent_id = agent["id"].as_str().unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/agents/{agent_id}/pr"))
                .header("content-type", "application/json")
                .body(Body::from(json!({"title": ""}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// End-to-end scenario 6 (§8): conflicting edits on both branches surface as
/// `success:false` with the conflicted file named, and the source repo's
/// branch is restored to where it was before the call.
#[tokio::test]
#[serial]
async fn merge_reports_conflict_and_restores_original_branch() {
    let data_dir = tempfile::tempdir().unwrap();
    let repo_dir = tempfile::tempdir().unwrap();
    common::init_git_repo(repo_dir.path());
    std::fs::write(repo_dir.path().join("x.txt"), "main version\n").unwrap();
    std::process::Command::new("git").arg("-C").arg(repo_dir.path()).args(["add", "-A"]).status().unwrap();
    std::process::Command::new("git")
        .arg("-C")
        .arg(repo_dir.path())
        .args(["commit", "-q", "-m", "add x.txt on main"])
        .status()
        .unwrap();

    let state = common::test_state(data_dir.path());
    let app = http::router(state);

    let create = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/agents")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"name": "demo", "sourceRepo": repo_dir.path().to_string_lossy()}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    let agent = body_json(create).await;
    let agent_id = agent["id"].as_str().unwrap().to_string();
    let work_dir = agent["workDir"].as_str().unwrap().to_string();

    std::fs::write(std::path::Path::new(&work_dir).join("x.txt"), "agent version\n").unwrap();
    std::fs::write(repo_dir.path().join("x.txt"), "main version, changed again\n").unwrap();
    std::process::Command::new("git").arg("-C").arg(repo_dir.path()).args(["add", "-A"]).status().unwrap();
    std::process::Command::new("git")
        .arg("-C")
        .arg(repo_dir.path())
        .args(["commit", "-q", "-m", "change x.txt again on main"])
        .status()
        .unwrap();

    let pre_head = std::process::Command::new("git")
        .arg("-C")
        .arg(repo_dir.path())
        .args(["rev-parse", "HEAD"])
        .output()
        .unwrap()
        .stdout;

    let merge = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/agents/{agent_id}/merge"))
                .header("content-type", "application/json")
                .body(Body::from(json!({"targetBranch": "main"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(merge.status(), StatusCode::OK);
    let result = body_json(merge).await;
    assert_eq!(result["success"], json!(false));
    assert_eq!(result["conflicts"], json!(["x.txt"]));

    let post_head = std::process::Command::new("git")
        .arg("-C")
        .arg(repo_dir.path())
        .args(["rev-parse", "HEAD"])
        .output()
        .unwrap()
        .stdout;
    assert_eq!(pre_head, post_head, "source repo HEAD must be unchanged after a failed merge");
}
