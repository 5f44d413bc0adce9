//! HTTP API tests driven through the real router.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::time::Duration;

use axum::http::StatusCode;
use common::types::UserId;
use serde_json::{json, Value};
use talk_test_utils::{TestStudent, TestTalkService, TestTeacher};

fn id_of(body: &Value) -> String {
    body["id"].as_str().expect("id field").to_string()
}

#[tokio::test]
async fn test_register_user() -> anyhow::Result<()> {
    let service = TestTalkService::spawn();

    let (status, body) = service
        .post(
            "/api/v1/users",
            None,
            Some(json!({
                "display_name": "  Ken  ",
                "role": "student",
                "languages": ["EN"],
            })),
        )
        .await?;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["display_name"], "Ken");
    assert_eq!(body["role"], "student");
    assert_eq!(body["languages"], json!(["en"]));
    assert_eq!(body["availability"], "offline");
    assert_eq!(body["points"], 5);
    Ok(())
}

#[tokio::test]
async fn test_register_rejects_bad_input() -> anyhow::Result<()> {
    let service = TestTalkService::spawn();

    let (status, body) = service
        .post("/api/v1/users", None, Some(json!({ "display_name": "Ken" })))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");

    let (status, body) = service
        .post(
            "/api/v1/users",
            None,
            Some(json!({
                "display_name": "Ken",
                "role": "student",
                "languages": ["de"],
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("de"));

    let (status, _) = service
        .post(
            "/api/v1/users",
            None,
            Some(json!({
                "display_name": "Ana",
                "role": "teacher",
                "languages": [],
            })),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_public_profile_hides_points() -> anyhow::Result<()> {
    let service = TestTalkService::spawn();
    let teacher = service.register(TestTeacher::new("Ana").teaches("fr")).await?;

    let (status, body) = service.get(&format!("/api/v1/users/{teacher}"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["display_name"], "Ana");
    assert!(body.get("points").is_none());

    let (status, _) = service
        .get(&format!("/api/v1/users/{}", UserId::new()), None)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = service.get("/api/v1/users/nope", None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_me_requires_identity() -> anyhow::Result<()> {
    let service = TestTalkService::spawn();

    let (status, body) = service.get("/api/v1/me", None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let (status, _) = service.get("/api/v1/me", Some(UserId::new())).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_availability_and_teacher_listing() -> anyhow::Result<()> {
    let service = TestTalkService::spawn();
    let teacher = service
        .register(TestTeacher::new("Ana").teaches("es").teaches("ja"))
        .await?;

    let (_, body) = service.get("/api/v1/teachers?language=ja", None).await?;
    assert_eq!(body["teachers"], json!([]));

    let (status, body) = service
        .post("/api/v1/me/available", Some(teacher), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["availability"], "available");

    let (status, body) = service.get("/api/v1/teachers?language=JA", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["language"], "ja");
    assert_eq!(body["teachers"][0]["id"], teacher.to_string());

    let (_, body) = service.post("/api/v1/me/offline", Some(teacher), None).await?;
    assert_eq!(body["availability"], "offline");

    let (_, body) = service.get("/api/v1/teachers?language=ja", None).await?;
    assert_eq!(body["teachers"], json!([]));
    Ok(())
}

#[tokio::test]
async fn test_match_join_leave_flow() -> anyhow::Result<()> {
    let service = TestTalkService::spawn();
    let teacher = service.online(TestTeacher::new("Ana").teaches("en")).await?;
    let student = service.online(TestStudent::new("Ken")).await?;

    let (status, session) = service.post("/api/v1/match", Some(student), None).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(session["status"], "pending");
    assert_eq!(session["teacher_id"], teacher.to_string());
    let session_id = id_of(&session);

    let (status, current) = service.get("/api/v1/me/session", Some(teacher)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(id_of(&current), session_id);

    let join = format!("/api/v1/sessions/{session_id}/join");
    service.post(&join, Some(student), None).await?;
    let (status, active) = service.post(&join, Some(teacher), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active["status"], "active");

    let (status, ended) = service
        .post(&format!("/api/v1/sessions/{session_id}/leave"), Some(teacher), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["status"], "aborted");
    assert_eq!(ended["end_reason"]["kind"], "left_early");

    let (status, body) = service.get("/api/v1/me/session", Some(student)).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (_, me) = service.get("/api/v1/me", Some(student)).await?;
    assert_eq!(me["points"], 5);
    assert_eq!(me["availability"], "available");
    Ok(())
}

#[tokio::test]
async fn test_match_errors_map_to_statuses() -> anyhow::Result<()> {
    let service = TestTalkService::spawn();
    let teacher = service.online(TestTeacher::new("Ana").teaches("en")).await?;
    let student = service.register(TestStudent::new("Ken")).await?;

    let (status, body) = service.post("/api/v1/match", Some(student), None).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "NOT_AVAILABLE");

    let (status, body) = service.post("/api/v1/match", Some(teacher), None).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "INVALID_ROLE");

    service.handle().block(student, teacher).await?;
    service.handle().set_available(student).await?;
    let (status, body) = service.post("/api/v1/match", Some(student), None).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "NO_TEACHER_AVAILABLE");
    Ok(())
}

#[tokio::test]
async fn test_session_visible_to_participants_only() -> anyhow::Result<()> {
    let service = TestTalkService::spawn();
    let teacher = service.online(TestTeacher::new("Ana").teaches("en")).await?;
    let student = service.online(TestStudent::new("Ken")).await?;
    let outsider = service.register(TestStudent::new("Eve")).await?;
    let session = service.handle().find_match(student).await?;
    let uri = format!("/api/v1/sessions/{}", session.id);

    let (status, _) = service.get(&uri, Some(teacher)).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = service.get(&uri, Some(outsider)).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = service
        .post(&format!("{uri}/join"), Some(outsider), None)
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = service.get("/api/v1/sessions/not-a-uuid", Some(teacher)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_report_and_ledger() -> anyhow::Result<()> {
    let service = TestTalkService::spawn();
    let teacher = service.online(TestTeacher::new("Ana").teaches("en")).await?;
    let student = service.online(TestStudent::new("Ken")).await?;
    let session = service.handle().find_match(student).await?;

    let (status, ended) = service
        .post(
            &format!("/api/v1/sessions/{}/report", session.id),
            Some(teacher),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["status"], "aborted");
    assert_eq!(ended["end_reason"]["kind"], "reported");
    assert!(service.handle().is_blocked(student, teacher).await?);

    // Teacher-filed report: the student keeps the point debited
    let (status, ledger) = service.get("/api/v1/me/ledger", Some(student)).await?;
    assert_eq!(status, StatusCode::OK);
    let kinds: Vec<_> = ledger
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["reason"]["kind"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(kinds, vec!["initial_grant", "session_debit"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_remaining_time_is_server_computed() -> anyhow::Result<()> {
    let service = TestTalkService::spawn();
    let teacher = service.online(TestTeacher::new("Ana").teaches("en")).await?;
    let student = service.online(TestStudent::new("Ken")).await?;
    let session = service.handle().find_match(student).await?;
    service.handle().join(session.id, student).await?;
    service.handle().join(session.id, teacher).await?;

    service.advance(Duration::from_secs(120)).await;
    let (_, body) = service
        .get(&format!("/api/v1/sessions/{}", session.id), Some(student))
        .await?;
    assert_eq!(body["status"], "active");
    assert_eq!(body["remaining_seconds"], 179);
    Ok(())
}
