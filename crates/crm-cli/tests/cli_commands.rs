use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use mockito::{Matcher, Server};
use predicates::prelude::*;
use serde_json::json;
use tempfile::tempdir;

fn base_cmd(home: &Path, server: &Server) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("crm"));
    cmd.env("HOME", home)
        .env_remove("CRM_SESSION_CONFIG")
        .env_remove("CRM_API_URL")
        .env_remove("CRM_EMAIL")
        .env_remove("CRM_PASSWORD")
        .args(["--store", "file", "--api-url", &server.url()]);
    cmd
}

fn credentials_file(home: &Path) -> PathBuf {
    home.join(".crm").join("credentials.json")
}

fn read_credentials(home: &Path) -> BTreeMap<String, String> {
    let contents = fs::read_to_string(credentials_file(home)).expect("credentials file");
    serde_json::from_str(&contents).expect("credentials json")
}

fn write_credentials(home: &Path, values: serde_json::Value) {
    let path = credentials_file(home);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, values.to_string()).expect("write credentials");
}

fn jwt(sub: &str, email: &str, expires_in_secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let exp = unix_now() + expires_in_secs;
    let claims = json!({ "sub": sub, "exp": exp, "email": email, "tenant_id": "tenant-1" });
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

fn session_json(session_id: &str, device_id: &str) -> serde_json::Value {
    json!({
        "session_id": session_id,
        "device_id": device_id,
        "status": "active",
        "created_at": "2024-01-01T00:00:00Z",
        "last_activity_at": "2024-01-01T00:00:00Z",
        "expires_at": "2099-01-01T00:00:00Z"
    })
}

fn login_body() -> String {
    json!({
        "token": jwt("user-1", "ada@example.com", 900),
        "refresh_token": "refresh-1",
        "user": { "id": "user-1", "email": "ada@example.com" },
        "session": session_json("session-1", "device-1")
    })
    .to_string()
}

#[test]
fn login_persists_tokens_and_device_id() {
    let home_dir = tempdir().expect("tempdir");
    let mut server = Server::new();
    let login = server
        .mock("POST", "/auth/login")
        .match_header("x-device-id", Matcher::Any)
        .match_body(Matcher::PartialJson(json!({
            "email": "ada@example.com",
            "password": "secret"
        })))
        .with_status(200)
        .with_body(login_body())
        .create();

    base_cmd(home_dir.path(), &server)
        .args(["login", "--email", "ada@example.com", "--password", "secret"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged in as ada@example.com"));

    login.assert();
    let stored = read_credentials(home_dir.path());
    assert_eq!(stored.get("refresh_token").map(String::as_str), Some("refresh-1"));
    assert_eq!(stored.get("session_id").map(String::as_str), Some("session-1"));
    assert!(stored.contains_key("access_token"));
    assert!(stored.contains_key("device_id"));
}

#[test]
fn rejected_login_fails_without_writing_tokens() {
    let home_dir = tempdir().expect("tempdir");
    let mut server = Server::new();
    server
        .mock("POST", "/auth/login")
        .with_status(401)
        .with_body(r#"{"code":"INVALID_CREDENTIALS","message":"bad password"}"#)
        .create();

    base_cmd(home_dir.path(), &server)
        .args(["login", "--email", "ada@example.com", "--password", "wrong"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid"));

    let stored = if credentials_file(home_dir.path()).exists() {
        read_credentials(home_dir.path())
    } else {
        BTreeMap::new()
    };
    assert!(!stored.contains_key("access_token"));
    assert!(!stored.contains_key("refresh_token"));
}

#[test]
fn whoami_reads_the_cached_token() {
    let home_dir = tempdir().expect("tempdir");
    let server = Server::new();
    write_credentials(
        home_dir.path(),
        json!({
            "access_token": jwt("user-7", "grace@example.com", 600),
            "refresh_token": "refresh-7",
            "device_id": "device-7"
        }),
    );

    base_cmd(home_dir.path(), &server)
        .arg("whoami")
        .assert()
        .success()
        .stdout(predicate::str::contains("grace@example.com"))
        .stdout(predicate::str::contains("tenant: tenant-1"));
}

#[test]
fn whoami_without_session_fails() {
    let home_dir = tempdir().expect("tempdir");
    let server = Server::new();

    base_cmd(home_dir.path(), &server)
        .arg("whoami")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not logged in"));
}

#[test]
fn logout_revokes_remotely_and_clears_tokens() {
    let home_dir = tempdir().expect("tempdir");
    let mut server = Server::new();
    write_credentials(
        home_dir.path(),
        json!({
            "access_token": jwt("user-7", "grace@example.com", 600),
            "refresh_token": "refresh-7",
            "session_id": "session-7",
            "device_id": "device-7"
        }),
    );
    let revoke = server
        .mock("DELETE", "/sessions/session-7")
        .match_header("x-device-id", "device-7")
        .match_body(Matcher::PartialJson(json!({ "reason": "logout" })))
        .with_status(204)
        .create();

    base_cmd(home_dir.path(), &server)
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged out"));

    revoke.assert();
    let stored = read_credentials(home_dir.path());
    assert!(!stored.contains_key("access_token"));
    assert!(!stored.contains_key("refresh_token"));
    assert_eq!(stored.get("device_id").map(String::as_str), Some("device-7"));
}

fn session_limit_body() -> String {
    json!({
        "code": "SESSION_LIMIT_EXCEEDED",
        "message": "Too many sessions",
        "details": {
            "plan": "starter",
            "max_concurrent_sessions": 2,
            "current_active_sessions": 2,
            "active_sessions": [
                session_json("session-a", "device-a"),
                session_json("session-b", "device-b")
            ],
            "management_token": "mgmt-1",
            "user_id": "user-1"
        }
    })
    .to_string()
}

#[test]
fn login_at_session_limit_revokes_others_when_asked() {
    let home_dir = tempdir().expect("tempdir");
    let mut server = Server::new();
    let rejected = server
        .mock("POST", "/auth/login")
        .with_status(409)
        .with_body(session_limit_body())
        .expect(1)
        .create();
    let accepted = server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_body(login_body())
        .expect(1)
        .create();
    let revoke = server
        .mock("POST", "/sessions/revoke-others")
        .match_header("x-management-token", "mgmt-1")
        .match_body(Matcher::PartialJson(json!({
            "reason": "session_limit",
            "revoked_by": "user"
        })))
        .with_status(200)
        .with_body("{}")
        .create();

    base_cmd(home_dir.path(), &server)
        .args([
            "login",
            "--email",
            "ada@example.com",
            "--password",
            "secret",
            "--revoke-others",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged in as ada@example.com"));

    rejected.assert();
    revoke.assert();
    accepted.assert();
    let stored = read_credentials(home_dir.path());
    assert_eq!(stored.get("session_id").map(String::as_str), Some("session-1"));
}

#[test]
fn login_at_session_limit_without_a_choice_lists_sessions() {
    let home_dir = tempdir().expect("tempdir");
    let mut server = Server::new();
    server
        .mock("POST", "/auth/login")
        .with_status(409)
        .with_body(session_limit_body())
        .create();

    base_cmd(home_dir.path(), &server)
        .args(["login", "--email", "ada@example.com", "--password", "secret"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("session-a"))
        .stdout(predicate::str::contains("session-b"))
        .stderr(predicate::str::contains("--revoke-session"));
}
