mod common;

use common::{login_as, send, spawn_app};
use invoicing_core::Role;
use serde_json::json;

fn register_body(username: &str, password: &str, confirm: &str) -> serde_json::Value {
    json!({
        "email": format!("{username}@example.com"),
        "username": username,
        "password": password,
        "password_confirm": confirm,
        "first_name": "Grace",
        "last_name": "Hopper",
    })
}

#[tokio::test]
async fn register_then_login_issues_a_token_pair() {
    let server = spawn_app().await;

    let res = send(
        server.addr,
        "POST",
        "/api/v1/auth/register/",
        None,
        Some(&register_body("grace", "compilers!", "compilers!")),
    )
    .await;
    assert_eq!(res.status, 201, "{}", res.body);
    let user = res.json();
    assert_eq!(user["role"], "viewer");
    assert_eq!(user["full_name"], "Grace Hopper");
    assert!(user.get("password").is_none());

    let res = send(
        server.addr,
        "POST",
        "/api/v1/auth/login/",
        None,
        Some(&json!({"email": "grace@example.com", "password": "compilers!"})),
    )
    .await;
    assert_eq!(res.status, 200);
    let body = res.json();
    assert_eq!(body["message"], "Login successful");
    assert_eq!(body["user"]["username"], "grace");
    let access = body["tokens"]["access"].as_str().expect("access");
    let refresh = body["tokens"]["refresh"].as_str().expect("refresh");
    assert_ne!(access, refresh);

    let profile = send(server.addr, "GET", "/api/v1/auth/profile/", Some(access), None).await;
    assert_eq!(profile.status, 200);
    assert_eq!(profile.json()["email"], "grace@example.com");
}

#[tokio::test]
async fn registration_rejects_mismatched_passwords_and_admin_role() {
    let server = spawn_app().await;

    let res = send(
        server.addr,
        "POST",
        "/api/v1/auth/register/",
        None,
        Some(&register_body("mallory", "password-one", "password-two")),
    )
    .await;
    assert_eq!(res.status, 400);
    assert!(res.json()["errors"]["password"].is_array());

    let mut body = register_body("mallory", "password-one", "password-one");
    body["role"] = json!("admin");
    let res = send(server.addr, "POST", "/api/v1/auth/register/", None, Some(&body)).await;
    assert_eq!(res.status, 400);
    assert!(res.json()["errors"]["role"].is_array());
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let server = spawn_app().await;
    let body = register_body("twin", "password-one", "password-one");
    let first = send(server.addr, "POST", "/api/v1/auth/register/", None, Some(&body)).await;
    assert_eq!(first.status, 201);
    let second = send(server.addr, "POST", "/api/v1/auth/register/", None, Some(&body)).await;
    assert_eq!(second.status, 409);
    assert_eq!(second.json()["error"], "A user with this email already exists.");
}

#[tokio::test]
async fn wrong_password_and_missing_token_are_401() {
    let server = spawn_app().await;
    login_as(&server, "oscar", Role::Viewer).await;

    let res = send(
        server.addr,
        "POST",
        "/api/v1/auth/login/",
        None,
        Some(&json!({"email": "oscar@example.com", "password": "nope-nope"})),
    )
    .await;
    assert_eq!(res.status, 401);
    assert_eq!(res.json()["error"], "Invalid email or password");

    let res = send(server.addr, "GET", "/api/v1/clients/", None, None).await;
    assert_eq!(res.status, 401);
    assert_eq!(
        res.json()["error"],
        "Authentication credentials were not provided."
    );

    let res = send(server.addr, "GET", "/api/v1/clients/", Some("not-a-token"), None).await;
    assert_eq!(res.status, 401);
    assert_eq!(res.json()["error"], "Given token not valid or expired.");
}

#[tokio::test]
async fn refresh_and_logout() {
    let server = spawn_app().await;
    login_as(&server, "paula", Role::Viewer).await;
    let login = send(
        server.addr,
        "POST",
        "/api/v1/auth/login/",
        None,
        Some(&json!({"email": "paula@example.com", "password": "s3cret-pass"})),
    )
    .await
    .json();
    let refresh = login["tokens"]["refresh"].as_str().expect("refresh").to_string();

    // A refresh token cannot be used as a bearer token.
    let res = send(server.addr, "GET", "/api/v1/auth/profile/", Some(&refresh), None).await;
    assert_eq!(res.status, 401);

    let res = send(
        server.addr,
        "POST",
        "/api/v1/auth/token/refresh/",
        None,
        Some(&json!({"refresh": refresh})),
    )
    .await;
    assert_eq!(res.status, 200);
    let access = res.json()["access"].as_str().expect("access").to_string();

    let res = send(
        server.addr,
        "POST",
        "/api/v1/auth/logout/",
        Some(&access),
        Some(&json!({"refresh_token": refresh})),
    )
    .await;
    assert_eq!(res.status, 200, "{}", res.body);
    assert_eq!(res.json()["message"], "Logout successful");

    let res = send(server.addr, "GET", "/api/v1/auth/profile/", Some(&access), None).await;
    assert_eq!(res.status, 401);
    let res = send(
        server.addr,
        "POST",
        "/api/v1/auth/token/refresh/",
        None,
        Some(&json!({"refresh": refresh})),
    )
    .await;
    assert_eq!(res.status, 401);
}

#[tokio::test]
async fn change_password_revokes_existing_tokens() {
    let server = spawn_app().await;
    let (_, token) = login_as(&server, "quinn", Role::Viewer).await;

    let res = send(
        server.addr,
        "POST",
        "/api/v1/auth/change-password/",
        Some(&token),
        Some(&json!({
            "old_password": "wrong-password",
            "new_password": "brand-new-pass",
            "new_password_confirm": "brand-new-pass",
        })),
    )
    .await;
    assert_eq!(res.status, 400);
    assert_eq!(
        res.json()["errors"]["old_password"],
        json!(["Old password is incorrect."])
    );

    let res = send(
        server.addr,
        "POST",
        "/api/v1/auth/change-password/",
        Some(&token),
        Some(&json!({
            "old_password": "s3cret-pass",
            "new_password": "brand-new-pass",
            "new_password_confirm": "brand-new-pass",
        })),
    )
    .await;
    assert_eq!(res.status, 200, "{}", res.body);
    assert_eq!(res.json()["message"], "Password changed successfully");

    let res = send(server.addr, "GET", "/api/v1/auth/profile/", Some(&token), None).await;
    assert_eq!(res.status, 401);

    let res = send(
        server.addr,
        "POST",
        "/api/v1/auth/login/",
        None,
        Some(&json!({"email": "quinn@example.com", "password": "brand-new-pass"})),
    )
    .await;
    assert_eq!(res.status, 200);
}

#[tokio::test]
async fn users_only_reach_their_own_record_unless_admin() {
    let server = spawn_app().await;
    let (rita, rita_token) = login_as(&server, "rita", Role::Viewer).await;
    let (sam, _) = login_as(&server, "sam", Role::Viewer).await;
    let (_, admin_token) = login_as(&server, "root", Role::Admin).await;

    let path = format!("/api/v1/auth/users/{sam}/");
    let res = send(server.addr, "GET", &path, Some(&rita_token), None).await;
    assert_eq!(res.status, 403);
    assert_eq!(
        res.json()["error"],
        "You don't have permission to access this user."
    );
    let res = send(server.addr, "GET", &path, Some(&admin_token), None).await;
    assert_eq!(res.status, 200);

    let own = format!("/api/v1/auth/users/{rita}/");
    let res = send(
        server.addr,
        "PATCH",
        &own,
        Some(&rita_token),
        Some(&json!({"role": "accountant"})),
    )
    .await;
    assert_eq!(res.status, 403);

    let res = send(
        server.addr,
        "PATCH",
        &own,
        Some(&admin_token),
        Some(&json!({"role": "accountant"})),
    )
    .await;
    assert_eq!(res.status, 200, "{}", res.body);
    assert_eq!(res.json()["role"], "accountant");

    let res = send(
        server.addr,
        "PUT",
        &own,
        Some(&rita_token),
        Some(&json!({"first_name": "Rita"})),
    )
    .await;
    assert_eq!(res.status, 400);
    let errors = res.json()["errors"].clone();
    assert!(errors["email"].is_array());
    assert!(errors["username"].is_array());
}

#[tokio::test]
async fn preferences_are_created_on_first_read() {
    let server = spawn_app().await;
    let (user_id, token) = login_as(&server, "tess", Role::Viewer).await;

    let res = send(server.addr, "GET", "/api/v1/auth/profile/edit/", Some(&token), None).await;
    assert_eq!(res.status, 200);
    let profile = res.json();
    assert_eq!(profile["user_id"], user_id);
    assert_eq!(profile["timezone"], "UTC");
    assert_eq!(profile["language"], "en");
    assert_eq!(profile["receive_email_notifications"], true);

    let res = send(
        server.addr,
        "PATCH",
        "/api/v1/auth/profile/edit/",
        Some(&token),
        Some(&json!({"language": "fr", "bio": "Bookkeeper"})),
    )
    .await;
    assert_eq!(res.status, 200, "{}", res.body);
    let profile = res.json();
    assert_eq!(profile["language"], "fr");
    assert_eq!(profile["bio"], "Bookkeeper");
    assert_eq!(profile["timezone"], "UTC");
}
