#![cfg(feature = "inmem-store")]

mod common;

use std::future::poll_fn;
use std::pin::Pin;
use std::time::Duration;

use actix_web::body::MessageBody;
use actix_web::{test, web, App};
use campus::models::Role;
use campus::{config, SecurityHeaders};
use common::{bearer, claims, fixture};
use serde_json::{json, Value};
use serial_test::serial;

macro_rules! app {
    ($fx:expr) => {
        test::init_service(
            App::new()
                .wrap(SecurityHeaders::from_env())
                .app_data(web::Data::new($fx.state.clone()))
                .configure(config),
        )
        .await
    };
}

fn multipart(field: &str, filename: &str, bytes: &[u8]) -> (String, Vec<u8>) {
    let boundary = "BOUNDARYCAMPUS";
    let mut body: Vec<u8> = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

#[actix_web::test]
#[serial]
async fn test_connect_then_chat_flow_routes() {
    let fx = fixture();
    let app = app!(fx);
    let asha = claims(Role::Student, "Asha");
    let bala = claims(Role::Student, "Bala");

    // first authenticated request creates the profile
    for who in [&asha, &bala] {
        let req = test::TestRequest::get().uri("/api/v1/profiles/me").insert_header(bearer(who)).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let me: Value = test::read_body_json(resp).await;
        assert_eq!(me["id"], json!(who.sub));
        assert_eq!(me["account_status"], "pending");
    }

    let req = test::TestRequest::post()
        .uri("/api/v1/connections")
        .insert_header(bearer(&asha))
        .set_json(json!({"target_id": bala.sub}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let conn: Value = test::read_body_json(resp).await;
    let conn_id = conn["id"].as_str().unwrap().to_string();

    // requester cannot accept their own request
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/connections/{conn_id}/accept"))
        .insert_header(bearer(&asha))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/connections/{conn_id}/accept"))
        .insert_header(bearer(&bala))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let accepted: Value = test::read_body_json(resp).await;
    assert_eq!(accepted["status"], "accepted");

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/connections/peers/{}", bala.sub))
        .insert_header(bearer(&asha))
        .to_request();
    let state: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(state["state"], "connected");

    let req = test::TestRequest::post()
        .uri("/api/v1/conversations/direct")
        .insert_header(bearer(&asha))
        .set_json(json!({"target_id": bala.sub}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    let conversation = body["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/conversations/{conversation}/messages"))
        .insert_header(bearer(&asha))
        .set_json(json!({"content": "hello"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/conversations/{conversation}/unread"))
        .insert_header(bearer(&bala))
        .to_request();
    let unread: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(unread["unread"], 1);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/conversations/{conversation}/messages"))
        .insert_header(bearer(&bala))
        .to_request();
    let messages: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(messages.as_array().unwrap().len(), 1);
    assert_eq!(messages[0]["content"], "hello");

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/conversations/{conversation}/read"))
        .insert_header(bearer(&bala))
        .to_request();
    let marked: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(marked["count"], 1);

    // notifications: request + accepted for bala, accepted for asha
    let req = test::TestRequest::get().uri("/api/v1/notifications").insert_header(bearer(&bala)).to_request();
    let inbox: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(inbox.as_array().unwrap().len(), 2);
}

#[actix_web::test]
#[serial]
async fn test_upload_and_serve_file() {
    let fx = fixture();
    let app = app!(fx);
    let asha = claims(Role::Student, "Asha");

    let (content_type, body) = multipart("file", "notes.txt", b"hello upload");
    let req = test::TestRequest::post()
        .uri("/api/v1/uploads")
        .insert_header(bearer(&asha))
        .insert_header(("Content-Type", content_type))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let v: Value = test::read_body_json(resp).await;
    let url = v["url"].as_str().unwrap().to_string();
    assert!(url.starts_with("/uploads/notes_") && url.ends_with(".txt"), "{url}");

    let req = test::TestRequest::get().uri(&url).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(&test::read_body(resp).await[..], b"hello upload");

    // a body without a `file` field is rejected
    let (content_type, body) = multipart("other", "x.txt", b"nope");
    let req = test::TestRequest::post()
        .uri("/api/v1/uploads")
        .insert_header(bearer(&asha))
        .insert_header(("Content-Type", content_type))
        .set_payload(body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::get().uri("/uploads/missing.txt").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn test_presence_track_list_untrack() {
    let fx = fixture();
    let app = app!(fx);
    let asha = claims(Role::Student, "Asha");
    let bala = claims(Role::Student, "Bala");

    let req = test::TestRequest::post().uri("/api/v1/presence").insert_header(bearer(&asha)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let tracked: Value = test::read_body_json(resp).await;
    let key = tracked["key"].as_str().unwrap().to_string();

    let req = test::TestRequest::get().uri("/api/v1/presence").insert_header(bearer(&bala)).to_request();
    let online: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(online, json!([asha.sub]));

    let req = test::TestRequest::delete().uri(&format!("/api/v1/presence/{key}")).insert_header(bearer(&bala)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::delete().uri(&format!("/api/v1/presence/{key}")).insert_header(bearer(&asha)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);

    let req = test::TestRequest::delete().uri(&format!("/api/v1/presence/{key}")).insert_header(bearer(&asha)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    let req = test::TestRequest::get().uri("/api/v1/presence").insert_header(bearer(&bala)).to_request();
    let online: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(online, json!([]));
}

/// Reads SSE chunks until one contains every needle, or gives up after `limit` chunks.
async fn read_until<B: MessageBody>(body: &mut Pin<Box<B>>, needles: &[&str], limit: usize) -> String {
    let mut seen = String::new();
    for _ in 0..limit {
        let next = tokio::time::timeout(Duration::from_secs(2), poll_fn(|cx| body.as_mut().poll_next(cx))).await;
        let Ok(Some(Ok(chunk))) = next else { break };
        let frame = String::from_utf8_lossy(&chunk).to_string();
        if needles.iter().all(|n| frame.contains(n)) {
            return frame;
        }
        seen.push_str(&frame);
    }
    panic!("no frame with {needles:?}; saw {seen}");
}

#[actix_web::test]
#[serial]
async fn test_realtime_streams_presence_syncs() {
    let fx = fixture();
    let app = app!(fx);
    let asha = claims(Role::Student, "Asha");
    let bala = claims(Role::Student, "Bala");

    let req = test::TestRequest::get().uri("/api/v1/realtime").insert_header(bearer(&asha)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-type").unwrap(), "text/event-stream");
    let mut body = Box::pin(resp.into_body());

    // opening the stream tracks the caller
    let asha_id = asha.sub.to_string();
    let first = read_until(&mut body, &["event: presence", &asha_id], 4).await;
    assert!(first.starts_with("event: presence\ndata: "));

    let req = test::TestRequest::post().uri("/api/v1/presence").insert_header(bearer(&bala)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let bala_id = bala.sub.to_string();
    let sync = read_until(&mut body, &["event: presence", &asha_id, &bala_id], 4).await;
    let json = sync.trim_start_matches("event: presence\ndata: ").trim_end();
    let state: Value = serde_json::from_str(json).unwrap();
    assert_eq!(state.as_object().unwrap().len(), 2);
}

#[actix_web::test]
#[serial]
async fn test_notices_need_teacher_role() {
    let fx = fixture();
    let app = app!(fx);
    let notice = json!({"title": "Exam", "content": "Monday 9am"});

    let req = test::TestRequest::post()
        .uri("/api/v1/notices")
        .insert_header(bearer(&claims(Role::Student, "Asha")))
        .set_json(&notice)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::post()
        .uri("/api/v1/notices")
        .insert_header(bearer(&claims(Role::Teacher, "Rao")))
        .set_json(&notice)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 201);

    let req = test::TestRequest::get()
        .uri("/api/v1/notices")
        .insert_header(bearer(&claims(Role::Student, "Asha")))
        .to_request();
    let notices: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(notices[0]["title"], "Exam");
    assert_eq!(notices[0]["state"], "unread");
}

#[actix_web::test]
#[serial]
async fn test_requests_without_token_are_rejected() {
    let fx = fixture();
    let app = app!(fx);
    for uri in ["/api/v1/profiles/me", "/api/v1/conversations", "/api/v1/notes", "/api/v1/notifications"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 401, "{uri}");
    }
}
