//! Route handlers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use serde_json::{json, Value};

use super::AppState;
use crate::error::{GatewayError, Result};
use crate::whatsapp::{qr, SendRequest, SessionSnapshot, SessionState};

/// `GET /health`
pub async fn health() -> &'static str {
    "OK"
}

/// `GET /` - pairing page.
pub async fn index(State(state): State<AppState>) -> Response {
    let body = match state.session.state().await {
        SessionState::AwaitingScan { qr } => match qr::render_data_url(&qr) {
            Ok(data_url) => page(&format!(
                "<h2>Scan the QR code to connect</h2>\n\
                 <p>WhatsApp → Settings → Linked devices → Link a device</p>\n\
                 <img src=\"{data_url}\" alt=\"QR code\" />"
            )),
            Err(e) => {
                tracing::error!("Failed to render QR page: {}", e);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to render QR code")
                    .into_response();
            }
        },
        SessionState::Connected { user: Some(user) } => page(&format!(
            "<h2>Connected</h2>\n<p>{}</p>",
            escape_html(user.name.as_deref().unwrap_or(&user.id))
        )),
        SessionState::Connected { user: None } => page("<h2>Connected</h2>"),
        _ => page("<h2>Waiting for the QR code…</h2>\n<p>Refresh this page in a few seconds.</p>"),
    };
    Html(body).into_response()
}

fn page(content: &str) -> String {
    format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>wagate</title></head>\n\
         <body style=\"text-align:center;font-family:sans-serif\">\n{content}\n</body></html>\n"
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// `GET /session`
pub async fn session(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot().await)
}

/// `POST /send`
///
/// The body is parsed by hand so that an empty or malformed body still
/// answers with a JSON `{error}`.
pub async fn send(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    let link = state.session.ready_link().await?;

    let request: SendRequest = if body.iter().all(u8::is_ascii_whitespace) {
        SendRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| GatewayError::InvalidBody(e.to_string()))?
    };
    let (jid, message) = request.validate()?;
    let kind = message.kind();

    let id = link.send(&jid, message).await?;
    Ok(Json(json!({ "ok": true, "jid": jid, "type": kind, "id": id })))
}

/// `POST /logout`
pub async fn logout(State(state): State<AppState>) -> Result<Json<Value>> {
    state.session.logout().await?;
    let message = if state.restart_on_logout {
        "Session cleared. Service restarting…"
    } else {
        "Session cleared. Open / to pair again."
    };
    Ok(Json(json!({ "ok": true, "message": message })))
}

#[cfg(test)]
mod tests {
    use super::super::{build_router, AppState};
    use crate::config::SecretString;
    use crate::error::GatewayError;
    use crate::whatsapp::link::MockLink;
    use crate::whatsapp::session::{Command, LinkEvent, Session};
    use crate::whatsapp::{OutgoingMessage, PairedUser};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    const TOKEN: &str = "test-token";

    struct Harness {
        router: Router,
        session: Arc<Session>,
        commands: mpsc::Receiver<Command>,
    }

    fn harness(token: &str) -> Harness {
        let (session, commands) = Session::new();
        let state = AppState::new(session.clone(), SecretString::new(token), true);
        Harness {
            router: build_router(state),
            session,
            commands,
        }
    }

    async fn connect(session: &Session, link: MockLink) {
        session.begin(1).await;
        session.attach(1, Arc::new(link)).await;
        session
            .apply(
                1,
                LinkEvent::Connected(Some(PairedUser {
                    id: "5511999990000@s.whatsapp.net".into(),
                    name: Some("Ana <Ops>".into()),
                })),
            )
            .await;
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("Authorization", format!("Bearer {TOKEN}"))
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json(resp: axum::response::Response) -> Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    async fn text(resp: axum::response::Response) -> String {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let h = harness(TOKEN);
        let resp = h
            .router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(text(resp).await, "OK");
    }

    #[tokio::test]
    async fn test_index_waiting_then_qr() {
        let h = harness(TOKEN);
        let resp = h
            .router
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(text(resp).await.contains("Waiting for the QR code"));

        h.session.begin(1).await;
        h.session.apply(1, LinkEvent::Qr("2@pairing-ref,key".into())).await;
        let resp = h
            .router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(text(resp).await.contains("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_index_connected_escapes_name() {
        let h = harness(TOKEN);
        connect(&h.session, MockLink::new()).await;
        let resp = h
            .router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let page = text(resp).await;
        assert!(page.contains("Ana &lt;Ops&gt;"));
        assert!(!page.contains("data:image/png"));
    }

    #[tokio::test]
    async fn test_session_requires_token() {
        let h = harness(TOKEN);
        let resp = h
            .router
            .clone()
            .oneshot(Request::get("/session").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = h
            .router
            .oneshot(
                Request::get("/session")
                    .header("Authorization", "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json(resp).await["error"], "unauthorized");
    }

    #[tokio::test]
    async fn test_protected_routes_fail_without_configured_token() {
        let h = harness("");
        let resp = h
            .router
            .oneshot(post("/send", r#"{"to":"1","message":"x"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json(resp).await["error"], "AUTH_TOKEN is not configured");
    }

    #[tokio::test]
    async fn test_session_snapshot() {
        let h = harness(TOKEN);
        let get = || {
            Request::get("/session")
                .header("Authorization", format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap()
        };

        let body = json(h.router.clone().oneshot(get()).await.unwrap()).await;
        assert_eq!(body["connected"], false);
        assert!(body["user"].is_null());

        connect(&h.session, MockLink::new()).await;
        let body = json(h.router.oneshot(get()).await.unwrap()).await;
        assert_eq!(body["connected"], true);
        assert_eq!(body["user"]["id"], "5511999990000@s.whatsapp.net");
        assert_eq!(body["state"], "connected");
    }

    #[tokio::test]
    async fn test_send_not_ready() {
        let h = harness(TOKEN);
        let resp = h
            .router
            .oneshot(post("/send", r#"{"to":"1","message":"x"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json(resp).await["error"], "socket not ready");
    }

    #[tokio::test]
    async fn test_send_text() {
        let h = harness(TOKEN);
        let mut link = MockLink::new();
        link.expect_send()
            .withf(|jid, msg| {
                jid == "5511999990000@s.whatsapp.net"
                    && *msg == OutgoingMessage::Text { body: "hello".into() }
            })
            .times(1)
            .returning(|_, _| Ok("3EB0ABC".to_string()));
        connect(&h.session, link).await;

        let resp = h
            .router
            .oneshot(post("/send", r#"{"to":"+55 11 99999-0000","message":"hello"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(resp).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["jid"], "5511999990000@s.whatsapp.net");
        assert_eq!(body["type"], "text");
        assert_eq!(body["id"], "3EB0ABC");
    }

    #[tokio::test]
    async fn test_send_validation_errors() {
        let h = harness(TOKEN);
        let mut link = MockLink::new();
        link.expect_send().never();
        connect(&h.session, link).await;

        let cases = [
            (r#"{"message":"x"}"#, "\"to\" is required"),
            ("", "\"to\" is required"),
            (r#"{"to":"1","type":"image"}"#, "\"url\" is required"),
            (r#"{"to":"1","type":"gif","url":"u"}"#, "invalid type: gif"),
        ];
        for (body, error) in cases {
            let resp = h.router.clone().oneshot(post("/send", body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(json(resp).await["error"], error);
        }

        let resp = h.router.oneshot(post("/send", "{not json")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_send_failure_reports_detail() {
        let h = harness(TOKEN);
        let mut link = MockLink::new();
        link.expect_send()
            .returning(|_, _| Err(GatewayError::Send("timeout".into())));
        connect(&h.session, link).await;

        let resp = h
            .router
            .oneshot(post(
                "/send",
                r#"{"to":"1","type":"document","url":"https://x/y.pdf"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json(resp).await;
        assert_eq!(body["error"], "failed to send");
        assert_eq!(body["detail"], "timeout");
    }

    #[tokio::test]
    async fn test_logout_asks_supervisor() {
        let Harness {
            router,
            mut commands,
            ..
        } = harness(TOKEN);
        let supervisor = tokio::spawn(async move {
            if let Some(Command::Logout { reply }) = commands.recv().await {
                let _ = reply.send(Ok(()));
            }
        });

        let resp = router.oneshot(post("/logout", "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(resp).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["message"], "Session cleared. Service restarting…");
        supervisor.await.unwrap();
    }

    #[tokio::test]
    async fn test_logout_without_supervisor() {
        let h = harness(TOKEN);
        drop(h.commands);
        let resp = h.router.oneshot(post("/logout", "")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
