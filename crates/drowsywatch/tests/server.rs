//! End-to-end tests: a real server on an ephemeral port, replayed frames and a
//! local stand-in for the Twilio API.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use image::{Rgb, RgbImage};

use drowsywatch::config::CameraBackend;
use drowsywatch::multipart::{split_parts, STREAM_CONTENT_TYPE};
use drowsywatch::vision::replay::format_pts;
use drowsywatch::{AppState, Config, Landmarks, Point};

const OPEN: f64 = 10.0;
const CLOSED: f64 = 2.0;

type Outbox = Arc<Mutex<Vec<HashMap<String, String>>>>;

/// 68 landmarks with both eyes 30px wide and `opening` px tall (EAR = opening / 30).
///
/// Mirrors `ear::fixtures::face`, which is `#[cfg(test)]` and not visible to
/// integration tests.
fn face(opening: f64) -> Vec<Point> {
    let mut points: Vec<Point> = (0..68)
        .map(|i| {
            let angle = f64::from(i) / 68.0 * std::f64::consts::TAU;
            Point::new(160.0 + 70.0 * angle.cos(), 120.0 + 90.0 * angle.sin())
        })
        .collect();
    for (start, cx) in [(36, 130.0), (42, 190.0)] {
        let cy = 100.0;
        let half = opening / 2.0;
        let eye = [
            Point::new(cx - 15.0, cy),
            Point::new(cx - 5.0, cy - half),
            Point::new(cx + 5.0, cy - half),
            Point::new(cx + 15.0, cy),
            Point::new(cx + 5.0, cy + half),
            Point::new(cx - 5.0, cy + half),
        ];
        points[start..start + 6].copy_from_slice(&eye);
    }
    points
}

fn write_frame(dir: &Path, name: &str, opening: Option<f64>) {
    RgbImage::from_pixel(320, 240, Rgb([90, 90, 90]))
        .save(dir.join(format!("{name}.png")))
        .unwrap();
    if let Some(opening) = opening {
        let landmarks = Landmarks::new(face(opening)).unwrap();
        std::fs::write(dir.join(format!("{name}.pts")), format_pts(&landmarks)).unwrap();
    }
}

async fn create_message(
    State(outbox): State<Outbox>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<serde_json::Value>) {
    outbox.lock().unwrap().push(form);
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "sid": "SM1", "status": "queued" })),
    )
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct Harness {
    base: String,
    outbox: Outbox,
    client: reqwest::Client,
    _frames: tempfile::TempDir,
}

impl Harness {
    async fn start(frames: &[Option<f64>]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for (i, opening) in frames.iter().enumerate() {
            write_frame(dir.path(), &format!("frame_{i:03}"), *opening);
        }

        let outbox: Outbox = Arc::default();
        let twilio = spawn(
            Router::new()
                .route(
                    "/2010-04-01/Accounts/:sid/Messages.json",
                    post(create_message),
                )
                .with_state(outbox.clone()),
        )
        .await;

        let mut config = Config::default();
        config.camera.backend = CameraBackend::Replay;
        config.camera.replay_dir = Some(dir.path().to_path_buf());
        config.sms.account_sid = Some("AC123".to_string());
        config.sms.auth_token = Some("secret".to_string());
        config.sms.from_phone = Some("+15550000000".to_string());
        config.sms.api_base = format!("http://{twilio}");

        let state = AppState::from_config(&config).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(drowsywatch::server::serve_on(
            listener,
            state,
            std::future::pending(),
        ));

        Self {
            base: format!("http://{addr}"),
            outbox,
            client: reqwest::Client::new(),
            _frames: dir,
        }
    }

    async fn save_contact(&self, name: &str, phone: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/save_contact", self.base))
            .form(&[("name", name), ("phone", phone)])
            .send()
            .await
            .unwrap()
    }

    /// Status, content type and full body of `/video_feed`.
    async fn video_feed(&self) -> (StatusCode, String, Vec<u8>) {
        let response = self
            .client
            .get(format!("{}/video_feed", self.base))
            .send()
            .await
            .unwrap();
        let status = response.status();
        let content_type = response.headers()["content-type"]
            .to_str()
            .unwrap()
            .to_string();
        let body = response.bytes().await.unwrap().to_vec();
        (status, content_type, body)
    }

    fn sent(&self) -> Vec<HashMap<String, String>> {
        self.outbox.lock().unwrap().clone()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_index_page() {
    let harness = Harness::start(&[]).await;
    let response = reqwest::get(format!("{}/", harness.base)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let page = response.text().await.unwrap();
    assert!(page.contains("/video_feed"));
    assert!(page.contains("/save_contact"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_video_feed_content_type() {
    let harness = Harness::start(&[Some(OPEN)]).await;
    let (status, content_type, body) = harness.video_feed().await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, STREAM_CONTENT_TYPE);
    assert_eq!(split_parts(&body).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_source_yields_empty_stream() {
    let harness = Harness::start(&[]).await;
    let (status, content_type, body) = harness.video_feed().await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, STREAM_CONTENT_TYPE);
    assert!(body.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drowsy_frames_text_the_saved_contact() {
    let harness = Harness::start(&[Some(OPEN), Some(CLOSED), None, Some(CLOSED)]).await;

    let response = harness.save_contact("A", "+15551234567").await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = response.text().await.unwrap();
    assert!(page.contains("+15551234567"));

    let (_, _, body) = harness.video_feed().await;
    let parts = split_parts(&body);
    assert_eq!(parts.len(), 4);
    for part in parts {
        image::load_from_memory(part).unwrap();
    }

    let sent = harness.sent();
    assert_eq!(sent.len(), 2);
    for message in sent {
        assert_eq!(message["To"], "+15551234567");
        assert_eq!(message["From"], "+15550000000");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_contact_no_sms() {
    let harness = Harness::start(&[Some(CLOSED), Some(CLOSED)]).await;

    let (_, _, body) = harness.video_feed().await;

    assert_eq!(split_parts(&body).len(), 2);
    assert!(harness.sent().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_phone_is_rejected() {
    let harness = Harness::start(&[Some(CLOSED)]).await;

    let response = harness.save_contact("A", "not a number").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(response.text().await.unwrap().contains("not a phone number"));

    harness.video_feed().await;
    assert!(harness.sent().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_latest_contact_wins() {
    let harness = Harness::start(&[Some(CLOSED)]).await;

    harness.save_contact("A", "+15551234567").await;
    harness.save_contact("B", "+1 (555) 765-4321").await;
    harness.video_feed().await;

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["To"], "+15557654321");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_contact_echo_is_escaped() {
    let harness = Harness::start(&[]).await;

    let response = harness.save_contact("<b>A</b>", "+15551234567").await;
    let page = response.text().await.unwrap();
    assert!(page.contains("&lt;b&gt;A&lt;/b&gt;"));
    assert!(!page.contains("<b>A</b>"));
}
