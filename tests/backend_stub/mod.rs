use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use serde_json::Value;

#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum SummaryBehavior {
    Blocks,
    NoBlocks,
    ServerError,
    Malformed,
}

/// Minimal stand-in for the summarization backend.
pub struct BackendStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<(String, Value)>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl BackendStub {
    pub fn spawn(behavior: SummaryBehavior) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start backend stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/api");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().to_string();
                let mut body = Vec::new();
                if request.as_reader().read_to_end(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }
                let parsed: Value = if path == "/api/extractText" {
                    upload_summary(&request, &body)
                } else {
                    serde_json::from_slice(&body).unwrap_or(Value::Null)
                };
                recorded
                    .lock()
                    .expect("lock recorded requests")
                    .push((path.clone(), parsed.clone()));

                let (status, payload) = match (request.method(), path.as_str()) {
                    (tiny_http::Method::Post, "/api/generateSummary") => {
                        summary_response(behavior, &parsed)
                    }
                    (tiny_http::Method::Post, "/api/generateImage") => (
                        200,
                        serde_json::json!({
                            "image_url": "/static/images/generated.png",
                            "prompt": parsed.get("prompt").cloned().unwrap_or(Value::Null),
                        })
                        .to_string(),
                    ),
                    (tiny_http::Method::Post, "/api/extractText") => extract_response(&parsed),
                    _ => (404, "not found".to_owned()),
                };

                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                let response = tiny_http::Response::from_string(payload)
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().expect("lock requests").clone()
    }
}

impl Drop for BackendStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn summary_response(behavior: SummaryBehavior, request: &Value) -> (u16, String) {
    let title = request
        .get("chapter_title")
        .and_then(|v| v.as_str())
        .unwrap_or("Untitled")
        .to_owned();

    match behavior {
        SummaryBehavior::Blocks => (
            200,
            serde_json::json!({
                "unit_title": format!("{title}: The Arrival"),
                "blocks": [
                    {
                        "type": "scene",
                        "slide_title": "THE SCENE",
                        "headline": "A stranger arrives",
                        "body": "Rain falls as the stranger steps off the last train.",
                        "text": "",
                        "lyric_lines": [],
                        "image_hint": true,
                        "image_prompt": "a stranger on a rainy platform"
                    },
                    {
                        "type": "reveal",
                        "text": "He was expected all along. The town had been waiting."
                    }
                ],
                "visual_slots_used": 1,
                "cached": false,
                "notes": {
                    "compression_applied": false,
                    "long_chapter_handled": false,
                    "context_used_only_for_continuity": true
                }
            })
            .to_string(),
        ),
        SummaryBehavior::NoBlocks => (
            200,
            serde_json::json!({ "unit_title": title, "blocks": [] }).to_string(),
        ),
        SummaryBehavior::ServerError => (
            500,
            serde_json::json!({
                "error": "internal_error",
                "message": "model overloaded"
            })
            .to_string(),
        ),
        SummaryBehavior::Malformed => (200, "{\"unit_title\": \"oops\", \"blocks\": [".to_owned()),
    }
}

/// Records what a multipart upload carried: its content type, file name and part bytes.
fn upload_summary(request: &tiny_http::Request, body: &[u8]) -> Value {
    let content_type = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Content-Type"))
        .map(|h| h.value.as_str().to_owned())
        .unwrap_or_default();
    let text = String::from_utf8_lossy(body);
    let filename = text
        .split_once("filename=\"")
        .and_then(|(_, rest)| rest.split_once('"'))
        .map(|(name, _)| name.to_owned())
        .unwrap_or_default();

    serde_json::json!({
        "content_type": content_type,
        "filename": filename,
        "has_pdf_header": text.contains("%PDF-"),
    })
}

fn extract_response(upload: &Value) -> (u16, String) {
    let filename = upload["filename"].as_str().unwrap_or_default();
    if !filename.to_ascii_lowercase().ends_with(".pdf") {
        return (
            400,
            serde_json::json!({ "detail": "File must be a PDF" }).to_string(),
        );
    }

    let pages = [
        "Page one opens on the quiet harbor. ".repeat(60),
        "Page two follows the boats out to sea. ".repeat(60),
    ];
    (
        200,
        serde_json::json!({
            "text": pages.join("\n\n\n"),
            "page_count": 2,
            "filename": filename,
        })
        .to_string(),
    )
}
