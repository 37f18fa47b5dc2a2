use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use tiny_http::{Header, Response, Server, StatusCode};

use crate::cancel::CancelToken;
use crate::error::AuditError;
use crate::request::AuditRequest;
use crate::transport::{AuditTransport, TransportReply};

pub(crate) fn sample_report_json() -> Value {
    json!({
        "ecoScore": 42,
        "scoreLabel": "Needs Improvement",
        "summary": "Packaging relies on single-use plastics. Lighting is partly upgraded.",
        "keyObservations": [
            {"issue": "Plastic use", "detail": "Stacks of clamshell containers beside the till."}
        ],
        "impactContext": "At this volume roughly 300 kg of plastic reaches landfill each year.",
        "actionableSteps": [
            {
                "title": "Switch to reusable containers",
                "description": "Offer a deposit scheme for lidded steel tubs.",
                "impactLevel": "High"
            }
        ]
    })
}

pub(crate) fn candidate_envelope(text: &str) -> Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP"
        }]
    })
}

/// What the loopback server saw of the one request it answered.
#[derive(Debug, Clone)]
pub(crate) struct CapturedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub(crate) struct LoopbackServer {
    pub base: String,
    pub captured: mpsc::Receiver<CapturedRequest>,
}

fn bind_loopback() -> anyhow::Result<(Server, String)> {
    let server = Server::http("127.0.0.1:0")
        .map_err(|err| anyhow::anyhow!("loopback server failed to bind: {err}"))?;
    let base = format!("http://{}/v1beta", server.server_addr());
    Ok((server, base))
}

/// Answers exactly one HTTP request with `status` and `body`, handing what
/// it received back through `captured`.
pub(crate) fn serve_once(status: u16, body: String) -> anyhow::Result<LoopbackServer> {
    let (server, base) = bind_loopback()?;
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let Ok(mut request) = server.recv() else {
            return;
        };
        let mut received = String::new();
        let _ = request.as_reader().read_to_string(&mut received);
        let _ = tx.send(CapturedRequest {
            method: request.method().to_string(),
            url: request.url().to_string(),
            headers: request
                .headers()
                .iter()
                .map(|header| (header.field.to_string(), header.value.to_string()))
                .collect(),
            body: received,
        });

        let mut response = Response::from_data(body.into_bytes()).with_status_code(StatusCode(status));
        if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
            response = response.with_header(header);
        }
        let _ = request.respond(response);
    });
    Ok(LoopbackServer { base, captured: rx })
}

/// Accepts one request and never answers it.
pub(crate) fn serve_hanging(hold: Duration) -> anyhow::Result<String> {
    let (server, base) = bind_loopback()?;
    thread::spawn(move || {
        if let Ok(request) = server.recv() {
            thread::sleep(hold);
            drop(request);
        }
    });
    Ok(base)
}

/// Scripted transport. Counts calls and can hold each call until released.
pub(crate) struct FakeTransport {
    replies: Mutex<VecDeque<Result<TransportReply, AuditError>>>,
    requests: Mutex<Vec<AuditRequest>>,
    calls: AtomicUsize,
    gate: Mutex<Option<mpsc::Receiver<()>>>,
}

impl FakeTransport {
    pub fn replying(replies: Vec<Result<TransportReply, AuditError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    pub fn with_text(text: &str) -> Self {
        Self::replying(vec![Ok(TransportReply {
            text: Some(text.to_string()),
            ..TransportReply::default()
        })])
    }

    /// Every call blocks until the returned sender fires once per call, or
    /// is dropped.
    pub fn gated(self) -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut gate) = self.gate.lock() {
            *gate = Some(rx);
        }
        (self, tx)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<AuditRequest> {
        self.requests
            .lock()
            .ok()
            .and_then(|requests| requests.last().cloned())
    }
}

impl AuditTransport for FakeTransport {
    fn name(&self) -> &str {
        "fake"
    }

    fn send(
        &self,
        request: &AuditRequest,
        cancel: &CancelToken,
    ) -> Result<TransportReply, AuditError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Ok(gate) = self.gate.lock() {
            if let Some(rx) = gate.as_ref() {
                loop {
                    match rx.recv_timeout(Duration::from_millis(10)) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => cancel.check()?,
                    }
                }
            }
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .unwrap_or_else(|| Err(AuditError::Transport("no scripted reply".to_string())))
    }
}
