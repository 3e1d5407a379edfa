//! Scripted local HTTP server for tests.
//!
//! An axum router with one route per scripted path (or a catch-all
//! fallback). Replies are served in order; once a script is exhausted
//! its last reply repeats.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::any,
};
use tokio::net::TcpListener;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: String,
    pub content_type: &'static str,
    pub delay: Option<Duration>,
}

impl Reply {
    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            content_type: "text/plain; charset=utf-8",
            delay: None,
        }
    }

    pub fn ok(body: &str) -> Self {
        Self::status(200, body)
    }

    pub fn html(body: &str) -> Self {
        Self {
            content_type: "text/html; charset=utf-8",
            ..Self::ok(body)
        }
    }

    pub fn json(body: &str) -> Self {
        Self {
            content_type: "application/json",
            ..Self::ok(body)
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

pub struct ScriptedServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    last_request: Arc<Mutex<Option<String>>>,
}

struct Script {
    replies: Vec<Reply>,
    served: usize,
}

impl Script {
    fn next(&mut self) -> Reply {
        let Some(last) = self.replies.len().checked_sub(1) else {
            return Reply::status(404, "no route");
        };
        let reply = self.replies[self.served.min(last)].clone();
        self.served += 1;
        reply
    }
}

/// Shared by every handler of one server.
#[derive(Clone)]
struct Recorder {
    hits: Arc<AtomicUsize>,
    last_request: Arc<Mutex<Option<String>>>,
}

impl Recorder {
    fn new() -> Self {
        Self {
            hits: Arc::new(AtomicUsize::new(0)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Counts the request and keeps its head as "METHOD path" plus one
    /// "name: value" line per header.
    fn record(&self, method: &Method, uri: &Uri, headers: &HeaderMap) {
        self.hits.fetch_add(1, Ordering::SeqCst);

        let mut head = format!("{method} {uri} HTTP/1.1\r\n");
        for (name, value) in headers {
            head.push_str(&format!("{}: {}\r\n", name, String::from_utf8_lossy(value.as_bytes())));
        }
        *self.last_request.lock().unwrap() = Some(head);
    }
}

async fn respond(reply: Reply) -> Response {
    if let Some(d) = reply.delay {
        sleep(d).await;
    }
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, reply.content_type)], reply.body).into_response()
}

/// One scripted path: the shared recorder plus its own replies.
#[derive(Clone)]
struct Route {
    recorder: Recorder,
    script: Arc<Mutex<Script>>,
}

impl Route {
    fn new(recorder: &Recorder, replies: Vec<Reply>) -> Self {
        Self {
            recorder: recorder.clone(),
            script: Arc::new(Mutex::new(Script { replies, served: 0 })),
        }
    }
}

async fn play(State(route): State<Route>, method: Method, uri: Uri, headers: HeaderMap) -> Response {
    route.recorder.record(&method, &uri, &headers);
    let reply = route.script.lock().unwrap().next();
    respond(reply).await
}

impl ScriptedServer {
    /// Serves `replies` in order on every path.
    pub async fn sequence(replies: Vec<Reply>) -> Self {
        let recorder = Recorder::new();
        let app = Router::new().fallback_service(any(play).with_state(Route::new(&recorder, replies)));
        Self::serve(app, recorder).await
    }

    /// Serves a separate script per path; unknown paths get 404.
    pub async fn routes(routes: Vec<(&str, Vec<Reply>)>) -> Self {
        let recorder = Recorder::new();
        let mut app = Router::new();
        for (path, replies) in routes {
            app = app.route(path, any(play).with_state(Route::new(&recorder, replies)));
        }
        // an empty script answers 404
        let app = app.fallback_service(any(play).with_state(Route::new(&recorder, Vec::new())));
        Self::serve(app, recorder).await
    }

    async fn serve(app: Router, recorder: Recorder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            hits: recorder.hits,
            last_request: recorder.last_request,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<String> {
        self.last_request.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripts_repeat_their_last_reply() {
        let server = ScriptedServer::routes(vec![(
            "/a",
            vec![Reply::status(503, "busy"), Reply::json("{}")],
        )])
        .await;
        let http = reqwest::Client::new();

        let statuses = [
            http.get(server.url("/a")).send().await.unwrap().status().as_u16(),
            http.get(server.url("/a")).send().await.unwrap().status().as_u16(),
            http.get(server.url("/a")).send().await.unwrap().status().as_u16(),
            http.get(server.url("/b")).send().await.unwrap().status().as_u16(),
        ];

        assert_eq!(statuses, [503, 200, 200, 404]);
        assert_eq!(server.hits(), 4);
        assert!(server.last_request().unwrap().starts_with("GET /b"));
    }

    #[tokio::test]
    async fn sequence_answers_every_path() {
        let server = ScriptedServer::sequence(vec![Reply::html("<p>ok</p>")]).await;

        let res = reqwest::get(server.url("/anything?x=1")).await.unwrap();
        assert_eq!(res.headers()[reqwest::header::CONTENT_TYPE], "text/html; charset=utf-8");
        assert_eq!(res.text().await.unwrap(), "<p>ok</p>");
        assert!(server.last_request().unwrap().starts_with("GET /anything?x=1"));
    }
}
