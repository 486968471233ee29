//! End-to-end tests: a real listener on an ephemeral port, driven over TCP.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use taskpool::api;
use taskpool::pool::{ExecutionError, PoolConfig};
use taskpool::scheduler::Scheduler;
use taskpool::server::Server;
use taskpool::store::InMemoryTaskStore;
use taskpool::task::Task;

struct TestApp {
    addr: std::net::SocketAddr,
    scheduler: Arc<Scheduler>,
    stop: oneshot::Sender<()>,
    server: JoinHandle<()>,
}

impl TestApp {
    async fn spawn(workers: usize, queue_capacity: usize) -> Self {
        let config = PoolConfig {
            workers,
            queue_capacity,
            backoff_unit: Duration::from_millis(1),
        };
        let handler = |_task: Arc<Task>| async { Ok::<(), ExecutionError>(()) };
        let scheduler = Arc::new(
            Scheduler::new(config, Arc::new(InMemoryTaskStore::new()), handler).unwrap(),
        );
        scheduler.start();

        let router = Arc::new(api::routes(Arc::clone(&scheduler)));
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (stop, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            server
                .run_until(
                    move |request| {
                        let router = Arc::clone(&router);
                        async move { router.route(request).await }
                    },
                    async {
                        let _ = stop_rx.await;
                    },
                )
                .await
                .unwrap();
        });

        Self {
            addr,
            scheduler,
            stop,
            server,
        }
    }

    async fn send(&self, method: &str, target: &str, body: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let raw = format!(
            "{method} {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\
             Content-Length: {}\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(raw.as_bytes()).await.unwrap();

        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        let (head, body) = out.split_once("\r\n\r\n").unwrap();
        let status = head
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap();
        (status, body.to_owned())
    }

    async fn stop(self) {
        self.stop.send(()).unwrap();
        self.server.await.unwrap();
        self.scheduler.shutdown().await;
    }
}

fn task_body(id: &str) -> String {
    format!(r#"{{"id":"{id}","payload":"data","max_retries":3}}"#)
}

#[tokio::test]
async fn enqueued_task_completes_and_reports_done() {
    let app = TestApp::spawn(2, 8).await;

    let (status, body) = app.send("POST", "/enqueue", &task_body("t1")).await;
    assert_eq!(status, 202);
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body, serde_json::json!({"status": "accepted", "id": "t1"}));

    let done = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (status, body) = app.send("GET", "/status?id=t1", "").await;
            assert_eq!(status, 200);
            let body: serde_json::Value = serde_json::from_str(&body).unwrap();
            if body["status"] == "done" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(done["retries"], 0);

    app.stop().await;
}

#[tokio::test]
async fn duplicate_and_bad_requests() {
    let app = TestApp::spawn(1, 8).await;

    assert_eq!(app.send("POST", "/enqueue", &task_body("dup")).await.0, 202);
    assert_eq!(app.send("POST", "/enqueue", &task_body("dup")).await.0, 409);

    let (status, body) = app.send("POST", "/enqueue", "{not json").await;
    assert_eq!((status, body.as_str()), (400, "Invalid JSON"));

    let (status, body) = app.send("POST", "/enqueue", r#"{"id":"x"}"#).await;
    assert_eq!((status, body.as_str()), (400, "Missing required fields"));

    assert_eq!(app.send("GET", "/status", "").await.0, 400);
    let (status, body) = app.send("GET", "/status?id=ghost", "").await;
    assert_eq!((status, body.as_str()), (404, "Task not found"));

    app.stop().await;
}

#[tokio::test]
async fn full_queue_returns_503_and_marks_task_failed() {
    let app = TestApp::spawn(0, 1).await;

    assert_eq!(app.send("POST", "/enqueue", &task_body("a")).await.0, 202);
    let (status, body) = app.send("POST", "/enqueue", &task_body("b")).await;
    assert_eq!(status, 503);
    assert!(body.contains("queue is full"), "body: {body}");

    let (_, body) = app.send("GET", "/status?id=b", "").await;
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "failed");
    assert_eq!(body["retries"], 0);

    let (_, body) = app.send("GET", "/status?id=a", "").await;
    let body: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "queued");

    app.stop().await;
}

#[tokio::test]
async fn healthz_and_routing_errors() {
    let app = TestApp::spawn(1, 8).await;

    let (status, body) = app.send("GET", "/healthz", "").await;
    assert_eq!((status, body.as_str()), (200, "OK"));
    assert_eq!(app.send("GET", "/enqueue", "").await.0, 405);
    assert_eq!(app.send("POST", "/status", "").await.0, 405);
    assert_eq!(app.send("GET", "/nowhere", "").await.0, 404);

    app.stop().await;
}
