//! Two nodes exchanging sequence steps over the HTTP mesh.

mod common;

use std::sync::Arc;

use tokio::net::TcpListener;

use meshrun::coordinator::MSG_TYPE_FN_RESULT;
use meshrun::invoker::FnInvoker;
use meshrun::mesh::{MeshConfig, MeshType, Message, RecordingHandler};
use meshrun::node::Node;
use meshrun::request::CoordinatedRequest;
use meshrun::sequence::FnResult;

use common::{fqfn, node_config, plan, wait_for_messages, PROC_UUID};

fn http_mesh(peer: &str, port: u16) -> MeshConfig {
    MeshConfig {
        mesh_type: MeshType::Http,
        peers: format!("{}=http://127.0.0.1:{}", fqfn(peer), port),
        identifier: None,
    }
}

async fn serve(node: Arc<Node>, listener: TcpListener) {
    node.join_mesh().await.unwrap();
    let router = node.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
}

struct Pair {
    front: Arc<Node>,
    front_port: u16,
}

async fn start_pair() -> Pair {
    let front_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let back_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let front_port = front_listener.local_addr().unwrap().port();
    let back_port = back_listener.local_addr().unwrap().port();

    let front = Arc::new(
        Node::new(
            node_config(&fqfn("front"), http_mesh("back", back_port)),
            Arc::new(FnInvoker::from_output(|req| {
                let mut out = b"front:".to_vec();
                out.extend_from_slice(&req.body);
                Ok(out)
            })),
        )
        .unwrap(),
    );
    let back = Arc::new(
        Node::new(
            node_config(&fqfn("back"), http_mesh("front", front_port)),
            Arc::new(FnInvoker::from_output(|req| {
                let mut out = b"back:".to_vec();
                out.extend(req.state.get("front").cloned().unwrap_or_default());
                Ok(out)
            })),
        )
        .unwrap(),
    );

    serve(front.clone(), front_listener).await;
    serve(back, back_listener).await;

    Pair { front, front_port }
}

#[tokio::test]
async fn test_sequence_crosses_http_peers() {
    let pair = start_pair().await;

    let reports = RecordingHandler::new();
    let received = reports.received();
    pair.front
        .mesh()
        .subscribe(MSG_TYPE_FN_RESULT, Box::new(reports))
        .await
        .unwrap();

    let req = CoordinatedRequest::from_input("req-http", b"x".to_vec())
        .with_sequence(plan(&["front", "back"]));
    let msg = Message::with_parent(fqfn("front"), "origin", req.to_json().unwrap());
    pair.front
        .mesh()
        .connect()
        .tunnel(&fqfn("front"), msg)
        .await
        .unwrap();

    let messages = wait_for_messages(&received, 2).await;
    let results: Vec<FnResult> = messages
        .iter()
        .map(|m| FnResult::from_json(&m.data).unwrap())
        .collect();

    let back = results.iter().find(|r| r.key == "back").unwrap();
    assert_eq!(back.response().unwrap().output, b"back:front:x");
    assert!(results.iter().any(|r| r.key == "front"));
}

#[tokio::test]
async fn test_direct_invocation_over_http() {
    let pair = start_pair().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://127.0.0.1:{}/run", pair.front_port))
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"front:hello");
}

#[tokio::test]
async fn test_health_over_http() {
    let pair = start_pair().await;

    let health: serde_json::Value =
        reqwest::get(format!("http://127.0.0.1:{}/meta/health", pair.front_port))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(health["fqfn"], fqfn("front"));
    assert_eq!(health["uuid"], PROC_UUID);
}

#[tokio::test]
async fn test_metrics_over_http() {
    let pair = start_pair().await;
    let client = reqwest::Client::new();

    client
        .post(format!("http://127.0.0.1:{}/run", pair.front_port))
        .body("hello")
        .send()
        .await
        .unwrap();

    let metrics: serde_json::Value =
        reqwest::get(format!("http://127.0.0.1:{}/meta/metrics", pair.front_port))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(metrics["invocations"]["succeeded"], 1);
    assert_eq!(metrics["steps"]["reported"], 0);
}
