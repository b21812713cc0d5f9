//! Multi-node sequences over the in-process channel mesh.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use meshrun::coordinator::MSG_TYPE_FN_RESULT;
use meshrun::invoker::{FnInvoker, FunctionInvoker};
use meshrun::mesh::{ChannelMesh, Mesh, MeshConfig, Message, RecordingHandler};
use meshrun::node::Node;
use meshrun::request::CoordinatedRequest;
use meshrun::sequence::{FnResult, RunErr};

use common::{fqfn, node_config, plan, wait_for_messages};

const ORIGIN: &str = "origin-request";

async fn start_node(root: &ChannelMesh, name: &str, invoker: impl FunctionInvoker + 'static) {
    let mesh: Arc<dyn Mesh> = Arc::new(root.with_shared());
    let node = Node::with_mesh(
        node_config(&fqfn(name), MeshConfig::default()),
        Arc::new(invoker),
        mesh,
    );
    node.join_mesh().await.unwrap();
}

async fn start_originator(root: &ChannelMesh) -> (ChannelMesh, RecordingHandler) {
    let originator = root.with_shared();
    let reports = RecordingHandler::new();
    originator
        .subscribe(MSG_TYPE_FN_RESULT, Box::new(reports.clone()))
        .await
        .unwrap();
    originator.start_consuming().await.unwrap();
    (originator, reports)
}

async fn kick_off(originator: &ChannelMesh, first: &str, req: &CoordinatedRequest) {
    let msg = Message::with_parent(fqfn(first), ORIGIN, req.to_json().unwrap());
    originator.connect().tunnel(&fqfn(first), msg).await.unwrap();
}

#[tokio::test]
async fn test_three_step_sequence_reports_every_step() {
    let root = ChannelMesh::new();

    start_node(
        &root,
        "upper",
        FnInvoker::from_output(|req| Ok(req.body.to_ascii_uppercase())),
    )
    .await;
    start_node(
        &root,
        "reverse",
        FnInvoker::from_output(|req| {
            let mut out = req.state.get("upper").cloned().unwrap_or_default();
            out.reverse();
            Ok(out)
        }),
    )
    .await;
    start_node(
        &root,
        "join",
        FnInvoker::from_output(|req| {
            let mut out = req.state.get("upper").cloned().unwrap_or_default();
            out.push(b'+');
            out.extend(req.state.get("reverse").cloned().unwrap_or_default());
            Ok(out)
        }),
    )
    .await;

    let (originator, reports) = start_originator(&root).await;
    let received = reports.received();

    let req = CoordinatedRequest::from_input("req-42", b"abc".to_vec())
        .with_sequence(plan(&["upper", "reverse", "join"]));
    kick_off(&originator, "upper", &req).await;

    let messages = wait_for_messages(&received, 3).await;
    let results: Vec<FnResult> = messages
        .iter()
        .map(|m| {
            assert_eq!(m.parent_id, "req-42");
            FnResult::from_json(&m.data).unwrap()
        })
        .collect();

    let output = |key: &str| {
        let result = results.iter().find(|r| r.key == key).unwrap();
        assert_eq!(result.fqfn, fqfn(key));
        result.response().unwrap().output.clone()
    };
    assert_eq!(output("upper"), b"ABC");
    assert_eq!(output("reverse"), b"CBA");
    assert_eq!(output("join"), b"ABC+CBA");

    // Terminal step sends nothing further.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(received.lock().await.len(), 3);
}

#[tokio::test]
async fn test_runtime_error_halts_sequence() {
    let root = ChannelMesh::new();
    let third_calls = Arc::new(AtomicUsize::new(0));

    start_node(&root, "first", FnInvoker::from_output(|_| Ok(b"ok".to_vec()))).await;
    start_node(
        &root,
        "second",
        FnInvoker::from_output(|_| Err(RunErr::new(422, "rejected"))),
    )
    .await;
    let calls = third_calls.clone();
    start_node(
        &root,
        "third",
        FnInvoker::from_output(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }),
    )
    .await;

    let (originator, reports) = start_originator(&root).await;
    let received = reports.received();

    let req = CoordinatedRequest::from_input("req-7", Vec::new())
        .with_sequence(plan(&["first", "second", "third"]));
    kick_off(&originator, "first", &req).await;

    let messages = wait_for_messages(&received, 2).await;
    let failed = messages
        .iter()
        .map(|m| FnResult::from_json(&m.data).unwrap())
        .find(|r| r.key == "second")
        .unwrap();
    assert_eq!(failed.run_err(), Some(&RunErr::new(422, "rejected")));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(received.lock().await.len(), 2);
    assert_eq!(third_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_forwarded_request_keeps_originator_correlation() {
    let root = ChannelMesh::new();
    start_node(&root, "one", FnInvoker::from_output(|_| Ok(b"1".to_vec()))).await;

    // Stand-in for the second node: record what arrives.
    let watcher = root.with_shared();
    let forwarded = RecordingHandler::new();
    watcher
        .subscribe(&fqfn("two"), Box::new(forwarded.clone()))
        .await
        .unwrap();
    watcher.start_consuming().await.unwrap();

    let (originator, _reports) = start_originator(&root).await;
    let req = CoordinatedRequest::from_input("req-9", b"in".to_vec())
        .with_sequence(plan(&["one", "two"]));
    kick_off(&originator, "one", &req).await;

    let messages = wait_for_messages(&forwarded.received(), 1).await;
    assert_eq!(messages[0].parent_id, ORIGIN);

    let next = CoordinatedRequest::from_json(&messages[0].data).unwrap();
    assert_eq!(next.id, "req-9");
    assert_eq!(next.body, b"in");
    assert_eq!(next.state["one"], b"1");
}
