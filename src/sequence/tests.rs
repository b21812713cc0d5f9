use super::*;
use crate::request::CoordinatedResponse;

fn plan(names: &[&str]) -> Sequence {
    Sequence::new(
        names
            .iter()
            .map(|n| Step::callable(CallableFn::new(*n, format!("acme#default::{n}@v1"))))
            .collect(),
    )
    .unwrap()
}

fn run_err_result(key: &str, code: i32) -> FnResult {
    FnResult::new(
        format!("acme#default::{key}@v1"),
        key,
        Outcome::RunErr(RunErr::new(code, "boom")),
    )
}

#[test]
fn test_next_step_walks_plan_in_order() {
    for n in 0..5 {
        let names: Vec<String> = (0..n).map(|i| format!("fn{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();

        for k in 0..=n {
            let mut seq = plan(&refs);
            for i in 0..k {
                assert!(seq.complete_step(i));
            }
            match seq.next_step() {
                Some(step) => {
                    assert!(k < n);
                    assert_eq!(step.exec.key(), format!("fn{k}"));
                }
                None => assert_eq!(k, n),
            }
        }
    }
}

#[test]
fn test_next_step_skips_completed_prefix_only() {
    let mut seq = plan(&["a", "b", "c"]);
    seq.complete_step(1);
    assert_eq!(seq.next_step().unwrap().exec.key(), "a");
}

#[test]
fn test_complete_step_is_idempotent() {
    let mut seq = plan(&["a", "b"]);
    assert!(seq.complete_step(0));
    assert!(seq.complete_step(0));
    assert_eq!(seq.next_step_index(), Some(1));
    assert!(!seq.complete_step(7));
}

#[test]
fn test_empty_input_is_finished_plan() {
    let seq = Sequence::from_json(b"").unwrap();
    assert!(seq.is_finished());
    assert!(seq.steps().is_empty());
}

#[test]
fn test_plan_json_round_trip_preserves_flags_and_groups() {
    let mut with = BTreeMap::new();
    with.insert("img".to_string(), "resize".to_string());
    let mut store = CallableFn::new("store", "acme#default::store@v1");
    store.with = with;
    store.as_key = Some("saved".to_string());

    let mut seq = Sequence::new(vec![
        Step::callable(CallableFn::new("resize", "acme#default::resize@v1")),
        Step::group(vec![
            CallableFn::new("tag", "acme#default::tag@v1"),
            CallableFn::new("thumb", "acme#default::thumb@v1"),
        ]),
        Step::callable(store),
    ])
    .unwrap();
    seq.complete_step(0);

    let decoded = Sequence::from_json(&seq.steps_json().unwrap()).unwrap();
    assert_eq!(decoded, seq);
    assert_eq!(decoded.next_step().unwrap().exec.fqfn(), "acme#default::tag@v1");
    assert_eq!(decoded.steps()[2].exec.key(), "saved");
}

#[test]
fn test_plan_wire_shape() {
    let seq = plan(&["a"]);
    let value: serde_json::Value = serde_json::from_slice(&seq.steps_json().unwrap()).unwrap();
    assert_eq!(value[0]["completed"], false);
    assert_eq!(value[0]["exec"]["callable"]["fn"], "a");
    assert_eq!(value[0]["exec"]["callable"]["fqfn"], "acme#default::a@v1");
}

#[test]
fn test_empty_group_rejected() {
    let err = Sequence::new(vec![Step::group(vec![])]).unwrap_err();
    assert!(matches!(err, SequenceError::EmptyGroup { index: 0 }));
}

#[test]
fn test_conflicting_err_handler_rejected() {
    let mut callable = CallableFn::new("a", "acme#default::a@v1");
    callable.on_err = Some(ErrHandler {
        any: Some(ErrAction::Continue),
        other: Some(ErrAction::Return),
        ..Default::default()
    });
    let err = Sequence::new(vec![Step::callable(callable)]).unwrap_err();
    assert!(matches!(err, SequenceError::ConflictingErrHandler { .. }));
}

#[test]
fn test_undecodable_plan_rejected() {
    assert!(matches!(
        Sequence::from_json(b"{oops"),
        Err(SequenceError::Decode(_))
    ));
}

#[test]
fn test_err_handler_resolution_order() {
    let mut handler = ErrHandler::default();
    assert_eq!(handler.resolve(500), ErrAction::Return);

    handler.code.insert(404, ErrAction::Continue);
    handler.other = Some(ErrAction::Return);
    assert_eq!(handler.resolve(404), ErrAction::Continue);
    assert_eq!(handler.resolve(500), ErrAction::Return);

    let any = ErrHandler {
        any: Some(ErrAction::Continue),
        ..Default::default()
    };
    assert_eq!(any.resolve(1), ErrAction::Continue);
}

#[test]
fn test_err_handler_json_uses_string_codes() {
    let handler: ErrHandler =
        serde_json::from_str(r#"{"code": {"404": "continue"}, "other": "return"}"#).unwrap();
    assert_eq!(handler.resolve(404), ErrAction::Continue);
    assert_eq!(handler.resolve(400), ErrAction::Return);
}

#[test]
fn test_handle_step_errs_halts_without_policy() {
    let seq = plan(&["a"]);
    let step = seq.next_step().unwrap();
    let err = handle_step_errs(&[run_err_result("a", 400)], step).unwrap_err();
    assert!(matches!(err, SequenceError::RunErr { ref key, .. } if key == "a"));
}

#[test]
fn test_handle_step_errs_continues_per_policy() {
    let mut callable = CallableFn::new("a", "acme#default::a@v1");
    callable.on_err = Some(ErrHandler {
        any: Some(ErrAction::Continue),
        ..Default::default()
    });
    let seq = Sequence::new(vec![Step::callable(callable)]).unwrap();
    let step = seq.next_step().unwrap();
    assert!(handle_step_errs(&[run_err_result("a", 400)], step).is_ok());
}

#[test]
fn test_handle_step_errs_ignores_success() {
    let seq = plan(&["a"]);
    let ok = FnResult::new("x", "a", Outcome::Response(CoordinatedResponse::new("hi")));
    assert!(handle_step_errs(&[ok], seq.next_step().unwrap()).is_ok());
}

#[test]
fn test_handle_step_results_merges_output_and_state() {
    let mut state = HashMap::new();
    state.insert("shared".to_string(), b"old".to_vec());

    let mut resp = CoordinatedResponse::new("small.png");
    resp.state.insert("shared".to_string(), b"new".to_vec());
    let result = FnResult::new("acme#default::resize@v1", "resize", Outcome::Response(resp));

    handle_step_results(&[result], &mut state).unwrap();
    assert_eq!(state["resize"], b"small.png");
    assert_eq!(state["shared"], b"new");
}

#[test]
fn test_handle_step_results_records_run_err() {
    let mut state = HashMap::new();
    handle_step_results(&[run_err_result("a", 404)], &mut state).unwrap();
    let recorded: RunErr = serde_json::from_slice(&state["a"]).unwrap();
    assert_eq!(recorded.code, 404);
}

#[test]
fn test_fn_result_outcome_is_tagged() {
    let ok = FnResult::new("f", "k", Outcome::Response(CoordinatedResponse::new("x")));
    let value: serde_json::Value = serde_json::from_slice(&ok.to_json().unwrap()).unwrap();
    assert!(value.get("response").is_some());
    assert!(value.get("runErr").is_none());
    assert!(value.get("execErr").is_none());

    let failed = FnResult::new("f", "k", Outcome::ExecErr("no runnable".to_string()));
    let value: serde_json::Value = serde_json::from_slice(&failed.to_json().unwrap()).unwrap();
    assert_eq!(value["execErr"], "no runnable");
    assert_eq!(FnResult::from_json(&failed.to_json().unwrap()).unwrap(), failed);
}
