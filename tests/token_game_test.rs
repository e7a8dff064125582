use serde_json::json;
use tasknet::EngineError;
use tasknet::expr::EvaluationPolicy;
use tasknet::nodes::condition::{Condition, ConditionKind};
use tasknet::nodes::flow::{Flow, RoutingType};
use tasknet::nodes::task::Task;
use tasknet::runtime::identifier::Identifier;
use tasknet::runtime::net::Net;
use tasknet::runtime::storage::Transaction;

fn case() -> Identifier {
    Identifier::new("case")
}

fn explicit(net: &mut Net, ids: &[&str]) {
    for id in ids {
        net.add_condition(Condition::new(*id, ConditionKind::Explicit)).unwrap();
    }
}

/// Fires a task and drives every instance to completion.
fn run_task(net: &mut Net, task: &str, tx: &mut Transaction) {
    let children = net.fire_task(task, tx).expect("fire failed");
    for child in children {
        net.start_instance(task, &child, tx).expect("start failed");
        if net.complete_instance(task, &child, &json!({}), tx).expect("complete failed") {
            break;
        }
    }
}

/// c1, c2 -> T -> o
fn join_net(join: RoutingType) -> Net {
    let mut net = Net::new("join", "i", "o");
    explicit(&mut net, &["c1", "c2"]);
    net.add_task(Task::new("T", join, RoutingType::And)).unwrap();
    net.connect_condition("c1", "T").unwrap();
    net.connect_condition("c2", "T").unwrap();
    net.connect_task("T", Flow::to("o")).unwrap();
    net
}

#[test]
fn test_and_join_needs_every_preset() {
    let mut net = join_net(RoutingType::And);
    let mut tx = Transaction::new();

    net.add_token(&mut tx, "c1", case()).unwrap();
    assert!(!net.is_enabled("T"));

    net.add_token(&mut tx, "c2", case()).unwrap();
    assert!(net.is_enabled("T"));

    // Removing any single token disables it again
    net.remove_token(&mut tx, "c2", &case()).unwrap();
    assert!(!net.is_enabled("T"));
    net.add_token(&mut tx, "c2", case()).unwrap();
    net.remove_token(&mut tx, "c1", &case()).unwrap();
    assert!(!net.is_enabled("T"));
}

#[test]
fn test_and_join_picks_the_identifier_that_is_fully_joined() {
    let mut net = join_net(RoutingType::And);
    let mut tx = Transaction::new();
    let (a, b) = (Identifier::new("a"), Identifier::new("b"));
    net.add_token(&mut tx, "c1", a.clone()).unwrap();
    net.add_token(&mut tx, "c1", b.clone()).unwrap();
    net.add_token(&mut tx, "c2", b.clone()).unwrap();

    assert!(net.is_enabled("T"));
    let children = net.fire_task("T", &mut tx).unwrap();

    assert_eq!(children, vec![Identifier::new("b.1")]);
    assert_eq!(net.task("T").unwrap().current_identifier(), Some(&b));
    assert!(net.condition("c1").unwrap().contains(&a));
    assert!(!net.condition("c1").unwrap().contains(&b));
    assert_eq!(net.condition("c2").unwrap().token_count(), 0);
}

#[test]
fn test_and_join_consumes_from_every_preset() {
    let mut net = join_net(RoutingType::And);
    let mut tx = Transaction::new();
    net.add_token(&mut tx, "c1", case()).unwrap();
    net.add_token(&mut tx, "c2", case()).unwrap();

    net.fire_task("T", &mut tx).unwrap();
    assert_eq!(net.condition("c1").unwrap().token_count(), 0);
    assert_eq!(net.condition("c2").unwrap().token_count(), 0);
    assert_eq!(net.task("T").unwrap().current_identifier(), Some(&case()));
}

#[test]
fn test_xor_join_enabled_by_any_preset() {
    let mut net = join_net(RoutingType::Xor);
    let mut tx = Transaction::new();
    assert!(!net.is_enabled("T"));

    net.add_token(&mut tx, "c2", case()).unwrap();
    assert!(net.is_enabled("T"));
}

#[test]
fn test_xor_join_consumes_first_tokened_preset() {
    let mut net = join_net(RoutingType::Xor);
    let mut tx = Transaction::new();
    net.add_token(&mut tx, "c1", case()).unwrap();
    net.add_token(&mut tx, "c2", case()).unwrap();

    net.fire_task("T", &mut tx).unwrap();
    assert_eq!(net.condition("c1").unwrap().token_count(), 0);
    assert_eq!(net.condition("c2").unwrap().token_count(), 1);
}

#[test]
fn test_busy_task_is_not_enabled() {
    let mut net = join_net(RoutingType::Xor);
    let mut tx = Transaction::new();
    net.add_token(&mut tx, "c1", case()).unwrap();
    net.add_token(&mut tx, "c2", case()).unwrap();

    net.fire_task("T", &mut tx).unwrap();
    assert!(!net.is_enabled("T"));
    let err = net.fire_task("T", &mut tx).unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation { .. }));
}

#[test]
fn test_scenario_and_split_then_and_join() {
    // i -> T1 -> {c1, c2}; c1 -> T2 -> c3; c2 -> T3 -> c4; {c3, c4} -> T4 -> o
    let mut net = Net::new("scenario-a", "i", "o");
    explicit(&mut net, &["c1", "c2", "c3", "c4"]);
    net.add_task(Task::new("T1", RoutingType::Xor, RoutingType::And)).unwrap();
    net.add_task(Task::new("T2", RoutingType::Xor, RoutingType::And)).unwrap();
    net.add_task(Task::new("T3", RoutingType::Xor, RoutingType::And)).unwrap();
    net.add_task(Task::new("T4", RoutingType::And, RoutingType::And)).unwrap();
    net.connect_condition("i", "T1").unwrap();
    net.connect_task("T1", Flow::to("c1")).unwrap();
    net.connect_task("T1", Flow::to("c2")).unwrap();
    net.connect_condition("c1", "T2").unwrap();
    net.connect_condition("c2", "T3").unwrap();
    net.connect_task("T2", Flow::to("c3")).unwrap();
    net.connect_task("T3", Flow::to("c4")).unwrap();
    net.connect_condition("c3", "T4").unwrap();
    net.connect_condition("c4", "T4").unwrap();
    net.connect_task("T4", Flow::to("o")).unwrap();

    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();
    assert_eq!(net.enabled_tasks(), vec!["T1".to_string()]);

    run_task(&mut net, "T1", &mut tx);
    assert_eq!(net.enabled_tasks(), vec!["T2".to_string(), "T3".to_string()]);

    run_task(&mut net, "T2", &mut tx);
    assert!(!net.is_enabled("T4"));

    run_task(&mut net, "T3", &mut tx);
    assert!(net.is_enabled("T4"));

    run_task(&mut net, "T4", &mut tx);
    assert!(net.is_completed());
    assert!(net.busy_tasks().is_empty());
}

/// i -> T -> {ca, cb, cc} with the given split.
fn split_net(split: RoutingType, flows: Vec<Flow>, vars: serde_json::Value) -> Net {
    let vars = vars
        .as_object()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Vec<_>>())
        .unwrap_or_default();
    let mut net = Net::new("split", "i", "o").with_variables(vars);
    explicit(&mut net, &["ca", "cb", "cc"]);
    net.add_task(Task::new("T", RoutingType::Xor, split)).unwrap();
    net.connect_condition("i", "T").unwrap();
    for flow in flows {
        net.connect_task("T", flow).unwrap();
    }
    net
}

fn marked(net: &Net) -> Vec<String> {
    ["ca", "cb", "cc"]
        .into_iter()
        .filter(|c| net.condition(c).unwrap().contains_identifier())
        .map(str::to_string)
        .collect()
}

#[test]
fn test_scenario_xor_split_takes_default_when_predicate_false() {
    let flows = vec![
        Flow::to("ca").when("approved == true", 0),
        Flow::to("cb").default_flow(1),
    ];
    let mut net = split_net(RoutingType::Xor, flows, json!({ "approved": false }));
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    run_task(&mut net, "T", &mut tx);
    assert_eq!(marked(&net), vec!["cb"]);
}

#[test]
fn test_xor_split_fires_exactly_one_flow() {
    let flows = vec![
        Flow::to("ca").when("x > 0", 0),
        Flow::to("cb").when("x > 1", 1),
        Flow::to("cc").default_flow(2),
    ];
    let mut net = split_net(RoutingType::Xor, flows, json!({ "x": 5 }));
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    run_task(&mut net, "T", &mut tx);
    assert_eq!(marked(&net), vec!["ca"]);
}

#[test]
fn test_xor_split_evaluates_in_ordering_not_declaration_order() {
    let flows = vec![
        Flow::to("cc").default_flow(9),
        Flow::to("cb").when("x > 1", 2),
        Flow::to("ca").when("x > 100", 1),
    ];
    let mut net = split_net(RoutingType::Xor, flows, json!({ "x": 5 }));
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    run_task(&mut net, "T", &mut tx);
    assert_eq!(marked(&net), vec!["cb"]);
}

#[test]
fn test_or_split_fires_all_matching_without_default() {
    let flows = vec![
        Flow::to("ca").when("x > 0", 0),
        Flow::to("cb").when("y > 0", 1),
        Flow::to("cc").default_flow(2),
    ];
    let mut net = split_net(RoutingType::Or, flows, json!({ "x": 1, "y": 1 }));
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    run_task(&mut net, "T", &mut tx);
    assert_eq!(marked(&net), vec!["ca", "cb"]);
}

#[test]
fn test_or_split_falls_back_to_default() {
    let flows = vec![
        Flow::to("ca").when("x > 0", 0),
        Flow::to("cb").when("y > 0", 1),
        Flow::to("cc").default_flow(2),
    ];
    let mut net = split_net(RoutingType::Or, flows, json!({ "x": 0, "y": 0 }));
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    run_task(&mut net, "T", &mut tx);
    assert_eq!(marked(&net), vec!["cc"]);
}

#[test]
fn test_or_split_default_ordered_first_fires_alongside_later_matches() {
    let flows = vec![
        Flow::to("cc").default_flow(0),
        Flow::to("ca").when("x > 0", 1),
        Flow::to("cb").when("y > 0", 2),
    ];
    let mut net = split_net(RoutingType::Or, flows, json!({ "x": 0, "y": 1 }));
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    run_task(&mut net, "T", &mut tx);
    // Nothing had matched when the default was reached
    assert_eq!(marked(&net), vec!["cb", "cc"]);
}

#[test]
fn test_and_split_fires_every_flow() {
    let flows = vec![Flow::to("ca"), Flow::to("cb"), Flow::to("cc")];
    let mut net = split_net(RoutingType::And, flows, json!({}));
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    run_task(&mut net, "T", &mut tx);
    assert_eq!(marked(&net), vec!["ca", "cb", "cc"]);
}

#[test]
fn test_xor_split_without_match_keeps_task_busy() {
    let flows = vec![
        Flow::to("ca").when("x > 10", 0),
        Flow::to("cb").when("x > 20", 1),
    ];
    let mut net = split_net(RoutingType::Xor, flows, json!({ "x": 1 }));
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    let children = net.fire_task("T", &mut tx).unwrap();
    net.start_instance("T", &children[0], &mut tx).unwrap();
    let err = net
        .complete_instance("T", &children[0], &json!({}), &mut tx)
        .unwrap_err();

    assert!(matches!(err, EngineError::InvariantViolation { .. }));
    assert!(net.task("T").unwrap().is_busy());
    assert!(marked(&net).is_empty());
}

#[test]
fn test_failing_predicate_defaults_to_false_when_fail_open() {
    let flows = vec![
        Flow::to("ca").when("missing > 1", 0),
        Flow::to("cb").default_flow(1),
    ];
    let mut net = split_net(RoutingType::Xor, flows, json!({}));
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    run_task(&mut net, "T", &mut tx);
    assert_eq!(marked(&net), vec!["cb"]);
}

#[test]
fn test_failing_predicate_propagates_when_strict() {
    let flows = vec![
        Flow::to("ca").when("missing > 1", 0),
        Flow::to("cb").default_flow(1),
    ];
    let mut net = split_net(RoutingType::Xor, flows, json!({})).with_policy(EvaluationPolicy::Strict);
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    let children = net.fire_task("T", &mut tx).unwrap();
    net.start_instance("T", &children[0], &mut tx).unwrap();
    let err = net
        .complete_instance("T", &children[0], &json!({}), &mut tx)
        .unwrap_err();

    match err {
        EngineError::Evaluation { task, query, .. } => {
            assert_eq!(task, "T");
            assert_eq!(query, "missing > 1");
        }
        other => panic!("unexpected error: {other}"),
    }
    let task = net.task("T").unwrap();
    assert!(task.is_busy());
    assert_eq!(task.semaphores().executing(), 1);
    assert_eq!(task.semaphores().complete(), 0);

    // The failed completion left nothing behind, so it can be retried
    let err = net
        .complete_instance("T", &children[0], &json!({}), &mut tx)
        .unwrap_err();
    assert!(matches!(err, EngineError::Evaluation { .. }));
    assert_eq!(net.task("T").unwrap().semaphores().executing(), 1);
}

#[test]
fn test_failed_completion_records_no_intents() {
    let flows = vec![Flow::to("ca").when("missing > 1", 0)];
    let mut net = split_net(RoutingType::Xor, flows, json!({})).with_policy(EvaluationPolicy::Strict);
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();
    let children = net.fire_task("T", &mut tx).unwrap();
    net.start_instance("T", &children[0], &mut tx).unwrap();

    let recorded = tx.len();
    assert!(net.complete_instance("T", &children[0], &json!({}), &mut tx).is_err());
    assert_eq!(tx.len(), recorded);
}

#[test]
fn test_completion_requires_started_instance() {
    let mut net = split_net(RoutingType::And, vec![Flow::to("ca")], json!({}));
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    let children = net.fire_task("T", &mut tx).unwrap();
    let err = net
        .complete_instance("T", &children[0], &json!({}), &mut tx)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation { .. }));

    net.start_instance("T", &children[0], &mut tx).unwrap();
    assert!(net.complete_instance("T", &children[0], &json!({}), &mut tx).unwrap());
}

/// c1 -> B -> c3; c2 -> C -> c4; {c3, c4} -> J (OR join) -> o
fn or_join_net() -> Net {
    let mut net = Net::new("or-join", "i", "o");
    explicit(&mut net, &["c1", "c2", "c3", "c4"]);
    net.add_task(Task::new("B", RoutingType::Xor, RoutingType::And)).unwrap();
    net.add_task(Task::new("C", RoutingType::Xor, RoutingType::And)).unwrap();
    net.add_task(Task::new("J", RoutingType::Or, RoutingType::And)).unwrap();
    net.connect_condition("c1", "B").unwrap();
    net.connect_condition("c2", "C").unwrap();
    net.connect_task("B", Flow::to("c3")).unwrap();
    net.connect_task("C", Flow::to("c4")).unwrap();
    net.connect_condition("c3", "J").unwrap();
    net.connect_condition("c4", "J").unwrap();
    net.connect_task("J", Flow::to("o")).unwrap();
    net
}

#[test]
fn test_or_join_fires_when_no_other_branch_is_live() {
    let mut net = or_join_net();
    let mut tx = Transaction::new();
    net.add_token(&mut tx, "c3", case()).unwrap();

    assert!(net.is_enabled("J"));
}

#[test]
fn test_or_join_waits_for_marked_upstream_branch() {
    let mut net = or_join_net();
    let mut tx = Transaction::new();
    net.add_token(&mut tx, "c3", case()).unwrap();
    net.add_token(&mut tx, "c2", case()).unwrap();
    assert!(!net.is_enabled("J"));

    // Still waiting while C is busy with the case
    net.fire_task("C", &mut tx).unwrap();
    assert!(!net.is_enabled("J"));

    let child = Identifier::new("case.1");
    net.start_instance("C", &child, &mut tx).unwrap();
    net.complete_instance("C", &child, &json!({}), &mut tx).unwrap();
    assert!(net.is_enabled("J"));

    net.fire_task("J", &mut tx).unwrap();
    assert_eq!(net.condition("c3").unwrap().token_count(), 0);
    assert_eq!(net.condition("c4").unwrap().token_count(), 0);
}

#[test]
fn test_or_join_ignores_other_cases() {
    let mut net = or_join_net();
    let mut tx = Transaction::new();
    net.add_token(&mut tx, "c3", case()).unwrap();
    net.add_token(&mut tx, "c2", Identifier::new("other")).unwrap();

    assert!(net.is_enabled("J"));
}
