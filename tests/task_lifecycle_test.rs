use serde_json::json;
use std::sync::Arc;
use tasknet::EngineError;
use tasknet::nodes::condition::{Condition, ConditionKind};
use tasknet::nodes::flow::{Flow, RoutingType};
use tasknet::nodes::mapping::{DataValidator, Decomposition, Mapping, Parameter, SchemaValidator};
use tasknet::nodes::task::Task;
use tasknet::nodes::timer::{TimerState, TimerTrigger, TimerVariable};
use tasknet::runtime::identifier::Identifier;
use tasknet::runtime::net::Net;
use tasknet::runtime::storage::{InMemoryJournal, Journal, Transaction, WriteIntent};
use uuid::Uuid;

fn case() -> Identifier {
    Identifier::new("case")
}

fn task(id: &str) -> Task {
    Task::new(id, RoutingType::Xor, RoutingType::And)
}

/// Fires, starts and completes a single-instance task with an empty output.
fn run_task(net: &mut Net, id: &str, tx: &mut Transaction) {
    let children = net.fire_task(id, tx).unwrap();
    for child in &children {
        net.start_instance(id, child, tx).unwrap();
        net.complete_instance(id, child, &json!({}), tx).unwrap();
    }
}

/// i -> T -> o
fn single(t: Task) -> Net {
    let mut net = Net::new("single", "i", "o");
    net.add_task(t).unwrap();
    net.connect_condition("i", "T").unwrap();
    net.connect_task("T", Flow::to("o")).unwrap();
    net
}

/// i -> A -> {c1, c2}; c1 -> B -> o; c2 -> C -> o. B cancels c2 and C.
fn cancellation_net() -> Net {
    let mut net = Net::new("cancel", "i", "o");
    for id in ["c1", "c2"] {
        net.add_condition(Condition::new(id, ConditionKind::Explicit)).unwrap();
    }
    net.add_task(task("A")).unwrap();
    let mut b = task("B");
    b.add_to_cancellation_set("c2");
    b.add_to_cancellation_set("C");
    net.add_task(b).unwrap();
    net.add_task(task("C")).unwrap();

    net.connect_condition("i", "A").unwrap();
    net.connect_task("A", Flow::to("c1")).unwrap();
    net.connect_task("A", Flow::to("c2")).unwrap();
    net.connect_condition("c1", "B").unwrap();
    net.connect_condition("c2", "C").unwrap();
    net.connect_task("B", Flow::to("o")).unwrap();
    net.connect_task("C", Flow::to("o")).unwrap();
    net
}

#[test]
fn test_cancellation_region_purges_conditions() {
    let mut net = cancellation_net();
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();
    run_task(&mut net, "A", &mut tx);
    assert_eq!(net.enabled_tasks(), vec!["B", "C"]);

    run_task(&mut net, "B", &mut tx);

    assert_eq!(net.condition("c2").unwrap().token_count(), 0);
    assert!(net.enabled_tasks().is_empty());
    assert!(net.is_completed());
    assert_eq!(net.identifiers().locations(&case()), ["o".to_string()]);
}

#[test]
fn test_cancellation_region_releases_busy_task() {
    let mut net = cancellation_net();
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();
    run_task(&mut net, "A", &mut tx);

    let children = net.fire_task("C", &mut tx).unwrap();
    net.start_instance("C", &children[0], &mut tx).unwrap();
    assert_eq!(net.busy_tasks(), vec!["C"]);

    run_task(&mut net, "B", &mut tx);

    assert!(net.busy_tasks().is_empty());
    assert!(tx.intents().contains(&WriteIntent::InstanceCancelled {
        task: "C".to_string(),
        identifier: children[0].clone(),
    }));
    assert_eq!(net.condition("o").unwrap().token_count(), 1);
    assert_eq!(net.identifiers().locations(&case()), ["o".to_string()]);

    // The cancelled instance can no longer report back
    let err = net
        .complete_instance("C", &children[0], &json!({}), &mut tx)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation { .. }));
}

#[test]
fn test_cancel_element_directly() {
    let mut net = single(task("T"));
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    net.cancel_element("i", &mut tx).unwrap();
    assert_eq!(net.condition("i").unwrap().token_count(), 0);
    assert!(net.identifiers().locations(&case()).is_empty());

    let err = net.cancel_element("missing", &mut tx).unwrap_err();
    assert!(matches!(err, EngineError::ElementNotFound(_)));
}

#[test]
fn test_timer_closes_on_exit() {
    let mut t = task("T");
    t.set_timer(Some(TimerVariable::new(TimerTrigger::OnEnabled, "PT5M")));
    let mut net = single(t);
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    let children = net.fire_task("T", &mut tx).unwrap();
    assert_eq!(net.task("T").unwrap().timer().unwrap().state(), TimerState::Active);

    net.start_instance("T", &children[0], &mut tx).unwrap();
    net.complete_instance("T", &children[0], &json!({}), &mut tx).unwrap();
    assert_eq!(net.task("T").unwrap().timer().unwrap().state(), TimerState::Closed);
    assert!(tx.intents().contains(&WriteIntent::TimerClosed { task: "T".to_string() }));
}

#[test]
fn test_timer_on_executing_waits_for_start() {
    let mut t = task("T");
    t.set_timer(Some(TimerVariable::new(TimerTrigger::OnExecuting, "PT1H")));
    let mut net = single(t);
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    let children = net.fire_task("T", &mut tx).unwrap();
    assert_eq!(net.task("T").unwrap().timer().unwrap().state(), TimerState::Dormant);
    net.start_instance("T", &children[0], &mut tx).unwrap();
    assert_eq!(net.task("T").unwrap().timer().unwrap().state(), TimerState::Active);
}

#[test]
fn test_enablement_mappings_are_evaluated_at_firing() {
    let mut t = task("T");
    t.add_enablement_mapping(Mapping::new("amount * 2", "doubled"));
    let mut net = single(t).with_variables([("amount".to_string(), json!(21))]);
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    net.fire_task("T", &mut tx).unwrap();
    assert_eq!(net.task("T").unwrap().enablement_data(), &json!({ "doubled": 42 }));
}

#[test]
fn test_completion_mappings_update_case_data() {
    let mut t = task("T");
    t.add_completion_mapping(Mapping::new("total", "total"));
    let mut net = single(t).with_variables([("total".to_string(), json!(0))]);
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    let children = net.fire_task("T", &mut tx).unwrap();
    net.start_instance("T", &children[0], &mut tx).unwrap();
    net.complete_instance("T", &children[0], &json!({ "total": 99 }), &mut tx)
        .unwrap();

    assert_eq!(net.data().get_var("total"), Some(&json!(99)));
    assert!(tx.intents().contains(&WriteIntent::VariableSet {
        name: "total".to_string(),
        value: json!(99),
    }));
}

#[test]
fn test_invalid_output_is_rejected_and_task_stays_busy() {
    let mut decomposition = Decomposition::new("calc");
    decomposition.output_params.push(Parameter::new("total", "integer"));
    let mut t = task("T");
    t.set_decomposition(Some(decomposition));
    let mut net = single(t).with_validator(Some(Arc::new(SchemaValidator) as Arc<dyn DataValidator>));
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    let children = net.fire_task("T", &mut tx).unwrap();
    net.start_instance("T", &children[0], &mut tx).unwrap();

    let err = net
        .complete_instance("T", &children[0], &json!({ "total": "lots" }), &mut tx)
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));
    assert!(net.task("T").unwrap().is_busy());
    assert!(net.task("T").unwrap().semaphores().is_executing(&children[0]));

    assert!(net
        .complete_instance("T", &children[0], &json!({ "total": 5 }), &mut tx)
        .unwrap());
}

#[test]
fn test_instance_must_be_started_once() {
    let mut net = single(task("T"));
    let mut tx = Transaction::new();
    net.start_case(&mut tx, case()).unwrap();

    let children = net.fire_task("T", &mut tx).unwrap();
    net.start_instance("T", &children[0], &mut tx).unwrap();
    let err = net.start_instance("T", &children[0], &mut tx).unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation { .. }));

    let err = net
        .start_instance("T", &Identifier::new("case.9"), &mut tx)
        .unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation { .. }));
}

#[test]
fn test_unknown_task_is_reported() {
    let mut net = single(task("T"));
    let mut tx = Transaction::new();
    assert!(matches!(
        net.fire_task("nope", &mut tx).unwrap_err(),
        EngineError::ElementNotFound(_)
    ));
    // A condition id is not a task
    assert!(matches!(
        net.fire_task("i", &mut tx).unwrap_err(),
        EngineError::ElementNotFound(_)
    ));
    assert!(net.condition("i").is_some());
}

#[test]
fn test_cloned_nets_run_independently() {
    let mut template = single(task("T"));
    let mut tx = Transaction::new();
    template.start_case(&mut tx, case()).unwrap();

    let mut copy = template.clone();
    run_task(&mut copy, "T", &mut tx);

    assert!(copy.is_completed());
    assert!(!template.is_completed());
    assert!(template.is_enabled("T"));
}

#[test]
fn test_rejected_duplicate_element() {
    let mut net = single(task("T"));
    let err = net.add_task(task("T")).unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation { .. }));
    let err = net
        .add_condition(Condition::new("i", ConditionKind::Explicit))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvariantViolation { .. }));
}

#[tokio::test]
async fn test_transactions_replay_in_commit_order() {
    let journal = InMemoryJournal::new();
    let case_id = Uuid::new_v4();
    let mut net = single(task("T"));

    let mut first = Transaction::new();
    net.start_case(&mut first, case()).unwrap();
    let mut expected = first.intents().to_vec();
    assert_eq!(first.commit(&journal, case_id).await.unwrap(), expected.len());

    let mut second = Transaction::new();
    run_task(&mut net, "T", &mut second);
    expected.extend(second.intents().iter().cloned());
    second.commit(&journal, case_id).await.unwrap();

    // Empty transactions write nothing
    assert_eq!(Transaction::new().commit(&journal, case_id).await.unwrap(), 0);

    assert_eq!(journal.transaction_count(case_id), 2);
    assert_eq!(journal.replay(case_id).await.unwrap(), expected);
    assert!(journal.replay(Uuid::new_v4()).await.unwrap().is_empty());
}

#[test]
fn test_savepoint_rollback_discards_later_intents() {
    let mut tx = Transaction::new();
    tx.record(WriteIntent::TaskReleased { task: "A".to_string() });
    let savepoint = tx.savepoint();
    tx.record(WriteIntent::TaskReleased { task: "B".to_string() });
    tx.rollback_to(savepoint);
    assert_eq!(tx.intents(), [WriteIntent::TaskReleased { task: "A".to_string() }]);
}
