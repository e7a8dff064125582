use serde_json::json;
use tasknet::expr::{Evaluator, ExprEvaluator};

#[test]
fn test_nested_fields_are_addressable() {
    let evaluator = ExprEvaluator::new();
    let doc = json!({ "order": { "total": 40, "customer": { "tier": "gold" } } });

    assert_eq!(evaluator.evaluate("order.total * 2", &doc).unwrap(), json!(80));
    assert!(evaluator.evaluate_boolean("order.customer.tier == \"gold\"", &doc).unwrap());
}

#[test]
fn test_arrays_evaluate_as_lists() {
    let evaluator = ExprEvaluator::new();
    let doc = json!({ "items": [3, 5, 8] });

    assert_eq!(evaluator.evaluate_list("items", &doc).unwrap(), vec![json!(3), json!(5), json!(8)]);
    assert_eq!(evaluator.evaluate("len(items)", &doc).unwrap(), json!(3));
}

#[test]
fn test_colliding_names_keep_earlier_binding() {
    let evaluator = ExprEvaluator::new();
    // "a" flattens to "a.b" before the literal "a.b" key is reached
    let doc = json!({ "a.b": 1, "a": { "b": "nested" }, "c": true });

    assert_eq!(evaluator.evaluate("a.b", &doc).unwrap(), json!("nested"));
    assert!(evaluator.evaluate_boolean("c", &doc).unwrap());
}

#[test]
fn test_syntax_errors_are_reported() {
    let evaluator = ExprEvaluator::new();
    assert!(evaluator.check_syntax("((x").is_err());
    assert!(evaluator.check_syntax("x + 1").is_ok());
}
