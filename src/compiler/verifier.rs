use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use crate::expr::{Evaluator, EXTERNAL_PREFIX};
use crate::nodes::condition::ConditionKind;
use crate::nodes::flow::RoutingType;
use crate::nodes::mapping::Mapping;
use crate::nodes::task::Task;
use crate::runtime::net::Net;

/// A structural problem found in a net. Diagnostics are reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Diagnostic {
    /// Id of the offending element, or the net id for net-level problems.
    pub element: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(element: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.element, self.message)
    }
}

/// Sink for verification results.
pub trait VerificationHandler {
    fn add_error(&mut self, diagnostic: Diagnostic);
}

#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

impl VerificationHandler for DiagnosticCollector {
    fn add_error(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

/// Stateless structural checks over a compiled net.
pub struct Verifier<'a> {
    evaluator: &'a dyn Evaluator,
    /// Also require completion mappings to match the decomposition's declared
    /// output queries exactly.
    legacy_schema: bool,
}

impl<'a> Verifier<'a> {
    pub fn new(evaluator: &'a dyn Evaluator) -> Self {
        Self {
            evaluator,
            legacy_schema: false,
        }
    }

    pub fn legacy_schema(mut self, enabled: bool) -> Self {
        self.legacy_schema = enabled;
        self
    }

    /// Checks the whole net. Findings are sorted, deduplicated and handed to
    /// `handler` in one batch at the end of the pass.
    pub fn verify_net(&self, net: &Net, handler: &mut dyn VerificationHandler) {
        let mut found = BTreeSet::new();
        self.check_net(net, &mut found);
        for task in net.tasks() {
            self.check_task(task, net, &mut found);
        }
        for diagnostic in found {
            handler.add_error(diagnostic);
        }
    }

    /// Checks a single task against its owning net.
    pub fn verify_task(&self, task: &Task, net: &Net, handler: &mut dyn VerificationHandler) {
        let mut found = BTreeSet::new();
        self.check_task(task, net, &mut found);
        for diagnostic in found {
            handler.add_error(diagnostic);
        }
    }

    fn check_net(&self, net: &Net, out: &mut BTreeSet<Diagnostic>) {
        for condition in net.conditions() {
            let id = condition.id();
            match condition.kind() {
                ConditionKind::Input => {
                    if !condition.preset().is_empty() {
                        out.insert(Diagnostic::new(id, "input condition has incoming flows"));
                    }
                    if condition.postset().is_empty() {
                        out.insert(Diagnostic::new(id, "input condition has no outgoing flow"));
                    }
                }
                ConditionKind::Output => {
                    if !condition.postset().is_empty() {
                        out.insert(Diagnostic::new(id, "output condition has outgoing flows"));
                    }
                    if condition.preset().is_empty() {
                        out.insert(Diagnostic::new(id, "output condition has no incoming flow"));
                    }
                }
                ConditionKind::Explicit | ConditionKind::Implicit => {
                    if condition.preset().is_empty() {
                        out.insert(Diagnostic::new(id, "condition has no incoming flow"));
                    }
                    if condition.postset().is_empty() {
                        out.insert(Diagnostic::new(id, "condition has no outgoing flow"));
                    }
                }
            }
        }
    }

    fn check_task(&self, task: &Task, net: &Net, out: &mut BTreeSet<Diagnostic>) {
        let id = if task.id().trim().is_empty() {
            out.insert(Diagnostic::new(net.id(), "task has no id"));
            "<unnamed>"
        } else {
            task.id()
        };
        let mut report = |message: String| {
            out.insert(Diagnostic::new(id, message));
        };

        if task.preset().is_empty() {
            report("task has no incoming flow".to_string());
        }
        if task.postset().is_empty() {
            report("task has no outgoing flow".to_string());
        }

        // Split flows
        if task.split_type() != RoutingType::And {
            let mut orders = HashSet::new();
            let mut defaults = 0;
            for flow in task.postset() {
                match flow.ordering {
                    Some(order) if !orders.insert(order) => {
                        report(format!("{} split has duplicate evaluation order {}", task.split_type(), order));
                    }
                    Some(_) => {}
                    None => report(format!("flow to '{}' has no evaluation order", flow.target)),
                }
                if flow.is_default {
                    defaults += 1;
                } else if flow.predicate.is_none() {
                    report(format!("flow to '{}' has no predicate", flow.target));
                }
            }
            if defaults != 1 {
                report(format!(
                    "{} split needs exactly one default flow, found {}",
                    task.split_type(),
                    defaults
                ));
            }
        }

        for element in task.cancellation_set() {
            if !net.contains(element) {
                report(format!("cancellation set refers to unknown element '{}'", element));
            }
        }

        // Queries
        let mut queries: Vec<&str> = task
            .postset()
            .iter()
            .filter_map(|f| f.predicate.as_deref())
            .collect();
        for mappings in [task.starting_mappings(), task.completion_mappings(), task.enablement_mappings()] {
            queries.extend(mappings.iter().map(|m| m.expression.as_str()));
        }
        if let Some(mi) = task.multi_instance() {
            queries.extend(mi.queries());
        }
        for query in queries {
            if query.starts_with(EXTERNAL_PREFIX) {
                continue;
            }
            if let Err(e) = self.evaluator.check_syntax(query) {
                report(format!("invalid query: {}", e));
            }
        }

        // Mapping targets
        for (kind, mappings) in [
            ("input parameter", task.starting_mappings()),
            ("net variable", task.completion_mappings()),
            ("enablement parameter", task.enablement_mappings()),
        ] {
            for target in duplicated_targets(mappings) {
                report(format!("{} '{}' is mapped more than once", kind, target));
            }
        }
        for mapping in task.completion_mappings() {
            if !net.data().vars().contains_key(&mapping.maps_to) {
                report(format!("completion mapping targets undeclared net variable '{}'", mapping.maps_to));
            }
        }

        let mi_param = task
            .multi_instance()
            .and_then(|mi| mi.mi_input.as_ref())
            .map(|input| input.formal_input_param.as_str());

        if let Some(decomposition) = task.decomposition() {
            let declared: HashSet<&str> = decomposition.input_params.iter().map(|p| p.name.as_str()).collect();
            let mapped: HashSet<&str> = task.starting_mappings().iter().map(|m| m.maps_to.as_str()).collect();

            for mapping in task.starting_mappings() {
                if !declared.contains(mapping.maps_to.as_str()) {
                    report(format!(
                        "starting mapping targets '{}', which '{}' does not declare",
                        mapping.maps_to, decomposition.id
                    ));
                }
            }
            for param in &decomposition.input_params {
                let covered = mapped.contains(param.name.as_str()) || mi_param == Some(param.name.as_str());
                if !covered && !param.optional {
                    report(format!("input parameter '{}' has no starting mapping", param.name));
                }
            }
            if let Some(param) = mi_param {
                if !declared.contains(param) {
                    report(format!(
                        "multi-instance input parameter '{}' is not declared by '{}'",
                        param, decomposition.id
                    ));
                }
            }

            if self.legacy_schema {
                let expected: BTreeSet<&str> = decomposition.output_queries.iter().map(String::as_str).collect();
                let actual: BTreeSet<&str> = task
                    .completion_mappings()
                    .iter()
                    .map(|m| m.expression.as_str())
                    .collect();
                for missing in expected.difference(&actual) {
                    report(format!("declared output query '{}' has no completion mapping", missing));
                }
                for extra in actual.difference(&expected) {
                    report(format!("completion query '{}' is not a declared output query", extra));
                }
            }
        }

        if let Some(mi) = task.multi_instance() {
            if let Some(output) = &mi.mi_output {
                let joined = task
                    .completion_mappings()
                    .iter()
                    .any(|m| m.expression == output.output_query);
                if !joined {
                    report(format!(
                        "multi-instance output query '{}' is not a completion mapping",
                        output.output_query
                    ));
                }
                if !net.data().vars().contains_key(&output.result_variable) {
                    report(format!(
                        "multi-instance result variable '{}' is not a declared net variable",
                        output.result_variable
                    ));
                }
            }
            let literal = |q: &str| q.trim().parse::<u64>().ok();
            let minimum = literal(mi.minimum.as_str());
            if minimum == Some(0) {
                report("multi-instance minimum must be at least 1".to_string());
            }
            let maximum = mi.maximum.as_deref().and_then(literal);
            if let (Some(min), Some(max)) = (minimum, maximum) {
                if min > max {
                    report(format!("multi-instance minimum {} exceeds maximum {}", min, max));
                }
            }
            let threshold = mi.threshold.as_deref().and_then(literal);
            if let (Some(threshold), Some(max)) = (threshold, maximum) {
                if threshold > max {
                    report(format!("multi-instance threshold {} exceeds maximum {}", threshold, max));
                }
            }
        }
    }
}

fn duplicated_targets(mappings: &[Mapping]) -> Vec<&str> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for mapping in mappings {
        *counts.entry(mapping.maps_to.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(target, _)| target)
        .collect()
}
