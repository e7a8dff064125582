use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::error::{Bound, EngineError, EngineResult};
use crate::expr::{overlay, Evaluation};
use crate::nodes::flow::{route, Flow, JoinType, RoutingType, SplitType};
use crate::nodes::mapping::{Decomposition, Mapping};
use crate::nodes::multi_instance::{CreationMode, InstanceSemaphores, InstanceState, MultiInstanceConfig};
use crate::nodes::timer::{TimerTrigger, TimerVariable};
use crate::nodes::Cancellable;
use crate::runtime::identifier::{Identifier, IdentifierRegistry};
use crate::runtime::net::{NetEnv, NetView};
use crate::runtime::storage::{Transaction, WriteIntent};

/// 任务 (Task)
///
/// Configuration is fixed once the net is compiled; everything below the
/// `current` field is transient and reset whenever the task exits or is cancelled.
#[derive(Debug, Clone)]
pub struct Task {
    id: String,
    name: Option<String>,
    split_type: SplitType,
    join_type: JoinType,
    preset: Vec<String>,
    postset: Vec<Flow>,
    cancellation_set: BTreeSet<String>,
    multi_instance: Option<MultiInstanceConfig>,
    decomposition: Option<Decomposition>,
    starting_mappings: Vec<Mapping>,
    completion_mappings: Vec<Mapping>,
    enablement_mappings: Vec<Mapping>,
    timer: Option<TimerVariable>,
    resourcing: Option<Value>,
    custom_form: Option<String>,

    current: Option<Identifier>,
    instances: InstanceSemaphores,
    staged: BTreeMap<String, Value>,
    aggregation: Vec<Value>,
    enablement_data: Value,
    resolved_max: Option<usize>,
}

impl Task {
    pub fn new(id: impl Into<String>, join_type: JoinType, split_type: SplitType) -> Self {
        Self {
            id: id.into(),
            name: None,
            split_type,
            join_type,
            preset: Vec::new(),
            postset: Vec::new(),
            cancellation_set: BTreeSet::new(),
            multi_instance: None,
            decomposition: None,
            starting_mappings: Vec::new(),
            completion_mappings: Vec::new(),
            enablement_mappings: Vec::new(),
            timer: None,
            resourcing: None,
            custom_form: None,
            current: None,
            instances: InstanceSemaphores::default(),
            staged: BTreeMap::new(),
            aggregation: Vec::new(),
            enablement_data: Value::Null,
            resolved_max: None,
        }
    }

    // --- Configuration ---

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn add_preset(&mut self, condition: &str) {
        if !self.preset.iter().any(|c| c == condition) {
            self.preset.push(condition.to_string());
        }
    }

    pub fn add_postset(&mut self, flow: Flow) {
        self.postset.push(flow);
    }

    pub fn add_to_cancellation_set(&mut self, element: &str) {
        self.cancellation_set.insert(element.to_string());
    }

    pub fn set_multi_instance(&mut self, config: Option<MultiInstanceConfig>) {
        self.multi_instance = config;
    }

    pub fn set_decomposition(&mut self, decomposition: Option<Decomposition>) {
        self.decomposition = decomposition;
    }

    pub fn add_starting_mapping(&mut self, mapping: Mapping) {
        self.starting_mappings.push(mapping);
    }

    pub fn add_completion_mapping(&mut self, mapping: Mapping) {
        self.completion_mappings.push(mapping);
    }

    pub fn add_enablement_mapping(&mut self, mapping: Mapping) {
        self.enablement_mappings.push(mapping);
    }

    pub fn set_timer(&mut self, timer: Option<TimerVariable>) {
        self.timer = timer;
    }

    pub fn set_resourcing(&mut self, resourcing: Option<Value>) {
        self.resourcing = resourcing;
    }

    pub fn set_custom_form(&mut self, uri: Option<String>) {
        self.custom_form = uri;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn split_type(&self) -> SplitType {
        self.split_type
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    pub fn preset(&self) -> &[String] {
        &self.preset
    }

    pub fn postset(&self) -> &[Flow] {
        &self.postset
    }

    pub fn cancellation_set(&self) -> &BTreeSet<String> {
        &self.cancellation_set
    }

    pub fn multi_instance(&self) -> Option<&MultiInstanceConfig> {
        self.multi_instance.as_ref()
    }

    pub fn decomposition(&self) -> Option<&Decomposition> {
        self.decomposition.as_ref()
    }

    pub fn starting_mappings(&self) -> &[Mapping] {
        &self.starting_mappings
    }

    pub fn completion_mappings(&self) -> &[Mapping] {
        &self.completion_mappings
    }

    pub fn enablement_mappings(&self) -> &[Mapping] {
        &self.enablement_mappings
    }

    pub fn timer(&self) -> Option<&TimerVariable> {
        self.timer.as_ref()
    }

    pub fn resourcing(&self) -> Option<&Value> {
        self.resourcing.as_ref()
    }

    pub fn custom_form(&self) -> Option<&str> {
        self.custom_form.as_deref()
    }

    // --- Execution state ---

    pub fn is_busy(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_identifier(&self) -> Option<&Identifier> {
        self.current.as_ref()
    }

    pub fn semaphores(&self) -> &InstanceSemaphores {
        &self.instances
    }

    pub fn instance_input(&self, child: &Identifier) -> Option<&Value> {
        self.instances.input(child)
    }

    /// Values of the enablement mappings, computed at the last firing.
    pub fn enablement_data(&self) -> &Value {
        &self.enablement_data
    }

    pub fn staged_outputs(&self) -> &BTreeMap<String, Value> {
        &self.staged
    }

    pub fn aggregation(&self) -> &[Value] {
        &self.aggregation
    }

    /// The first identifier, in preset order, for which the join holds.
    pub fn ready_identifier(&self, view: &NetView<'_>) -> Option<Identifier> {
        self.preset
            .iter()
            .filter_map(|c| view.condition(c))
            .flat_map(|c| c.tokens().iter())
            .find(|identifier| self.join_holds(view, identifier))
            .cloned()
    }

    // --- State machine ---

    pub fn t_enabled(&self, view: &NetView<'_>, identifier: Option<&Identifier>) -> bool {
        if self.is_busy() {
            return false;
        }
        match identifier {
            Some(identifier) => self.join_holds(view, identifier),
            None => self.ready_identifier(view).is_some(),
        }
    }

    fn join_holds(&self, view: &NetView<'_>, identifier: &Identifier) -> bool {
        let holds = |c: &String| view.condition(c).is_some_and(|c| c.contains(identifier));
        match self.join_type {
            RoutingType::And => !self.preset.is_empty() && self.preset.iter().all(holds),
            RoutingType::Xor => self.preset.iter().any(holds),
            RoutingType::Or => {
                self.preset.iter().any(holds) && view.or_join.or_join_enabled(self, identifier, view)
            }
        }
    }

    /// Fires the task: binds the ready identifier, spawns its instances and
    /// consumes preset tokens. Returns the child identifiers, one per instance.
    pub fn t_fire(&mut self, env: &mut NetEnv<'_>, tx: &mut Transaction) -> EngineResult<Vec<Identifier>> {
        if let Some(bound) = &self.current {
            return Err(EngineError::invariant(&self.id, format!("already busy with '{}'", bound)));
        }
        let identifier = self
            .ready_identifier(&env.view())
            .ok_or_else(|| EngineError::invariant(&self.id, "fired while not enabled"))?;

        let task_id = self.id.clone();
        let evaluation = Evaluation::new(env.evaluator, env.policy, &task_id);
        let case_doc = env.data.as_document();

        let enablement = self.evaluate_mappings(&evaluation, &self.enablement_mappings, &case_doc)?;
        let (slices, resolved_max) = self.instance_slices(&evaluation, &case_doc)?;

        let savepoint = tx.savepoint();
        self.current = Some(identifier.clone());
        tx.record(WriteIntent::TaskBound {
            task: task_id.clone(),
            identifier: identifier.clone(),
        });
        env.identifiers.add_location(tx, &identifier, &task_id);

        let mut children = Vec::with_capacity(slices.len());
        for slice in slices {
            let child = env.identifiers.create_child(tx, &identifier);
            self.instances.register(tx, &task_id, child.clone());
            match self.prepare_input(&evaluation, &case_doc, &child, slice) {
                Ok(input) => {
                    self.instances.set_input(&child, input);
                    children.push(child);
                }
                Err(e) => {
                    warn!(task = %task_id, instance = %child, error = %e, "input binding failed, rolling back firing");
                    self.instances.clear();
                    self.current = None;
                    env.identifiers.remove_location(tx, &identifier, &task_id);
                    tx.rollback_to(savepoint);
                    return Err(e);
                }
            }
        }

        self.enablement_data = enablement;
        self.resolved_max = resolved_max;
        if let Some(timer) = &mut self.timer {
            timer.reset();
            if timer.trigger == TimerTrigger::OnEnabled {
                timer.activate();
            }
        }

        let consumed: Vec<String> = {
            let view = env.view();
            let holds = |c: &&String| view.condition(c).is_some_and(|c| c.contains(&identifier));
            match self.join_type {
                RoutingType::And => self.preset.clone(),
                RoutingType::Or => self.preset.iter().filter(holds).cloned().collect(),
                RoutingType::Xor => self.preset.iter().find(holds).cloned().into_iter().collect(),
            }
        };
        for condition in &consumed {
            let removed = env
                .condition_mut(condition)
                .is_some_and(|c| c.remove(tx, &identifier));
            if removed {
                env.identifiers.remove_location(tx, &identifier, condition);
            }
        }

        info!(task = %task_id, identifier = %identifier, instances = children.len(), consumed = ?consumed, "task fired");
        Ok(children)
    }

    /// Moves a spawned instance from entered to executing.
    pub fn t_start(&mut self, tx: &mut Transaction, child: &Identifier) -> EngineResult<()> {
        if !self.is_busy() {
            return Err(EngineError::invariant(&self.id, "start while not busy"));
        }
        match self.instances.get(child) {
            None => {
                return Err(EngineError::invariant(&self.id, format!("unknown instance '{}'", child)));
            }
            Some(r) if r.cancelled => {
                return Err(EngineError::invariant(&self.id, format!("instance '{}' was cancelled", child)));
            }
            Some(r) if r.state != InstanceState::Entered => {
                return Err(EngineError::invariant(&self.id, format!("instance '{}' already started", child)));
            }
            Some(_) => {}
        }
        self.instances.transition(tx, &self.id, child, InstanceState::Executing);
        if let Some(timer) = &mut self.timer {
            if timer.trigger == TimerTrigger::OnExecuting {
                timer.activate();
            }
        }
        debug!(task = %self.id, instance = %child, "instance started");
        Ok(())
    }

    /// Adds one instance to a busy task with dynamic creation mode.
    pub fn t_add_instance(&mut self, env: &mut NetEnv<'_>, tx: &mut Transaction, input: Value) -> EngineResult<Identifier> {
        let Some(identifier) = self.current.clone() else {
            return Err(EngineError::invariant(&self.id, "instance added while not busy"));
        };
        let dynamic = self
            .multi_instance
            .as_ref()
            .is_some_and(|mi| mi.creation_mode == CreationMode::Dynamic);
        if !dynamic {
            return Err(EngineError::invariant(&self.id, "task does not allow dynamic instance creation"));
        }
        let active = self.instances.active();
        if let Some(max) = self.resolved_max {
            if active >= max {
                return Err(EngineError::InstanceBounds {
                    task: self.id.clone(),
                    bound: Bound::Maximum,
                    limit: max,
                    observed: active + 1,
                });
            }
        }

        let task_id = self.id.clone();
        let evaluation = Evaluation::new(env.evaluator, env.policy, &task_id);
        let case_doc = env.data.as_document();
        let savepoint = tx.savepoint();
        let child = env.identifiers.create_child(tx, &identifier);
        self.instances.register(tx, &task_id, child.clone());
        let has_input = self
            .multi_instance
            .as_ref()
            .is_some_and(|mi| mi.mi_input.is_some());
        let prepared = if has_input {
            self.prepare_input(&evaluation, &case_doc, &child, Some(input))
        } else {
            self.bind_input(&evaluation, &case_doc, &child, None)
                .and_then(|mut doc| match input {
                    Value::Object(supplied) => {
                        doc.extend(supplied);
                        Ok(doc)
                    }
                    Value::Null => Ok(doc),
                    other => Err(self.binding_error(&child, format!("instance input must be an object, got {}", other))),
                })
                .and_then(|doc| self.check_input(&child, doc))
        };
        match prepared {
            Ok(doc) => {
                self.instances.set_input(&child, doc);
                info!(task = %task_id, instance = %child, active = active + 1, "instance added");
                Ok(child)
            }
            Err(e) => {
                self.instances.remove(&child);
                tx.rollback_to(savepoint);
                Err(e)
            }
        }
    }

    /// Records an instance's output. Returns true if the task exited as a result.
    pub fn t_complete(
        &mut self,
        env: &mut NetEnv<'_>,
        tx: &mut Transaction,
        child: &Identifier,
        output: &Value,
    ) -> EngineResult<bool> {
        if !self.is_busy() {
            return Err(EngineError::invariant(&self.id, "completion while not busy"));
        }
        if !self.instances.is_executing(child) {
            return Err(EngineError::invariant(&self.id, format!("instance '{}' is not executing", child)));
        }
        if let (Some(validator), Some(decomposition)) = (env.validator, &self.decomposition) {
            validator
                .validate(decomposition, output)
                .map_err(|message| EngineError::Validation {
                    task: self.id.clone(),
                    message,
                })?;
        }

        let task_id = self.id.clone();
        let evaluation = Evaluation::new(env.evaluator, env.policy, &task_id);
        let joining_query = self
            .multi_instance
            .as_ref()
            .and_then(|mi| mi.mi_output.as_ref())
            .map(|o| o.output_query.as_str());

        let mut staged = Vec::new();
        let mut fragments = Vec::new();
        for mapping in &self.completion_mappings {
            let Some(value) = evaluation.extract(&mapping.expression, output)?.value else {
                debug!(task = %task_id, query = %mapping.expression, "completion query selected nothing");
                continue;
            };
            if Some(mapping.expression.as_str()) == joining_query {
                fragments.push(value);
            } else {
                staged.push((mapping.maps_to.clone(), value));
            }
        }

        let savepoint = tx.savepoint();
        let snapshot = (self.instances.clone(), self.staged.clone(), self.aggregation.clone());
        self.staged.extend(staged);
        self.aggregation.extend(fragments);
        self.instances.transition(tx, &task_id, child, InstanceState::Complete);
        debug!(
            task = %task_id,
            instance = %child,
            complete = self.instances.complete(),
            active = self.instances.active(),
            "instance completed"
        );

        if !self.t_is_exit_enabled(&env.view()) {
            return Ok(false);
        }
        if let Err(e) = self.t_exit(env, tx) {
            warn!(task = %task_id, instance = %child, error = %e, "exit failed, instance stays executing");
            (self.instances, self.staged, self.aggregation) = snapshot;
            tx.rollback_to(savepoint);
            return Err(e);
        }
        Ok(true)
    }

    pub fn t_is_exit_enabled(&self, view: &NetView<'_>) -> bool {
        if !self.is_busy() {
            return false;
        }
        let complete = self.instances.complete();
        if complete == 0 {
            return false;
        }
        // Never wait for instances that were not spawned.
        if complete >= self.instances.active() {
            return true;
        }
        let Some(mi) = &self.multi_instance else {
            return false;
        };
        // Runs after the active-count clause above, which can only allow exit sooner.
        if let Some(query) = &mi.threshold {
            let evaluation = Evaluation::new(view.evaluator, view.policy, &self.id);
            match evaluation.count(query, &view.data.as_document()) {
                Ok(threshold) => return complete >= threshold,
                Err(e) => warn!(task = %self.id, error = %e, "threshold unavailable, falling back"),
            }
        }
        if mi.creation_mode == CreationMode::Static {
            if let Some(max) = self.resolved_max {
                return complete >= max;
            }
        }
        false
    }

    /// Exits the task if it is exit-enabled; otherwise does nothing and returns false.
    pub fn t_exit(&mut self, env: &mut NetEnv<'_>, tx: &mut Transaction) -> EngineResult<bool> {
        if !self.t_is_exit_enabled(&env.view()) {
            return Ok(false);
        }
        let Some(identifier) = self.current.clone() else {
            return Ok(false);
        };
        let task_id = self.id.clone();
        let evaluation = Evaluation::new(env.evaluator, env.policy, &task_id);

        let mut assignments: Vec<(String, Value)> =
            self.staged.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        if let Some(out) = self.multi_instance.as_ref().and_then(|mi| mi.mi_output.as_ref()) {
            let items = Value::Array(self.aggregation.clone());
            let value = match &out.aggregate_query {
                Some(query) => evaluation
                    .extract(query, &json!({ "items": items }))?
                    .value
                    .unwrap_or(Value::Null),
                None => items,
            };
            assignments.push((out.result_variable.clone(), value));
        }

        // Route before touching anything so a routing failure leaves the task busy and intact.
        let preview = overlay(&env.data.as_document(), assignments.iter().cloned());
        let targets: Vec<String> = route(&task_id, self.split_type, &self.postset, &evaluation, &preview)?
            .into_iter()
            .map(|f| f.target.clone())
            .collect();
        if let Some(missing) = targets.iter().find(|t| env.view().condition(t).is_none()) {
            return Err(EngineError::ElementNotFound(missing.clone()));
        }

        for (name, value) in assignments {
            env.data.set_var(tx, &name, value);
        }
        if let Some(timer) = &mut self.timer {
            timer.close(tx, &task_id);
        }
        let cancelled = self.instances.cancel_unfinished(tx, &task_id);
        for element in &self.cancellation_set {
            if *element == task_id {
                continue;
            }
            match env.elements.get_mut(element) {
                Some(target) => target.cancel(tx, env.identifiers),
                None => warn!(task = %task_id, element = %element, "cancellation target not in net"),
            }
        }
        env.identifiers.remove_location(tx, &identifier, &task_id);
        self.reset_transient();

        for target in &targets {
            if let Some(condition) = env.condition_mut(target) {
                condition.add(tx, identifier.clone());
            }
            env.identifiers.add_location(tx, &identifier, target);
        }
        self.current = None;
        tx.record(WriteIntent::TaskReleased { task: task_id.clone() });

        info!(
            task = %task_id,
            identifier = %identifier,
            fired = ?targets,
            cancelled_instances = cancelled,
            "task exited"
        );
        Ok(true)
    }

    // --- Helpers ---

    fn reset_transient(&mut self) {
        self.instances.clear();
        self.staged.clear();
        self.aggregation.clear();
        self.enablement_data = Value::Null;
        self.resolved_max = None;
    }

    fn evaluate_mappings(&self, evaluation: &Evaluation<'_>, mappings: &[Mapping], context: &Value) -> EngineResult<Value> {
        let mut doc = Map::new();
        for mapping in mappings {
            if let Some(value) = evaluation.extract(&mapping.expression, context)?.value {
                doc.insert(mapping.maps_to.clone(), value);
            }
        }
        Ok(Value::Object(doc))
    }

    /// Per-instance input slices (`None` when the task has no MI input) and the
    /// resolved maximum. Fails before anything is mutated.
    fn instance_slices(&self, evaluation: &Evaluation<'_>, case_doc: &Value) -> EngineResult<(Vec<Option<Value>>, Option<usize>)> {
        let Some(mi) = &self.multi_instance else {
            return Ok((vec![None], Some(1)));
        };
        let min = evaluation.count(&mi.minimum, case_doc)?;
        let max = mi
            .maximum
            .as_ref()
            .map(|q| evaluation.count(q, case_doc))
            .transpose()?;

        let slices: Vec<Option<Value>> = match &mi.mi_input {
            Some(input) => {
                let source = evaluation
                    .extract(&input.expression, case_doc)?
                    .value
                    .unwrap_or(Value::Null);
                let split_ctx = overlay(case_doc, [(input.formal_input_param.clone(), source)]);
                evaluation
                    .list(&input.splitting_expression, &split_ctx)?
                    .value
                    .into_iter()
                    .map(Some)
                    .collect()
            }
            None => vec![None; min],
        };

        // A firing without instances could never exit.
        let floor = min.max(1);
        let observed = slices.len();
        if observed < floor {
            return Err(EngineError::InstanceBounds {
                task: self.id.clone(),
                bound: Bound::Minimum,
                limit: floor,
                observed,
            });
        }
        if let Some(max) = max {
            if observed > max {
                return Err(EngineError::InstanceBounds {
                    task: self.id.clone(),
                    bound: Bound::Maximum,
                    limit: max,
                    observed,
                });
            }
        }
        Ok((slices, max))
    }

    fn prepare_input(
        &self,
        evaluation: &Evaluation<'_>,
        case_doc: &Value,
        child: &Identifier,
        slice: Option<Value>,
    ) -> EngineResult<Value> {
        let doc = self.bind_input(evaluation, case_doc, child, slice)?;
        self.check_input(child, doc)
    }

    /// Applies the starting mappings, then the MI slice under its formal parameter.
    fn bind_input(
        &self,
        evaluation: &Evaluation<'_>,
        case_doc: &Value,
        child: &Identifier,
        slice: Option<Value>,
    ) -> EngineResult<Map<String, Value>> {
        let mi_param = self
            .multi_instance
            .as_ref()
            .and_then(|mi| mi.mi_input.as_ref())
            .map(|input| input.formal_input_param.as_str());

        let mut doc = Map::new();
        for mapping in &self.starting_mappings {
            if slice.is_some() && Some(mapping.maps_to.as_str()) == mi_param {
                continue;
            }
            let extracted = evaluation
                .extract(&mapping.expression, case_doc)
                .map_err(|e| self.binding_error(child, e.to_string()))?;
            if let Some(value) = extracted.value {
                doc.insert(mapping.maps_to.clone(), value);
            }
        }
        if let (Some(param), Some(slice)) = (mi_param, slice) {
            doc.insert(param.to_string(), slice);
        }
        Ok(doc)
    }

    /// Checks a bound input against the decomposition's input parameters.
    fn check_input(&self, child: &Identifier, doc: Map<String, Value>) -> EngineResult<Value> {
        if let Some(decomposition) = &self.decomposition {
            for param in &decomposition.input_params {
                match doc.get(&param.name) {
                    Some(value) if !param.accepts(value) => {
                        return Err(self.binding_error(
                            child,
                            format!("input parameter '{}' expects {}, got {}", param.name, param.data_type, value),
                        ));
                    }
                    None if !param.optional => {
                        return Err(self.binding_error(
                            child,
                            format!("required input parameter '{}' could not be bound", param.name),
                        ));
                    }
                    _ => {}
                }
            }
        }
        Ok(Value::Object(doc))
    }

    fn binding_error(&self, child: &Identifier, message: String) -> EngineError {
        EngineError::DataBinding {
            task: self.id.clone(),
            instance: child.to_string(),
            message,
        }
    }
}

impl Cancellable for Task {
    fn cancel(&mut self, tx: &mut Transaction, identifiers: &mut IdentifierRegistry) {
        let Some(identifier) = self.current.take() else {
            return;
        };
        let cancelled = self.instances.cancel_unfinished(tx, &self.id);
        identifiers.remove_location(tx, &identifier, &self.id);
        if let Some(timer) = &mut self.timer {
            timer.close(tx, &self.id);
        }
        self.reset_transient();
        tx.record(WriteIntent::TaskReleased { task: self.id.clone() });
        info!(task = %self.id, identifier = %identifier, cancelled_instances = cancelled, "task cancelled");
    }
}
