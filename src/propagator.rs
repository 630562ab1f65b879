//! Change propagation: debounce, schedule and re-evaluate the affected subgraph
//!
//! The propagator is an explicit four-state machine driven by the host:
//!
//! - `on_change` records a raw value and, if the field feeds any expression,
//!   moves to (or stays in) `Pending` with a deadline of `now + window`.
//! - `poll(now)` runs the pass once the deadline has passed; `fire_timer` runs it
//!   unconditionally, standing in for the host's timer callback.
//! - A pass is `Evaluating` until every scheduled field has been delivered, then
//!   `Settled`, then `Idle` (or `Pending` again if changes were queued meanwhile).
//!
//! Time is a plain millisecond counter so tests never sleep.

use crate::diagnostics::Diagnostic;
use crate::error::EvalError;
use crate::form::Form;
use crate::scheduler::schedule;
use crate::template::interpolate;
use crate::types::{EvaluationResult, FieldSnapshot, Millis, Value, ValueChange, ValueContext};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PropagatorState {
    Idle,
    Pending,
    Evaluating,
    Settled,
}

/// Consumer of the computed-value stream (the UI layer).
pub trait ComputedValueSink {
    /// Called once per settled field, in schedule order, while the pass is running.
    fn deliver(&mut self, result: &EvaluationResult);

    /// Programmatic value changes the consumer produced while handling results.
    /// They are queued and start a fresh pending phase once the pass settles.
    fn take_changes(&mut self) -> Vec<ValueChange> {
        Vec::new()
    }
}

impl ComputedValueSink for Vec<EvaluationResult> {
    fn deliver(&mut self, result: &EvaluationResult) {
        self.push(result.clone());
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F: FnMut(&EvaluationResult)> ComputedValueSink for FnSink<F> {
    fn deliver(&mut self, result: &EvaluationResult) {
        (self.0)(result)
    }
}

/// Sink that drops every result; the `PassReport` still carries them.
pub struct NullSink;

impl ComputedValueSink for NullSink {
    fn deliver(&mut self, _result: &EvaluationResult) {}
}

/// Everything one propagation pass produced.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub started_at: Millis,
    /// Fields whose changes triggered the pass
    pub changed: Vec<String>,
    /// Results in delivery order
    pub results: Vec<EvaluationResult>,
    /// Fresh map of the values displayed after this pass, for the fields it touched
    pub values: BTreeMap<String, Value>,
    pub cycles: Vec<Vec<String>>,
    pub diagnostics: Vec<Diagnostic>,
}

impl PassReport {
    pub fn result(&self, field_id: &str) -> Option<&EvaluationResult> {
        self.results.iter().find(|r| r.field_id == field_id)
    }

    pub fn evaluated(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.field_id.as_str()).collect()
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct PropagationStats {
    pub changes_received: usize,
    pub changes_ignored: usize,
    pub passes: usize,
    pub fields_evaluated: usize,
    pub evaluation_errors: usize,
}

pub struct Propagator {
    form: Rc<Form>,
    state: PropagatorState,
    /// Latest displayed value of every field, raw or computed
    values: HashMap<String, FieldSnapshot>,
    last_good: HashMap<String, Value>,
    pending: BTreeSet<String>,
    deadline: Option<Millis>,
    queued: Vec<ValueChange>,
    stats: PropagationStats,
}

impl Propagator {
    pub fn new(form: Rc<Form>) -> Self {
        let values = initial_values(&form, &HashMap::new());
        Self {
            form,
            state: PropagatorState::Idle,
            values,
            last_good: HashMap::new(),
            pending: BTreeSet::new(),
            deadline: None,
            queued: Vec::new(),
            stats: PropagationStats::default(),
        }
    }

    pub fn form(&self) -> &Rc<Form> {
        &self.form
    }

    pub fn state(&self) -> PropagatorState {
        self.state
    }

    /// When the pending pass becomes due, if one is pending.
    pub fn deadline(&self) -> Option<Millis> {
        self.deadline
    }

    pub fn stats(&self) -> &PropagationStats {
        &self.stats
    }

    pub fn value(&self, field_id: &str) -> Option<&Value> {
        self.values.get(field_id).map(|s| &s.value)
    }

    /// Current values of every field as a fresh context.
    pub fn snapshot(&self) -> ValueContext {
        let mut context = ValueContext::new();
        for (id, snapshot) in &self.values {
            context.insert(id.clone(), snapshot.clone());
        }
        context
    }

    /// Interpolate an ad-hoc template against the current values.
    pub fn render(&self, template: &str) -> String {
        interpolate(template, &self.snapshot())
    }

    /// Evaluate every expression field in schedule order, ignoring `evaluateOnChange`.
    /// Used once after load and after every reload.
    pub fn evaluate_all(&mut self, now: Millis, sink: &mut dyn ComputedValueSink) -> PassReport {
        self.pending.clear();
        self.deadline = None;
        let all: BTreeSet<usize> = (0..self.form.graph().len()).collect();
        self.run_pass(all, Vec::new(), now, true, sink)
    }

    /// Record a raw value change. Returns the state after the change.
    pub fn on_change(&mut self, change: ValueChange, now: Millis) -> PropagatorState {
        self.stats.changes_received += 1;

        if self.state == PropagatorState::Evaluating {
            self.queued.push(change);
            return self.state;
        }

        let form = Rc::clone(&self.form);
        let Some(descriptor) = form.field(&change.field_id) else {
            log::warn!("Ignoring change to unknown field '{}'", change.field_id);
            self.stats.changes_ignored += 1;
            return self.state;
        };

        let snapshot = self
            .values
            .entry(change.field_id.clone())
            .or_insert_with(|| FieldSnapshot { value: Value::Null, valid: true, required: descriptor.required });
        snapshot.value = change.new_value;
        snapshot.valid = change.valid;

        let reevaluates_itself = descriptor
            .expression
            .as_ref()
            .map_or(false, |spec| spec.evaluate_on_change);
        if !form.graph().has_dependents(&change.field_id) && !reevaluates_itself {
            log::trace!("Field '{}' has no dependents, no pass scheduled", change.field_id);
            self.stats.changes_ignored += 1;
            return self.state;
        }

        self.pending.insert(change.field_id);
        let window = self.pending_window();
        self.deadline = Some(now + window);
        self.state = PropagatorState::Pending;
        log::trace!(
            "Pending pass for {:?}, window {}ms, due at {}",
            self.pending,
            window,
            now + window
        );
        self.state
    }

    /// Run the pending pass if its debounce window has elapsed.
    pub fn poll(&mut self, now: Millis, sink: &mut dyn ComputedValueSink) -> Option<PassReport> {
        match (self.state, self.deadline) {
            (PropagatorState::Pending, Some(deadline)) if now >= deadline => Some(self.start_pending(now, sink)),
            _ => None,
        }
    }

    /// The debounce timer fired: run the pending pass now.
    pub fn fire_timer(&mut self, sink: &mut dyn ComputedValueSink) -> Option<PassReport> {
        if self.state != PropagatorState::Pending {
            return None;
        }
        let now = self.deadline.unwrap_or_default();
        Some(self.start_pending(now, sink))
    }

    /// Swap in a freshly loaded form. Pending and queued work is discarded, raw values
    /// of input fields that still exist are kept, and everything is re-evaluated.
    /// Last good values carry over only for fields whose expression is unchanged.
    pub fn reload(&mut self, form: Rc<Form>, now: Millis, sink: &mut dyn ComputedValueSink) -> PassReport {
        log::debug!("Reloading form, discarding {} pending change(s)", self.pending.len() + self.queued.len());
        self.state = PropagatorState::Idle;
        self.pending.clear();
        self.queued.clear();
        self.deadline = None;

        self.values = initial_values(&form, &self.values);
        let previous = Rc::clone(&self.form);
        self.last_good.retain(|id, _| match (previous.expression(id), form.expression(id)) {
            (Some(old), Some(new)) => old == new,
            _ => false,
        });
        self.form = form;

        self.evaluate_all(now, sink)
    }

    /// Largest debounce among the expression fields the pending changes reach.
    fn pending_window(&self) -> u64 {
        let graph = self.form.graph();
        graph
            .affected_by(self.pending.iter().map(String::as_str))
            .into_iter()
            .map(|i| graph.id(i))
            .filter(|id| self.form.expression(id).map_or(false, |spec| spec.evaluate_on_change))
            .map(|id| self.form.debounce_ms(id))
            .max()
            .unwrap_or(0)
    }

    fn start_pending(&mut self, now: Millis, sink: &mut dyn ComputedValueSink) -> PassReport {
        let changed: Vec<String> = std::mem::take(&mut self.pending).into_iter().collect();
        self.deadline = None;
        let affected = self
            .form
            .graph()
            .affected_by(changed.iter().map(String::as_str));
        self.run_pass(affected, changed, now, false, sink)
    }

    fn run_pass(
        &mut self,
        affected: BTreeSet<usize>,
        changed: Vec<String>,
        now: Millis,
        initial: bool,
        sink: &mut dyn ComputedValueSink,
    ) -> PassReport {
        self.state = PropagatorState::Evaluating;
        let form = Rc::clone(&self.form);
        let graph = form.graph();
        let plan = schedule(graph, &affected);
        log::debug!(
            "Pass started at {}: {} field(s) affected by {:?}",
            now,
            plan.steps.len(),
            changed
        );

        let mut context = self.pass_context(&affected);
        let mut report = PassReport {
            started_at: now,
            changed,
            results: Vec::new(),
            values: BTreeMap::new(),
            cycles: plan.cycles.clone(),
            diagnostics: Vec::new(),
        };

        for step in &plan.steps {
            let field_id = step.field_id.as_str();
            let Some(spec) = form.expression(field_id) else {
                continue;
            };
            if !initial && !spec.evaluate_on_change {
                log::trace!("Skipping '{}' (evaluateOnChange is off)", field_id);
                continue;
            }

            let outcome = if let Some(err) = form.blocked(field_id) {
                Err(err.clone())
            } else if let Some(cycle) = step.cycle {
                Err(EvalError::CycleParticipant { members: plan.cycles[cycle].clone() })
            } else {
                match form.compiled(field_id) {
                    Some(compiled) => compiled.evaluate(&context, form.options().strict_visibility),
                    None => Err(EvalError::Schema { message: "expression was not compiled".to_string() }),
                }
            };

            let (value, error) = match outcome {
                Ok(value) => {
                    self.last_good.insert(field_id.to_string(), value.clone());
                    (value, None)
                }
                Err(err) => {
                    let fallback = self
                        .last_good
                        .get(field_id)
                        .cloned()
                        .unwrap_or_else(|| form.default_value(field_id));
                    log::debug!("Field '{}' failed ({}), showing fallback '{}'", field_id, err, fallback);
                    report.diagnostics.push(Diagnostic::evaluation(field_id, &err));
                    self.stats.evaluation_errors += 1;
                    (fallback, Some(err))
                }
            };
            if form.options().debug_mode {
                log::debug!("Field '{}' = {}", field_id, value);
            } else {
                log::trace!("Field '{}' = {}", field_id, value);
            }

            context.set_value(field_id, value.clone());
            let result = EvaluationResult {
                field_id: field_id.to_string(),
                value: value.clone(),
                error,
                timestamp: now,
            };
            sink.deliver(&result);
            self.queued.extend(sink.take_changes());

            report.values.insert(field_id.to_string(), value);
            report.results.push(result);
            self.stats.fields_evaluated += 1;
        }

        for (field_id, value) in &report.values {
            if let Some(snapshot) = self.values.get_mut(field_id) {
                snapshot.value = value.clone();
            }
        }

        self.state = PropagatorState::Settled;
        self.stats.passes += 1;
        log::debug!("Pass settled: {} result(s)", report.results.len());

        self.state = PropagatorState::Idle;
        for change in std::mem::take(&mut self.queued) {
            self.on_change(change, now);
        }

        report
    }

    /// Snapshot of the affected fields and everything they read.
    fn pass_context(&self, affected: &BTreeSet<usize>) -> ValueContext {
        let graph = self.form.graph();
        let mut context = ValueContext::new();
        let mut include = |index: usize| {
            let id = graph.id(index);
            if !context.contains(id) {
                if let Some(snapshot) = self.values.get(id) {
                    context.insert(id.to_string(), snapshot.clone());
                }
            }
        };

        for &node in affected {
            include(node);
            for &dependency in graph.dependency_indices(node) {
                include(dependency);
            }
        }
        context
    }
}

fn initial_values(form: &Form, previous: &HashMap<String, FieldSnapshot>) -> HashMap<String, FieldSnapshot> {
    form.fields()
        .iter()
        .map(|field| {
            let carried = previous
                .get(&field.id)
                .filter(|_| !field.is_derived())
                .map(|s| (s.value.clone(), s.valid));
            let (value, valid) = carried.unwrap_or_else(|| {
                let value = if field.is_derived() {
                    form.default_value(&field.id)
                } else {
                    field.initial_value.clone().unwrap_or_default()
                };
                (value, true)
            });
            let snapshot = FieldSnapshot { value, valid, required: field.required };
            (field.id.clone(), snapshot)
        })
        .collect()
}
