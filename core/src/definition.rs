//! Definition parsing and DAG validation
//!
//! Consumes a workflow document (YAML or JSON surface syntax, normalized to a
//! `serde_json::Value` tree) and produces a validated `Workflow` with every
//! model invariant established: unique task ids, resolvable dependencies, an
//! acyclic graph, and a sane retry policy. Parsing is pure.
//!
//! The graph is small and bespoke, so topological order is Kahn's algorithm
//! and cycle reporting is an explicit depth-first walk that returns the
//! back-edge path.

use crate::error::ValidationError;
use crate::model::{DataClassification, Task, Workflow};
use crate::retry::RetryPolicy;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Parse a YAML or JSON workflow definition.
///
/// YAML is tried first, JSON second, matching the submission surface.
pub fn parse_str(definition: &str) -> Result<Workflow, ValidationError> {
    let value: Value = serde_yaml::from_str(definition)
        .ok()
        .or_else(|| serde_json::from_str(definition).ok())
        .ok_or_else(|| {
            ValidationError::InvalidDocument("definition is neither valid YAML nor JSON".to_string())
        })?;
    parse_value(&value)
}

/// Parse a normalized definition tree into a validated `Workflow`.
pub fn parse_value(value: &Value) -> Result<Workflow, ValidationError> {
    let doc = value.as_object().ok_or_else(|| {
        ValidationError::InvalidDocument("definition must be a mapping".to_string())
    })?;

    let workflow_id = doc
        .get("workflow_id")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::MissingField("workflow_id".to_string()))?;

    let task_values = doc
        .get("tasks")
        .and_then(Value::as_array)
        .ok_or_else(|| ValidationError::MissingField("tasks".to_string()))?;
    if task_values.is_empty() {
        return Err(ValidationError::EmptyTasks);
    }

    let retry_policy = match doc.get("retry_policy") {
        Some(v) => serde_json::from_value::<RetryPolicy>(v.clone()).map_err(|e| {
            ValidationError::InvalidRetryPolicy(e.to_string())
        })?,
        None => RetryPolicy::default(),
    };
    retry_policy.validate()?;

    let mut workflow = Workflow::new(workflow_id);
    workflow.retry_policy = retry_policy;

    for (index, task_value) in task_values.iter().enumerate() {
        let task = parse_task(index, task_value)?;
        if workflow.tasks.contains_key(&task.task_id) {
            return Err(ValidationError::DuplicateTaskId(task.task_id));
        }
        workflow.tasks.insert(task.task_id.clone(), task);
    }

    if let Some(handlers) = doc.get("compensation_handlers") {
        let handlers = handlers.as_object().ok_or_else(|| {
            ValidationError::InvalidDocument("compensation_handlers must be a mapping".to_string())
        })?;
        for (task_id, handler) in handlers {
            let handler = handler.as_str().ok_or_else(|| {
                ValidationError::InvalidDocument(format!(
                    "compensation handler for '{task_id}' must be a string"
                ))
            })?;
            if !workflow.tasks.contains_key(task_id) {
                return Err(ValidationError::InvalidDocument(format!(
                    "compensation handler references unknown task '{task_id}'"
                )));
            }
            workflow
                .compensation_handlers
                .insert(task_id.clone(), handler.to_string());
        }
    }

    // Establishes the dependency and acyclicity invariants.
    TaskGraph::build(&workflow)?;

    Ok(workflow)
}

fn parse_task(index: usize, value: &Value) -> Result<Task, ValidationError> {
    let obj = value.as_object().ok_or_else(|| {
        ValidationError::InvalidDocument(format!("tasks[{index}] must be a mapping"))
    })?;

    let task_id = obj
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::MissingField(format!("tasks[{index}].id")))?;
    let task_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::MissingField(format!("tasks[{index}].type")))?;

    let mut task = Task::new(task_id, task_type);

    if let Some(deps) = obj.get("depends_on") {
        let deps = deps.as_array().ok_or_else(|| {
            ValidationError::InvalidDocument(format!("tasks[{index}].depends_on must be a sequence"))
        })?;
        for dep in deps {
            let dep = dep.as_str().ok_or_else(|| {
                ValidationError::InvalidDocument(format!(
                    "tasks[{index}].depends_on entries must be strings"
                ))
            })?;
            task.depends_on.push(dep.to_string());
        }
    }

    if let Some(classification) = obj.get("data_classification") {
        let raw = classification.as_str().unwrap_or("");
        task.data_classification = DataClassification::parse(raw).ok_or_else(|| {
            ValidationError::InvalidDocument(format!(
                "tasks[{index}].data_classification '{raw}' is not one of public, pii, phi"
            ))
        })?;
    }

    if let Some(config) = obj.get("config") {
        task.config = config
            .as_object()
            .cloned()
            .ok_or_else(|| {
                ValidationError::InvalidDocument(format!("tasks[{index}].config must be a mapping"))
            })?;
    }

    if let Some(timeout) = obj.get("timeout_seconds") {
        task.timeout_seconds = Some(timeout.as_u64().ok_or_else(|| {
            ValidationError::InvalidDocument(format!(
                "tasks[{index}].timeout_seconds must be a non-negative integer"
            ))
        })?);
    }

    Ok(task)
}

/// Dependency graph over a workflow's tasks.
///
/// Built once per workflow run; exposes the deterministic topological order
/// used for dispatch tie-breaking and the reverse order used by the
/// compensation engine.
#[derive(Clone, Debug)]
pub struct TaskGraph {
    order: Vec<String>,
    children: HashMap<String, Vec<String>>,
}

impl TaskGraph {
    /// Validate dependencies and acyclicity, producing the graph.
    pub fn build(workflow: &Workflow) -> Result<Self, ValidationError> {
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();

        for task in workflow.tasks.values() {
            in_degree.entry(task.task_id.as_str()).or_insert(0);
            for dep in &task.depends_on {
                if !workflow.tasks.contains_key(dep) {
                    return Err(ValidationError::UnknownDependency {
                        task: task.task_id.clone(),
                        dependency: dep.clone(),
                    });
                }
                children
                    .entry(dep.clone())
                    .or_default()
                    .push(task.task_id.clone());
                *in_degree.entry(task.task_id.as_str()).or_insert(0) += 1;
            }
        }
        for siblings in children.values_mut() {
            siblings.sort();
        }

        // Kahn's algorithm over a BTreeMap frontier keeps the order
        // deterministic: ties break by task id.
        let mut frontier: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(workflow.tasks.len());
        let mut remaining = in_degree.clone();

        while let Some(id) = frontier.pop_front() {
            order.push(id.to_string());
            if let Some(next) = children.get(id) {
                for child in next {
                    let degree = remaining
                        .get_mut(child.as_str())
                        .expect("child tasks were registered above");
                    *degree -= 1;
                    if *degree == 0 {
                        // insert preserving id order within the frontier
                        let pos = frontier
                            .iter()
                            .position(|f| *f > child.as_str())
                            .unwrap_or(frontier.len());
                        frontier.insert(pos, child.as_str());
                    }
                }
            }
        }

        if order.len() != workflow.tasks.len() {
            return Err(ValidationError::CycleDetected(find_cycle(workflow)));
        }

        Ok(Self { order, children })
    }

    /// Tasks in dependency order, ties broken by task id.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Reverse topological order, as walked by the compensation engine.
    pub fn reverse_order(&self) -> impl Iterator<Item = &str> {
        self.order.iter().rev().map(String::as_str)
    }

    /// Direct dependents of a task.
    pub fn children(&self, task_id: &str) -> &[String] {
        self.children
            .get(task_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All transitive dependents of a task.
    pub fn descendants(&self, task_id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&str> = self.children(task_id).iter().map(String::as_str).collect();
        while let Some(id) = queue.pop_front() {
            if seen.insert(id.to_string()) {
                queue.extend(self.children(id).iter().map(String::as_str));
            }
        }
        seen
    }
}

/// Depth-first walk reporting the path of the first back edge found.
///
/// Only called once Kahn's algorithm has proven a cycle exists.
fn find_cycle(workflow: &Workflow) -> Vec<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    fn walk(
        workflow: &Workflow,
        id: &str,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        marks.insert(id.to_string(), Mark::InProgress);
        stack.push(id.to_string());

        if let Some(task) = workflow.tasks.get(id) {
            for dep in &task.depends_on {
                match marks.get(dep.as_str()).copied().unwrap_or(Mark::Unvisited) {
                    Mark::InProgress => {
                        let start = stack
                            .iter()
                            .position(|s| s == dep)
                            .unwrap_or(0);
                        let mut path: Vec<String> = stack[start..].to_vec();
                        path.push(dep.clone());
                        return Some(path);
                    }
                    Mark::Unvisited => {
                        if let Some(path) = walk(workflow, dep, marks, stack) {
                            return Some(path);
                        }
                    }
                    Mark::Done => {}
                }
            }
        }

        stack.pop();
        marks.insert(id.to_string(), Mark::Done);
        None
    }

    let mut marks: HashMap<String, Mark> = HashMap::new();
    let mut stack = Vec::new();
    for id in workflow.tasks.keys() {
        if marks.get(id.as_str()).copied().unwrap_or(Mark::Unvisited) == Mark::Unvisited {
            if let Some(path) = walk(workflow, id, &mut marks, &mut stack) {
                return path;
            }
        }
    }
    Vec::new()
}
