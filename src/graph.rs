//! Step-sequencing controller
//!
//! Executes a fixed directed acyclic graph of named steps exactly once each,
//! respecting dependency order, and produces the final [`SharedState`].
//! Steps whose predecessors have all completed run concurrently as a wave of
//! tokio tasks; each step sees a snapshot of the state and its result is
//! merged before dependents become eligible.
//!
//! Failure policy is eager abort: the first step failure aborts the whole
//! run, in-flight siblings are cancelled, and nothing downstream executes.

use crate::error::PipelineError;
use crate::models::{SharedState, StepResult};
use crate::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// One named unit of work: consumes a state snapshot, produces a partial update.
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(&self, state: &SharedState) -> Result<StepResult>;
}

/// A step plus its position in the graph.
pub struct StepDefinition {
    pub name: String,
    pub depends_on: Vec<String>,
    pub step: Arc<dyn Step>,
}

impl StepDefinition {
    pub fn new(
        name: impl Into<String>,
        depends_on: &[&str],
        step: Arc<dyn Step>,
    ) -> Self {
        Self {
            name: name.into(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            step,
        }
    }
}

/// Builder that collects step definitions before validation.
#[derive(Default)]
pub struct GraphBuilder {
    steps: Vec<StepDefinition>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step to the graph. Dependency names are validated at build time.
    pub fn register(&mut self, definition: StepDefinition) -> Result<()> {
        if self.steps.iter().any(|s| s.name == definition.name) {
            return Err(PipelineError::DuplicateStep(definition.name));
        }
        self.steps.push(definition);
        Ok(())
    }

    /// Validate the graph: every dependency known, no cycles, every step
    /// reachable from the single start step (the first-registered step with
    /// no predecessors).
    pub fn build(self) -> Result<StepGraph> {
        let names: HashSet<&str> = self.steps.iter().map(|s| s.name.as_str()).collect();

        for step in &self.steps {
            for dep in &step.depends_on {
                if !names.contains(dep.as_str()) {
                    return Err(PipelineError::UnknownDependency {
                        step: step.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        // Kahn's algorithm: anything left over sits on a cycle.
        let mut indegree: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.name.as_str(), s.depends_on.len()))
            .collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in &self.steps {
            for dep in &step.depends_on {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(step.name.as_str());
            }
        }

        let mut queue: VecDeque<&str> = self
            .steps
            .iter()
            .filter(|s| s.depends_on.is_empty())
            .map(|s| s.name.as_str())
            .collect();
        let mut visited = 0usize;
        while let Some(name) = queue.pop_front() {
            visited += 1;
            for &dependent in dependents.get(name).into_iter().flatten() {
                let entry = indegree.get_mut(dependent).ok_or_else(|| {
                    PipelineError::Internal(format!("unknown dependent '{}'", dependent))
                })?;
                *entry -= 1;
                if *entry == 0 {
                    queue.push_back(dependent);
                }
            }
        }
        if visited < self.steps.len() {
            let cyclic: Vec<&str> = self
                .steps
                .iter()
                .map(|s| s.name.as_str())
                .filter(|name| indegree.get(name).copied().unwrap_or(0) > 0)
                .collect();
            return Err(PipelineError::CycleDetected(cyclic.join(", ")));
        }

        // Reachability from the single start step.
        let start = self
            .steps
            .iter()
            .find(|s| s.depends_on.is_empty())
            .map(|s| s.name.clone())
            .ok_or_else(|| {
                PipelineError::Internal("graph has no start step".to_string())
            })?;

        let mut reachable: HashSet<&str> = HashSet::new();
        let mut frontier: VecDeque<&str> = VecDeque::new();
        reachable.insert(start.as_str());
        frontier.push_back(start.as_str());
        while let Some(name) = frontier.pop_front() {
            for &dependent in dependents.get(name).into_iter().flatten() {
                // Eligible only once every predecessor is reachable.
                let definition = self
                    .steps
                    .iter()
                    .find(|s| s.name == dependent)
                    .expect("dependent name comes from registered steps");
                let all_deps_reachable = definition
                    .depends_on
                    .iter()
                    .all(|d| reachable.contains(d.as_str()));
                if all_deps_reachable && reachable.insert(dependent) {
                    frontier.push_back(dependent);
                }
            }
        }

        if let Some(orphan) = self
            .steps
            .iter()
            .find(|s| !reachable.contains(s.name.as_str()))
        {
            return Err(PipelineError::UnreachableStep(orphan.name.clone()));
        }

        Ok(StepGraph {
            steps: self.steps,
            start,
        })
    }
}

/// A validated, runnable step graph.
pub struct StepGraph {
    steps: Vec<StepDefinition>,
    start: String,
}

impl std::fmt::Debug for StepGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepGraph")
            .field(
                "steps",
                &self.steps.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            )
            .field("start", &self.start)
            .finish()
    }
}

impl StepGraph {
    pub fn start_step(&self) -> &str {
        &self.start
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Render the graph as a Mermaid `graph TD` diagram.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD");
        for step in &self.steps {
            if step.depends_on.is_empty() {
                out.push_str(&format!("\n    {}", step.name));
            }
            for dep in &step.depends_on {
                out.push_str(&format!("\n    {} --> {}", dep, step.name));
            }
        }
        out
    }

    /// Execute every step exactly once in dependency order and return the
    /// accumulated state.
    pub async fn run(&self, initial: SharedState) -> Result<SharedState> {
        let mut state = initial;
        let mut completed: HashSet<String> = HashSet::new();

        debug!(steps = self.steps.len(), start = %self.start, "Starting graph run");

        while completed.len() < self.steps.len() {
            let ready: Vec<&StepDefinition> = self
                .steps
                .iter()
                .filter(|s| !completed.contains(&s.name))
                .filter(|s| s.depends_on.iter().all(|d| completed.contains(d)))
                .collect();

            if ready.is_empty() {
                // build() guarantees progress; reaching this is a logic bug.
                return Err(PipelineError::Internal(
                    "no eligible step but graph is incomplete".to_string(),
                ));
            }

            debug!(
                wave = ?ready.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
                "Dispatching eligible steps"
            );

            let mut wave: JoinSet<(String, Result<StepResult>)> = JoinSet::new();
            for definition in ready {
                let name = definition.name.clone();
                let step = Arc::clone(&definition.step);
                let snapshot = state.clone();
                wave.spawn(async move {
                    let result = step.run(&snapshot).await;
                    (name, result)
                });
            }

            while let Some(joined) = wave.join_next().await {
                let (name, result) = joined.map_err(|e| {
                    PipelineError::Internal(format!("step task failed to join: {}", e))
                })?;

                match result {
                    Ok(update) => {
                        state
                            .merge(update)
                            .map_err(|e| PipelineError::in_step(name.clone(), e))?;
                        debug!(step = %name, "Step completed");
                        completed.insert(name);
                    }
                    Err(e) => {
                        warn!(step = %name, error = %e, "Step failed, aborting run");
                        wave.abort_all();
                        return Err(PipelineError::in_step(name, e));
                    }
                }
            }
        }

        debug!("Graph run complete");
        Ok(state)
    }
}
