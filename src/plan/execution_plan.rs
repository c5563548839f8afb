//! The execution plan: a dependency DAG of atomic tasks.

use crate::domain::{AtomicTask, TaskType};
use crate::error::{KnowledgeError, Result};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Derived plan figures, computed on first use after the last insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanStats {
    pub total_tasks: usize,
    pub by_type: BTreeMap<TaskType, usize>,
    #[serde(serialize_with = "serialize_secs")]
    pub total_duration: Duration,
    pub expensive_tasks: usize,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    tasks: Vec<AtomicTask>,
    index: HashMap<String, usize>,
    stats: OnceCell<PlanStats>,
    levels: OnceCell<HashMap<String, usize>>,
}

impl ExecutionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task. Ids must be unique within the plan.
    pub fn add_task(&mut self, task: AtomicTask) -> Result<()> {
        if self.index.contains_key(task.id()) {
            return Err(KnowledgeError::InvalidPlan(vec![format!("duplicate task id '{}'", task.id())]));
        }
        self.index.insert(task.id().to_string(), self.tasks.len());
        self.tasks.push(task);
        self.stats = OnceCell::new();
        self.levels = OnceCell::new();
        Ok(())
    }

    pub fn tasks(&self) -> &[AtomicTask] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&AtomicTask> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn stats(&self) -> &PlanStats {
        self.stats.get_or_init(|| {
            let mut stats = PlanStats { total_tasks: self.tasks.len(), ..PlanStats::default() };
            for task in &self.tasks {
                *stats.by_type.entry(task.task_type()).or_insert(0) += 1;
                stats.total_duration += task.estimated_duration();
                if task.is_expensive() {
                    stats.expensive_tasks += 1;
                }
            }
            stats
        })
    }

    pub fn expensive_task_count(&self) -> usize {
        self.stats().expensive_tasks
    }

    /// Every dependency problem in the plan: references to unknown task ids
    /// and dependency cycles. Empty means the plan can be executed.
    pub fn validate_dependencies(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for task in &self.tasks {
            for dep in task.dependencies() {
                if !self.index.contains_key(dep) {
                    errors.push(format!("task '{}' depends on unknown task '{}'", task.id(), dep));
                }
            }
        }
        errors.extend(self.find_cycles());
        errors
    }

    pub fn is_valid(&self) -> bool {
        self.validate_dependencies().is_empty()
    }

    /// Depth-first search over dependency edges, reporting each back edge as a cycle.
    fn find_cycles(&self) -> Vec<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.tasks.len()];
        let mut cycles = Vec::new();

        for start in 0..self.tasks.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            // (task index, next dependency to look at)
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::InProgress;

            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let deps = self.tasks[node].dependencies();
                if top.1 >= deps.len() {
                    marks[node] = Mark::Done;
                    stack.pop();
                    continue;
                }
                let dep_id = &deps[top.1];
                top.1 += 1;
                let Some(&dep) = self.index.get(dep_id) else {
                    continue;
                };
                match marks[dep] {
                    Mark::Unvisited => {
                        marks[dep] = Mark::InProgress;
                        stack.push((dep, 0));
                    }
                    Mark::InProgress => {
                        let from = stack.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                        let mut path: Vec<&str> =
                            stack[from..].iter().map(|&(n, _)| self.tasks[n].id()).collect();
                        path.push(self.tasks[dep].id());
                        cycles.push(format!("dependency cycle: {}", path.join(" -> ")));
                    }
                    Mark::Done => {}
                }
            }
        }
        cycles
    }

    /// Dependency level per task id. Tasks caught in a cycle or depending on
    /// an unknown task never resolve and are left out.
    pub fn dependency_levels(&self) -> &HashMap<String, usize> {
        self.levels.get_or_init(|| {
            let mut levels: HashMap<String, usize> = HashMap::with_capacity(self.tasks.len());
            loop {
                let mut progressed = false;
                for task in &self.tasks {
                    if levels.contains_key(task.id()) {
                        continue;
                    }
                    let dep_levels: Option<Vec<usize>> =
                        task.dependencies().iter().map(|d| levels.get(d).copied()).collect();
                    if let Some(dep_levels) = dep_levels {
                        let level = dep_levels.into_iter().max().map_or(0, |m| m + 1);
                        levels.insert(task.id().to_string(), level);
                        progressed = true;
                    }
                }
                if !progressed {
                    break;
                }
            }
            levels
        })
    }

    pub fn level_of(&self, task_id: &str) -> Option<usize> {
        self.dependency_levels().get(task_id).copied()
    }

    fn ensure_valid(&self) -> Result<()> {
        let errors = self.validate_dependencies();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(KnowledgeError::InvalidPlan(errors))
        }
    }

    fn sort_key(&self, idx: usize) -> (usize, i32, usize) {
        let task = &self.tasks[idx];
        (self.level_of(task.id()).unwrap_or(usize::MAX), -task.priority(), idx)
    }

    /// All tasks in a dependency-respecting order: by level, then higher
    /// priority first, then insertion order.
    pub fn get_execution_order(&self) -> Result<Vec<&AtomicTask>> {
        self.ensure_valid()?;
        let mut order: Vec<usize> = (0..self.tasks.len()).collect();
        order.sort_by_key(|&i| self.sort_key(i));
        Ok(order.into_iter().map(|i| &self.tasks[i]).collect())
    }

    /// Tasks partitioned by dependency level; each group may run concurrently.
    pub fn get_parallel_execution_groups(&self) -> Result<Vec<Vec<&AtomicTask>>> {
        let mut groups: Vec<Vec<&AtomicTask>> = Vec::new();
        for task in self.get_execution_order()? {
            let level = self.level_of(task.id()).unwrap_or(0);
            if groups.len() <= level {
                groups.resize_with(level + 1, Vec::new);
            }
            groups[level].push(task);
        }
        Ok(groups)
    }
}
