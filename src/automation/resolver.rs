//! Resolution of task names to runnable automations.

use std::sync::Arc;

use tracing::debug;

use super::{Automation, AutomationRegistry, ServicePool};
use crate::core::graph::TaskGraph;
use crate::core::status::Problem;
use crate::core::types::TaskId;

/// Result of resolving one task.
pub enum Resolution {
    /// An automation whose inputs are all available.
    Found(ResolvedAutomation),
    /// No automation is registered for the task.
    NotAutomated,
    /// An automation exists but an input is missing. Carries a WARN problem.
    Unresolvable(Problem),
}

/// An automation ready to run.
#[derive(Clone)]
pub struct ResolvedAutomation {
    automation: Arc<dyn Automation>,
    services: Arc<ServicePool>,
}

impl ResolvedAutomation {
    pub fn automation(&self) -> &Arc<dyn Automation> {
        &self.automation
    }

    pub fn services(&self) -> &Arc<ServicePool> {
        &self.services
    }
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resolution::Found(r) => f
                .debug_tuple("Found")
                .field(&r.automation.task_name())
                .finish(),
            Resolution::NotAutomated => f.write_str("NotAutomated"),
            Resolution::Unresolvable(p) => f.debug_tuple("Unresolvable").field(p).finish(),
        }
    }
}

/// Maps task names to automations and checks their inputs.
#[derive(Debug, Clone)]
pub struct AutomationResolver {
    registry: AutomationRegistry,
    services: Arc<ServicePool>,
}

impl AutomationResolver {
    pub fn new(registry: AutomationRegistry, services: Arc<ServicePool>) -> Self {
        Self { registry, services }
    }

    /// A resolver with no automations: every task is manual.
    pub fn manual_only() -> Self {
        Self::new(AutomationRegistry::new(), Arc::new(ServicePool::new()))
    }

    pub fn services(&self) -> &Arc<ServicePool> {
        &self.services
    }

    pub fn registry(&self) -> &AutomationRegistry {
        &self.registry
    }

    /// Whether an automation is registered for `task`, resolvable or not.
    pub fn has_automation(&self, task: &TaskId) -> bool {
        self.registry.contains(task.as_str())
    }

    /// Find the automation for `task` and check that its inputs are available.
    ///
    /// Never fails: a missing input degrades the task to manual.
    pub fn resolve(&self, task: &TaskId) -> Resolution {
        let Some(automation) = self.registry.get(task.as_str()) else {
            return Resolution::NotAutomated;
        };

        let missing = automation
            .requires()
            .into_iter()
            .find(|slot| !slot.is_builtin() && !self.services.contains(slot));
        if let Some(slot) = missing {
            debug!(task = %task, input = slot.type_name(), "automation input unavailable");
            return Resolution::Unresolvable(
                Problem::warn(format!(
                    "Task '{}' has an automation, but its input '{}' is not available. The task will have to be completed manually.",
                    task,
                    slot.type_name()
                ))
                .for_task(task.clone()),
            );
        }

        Resolution::Found(ResolvedAutomation {
            automation: Arc::clone(automation),
            services: Arc::clone(&self.services),
        })
    }

    /// Registered automations that no leaf task will ever use.
    ///
    /// These name a task that does not exist or a composite task.
    pub fn unused_automations(&self, graph: &TaskGraph) -> Vec<String> {
        self.registry
            .task_names()
            .filter(|name| {
                graph
                    .get(&TaskId::new(*name))
                    .is_none_or(|node| !node.is_leaf())
            })
            .map(str::to_string)
            .collect()
    }
}
