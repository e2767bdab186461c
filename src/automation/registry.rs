//! Explicit registry from task name to automation.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::Automation;

/// Errors raised while registering automations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("an automation is already registered for task '{0}'")]
    Duplicate(String),

    #[error("automations must name a task")]
    BlankName,
}

/// Automations keyed by the task they complete.
#[derive(Default, Clone)]
pub struct AutomationRegistry {
    automations: HashMap<String, Arc<dyn Automation>>,
    /// Registration order, for deterministic reporting.
    order: Vec<String>,
}

impl AutomationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an automation under its task name.
    pub fn register(&mut self, automation: Arc<dyn Automation>) -> Result<(), RegistryError> {
        let name = automation.task_name().trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::BlankName);
        }
        if self.automations.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.order.push(name.clone());
        self.automations.insert(name, automation);
        Ok(())
    }

    /// Builder: register an automation.
    pub fn with(mut self, automation: Arc<dyn Automation>) -> Result<Self, RegistryError> {
        self.register(automation)?;
        Ok(self)
    }

    pub fn get(&self, task: &str) -> Option<&Arc<dyn Automation>> {
        self.automations.get(task)
    }

    pub fn contains(&self, task: &str) -> bool {
        self.automations.contains_key(task)
    }

    /// Registered task names, in registration order.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.automations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.automations.is_empty()
    }
}

impl std::fmt::Debug for AutomationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationRegistry")
            .field("tasks", &self.order)
            .finish()
    }
}
