//! Application components and their optional capabilities.
//!
//! A component always has a name. Whether it can be initialized or reset is
//! declared through [`Component::as_initializable_mut`] and
//! [`Component::as_resettable_mut`]; the registry only calls what a
//! component exposes.

use crate::errors::{ModelError, ModelResult};

pub trait Initializable {
    fn initialize(&mut self) -> ModelResult<()>;
}

pub trait Resettable {
    fn reset(&mut self);
}

pub trait Component {
    fn name(&self) -> &str;

    fn as_initializable_mut(&mut self) -> Option<&mut dyn Initializable> {
        None
    }

    fn as_resettable_mut(&mut self) -> Option<&mut dyn Resettable> {
        None
    }
}

/// Named components in registration order.
#[derive(Default)]
pub struct ComponentRegistry {
    components: Vec<Box<dyn Component>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component. Names must be unique.
    pub fn register(&mut self, component: Box<dyn Component>) -> ModelResult<()> {
        let name = component.name().to_string();
        if self.get(&name).is_some() {
            return Err(ModelError::invalid_input("component", name, "a component with this name is already registered"));
        }
        tracing::debug!(component = %name, "registered component");
        self.components.push(component);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Component> {
        self.components.iter().find(|c| c.name() == name).map(|c| c.as_ref())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn Component + 'static)> {
        self.components.iter_mut().find(|c| c.name() == name).map(|c| c.as_mut())
    }

    pub fn names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Initialize every initializable component, stopping at the first
    /// failure. Returns how many were initialized.
    pub fn initialize_all(&mut self) -> ModelResult<usize> {
        let mut count = 0;
        for component in &mut self.components {
            if let Some(target) = component.as_initializable_mut() {
                target.initialize()?;
                count += 1;
            }
        }
        tracing::info!(initialized = count, total = self.components.len(), "components initialized");
        Ok(count)
    }

    /// Reset every resettable component. Returns how many were reset.
    pub fn reset_all(&mut self) -> usize {
        let mut count = 0;
        for component in &mut self.components {
            if let Some(target) = component.as_resettable_mut() {
                target.reset();
                count += 1;
            }
        }
        tracing::debug!(reset = count, "components reset");
        count
    }
}
