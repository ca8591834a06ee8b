use std::sync::Arc;

use crate::{backend::JobQueue, QueueError, QueueResult};

/// Named queues known to this process, in registration order
#[derive(Clone, Default)]
pub struct QueueRegistry {
    queues: Vec<Arc<dyn JobQueue>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue. Names must be unique.
    pub fn register(&mut self, queue: Arc<dyn JobQueue>) -> QueueResult<()> {
        if self.get(queue.name()).is_some() {
            return Err(QueueError::Internal(format!(
                "Queue {} is already registered",
                queue.name()
            )));
        }
        self.queues.push(queue);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobQueue>> {
        self.queues.iter().find(|q| q.name() == name).cloned()
    }

    /// Like [`get`](Self::get) but unknown names are an error
    pub fn require(&self, name: &str) -> QueueResult<Arc<dyn JobQueue>> {
        self.get(name)
            .ok_or_else(|| QueueError::QueueNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.queues.iter().map(|q| q.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn JobQueue>> {
        self.queues.iter()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = QueueRegistry::new();
        registry.register(Arc::new(MemoryBackend::new("a"))).unwrap();
        registry.register(Arc::new(MemoryBackend::new("b"))).unwrap();

        assert!(registry.register(Arc::new(MemoryBackend::new("a"))).is_err());
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn require_reports_unknown_queue() {
        let registry = QueueRegistry::new();
        let err = registry.require("nope").err().unwrap();
        assert_eq!(err, QueueError::QueueNotFound("nope".to_string()));
    }
}
