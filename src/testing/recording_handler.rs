use crate::error::Result;
use crate::events::{MemoryEvent, MemoryEventHandler, MemoryEventKind};
use async_trait::async_trait;
use std::sync::Mutex;

/// 记录收到的全部事件，供断言使用
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<MemoryEvent>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MemoryEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: MemoryEventKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }
}

#[async_trait]
impl MemoryEventHandler for RecordingHandler {
    async fn handle(&self, event: &MemoryEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
