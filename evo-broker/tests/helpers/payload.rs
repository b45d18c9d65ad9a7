use crate::item::{Payload, WorkItem};
use crate::utils::GenericResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Behaviour {
    Square,
    Fail,
    Panic,
}

/// A payload which squares its value and counts `process` calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestPayload {
    pub value: i64,
    pub result: Option<i64>,
    pub behaviour: Behaviour,
    pub delay_ms: u64,
    #[serde(skip)]
    pub calls: Option<Arc<AtomicUsize>>,
}

impl TestPayload {
    pub fn new(value: i64) -> Self {
        Self { value, result: None, behaviour: Behaviour::Square, delay_ms: 0, calls: None }
    }

    pub fn with_behaviour(mut self, behaviour: Behaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_counter(mut self, calls: Arc<AtomicUsize>) -> Self {
        self.calls = Some(calls);
        self
    }
}

impl Payload for TestPayload {
    fn process(&mut self) -> GenericResult<()> {
        if let Some(calls) = self.calls.as_ref() {
            calls.fetch_add(1, Ordering::SeqCst);
        }

        if self.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.delay_ms));
        }

        match self.behaviour {
            Behaviour::Square => {
                self.result = Some(self.value * self.value);
                Ok(())
            }
            Behaviour::Fail => Err(format!("cannot process {}", self.value).into()),
            Behaviour::Panic => panic!("payload {} has panicked", self.value),
        }
    }
}

/// A payload large enough to fill socket buffers with a few frames.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BulkyPayload {
    pub data: String,
}

impl BulkyPayload {
    pub fn new(size: usize) -> Self {
        Self { data: "x".repeat(size) }
    }
}

impl Payload for BulkyPayload {
    fn process(&mut self) -> GenericResult<()> {
        Ok(())
    }
}

pub fn create_test_items(values: std::ops::Range<i64>) -> Vec<WorkItem<TestPayload>> {
    values.map(|value| WorkItem::new(TestPayload::new(value))).collect()
}

pub fn create_counted_items(values: std::ops::Range<i64>, calls: Arc<AtomicUsize>) -> Vec<WorkItem<TestPayload>> {
    values.map(|value| WorkItem::new(TestPayload::new(value).with_counter(calls.clone()))).collect()
}
