#![allow(dead_code)]

use anyhow::{bail, Result};
use operations_queue::handlers::handler_fn;
use operations_queue::operation_store::{NewOperation, OperationRecord, OperationStore};
use operations_queue::{Handler, HandlerError};
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Every handler invocation with its start time and config.
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<(Instant, JsonValue)>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, config: &JsonValue) -> usize {
        let mut calls = self.calls.lock().unwrap();
        calls.push((Instant::now(), config.clone()));
        calls.len()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn started_at(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    /// The `tag` config field of every call, in call order.
    pub fn tags(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, config)| config["tag"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

pub fn succeeding_handler(result: JsonValue) -> Arc<dyn Handler> {
    handler_fn(move |_user_id, _config, _progress| {
        let result = result.clone();
        async move { Ok(result) }
    })
}

pub fn recording_handler(log: CallLog) -> Arc<dyn Handler> {
    handler_fn(move |user_id, config, _progress| {
        let log = log.clone();
        async move {
            log.record(&config);
            Ok(json!({"user": user_id}))
        }
    })
}

/// Fails the first `failures` calls, then succeeds.
pub fn flaky_handler(failures: usize, log: CallLog) -> Arc<dyn Handler> {
    handler_fn(move |_user_id, config, _progress| {
        let log = log.clone();
        async move {
            let call = log.record(&config);
            if call <= failures {
                return Err(HandlerError::failed(format!("rate limited on call {}", call)));
            }
            Ok(json!({"calls": call}))
        }
    })
}

pub fn always_failing_handler(log: CallLog) -> Arc<dyn Handler> {
    handler_fn(move |_user_id, config, _progress| {
        let log = log.clone();
        async move {
            log.record(&config);
            Err(HandlerError::failed("account is locked"))
        }
    })
}

/// Reports progress, sleeps for `duration`, then succeeds.
pub fn sleeping_handler(duration: Duration, log: CallLog) -> Arc<dyn Handler> {
    handler_fn(move |_user_id, config, progress| {
        let log = log.clone();
        async move {
            log.record(&config);
            progress.report("started");
            tokio::time::sleep(duration).await;
            progress.report("finished");
            Ok(json!({"slept_ms": duration.as_millis() as u64}))
        }
    })
}

/// Panics on the first call, succeeds afterwards.
pub fn panicking_once_handler(log: CallLog) -> Arc<dyn Handler> {
    handler_fn(move |_user_id, config, _progress| {
        let log = log.clone();
        async move {
            if log.record(&config) == 1 {
                panic!("session cookie missing");
            }
            Ok(json!("recovered"))
        }
    })
}

/// Tracks how many handler calls overlap.
#[derive(Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    max: AtomicUsize,
    total: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let current = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(current, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn concurrency_gauge(gauge: Arc<ConcurrencyGauge>, hold: Duration) -> Arc<dyn Handler> {
    handler_fn(move |_user_id, _config, _progress| {
        let gauge = gauge.clone();
        async move {
            gauge.enter();
            tokio::time::sleep(hold).await;
            gauge.exit();
            Ok(JsonValue::Null)
        }
    })
}

/// An operation store whose writes always fail.
pub struct FailingOperationStore;

impl OperationStore for FailingOperationStore {
    fn create_operation(&self, _operation: &NewOperation) -> Result<bool> {
        bail!("operation store is down")
    }

    fn get_operation(&self, _id: &str) -> Result<Option<OperationRecord>> {
        bail!("operation store is down")
    }

    fn mark_completed(&self, _id: &str, _result: &JsonValue, _completed_at: i64) -> Result<bool> {
        bail!("operation store is down")
    }

    fn mark_failed(
        &self,
        _id: &str,
        _error: &str,
        _retry_count: u32,
        _failed_at: i64,
    ) -> Result<bool> {
        bail!("operation store is down")
    }
}

/// Wraps an operation store and counts terminal writes.
pub struct CountingOperationStore {
    inner: Arc<dyn OperationStore>,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl CountingOperationStore {
    pub fn new(inner: Arc<dyn OperationStore>) -> Self {
        Self {
            inner,
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn completed_writes(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed_writes(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

impl OperationStore for CountingOperationStore {
    fn create_operation(&self, operation: &NewOperation) -> Result<bool> {
        self.inner.create_operation(operation)
    }

    fn get_operation(&self, id: &str) -> Result<Option<OperationRecord>> {
        self.inner.get_operation(id)
    }

    fn mark_completed(&self, id: &str, result: &JsonValue, completed_at: i64) -> Result<bool> {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.inner.mark_completed(id, result, completed_at)
    }

    fn mark_failed(&self, id: &str, error: &str, retry_count: u32, failed_at: i64) -> Result<bool> {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.inner.mark_failed(id, error, retry_count, failed_at)
    }
}
