//! Fakes for driving the cycle controller without a real CLI or real time.

use crate::core::{MeasurementResult, ServerDescriptor, Sleeper, SpeedtestRunner};
use crate::speedtest::{invoker::InvokeError, SpeedtestError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// A runner that replays queued responses and records every call.
#[derive(Default, Clone)]
pub struct FakeSpeedtestRunner {
    list_responses: Arc<Mutex<VecDeque<Result<Vec<ServerDescriptor>, SpeedtestError>>>>,
    measure_responses: Arc<Mutex<VecDeque<Result<MeasurementResult, SpeedtestError>>>>,
    measure_calls: Arc<Mutex<Vec<Vec<u32>>>>,
    list_calls: Arc<Mutex<u32>>,
}

impl FakeSpeedtestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_list(&self, response: Result<Vec<ServerDescriptor>, SpeedtestError>) {
        self.list_responses.lock().unwrap().push_back(response);
    }

    pub fn push_measure(&self, response: Result<MeasurementResult, SpeedtestError>) {
        self.measure_responses.lock().unwrap().push_back(response);
    }

    /// The server arguments of every `measure` call so far.
    pub fn measure_calls(&self) -> Vec<Vec<u32>> {
        self.measure_calls.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> u32 {
        *self.list_calls.lock().unwrap()
    }
}

#[async_trait]
impl SpeedtestRunner for FakeSpeedtestRunner {
    async fn list_servers(&self) -> Result<Vec<ServerDescriptor>, SpeedtestError> {
        *self.list_calls.lock().unwrap() += 1;
        self.list_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(SpeedtestError::NoServersFound))
    }

    async fn measure(&self, servers: &[u32]) -> Result<MeasurementResult, SpeedtestError> {
        self.measure_calls.lock().unwrap().push(servers.to_vec());
        self.measure_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(SpeedtestError::Execution(InvokeError::Timeout {
                    path: "fake-speedtest-cli".into(),
                    after: Duration::ZERO,
                }))
            })
    }
}

/// A sleeper that returns immediately, records each requested duration, and
/// optionally signals shutdown after a fixed number of sleeps.
#[derive(Default, Clone)]
pub struct FakeSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
    stop_after: Option<(usize, Arc<watch::Sender<bool>>)>,
}

impl FakeSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends `true` on `shutdown_tx` once `sleeps` sleeps have been requested.
    pub fn stop_after(mut self, sleeps: usize, shutdown_tx: watch::Sender<bool>) -> Self {
        self.stop_after = Some((sleeps, Arc::new(shutdown_tx)));
        self
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for FakeSleeper {
    async fn sleep(&self, duration: Duration) {
        let count = {
            let mut sleeps = self.sleeps.lock().unwrap();
            sleeps.push(duration);
            sleeps.len()
        };
        if let Some((limit, tx)) = &self.stop_after {
            if count >= *limit {
                let _ = tx.send(true);
            }
        }
        tokio::task::yield_now().await;
    }
}
