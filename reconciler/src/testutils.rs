use crate::intent::{IntentError, IntentSource};
use crate::process::{ProcessError, ProcessExecutor, ProcessOutput};
use crate::types::Snapshot;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Duration;

/// One recorded invocation. `config` holds the file named by the last
/// argument at the time the command ran, if it could be read.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub config: Option<String>,
}

/// Answers commands by program name. Unscripted programs succeed.
#[derive(Default)]
pub struct FakeExecutor {
    responses: Mutex<HashMap<String, VecDeque<Result<ProcessOutput, ProcessError>>>>,
    invocations: Mutex<Vec<Invocation>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeExecutor {
    pub fn with_delay(delay: Duration) -> Self {
        FakeExecutor {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn push_exit(&self, program: &str, exit_code: i32, stderr: &str) {
        self.push(
            program,
            Ok(ProcessOutput {
                exit_code: Some(exit_code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            }),
        );
    }

    pub fn push(&self, program: &str, response: Result<ProcessOutput, ProcessError>) {
        self.responses
            .lock()
            .entry(program.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    pub fn calls_to(&self, program: &str) -> usize {
        self.invocations
            .lock()
            .iter()
            .filter(|i| i.program == program)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessExecutor for FakeExecutor {
    async fn run(&self, program: &str, args: &[String]) -> Result<ProcessOutput, ProcessError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let config = args
            .last()
            .and_then(|path| std::fs::read_to_string(path).ok());
        self.invocations.lock().push(Invocation {
            program: program.to_string(),
            args: args.to_vec(),
            config,
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let response = self
            .responses
            .lock()
            .get_mut(program)
            .and_then(|queue| queue.pop_front());

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response.unwrap_or_else(|| {
            Ok(ProcessOutput {
                exit_code: Some(0),
                ..Default::default()
            })
        })
    }
}

/// Returns queued listings in order, then repeats the last one.
#[derive(Default)]
pub struct ScriptedSource {
    listings: Mutex<VecDeque<Result<Snapshot, IntentError>>>,
    last: Mutex<Option<Snapshot>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn push(&self, listing: Result<Snapshot, IntentError>) {
        self.listings.lock().push_back(listing);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntentSource for ScriptedSource {
    async fn list_rules(&self) -> Result<Snapshot, IntentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.listings.lock().pop_front() {
            Some(Ok(snapshot)) => {
                *self.last.lock() = Some(snapshot.clone());
                Ok(snapshot)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last.lock().clone().unwrap_or_default()),
        }
    }
}
