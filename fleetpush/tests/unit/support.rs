//! Mock transport shared by the integration tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use fleetpush::authn::Credentials;
use fleetpush::errors::DeviceError;
use fleetpush::inventory::DeviceRecord;
use fleetpush::transport::{CommitResult, Session, Transport};

/// Scripted behaviour for one host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Apply,
    RefuseConnect,
    RefuseConnectOnce,
    HangConnectOnce,
    RejectAuth,
    FailPush,
    PanicPush,
    HangPush,
}

#[derive(Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

/// Transport whose sessions follow a per-host script
#[derive(Default)]
pub struct MockTransport {
    behaviours: HashMap<String, Behaviour>,
    max_delay_ms: u64,
    pub counters: Arc<Counters>,
    pub open_attempts: Mutex<HashMap<String, u32>>,
    pub pushed: Arc<Mutex<Vec<(String, String)>>>,
    pub usernames: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, host: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(host.to_string(), behaviour);
        self
    }

    /// Sleep a random 0..=max_ms while opening and before pushing
    pub fn with_random_delays(mut self, max_ms: u64) -> Self {
        self.max_delay_ms = max_ms;
        self
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    pub fn attempts_for(&self, host: &str) -> u32 {
        self.open_attempts
            .lock()
            .unwrap()
            .get(host)
            .copied()
            .unwrap_or(0)
    }

    fn random_delay(&self) -> Duration {
        if self.max_delay_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=self.max_delay_ms))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, device: &DeviceRecord) -> Result<Box<dyn Session>, DeviceError> {
        let attempt = {
            let mut attempts = self.open_attempts.lock().unwrap();
            let entry = attempts.entry(device.host.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        let behaviour = self
            .behaviours
            .get(&device.host)
            .copied()
            .unwrap_or(Behaviour::Apply);

        // Counted from here until the session closes
        let in_flight = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .max_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        let in_flight_guard = InFlight(Arc::clone(&self.counters));

        tokio::time::sleep(self.random_delay()).await;

        match behaviour {
            Behaviour::RefuseConnect => {
                return Err(DeviceError::Connection(format!("{}: refused", device.address())))
            }
            Behaviour::RefuseConnectOnce if attempt == 1 => {
                return Err(DeviceError::Connection(format!("{}: reset", device.address())))
            }
            Behaviour::HangConnectOnce if attempt == 1 => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            _ => {}
        }

        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            host: device.host.clone(),
            behaviour,
            delay: self.random_delay(),
            in_flight: Some(in_flight_guard),
            counters: Arc::clone(&self.counters),
            pushed: Arc::clone(&self.pushed),
            usernames: Arc::clone(&self.usernames),
        }))
    }
}

/// Decrements the in-flight count when dropped, covering refused and
/// timed-out opens as well as closed sessions
struct InFlight(Arc<Counters>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockSession {
    host: String,
    behaviour: Behaviour,
    delay: Duration,
    in_flight: Option<InFlight>,
    counters: Arc<Counters>,
    pushed: Arc<Mutex<Vec<(String, String)>>>,
    usernames: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Session for MockSession {
    async fn authenticate(&mut self, credentials: Credentials<'_>) -> Result<(), DeviceError> {
        self.usernames
            .lock()
            .unwrap()
            .push(credentials.username().to_string());
        if self.behaviour == Behaviour::RejectAuth {
            return Err(DeviceError::Authentication(format!(
                "{} rejected credentials for user '{}'",
                self.host,
                credentials.username()
            )));
        }
        Ok(())
    }

    async fn push(&mut self, payload: &str) -> Result<CommitResult, DeviceError> {
        tokio::time::sleep(self.delay).await;
        match self.behaviour {
            Behaviour::FailPush => Err(DeviceError::Push("'shell' exited with status 1".into())),
            Behaviour::PanicPush => panic!("driver bug on {}", self.host),
            Behaviour::HangPush => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(CommitResult::default())
            }
            _ => {
                self.pushed
                    .lock()
                    .unwrap()
                    .push((self.host.clone(), payload.to_string()));
                Ok(CommitResult {
                    output: format!("{}# ok", self.host),
                    exit_status: Some(0),
                    commands: 1,
                })
            }
        }
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        if let Some(in_flight) = self.in_flight.take() {
            drop(in_flight);
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// `count` devices named r0, r1, ... with inline credentials
pub fn devices(count: usize) -> Vec<DeviceRecord> {
    (0..count)
        .map(|i| {
            DeviceRecord::new(format!("r{i}"))
                .with_username("admin")
                .with_password("secret")
                .with_attribute("site", format!("site-{i}"))
        })
        .collect()
}

pub fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}
