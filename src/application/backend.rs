// Ports to the production backend: per-unit duplex channels and request/response reads
use crate::domain::errors::TransportError;
use crate::domain::window::WindowRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Which backend endpoint family a unit channel subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFamily {
    /// Per-model rows for the whole window.
    #[default]
    Standard,
    /// Hour buckets plus unit totals.
    Hourly,
}

impl DataFamily {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "standard" => Some(DataFamily::Standard),
            "hourly" => Some(DataFamily::Hourly),
            _ => None,
        }
    }
}

/// One inbound event on a unit's duplex channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Text(String),
    Closed { clean: bool },
}

/// An open duplex channel. Dropping `outgoing` asks the transport to close it.
#[derive(Debug)]
pub struct TransportLink {
    pub outgoing: mpsc::Sender<String>,
    pub incoming: mpsc::Receiver<TransportFrame>,
}

#[async_trait]
pub trait UnitTransport: Send + Sync {
    /// Opens a channel for `unit`; resolves once the handshake completes.
    async fn connect(&self, unit: &str, family: DataFamily) -> Result<TransportLink, TransportError>;
}

#[async_trait]
pub trait ProductionBackend: Send + Sync {
    /// Names of all production units the backend knows about
    async fn list_units(&self) -> Result<Vec<String>, TransportError>;

    /// Raw response body of a single historical snapshot for one unit
    async fn fetch_historical(&self, unit: &str, request: &WindowRequest) -> Result<String, TransportError>;
}

#[cfg(test)]
pub mod fakes {
    //! In-memory backend doubles driven through mpsc channels.
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Server side of a fake link: what the client sent, and a way to answer.
    pub struct FakeServerEnd {
        pub unit: String,
        pub requests: mpsc::Receiver<String>,
        pub frames: mpsc::Sender<TransportFrame>,
    }

    /// Each `connect` either fails (if scripted) or hands its server end to the test.
    pub struct FakeTransport {
        accepted: mpsc::UnboundedSender<FakeServerEnd>,
        failures: Mutex<HashMap<String, u32>>,
    }

    impl FakeTransport {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<FakeServerEnd>) {
            let (accepted, rx) = mpsc::unbounded_channel();
            (
                Self {
                    accepted,
                    failures: Mutex::new(HashMap::new()),
                },
                rx,
            )
        }

        /// The next `count` connects for `unit` fail.
        pub fn fail_next(&self, unit: &str, count: u32) {
            if let Ok(mut failures) = self.failures.lock() {
                failures.insert(unit.to_string(), count);
            }
        }
    }

    #[async_trait]
    impl UnitTransport for FakeTransport {
        async fn connect(&self, unit: &str, _family: DataFamily) -> Result<TransportLink, TransportError> {
            if let Ok(mut failures) = self.failures.lock() {
                if let Some(left) = failures.get_mut(unit) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(TransportError::Connect("refused".to_string()));
                    }
                }
            }
            let (out_tx, out_rx) = mpsc::channel(16);
            let (in_tx, in_rx) = mpsc::channel(16);
            let _ = self.accepted.send(FakeServerEnd {
                unit: unit.to_string(),
                requests: out_rx,
                frames: in_tx,
            });
            Ok(TransportLink {
                outgoing: out_tx,
                incoming: in_rx,
            })
        }
    }

    /// Canned historical bodies keyed by unit; a missing unit is an HTTP failure.
    #[derive(Default)]
    pub struct FakeBackend {
        pub units: Option<Vec<String>>,
        pub bodies: HashMap<String, String>,
        pub requests: Mutex<Vec<(String, WindowRequest)>>,
    }

    #[async_trait]
    impl ProductionBackend for FakeBackend {
        async fn list_units(&self) -> Result<Vec<String>, TransportError> {
            self.units
                .clone()
                .ok_or_else(|| TransportError::Http("503 Service Unavailable".to_string()))
        }

        async fn fetch_historical(&self, unit: &str, request: &WindowRequest) -> Result<String, TransportError> {
            if let Ok(mut seen) = self.requests.lock() {
                seen.push((unit.to_string(), request.clone()));
            }
            self.bodies
                .get(unit)
                .cloned()
                .ok_or_else(|| TransportError::Http(format!("404 for {}", unit)))
        }
    }
}
