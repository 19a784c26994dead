// Per-unit duplex subscription with refresh, timeout, reconnection and tombstoning
use crate::application::backend::{DataFamily, TransportFrame, TransportLink, UnitTransport};
use crate::application::cadence::{reconnect_delay, AdaptiveTicker, Cadence, Visibility};
use crate::domain::clock::Clock;
use crate::domain::errors::{PayloadError, TransportError};
use crate::domain::production::MetricsPayload;
use crate::domain::schedule::PlantZone;
use crate::domain::window::TimeWindow;
use crate::infrastructure::payload_codec::{decode_response, BackendResponse};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    pub refresh: Cadence,
    /// Bound on both the handshake and the wait for the first payload.
    pub connect_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_base: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEventKind {
    Opened,
    Data(MetricsPayload),
    /// Nothing arrived within the connect timeout; stands in for an empty result.
    TimedOut,
    BackendError(String),
    Malformed(PayloadError),
    Closed { was_clean: bool },
    Reconnecting { attempt: u32, delay: Duration },
    Failed(TransportError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub unit: String,
    pub epoch: u64,
    pub kind: ChannelEventKind,
}

/// Everything a channel needs besides its unit and window.
#[derive(Clone)]
pub struct ChannelContext {
    pub transport: Arc<dyn UnitTransport>,
    pub clock: Arc<dyn Clock>,
    pub zone: PlantZone,
    pub family: DataFamily,
    pub settings: ChannelSettings,
    pub visibility: watch::Receiver<Visibility>,
    pub events: mpsc::Sender<ChannelEvent>,
}

/// Handle to one unit's subscription task. Dropping it closes the channel.
#[derive(Debug)]
pub struct UnitDataChannel {
    unit: String,
    epoch: u64,
    invalid: Arc<AtomicBool>,
    window: watch::Sender<TimeWindow>,
    task: JoinHandle<()>,
}

impl UnitDataChannel {
    /// Spawns the subscription; the first request goes out as soon as the link opens.
    pub fn open(unit: &str, window: TimeWindow, epoch: u64, ctx: ChannelContext) -> Self {
        let invalid = Arc::new(AtomicBool::new(false));
        let window = window.anchored(ctx.clock.now());
        let live = window.is_open();
        let (window_tx, window_rx) = watch::channel(window);
        let emitter = Emitter {
            unit: unit.to_string(),
            epoch,
            invalid: invalid.clone(),
            events: ctx.events.clone(),
        };
        let task = tokio::spawn(run(unit.to_string(), window_rx, ctx, emitter));
        tracing::info!(unit, epoch, live, "unit channel opened");

        Self {
            unit: unit.to_string(),
            epoch,
            invalid,
            window: window_tx,
            task,
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid.load(Ordering::Acquire)
    }

    /// Replaces the requested window and sends it right away if the link is open.
    pub fn refresh(&self, window: TimeWindow) {
        if !self.is_invalid() {
            self.window.send_replace(window);
        }
    }

    /// Tombstones the channel and cancels its timers. Anything still in
    /// flight on the transport is discarded when it arrives.
    pub fn close(&self) {
        if !self.invalid.swap(true, Ordering::AcqRel) {
            tracing::info!(unit = %self.unit, epoch = self.epoch, "unit channel closed");
        }
        self.task.abort();
    }
}

impl Drop for UnitDataChannel {
    fn drop(&mut self) {
        self.close();
    }
}

struct Emitter {
    unit: String,
    epoch: u64,
    invalid: Arc<AtomicBool>,
    events: mpsc::Sender<ChannelEvent>,
}

impl Emitter {
    /// False once the channel is tombstoned or nobody listens any more.
    async fn emit(&self, kind: ChannelEventKind) -> bool {
        if self.invalid.load(Ordering::Acquire) {
            tracing::debug!(unit = %self.unit, epoch = self.epoch, "discarding event from invalidated channel");
            return false;
        }
        let event = ChannelEvent {
            unit: self.unit.clone(),
            epoch: self.epoch,
            kind,
        };
        self.events.send(event).await.is_ok()
    }
}

enum Phase<'a> {
    Connecting {
        attempt: BoxFuture<'a, Result<TransportLink, TransportError>>,
        deadline: Instant,
    },
    Open(TransportLink),
    Waiting {
        until: Instant,
    },
}

enum Step {
    Connected(Result<TransportLink, TransportError>),
    FirstPayloadOverdue,
    Frame(Option<TransportFrame>),
    Refresh,
    WindowReplaced(bool),
    Retry,
}

async fn run(
    unit: String,
    mut window: watch::Receiver<TimeWindow>,
    ctx: ChannelContext,
    emitter: Emitter,
) {
    let settings = ctx.settings;
    let transport = ctx.transport.clone();
    let first_payload_deadline = Instant::now() + settings.connect_timeout;
    let mut delivered = false;
    let mut attempts: u32 = 0;
    let mut refresh = AdaptiveTicker::new(settings.refresh, ctx.visibility.clone());
    let mut phase = Phase::Connecting {
        attempt: transport.connect(&unit, ctx.family),
        deadline: Instant::now() + settings.connect_timeout,
    };

    loop {
        let step = match &mut phase {
            Phase::Connecting { attempt, deadline } => tokio::select! {
                result = attempt => Step::Connected(result),
                _ = sleep_until(*deadline) => Step::Connected(Err(TransportError::Connect(
                    "handshake timed out".to_string(),
                ))),
                _ = sleep_until(first_payload_deadline), if !delivered => Step::FirstPayloadOverdue,
            },
            Phase::Open(link) => tokio::select! {
                frame = link.incoming.recv() => Step::Frame(frame),
                _ = refresh.tick() => Step::Refresh,
                changed = window.changed() => Step::WindowReplaced(changed.is_ok()),
                _ = sleep_until(first_payload_deadline), if !delivered => Step::FirstPayloadOverdue,
            },
            Phase::Waiting { until } => tokio::select! {
                _ = sleep_until(*until) => Step::Retry,
                _ = sleep_until(first_payload_deadline), if !delivered => Step::FirstPayloadOverdue,
            },
        };

        let failure = match step {
            Step::Connected(Ok(link)) => {
                tracing::debug!(unit = %unit, "transport link established");
                if !emitter.emit(ChannelEventKind::Opened).await {
                    return;
                }
                refresh = AdaptiveTicker::new(settings.refresh, ctx.visibility.clone());
                let current = window.borrow_and_update().clone();
                let sent = send_request(&link, &current, ctx.clock.as_ref()).await;
                phase = Phase::Open(link);
                sent.err()
            }
            Step::Connected(Err(e)) => Some(e),
            Step::FirstPayloadOverdue => {
                delivered = true;
                tracing::warn!(unit = %unit, "no payload within {:?}, reporting empty result", settings.connect_timeout);
                if !emitter.emit(ChannelEventKind::TimedOut).await {
                    return;
                }
                None
            }
            Step::Frame(Some(TransportFrame::Text(text))) => {
                delivered = true;
                let kind = match decode_response(&text, ctx.zone) {
                    Ok(BackendResponse::Metrics(payload)) => {
                        attempts = 0;
                        tracing::debug!(unit = %unit, models = payload.models.len(), hours = payload.hourly.len(), "payload received");
                        ChannelEventKind::Data(payload)
                    }
                    Ok(BackendResponse::Failure(message)) => {
                        tracing::warn!(unit = %unit, "backend reported error: {}", message);
                        ChannelEventKind::BackendError(message)
                    }
                    Err(e) => {
                        tracing::warn!(unit = %unit, "malformed payload: {}", e);
                        ChannelEventKind::Malformed(e)
                    }
                };
                if !emitter.emit(kind).await {
                    return;
                }
                None
            }
            Step::Frame(Some(TransportFrame::Closed { clean: true })) => {
                tracing::info!(unit = %unit, "backend closed the channel");
                emitter.emit(ChannelEventKind::Closed { was_clean: true }).await;
                return;
            }
            Step::Frame(Some(TransportFrame::Closed { clean: false })) | Step::Frame(None) => {
                if !emitter.emit(ChannelEventKind::Closed { was_clean: false }).await {
                    return;
                }
                Some(TransportError::UncleanClose)
            }
            Step::Refresh => match &phase {
                Phase::Open(link) => {
                    let now = ctx.clock.now();
                    let current = window.borrow().clone();
                    if current.is_live(now) {
                        send_request(link, &current, ctx.clock.as_ref()).await.err()
                    } else {
                        tracing::debug!(unit = %unit, "window is historical, not refreshing");
                        None
                    }
                }
                _ => None,
            },
            Step::WindowReplaced(false) => return,
            Step::WindowReplaced(true) => match &phase {
                Phase::Open(link) => {
                    let current = window.borrow_and_update().clone();
                    send_request(link, &current, ctx.clock.as_ref()).await.err()
                }
                _ => None,
            },
            Step::Retry => {
                phase = Phase::Connecting {
                    attempt: transport.connect(&unit, ctx.family),
                    deadline: Instant::now() + settings.connect_timeout,
                };
                None
            }
        };

        let Some(error) = failure else {
            continue;
        };

        attempts += 1;
        if attempts > settings.max_reconnect_attempts {
            tracing::error!(unit = %unit, "giving up after {} reconnect attempts: {}", settings.max_reconnect_attempts, error);
            emitter
                .emit(ChannelEventKind::Failed(TransportError::Exhausted(
                    settings.max_reconnect_attempts,
                )))
                .await;
            return;
        }
        let delay = reconnect_delay(settings.reconnect_base, attempts, refresh.visibility());
        tracing::warn!(unit = %unit, attempt = attempts, ?delay, "channel lost ({}), reconnecting", error);
        if !emitter.emit(ChannelEventKind::Reconnecting { attempt: attempts, delay }).await {
            return;
        }
        phase = Phase::Waiting {
            until: Instant::now() + delay,
        };
    }
}

/// Sends the window as of now; a live window's end is recomputed at send time.
async fn send_request(link: &TransportLink, window: &TimeWindow, clock: &dyn Clock) -> Result<(), TransportError> {
    let request = window.request_at(clock.now());
    let body = serde_json::to_string(&request).map_err(|e| TransportError::Send(e.to_string()))?;
    tracing::debug!(start = %request.start_time, end = %request.end_time, "sending window request");
    link.outgoing
        .send(body)
        .await
        .map_err(|_| TransportError::Send("transport writer is gone".to_string()))
}
