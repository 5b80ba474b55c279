//! The tick loop: estimate, filter, deliver, wait.

use crate::config::PipelineConfig;
use crate::data::LandmarkFrame;
use crate::error::{PipelineError, TransportError};
use crate::filter::TelemetryFilter;
use crate::link::{Delivery, DeliveryChannel, LinkUpdate, SessionEnd, ShutdownInitiator};
use crate::pose::PoseEstimator;
use crate::transport::Transport;
use log::*;
use std::io::BufRead;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;

/// Anything that can hand over the newest landmarks once per tick.
pub trait LandmarkSource {
    fn take_frame(&mut self) -> Option<LandmarkFrame>;
}

impl<F> LandmarkSource for F
where
    F: FnMut() -> Option<LandmarkFrame>,
{
    fn take_frame(&mut self) -> Option<LandmarkFrame> {
        self()
    }
}

/// Latest-wins slot between a detector thread and the tick loop.
#[derive(Clone, Default)]
pub struct LandmarkFeed {
    latest: Arc<Mutex<Option<LandmarkFrame>>>,
}

impl LandmarkFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: LandmarkFrame) {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(frame);
        }
    }

    /// Publishes every JSON line of `reader` from a background thread.
    pub fn spawn_reader<R>(&self, reader: R) -> JoinHandle<()>
    where
        R: BufRead + Send + 'static,
    {
        let feed = self.clone();
        thread::spawn(move || {
            for line in reader.lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(error) => {
                        error!("Failed reading landmark input: {}", error);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match LandmarkFrame::deserialize(line.as_bytes()) {
                    Ok(frame) => feed.publish(frame),
                    Err(error) => warn!("Skipping landmark frame: {}", error),
                }
            }
            info!("Landmark input ended");
        })
    }
}

impl LandmarkSource for LandmarkFeed {
    fn take_frame(&mut self) -> Option<LandmarkFrame> {
        self.latest.lock().ok().and_then(|mut latest| latest.take())
    }
}

/// Asks a running pipeline to wind down.
#[derive(Clone)]
pub struct StopHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.sender.send_replace(true);
    }
}

pub type StopSignal = watch::Receiver<bool>;

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        StopHandle {
            sender: Arc::new(sender),
        },
        receiver,
    )
}

async fn stop_requested(signal: &mut StopSignal) {
    if signal.wait_for(|stopped| *stopped).await.is_err() {
        // every handle is gone, nobody can stop us anymore
        std::future::pending::<()>().await;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub sessions: u32,
    pub transmissions: u64,
    pub suppressed: u64,
    pub send_warnings: u64,
    pub malformed_inbound: u64,
    pub last_end: Option<SessionEnd>,
}

pub struct Pipeline<T, S> {
    estimator: PoseEstimator,
    filter: TelemetryFilter,
    channel: DeliveryChannel<T>,
    source: S,
    stop: StopSignal,
    tick_interval: Duration,
    shutdown_grace: Duration,
    scan_timeout: Option<Duration>,
    reconnect: bool,
}

impl<T: Transport, S: LandmarkSource> Pipeline<T, S> {
    pub fn new(config: &PipelineConfig, transport: T, source: S, stop: StopSignal) -> Self {
        Pipeline {
            estimator: config.estimator(),
            filter: TelemetryFilter::new(config.filter_config()),
            channel: DeliveryChannel::new(transport),
            source,
            stop,
            tick_interval: config.tick_interval(),
            shutdown_grace: config.shutdown_grace(),
            scan_timeout: config.scan_timeout(),
            reconnect: config.reconnect,
        }
    }

    pub fn channel(&self) -> &DeliveryChannel<T> {
        &self.channel
    }

    pub fn filter(&self) -> &TelemetryFilter {
        &self.filter
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Runs sessions until the operator stops or, without reconnect, until
    /// the first session ends.
    pub async fn run(&mut self) -> Result<PipelineReport, PipelineError> {
        self.channel
            .open()
            .await
            .map_err(PipelineError::TransportInit)?;
        let mut report = PipelineReport::default();
        self.channel.start();

        loop {
            info!("Scanning for peer...");
            if !self.scan().await {
                self.channel.finish(false);
                break;
            }

            report.sessions += 1;
            self.filter.reset();
            let end = self.run_session(&mut report).await;
            info!("Session ended: {}", end);
            report.last_end = Some(end);

            match end {
                SessionEnd::OperatorStop => {
                    self.channel
                        .shutdown(ShutdownInitiator::Operator, self.shutdown_grace)
                        .await
                }
                SessionEnd::PeerShutdown => {
                    self.channel
                        .shutdown(ShutdownInitiator::Peer, self.shutdown_grace)
                        .await
                }
                SessionEnd::LinkLost => self.channel.link_lost().await,
            }
            self.filter.reset();

            let rescan = self.reconnect && end != SessionEnd::OperatorStop && !self.stopped();
            self.channel.finish(rescan);
            if !rescan {
                break;
            }
        }

        report.malformed_inbound = self.channel.malformed_inbound();
        Ok(report)
    }

    /// True once connected, false when stopped first.
    async fn scan(&mut self) -> bool {
        loop {
            if self.stopped() {
                return false;
            }
            let scan_timeout = self.scan_timeout;
            let channel = &mut self.channel;
            let attempt = async move {
                match scan_timeout {
                    Some(limit) => match tokio::time::timeout(limit, channel.connect()).await {
                        Ok(result) => result.map(|_| ()),
                        Err(_) => Err(TransportError::Connect(format!(
                            "no peer found within {:?}",
                            limit
                        ))),
                    },
                    None => channel.connect().await.map(|_| ()),
                }
            };
            let result = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => return false,
                result = attempt => result,
            };
            match result {
                Ok(()) => return true,
                Err(error) => {
                    warn!("Discovery failed: {}", error);
                    tokio::select! {
                        biased;
                        _ = stop_requested(&mut self.stop) => return false,
                        _ = tokio::time::sleep(self.tick_interval) => {}
                    }
                }
            }
        }
    }

    async fn run_session(&mut self, report: &mut PipelineReport) -> SessionEnd {
        loop {
            if self.stopped() {
                return SessionEnd::OperatorStop;
            }
            match self.channel.poll() {
                LinkUpdate::Shutdown => return SessionEnd::PeerShutdown,
                LinkUpdate::Lost => return SessionEnd::LinkLost,
                LinkUpdate::Quiet => {}
            }

            if let Some(end) = self.tick(report).await {
                return end;
            }

            let deadline = tokio::time::Instant::now() + self.tick_interval;
            loop {
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut self.stop) => return SessionEnd::OperatorStop,
                    update = self.channel.next_update() => match update {
                        LinkUpdate::Shutdown => return SessionEnd::PeerShutdown,
                        LinkUpdate::Lost => return SessionEnd::LinkLost,
                        LinkUpdate::Quiet => {}
                    },
                    _ = tokio::time::sleep_until(deadline) => break,
                }
            }
        }
    }

    /// One estimate, filter and deliver pass. Returns the session end when
    /// a stop or link update cut the delivery short.
    async fn tick(&mut self, report: &mut PipelineReport) -> Option<SessionEnd> {
        let frame = self.source.take_frame().unwrap_or_default();
        let pose = self.estimator.estimate_frame(&frame);
        if !pose.is_empty() {
            trace!("Pose:\n{}", pose);
        }
        // tokio clock, pausable in tests
        let now = tokio::time::Instant::now().into_std();
        let decision = self.filter.tick(&pose.to_vector(), now);
        trace!("{:?} {:?}", decision.freshness, decision.vector.values());
        if !decision.transmit {
            report.suppressed += 1;
            return None;
        }
        let delivery = tokio::select! {
            biased;
            delivery = self.channel.send(&decision.vector) => delivery,
            _ = stop_requested(&mut self.stop) => {
                debug!("Stop requested while sending, abandoning delivery");
                self.filter.forget_sent();
                return Some(SessionEnd::OperatorStop);
            }
        };
        match delivery {
            Ok(Delivery::Sent) => report.transmissions += 1,
            Ok(Delivery::Interrupted(update)) => {
                self.filter.forget_sent();
                match update {
                    LinkUpdate::Shutdown => return Some(SessionEnd::PeerShutdown),
                    LinkUpdate::Lost => return Some(SessionEnd::LinkLost),
                    LinkUpdate::Quiet => {}
                }
            }
            Err(error) => {
                warn!("Failed sending angles, retrying next tick: {}", error);
                report.send_warnings += 1;
                self.filter.forget_sent();
            }
        }
        None
    }
}
