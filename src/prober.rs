use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::ProbeConfig;
use crate::error::{Error, Result};
use crate::interrupt::Interrupt;
use crate::samples::{SampleSink, WinningSample};
use crate::strategy::{SearchMode, SearchStrategy};
use crate::{Outcome, Probe, ProbeStats};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    LimitReached,
    Interrupted,
    /// Single-pass run went through the whole space.
    Exhausted,
    LengthMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub mode: &'static str,
    pub stats: ProbeStats,
    pub stop: StopReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Probing rounds: {}  Wins: {}  Losses: {}  Invalid: {}",
            self.stats.rounds, self.stats.wins, self.stats.losses, self.stats.invalids
        )?;
        write!(
            f,
            "Ran for: {:.3}s ({} -> {}), stopped: {:?}",
            self.elapsed_secs, self.started_at, self.finished_at, self.stop
        )
    }
}

pub struct ProbeController<P: Probe> {
    probe: P,
    config: ProbeConfig,
    interrupt: Interrupt,
    sink: Option<Box<dyn SampleSink + Send>>,
    stats: ProbeStats,
}

impl<P: Probe> ProbeController<P> {
    pub fn new(probe: P, config: ProbeConfig) -> Self {
        Self {
            probe,
            config,
            interrupt: Interrupt::new(),
            sink: None,
            stats: ProbeStats::default(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Persist winning buffers through `sink`.
    pub fn with_sink(mut self, sink: Box<dyn SampleSink + Send>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Counters of the current (or last) run.
    pub fn stats(&self) -> ProbeStats {
        self.stats
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Submit buffers chosen by `mode` until `limit` rounds have been played,
    /// the run is interrupted, or a buffer of the wrong length shows up.
    ///
    /// Transport failures that survive every retry are returned as
    /// [`Error::RetriesExhausted`]; counters up to that point remain
    /// available through [`ProbeController::stats`].
    pub async fn run(&mut self, mode: SearchMode, limit: Option<u64>) -> Result<RunReport> {
        self.stats = ProbeStats::default();
        let strategy = SearchStrategy::new(self.config.geometry, mode)
            .resume_from(self.config.start_index)
            .repeat(self.config.repeat);

        let started_at = Utc::now();
        let start = Instant::now();
        info!(
            target_addr = %self.config.target,
            mode = strategy.mode().name(),
            limit = ?limit,
            "starting prober: {}",
            started_at
        );

        let mut buffers = strategy.buffers()?;
        let stop = loop {
            if self.interrupt.is_triggered() {
                break StopReason::Interrupted;
            }
            if limit.map_or(false, |limit| self.stats.rounds >= limit) {
                break StopReason::LimitReached;
            }
            let Some(buffer) = buffers.next() else {
                break StopReason::Exhausted;
            };

            debug!(round = self.stats.rounds + 1, buffer = %hex::encode(&buffer), "submitting");
            match self.submit(&buffer).await {
                Ok(Some(outcome)) => self.record(outcome, &buffer),
                Ok(None) => break StopReason::Interrupted,
                Err(Error::Length { expected, actual }) => {
                    warn!("buffer too short: {} bytes, expected {}", actual, expected);
                    break StopReason::LengthMismatch { expected, actual };
                }
                Err(e) => {
                    error!(
                        rounds = self.stats.rounds,
                        wins = self.stats.wins,
                        losses = self.stats.losses,
                        invalids = self.stats.invalids,
                        "probing aborted after {:.3}s: {}",
                        start.elapsed().as_secs_f64(),
                        e
                    );
                    return Err(e);
                }
            }
        };

        let report = RunReport {
            mode: strategy.mode().name(),
            stats: self.stats,
            stop,
            started_at,
            finished_at: Utc::now(),
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        info!("{}", report);
        Ok(report)
    }

    /// Plays one round, replaying it on transport failures. `None` means the
    /// interrupt fired while the round was being retried; nothing is counted.
    async fn submit(&mut self, buffer: &[u8]) -> Result<Option<Outcome>> {
        let retry = self.config.retry;
        let mut attempt = 0;
        loop {
            match self.probe.probe(buffer).await {
                Err(e) if e.is_retryable() => {
                    if self.interrupt.is_triggered() {
                        debug!("round {} abandoned after: {}", self.stats.rounds + 1, e);
                        return Ok(None);
                    }
                    if attempt >= retry.retries {
                        return Err(Error::RetriesExhausted {
                            attempts: attempt + 1,
                            source: Box::new(e),
                        });
                    }
                    attempt += 1;
                    let delay = retry.backoff(attempt);
                    warn!(
                        "round {} failed: {}; retry {}/{} in {:?}",
                        self.stats.rounds + 1,
                        e,
                        attempt,
                        retry.retries,
                        delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.interrupt.triggered() => return Ok(None),
                    }
                }
                result => return result.map(Some),
            }
        }
    }

    fn record(&mut self, outcome: Outcome, buffer: &[u8]) {
        self.stats.record(outcome);
        if outcome != Outcome::Win {
            return;
        }

        info!(round = self.stats.rounds, buffer = %hex::encode(buffer), "win");
        if let Some(sink) = self.sink.as_mut() {
            let sample = WinningSample::new(self.stats.rounds, buffer);
            if let Err(e) = sink.save(&sample) {
                warn!("{}", e);
            }
        }
    }
}
