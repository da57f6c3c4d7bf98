use async_trait::async_trait;
use serde::Serialize;

pub mod config;
pub mod error;
pub mod interrupt;
pub mod network;
pub mod prober;
pub mod samples;
pub mod space;
pub mod strategy;

pub use config::{Geometry, Level, ProbeConfig, RetryPolicy, Target, Timeouts};
pub use error::{Error, Result, Stage};
pub use interrupt::{Interrupt, SignalAction};
pub use network::NetworkProbe;
pub use prober::{ProbeController, RunReport, StopReason};
pub use samples::{JsonLinesSink, MemorySink, SampleSink, WinningSample};
pub use space::{enumerate, BitReversedSpace};
pub use strategy::{SearchMode, SearchStrategy};

/// Reply marker for a winning buffer.
pub const WIN_MARKER: &str = "40ByteCTF";
/// Reply marker for a buffer the machine refused to decode.
pub const INVALID_MARKER: &str = "Invalid instruction";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeStats {
    pub rounds: u64,
    pub wins: u64,
    pub losses: u64,
    pub invalids: u64,
}

impl ProbeStats {
    pub fn record(&mut self, outcome: Outcome) {
        self.rounds += 1;
        match outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Invalid => self.invalids += 1,
            Outcome::Loss => self.losses += 1,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.rounds == self.wins + self.losses + self.invalids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Win,
    Invalid,
    Loss,
}

impl Outcome {
    pub fn classify(response: &str) -> Self {
        if response.contains(WIN_MARKER) {
            Outcome::Win
        } else if response.contains(INVALID_MARKER) {
            Outcome::Invalid
        } else {
            Outcome::Loss
        }
    }
}

/// One submit-and-classify round against some target.
#[async_trait]
pub trait Probe: Send {
    async fn probe(&mut self, buffer: &[u8]) -> Result<Outcome>;
}
