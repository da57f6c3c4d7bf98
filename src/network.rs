use std::future::Future;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use crate::config::{ProbeConfig, Target, Timeouts};
use crate::error::{Error, Result, Stage};
use crate::{Outcome, Probe};

/// Talks to a tiny machine service: one connection per submitted buffer.
#[derive(Debug, Clone)]
pub struct NetworkProbe {
    target: Target,
    message_width: usize,
    timeouts: Timeouts,
    greeting_len: usize,
    response_len: usize,
}

impl NetworkProbe {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            target: config.target.clone(),
            message_width: config.geometry.message_width(),
            timeouts: config.timeouts,
            greeting_len: config.greeting_len,
            response_len: config.response_len,
        }
    }

    async fn bounded<T, F>(&self, stage: Stage, limit: Option<Duration>, fut: F) -> Result<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        let result = match limit {
            Some(after) => timeout(after, fut).await.map_err(|_| Error::Timeout {
                addr: self.target.to_string(),
                stage,
                after,
            })?,
            None => fut.await,
        };
        result.map_err(|source| stage.failure(self.target.to_string(), source))
    }

    async fn exchange(&self, stream: &mut TcpStream, buffer: &[u8]) -> Result<String> {
        let mut greeting = vec![0u8; self.greeting_len];
        let n = self
            .bounded(Stage::Greeting, self.timeouts.read, stream.read(&mut greeting))
            .await?;
        trace!(bytes = n, "discarded greeting");

        self.bounded(Stage::Write, self.timeouts.write, stream.write_all(buffer))
            .await?;

        let mut response = vec![0u8; self.response_len];
        let n = self
            .bounded(Stage::Response, self.timeouts.read, stream.read(&mut response))
            .await?;
        let text = String::from_utf8_lossy(&response[..n]).into_owned();
        trace!(bytes = n, response = %text.trim_end(), "received response");
        Ok(text)
    }
}

#[async_trait]
impl Probe for NetworkProbe {
    async fn probe(&mut self, buffer: &[u8]) -> Result<Outcome> {
        if buffer.len() != self.message_width {
            return Err(Error::Length {
                expected: self.message_width,
                actual: buffer.len(),
            });
        }

        let addr = (self.target.host.as_str(), self.target.port);
        let mut stream = self
            .bounded(Stage::Connect, self.timeouts.connect, TcpStream::connect(addr))
            .await?;

        let response = self.exchange(&mut stream, buffer).await;

        if let Err(e) = stream.shutdown().await {
            trace!("shutdown of {} failed: {}", self.target, e);
        }

        Ok(Outcome::classify(&response?))
    }
}
