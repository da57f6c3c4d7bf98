use tokio_util::sync::CancellationToken;

/// Exit status used when a second Ctrl-C forces the process down.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Cooperative stop request, checked by the controller between rounds and
/// raced against retry backoff.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(CancellationToken);

/// What to do about an incoming Ctrl-C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Finish the current round, then stop with a summary.
    Stop,
    /// A stop was already requested; leave now.
    Exit,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once [`Interrupt::trigger`] has been called on any clone.
    pub async fn triggered(&self) {
        self.0.cancelled().await
    }

    pub fn on_signal(&self) -> SignalAction {
        if self.is_triggered() {
            SignalAction::Exit
        } else {
            self.trigger();
            SignalAction::Stop
        }
    }

    /// First Ctrl-C stops after the current round; a second one exits the
    /// process, for rounds stuck on a socket without timeouts. Must be called
    /// inside a tokio runtime.
    pub fn on_ctrl_c(&self) {
        let interrupt = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!("unable to listen for ctrl-c: {}", e);
                    return;
                }
                match interrupt.on_signal() {
                    SignalAction::Stop => {
                        tracing::info!(
                            "interrupt received, stopping after the current round (ctrl-c again to exit)"
                        );
                    }
                    SignalAction::Exit => {
                        tracing::warn!("second interrupt, exiting without a summary");
                        std::process::exit(FORCED_EXIT_CODE);
                    }
                }
            }
        });
    }
}
