use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use crate::error::{Error, Result};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_REGISTER_WIDTH: usize = 2;
pub const DEFAULT_MEMORY_WIDTH: usize = 8;
pub const GREETING_LEN: usize = 50;
pub const RESPONSE_LEN: usize = 200;

/// Split of the message buffer into a register prefix and a memory suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    register_width: usize,
    memory_width: usize,
}

impl Geometry {
    pub fn new(register_width: usize, memory_width: usize) -> Result<Self> {
        if register_width == 0 {
            return Err(Error::InvalidWidth { what: "register" });
        }
        if memory_width == 0 {
            return Err(Error::InvalidWidth { what: "memory" });
        }
        Ok(Self {
            register_width,
            memory_width,
        })
    }

    /// Like [`Geometry::new`], but also checks an explicitly configured
    /// message width against the two components.
    pub fn with_message_width(
        register_width: usize,
        memory_width: usize,
        message_width: usize,
    ) -> Result<Self> {
        let geometry = Self::new(register_width, memory_width)?;
        if geometry.message_width() != message_width {
            return Err(Error::WidthMismatch {
                message: message_width,
                register: register_width,
                memory: memory_width,
            });
        }
        Ok(geometry)
    }

    pub fn register_width(&self) -> usize {
        self.register_width
    }

    pub fn memory_width(&self) -> usize {
        self.memory_width
    }

    pub fn message_width(&self) -> usize {
        self.register_width + self.memory_width
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            register_width: DEFAULT_REGISTER_WIDTH,
            memory_width: DEFAULT_MEMORY_WIDTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Per-stage socket deadlines. `None` waits forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Option<Duration>,
    pub read: Option<Duration>,
    pub write: Option<Duration>,
}

impl Timeouts {
    pub fn unbounded() -> Self {
        Self {
            connect: None,
            read: None,
            write: None,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Some(Duration::from_secs(5)),
            read: Some(Duration::from_secs(10)),
            write: Some(Duration::from_secs(5)),
        }
    }
}

/// How a round whose connection broke is replayed before the run gives up.
/// Failed attempts never count as rounds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts per round after the first connection failure.
    pub retries: usize,
    /// Pause before the first replay; doubled for each later one.
    pub first_delay: Duration,
    /// The doubled pause never exceeds this.
    pub delay_cap: Duration,
}

impl RetryPolicy {
    pub fn new(retries: usize, first_delay: Duration, delay_cap: Duration) -> Self {
        Self {
            retries,
            first_delay,
            delay_cap,
        }
    }

    /// Exponential delay before retry number `attempt` (1-based), capped.
    pub fn base_delay(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(16) as u32;
        self.first_delay
            .saturating_mul(1u32 << shift)
            .min(self.delay_cap)
    }

    /// [`RetryPolicy::base_delay`] plus up to 25% random jitter.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let base = self.base_delay(attempt);
        let spread = base.as_millis() as u64 / 4;
        if spread == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            first_delay: Duration::from_millis(250),
            delay_cap: Duration::from_secs(5),
        }
    }
}

/// Everything a probing run needs, passed in at construction.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub target: Target,
    pub geometry: Geometry,
    pub timeouts: Timeouts,
    pub retry: RetryPolicy,
    /// Upper bound on the discarded greeting read.
    pub greeting_len: usize,
    /// Upper bound on the response read.
    pub response_len: usize,
    /// Restart the enumeration when it runs out instead of stopping.
    pub repeat: bool,
    /// Position in the enumeration to start from.
    pub start_index: u128,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target: Target::default(),
            geometry: Geometry::default(),
            timeouts: Timeouts::default(),
            retry: RetryPolicy::default(),
            greeting_len: GREETING_LEN,
            response_len: RESPONSE_LEN,
            repeat: true,
            start_index: 0,
        }
    }
}

/// Known deployments of the tiny machine service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    One,
    Two,
    Three,
}

impl Level {
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Level::One),
            2 => Some(Level::Two),
            3 => Some(Level::Three),
            _ => None,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Level::One => 12346,
            Level::Two => 45678,
            Level::Three => 61830,
        }
    }

    /// Memory bytes held fixed while the register prefix is searched.
    pub fn fixed_memory(&self) -> &'static [u8] {
        match self {
            // \x??40ByteCTF
            Level::One => b"0ByteCTF",
            // \x0bsi\xdes\xc0h\xa0rm
            Level::Two => b"i\xdes\xc0h\xa0rm",
            // get ac, jze 6, put ac, jnz 0, ldl B, del, jze 8, fla, hlt...
            Level::Three => &[0x62, 0x67, 0x30, 0xEF, 0xD3, 0xFF, 0x00, 0x00],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_geometry_is_ten_bytes() {
        let geometry = Geometry::default();
        assert_eq!(geometry.register_width(), 2);
        assert_eq!(geometry.memory_width(), 8);
        assert_eq!(geometry.message_width(), 10);
    }

    #[test]
    fn message_width_must_add_up() {
        assert!(Geometry::with_message_width(2, 8, 10).is_ok());
        assert!(matches!(
            Geometry::with_message_width(2, 8, 9),
            Err(Error::WidthMismatch { message: 9, .. })
        ));
    }

    #[test]
    fn zero_widths_are_rejected() {
        assert!(matches!(
            Geometry::new(0, 8),
            Err(Error::InvalidWidth { what: "register" })
        ));
        assert!(matches!(
            Geometry::new(2, 0),
            Err(Error::InvalidWidth { what: "memory" })
        ));
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(4), Duration::from_millis(800));
        assert_eq!(policy.base_delay(5), Duration::from_millis(1000));
        assert_eq!(policy.base_delay(60), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let policy = RetryPolicy::new(3, Duration::from_millis(400), Duration::from_millis(400));
        for _ in 0..50 {
            let delay = policy.backoff(1);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(500));
        }
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).backoff(1), Duration::ZERO);
    }

    #[test]
    fn level_presets_match_message_layout() {
        for level in [Level::One, Level::Two, Level::Three] {
            assert_eq!(level.fixed_memory().len(), DEFAULT_MEMORY_WIDTH);
        }
        assert_eq!(Level::from_number(3).map(|l| l.port()), Some(61830));
        assert_eq!(Level::from_number(4), None);
    }

    #[test]
    fn target_displays_as_socket_address() {
        assert_eq!(Target::new("127.0.0.1", 12346).to_string(), "127.0.0.1:12346");
    }
}
