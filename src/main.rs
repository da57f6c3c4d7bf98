use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tiny_prober::{
    Geometry, Interrupt, JsonLinesSink, Level, NetworkProbe, ProbeConfig, ProbeController,
    RetryPolicy, SearchMode, Target, Timeouts,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Full,
    FixedRegister,
    FixedMemory,
}

#[derive(Parser, Debug)]
#[clap(about = "Brute-force instruction prober for the tiny machine service")]
struct Args {
    #[clap(long, env = "TINY_PROBER_HOST", default_value = tiny_prober::config::DEFAULT_HOST)]
    host: String,
    /// Defaults to the level's port, or 8000.
    #[clap(short, long, env = "TINY_PROBER_PORT")]
    port: Option<u16>,
    /// Service level preset (1, 2 or 3): port and fixed memory.
    #[clap(short, long, env = "TINY_PROBER_LEVEL")]
    level: Option<u8>,
    #[clap(long, default_value = "2")]
    register_width: usize,
    #[clap(long, default_value = "8")]
    memory_width: usize,
    /// Must equal register width + memory width when given.
    #[clap(long)]
    message_width: Option<usize>,
    #[clap(short, long, value_enum)]
    mode: Option<Mode>,
    /// Fixed bytes for the fixed-register/fixed-memory modes, as hex.
    #[clap(short, long)]
    fixed: Option<String>,
    /// Stop after this many rounds.
    #[clap(short = 'n', long)]
    limit: Option<u64>,
    /// Stop after one pass over the space instead of starting over.
    #[clap(long)]
    single_pass: bool,
    /// Enumeration index to resume from.
    #[clap(long, default_value = "0")]
    resume: u128,
    #[clap(long, default_value = "5000")]
    connect_timeout_ms: u64,
    #[clap(long, default_value = "10000")]
    read_timeout_ms: u64,
    /// Wait on the socket forever, like a plain blocking client.
    #[clap(long)]
    no_timeouts: bool,
    #[clap(long, default_value = "50")]
    greeting_len: usize,
    #[clap(long, default_value = "200")]
    response_len: usize,
    #[clap(long, default_value = "5")]
    retries: usize,
    #[clap(long, default_value = "250")]
    backoff_ms: u64,
    #[clap(long, default_value = "5000")]
    max_backoff_ms: u64,
    /// Append winning buffers to this file as JSON lines.
    #[clap(long, env = "TINY_PROBER_SAVE_WINS")]
    save_wins: Option<PathBuf>,
    /// Print the final report as JSON.
    #[clap(long)]
    json: bool,
    #[clap(short, long)]
    verbose: bool,
}

impl Args {
    fn level(&self) -> Result<Option<Level>> {
        match self.level {
            None => Ok(None),
            Some(n) => match Level::from_number(n) {
                Some(level) => Ok(Some(level)),
                None => bail!("unknown level {}, expected 1, 2 or 3", n),
            },
        }
    }

    fn config(&self, level: Option<Level>) -> Result<ProbeConfig> {
        let geometry = match self.message_width {
            Some(message) => {
                Geometry::with_message_width(self.register_width, self.memory_width, message)
            }
            None => Geometry::new(self.register_width, self.memory_width),
        }?;
        let port = self
            .port
            .or(level.map(|l| l.port()))
            .unwrap_or(tiny_prober::config::DEFAULT_PORT);
        let timeouts = if self.no_timeouts {
            Timeouts::unbounded()
        } else {
            Timeouts {
                connect: Some(Duration::from_millis(self.connect_timeout_ms)),
                read: Some(Duration::from_millis(self.read_timeout_ms)),
                write: Some(Duration::from_millis(self.read_timeout_ms)),
            }
        };

        Ok(ProbeConfig {
            target: Target::new(self.host.clone(), port),
            geometry,
            timeouts,
            retry: RetryPolicy::new(
                self.retries,
                Duration::from_millis(self.backoff_ms),
                Duration::from_millis(self.max_backoff_ms),
            ),
            greeting_len: self.greeting_len,
            response_len: self.response_len,
            repeat: !self.single_pass,
            start_index: self.resume,
        })
    }

    fn search_mode(&self, level: Option<Level>) -> Result<SearchMode> {
        let fixed = match &self.fixed {
            Some(text) => {
                let compact: String = text.split_whitespace().collect();
                Some(hex::decode(compact).context("--fixed is not valid hex")?)
            }
            None => None,
        };

        match (self.mode, fixed, level) {
            (Some(Mode::Full), _, _) => Ok(SearchMode::Full),
            (Some(Mode::FixedRegister), Some(register), _) => {
                Ok(SearchMode::FixedRegister(register))
            }
            (Some(Mode::FixedMemory), Some(memory), _) => Ok(SearchMode::FixedMemory(memory)),
            (Some(Mode::FixedMemory), None, Some(level)) | (None, None, Some(level)) => {
                Ok(SearchMode::FixedMemory(level.fixed_memory().to_vec()))
            }
            (Some(mode), None, _) => bail!("{:?} mode needs --fixed", mode),
            (None, Some(memory), _) => Ok(SearchMode::FixedMemory(memory)),
            (None, None, None) => Ok(SearchMode::Full),
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.verbose);

    let level = args.level()?;
    let config = args.config(level)?;
    let mode = args.search_mode(level)?;

    let interrupt = Interrupt::new();
    interrupt.on_ctrl_c();

    let probe = NetworkProbe::new(&config);
    let mut controller = ProbeController::new(probe, config).with_interrupt(interrupt);
    if let Some(path) = &args.save_wins {
        let sink = JsonLinesSink::open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        info!("saving winning buffers to {}", sink.path().display());
        controller = controller.with_sink(Box::new(sink));
    }

    match controller.run(mode, args.limit).await {
        Ok(report) if args.json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Ok(report) => println!("{}", report),
        Err(e) => {
            let stats = controller.stats();
            warn!(
                "stopped after {} rounds ({} wins, {} losses, {} invalid)",
                stats.rounds, stats.wins, stats.losses, stats.invalids
            );
            return Err(e).context("probing failed");
        }
    }

    Ok(())
}
