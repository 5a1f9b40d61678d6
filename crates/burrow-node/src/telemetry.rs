//! Installs the global tracing subscriber.
//!
//! # Examples
//! ```no_run
//! burrow_node::telemetry::configure()
//!     .set_filter_directives("info")
//!     .set_pretty_print(true)
//!     .try_init()
//!     .expect("must be able to initialize telemetry");
//! tracing::info!("telemetry initialized");
//! ```
use std::io::IsTerminal as _;

use tracing_subscriber::{
    filter::{
        LevelFilter,
        ParseError,
    },
    layer::SubscriberExt as _,
    util::{
        SubscriberInitExt as _,
        TryInitError,
    },
    EnvFilter,
};

/// The errors that can occur when initializing telemetry.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    fn filter_directives(source: ParseError) -> Self {
        Self(ErrorKind::FilterDirectives(source))
    }

    fn init_subscriber(source: TryInitError) -> Self {
        Self(ErrorKind::InitSubscriber(source))
    }
}

#[derive(Debug, thiserror::Error)]
enum ErrorKind {
    #[error("failed to parse filter directives")]
    FilterDirectives(#[source] ParseError),
    #[error("failed installing global tracing subscriber")]
    InitSubscriber(#[source] TryInitError),
}

#[must_use = "the telemetry config must be initialized to be useful"]
pub fn configure() -> Config {
    Config::new()
}

pub trait MakeWriter {
    fn make_writer(&self) -> Box<dyn std::io::Write + Send + Sync + 'static>;
}

impl<F, W> MakeWriter for F
where
    F: Fn() -> W,
    W: std::io::Write + Send + Sync + 'static,
{
    fn make_writer(&self) -> Box<dyn std::io::Write + Send + Sync + 'static> {
        Box::new((self)())
    }
}

struct BoxedMakeWriter(Box<dyn MakeWriter + Send + Sync + 'static>);

impl BoxedMakeWriter {
    fn new<M>(make_writer: M) -> Self
    where
        M: MakeWriter + Send + Sync + 'static,
    {
        Self(Box::new(make_writer))
    }
}

impl MakeWriter for BoxedMakeWriter {
    fn make_writer(&self) -> Box<dyn std::io::Write + Send + Sync + 'static> {
        self.0.make_writer()
    }
}

pub struct Config {
    filter_directives: String,
    force_stdout: bool,
    pretty_print: bool,
    stdout_writer: BoxedMakeWriter,
}

impl Config {
    #[must_use = "telemetry must be initialized to be useful"]
    fn new() -> Self {
        Self {
            filter_directives: String::new(),
            force_stdout: false,
            pretty_print: false,
            stdout_writer: BoxedMakeWriter::new(std::io::stdout),
        }
    }

    #[must_use = "telemetry must be initialized to be useful"]
    pub fn set_filter_directives(mut self, filter_directives: &str) -> Self {
        self.filter_directives = filter_directives.to_string();
        self
    }

    /// Pretty prints even if stdout is not a terminal.
    #[must_use = "telemetry must be initialized to be useful"]
    pub fn set_force_stdout(mut self, force_stdout: bool) -> Self {
        self.force_stdout = force_stdout;
        self
    }

    #[must_use = "telemetry must be initialized to be useful"]
    pub fn set_pretty_print(mut self, pretty_print: bool) -> Self {
        self.pretty_print = pretty_print;
        self
    }

    #[must_use = "telemetry must be initialized to be useful"]
    pub fn set_stdout_writer<M>(mut self, stdout_writer: M) -> Self
    where
        M: MakeWriter + Send + Sync + 'static,
    {
        self.stdout_writer = BoxedMakeWriter::new(stdout_writer);
        self
    }

    /// Initialize telemetry, consuming the config.
    ///
    /// Logs are written as json unless pretty printing was requested and stdout is a terminal.
    ///
    /// # Errors
    /// Fails if the filter directives could not be parsed or if the global tracing subscriber
    /// could not be installed.
    pub fn try_init(self) -> Result<(), Error> {
        let Self {
            filter_directives,
            force_stdout,
            pretty_print,
            stdout_writer,
        } = self;

        let env_filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse(filter_directives)
            .map_err(Error::filter_directives)?;

        let writer = move || stdout_writer.make_writer();
        let mut pretty_printer = None;
        let mut json_printer = None;
        if pretty_print && (force_stdout || std::io::stdout().is_terminal()) {
            pretty_printer = Some(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(writer),
            );
        } else {
            json_printer = Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_writer(writer),
            );
        }

        tracing_subscriber::registry()
            .with(pretty_printer)
            .with(json_printer)
            .with(env_filter)
            .try_init()
            .map_err(Error::init_subscriber)
    }
}
