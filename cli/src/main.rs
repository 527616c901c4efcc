use std::borrow::Cow;
use std::path::PathBuf;

use anyhow::Context as AnyhowContext;
use clap::{Parser, Subcommand};
use flexi_logger::{FileSpec, LevelFilter, LogSpecification, Logger, LoggerHandle, WriteMode};

use appstate::DefaultContext;

mod list;
use list::List;

mod watch;
use watch::Watch;

mod source;
mod utils;

const SIMPLE_VERSION_STRING: &'static str =
    include!(concat!(env!("OUT_DIR"), "/simple_version_string"));
const VERSION_STRING: &'static str = include!(concat!(env!("OUT_DIR"), "/version_string"));

#[derive(Parser)]
#[command(version = SIMPLE_VERSION_STRING, about = "Installed application cache explorer")]
struct Cli {
    /// Log to stderr instead of a file
    #[arg(short = 'e', long, action = clap::ArgAction::SetTrue)]
    log_stderr: bool,

    /// Log to the given file
    #[arg(short = 'f', long)]
    log_file: Option<PathBuf>,

    /// Raw flexi_logger log specification, overrides `--log-level`
    #[arg(short = 's', long)]
    log_spec: Option<String>,

    /// Log level, 0 for the environment's spec through 3 for trace
    #[arg(short = 'l', long, default_value_t = 0)]
    log_level: u8,

    /// Read the configuration from this file instead of the default location
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the version and git revision
    #[command()]
    Version,

    /// Load every installed application and print the sorted list
    #[command()]
    List(List),

    /// Print cache callbacks as package changes come in
    ///
    /// Runs until interrupted with SIGINT or SIGTERM
    #[command()]
    Watch(Watch),
}

impl Cli {
    fn configure_loggers(&self) -> anyhow::Result<LoggerHandle> {
        let log_spec = match &self.log_spec {
            Some(s) => {
                LogSpecification::parse(s).with_context(|| format!("parsing log spec {}", s))?
            }
            None => {
                if self.log_level > 0 {
                    let lvl = match self.log_level {
                        1 => LevelFilter::Info,
                        2 => LevelFilter::Debug,
                        _ => LevelFilter::Trace,
                    };
                    LogSpecification::builder()
                        .default(LevelFilter::Warn)
                        .module("appstate", lvl)
                        .build()
                } else {
                    LogSpecification::env_or_parse("warn")
                        .with_context(|| "getting log spec from env")?
                }
            }
        };

        let mut logger = Logger::with(log_spec);

        if !self.log_stderr {
            if let Some(v) = &self.log_file {
                let path = if v.is_absolute() {
                    Cow::Borrowed(v)
                } else {
                    Cow::Owned(std::env::current_dir()?.join(v))
                };
                logger = logger
                    .log_to_file(
                        FileSpec::try_from(path.as_path()).with_context(|| "creating filespec")?,
                    )
                    .append()
                    .write_mode(WriteMode::BufferAndFlush);
            }
        }

        logger.start().with_context(|| "starting logger")
    }

    fn context(&self) -> DefaultContext {
        match &self.config {
            Some(path) => DefaultContext::new().with_config_file(path.clone()),
            None => DefaultContext::new(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = &cli.command {
        println!("{}", VERSION_STRING);
        return Ok(());
    }

    let log_handle = cli.configure_loggers()?;
    let ctx = cli.context();

    let res = match &cli.command {
        Commands::List(c) => c.run(&ctx),
        Commands::Watch(c) => c.run(&ctx),
        Commands::Version => unreachable!(),
    };

    log_handle.flush();
    res
}
