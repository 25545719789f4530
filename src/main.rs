use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vtl1mon::{
    cli::Cli,
    config::MonitorConfig,
    dispatcher::EventDispatcher,
    publisher::RecordPublisher,
    replay,
    rundown::RundownGate,
    session::{Monitor, ShutdownFlags},
    symbols::{ObjectSymbols, SymbolSession},
};

/// Initialize tracing subscriber; `--debug` turns on everything
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Cli) -> Result<MonitorConfig> {
    let mut config = match &args.config {
        Some(path) => MonitorConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    config.symbol_search_paths.extend(args.symbols.iter().cloned());
    Ok(config)
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let config = load_config(&args)?;

    let Some(capture) = args.replay.as_ref() else {
        anyhow::bail!("no live session backend on this platform; use --replay <CAPTURE>");
    };

    let flags = ShutdownFlags::new();
    let publisher = RecordPublisher::create(&args.output, flags.write_permission())
        .context("failed to open output")?;

    let backend = ObjectSymbols::new(config.symbol_search_paths.clone());
    let symbols = SymbolSession::new(Box::new(backend), config);
    let (gate, waiter) = RundownGate::new();
    let dispatcher = EventDispatcher::new(std::process::id(), gate, symbols, publisher);

    let (session, pump) = replay::open(capture)
        .with_context(|| format!("failed to read capture {}", capture.display()))?;

    tracing::info!("starting trace session");
    let mut monitor = Monitor::start(session, pump, dispatcher, waiter, flags)
        .context("failed to start monitoring")?;

    monitor.wait_for_ingestion();
    let report = monitor.shutdown().context("ingestion failed")?;
    report.log_summary();

    Ok(())
}
