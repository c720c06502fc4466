use pacing_bench::{BenchConfig, RunConfig, run_all};
use tracing::{Level, info};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, filter::Directive, fmt};

// Report lines go to stdout, so diagnostics are kept on stderr.
fn init_tracing() -> eyre::Result<()> {
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from(Level::INFO))
        .from_env_lossy();

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(log_filter);
    let subscriber = Box::new(Registry::default().with(fmt_layer));

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> eyre::Result<()> {
    init_tracing()?;

    let bench = BenchConfig::default();
    let runs = RunConfig::default_sequence();
    info!(
        runs = runs.len(),
        logs_dir = %bench.logs_dir.display(),
        "Starting deployment pacing benchmark"
    );

    let reports = run_all(&bench, &runs).await?;
    info!(runs = reports.len(), "Benchmark finished");
    Ok(())
}
