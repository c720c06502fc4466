use std::{
    fmt,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use ethers::{middleware::SignerMiddleware, signers::Signer};
use tracing::{debug, info, warn};

use crate::{
    config::BenchConfig,
    deploy::{DeployedContract, DeploymentDescriptor, deploy},
    error::{BenchError, SimulatorError},
    logger::{FileLogger, RunLogger},
    pacing::{BlockPacing, advance},
    simulator::SimulatorHandle,
};

pub const DEFAULT_BLOCK_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MANUAL_SKIPS: [u64; 5] = [1, 12, 13, 18, 19];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    pub pacing: BlockPacing,
}

impl RunConfig {
    pub fn autonomous(interval: Duration) -> Self {
        Self {
            pacing: BlockPacing::Autonomous { interval },
        }
    }

    pub fn manual(blocks: u64) -> Self {
        Self {
            pacing: BlockPacing::Manual { blocks },
        }
    }

    /// One autonomous run followed by the manual runs, in execution order.
    pub fn default_sequence() -> Vec<RunConfig> {
        let mut runs = vec![RunConfig::autonomous(DEFAULT_BLOCK_INTERVAL)];
        runs.extend(DEFAULT_MANUAL_SKIPS.into_iter().map(RunConfig::manual));
        runs
    }

    pub fn skip_count(&self) -> u64 {
        self.pacing.skip_count()
    }

    /// Without autonomous mining a deployment only confirms once a block is
    /// mined by hand, so a manual run has to mine at least one.
    pub fn validate(&self) -> Result<(), SimulatorError> {
        match self.pacing {
            BlockPacing::Manual { blocks: 0 } => Err(SimulatorError::InvalidConfig(
                "manual pacing must mine at least one block".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn context(&self) -> String {
        match self.pacing {
            BlockPacing::Autonomous { interval } => {
                format!("with a {}s block time", interval.as_secs())
            }
            BlockPacing::Manual { blocks } => format!("with {blocks} skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run: RunConfig,
    /// From submission of the deployment to its observed confirmation.
    pub elapsed: Duration,
    /// Blocks mined by the pacing controller, zero for autonomous runs.
    pub blocks_mined: u64,
    pub contract: DeployedContract,
}

impl RunReport {
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Time taken {}: {:.3}",
            self.run.context(),
            self.elapsed_ms()
        )
    }
}

/// Runs every configuration in order, one chain at a time, printing a report
/// line after each run has been torn down. Stops at the first failing run.
pub async fn run_all(
    bench: &BenchConfig,
    runs: &[RunConfig],
) -> Result<Vec<RunReport>, BenchError> {
    let mut reports = Vec::with_capacity(runs.len());
    for run in runs {
        info!(skips = run.skip_count(), "Starting run {}", run.context());
        let report = run_benchmark(bench, run).await?;
        println!("{report}");
        reports.push(report);
    }
    Ok(reports)
}

/// Executes a single run on a fresh simulator.
///
/// Once the simulator is up, it is disconnected and the run log closed
/// whatever the outcome, and both happen before this returns.
pub async fn run_benchmark(bench: &BenchConfig, run: &RunConfig) -> Result<RunReport, BenchError> {
    run.validate()?;
    let skips = run.skip_count();
    let descriptor = bench.descriptor()?;

    let logger = FileLogger::open(&bench.logs_dir, skips).map_err(BenchError::RunLog)?;
    debug!(path = %logger.path().display(), "Opened run log");
    let simulator = SimulatorHandle::spawn(&bench.simulator_config(run.pacing), logger).await?;

    let report = supervise(
        simulator,
        async |simulator: &SimulatorHandle<FileLogger>| {
            measure(simulator, bench, run, &descriptor).await
        },
    )
    .await?;

    debug!(
        skips,
        address = ?report.contract.address,
        blocks_mined = report.blocks_mined,
        "Run finished"
    );
    Ok(report)
}

/// What a run holds between startup and teardown.
#[async_trait(?Send)]
trait RunSession: Sized {
    async fn teardown(self) -> Result<(), BenchError>;
}

#[async_trait(?Send)]
impl<L: RunLogger> RunSession for SimulatorHandle<L> {
    async fn teardown(self) -> Result<(), BenchError> {
        let logger = self.disconnect().await?;
        logger.close().map_err(BenchError::RunLog)
    }
}

/// Runs `body` against `session` and then tears the session down, on success
/// and on failure alike. If both fail, the error of `body` is returned.
async fn supervise<S, T, F>(session: S, body: F) -> Result<T, BenchError>
where
    S: RunSession,
    F: AsyncFnOnce(&S) -> Result<T, BenchError>,
{
    let outcome = body(&session).await;
    let teardown = session.teardown().await;

    match (outcome, teardown) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) | (Err(err), Ok(())) => Err(err),
        (Err(err), Err(teardown_err)) => {
            warn!("Teardown failed after run error: {teardown_err}");
            Err(err)
        }
    }
}

async fn measure<L: RunLogger>(
    simulator: &SimulatorHandle<L>,
    bench: &BenchConfig,
    run: &RunConfig,
    descriptor: &DeploymentDescriptor,
) -> Result<RunReport, BenchError> {
    let chain_id = simulator.chain_id().await?;
    let wallet = bench.account.wallet()?.with_chain_id(chain_id);
    let client = SignerMiddleware::new(simulator.provider().clone(), wallet);

    let start = Instant::now();
    let pending = deploy(&client, descriptor).await?;
    debug!(tx_hash = ?pending.tx_hash(), "Pacing blocks");

    let paced = async {
        tokio::try_join!(
            async { pending.confirmed().await.map_err(BenchError::from) },
            async { advance(simulator, &run.pacing).await.map_err(BenchError::from) },
        )
    };
    let (contract, blocks_mined) = tokio::select! {
        joined = paced => joined?,
        () = simulator.exited() => return Err(SimulatorError::Exited.into()),
    };
    let elapsed = start.elapsed();

    Ok(RunReport {
        run: *run,
        elapsed,
        blocks_mined,
        contract,
    })
}
