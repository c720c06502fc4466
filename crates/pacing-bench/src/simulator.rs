//! Local development chain running as a child process.
//!
//! The simulator is started with its block pacing fixed for its whole life:
//! either it mines on a timer, or it only mines when asked to. Everything it
//! prints goes to the run's logger, never to the console of the harness.

use std::{fmt::Debug, net::SocketAddr, path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider},
    signers::Signer,
    types::{Address, U256},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines},
    process::{Child, ChildStderr, ChildStdout, Command},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::Account,
    error::SimulatorError,
    logger::RunLogger,
    pacing::{BlockMiner, BlockPacing},
};

const HOST: &str = "127.0.0.1";
// Printed by the node once its RPC server accepts connections, followed by the
// bound address.
const READY_MARKER: &str = "Listening on";

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub program: PathBuf,
    pub accounts: Vec<Account>,
    pub pacing: BlockPacing,
    pub poll_interval: Duration,
    pub startup_timeout: Duration,
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<(), SimulatorError> {
        let [account] = self.accounts.as_slice() else {
            return Err(SimulatorError::InvalidConfig(format!(
                "expected exactly one account, got {}",
                self.accounts.len()
            )));
        };
        account
            .wallet()
            .map_err(|err| SimulatorError::InvalidConfig(format!("invalid secret key: {err}")))?;

        match self.pacing {
            BlockPacing::Autonomous { interval }
                if interval.is_zero() || interval.subsec_nanos() != 0 =>
            {
                Err(SimulatorError::InvalidConfig(format!(
                    "block interval must be a whole, non-zero number of seconds, got {interval:?}"
                )))
            }
            _ => Ok(()),
        }
    }

    fn pacing_args(&self) -> Vec<String> {
        match self.pacing {
            BlockPacing::Autonomous { interval } => {
                vec!["--block-time".to_string(), interval.as_secs().to_string()]
            }
            BlockPacing::Manual { .. } => vec!["--no-mining".to_string()],
        }
    }
}

struct Launched {
    child: Child,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: ChildStderr,
    provider: Provider<Http>,
    url: String,
}

/// A running simulator. Owns the child process and, until
/// [`SimulatorHandle::disconnect`] hands it back, the run's logger.
pub struct SimulatorHandle<L: RunLogger> {
    child: Child,
    provider: Provider<Http>,
    url: String,
    forwarder: JoinHandle<Result<L, SimulatorError>>,
    // Cancelled once the process output has been fully drained.
    exited: CancellationToken,
}

impl<L: RunLogger> SimulatorHandle<L> {
    /// Starts a fresh chain and funds the configured account.
    ///
    /// On failure the process is stopped and `logger` is closed before the
    /// error is returned.
    pub async fn spawn(config: &SimulatorConfig, mut logger: L) -> Result<Self, SimulatorError> {
        let launched = match launch(config, &mut logger).await {
            Ok(launched) => launched,
            Err(err) => {
                close_after_failure(logger);
                return Err(err);
            }
        };

        let Launched {
            child,
            stdout,
            stderr,
            provider,
            url,
        } = launched;
        let exited = CancellationToken::new();
        let forwarder = tokio::spawn(forward_output(logger, stdout, stderr, exited.clone()));
        let handle = Self {
            child,
            provider,
            url,
            forwarder,
            exited,
        };

        if let Err(err) = handle.fund(&config.accounts).await {
            match handle.disconnect().await {
                Ok(logger) => close_after_failure(logger),
                Err(disconnect_err) => {
                    warn!("Failed to disconnect simulator after funding error: {disconnect_err}")
                }
            }
            return Err(err);
        }

        info!(url = %handle.url, pacing = ?config.pacing, "Simulator ready");
        Ok(handle)
    }

    pub fn provider(&self) -> &Provider<Http> {
        &self.provider
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sends an arbitrary JSON-RPC request to the simulator.
    pub async fn send<T, R>(&self, method: &str, params: T) -> Result<R, SimulatorError>
    where
        T: Debug + Serialize + Send + Sync,
        R: Serialize + DeserializeOwned + Debug + Send,
    {
        self.provider
            .request(method, params)
            .await
            .map_err(|source| SimulatorError::rpc(method, source))
    }

    pub async fn chain_id(&self) -> Result<u64, SimulatorError> {
        let chain_id = self
            .provider
            .get_chainid()
            .await
            .map_err(|source| SimulatorError::rpc("eth_chainId", source))?;
        Ok(chain_id.as_u64())
    }

    pub async fn block_number(&self) -> Result<u64, SimulatorError> {
        let number = self
            .provider
            .get_block_number()
            .await
            .map_err(|source| SimulatorError::rpc("eth_blockNumber", source))?;
        Ok(number.as_u64())
    }

    pub async fn balance(&self, address: Address) -> Result<U256, SimulatorError> {
        self.provider
            .get_balance(address, None)
            .await
            .map_err(|source| SimulatorError::rpc("eth_getBalance", source))
    }

    /// Resolves once the process has closed its output, which only happens
    /// when it exits. Receipt polling retries failed requests forever, so
    /// waits on the chain should be raced against this.
    pub async fn exited(&self) {
        self.exited.cancelled().await
    }

    /// Stops the process, waits for it to exit and returns the logger once
    /// every line the process printed has been written to it.
    pub async fn disconnect(mut self) -> Result<L, SimulatorError> {
        if let Err(err) = self.child.kill().await {
            self.forwarder.abort();
            return Err(SimulatorError::Shutdown(err));
        }
        let logger = self.forwarder.await??;
        info!(url = %self.url, "Simulator disconnected");
        Ok(logger)
    }

    async fn fund(&self, accounts: &[Account]) -> Result<(), SimulatorError> {
        for account in accounts {
            let address = account
                .wallet()
                .map_err(|err| SimulatorError::InvalidConfig(format!("invalid secret key: {err}")))?
                .address();
            let _: Value = self
                .send("anvil_setBalance", (address, account.balance))
                .await?;
            debug!(?address, balance = %account.balance, "Funded account");
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl<L: RunLogger> BlockMiner for SimulatorHandle<L> {
    async fn mine_block(&self) -> Result<(), SimulatorError> {
        let _: Value = self.send("evm_mine", ()).await?;
        Ok(())
    }
}

async fn launch<L: RunLogger>(
    config: &SimulatorConfig,
    logger: &mut L,
) -> Result<Launched, SimulatorError> {
    config.validate()?;

    // Port 0 lets the node bind any free port; the real one is read back
    // from its ready line.
    let mut child = Command::new(&config.program)
        .args(["--host", HOST, "--port", "0"])
        .args(config.pacing_args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(SimulatorError::Spawn)?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        stop_after_failure(&mut child).await;
        return Err(SimulatorError::Startup(
            "simulator output is not captured".to_string(),
        ));
    };
    let mut stdout = BufReader::new(stdout).lines();

    let ready = match timeout(
        config.startup_timeout,
        wait_until_listening(&mut stdout, logger),
    )
    .await
    {
        Ok(ready) => ready,
        Err(_) => Err(SimulatorError::StartupTimeout(config.startup_timeout)),
    };
    let address = match ready {
        Ok(address) => address,
        Err(err) => {
            stop_after_failure(&mut child).await;
            return Err(err);
        }
    };

    let url = format!("http://{address}");
    let provider = match Provider::<Http>::try_from(url.as_str()) {
        Ok(provider) => provider.interval(config.poll_interval),
        Err(err) => {
            stop_after_failure(&mut child).await;
            return Err(SimulatorError::Startup(format!("invalid url {url}: {err}")));
        }
    };

    Ok(Launched {
        child,
        stdout,
        stderr,
        provider,
        url,
    })
}

async fn wait_until_listening<L: RunLogger>(
    stdout: &mut Lines<BufReader<ChildStdout>>,
    logger: &mut L,
) -> Result<SocketAddr, SimulatorError> {
    while let Some(line) = stdout.next_line().await.map_err(SimulatorError::Output)? {
        logger.log(&line).map_err(SimulatorError::LogForwarding)?;
        if let Some(address) = listening_address(&line) {
            return address;
        }
    }
    Err(SimulatorError::Startup(
        "simulator exited before accepting connections".to_string(),
    ))
}

fn listening_address(line: &str) -> Option<Result<SocketAddr, SimulatorError>> {
    let (_, rest) = line.split_once(READY_MARKER)?;
    Some(rest.trim().parse().map_err(|err| {
        SimulatorError::Startup(format!("unexpected listen address in {line:?}: {err}"))
    }))
}

async fn forward_output<L: RunLogger>(
    mut logger: L,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: ChildStderr,
    exited: CancellationToken,
) -> Result<L, SimulatorError> {
    let _exited = exited.drop_guard();
    match pump_lines(&mut logger, stdout, BufReader::new(stderr).lines()).await {
        Ok(()) => Ok(logger),
        Err(err) => {
            close_after_failure(logger);
            Err(err)
        }
    }
}

async fn pump_lines<L: RunLogger>(
    logger: &mut L,
    mut stdout: Lines<BufReader<ChildStdout>>,
    mut stderr: Lines<BufReader<ChildStderr>>,
) -> Result<(), SimulatorError> {
    let (mut stdout_open, mut stderr_open) = (true, true);
    while stdout_open || stderr_open {
        tokio::select! {
            line = stdout.next_line(), if stdout_open => match line.map_err(SimulatorError::Output)? {
                Some(line) => logger.log(&line).map_err(SimulatorError::LogForwarding)?,
                None => stdout_open = false,
            },
            line = stderr.next_line(), if stderr_open => match line.map_err(SimulatorError::Output)? {
                Some(line) => logger.log(&line).map_err(SimulatorError::LogForwarding)?,
                None => stderr_open = false,
            },
        }
    }
    Ok(())
}

async fn stop_after_failure(child: &mut Child) {
    if let Err(err) = child.kill().await {
        warn!("Failed to stop simulator after startup failure: {err}");
    }
}

fn close_after_failure<L: RunLogger>(logger: L) {
    if let Err(err) = logger.close() {
        warn!("Failed to close run log: {err}");
    }
}
