use std::{io, time::Duration};

use ethers::{providers::ProviderError, signers::WalletError, types::TxHash};

#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error("Invalid simulator configuration: {0}")]
    InvalidConfig(String),
    #[error("Failed to start simulator process: {0}")]
    Spawn(#[source] io::Error),
    #[error("Simulator failed during startup: {0}")]
    Startup(String),
    #[error("Simulator did not accept connections within {0:?}")]
    StartupTimeout(Duration),
    #[error("Failed to read simulator output: {0}")]
    Output(#[source] io::Error),
    #[error("Failed to write simulator output to the run log: {0}")]
    LogForwarding(#[source] io::Error),
    #[error("{method}: {source}")]
    Rpc {
        method: String,
        #[source]
        source: ProviderError,
    },
    #[error("Simulator exited while the run was in progress")]
    Exited,
    #[error("Failed to stop simulator process: {0}")]
    Shutdown(#[source] io::Error),
    #[error("Log forwarding task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SimulatorError {
    pub(crate) fn rpc(method: &str, source: ProviderError) -> Self {
        Self::Rpc {
            method: method.to_string(),
            source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("Failed to parse contract artifact: {0}")]
    Artifact(#[from] serde_json::Error),
    #[error("Contract bytecode is not valid hex: {0}")]
    Bytecode(#[from] hex::FromHexError),
    #[error("Contract bytecode is empty")]
    EmptyBytecode,
    #[error("Constructor arguments do not match the ABI: {0}")]
    Encoding(#[from] ethers::abi::Error),
    #[error("Constructor arguments were given but the ABI has no constructor")]
    NoConstructor,
    #[error("Deployer cannot pay for the deployment: {0}")]
    InsufficientFunds(String),
    #[error("Failed to submit deployment transaction: {0}")]
    Submission(String),
    #[error("Failed while waiting for deployment confirmation: {0}")]
    Confirmation(#[from] ProviderError),
    #[error("Deployment transaction {0:#x} was dropped before confirmation")]
    Dropped(TxHash),
    #[error("Deployment transaction {0:#x} reverted")]
    Reverted(TxHash),
    #[error("Receipt of deployment transaction {0:#x} has no contract address")]
    MissingContractAddress(TxHash),
}

#[derive(Debug, thiserror::Error)]
pub enum PacingError {
    #[error("Block pacing aborted after {mined} of {requested} blocks: {source}")]
    Aborted {
        mined: u64,
        requested: u64,
        #[source]
        source: SimulatorError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("Run log error: {0}")]
    RunLog(#[source] io::Error),
    #[error("Invalid deployer key: {0}")]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Simulator(#[from] SimulatorError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
    #[error(transparent)]
    Pacing(#[from] PacingError),
}
