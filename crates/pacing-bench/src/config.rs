use std::{path::PathBuf, time::Duration};

use ethers::{
    abi::Token,
    signers::{LocalWallet, WalletError},
    types::U256,
};

use crate::{
    deploy::DeploymentDescriptor, error::DeployError, pacing::BlockPacing,
    simulator::SimulatorConfig,
};

// Fixed test identity funded on every simulator instance.
pub const DEFAULT_SECRET_KEY: &str =
    "0x29f3edee0ad3abf8e2699402e0e28cd6492c9be7eaab00d732a791c33552f797";
pub const DEFAULT_BALANCE: u128 = 0xff_ffff_ffff_ffff_ffff;

pub const CONTRACT_NAME: &str = "ExampleContract";
pub const CONTRACT_SYMBOL: &str = "ECT";
pub const CONTRACT_URI: &str = "some.invalid.uri";

// Hand-assembled creation code: it copies a 10 byte runtime that returns 42 and
// ignores the constructor arguments appended after it.
pub const EXAMPLE_CONTRACT_ARTIFACT: &str =
    include_str!("../../../fixtures/contracts/ExampleContract.json");

pub const DEFAULT_SIMULATOR_PROGRAM: &str = "anvil";
pub const DEFAULT_LOGS_DIR: &str = "./logs";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub secret_key: String,
    pub balance: U256,
}

impl Account {
    pub fn new(secret_key: impl Into<String>, balance: U256) -> Self {
        Self {
            secret_key: secret_key.into(),
            balance,
        }
    }

    pub fn wallet(&self) -> Result<LocalWallet, WalletError> {
        self.secret_key.parse()
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::new(DEFAULT_SECRET_KEY, U256::from(DEFAULT_BALANCE))
    }
}

/// Constructor arguments of the deployed example contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractMetadata {
    pub name: String,
    pub symbol: String,
    pub uri: String,
}

impl ContractMetadata {
    pub fn constructor_args(&self) -> Vec<Token> {
        vec![
            Token::String(self.name.clone()),
            Token::String(self.symbol.clone()),
            Token::String(self.uri.clone()),
            Token::Array(Vec::new()),
        ]
    }
}

impl Default for ContractMetadata {
    fn default() -> Self {
        Self {
            name: CONTRACT_NAME.to_string(),
            symbol: CONTRACT_SYMBOL.to_string(),
            uri: CONTRACT_URI.to_string(),
        }
    }
}

/// Everything a run needs besides its pacing policy. Shared read-only by
/// every run of a sequence.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Path or name of the simulator binary.
    pub simulator_program: PathBuf,
    /// Directory receiving one log file per run.
    pub logs_dir: PathBuf,
    pub account: Account,
    pub contract: ContractMetadata,
    /// Contract artifact JSON with `abi` and `bytecode`.
    pub artifact: String,
    /// How often receipts are polled.
    pub poll_interval: Duration,
    /// Upper bound for the simulator to start accepting connections.
    pub startup_timeout: Duration,
}

impl BenchConfig {
    pub fn descriptor(&self) -> Result<DeploymentDescriptor, DeployError> {
        DeploymentDescriptor::from_artifact(&self.artifact, self.contract.constructor_args())
    }

    pub fn simulator_config(&self, pacing: BlockPacing) -> SimulatorConfig {
        SimulatorConfig {
            program: self.simulator_program.clone(),
            accounts: vec![self.account.clone()],
            pacing,
            poll_interval: self.poll_interval,
            startup_timeout: self.startup_timeout,
        }
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            simulator_program: PathBuf::from(DEFAULT_SIMULATOR_PROGRAM),
            logs_dir: PathBuf::from(DEFAULT_LOGS_DIR),
            account: Account::default(),
            contract: ContractMetadata::default(),
            artifact: EXAMPLE_CONTRACT_ARTIFACT.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_account_is_usable() {
        let account = Account::default();

        assert!(account.wallet().is_ok());
        assert_eq!(
            account.balance,
            U256::from_str_radix("ffffffffffffffffff", 16).unwrap()
        );
    }

    #[test]
    fn malformed_secret_key_is_rejected() {
        assert!(Account::new("0x1234", U256::one()).wallet().is_err());
        assert!(Account::new("not hex", U256::one()).wallet().is_err());
    }

    #[test]
    fn default_descriptor_builds() {
        let descriptor = BenchConfig::default().descriptor().unwrap();

        assert_eq!(descriptor.args().len(), 4);
        assert!(descriptor.abi().constructor().is_some());
        assert!(descriptor.creation_code().is_ok());
    }

    #[test]
    fn simulator_config_carries_the_single_account() {
        let bench = BenchConfig::default();
        let config = bench.simulator_config(BlockPacing::Manual { blocks: 12 });

        assert_eq!(config.accounts, vec![bench.account.clone()]);
        assert_eq!(config.pacing, BlockPacing::Manual { blocks: 12 });
        assert_eq!(config.program, bench.simulator_program);
    }
}
