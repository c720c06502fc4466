//! Measures how long a contract deployment takes to confirm on a local
//! simulated chain under different block pacing policies.
//!
//! Each run starts a fresh simulator, funds a single account, submits one
//! deployment and times it until its receipt shows up. With autonomous pacing
//! the simulator mines on a timer; with manual pacing the harness mines a fixed
//! number of blocks itself, one after the other, while waiting for the receipt.

pub mod bench;
pub mod config;
pub mod deploy;
pub mod error;
pub mod logger;
pub mod pacing;
pub mod simulator;

pub use bench::{RunConfig, RunReport, run_all, run_benchmark};
pub use config::{Account, BenchConfig, ContractMetadata};
pub use deploy::{DeployedContract, DeploymentDescriptor, PendingDeployment, deploy};
pub use error::{BenchError, DeployError, PacingError, SimulatorError};
pub use logger::{FileLogger, MemoryLogger, RunLogger};
pub use pacing::{BlockMiner, BlockPacing, advance};
pub use simulator::{SimulatorConfig, SimulatorHandle};
