use std::fmt::Display;

use ethers::{
    abi::{Abi, Token},
    providers::{JsonRpcClient, Middleware, PendingTransaction},
    types::{Address, Bytes, Eip1559TransactionRequest, TxHash, U64},
};
use serde::Deserialize;
use tracing::debug;

use crate::error::DeployError;

#[derive(Deserialize)]
struct ContractArtifact {
    abi: Abi,
    bytecode: String,
}

/// What gets deployed: ABI, creation bytecode and constructor arguments.
#[derive(Debug, Clone)]
pub struct DeploymentDescriptor {
    abi: Abi,
    bytecode: Bytes,
    args: Vec<Token>,
}

impl DeploymentDescriptor {
    pub fn new(abi: Abi, bytecode: Bytes, args: Vec<Token>) -> Self {
        Self {
            abi,
            bytecode,
            args,
        }
    }

    /// Reads a build artifact of the form `{ "abi": [...], "bytecode": "0x..." }`.
    pub fn from_artifact(json: &str, args: Vec<Token>) -> Result<Self, DeployError> {
        let artifact: ContractArtifact = serde_json::from_str(json)?;
        let bytecode = artifact.bytecode.trim();
        let bytecode = hex::decode(bytecode.strip_prefix("0x").unwrap_or(bytecode))?;
        Ok(Self::new(artifact.abi, bytecode.into(), args))
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    pub fn bytecode(&self) -> &Bytes {
        &self.bytecode
    }

    pub fn args(&self) -> &[Token] {
        &self.args
    }

    /// Bytecode followed by the ABI-encoded constructor arguments.
    pub fn creation_code(&self) -> Result<Bytes, DeployError> {
        if self.bytecode.is_empty() {
            return Err(DeployError::EmptyBytecode);
        }
        match self.abi.constructor() {
            Some(constructor) => Ok(constructor
                .encode_input(self.bytecode.to_vec(), &self.args)?
                .into()),
            None if self.args.is_empty() => Ok(self.bytecode.clone()),
            None => Err(DeployError::NoConstructor),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployedContract {
    pub address: Address,
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
}

/// A submitted deployment that has not been observed on-chain yet.
pub struct PendingDeployment<'a, P: JsonRpcClient> {
    tx_hash: TxHash,
    pending: PendingTransaction<'a, P>,
}

impl<P: JsonRpcClient> PendingDeployment<'_, P> {
    pub fn tx_hash(&self) -> TxHash {
        self.tx_hash
    }

    /// Resolves once the deployment receipt is available, which only happens
    /// after a block including the transaction has been mined.
    pub async fn confirmed(self) -> Result<DeployedContract, DeployError> {
        let tx_hash = self.tx_hash;
        let receipt = self.pending.await?.ok_or(DeployError::Dropped(tx_hash))?;

        if receipt.status == Some(U64::zero()) {
            return Err(DeployError::Reverted(tx_hash));
        }
        let address = receipt
            .contract_address
            .ok_or(DeployError::MissingContractAddress(tx_hash))?;

        debug!(?address, ?tx_hash, "Deployment confirmed");
        Ok(DeployedContract {
            address,
            tx_hash,
            block_number: receipt.block_number.map(|number| number.as_u64()),
        })
    }
}

/// Submits a contract-creation transaction signed by `client`.
///
/// Encoding happens before anything reaches the chain, so a descriptor whose
/// arguments do not match its ABI never produces a transaction. The returned
/// value must be awaited with [`PendingDeployment::confirmed`] to learn the
/// contract address.
pub async fn deploy<'a, M: Middleware>(
    client: &'a M,
    descriptor: &DeploymentDescriptor,
) -> Result<PendingDeployment<'a, M::Provider>, DeployError> {
    let creation_code = descriptor.creation_code()?;
    let tx = Eip1559TransactionRequest::new().data(creation_code);

    let pending = client
        .send_transaction(tx, None)
        .await
        .map_err(submission_error)?;
    let tx_hash = *pending;

    debug!(?tx_hash, "Deployment submitted");
    Ok(PendingDeployment { tx_hash, pending })
}

fn submission_error(err: impl Display) -> DeployError {
    let message = err.to_string();
    if is_insufficient_funds(&message) {
        DeployError::InsufficientFunds(message)
    } else {
        DeployError::Submission(message)
    }
}

pub(crate) fn is_insufficient_funds(message: &str) -> bool {
    message.to_ascii_lowercase().contains("insufficient funds")
}

#[cfg(test)]
mod tests {
    use ethers::providers::{Http, Provider};

    use super::*;
    use crate::config::{ContractMetadata, EXAMPLE_CONTRACT_ARTIFACT};

    fn example_descriptor(args: Vec<Token>) -> DeploymentDescriptor {
        DeploymentDescriptor::from_artifact(EXAMPLE_CONTRACT_ARTIFACT, args).unwrap()
    }

    #[test]
    fn creation_code_appends_encoded_arguments() {
        let args = ContractMetadata::default().constructor_args();
        let descriptor = example_descriptor(args.clone());

        let code = descriptor.creation_code().unwrap();

        let bytecode = descriptor.bytecode().to_vec();
        assert_eq!(&code[..bytecode.len()], bytecode.as_slice());
        assert_eq!(&code[bytecode.len()..], ethers::abi::encode(&args).as_slice());
    }

    #[test]
    fn mismatched_arguments_are_an_encoding_error() {
        let descriptor = example_descriptor(vec![Token::Uint(1.into())]);

        assert!(matches!(
            descriptor.creation_code(),
            Err(DeployError::Encoding(_))
        ));
    }

    #[test]
    fn arguments_without_constructor_are_rejected() {
        let json = r#"{ "abi": [], "bytecode": "0x6000" }"#;
        let with_args =
            DeploymentDescriptor::from_artifact(json, vec![Token::Bool(true)]).unwrap();
        let without_args = DeploymentDescriptor::from_artifact(json, Vec::new()).unwrap();

        assert!(matches!(
            with_args.creation_code(),
            Err(DeployError::NoConstructor)
        ));
        assert_eq!(
            without_args.creation_code().unwrap(),
            Bytes::from(vec![0x60, 0x00])
        );
    }

    #[test]
    fn malformed_bytecode_is_rejected() {
        let json = r#"{ "abi": [], "bytecode": "0xzz" }"#;

        assert!(matches!(
            DeploymentDescriptor::from_artifact(json, Vec::new()),
            Err(DeployError::Bytecode(_))
        ));
    }

    #[test]
    fn empty_bytecode_is_rejected() {
        let json = r#"{ "abi": [], "bytecode": "0x" }"#;
        let descriptor = DeploymentDescriptor::from_artifact(json, Vec::new()).unwrap();

        assert!(matches!(
            descriptor.creation_code(),
            Err(DeployError::EmptyBytecode)
        ));
    }

    #[test]
    fn malformed_artifact_is_rejected() {
        assert!(matches!(
            DeploymentDescriptor::from_artifact("{ \"abi\": 3 }", Vec::new()),
            Err(DeployError::Artifact(_))
        ));
    }

    #[tokio::test]
    async fn encoding_error_is_raised_before_submission() {
        // Nothing listens on this port; reaching the network would fail differently.
        let provider = Provider::<Http>::try_from("http://127.0.0.1:9").unwrap();
        let descriptor = example_descriptor(Vec::new());

        let result = deploy(&provider, &descriptor).await;

        assert!(matches!(result, Err(DeployError::Encoding(_))));
    }

    #[test]
    fn insufficient_funds_messages_are_recognised() {
        assert!(is_insufficient_funds(
            "(code: -32003, message: Insufficient funds for gas * price + value, data: None)"
        ));
        assert!(is_insufficient_funds("insufficient funds for transfer"));
        assert!(!is_insufficient_funds("nonce too low"));
    }

    #[test]
    fn submission_errors_are_classified() {
        assert!(matches!(
            submission_error("insufficient funds for gas * price + value"),
            DeployError::InsufficientFunds(_)
        ));
        assert!(matches!(
            submission_error("connection refused"),
            DeployError::Submission(_)
        ));
    }
}
