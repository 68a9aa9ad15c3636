use crate::core::block::BlockHeader;
use crate::core::state::{Account, StateDb};
use crate::core::transaction::{Log, Transaction};
use crate::crypto::{keccak256, Address, Hash};
use crate::error::{NodeError, Result};
use crate::utils::u64_be_trimmed;
use log::debug;
use num_bigint::BigUint;
use once_cell::sync::Lazy;

/// Base cost charged for every transaction
pub const BASE_TX_GAS: u64 = 21_000;
/// Additional cost of a contract creation
pub const CONTRACT_CREATION_GAS: u64 = 32_000;
/// Cost of the token-transfer dispatch entry
pub const TOKEN_TRANSFER_GAS: u64 = 5_000;
/// Cost of the balance-query dispatch entry
pub const BALANCE_OF_GAS: u64 = 400;

// The fixed dispatch table: 4-byte selectors of transfer(address,uint256)
// and balanceOf(address)
const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// Canonical Transfer(address,address,uint256) event signature
static TRANSFER_EVENT_SIG: Lazy<Hash> =
    Lazy::new(|| keccak256(b"Transfer(address,address,uint256)"));

/// Topic marking a contract-creation log
static CONTRACT_CREATED_TOPIC: Lazy<Hash> = Lazy::new(|| Hash::from_slice(&[1]));
/// Topic marking a generic function-call log
static FUNCTION_CALLED_TOPIC: Lazy<Hash> = Lazy::new(|| Hash::from_slice(&[2]));

/// Execution engine configuration
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub chain_id: u64,
    pub block_gas_limit: u64,
    pub min_gas_price: BigUint,
}

/// Result of executing one transaction
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub gas_used: u64,
    /// 1 for success, 0 for failure
    pub status: u64,
    pub logs: Vec<Log>,
    pub contract_address: Option<Address>,
}

/// The restricted account-model evaluator: per-transaction gas accounting,
/// value transfer, contract creation, and a tiny fixed dispatch table.
pub struct ExecutionEngine {
    config: ExecutionConfig,
}

struct GasMeter {
    used: u64,
    limit: u64,
}

impl GasMeter {
    fn new(limit: u64) -> GasMeter {
        GasMeter { used: 0, limit }
    }

    /// Charges gas; on exhaustion pins `used` to the limit so the whole
    /// allowance is consumed
    fn charge(&mut self, amount: u64) -> Result<()> {
        let next = self.used.saturating_add(amount);
        if next > self.limit {
            self.used = self.limit;
            return Err(NodeError::GasLimitExceeded);
        }
        self.used = next;
        Ok(())
    }

    fn remaining(&self) -> u64 {
        self.limit - self.used
    }
}

impl ExecutionEngine {
    pub fn new(config: ExecutionConfig) -> ExecutionEngine {
        ExecutionEngine { config }
    }

    pub fn get_chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn get_min_gas_price(&self) -> &BigUint {
        &self.config.min_gas_price
    }

    /// Executes one transaction against the given world state.
    ///
    /// The signature, nonce, and balance gates fail the whole call with a
    /// typed error and leave the state untouched. Once those gates pass,
    /// gas is bought, the sender nonce advances, and a failure inside the
    /// payload only produces a status-0 result: the gas stays consumed and
    /// the nonce stays advanced.
    pub fn execute_transaction(
        &self,
        state: &StateDb,
        tx: &Transaction,
        _header: &BlockHeader,
    ) -> Result<ExecutionResult> {
        let recovered = tx.recover_sender()?;
        if recovered != *tx.get_from() {
            return Err(NodeError::InvalidSignature(format!(
                "sender mismatch: declared {}, recovered {recovered}",
                tx.get_from()
            )));
        }

        let mut sender = state.get_account(tx.get_from());
        if sender.nonce != tx.get_nonce() {
            return Err(NodeError::InvalidNonce {
                expected: sender.nonce,
                got: tx.get_nonce(),
            });
        }

        let gas_cost = tx.get_gas_price() * tx.get_gas_limit();
        let total_cost = &gas_cost + tx.get_value();
        if sender.balance < total_cost {
            return Err(NodeError::InsufficientBalance {
                required: total_cost.to_string(),
                available: sender.balance.to_string(),
            });
        }

        // Buy the full gas allowance up front and advance the nonce; from
        // here on the transaction is committed to a receipt
        let original_nonce = sender.nonce;
        sender.balance -= &gas_cost;
        sender.nonce += 1;

        let mut meter = GasMeter::new(tx.get_gas_limit());
        let mut logs = Vec::new();
        let mut contract_address = None;

        let outcome = self.run_payload(
            state,
            tx,
            original_nonce,
            &mut meter,
            &mut logs,
            &mut contract_address,
        );

        match outcome {
            Ok(()) => {
                sender.balance -= tx.get_value();
                let remaining = meter.remaining();
                if remaining > 0 {
                    sender.balance += tx.get_gas_price() * remaining;
                }
                state.set_account(tx.get_from(), sender);

                Ok(ExecutionResult {
                    gas_used: meter.used,
                    status: 1,
                    logs,
                    contract_address,
                })
            }
            Err(NodeError::GasLimitExceeded) => {
                // Out of gas: the allowance is gone and the payload's
                // effects were never applied, but the nonce bump and the
                // gas purchase stand
                debug!("Transaction {} ran out of gas", tx.get_hash());
                state.set_account(tx.get_from(), sender);

                Ok(ExecutionResult {
                    gas_used: meter.used,
                    status: 0,
                    logs: Vec::new(),
                    contract_address,
                })
            }
            Err(e) => Err(e),
        }
    }

    // All gas for a path is charged before any of its state mutation, so
    // an out-of-gas abort never needs an undo
    fn run_payload(
        &self,
        state: &StateDb,
        tx: &Transaction,
        original_nonce: u64,
        meter: &mut GasMeter,
        logs: &mut Vec<Log>,
        contract_address: &mut Option<Address>,
    ) -> Result<()> {
        meter.charge(BASE_TX_GAS)?;

        if tx.is_contract_creation() {
            meter.charge(CONTRACT_CREATION_GAS)?;

            let addr = contract_address_for(tx.get_from(), original_nonce);
            *contract_address = Some(addr);
            let contract = Account {
                nonce: 1,
                balance: tx.get_value().clone(),
                ..Account::default()
            };
            state.set_account(&addr, contract);
            logs.push(Log::pending(
                addr,
                vec![*CONTRACT_CREATED_TOPIC],
                tx.get_data().to_vec(),
            ));
            return Ok(());
        }

        let to = tx
            .get_to()
            .copied()
            .expect("non-creation transaction always carries a recipient");

        let mut pending_log = None;
        if tx.get_data().len() >= 4 {
            let selector: [u8; 4] = tx.get_data()[..4]
                .try_into()
                .expect("slice of length 4 converts to the selector array");
            match selector {
                TRANSFER_SELECTOR => {
                    meter.charge(TOKEN_TRANSFER_GAS)?;
                    pending_log = Some(Log::pending(
                        to,
                        vec![
                            *TRANSFER_EVENT_SIG,
                            Hash::from_slice(tx.get_from().as_bytes()),
                        ],
                        tx.get_data()[4..].to_vec(),
                    ));
                }
                BALANCE_OF_SELECTOR => {
                    meter.charge(BALANCE_OF_GAS)?;
                }
                _ => {
                    pending_log = Some(Log::pending(
                        to,
                        vec![*FUNCTION_CALLED_TOPIC],
                        tx.get_data().to_vec(),
                    ));
                }
            }
        }

        let mut recipient = state.get_account(&to);
        recipient.balance += tx.get_value();
        state.set_account(&to, recipient);

        if let Some(log) = pending_log {
            logs.push(log);
        }
        Ok(())
    }

    /// Simulates the transaction on a state copy and returns the gas used
    /// with a 10% headroom buffer. The live state is never touched.
    pub fn estimate_gas(
        &self,
        state: &StateDb,
        tx: &Transaction,
        header: &BlockHeader,
    ) -> Result<u64> {
        let simulation = state.copy();
        let result = self.execute_transaction(&simulation, tx, header)?;
        Ok(result.gas_used * 11 / 10)
    }

    /// Simulates the transaction on a state copy and returns the call's
    /// return bytes (always empty in this evaluator)
    pub fn call(&self, state: &StateDb, tx: &Transaction, header: &BlockHeader) -> Result<Vec<u8>> {
        let simulation = state.copy();
        self.execute_transaction(&simulation, tx, header)?;
        Ok(Vec::new())
    }
}

/// Contract address derivation: the Keccak-256 tail of the sender and its
/// pre-transaction nonce (big-endian, minimal length)
pub fn contract_address_for(sender: &Address, nonce: u64) -> Address {
    let mut data = Vec::with_capacity(28);
    data.extend_from_slice(sender.as_bytes());
    data.extend_from_slice(&u64_be_trimmed(nonce));
    let digest = keccak256(data);
    Address::from_slice(&digest.as_bytes()[12..])
}
