use crate::core::Block;
use crate::error::{NodeError, Result};
use num_bigint::BigUint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread;

/// Nonces tried between cancellation checks
const NONCE_BATCH: u64 = 4096;

/// Proof-of-work engine. The difficulty is a bit count; the target is
/// `2^(256 - difficulty)` and a header hash qualifies when its 256-bit
/// integer interpretation is strictly below the target.
pub struct ProofOfWork {
    difficulty: BigUint,
    target: BigUint,
}

impl ProofOfWork {
    pub fn new(difficulty: BigUint) -> Result<ProofOfWork> {
        let bits = u64::try_from(&difficulty)
            .map_err(|_| NodeError::Config("difficulty out of range".to_string()))?;
        if bits == 0 || bits > 255 {
            return Err(NodeError::Config(format!(
                "difficulty must be between 1 and 255 bits, got {bits}"
            )));
        }
        let target = Self::target(&difficulty);
        Ok(ProofOfWork { difficulty, target })
    }

    /// `2^(256 - d)` as a 256-bit integer
    pub fn target(difficulty: &BigUint) -> BigUint {
        let bits = u64::try_from(difficulty).unwrap_or(256).min(256);
        BigUint::from(1u8) << (256 - bits) as usize
    }

    pub fn get_difficulty(&self) -> &BigUint {
        &self.difficulty
    }

    /// Searches nonces from 0 until the header hash falls below the
    /// target, then seals the winning hash into the block.
    ///
    /// Checks the cancellation flag between nonce batches; on
    /// cancellation the candidate is left unsealed and `Ok(false)` is
    /// returned with no other state changes.
    pub fn mine(&self, block: &mut Block, cancel: &AtomicBool) -> Result<bool> {
        let mut nonce: u64 = 0;
        loop {
            if nonce % NONCE_BATCH == 0 && cancel.load(Ordering::Relaxed) {
                return Ok(false);
            }

            block.header_mut().set_nonce(nonce);
            let hash = block.compute_hash();
            let value = BigUint::from_bytes_be(hash.as_bytes());
            if value < self.target {
                block.seal();
                return Ok(true);
            }

            nonce = nonce.checked_add(1).ok_or_else(|| {
                NodeError::InvalidBlock("nonce space exhausted".to_string())
            })?;
        }
    }

    /// The nonce search striped across worker threads: worker `i` tries
    /// nonces `i, i + n, i + 2n, …` and the first success commits.
    ///
    /// Falls back to the single-threaded search for `threads <= 1`.
    pub fn mine_parallel(
        &self,
        block: &mut Block,
        threads: usize,
        cancel: &AtomicBool,
    ) -> Result<bool> {
        if threads <= 1 {
            return self.mine(block, cancel);
        }

        let stride = threads as u64;
        let found = AtomicBool::new(false);
        let winner: Mutex<Option<u64>> = Mutex::new(None);

        thread::scope(|scope| {
            for worker in 0..stride {
                let mut header = block.get_header().clone();
                let target = &self.target;
                let found = &found;
                let winner = &winner;
                scope.spawn(move || {
                    let mut nonce = worker;
                    let mut iterations: u64 = 0;
                    loop {
                        if iterations % NONCE_BATCH == 0
                            && (found.load(Ordering::Relaxed) || cancel.load(Ordering::Relaxed))
                        {
                            return;
                        }

                        header.set_nonce(nonce);
                        let value = BigUint::from_bytes_be(header.compute_hash().as_bytes());
                        if value < *target {
                            // Only the first success commits
                            if !found.swap(true, Ordering::SeqCst) {
                                *winner
                                    .lock()
                                    .expect("Failed to acquire lock on mining winner - this should never happen") =
                                    Some(nonce);
                            }
                            return;
                        }

                        iterations += 1;
                        nonce = match nonce.checked_add(stride) {
                            Some(next) => next,
                            None => return,
                        };
                    }
                });
            }
        });

        let winning_nonce = *winner
            .lock()
            .expect("Failed to acquire lock on mining winner - this should never happen");
        match winning_nonce {
            Some(nonce) => {
                block.header_mut().set_nonce(nonce);
                block.seal();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The same target test as mining, without mutating the block
    pub fn validate(block: &Block) -> bool {
        let target = Self::target(block.get_header().get_difficulty());
        let value = BigUint::from_bytes_be(block.compute_hash().as_bytes());
        value < target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BlockHeader;
    use crate::crypto::{Address, Hash};

    fn candidate(difficulty: u64) -> Block {
        let header = BlockHeader::new(
            Hash::from_slice(&[0xcd; 32]),
            1,
            8_000_000,
            1_700_000_000,
            BigUint::from(difficulty),
            Address::zero(),
            Vec::new(),
        );
        Block::new(header, Vec::new())
    }

    #[test]
    fn target_scales_with_difficulty() {
        let easy = ProofOfWork::target(&BigUint::from(1u8));
        let hard = ProofOfWork::target(&BigUint::from(8u8));
        assert!(hard < easy);
        assert_eq!(easy, BigUint::from(1u8) << 255);
        assert_eq!(hard, BigUint::from(1u8) << 248);
    }

    #[test]
    fn rejects_unusable_difficulty() {
        assert!(ProofOfWork::new(BigUint::from(0u8)).is_err());
        assert!(ProofOfWork::new(BigUint::from(256u32)).is_err());
        assert!(ProofOfWork::new(BigUint::from(4u8)).is_ok());
    }

    #[test]
    fn mined_block_validates() {
        let pow = ProofOfWork::new(BigUint::from(4u8)).unwrap();
        let mut block = candidate(4);
        let cancel = AtomicBool::new(false);

        assert!(pow.mine(&mut block, &cancel).unwrap());
        assert!(ProofOfWork::validate(&block));
        assert_eq!(*block.get_hash(), block.compute_hash());

        let value = BigUint::from_bytes_be(block.get_hash().as_bytes());
        assert!(value < ProofOfWork::target(&BigUint::from(4u8)));
    }

    #[test]
    fn cancellation_stops_the_search() {
        // A 255-bit difficulty is effectively unmineable, so only the
        // cancellation path can return
        let pow = ProofOfWork::new(BigUint::from(255u32)).unwrap();
        let mut block = candidate(255);
        let cancel = AtomicBool::new(true);

        assert!(!pow.mine(&mut block, &cancel).unwrap());
    }

    #[test]
    fn parallel_mining_finds_a_valid_block() {
        let pow = ProofOfWork::new(BigUint::from(8u8)).unwrap();
        let mut block = candidate(8);
        let cancel = AtomicBool::new(false);

        assert!(pow.mine_parallel(&mut block, 4, &cancel).unwrap());
        assert!(ProofOfWork::validate(&block));
        assert_eq!(*block.get_hash(), block.compute_hash());
    }

    #[test]
    fn parallel_mining_honors_cancellation() {
        let pow = ProofOfWork::new(BigUint::from(255u32)).unwrap();
        let mut block = candidate(255);
        let cancel = AtomicBool::new(true);

        assert!(!pow.mine_parallel(&mut block, 4, &cancel).unwrap());
    }

    #[test]
    fn unmined_block_fails_validation() {
        // With 16 leading zero bits required, a fresh candidate is
        // overwhelmingly unlikely to qualify by accident
        let block = candidate(16);
        assert!(!ProofOfWork::validate(&block));
    }
}
