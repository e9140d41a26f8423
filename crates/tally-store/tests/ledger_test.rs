//! End-to-end ledger tests: validation-gated commit, tail removal and the
//! query surface, against both backends.

use tally_core::constants::ChainParams;
use tally_core::crypto::{sign_transaction, KeyPair};
use tally_core::error::{BlockError, TallyError, TransactionError};
use tally_core::script::Script;
use tally_core::traits::ChainView;
use tally_core::types::{Block, Hash256, OutPoint, Transaction, TransactionInput, TransactionOutput};
use tally_store::{Ledger, LedgerConfig, MemoryKv};

const T0: u64 = 1_700_000_000_000;

fn key(seed: u8) -> KeyPair {
    KeyPair::from_secret_bytes([seed; 32])
}

fn memory_ledger() -> Ledger<MemoryKv> {
    Ledger::new(MemoryKv::new(), ChainParams::default())
}

fn reward(to: u8, value: u64) -> Transaction {
    Transaction {
        inputs: vec![],
        outputs: vec![TransactionOutput::to_address(value, &key(to).address())],
    }
}

fn spend(owner: u8, from: OutPoint, outs: &[(u8, u64)]) -> Transaction {
    let mut tx = Transaction {
        inputs: vec![TransactionInput { previous_output: from, unlock_script: Script::new() }],
        outputs: outs
            .iter()
            .map(|(to, value)| TransactionOutput::to_address(*value, &key(*to).address()))
            .collect(),
    };
    sign_transaction(&mut tx, &key(owner));
    tx
}

fn next_block(chain: &dyn ChainView, transactions: Vec<Transaction>) -> Block {
    let (height, previous_hash, timestamp) = match chain.tail_block().unwrap() {
        Some(tail) => (tail.height + 1, tail.hash().unwrap(), tail.timestamp + 1_000),
        None => (1, Hash256::ZERO, T0),
    };
    Block { height, previous_hash, timestamp, nonce: "00".repeat(32), transactions }
}

fn first_output(tx: &Transaction) -> OutPoint {
    OutPoint { transaction_hash: tx.hash(), index: 0 }
}

/// Commits block 1 paying 1,000,000 to key 1. Returns the funded output.
fn fund_alice(ledger: &Ledger<MemoryKv>) -> OutPoint {
    let coinbase = reward(1, 1_000_000);
    let block = next_block(ledger, vec![coinbase.clone()]);
    assert!(ledger.add_block(&block).unwrap());
    first_output(&coinbase)
}

// ---------------------------------------------------------------------------
// Empty ledger
// ---------------------------------------------------------------------------

#[test]
fn empty_ledger_queries() {
    let ledger = memory_ledger();
    assert_eq!(ledger.block_height().unwrap(), 0);
    assert_eq!(ledger.transaction_count().unwrap(), 0);
    assert_eq!(ledger.output_count().unwrap(), 0);
    assert!(ledger.tail_block().unwrap().is_none());
    assert!(ledger.block_by_height(1).unwrap().is_none());
    assert!(ledger.dump().unwrap().is_empty());
}

#[test]
fn delete_tail_on_empty_ledger_is_noop() {
    let ledger = memory_ledger();
    assert!(ledger.delete_tail_block().unwrap().is_none());
    assert_eq!(ledger.delete_blocks_from(1).unwrap(), 0);
    assert!(ledger.dump().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

#[test]
fn first_block_commits_all_indexes() {
    let ledger = memory_ledger();
    let coinbase = reward(1, 1_000_000);
    let block = next_block(&ledger, vec![coinbase.clone()]);
    assert!(ledger.add_block(&block).unwrap());

    let block_hash = block.hash().unwrap();
    let tx_hash = coinbase.hash();
    let id = first_output(&coinbase);
    let alice = key(1).address();

    assert_eq!(ledger.block_height().unwrap(), 1);
    assert_eq!(ledger.transaction_count().unwrap(), 1);
    assert_eq!(ledger.output_count().unwrap(), 1);
    assert_eq!(ledger.tail_block().unwrap(), Some(block.clone()));
    assert_eq!(ledger.block_by_hash(&block_hash).unwrap(), Some(block));
    assert!(ledger.is_hash_used(&block_hash).unwrap());
    assert!(ledger.is_hash_used(&tx_hash).unwrap());
    assert!(ledger.is_address_used(&alice).unwrap());

    let tx = ledger.transaction_by_hash(&tx_hash).unwrap().unwrap();
    assert_eq!(tx.transaction_height, 1);
    assert_eq!(tx.block_height, 1);
    assert_eq!(ledger.transaction_by_height(1).unwrap(), Some(tx.clone()));

    let output = ledger.unspent_output_by_id(&id).unwrap().unwrap();
    assert_eq!(output.output_height, 1);
    assert_eq!(output.address, alice);
    assert_eq!(output.output.value, 1_000_000);
    assert_eq!(ledger.output_by_height(1).unwrap(), Some(output.clone()));
    assert_eq!(ledger.output_by_address(&alice).unwrap(), Some(output.clone()));
    assert_eq!(ledger.unspent_output_by_address(&alice).unwrap(), Some(output));
    assert!(ledger.spent_output_by_id(&id).unwrap().is_none());
    assert_eq!(ledger.source_transaction(&id).unwrap(), Some(tx));
    assert!(ledger.destination_transaction(&id).unwrap().is_none());
}

#[test]
fn spend_moves_output_to_spent_indexes() {
    let ledger = memory_ledger();
    let coin = fund_alice(&ledger);
    let fee = 100_000;
    let payment = spend(1, coin, &[(2, 400_000), (3, 500_000)]);
    let coinbase = reward(9, 50 + fee);
    let block = next_block(&ledger, vec![coinbase, payment.clone()]);
    assert!(ledger.add_block(&block).unwrap());

    assert_eq!(ledger.block_height().unwrap(), 2);
    assert_eq!(ledger.transaction_count().unwrap(), 3);
    assert_eq!(ledger.output_count().unwrap(), 4);

    // The prior output is spent.
    assert!(ledger.unspent_output_by_id(&coin).unwrap().is_none());
    let spent = ledger.spent_output_by_id(&coin).unwrap().unwrap();
    assert_eq!(spent.output_height, 1);
    let alice = key(1).address();
    assert!(ledger.unspent_output_by_address(&alice).unwrap().is_none());
    assert_eq!(ledger.spent_output_by_address(&alice).unwrap(), Some(spent));
    let destination = ledger.destination_transaction(&coin).unwrap().unwrap();
    assert_eq!(destination.hash, payment.hash());
    assert_eq!(destination.transaction_height, 3);
    assert_eq!(destination.index_in_block, 1);

    // The two new outputs are unspent, with sequential output heights.
    for (index, seed, value, height) in [(0u64, 2u8, 400_000u64, 3u64), (1, 3, 500_000, 4)] {
        let id = OutPoint { transaction_hash: payment.hash(), index };
        let output = ledger.unspent_output_by_id(&id).unwrap().unwrap();
        assert_eq!(output.output.value, value);
        assert_eq!(output.output_height, height);
        assert_eq!(output.address, key(seed).address());
        assert_eq!(output.block_height, 2);
    }
}

#[test]
fn transactions_in_range_pages_by_height() {
    let ledger = memory_ledger();
    let coin = fund_alice(&ledger);
    let block = next_block(&ledger, vec![reward(9, 50), spend(1, coin, &[(2, 900_000)])]);
    assert!(ledger.add_block(&block).unwrap());

    let all = ledger.transactions_in_range(1, 10).unwrap();
    assert_eq!(all.iter().map(|t| t.transaction_height).collect::<Vec<_>>(), vec![1, 2, 3]);
    let page = ledger.transactions_in_range(2, 1).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].transaction_height, 2);
    assert!(ledger.transactions_in_range(4, 5).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Rejection
// ---------------------------------------------------------------------------

#[test]
fn rejection_is_idempotent_and_leaves_store_untouched() {
    let ledger = memory_ledger();
    fund_alice(&ledger);
    let before = ledger.dump().unwrap();

    let mut bad = next_block(&ledger, vec![reward(9, 50)]);
    bad.previous_hash = Hash256([0xee; 32]);

    assert!(!ledger.add_block(&bad).unwrap());
    assert!(!ledger.add_block(&bad).unwrap());
    assert_eq!(ledger.dump().unwrap(), before);

    let first = ledger.check_block(&bad).unwrap_err();
    let second = ledger.check_block(&bad).unwrap_err();
    assert!(matches!(first, TallyError::Block(BlockError::InvalidPrevHash { .. })), "got: {first:?}");
    assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn double_spend_across_blocks_rejected() {
    let ledger = memory_ledger();
    let coin = fund_alice(&ledger);
    let block = next_block(&ledger, vec![reward(9, 50), spend(1, coin, &[(2, 900_000)])]);
    assert!(ledger.add_block(&block).unwrap());

    let again = next_block(&ledger, vec![reward(8, 50), spend(1, coin, &[(3, 800_000)])]);
    assert!(!ledger.add_block(&again).unwrap());
    let err = ledger.check_block(&again).unwrap_err();
    assert!(
        matches!(
            err,
            TallyError::Block(BlockError::TransactionError { index: 1, source: TransactionError::UnknownUtxo(_) })
        ),
        "got: {err:?}"
    );
    assert_eq!(ledger.block_height().unwrap(), 2);
}

#[test]
fn committed_transaction_cannot_be_replayed() {
    let ledger = memory_ledger();
    let coin = fund_alice(&ledger);
    let payment = spend(1, coin, &[(2, 900_000)]);
    let block = next_block(&ledger, vec![reward(9, 50), payment.clone()]);
    assert!(ledger.add_block(&block).unwrap());
    let before = ledger.dump().unwrap();

    let replay = next_block(&ledger, vec![reward(8, 50), payment]);
    assert!(!ledger.add_block(&replay).unwrap());
    let err = ledger.check_block(&replay).unwrap_err();
    assert!(matches!(err, TallyError::Block(BlockError::HashAlreadyUsed(_))), "got: {err:?}");
    assert_eq!(ledger.dump().unwrap(), before);
}

#[test]
fn used_address_rejected_across_blocks() {
    let ledger = memory_ledger();
    fund_alice(&ledger);
    // Key 1 already received the first block's reward.
    let block = next_block(&ledger, vec![reward(1, 50)]);
    assert!(!ledger.add_block(&block).unwrap());
    let err = ledger.check_block(&block).unwrap_err();
    assert!(matches!(err, TallyError::Block(BlockError::AddressAlreadyUsed(_))), "got: {err:?}");
}

#[test]
fn standalone_transaction_checks() {
    let ledger = memory_ledger();
    let coin = fund_alice(&ledger);

    assert!(ledger.check_transaction(&spend(1, coin, &[(2, 999_000)])).is_ok());

    let forged = spend(4, coin, &[(2, 999_000)]);
    let err = ledger.check_transaction(&forged).unwrap_err();
    assert!(matches!(err, TallyError::Transaction(TransactionError::Script { index: 0, .. })), "got: {err:?}");

    let missing = OutPoint { transaction_hash: Hash256([1; 32]), index: 0 };
    let err = ledger.check_transaction(&spend(1, missing, &[(2, 1)])).unwrap_err();
    assert!(err.is_rejection());
}

#[test]
fn tighter_params_reject_large_blocks() {
    let params = ChainParams { max_block_transactions: 1, ..ChainParams::default() };
    let ledger = Ledger::new(MemoryKv::new(), params);
    let coin = {
        let coinbase = reward(1, 1_000);
        assert!(ledger.add_block(&next_block(&ledger, vec![coinbase.clone()])).unwrap());
        first_output(&coinbase)
    };
    let block = next_block(&ledger, vec![reward(9, 50), spend(1, coin, &[(2, 900)])]);
    assert!(!ledger.add_block(&block).unwrap());
}

// ---------------------------------------------------------------------------
// Removal
// ---------------------------------------------------------------------------

#[test]
fn add_then_delete_restores_exact_state() {
    let ledger = memory_ledger();
    let coin = fund_alice(&ledger);
    let before = ledger.dump().unwrap();

    let payment = spend(1, coin, &[(2, 400_000), (3, 500_000)]);
    let block = next_block(&ledger, vec![reward(9, 100_050), payment.clone()]);
    assert!(ledger.add_block(&block).unwrap());
    assert_ne!(ledger.dump().unwrap(), before);

    assert_eq!(ledger.delete_tail_block().unwrap(), Some(block.clone()));
    assert_eq!(ledger.dump().unwrap(), before);

    // Everything the block introduced is free again.
    assert!(!ledger.is_hash_used(&block.hash().unwrap()).unwrap());
    assert!(!ledger.is_hash_used(&payment.hash()).unwrap());
    assert!(!ledger.is_address_used(&key(2).address()).unwrap());
    assert!(ledger.unspent_output_by_id(&coin).unwrap().is_some());

    // And the same block can be committed again.
    assert!(ledger.add_block(&block).unwrap());
}

#[test]
fn deleting_only_block_empties_store() {
    let ledger = memory_ledger();
    fund_alice(&ledger);
    assert!(ledger.delete_tail_block().unwrap().is_some());
    assert!(ledger.dump().unwrap().is_empty());
    assert_eq!(ledger.block_height().unwrap(), 0);
}

#[test]
fn delete_blocks_from_height() {
    let ledger = memory_ledger();
    for seed in 10..15u8 {
        let block = next_block(&ledger, vec![reward(seed, 50)]);
        assert!(ledger.add_block(&block).unwrap());
    }
    assert_eq!(ledger.block_height().unwrap(), 5);

    assert_eq!(ledger.delete_blocks_from(4).unwrap(), 2);
    assert_eq!(ledger.block_height().unwrap(), 3);
    assert_eq!(ledger.transaction_count().unwrap(), 3);

    assert_eq!(ledger.delete_blocks_from(10).unwrap(), 0);
    assert_eq!(ledger.delete_blocks_from(0).unwrap(), 3);
    assert!(ledger.dump().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Stats, concurrency, persistence
// ---------------------------------------------------------------------------

#[test]
fn stats_count_every_index() {
    let ledger = memory_ledger();
    let coin = fund_alice(&ledger);
    let block = next_block(&ledger, vec![reward(9, 50), spend(1, coin, &[(2, 900_000)])]);
    assert!(ledger.add_block(&block).unwrap());

    let stats = ledger.stats().unwrap();
    assert_eq!(stats["block_by_height"], 2);
    assert_eq!(stats["transaction_by_height"], 3);
    assert_eq!(stats["output_by_height"], 3);
    assert_eq!(stats["unspent_output_by_id"], 2);
    assert_eq!(stats["spent_output_by_id"], 1);
    assert_eq!(stats["used_hash"], 5);
    assert_eq!(stats["used_address"], 3);
}

#[test]
fn readers_never_see_partial_blocks() {
    let ledger = memory_ledger();
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..200 {
                    let view = ledger.view();
                    let height = view.block_height().unwrap();
                    assert_eq!(view.transaction_count().unwrap(), height);
                    if height > 0 {
                        let tail = view.block_by_height(height).unwrap().unwrap();
                        let tx_hash = tail.transactions[0].hash();
                        assert!(view.is_hash_used(&tx_hash).unwrap());
                    }
                }
            });
        }
        scope.spawn(|| {
            for seed in 100..140u8 {
                let block = next_block(&ledger, vec![reward(seed, 50)]);
                assert!(ledger.add_block(&block).unwrap());
            }
        });
    });
    assert_eq!(ledger.block_height().unwrap(), 40);
}

#[test]
fn rocksdb_ledger_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = LedgerConfig { data_dir: dir.path().to_path_buf(), ..LedgerConfig::default() };

    let coinbase = reward(1, 1_000_000);
    let block_hash = {
        let ledger = Ledger::open(&config).unwrap();
        let block = next_block(&ledger, vec![coinbase.clone()]);
        assert!(ledger.add_block(&block).unwrap());
        ledger.flush().unwrap();
        block.hash().unwrap()
    };

    let ledger = Ledger::open(&config).unwrap();
    assert_eq!(ledger.block_height().unwrap(), 1);
    assert_eq!(ledger.block_by_hash(&block_hash).unwrap().map(|b| b.height), Some(1));
    assert!(ledger.unspent_output_by_id(&first_output(&coinbase)).unwrap().is_some());

    assert!(ledger.delete_tail_block().unwrap().is_some());
    ledger.compact();
    assert!(ledger.dump().unwrap().is_empty());
}
