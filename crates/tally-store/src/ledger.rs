//! The indexed ledger.
//!
//! [`Ledger`] owns a [`KvStore`] behind a readers-writer lock. Adding a block
//! validates it and commits every index update in one atomic batch; removing
//! the tail stages the exact inverse batch. Readers share the lock, so they
//! never observe a half-applied block.

use std::collections::BTreeMap;
use std::ops::Deref;

use parking_lot::RwLock;
use tracing::{debug, info};

use tally_core::codec::{decode_record, encode_record};
use tally_core::consensus::FixedTargetConsensus;
use tally_core::constants::ChainParams;
use tally_core::error::{TallyError, TransactionError};
use tally_core::reward::HalvingIncentive;
use tally_core::traits::{ChainView, Consensus, Incentive, VirtualMachine};
use tally_core::types::{
    Address, Block, Hash256, OutPoint, OutputRecord, Transaction, TransactionRecord,
};
use tally_core::validation::Validator;
use tally_core::vm::StackVirtualMachine;

use crate::config::LedgerConfig;
use crate::keys::{self, decode_u64, encode_u64};
use crate::kv::{KvBatch, KvStore, RocksKv};

/// Read-only [`ChainView`] over anything that derefs to a store: a plain
/// reference inside the write path, a read guard everywhere else.
pub struct StoreView<G> {
    kv: G,
}

impl<G, S> StoreView<G>
where
    G: Deref<Target = S>,
    S: KvStore + ?Sized,
{
    pub fn new(kv: G) -> Self {
        Self { kv }
    }

    fn get_u64(&self, key: &[u8]) -> Result<Option<u64>, TallyError> {
        self.kv.get(key)?.map(|bytes| decode_u64(&bytes)).transpose()
    }

    fn get_counter(&self, prefix: u8) -> Result<u64, TallyError> {
        Ok(self.get_u64(&keys::singleton(prefix))?.unwrap_or(0))
    }

    fn get_record<T: bincode::Decode<()>>(&self, key: &[u8]) -> Result<Option<T>, TallyError> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl<G, S> ChainView for StoreView<G>
where
    G: Deref<Target = S>,
    S: KvStore + ?Sized,
{
    fn block_height(&self) -> Result<u64, TallyError> {
        self.get_counter(keys::CHAIN_HEIGHT)
    }

    fn transaction_count(&self) -> Result<u64, TallyError> {
        self.get_counter(keys::CHAIN_TRANSACTION_COUNT)
    }

    fn output_count(&self) -> Result<u64, TallyError> {
        self.get_counter(keys::CHAIN_OUTPUT_COUNT)
    }

    fn block_by_height(&self, height: u64) -> Result<Option<Block>, TallyError> {
        self.get_record(&keys::by_height(keys::BLOCK_BY_HEIGHT, height))
    }

    fn block_height_by_hash(&self, hash: &Hash256) -> Result<Option<u64>, TallyError> {
        self.get_u64(&keys::by_hash(keys::BLOCK_HEIGHT_BY_HASH, hash))
    }

    fn transaction_by_height(&self, height: u64) -> Result<Option<TransactionRecord>, TallyError> {
        self.get_record(&keys::by_height(keys::TRANSACTION_BY_HEIGHT, height))
    }

    fn transaction_height_by_hash(&self, hash: &Hash256) -> Result<Option<u64>, TallyError> {
        self.get_u64(&keys::by_hash(keys::TRANSACTION_HEIGHT_BY_HASH, hash))
    }

    fn output_by_height(&self, height: u64) -> Result<Option<OutputRecord>, TallyError> {
        self.get_record(&keys::by_height(keys::OUTPUT_BY_HEIGHT, height))
    }

    fn output_height_by_id(&self, id: &OutPoint) -> Result<Option<u64>, TallyError> {
        self.get_u64(&keys::by_output_id(keys::OUTPUT_HEIGHT_BY_ID, id))
    }

    fn unspent_output_height(&self, id: &OutPoint) -> Result<Option<u64>, TallyError> {
        self.get_u64(&keys::by_output_id(keys::UNSPENT_OUTPUT_BY_ID, id))
    }

    fn spent_output_height(&self, id: &OutPoint) -> Result<Option<u64>, TallyError> {
        self.get_u64(&keys::by_output_id(keys::SPENT_OUTPUT_BY_ID, id))
    }

    fn source_transaction_height(&self, id: &OutPoint) -> Result<Option<u64>, TallyError> {
        self.get_u64(&keys::by_output_id(keys::SOURCE_TRANSACTION_BY_ID, id))
    }

    fn destination_transaction_height(&self, id: &OutPoint) -> Result<Option<u64>, TallyError> {
        self.get_u64(&keys::by_output_id(keys::DESTINATION_TRANSACTION_BY_ID, id))
    }

    fn address_output_height(&self, address: &Address) -> Result<Option<u64>, TallyError> {
        self.get_u64(&keys::by_address(keys::OUTPUT_BY_ADDRESS, address))
    }

    fn address_unspent_output_height(&self, address: &Address) -> Result<Option<u64>, TallyError> {
        self.get_u64(&keys::by_address(keys::UNSPENT_OUTPUT_BY_ADDRESS, address))
    }

    fn address_spent_output_height(&self, address: &Address) -> Result<Option<u64>, TallyError> {
        self.get_u64(&keys::by_address(keys::SPENT_OUTPUT_BY_ADDRESS, address))
    }

    fn is_hash_used(&self, hash: &Hash256) -> Result<bool, TallyError> {
        Ok(self.kv.get(&keys::by_hash(keys::USED_HASH, hash))?.is_some())
    }

    fn is_address_used(&self, address: &Address) -> Result<bool, TallyError> {
        Ok(self.kv.get(&keys::by_address(keys::USED_ADDRESS, address))?.is_some())
    }
}

// --- Write batches ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockAction {
    Add,
    Remove,
}

/// Everything needed to stage one block in either direction, with every
/// chain position resolved.
struct BlockPlan {
    block: Block,
    hash: Hash256,
    transactions: Vec<TransactionRecord>,
    created: Vec<OutputRecord>,
    /// Outputs this block spends, each with the height of the spending transaction.
    spent: Vec<(OutputRecord, u64)>,
    transaction_count_before: u64,
    output_count_before: u64,
}

impl BlockPlan {
    /// Assign the next transaction and output heights to a validated block.
    fn for_add(view: &dyn ChainView, block: &Block) -> Result<Self, TallyError> {
        let transaction_count_before = view.transaction_count()?;
        let output_count_before = view.output_count()?;
        let mut transactions = Vec::with_capacity(block.transactions.len());
        let mut created = Vec::new();
        let mut spent = Vec::new();

        let mut output_height = output_count_before;
        for (index, tx) in block.transactions.iter().enumerate() {
            let transaction_height = transaction_count_before + index as u64 + 1;
            let hash = tx.hash();
            for input in &tx.inputs {
                let record = view
                    .unspent_output_by_id(&input.previous_output)?
                    .ok_or_else(|| TransactionError::UnknownUtxo(input.previous_output.to_string()))?;
                spent.push((record, transaction_height));
            }
            for (output_index, output) in tx.outputs.iter().enumerate() {
                output_height += 1;
                let address = output
                    .address()
                    .ok_or(TransactionError::NotPayToPublicKeyHashLock(output_index))?;
                created.push(OutputRecord {
                    id: OutPoint { transaction_hash: hash, index: output_index as u64 },
                    output: output.clone(),
                    address,
                    output_height,
                    transaction_height,
                    block_height: block.height,
                });
            }
            transactions.push(TransactionRecord {
                transaction: tx.clone(),
                hash,
                transaction_height,
                block_height: block.height,
                index_in_block: index as u64,
            });
        }

        Ok(Self {
            block: block.clone(),
            hash: block.hash()?,
            transactions,
            created,
            spent,
            transaction_count_before,
            output_count_before,
        })
    }

    /// Rebuild the plan of the committed tail block from the indexes.
    fn for_remove(view: &dyn ChainView, block: Block) -> Result<Self, TallyError> {
        let missing = |what: String| TallyError::Storage(format!("index missing {what}"));
        let mut transactions = Vec::with_capacity(block.transactions.len());
        let mut created = Vec::new();
        let mut spent = Vec::new();

        for tx in &block.transactions {
            let hash = tx.hash();
            let record = view
                .transaction_by_hash(&hash)?
                .ok_or_else(|| missing(format!("transaction {hash}")))?;
            for input in &tx.inputs {
                let id = input.previous_output;
                let output = view
                    .spent_output_by_id(&id)?
                    .ok_or_else(|| missing(format!("spent output {id}")))?;
                spent.push((output, record.transaction_height));
            }
            for id in tx.output_ids() {
                let output = view
                    .output_by_id(&id)?
                    .ok_or_else(|| missing(format!("output {id}")))?;
                created.push(output);
            }
            transactions.push(record);
        }

        Ok(Self {
            hash: block.hash()?,
            transaction_count_before: view.transaction_count()?.saturating_sub(block.transaction_count()),
            output_count_before: view.output_count()?.saturating_sub(block.output_count()),
            block,
            transactions,
            created,
            spent,
        })
    }

    /// Stage every index update for `action`. Remove is the exact inverse of add.
    fn stage(&self, batch: &mut KvBatch, action: BlockAction) -> Result<(), TallyError> {
        let add = action == BlockAction::Add;
        let mut entry = |key: Vec<u8>, value: Vec<u8>| {
            if add {
                batch.put(key, value);
            } else {
                batch.delete(key);
            }
        };

        // Used hashes and addresses.
        entry(keys::by_hash(keys::USED_HASH, &self.hash), Vec::new());
        for tx in &self.transactions {
            entry(keys::by_hash(keys::USED_HASH, &tx.hash), Vec::new());
        }
        for output in &self.created {
            entry(keys::by_address(keys::USED_ADDRESS, &output.address), Vec::new());
        }

        // Block.
        let height = self.block.height;
        entry(keys::by_height(keys::BLOCK_BY_HEIGHT, height), encode_record(&self.block)?);
        entry(keys::by_hash(keys::BLOCK_HEIGHT_BY_HASH, &self.hash), encode_u64(height));

        // Transactions.
        for tx in &self.transactions {
            let height = tx.transaction_height;
            entry(keys::by_height(keys::TRANSACTION_BY_HEIGHT, height), encode_record(tx)?);
            entry(keys::by_hash(keys::TRANSACTION_HEIGHT_BY_HASH, &tx.hash), encode_u64(height));
        }

        // Created outputs.
        for output in &self.created {
            let height = encode_u64(output.output_height);
            entry(keys::by_height(keys::OUTPUT_BY_HEIGHT, output.output_height), encode_record(output)?);
            entry(keys::by_output_id(keys::OUTPUT_HEIGHT_BY_ID, &output.id), height.clone());
            entry(keys::by_output_id(keys::UNSPENT_OUTPUT_BY_ID, &output.id), height.clone());
            entry(
                keys::by_output_id(keys::SOURCE_TRANSACTION_BY_ID, &output.id),
                encode_u64(output.transaction_height),
            );
            entry(keys::by_address(keys::OUTPUT_BY_ADDRESS, &output.address), height.clone());
            entry(keys::by_address(keys::UNSPENT_OUTPUT_BY_ADDRESS, &output.address), height);
        }

        // Spent outputs move between the unspent and spent indexes.
        for (output, destination_height) in &self.spent {
            let height = encode_u64(output.output_height);
            let unspent_id = keys::by_output_id(keys::UNSPENT_OUTPUT_BY_ID, &output.id);
            let unspent_address = keys::by_address(keys::UNSPENT_OUTPUT_BY_ADDRESS, &output.address);
            if add {
                batch.delete(unspent_id);
                batch.delete(unspent_address);
            } else {
                batch.put(unspent_id, height.clone());
                batch.put(unspent_address, height.clone());
            }
            let mut entry = |key: Vec<u8>, value: Vec<u8>| {
                if add {
                    batch.put(key, value);
                } else {
                    batch.delete(key);
                }
            };
            entry(keys::by_output_id(keys::SPENT_OUTPUT_BY_ID, &output.id), height.clone());
            entry(
                keys::by_output_id(keys::DESTINATION_TRANSACTION_BY_ID, &output.id),
                encode_u64(*destination_height),
            );
            entry(keys::by_address(keys::SPENT_OUTPUT_BY_ADDRESS, &output.address), height);
        }

        // Counters. An empty chain has no counter keys at all.
        let counters = match action {
            BlockAction::Add => [
                (keys::CHAIN_HEIGHT, height),
                (keys::CHAIN_TRANSACTION_COUNT, self.transaction_count_before + self.transactions.len() as u64),
                (keys::CHAIN_OUTPUT_COUNT, self.output_count_before + self.created.len() as u64),
            ],
            BlockAction::Remove => [
                (keys::CHAIN_HEIGHT, height - 1),
                (keys::CHAIN_TRANSACTION_COUNT, self.transaction_count_before),
                (keys::CHAIN_OUTPUT_COUNT, self.output_count_before),
            ],
        };
        for (prefix, value) in counters {
            if value == 0 {
                batch.delete(keys::singleton(prefix));
            } else {
                batch.put(keys::singleton(prefix), encode_u64(value));
            }
        }
        Ok(())
    }
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

// --- Ledger ---

/// Single-node UTXO ledger over a key-value store.
pub struct Ledger<S: KvStore = RocksKv> {
    kv: RwLock<S>,
    params: ChainParams,
    consensus: Box<dyn Consensus>,
    incentive: Box<dyn Incentive>,
    vm: Box<dyn VirtualMachine>,
}

impl Ledger<RocksKv> {
    /// Open or create the RocksDB ledger described by `config`.
    pub fn open(config: &LedgerConfig) -> Result<Self, TallyError> {
        let kv = RocksKv::open(config.db_path())?;
        let ledger = Self::new(kv, config.chain.clone())
            .with_consensus(FixedTargetConsensus::new(config.target))
            .with_incentive(HalvingIncentive {
                initial_reward: config.initial_reward,
                halving_interval: config.halving_interval,
            });
        info!(path = ?config.db_path(), height = ledger.block_height()?, "ledger opened");
        Ok(ledger)
    }

    /// Trigger manual compaction of the underlying RocksDB.
    pub fn compact(&self) {
        self.kv.read().compact();
    }
}

impl<S: KvStore> Ledger<S> {
    /// Ledger with the reference consensus, incentive and virtual machine.
    pub fn new(kv: S, params: ChainParams) -> Self {
        Self {
            kv: RwLock::new(kv),
            params,
            consensus: Box::new(FixedTargetConsensus::default()),
            incentive: Box::new(HalvingIncentive::default()),
            vm: Box::new(StackVirtualMachine),
        }
    }

    pub fn with_consensus(mut self, consensus: impl Consensus + 'static) -> Self {
        self.consensus = Box::new(consensus);
        self
    }

    pub fn with_incentive(mut self, incentive: impl Incentive + 'static) -> Self {
        self.incentive = Box::new(incentive);
        self
    }

    pub fn with_virtual_machine(mut self, vm: impl VirtualMachine + 'static) -> Self {
        self.vm = Box::new(vm);
        self
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    fn validator(&self) -> Validator<'_> {
        Validator {
            params: &self.params,
            consensus: self.consensus.as_ref(),
            incentive: self.incentive.as_ref(),
            vm: self.vm.as_ref(),
        }
    }

    /// A consistent read snapshot. Holds the shared lock until dropped.
    pub fn view(&self) -> StoreView<parking_lot::RwLockReadGuard<'_, S>> {
        StoreView::new(self.kv.read())
    }

    /// Validate `block` and, if it passes, commit it atomically.
    ///
    /// Returns `Ok(false)` when the block is rejected; the store is untouched.
    /// `Err` is reserved for storage and codec faults.
    pub fn add_block(&self, block: &Block) -> Result<bool, TallyError> {
        let kv = self.kv.write();
        let view = StoreView::new(&*kv);

        if let Err(e) = self.validator().check_block(&view, block, now_millis()) {
            if e.is_rejection() {
                debug!(height = block.height, error = %e, "block rejected");
                return Ok(false);
            }
            return Err(e);
        }

        let plan = BlockPlan::for_add(&view, block)?;
        let mut batch = KvBatch::default();
        plan.stage(&mut batch, BlockAction::Add)?;
        kv.write(batch)?;

        info!(
            height = block.height,
            hash = %plan.hash,
            transactions = plan.transactions.len(),
            outputs = plan.created.len(),
            "block committed"
        );
        Ok(true)
    }

    /// Run the block pipeline without committing. The error names the
    /// failing stage.
    pub fn check_block(&self, block: &Block) -> Result<(), TallyError> {
        let view = self.view();
        self.validator().check_block(&view, block, now_millis())
    }

    /// Validate a standalone transaction against the current unspent set.
    pub fn check_transaction(&self, tx: &Transaction) -> Result<(), TallyError> {
        let view = self.view();
        self.validator().check_transaction(&view, tx)
    }

    /// Remove the tail block and restore every index to its prior state.
    ///
    /// Returns the removed block, or `None` if the chain is empty.
    pub fn delete_tail_block(&self) -> Result<Option<Block>, TallyError> {
        let kv = self.kv.write();
        Self::remove_tail(&kv)
    }

    /// Remove tail blocks while the tail height is at least `height`.
    ///
    /// Returns the number of blocks removed.
    pub fn delete_blocks_from(&self, height: u64) -> Result<u64, TallyError> {
        let kv = self.kv.write();
        let mut removed = 0;
        loop {
            let tail = StoreView::new(&*kv).block_height()?;
            if tail == 0 || tail < height {
                break;
            }
            Self::remove_tail(&kv)?;
            removed += 1;
        }
        Ok(removed)
    }

    fn remove_tail(kv: &S) -> Result<Option<Block>, TallyError> {
        let view = StoreView::new(kv);
        let Some(tail) = view.tail_block()? else {
            return Ok(None);
        };
        let plan = BlockPlan::for_remove(&view, tail)?;
        let mut batch = KvBatch::default();
        plan.stage(&mut batch, BlockAction::Remove)?;
        kv.write(batch)?;

        info!(height = plan.block.height, hash = %plan.hash, "tail block removed");
        Ok(Some(plan.block))
    }

    /// Up to `limit` committed transactions starting at `from_height`.
    pub fn transactions_in_range(
        &self,
        from_height: u64,
        limit: u64,
    ) -> Result<Vec<TransactionRecord>, TallyError> {
        let view = self.view();
        let mut records = Vec::new();
        for height in from_height.max(1)..from_height.max(1).saturating_add(limit) {
            match view.transaction_by_height(height)? {
                Some(record) => records.push(record),
                None => break,
            }
        }
        Ok(records)
    }

    /// Number of keys held by each index.
    pub fn stats(&self) -> Result<BTreeMap<&'static str, u64>, TallyError> {
        let kv = self.kv.read();
        let mut counts: BTreeMap<&'static str, u64> =
            keys::INDEXES.iter().map(|(_, name)| (*name, 0)).collect();
        for (key, _) in kv.scan()? {
            let name = key.first().and_then(|p| keys::index_name(*p)).unwrap_or("unknown");
            *counts.entry(name).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Every key-value pair currently stored.
    pub fn dump(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, TallyError> {
        self.kv.read().scan()
    }

    pub fn flush(&self) -> Result<(), TallyError> {
        self.kv.read().flush()
    }
}

/// Point queries against the ledger, each under its own read lock. Use
/// [`Ledger::view`] to run several queries against one snapshot.
impl<S: KvStore> ChainView for Ledger<S> {
    fn block_height(&self) -> Result<u64, TallyError> {
        self.view().block_height()
    }

    fn transaction_count(&self) -> Result<u64, TallyError> {
        self.view().transaction_count()
    }

    fn output_count(&self) -> Result<u64, TallyError> {
        self.view().output_count()
    }

    fn block_by_height(&self, height: u64) -> Result<Option<Block>, TallyError> {
        self.view().block_by_height(height)
    }

    fn block_height_by_hash(&self, hash: &Hash256) -> Result<Option<u64>, TallyError> {
        self.view().block_height_by_hash(hash)
    }

    fn transaction_by_height(&self, height: u64) -> Result<Option<TransactionRecord>, TallyError> {
        self.view().transaction_by_height(height)
    }

    fn transaction_height_by_hash(&self, hash: &Hash256) -> Result<Option<u64>, TallyError> {
        self.view().transaction_height_by_hash(hash)
    }

    fn output_by_height(&self, height: u64) -> Result<Option<OutputRecord>, TallyError> {
        self.view().output_by_height(height)
    }

    fn output_height_by_id(&self, id: &OutPoint) -> Result<Option<u64>, TallyError> {
        self.view().output_height_by_id(id)
    }

    fn unspent_output_height(&self, id: &OutPoint) -> Result<Option<u64>, TallyError> {
        self.view().unspent_output_height(id)
    }

    fn spent_output_height(&self, id: &OutPoint) -> Result<Option<u64>, TallyError> {
        self.view().spent_output_height(id)
    }

    fn source_transaction_height(&self, id: &OutPoint) -> Result<Option<u64>, TallyError> {
        self.view().source_transaction_height(id)
    }

    fn destination_transaction_height(&self, id: &OutPoint) -> Result<Option<u64>, TallyError> {
        self.view().destination_transaction_height(id)
    }

    fn address_output_height(&self, address: &Address) -> Result<Option<u64>, TallyError> {
        self.view().address_output_height(address)
    }

    fn address_unspent_output_height(&self, address: &Address) -> Result<Option<u64>, TallyError> {
        self.view().address_unspent_output_height(address)
    }

    fn address_spent_output_height(&self, address: &Address) -> Result<Option<u64>, TallyError> {
        self.view().address_spent_output_height(address)
    }

    fn is_hash_used(&self, hash: &Hash256) -> Result<bool, TallyError> {
        self.view().is_hash_used(hash)
    }

    fn is_address_used(&self, address: &Address) -> Result<bool, TallyError> {
        self.view().is_address_used(address)
    }

    // Composite queries run against a single snapshot.

    fn tail_block(&self) -> Result<Option<Block>, TallyError> {
        self.view().tail_block()
    }

    fn block_by_hash(&self, hash: &Hash256) -> Result<Option<Block>, TallyError> {
        self.view().block_by_hash(hash)
    }

    fn transaction_by_hash(&self, hash: &Hash256) -> Result<Option<TransactionRecord>, TallyError> {
        self.view().transaction_by_hash(hash)
    }

    fn output_by_id(&self, id: &OutPoint) -> Result<Option<OutputRecord>, TallyError> {
        self.view().output_by_id(id)
    }

    fn unspent_output_by_id(&self, id: &OutPoint) -> Result<Option<OutputRecord>, TallyError> {
        self.view().unspent_output_by_id(id)
    }

    fn spent_output_by_id(&self, id: &OutPoint) -> Result<Option<OutputRecord>, TallyError> {
        self.view().spent_output_by_id(id)
    }

    fn output_by_address(&self, address: &Address) -> Result<Option<OutputRecord>, TallyError> {
        self.view().output_by_address(address)
    }

    fn unspent_output_by_address(&self, address: &Address) -> Result<Option<OutputRecord>, TallyError> {
        self.view().unspent_output_by_address(address)
    }

    fn spent_output_by_address(&self, address: &Address) -> Result<Option<OutputRecord>, TallyError> {
        self.view().spent_output_by_address(address)
    }

    fn source_transaction(&self, id: &OutPoint) -> Result<Option<TransactionRecord>, TallyError> {
        self.view().source_transaction(id)
    }

    fn destination_transaction(&self, id: &OutPoint) -> Result<Option<TransactionRecord>, TallyError> {
        self.view().destination_transaction(id)
    }
}
