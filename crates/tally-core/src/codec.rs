//! Deterministic length-prefixed binary codec.
//!
//! Every element is written as an 8-byte big-endian length followed by the
//! element bytes. Composite values nest: a transaction is
//! `lp(flat(lp(input)..)) ‖ lp(flat(lp(output)..))`, and so on. The encoding
//! is the input to every identifier hash, so it must stay byte-stable.
//!
//! Decoders consume the whole input and reject truncation and trailing bytes.

use crate::error::CodecError;
use crate::script::Script;
use crate::types::{Block, Hash256, OutPoint, Transaction, TransactionInput, TransactionOutput};

/// Width of the length prefix in bytes.
pub const LENGTH_PREFIX: usize = 8;

/// Which transaction encoding to produce or expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxEncoding {
    /// Complete encoding; hashed into the transaction identifier.
    Full,
    /// Unlock scripts omitted; hashed into the signing payload.
    Signing,
}

/// Append `bytes` as one length-prefixed element.
pub fn write_element(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// Append a `u64` as an 8-byte big-endian element.
pub fn write_u64(buf: &mut Vec<u8>, value: u64) {
    write_element(buf, &value.to_be_bytes());
}

/// Sequential reader over length-prefixed elements.
pub struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    fn take(&mut self, need: usize) -> Result<&'a [u8], CodecError> {
        let have = self.bytes.len() - self.offset;
        if need > have {
            return Err(CodecError::Truncated { offset: self.offset, need, have });
        }
        let slice = &self.bytes[self.offset..self.offset + need];
        self.offset += need;
        Ok(slice)
    }

    /// Read one length-prefixed element.
    pub fn read_element(&mut self) -> Result<&'a [u8], CodecError> {
        let prefix = self.take(LENGTH_PREFIX)?;
        let mut len_bytes = [0u8; LENGTH_PREFIX];
        len_bytes.copy_from_slice(prefix);
        let len = u64::from_be_bytes(len_bytes);
        let len = usize::try_from(len).map_err(|_| CodecError::Truncated {
            offset: self.offset,
            need: usize::MAX,
            have: self.bytes.len() - self.offset,
        })?;
        self.take(len)
    }

    /// Read an element that must be exactly `N` bytes.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let element = self.read_element()?;
        element
            .try_into()
            .map_err(|_| CodecError::InvalidLength { expected: N, got: element.len() })
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.read_array::<8>()?))
    }

    /// Fail if any bytes remain.
    pub fn finish(self) -> Result<(), CodecError> {
        match self.bytes.len() - self.offset {
            0 => Ok(()),
            rest => Err(CodecError::TrailingBytes(rest)),
        }
    }
}

// --- Scripts ---

/// Scripts are stored in canonical encoded form already.
pub fn encode_script(script: &Script) -> Vec<u8> {
    script.as_bytes().to_vec()
}

pub fn decode_script(bytes: &[u8]) -> Result<Script, CodecError> {
    Script::from_bytes(bytes.to_vec())
}

// --- Transactions ---

fn encode_input(input: &TransactionInput, encoding: TxEncoding) -> Vec<u8> {
    let mut buf = Vec::new();
    write_element(&mut buf, input.previous_output.transaction_hash.as_bytes());
    write_u64(&mut buf, input.previous_output.index);
    if encoding == TxEncoding::Full {
        write_element(&mut buf, input.unlock_script.as_bytes());
    }
    buf
}

fn encode_output(output: &TransactionOutput) -> Vec<u8> {
    let mut buf = Vec::new();
    write_element(&mut buf, output.lock_script.as_bytes());
    write_u64(&mut buf, output.value);
    buf
}

pub fn encode_transaction(tx: &Transaction, encoding: TxEncoding) -> Vec<u8> {
    let mut inputs = Vec::new();
    for input in &tx.inputs {
        write_element(&mut inputs, &encode_input(input, encoding));
    }
    let mut outputs = Vec::new();
    for output in &tx.outputs {
        write_element(&mut outputs, &encode_output(output));
    }
    let mut buf = Vec::with_capacity(inputs.len() + outputs.len() + 2 * LENGTH_PREFIX);
    write_element(&mut buf, &inputs);
    write_element(&mut buf, &outputs);
    buf
}

fn decode_input(bytes: &[u8], encoding: TxEncoding) -> Result<TransactionInput, CodecError> {
    let mut reader = Reader::new(bytes);
    let transaction_hash = Hash256(reader.read_array::<32>()?);
    let index = reader.read_u64()?;
    let unlock_script = match encoding {
        TxEncoding::Full => decode_script(reader.read_element()?)?,
        TxEncoding::Signing => Script::new(),
    };
    reader.finish()?;
    Ok(TransactionInput {
        previous_output: OutPoint { transaction_hash, index },
        unlock_script,
    })
}

fn decode_output(bytes: &[u8]) -> Result<TransactionOutput, CodecError> {
    let mut reader = Reader::new(bytes);
    let lock_script = decode_script(reader.read_element()?)?;
    let value = reader.read_u64()?;
    reader.finish()?;
    Ok(TransactionOutput { value, lock_script })
}

pub fn decode_transaction(bytes: &[u8], encoding: TxEncoding) -> Result<Transaction, CodecError> {
    let mut reader = Reader::new(bytes);
    let mut inputs_reader = Reader::new(reader.read_element()?);
    let mut outputs_reader = Reader::new(reader.read_element()?);
    reader.finish()?;

    let mut inputs = Vec::new();
    while !inputs_reader.is_empty() {
        inputs.push(decode_input(inputs_reader.read_element()?, encoding)?);
    }
    let mut outputs = Vec::new();
    while !outputs_reader.is_empty() {
        outputs.push(decode_output(outputs_reader.read_element()?)?);
    }
    Ok(Transaction { inputs, outputs })
}

// --- Blocks ---

/// Decode a 64-character hex nonce into its 32 raw bytes.
pub fn nonce_bytes(nonce: &str) -> Result<[u8; 32], CodecError> {
    let bytes = hex::decode(nonce).map_err(|e| CodecError::InvalidNonce(e.to_string()))?;
    let got = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CodecError::InvalidNonce(format!("expected 32 bytes, got {got}")))
}

pub fn encode_block(block: &Block) -> Result<Vec<u8>, CodecError> {
    let mut transactions = Vec::new();
    for tx in &block.transactions {
        write_element(&mut transactions, &encode_transaction(tx, TxEncoding::Full));
    }
    let mut buf = Vec::with_capacity(transactions.len() + 128);
    write_u64(&mut buf, block.height);
    write_u64(&mut buf, block.timestamp);
    write_element(&mut buf, block.previous_hash.as_bytes());
    write_element(&mut buf, &nonce_bytes(&block.nonce)?);
    write_element(&mut buf, &transactions);
    Ok(buf)
}

pub fn decode_block(bytes: &[u8]) -> Result<Block, CodecError> {
    let mut reader = Reader::new(bytes);
    let height = reader.read_u64()?;
    let timestamp = reader.read_u64()?;
    let previous_hash = Hash256(reader.read_array::<32>()?);
    let nonce = hex::encode(reader.read_array::<32>()?);
    let mut tx_reader = Reader::new(reader.read_element()?);
    reader.finish()?;

    let mut transactions = Vec::new();
    while !tx_reader.is_empty() {
        transactions.push(decode_transaction(tx_reader.read_element()?, TxEncoding::Full)?);
    }
    Ok(Block { height, previous_hash, timestamp, nonce, transactions })
}

/// Bincode configuration shared by every stored record.
pub fn record_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// Serialize a stored record with bincode.
pub fn encode_record<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, CodecError> {
    bincode::encode_to_vec(value, record_config()).map_err(|e| CodecError::Record(e.to_string()))
}

/// Deserialize a stored record, rejecting trailing bytes.
pub fn decode_record<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, CodecError> {
    let (value, read) = bincode::decode_from_slice(bytes, record_config())
        .map_err(|e| CodecError::Record(e.to_string()))?;
    if read != bytes.len() {
        return Err(CodecError::TrailingBytes(bytes.len() - read));
    }
    Ok(value)
}
