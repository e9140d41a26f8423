//! Locking and unlocking scripts.
//!
//! A [`Script`] holds its canonical encoding: a sequence of length-prefixed
//! elements. An opcode occupies a one-byte element; `PUSHDATA` is followed by
//! the element it pushes. The type only guarantees well-formed framing;
//! opcode validity is checked while iterating [`Script::instructions`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::codec::{Reader, write_element};
use crate::constants::{PUBKEY_HASH_LENGTH, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use crate::error::{CodecError, ScriptError};
use crate::types::Address;

/// The five opcodes understood by the virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    PushData = 0x4c,
    Dup = 0x76,
    EqualVerify = 0x88,
    Hash160 = 0xa9,
    CheckSig = 0xac,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x4c => Some(Self::PushData),
            0x76 => Some(Self::Dup),
            0x88 => Some(Self::EqualVerify),
            0xa9 => Some(Self::Hash160),
            0xac => Some(Self::CheckSig),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::PushData => "PUSHDATA",
            Self::Dup => "DUP",
            Self::EqualVerify => "EQUALVERIFY",
            Self::Hash160 => "HASH160",
            Self::CheckSig => "CHECKSIG",
        }
    }
}

/// One decoded step of a script. `PUSHDATA` always carries its operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    PushData(&'a [u8]),
    Dup,
    Hash160,
    EqualVerify,
    CheckSig,
}

impl Instruction<'_> {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::PushData(_) => Opcode::PushData,
            Self::Dup => Opcode::Dup,
            Self::Hash160 => Opcode::Hash160,
            Self::EqualVerify => Opcode::EqualVerify,
            Self::CheckSig => Opcode::CheckSig,
        }
    }
}

#[derive(Clone, Default, PartialEq, Eq, Hash, bincode::Encode)]
pub struct Script(Vec<u8>);

impl Script {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Wrap encoded bytes, checking that they frame into whole elements.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CodecError> {
        let mut reader = Reader::new(&bytes);
        while !reader.is_empty() {
            reader.read_element()?;
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encoded size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push_opcode(mut self, opcode: Opcode) -> Self {
        write_element(&mut self.0, &[opcode as u8]);
        self
    }

    pub fn push_data(mut self, data: &[u8]) -> Self {
        write_element(&mut self.0, &[Opcode::PushData as u8]);
        write_element(&mut self.0, data);
        self
    }

    /// `unlock ‖ lock`, the program the VM runs for one input.
    pub fn concat(&self, other: &Script) -> Script {
        let mut bytes = Vec::with_capacity(self.len() + other.len());
        bytes.extend_from_slice(&self.0);
        bytes.extend_from_slice(&other.0);
        Script(bytes)
    }

    pub fn instructions(&self) -> Instructions<'_> {
        Instructions { reader: Reader::new(&self.0) }
    }

    // --- Pay-to-public-key-hash templates ---

    /// `DUP HASH160 PUSHDATA <pubkey hash> EQUALVERIFY CHECKSIG`
    pub fn p2pkh_lock(address: &Address) -> Self {
        Self::new()
            .push_opcode(Opcode::Dup)
            .push_opcode(Opcode::Hash160)
            .push_data(address.as_bytes())
            .push_opcode(Opcode::EqualVerify)
            .push_opcode(Opcode::CheckSig)
    }

    /// `PUSHDATA <signature> PUSHDATA <public key>`
    pub fn p2pkh_unlock(signature: &[u8; SIGNATURE_LENGTH], public_key: &[u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self::new().push_data(signature).push_data(public_key)
    }

    fn decoded(&self) -> Option<Vec<Instruction<'_>>> {
        self.instructions().collect::<Result<Vec<_>, _>>().ok()
    }

    /// Address committed to by a P2PKH lock script, or `None` for any other shape.
    pub fn p2pkh_address(&self) -> Option<Address> {
        match self.decoded()?.as_slice() {
            [
                Instruction::Dup,
                Instruction::Hash160,
                Instruction::PushData(hash),
                Instruction::EqualVerify,
                Instruction::CheckSig,
            ] if hash.len() == PUBKEY_HASH_LENGTH => {
                let mut bytes = [0u8; PUBKEY_HASH_LENGTH];
                bytes.copy_from_slice(hash);
                Some(Address(bytes))
            }
            _ => None,
        }
    }

    pub fn is_p2pkh_lock(&self) -> bool {
        self.p2pkh_address().is_some()
    }

    /// `(signature, public key)` of a P2PKH unlock script.
    pub fn p2pkh_unlock_parts(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        match self.decoded()?.as_slice() {
            [Instruction::PushData(sig), Instruction::PushData(pk)]
                if sig.len() == SIGNATURE_LENGTH && pk.len() == PUBLIC_KEY_LENGTH =>
            {
                Some((sig.to_vec(), pk.to_vec()))
            }
            _ => None,
        }
    }

    pub fn is_p2pkh_unlock(&self) -> bool {
        self.p2pkh_unlock_parts().is_some()
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({self})")
    }
}

/// Assembly-style rendering, e.g. `DUP HASH160 PUSHDATA 0a1b.. EQUALVERIFY CHECKSIG`.
impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for instruction in self.instructions() {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            match instruction {
                Ok(Instruction::PushData(data)) => write!(f, "PUSHDATA {}", hex::encode(data))?,
                Ok(op) => f.write_str(op.opcode().name())?,
                Err(e) => return write!(f, "<{e}>"),
            }
        }
        Ok(())
    }
}

/// Stored scripts go through [`Script::from_bytes`] so a corrupt record
/// fails to decode instead of yielding a mis-framed script.
impl<Context> bincode::Decode<Context> for Script {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        let bytes = <Vec<u8> as bincode::Decode<Context>>::decode(decoder)?;
        Self::from_bytes(bytes).map_err(|e| bincode::error::DecodeError::OtherString(e.to_string()))
    }
}

bincode::impl_borrow_decode!(Script);

impl Serialize for Script {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        Self::from_bytes(bytes).map_err(serde::de::Error::custom)
    }
}

/// Iterator over the instructions of a script.
///
/// Yields an error and then stops on an unknown opcode, a multi-byte opcode
/// element, a `PUSHDATA` with no operand, or broken framing.
pub struct Instructions<'a> {
    reader: Reader<'a>,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, ScriptError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.is_empty() {
            return None;
        }
        let result = self.decode_next();
        if result.is_err() {
            self.reader = Reader::new(&[]);
        }
        Some(result)
    }
}

impl<'a> Instructions<'a> {
    fn decode_next(&mut self) -> Result<Instruction<'a>, ScriptError> {
        let element = self
            .reader
            .read_element()
            .map_err(|e| ScriptError::Malformed(e.to_string()))?;
        let [byte] = element else {
            return Err(ScriptError::InvalidOpcodeLength(element.len()));
        };
        match Opcode::from_byte(*byte) {
            Some(Opcode::PushData) => {
                if self.reader.is_empty() {
                    return Err(ScriptError::MissingPushData);
                }
                let data = self
                    .reader
                    .read_element()
                    .map_err(|e| ScriptError::Malformed(e.to_string()))?;
                Ok(Instruction::PushData(data))
            }
            Some(Opcode::Dup) => Ok(Instruction::Dup),
            Some(Opcode::Hash160) => Ok(Instruction::Hash160),
            Some(Opcode::EqualVerify) => Ok(Instruction::EqualVerify),
            Some(Opcode::CheckSig) => Ok(Instruction::CheckSig),
            None => Err(ScriptError::UnknownOpcode(*byte)),
        }
    }
}
