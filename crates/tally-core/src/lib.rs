//! # tally-core
//! Types, codec, script VM and validation rules for the Tally ledger.

pub mod codec;
pub mod consensus;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod merkle;
pub mod reward;
pub mod script;
pub mod tools;
pub mod traits;
pub mod types;
pub mod validation;
pub mod vm;
