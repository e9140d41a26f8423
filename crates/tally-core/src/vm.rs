//! Stack-based script virtual machine.
//!
//! Runs `unlock ‖ lock` against an operand stack of byte strings. Faults
//! (stack underflow, unknown opcode, a failed `EQUALVERIFY` or `CHECKSIG`)
//! come back as [`ScriptError`] values. A spend is authorized only when the
//! program finishes with exactly one element on the stack, equal to [`TRUE`].

use crate::crypto::{self, hash160};
use crate::error::ScriptError;
use crate::script::{Instruction, Opcode, Script};
use crate::traits::VirtualMachine;
use crate::types::Transaction;

/// Operand stack. The last element is the top.
pub type Stack = Vec<Vec<u8>>;

/// Value `CHECKSIG` pushes on success and the only accepted final stack item.
pub const TRUE: &[u8] = &[0x01];

/// The five-opcode interpreter used by the validation pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackVirtualMachine;

fn pop(stack: &mut Stack, opcode: Opcode, need: usize) -> Result<Vec<u8>, ScriptError> {
    let have = stack.len();
    stack
        .pop()
        .ok_or(ScriptError::StackUnderflow { opcode: opcode.name(), need, have })
}

fn require(stack: &Stack, opcode: Opcode, need: usize) -> Result<(), ScriptError> {
    if stack.len() < need {
        return Err(ScriptError::StackUnderflow { opcode: opcode.name(), need, have: stack.len() });
    }
    Ok(())
}

impl VirtualMachine for StackVirtualMachine {
    fn execute_script(&self, tx: &Transaction, script: &Script) -> Result<Stack, ScriptError> {
        let mut stack = Stack::new();
        for instruction in script.instructions() {
            match instruction? {
                Instruction::PushData(data) => stack.push(data.to_vec()),
                Instruction::Dup => {
                    require(&stack, Opcode::Dup, 1)?;
                    let top = stack[stack.len() - 1].clone();
                    stack.push(top);
                }
                Instruction::Hash160 => {
                    let public_key = pop(&mut stack, Opcode::Hash160, 1)?;
                    stack.push(hash160(&public_key).to_vec());
                }
                Instruction::EqualVerify => {
                    let op = Opcode::EqualVerify;
                    require(&stack, op, 2)?;
                    let a = pop(&mut stack, op, 2)?;
                    let b = pop(&mut stack, op, 2)?;
                    if a != b {
                        return Err(ScriptError::EqualVerifyFailed);
                    }
                }
                Instruction::CheckSig => {
                    let op = Opcode::CheckSig;
                    require(&stack, op, 2)?;
                    let public_key = pop(&mut stack, op, 2)?;
                    let signature = pop(&mut stack, op, 2)?;
                    crypto::verify_transaction_signature(tx, &public_key, &signature)
                        .map_err(ScriptError::CheckSigFailed)?;
                    stack.push(TRUE.to_vec());
                }
            }
        }
        Ok(stack)
    }
}

/// Run `unlock ‖ lock` and require a final stack of exactly `[TRUE]`.
pub fn verify_spend(
    vm: &dyn VirtualMachine,
    tx: &Transaction,
    unlock: &Script,
    lock: &Script,
) -> Result<(), ScriptError> {
    let stack = vm.execute_script(tx, &unlock.concat(lock))?;
    match stack.as_slice() {
        [top] if top.as_slice() == TRUE => Ok(()),
        _ => Err(ScriptError::NotTrue { depth: stack.len() }),
    }
}
