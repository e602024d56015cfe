//! ECDSA signature builtin
//!
//! Instances are `[public_key, message]`. The signature itself never enters
//! memory: the interpreter registers it out of band with
//! [`SignatureBuiltin::add_signature`], and the validation rule verifies it as
//! soon as both cells of the instance are written.

use super::{hex, BuiltinCore, BuiltinRunner};
use crate::crypto::{SignatureVerifier, EC_ORDER};
use crate::error::{Result, RuntimeError};
use crate::memory::Memory;
use crate::validated_memory::ValidatedMemory;
use cvm_spec::layout::EcdsaInstanceDef;
use cvm_spec::{Felt, MaybeRelocatable, Relocatable};
use num_bigint::BigUint;
use serde_json::{json, Value};
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;

const NAME: &str = "ecdsa";
const CELLS_PER_INSTANCE: usize = 2;

/// `(r, s)`
pub type Signature = (Felt, Felt);

type SignatureTable = Rc<RefCell<BTreeMap<Relocatable, Signature>>>;

pub struct SignatureBuiltin {
    core: BuiltinCore,
    verifier: Rc<dyn SignatureVerifier>,
    /// Keyed by the public key cell; shared with the validation rule
    signatures: SignatureTable,
}

impl SignatureBuiltin {
    pub fn new(
        def: &EcdsaInstanceDef,
        included: bool,
        verifier: Rc<dyn SignatureVerifier>,
    ) -> Self {
        Self {
            core: BuiltinCore::new(
                NAME,
                included,
                Some(def.ratio),
                CELLS_PER_INSTANCE,
                CELLS_PER_INSTANCE,
            ),
            verifier,
            signatures: Rc::new(RefCell::new(BTreeMap::new())),
        }
    }

    /// Register the signature for the instance whose public key lives at `address`
    pub fn add_signature(&mut self, address: Relocatable, signature: Signature) -> Result<()> {
        if !self.core.owns(address) || self.core.cell_index(address) != 0 {
            return Err(RuntimeError::Builtin {
                builtin: NAME,
                reason: format!(
                    "Signature address {address} is not the first cell of an ECDSA instance"
                ),
            });
        }
        debug!(%address, "registered signature");
        self.signatures.borrow_mut().insert(address, signature);
        Ok(())
    }

    pub fn signatures(&self) -> BTreeMap<Relocatable, Signature> {
        self.signatures.borrow().clone()
    }
}

impl std::fmt::Debug for SignatureBuiltin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureBuiltin")
            .field("core", &self.core)
            .field("signatures", &self.signatures.borrow().len())
            .finish()
    }
}

fn verify_instance(
    verifier: &dyn SignatureVerifier,
    signatures: &SignatureTable,
    memory: &Memory,
    address: Relocatable,
) -> Result<Vec<Relocatable>> {
    let pubkey_addr = address - (address % CELLS_PER_INSTANCE as i64).offset;
    let msg_addr = pubkey_addr + 1usize;
    let (Some(pubkey), Some(msg)) = (memory.get_rel(pubkey_addr), memory.get_rel(msg_addr)) else {
        return Ok(Vec::new());
    };
    let invalid = |reason: String| RuntimeError::Validation { address, reason };
    let MaybeRelocatable::Int(pubkey) = pubkey else {
        return Err(invalid(format!(
            "Expected public key at address {pubkey_addr} to be an integer"
        )));
    };
    let MaybeRelocatable::Int(msg) = msg else {
        return Err(invalid(format!(
            "Expected message hash at address {msg_addr} to be an integer"
        )));
    };

    let signatures = signatures.borrow();
    let Some((r, s)) = signatures.get(&pubkey_addr) else {
        return Err(invalid(format!(
            "Signature hint is missing for ECDSA builtin at address {pubkey_addr}. \
             Add it using 'ecdsa_builtin.add_signature'."
        )));
    };
    if !verifier.verify(pubkey, msg, r, s) {
        return Err(invalid(format!(
            "Signature ({r}, {s}), is invalid, with respect to the public key {pubkey}, \
             and the message hash {msg}."
        )));
    }
    Ok(vec![pubkey_addr, msg_addr])
}

impl BuiltinRunner for SignatureBuiltin {
    fn core(&self) -> &BuiltinCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BuiltinCore {
        &mut self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn add_validation_rules(&self, memory: &mut ValidatedMemory) {
        let verifier = Rc::clone(&self.verifier);
        let signatures = Rc::clone(&self.signatures);
        let rule = move |memory: &Memory, address: Relocatable| -> Result<Vec<Relocatable>> {
            verify_instance(verifier.as_ref(), &signatures, memory, address)
        };
        memory.add_validation_rule(self.core.base.segment_index, Box::new(rule));
    }

    fn air_private_input(&self, memory: &Memory) -> Vec<Value> {
        let order = &*EC_ORDER;
        self.signatures
            .borrow()
            .iter()
            .filter_map(|(address, (r, s))| {
                let pubkey = memory.get_felt(*address).ok()?;
                let msg = memory.get_felt(*address + 1usize).ok()?;
                let w = s.to_biguint().modpow(&(order - 2u32), order);
                Some(json!({
                    "index": self.core.instance_index(*address),
                    "pubkey": hex(&pubkey),
                    "msg": hex(&msg),
                    "signature_input": { "r": hex(r), "w": format!("{w:#x}") },
                }))
            })
            .collect()
    }

    fn get_additional_data(&self) -> Value {
        let entries: Vec<Value> = self
            .signatures
            .borrow()
            .iter()
            .map(|(address, (r, s))| {
                json!([[address.segment_index, address.offset], [r.to_string(), s.to_string()]])
            })
            .collect();
        Value::Array(entries)
    }

    /// Signatures are taken over regardless of trust: they are verified again
    /// whenever their instance is written.
    fn extend_additional_data(&mut self, data: &Value, _trusted: bool) -> Result<()> {
        let entries: Vec<((u32, i64), (String, String))> =
            serde_json::from_value(data.clone()).map_err(|err| RuntimeError::Builtin {
                builtin: NAME,
                reason: format!("Malformed additional data: {err}"),
            })?;
        let mut signatures = self.signatures.borrow_mut();
        for ((segment, offset), (r, s)) in entries {
            let parse = |value: &str| {
                value.parse::<BigUint>().map(Felt::new).map_err(|_| RuntimeError::Builtin {
                    builtin: NAME,
                    reason: format!("Invalid signature component {value}"),
                })
            };
            signatures.insert(Relocatable::new(segment, offset), (parse(&r)?, parse(&s)?));
        }
        Ok(())
    }
}
