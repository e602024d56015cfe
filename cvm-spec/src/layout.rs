//! # Layouts
//!
//! A layout fixes which builtins a run may use and how many execution steps
//! pay for each builtin instance (the `ratio`). Layouts are plain data: they
//! can be picked by name from the presets below or loaded from JSON.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Canonical builtin order. Program builtins and layout builtins must follow it.
pub const BUILTIN_ORDER: [&str; 8] =
    ["output", "pedersen", "range_check", "ecdsa", "bitwise", "ec_op", "keccak", "poseidon"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PedersenInstanceDef {
    pub ratio: u32,
    pub repetitions: u32,
    pub element_height: u32,
    pub element_bits: u32,
    pub n_inputs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeCheckInstanceDef {
    pub ratio: u32,
    /// Number of 16-bit parts; the checked bound is 2^(16 * n_parts)
    pub n_parts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcdsaInstanceDef {
    pub ratio: u32,
    pub repetitions: u32,
    pub height: u32,
    pub n_hash_bits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitwiseInstanceDef {
    pub ratio: u32,
    pub total_n_bits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcOpInstanceDef {
    pub ratio: u32,
    pub scalar_height: u32,
    pub scalar_bits: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeccakInstanceDef {
    pub ratio: u32,
    /// Bit width of each input felt; the widths must add up to 1600
    pub state_rep: Vec<u32>,
    pub instances_per_component: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoseidonInstanceDef {
    pub ratio: u32,
    pub partial_rounds_partition: Vec<u32>,
}

/// Per-builtin instance definition, tagged by builtin name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum BuiltinDef {
    Output,
    Pedersen(PedersenInstanceDef),
    RangeCheck(RangeCheckInstanceDef),
    Ecdsa(EcdsaInstanceDef),
    Bitwise(BitwiseInstanceDef),
    EcOp(EcOpInstanceDef),
    Keccak(KeccakInstanceDef),
    Poseidon(PoseidonInstanceDef),
}

impl BuiltinDef {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinDef::Output => "output",
            BuiltinDef::Pedersen(_) => "pedersen",
            BuiltinDef::RangeCheck(_) => "range_check",
            BuiltinDef::Ecdsa(_) => "ecdsa",
            BuiltinDef::Bitwise(_) => "bitwise",
            BuiltinDef::EcOp(_) => "ec_op",
            BuiltinDef::Keccak(_) => "keccak",
            BuiltinDef::Poseidon(_) => "poseidon",
        }
    }

    /// Steps per instance; the output builtin has no fixed ratio
    pub fn ratio(&self) -> Option<u32> {
        match self {
            BuiltinDef::Output => None,
            BuiltinDef::Pedersen(def) => Some(def.ratio),
            BuiltinDef::RangeCheck(def) => Some(def.ratio),
            BuiltinDef::Ecdsa(def) => Some(def.ratio),
            BuiltinDef::Bitwise(def) => Some(def.ratio),
            BuiltinDef::EcOp(def) => Some(def.ratio),
            BuiltinDef::Keccak(def) => Some(def.ratio),
            BuiltinDef::Poseidon(def) => Some(def.ratio),
        }
    }

    fn order_index(&self) -> usize {
        BUILTIN_ORDER.iter().position(|name| *name == self.name()).unwrap_or(usize::MAX)
    }
}

/// Diluted pool used by the bitwise and keccak components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DilutedPoolInstanceDef {
    pub units_per_step: u32,
    pub spacing: u32,
    pub n_bits: u32,
}

impl DilutedPoolInstanceDef {
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.units_per_step == 0 {
            return Err(LayoutError::InvalidDilutedPool("units_per_step"));
        }
        if self.spacing == 0 {
            return Err(LayoutError::InvalidDilutedPool("spacing"));
        }
        if self.n_bits == 0 {
            return Err(LayoutError::InvalidDilutedPool("n_bits"));
        }
        if self.spacing.checked_mul(self.n_bits).is_none() {
            return Err(LayoutError::InvalidDilutedPool("spacing * n_bits"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub name: String,
    /// Range-check units available per step
    pub rc_units: u32,
    pub public_memory_fraction: u32,
    #[serde(default)]
    pub diluted_pool: Option<DilutedPoolInstanceDef>,
    #[serde(default)]
    pub builtins: Vec<BuiltinDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("Unknown layout: {0}")]
    UnknownLayout(String),

    #[error("Builtin {0} appears more than once")]
    DuplicateBuiltin(&'static str),

    #[error("Builtin {0} is out of order")]
    BuiltinOutOfOrder(&'static str),

    #[error("Builtin {0} must have a positive ratio")]
    ZeroRatio(&'static str),

    #[error("Range check must have at least one part")]
    NoRangeCheckParts,

    #[error("Bitwise width {0} exceeds the field width")]
    BitwiseTooWide(u32),

    #[error("Diluted pool {0} must be positive")]
    InvalidDilutedPool(&'static str),

    #[error("Builtin {0} must have at least one instance per component")]
    ZeroInstancesPerComponent(&'static str),

    #[error("Keccak state representation must add up to 1600 bits, got {0}")]
    InvalidKeccakState(u32),

    #[error("Builtins {0:?} are not a subsequence of the layout builtins")]
    UnsupportedBuiltins(Vec<String>),

    #[error("Invalid layout JSON: {0}")]
    Json(String),
}

impl Layout {
    /// Layout without builtins
    pub fn plain() -> Self {
        Self {
            name: "plain".to_string(),
            rc_units: 16,
            public_memory_fraction: 4,
            diluted_pool: None,
            builtins: Vec::new(),
        }
    }

    /// Output, pedersen, range check and ECDSA
    pub fn small() -> Self {
        Self {
            name: "small".to_string(),
            rc_units: 16,
            public_memory_fraction: 4,
            diluted_pool: None,
            builtins: vec![
                BuiltinDef::Output,
                BuiltinDef::Pedersen(PedersenInstanceDef {
                    ratio: 8,
                    repetitions: 4,
                    element_height: 256,
                    element_bits: 252,
                    n_inputs: 2,
                }),
                BuiltinDef::RangeCheck(RangeCheckInstanceDef { ratio: 8, n_parts: 8 }),
                BuiltinDef::Ecdsa(EcdsaInstanceDef {
                    ratio: 512,
                    repetitions: 1,
                    height: 256,
                    n_hash_bits: 251,
                }),
            ],
        }
    }

    /// Every builtin
    pub fn all_cairo() -> Self {
        Self {
            name: "all_cairo".to_string(),
            rc_units: 4,
            public_memory_fraction: 8,
            diluted_pool: Some(DilutedPoolInstanceDef {
                units_per_step: 16,
                spacing: 4,
                n_bits: 16,
            }),
            builtins: vec![
                BuiltinDef::Output,
                BuiltinDef::Pedersen(PedersenInstanceDef {
                    ratio: 256,
                    repetitions: 1,
                    element_height: 256,
                    element_bits: 252,
                    n_inputs: 2,
                }),
                BuiltinDef::RangeCheck(RangeCheckInstanceDef { ratio: 8, n_parts: 8 }),
                BuiltinDef::Ecdsa(EcdsaInstanceDef {
                    ratio: 2048,
                    repetitions: 1,
                    height: 256,
                    n_hash_bits: 251,
                }),
                BuiltinDef::Bitwise(BitwiseInstanceDef { ratio: 16, total_n_bits: 251 }),
                BuiltinDef::EcOp(EcOpInstanceDef {
                    ratio: 1024,
                    scalar_height: 256,
                    scalar_bits: 252,
                }),
                BuiltinDef::Keccak(KeccakInstanceDef {
                    ratio: 2048,
                    state_rep: vec![200; 8],
                    instances_per_component: 16,
                }),
                BuiltinDef::Poseidon(PoseidonInstanceDef {
                    ratio: 256,
                    partial_rounds_partition: vec![64, 22],
                }),
            ],
        }
    }

    pub fn by_name(name: &str) -> Result<Self, LayoutError> {
        match name {
            "plain" => Ok(Self::plain()),
            "small" => Ok(Self::small()),
            "all_cairo" => Ok(Self::all_cairo()),
            other => Err(LayoutError::UnknownLayout(other.to_string())),
        }
    }

    /// Parse and validate a layout from JSON
    pub fn from_json(json: &str) -> Result<Self, LayoutError> {
        let layout: Layout =
            serde_json::from_str(json).map_err(|e| LayoutError::Json(e.to_string()))?;
        layout.validate()?;
        Ok(layout)
    }

    pub fn validate(&self) -> Result<(), LayoutError> {
        if let Some(pool) = &self.diluted_pool {
            pool.validate()?;
        }
        let mut last_index = None;
        for def in &self.builtins {
            let index = def.order_index();
            match last_index {
                Some(last) if last == index => {
                    return Err(LayoutError::DuplicateBuiltin(def.name()))
                }
                Some(last) if last > index => {
                    return Err(LayoutError::BuiltinOutOfOrder(def.name()))
                }
                _ => {}
            }
            last_index = Some(index);

            if def.ratio() == Some(0) {
                return Err(LayoutError::ZeroRatio(def.name()));
            }
            match def {
                BuiltinDef::RangeCheck(rc) if rc.n_parts == 0 => {
                    return Err(LayoutError::NoRangeCheckParts)
                }
                BuiltinDef::Bitwise(bw) if bw.total_n_bits > 251 => {
                    return Err(LayoutError::BitwiseTooWide(bw.total_n_bits))
                }
                BuiltinDef::Keccak(k) if k.instances_per_component == 0 => {
                    return Err(LayoutError::ZeroInstancesPerComponent(def.name()))
                }
                BuiltinDef::Keccak(k) => {
                    let total: u32 = k.state_rep.iter().sum();
                    if total != 1600 {
                        return Err(LayoutError::InvalidKeccakState(total));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn builtin(&self, name: &str) -> Option<&BuiltinDef> {
        self.builtins.iter().find(|def| def.name() == name)
    }

    /// Check that `program_builtins` is an ordered subsequence of this layout's builtins
    pub fn check_program_builtins(&self, program_builtins: &[String]) -> Result<(), LayoutError> {
        let mut layout_names = self.builtins.iter().map(BuiltinDef::name);
        for name in program_builtins {
            if !layout_names.any(|layout_name| layout_name == name) {
                return Err(LayoutError::UnsupportedBuiltins(program_builtins.to_vec()));
            }
        }
        Ok(())
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::plain()
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.builtins.iter().map(BuiltinDef::name).collect();
        write!(f, "{} [{}]", self.name, names.join(", "))
    }
}
