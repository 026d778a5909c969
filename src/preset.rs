//! Factory programs for the electric piano.
//!
//! A program is just a named [`Params`] snapshot. Programs serialize to the
//! same camelCase JSON as the parameters themselves, so hosts can ship their
//! own banks next to the built-in ones.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::params::Params;

/// Number of built-in programs.
pub const NUM_PROGRAMS: usize = 8;

/// A named parameter snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    pub params: Params,
}

impl Program {
    pub fn new(name: impl Into<String>, params: Params) -> Self {
        Program {
            name: name.into(),
            params,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ── Factory bank ────────────────────────────────────────────

const FACTORY: [(&str, [f32; 12]); NUM_PROGRAMS] = [
    ("Default", [0.500, 0.500, 0.500, 0.500, 0.500, 0.650, 0.250, 0.500, 0.50, 0.500, 0.146, 0.000]),
    ("Bright", [0.500, 0.500, 1.000, 0.800, 0.500, 0.650, 0.250, 0.500, 0.50, 0.500, 0.146, 0.500]),
    ("Mellow", [0.500, 0.500, 0.000, 0.000, 0.500, 0.650, 0.250, 0.500, 0.50, 0.500, 0.246, 0.000]),
    ("Autopan", [0.500, 0.500, 0.500, 0.500, 0.250, 0.650, 0.250, 0.500, 0.50, 0.500, 0.246, 0.000]),
    ("Tremolo", [0.500, 0.500, 0.500, 0.500, 0.750, 0.650, 0.250, 0.500, 0.50, 0.500, 0.246, 0.000]),
    ("(default)", [0.500, 0.500, 0.500, 0.500, 0.500, 0.650, 0.250, 0.500, 0.50, 0.500, 0.146, 0.000]),
    ("(default)", [0.500, 0.500, 0.500, 0.500, 0.500, 0.650, 0.250, 0.500, 0.50, 0.500, 0.146, 0.000]),
    ("(default)", [0.500, 0.500, 0.500, 0.500, 0.500, 0.650, 0.250, 0.500, 0.50, 0.500, 0.146, 0.000]),
];

/// The built-in program bank, in slot order.
pub fn factory_programs() -> Vec<Program> {
    FACTORY
        .iter()
        .map(|(name, values)| Program::new(*name, Params::from_array(*values)))
        .collect()
}

/// Look up a built-in program by name (first match).
pub fn factory_program(name: &str) -> Option<Program> {
    factory_programs().into_iter().find(|p| p.name == name)
}
