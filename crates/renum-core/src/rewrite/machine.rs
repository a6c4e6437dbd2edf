//! Construction-sequence state machine.
//!
//! javac compiles every enum constant into the same group of instructions
//! inside `<clinit>`:
//!
//! ```text
//! new           Color        // Idle -> AwaitingLiteral
//! dup
//! ldc           "RED"        // substituted, AwaitingLiteral -> AwaitingStore
//! iconst_0
//! invokespecial Color.<init>(Ljava/lang/String;I)V
//! putstatic     Color.RED    // AwaitingStore -> Idle
//! ```
//!
//! Any `new` arms a sequence while names remain. A constant with a body
//! allocates its subclass (`Color$1`, or whatever a remapper renamed it to)
//! in place of the unit itself. Once every name is used, only another `new`
//! of the unit's own type is an error; other allocations, such as an
//! anonymous class in a static field initializer, pass through.
//!
//! The machine only sees abstract [`Step`]s, so its guards can be exercised
//! without assembling a class file.

use crate::classfile::object_descriptor;
use crate::error::{Error, Result};
use std::fmt;
use tracing::trace;

/// Constant loaded by an `ldc`-family instruction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal<'a> {
    /// `CONSTANT_String`
    String(&'a str),
    /// Anything else, described for error messages
    Other(&'a str),
}

/// Instruction as seen by the machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step<'a> {
    /// `new` of the given internal name
    Allocate {
        /// Allocated class
        class: &'a str,
    },
    /// `ldc`, `ldc_w` or `ldc2_w`
    LoadConstant(Literal<'a>),
    /// `putstatic`
    StoreStatic {
        /// Owner class of the field
        owner: &'a str,
        /// Field name
        name: &'a str,
        /// Field descriptor
        descriptor: &'a str,
    },
    /// Any other instruction
    Other,
}

/// What to do with the instruction that produced a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'n> {
    /// Emit unchanged
    Forward,
    /// Replace the loaded string with this name
    Substitute(&'n str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    AwaitingLiteral,
    AwaitingStore {
        /// Index into the name list of the substituted name
        name: usize,
    },
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Idle => f.write_str("idle"),
            State::AwaitingLiteral => f.write_str("awaiting the name literal"),
            State::AwaitingStore { .. } => f.write_str("awaiting the constant's putstatic"),
        }
    }
}

/// Tracks construction sequences within one static initializer
#[derive(Debug)]
pub struct ConstructionMachine<'n> {
    unit: &'n str,
    descriptor: String,
    names: &'n [String],
    next: usize,
    state: State,
}

impl<'n> ConstructionMachine<'n> {
    /// Creates a machine for `unit` that hands out `names` in order
    pub fn new(unit: &'n str, names: &'n [String]) -> Self {
        Self {
            unit,
            descriptor: object_descriptor(unit),
            names,
            next: 0,
            state: State::Idle,
        }
    }

    /// Number of names substituted so far
    pub fn consumed(&self) -> usize {
        self.next
    }

    /// Feed one instruction
    pub fn observe(&mut self, step: Step<'_>) -> Result<Action<'n>> {
        match (self.state, step) {
            (State::Idle, Step::Allocate { class }) if self.next < self.names.len() => {
                trace!("{}: construction of {} begins", self.unit, class);
                self.state = State::AwaitingLiteral;
                Ok(Action::Forward)
            }
            (State::Idle, Step::Allocate { class }) if class == self.unit => {
                Err(Error::ConstructionCountMismatch {
                    unit: self.unit.to_owned(),
                    declared: self.names.len(),
                    constructed: self.next + 1,
                })
            }
            (State::AwaitingLiteral, Step::LoadConstant(Literal::String(current))) => {
                let names = self.names;
                let name: &'n str = &names[self.next];
                trace!("{}: literal \"{}\" becomes \"{}\"", self.unit, current, name);
                self.state = State::AwaitingStore { name: self.next };
                self.next += 1;
                Ok(Action::Substitute(name))
            }
            (State::AwaitingLiteral, Step::LoadConstant(Literal::Other(found))) => {
                Err(Error::NonStringLiteral {
                    unit: self.unit.to_owned(),
                    found: found.to_owned(),
                })
            }
            (
                State::AwaitingStore { name },
                Step::StoreStatic {
                    owner,
                    name: field,
                    descriptor,
                },
            ) if owner == self.unit
                && field == self.names[name]
                && descriptor == self.descriptor =>
            {
                self.state = State::Idle;
                Ok(Action::Forward)
            }
            _ => Ok(Action::Forward),
        }
    }

    /// End of the static initializer
    pub fn finish(self) -> Result<usize> {
        if self.state != State::Idle {
            return Err(Error::IncompleteConstruction {
                unit: self.unit.to_owned(),
                state: self.state.to_string(),
            });
        }
        if self.next != self.names.len() {
            return Err(Error::ConstructionCountMismatch {
                unit: self.unit.to_owned(),
                declared: self.names.len(),
                constructed: self.next,
            });
        }
        Ok(self.next)
    }
}
