// State machine engine shared by every install and upgrade workflow

pub mod engine;
pub mod table;

pub use engine::{Lock, StateMachine, StateMachineError, TransitionRecord};
pub use table::{State, TransitionTable};
