pub mod attempt;
pub mod deadline;
pub mod fallback;
pub mod outcome;
pub mod page;
pub mod state_machine;
pub mod trigger;
