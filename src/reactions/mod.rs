pub mod domain;
pub mod store;

pub use domain::{ReactionKind, ReactionSets, ReactionState, ReactionWrite, Transition, WriteOp};
pub use store::{ReactionStore, ToggleOutcome};
