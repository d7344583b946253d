//! Community bookkeeping for modularity optimization.
//!
//! - [`seeding`]: remaps external seed values into dense internal ids.
//! - [`state`]: double-buffered community assignment and weight accumulators.
//! - [`influence`]: per-node scratch map of neighbouring community weights.
//! - [`local_move`]: the move decision for all nodes of one color.
//! - [`modularity`]: parallel modularity and a sequential reference tally.

pub mod influence;
pub mod local_move;
pub mod modularity;
pub mod seeding;
pub mod state;

pub use influence::CommunityInfluences;
pub use local_move::{LocalMovePass, MoveDecision, modularity_gain};
pub use modularity::{ModularityCounters, modularity};
pub use seeding::{Seed, SeedMapping};
pub use state::{CommunityIds, CommunityState};
