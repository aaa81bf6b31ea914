// Sync module - HOW WRITES SPREAD
// Handles inbound gossip for the store and serializes outbound broadcasts

mod actor;
mod agent;

pub use actor::{ActorConfig, ActorError, ActorStats, Disseminator, SubmitOutcome, Task};
pub use agent::{AgentStats, NodeAgent};
