//! # Registries
//!
//! In-process maps built once at startup and consulted on the hot path:
//! live worker nodes, the job-type routing table, and the skill handler map.

pub mod node_registry;
pub mod routing_table;
pub mod skill_registry;

pub use node_registry::{NodeRegistry, NodeSnapshot};
pub use routing_table::RoutingTable;
pub use skill_registry::{Skill, SkillContext, SkillError, SkillRegistry};
