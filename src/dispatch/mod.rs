//! # Dispatch
//!
//! Two execution paths share the dispatch surface: the [`DispatchHub`]
//! assigns jobs to remote worker nodes and absorbs their result callbacks,
//! and the [`SkillDispatcher`] runs jobs in-process through registered
//! skill handlers.

pub mod hub;
pub mod skill_dispatcher;

pub use hub::DispatchHub;
pub use skill_dispatcher::SkillDispatcher;
