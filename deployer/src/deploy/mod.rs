//! Deployment engine: stages, orchestrator, and their plumbing

pub mod background;
pub mod cancel;
pub mod decode;
pub mod events;
pub mod executor;
pub mod fsm;
pub mod interactive;
pub mod local;
pub mod session;
pub mod transfer;
