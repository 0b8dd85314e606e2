pub mod orchestrator;
pub mod session;
pub mod supervisor;
pub mod transport;
