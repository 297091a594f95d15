pub mod agent;
pub mod audit;
pub mod compliance;
pub mod config;
pub mod errors;
pub mod git;
pub mod logging;
pub mod orchestrator;
pub mod policy;
pub mod prompts;
pub mod publish;
pub mod util;
pub mod workspace;

pub use errors::BuildError;
pub use orchestrator::{BuildOrchestrator, BuildRequest, BuildResult, ParallelOrchestrator};
