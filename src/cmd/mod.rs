//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `build`    | `Build`          |
//! | `parallel` | `Parallel`       |
//! | `audit`    | `Audit`          |
//! | `config`   | `Config`         |

pub mod audit;
pub mod build;
pub mod config;
pub mod parallel;

pub use audit::cmd_audit;
pub use build::{BuildArgs, cmd_build};
pub use config::cmd_config;
pub use parallel::cmd_parallel;
