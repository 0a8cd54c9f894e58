pub mod compiler;
pub mod error;
pub mod grader;
pub mod handler;
pub mod language;
pub mod runner;
pub mod sandbox;
pub mod testcase;
pub mod workdir;

#[cfg(test)]
mod testing;

pub use error::HandlerError;
pub use handler::{JudgeHandler, JudgeMessage};
pub use sandbox::{Judger, Sandbox};
pub use testcase::TestcaseStore;
