//! Library surface of the agent-hub binary: the HTTP transport and the
//! listen-mode runtime, exposed so integration tests can drive the full
//! stack in-process.

pub mod listen;
pub mod logging;
pub mod server;
