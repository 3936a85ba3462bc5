pub mod client;
pub mod protocol;

/// Socket file name inside the runtime directory.
pub const SOCKET_FILE: &str = "planner.sock";
