//! Version-store configuration

/// Options read by the branch state machine and the staging path
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Bounded retry count for optimistic collapse and staging updates
    pub p2_commit_attempts: u32,
    /// Wait for the intention-log collapse instead of letting it finish in
    /// the background
    pub wait_on_collapse: bool,
    /// Emit tracing spans around the collapse and each attempt
    pub enable_tracing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            p2_commit_attempts: 5,
            wait_on_collapse: true,
            enable_tracing: false,
        }
    }
}
