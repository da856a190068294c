use std::collections::VecDeque;

/// Supplies candidate servers for new connections.
pub trait ServerPool {
    /// Returns the next server believed to be live, as `"host:port"`, or
    /// `None` when the pool is exhausted.
    fn next_live_server(&mut self) -> Option<String>;
}

/// Round-robin pool over a static server list.
pub struct RoundRobinPool {
    servers: VecDeque<String>,
}

impl RoundRobinPool {
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            servers: VecDeque::from(servers),
        }
    }

    /// Adds a server to the pool. Duplicates are ignored.
    pub fn add_server(&mut self, server: String) {
        if !self.servers.contains(&server) {
            self.servers.push_back(server);
        }
    }

    /// Removes a server from the pool.
    pub fn remove_server(&mut self, server: &str) {
        self.servers.retain(|s| s != server);
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }
}

impl ServerPool for RoundRobinPool {
    fn next_live_server(&mut self) -> Option<String> {
        // Rotate: move first to back, return it.
        let server = self.servers.pop_front()?;
        self.servers.push_back(server.clone());
        Some(server)
    }
}
