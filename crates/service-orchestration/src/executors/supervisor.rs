//! Dedicated supervisor threads.

use command_executor::CancellationToken;
use std::future::Future;
use std::thread::JoinHandle;
use tracing::{debug, error};

/// A named OS thread driving one supervision loop to completion
pub struct Supervisor {
    name: String,
    token: CancellationToken,
    thread: JoinHandle<()>,
}

impl Supervisor {
    /// Spawn `name` running the future built by `body` under `smol::block_on`
    pub fn spawn<F, Fut>(name: String, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()>,
    {
        let token = CancellationToken::new();
        let thread_token = token.clone();
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || smol::block_on(body(thread_token)))?;
        debug!(supervisor = %name, "Supervisor started");
        Ok(Self {
            name,
            token,
            thread,
        })
    }

    /// Cancel the loop and wait for the thread to exit
    pub async fn stop(self) {
        self.token.cancel();
        let name = self.name;
        let thread = self.thread;
        if smol::unblock(move || thread.join()).await.is_err() {
            error!(supervisor = %name, "Supervisor thread panicked");
        } else {
            debug!(supervisor = %name, "Supervisor stopped");
        }
    }
}
