//! Request/response actors built on [super::ports].

use super::ActorPort;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::oneshot;

/// An actor which only answers requests sent to its [ActorPort].
///
/// The lifecycle has three phases:
///
/// 1. [Server::initialize] runs before [spawn_server] returns. If it fails,
///    the error is returned from [spawn_server] and no port is handed out.
/// 2. [Server::handle_message] runs once per request, strictly one at a time.
/// 3. [Server::tear_down] runs once every port has been dropped. Use it to
///    put hardware back into a sane state (for example, stopping brightness
///    animations before the controllers owning them go away). Errors are only
///    logged.
#[async_trait]
pub trait Server<P, R>: Send + 'static {
    /// Name used in log messages
    fn get_name(&self) -> String;

    async fn handle_message(&mut self, payload: P) -> Result<R>;

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    async fn tear_down(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Runs the [Server] in its own task and returns the port used to reach it.
pub async fn spawn_server<P, R>(
    mut server: impl Server<P, R>,
) -> Result<ActorPort<P, R, anyhow::Error>>
where
    P: Send + 'static,
    R: Send + 'static,
{
    let name = server.get_name();
    log::debug!("{} spawning", name);
    let (port, mut rx) = ActorPort::make();
    let (initialization_sender, initialization_receiver) = oneshot::channel::<Result<()>>();
    tokio::spawn(async move {
        let name = server.get_name();
        let init_result = server.initialize().await;
        let had_init_error = init_result.is_err();
        if initialization_sender.send(init_result).is_err() {
            log::error!("{} initialized, but nobody is waiting for it", name);
            return;
        }
        if had_init_error {
            return;
        }
        log::info!("{} initialized successfully", name);
        while let Some(req) = rx.recv().await {
            let res = server.handle_message(req.payload).await;
            if let Err(e) = &res {
                log::error!("{} message handler returned error: {}", name, e);
            }
            if req.response_sender.send(res).is_err() {
                log::warn!("{} answered a request nobody waits for anymore", name);
            }
        }
        log::debug!("{} stopping", name);
        if let Err(e) = server.tear_down().await {
            log::error!("{} failed to tear down: {}", name, e);
        }
        log::debug!("{} stopped", name);
    });

    match initialization_receiver.await {
        Ok(Ok(_)) => Ok(port),
        Ok(Err(e)) => {
            log::error!("Error initializing {}: {}", name, e);
            Err(e)
        }
        Err(e) => Err(anyhow!(e)),
    }
}
