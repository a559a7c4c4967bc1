use super::server::{spawn_server, Server};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Hands out increasing brightness levels until `ceiling` is hit.
struct LevelServer {
    level: u32,
    ceiling: u32,
    fail_initialization: bool,
    teardown_notifier: mpsc::Sender<u32>,
}

impl LevelServer {
    fn new(ceiling: u32, fail_initialization: bool) -> (LevelServer, mpsc::Receiver<u32>) {
        let (teardown_notifier, teardown_receiver) = mpsc::channel(1);
        (
            LevelServer {
                level: 0,
                ceiling,
                fail_initialization,
                teardown_notifier,
            },
            teardown_receiver,
        )
    }
}

#[async_trait]
impl Server<u32, u32> for LevelServer {
    fn get_name(&self) -> String {
        "LevelServer".to_owned()
    }

    async fn handle_message(&mut self, step: u32) -> Result<u32> {
        if self.level + step > self.ceiling {
            return Err(anyhow!("Above ceiling"));
        }
        self.level += step;
        Ok(self.level)
    }

    async fn initialize(&mut self) -> Result<()> {
        if self.fail_initialization {
            Err(anyhow!("Forced initialization fail"))
        } else {
            Ok(())
        }
    }

    async fn tear_down(&mut self) -> Result<()> {
        Ok(self.teardown_notifier.send(self.level).await?)
    }
}

#[tokio::test]
async fn test_happy_path() {
    let (server, mut notifier) = LevelServer::new(10, false);
    let port = spawn_server(server).await.expect("No port returned");
    assert_eq!(port.request(2).await.unwrap(), 2);
    assert_eq!(port.request(3).await.unwrap(), 5);
    drop(port);
    assert_eq!(notifier.recv().await, Some(5));
}

#[tokio::test]
async fn test_handler_failure_keeps_state() {
    let (server, mut notifier) = LevelServer::new(4, false);
    let port = spawn_server(server).await.expect("No port returned");
    assert_eq!(port.request(3).await.unwrap(), 3);
    assert!(port.request(3).await.is_err());
    assert_eq!(port.request(1).await.unwrap(), 4);
    port.await_shutdown().await;
    assert_eq!(notifier.recv().await, Some(4));
}

#[tokio::test]
async fn test_initialization_failure() {
    let (server, _notifier) = LevelServer::new(4, true);
    assert!(spawn_server(server).await.is_err());
}
