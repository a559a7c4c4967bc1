use super::ports::{ActorPort, ActorRequestError, Request};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

enum LevelMessage {
    Raise,
    Stall,
    // Actors must always answer; this one exists only to exercise Recv errors.
    Vanish,
}

/// Spawns an actor which raises a level up to 2 and then refuses.
fn spawn_level_actor(finished: Arc<AtomicBool>) -> ActorPort<LevelMessage, u32, String> {
    let (port, mut rx) = ActorPort::make();
    tokio::spawn(async move {
        let mut level = 0;
        let mut stalled = vec![];
        while let Some(req) = rx.recv().await {
            match req.payload {
                LevelMessage::Raise if level < 2 => {
                    level += 1;
                    req.respond(Ok(level)).expect("Couldn't respond to request");
                }
                LevelMessage::Raise => {
                    req.respond(Err("Saturated".to_owned()))
                        .expect("Couldn't respond to request");
                }
                LevelMessage::Stall => stalled.push(req),
                LevelMessage::Vanish => return,
            }
        }
        finished.store(true, Ordering::Release);
    });
    port
}

#[tokio::test]
async fn test_request_response() {
    let (request, receiver) = Request::<(), bool, ()>::new(());
    assert_eq!(request.payload, ());
    request
        .respond(Ok(true))
        .expect("Channel failure when sending response");
    assert_eq!(receiver.await.expect("Response lost"), Ok(true));
}

#[tokio::test]
async fn test_actor_port() {
    let finished = Arc::new(AtomicBool::new(false));
    let port = spawn_level_actor(finished.clone());
    assert_eq!(port.request(LevelMessage::Raise).await.unwrap(), 1);
    assert_eq!(port.clone().request(LevelMessage::Raise).await.unwrap(), 2);
    match port.request(LevelMessage::Raise).await {
        Err(ActorRequestError::Actor(e)) => assert_eq!(e, "Saturated"),
        _ => panic!("An error from the actor is not translated correctly"),
    }
    assert!(!finished.load(Ordering::Acquire));
    port.await_shutdown().await;
    assert!(finished.load(Ordering::Acquire));
}

#[tokio::test]
async fn test_request_errors() {
    let port = spawn_level_actor(Arc::new(AtomicBool::new(false)));
    assert!(matches!(
        port.request(LevelMessage::Vanish).await,
        Err(ActorRequestError::Recv)
    ));
    assert!(matches!(
        port.request(LevelMessage::Raise).await,
        Err(ActorRequestError::Send)
    ));
    // Hangs if the shutdown notifier isn't dropped together with the receiver
    port.await_shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout() {
    let port = spawn_level_actor(Arc::new(AtomicBool::new(false)));
    let res = port
        .request_with_timeout(Duration::from_millis(100), LevelMessage::Stall)
        .await;
    assert!(matches!(res, Err(ActorRequestError::Timeout(_))));
    assert_eq!(
        port.request_with_timeout(Duration::from_millis(100), LevelMessage::Raise)
            .await
            .unwrap(),
        1
    );
}
