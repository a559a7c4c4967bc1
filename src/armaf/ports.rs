//! Request/response channels used to talk to actors.

use std::{fmt::Debug, result::Result, time::Duration};
use thiserror::Error;
use tokio::sync::{mpsc, mpsc::error::SendError, oneshot, watch};

/// Default number of requests which can be queued on a port before senders
/// start waiting.
pub const DEFAULT_PORT_CAPACITY: usize = 8;

type ResponseReceiver<R, E> = oneshot::Receiver<Result<R, E>>;

/// A request sent to an actor.
///
/// Carries the payload and the [oneshot::Sender] the actor answers on. Every
/// request must be answered, otherwise the requester sees
/// [ActorRequestError::Recv].
pub struct Request<P, R, E> {
    pub payload: P,
    pub response_sender: oneshot::Sender<Result<R, E>>,
}

impl<P, R, E> Request<P, R, E> {
    /// Wraps the payload into a request and returns it together with the
    /// receiver on which the answer will arrive.
    pub fn new(payload: P) -> (Request<P, R, E>, ResponseReceiver<R, E>) {
        let (response_sender, response_receiver) = oneshot::channel();
        (
            Request {
                payload,
                response_sender,
            },
            response_receiver,
        )
    }

    /// Answers the request. Fails (returning the response back) if the
    /// requester is gone.
    pub fn respond(self, response: Result<R, E>) -> Result<(), Result<R, E>> {
        self.response_sender.send(response)
    }
}

/// Failure of a single request/response exchange with an actor.
#[derive(Debug, Error, Clone)]
pub enum ActorRequestError<E: Debug> {
    #[error("actor is not accepting requests anymore")]
    Send,

    #[error("actor dropped the request without answering")]
    Recv,

    #[error("actor did not answer in {0:?}")]
    Timeout(Duration),

    #[error("actor failed to handle the request: {0:?}")]
    Actor(E),
}

/// Sending side of an actor's mailbox.
///
/// Ports can be cloned freely. The actor behind a port keeps running as long
/// as at least one clone is alive; once the last one is dropped (or has
/// [ActorPort::await_shutdown] called on it) the actor's
/// [ActorReceiver::recv] returns `None` and the actor is expected to clean up
/// and exit.
#[derive(Debug)]
pub struct ActorPort<P, R, E: Debug> {
    message_sender: mpsc::Sender<Request<P, R, E>>,
    shutdown_receiver: watch::Receiver<()>,
}

// Derived Clone would require P, R and E to be Clone, which anyhow::Error is
// not.
impl<P, R, E: Debug> Clone for ActorPort<P, R, E> {
    fn clone(&self) -> Self {
        Self {
            message_sender: self.message_sender.clone(),
            shutdown_receiver: self.shutdown_receiver.clone(),
        }
    }
}

impl<P, R, E: Debug> ActorPort<P, R, E> {
    /// Creates a connected port and receiver with the default capacity.
    pub fn make() -> (ActorPort<P, R, E>, ActorReceiver<P, R, E>) {
        Self::with_capacity(DEFAULT_PORT_CAPACITY)
    }

    /// Creates a connected port and receiver whose mailbox holds up to
    /// `capacity` pending requests.
    pub fn with_capacity(capacity: usize) -> (ActorPort<P, R, E>, ActorReceiver<P, R, E>) {
        let (message_sender, request_receiver) = mpsc::channel(capacity);
        let (shutdown_notifier, shutdown_receiver) = watch::channel(());
        (
            ActorPort {
                message_sender,
                shutdown_receiver,
            },
            ActorReceiver {
                request_receiver,
                _shutdown_notifier: shutdown_notifier,
            },
        )
    }

    /// Puts an already constructed [Request] into the mailbox.
    pub async fn raw_request(
        &self,
        r: Request<P, R, E>,
    ) -> Result<(), SendError<Request<P, R, E>>> {
        self.message_sender.send(r).await
    }

    /// Sends the payload and waits for the actor's answer.
    pub async fn request(&self, payload: P) -> Result<R, ActorRequestError<E>> {
        let (req, rx) = Request::new(payload);
        if self.raw_request(req).await.is_err() {
            return Err(ActorRequestError::Send);
        }
        match rx.await {
            Err(_) => Err(ActorRequestError::Recv),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(actor_error)) => Err(ActorRequestError::Actor(actor_error)),
        }
    }

    /// Like [ActorPort::request], but gives up after `timeout`.
    pub async fn request_with_timeout(
        &self,
        timeout: Duration,
        payload: P,
    ) -> Result<R, ActorRequestError<E>> {
        match tokio::time::timeout(timeout, self.request(payload)).await {
            Ok(res) => res,
            Err(_) => Err(ActorRequestError::Timeout(timeout)),
        }
    }

    /// Drops this port and waits until the actor has finished its teardown.
    ///
    /// Only returns after every other clone of the port is gone as well.
    pub async fn await_shutdown(self) {
        // The actor only notices shutdown once all senders are closed, ours
        // included.
        drop(self.message_sender);
        let mut shutdown_receiver = self.shutdown_receiver;
        let result = shutdown_receiver.changed().await;
        assert!(result.is_err());
    }
}

/// Receiving side of an [ActorPort].
///
/// Dropping it signals actor termination to [ActorPort::await_shutdown], so
/// it must be the last thing the actor lets go of.
#[derive(Debug)]
pub struct ActorReceiver<P, R, E: Debug> {
    pub request_receiver: mpsc::Receiver<Request<P, R, E>>,
    _shutdown_notifier: watch::Sender<()>,
}

impl<P, R, E: Debug> ActorReceiver<P, R, E> {
    /// Waits for the next request. `None` means every port has been dropped.
    pub async fn recv(&mut self) -> Option<Request<P, R, E>> {
        self.request_receiver.recv().await
    }
}
