use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::{SinkExt, Stream, StreamExt};
use pricewatch_core::{Broadcaster, Notification, PriceHub, SendError, Subscriber, SubscriberId};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

const OUTBOX_CAPACITY: usize = 64;

/// Bounded hand-off between the broadcaster and a connection's writer task.
/// Dropping the sender ends the writer, which is how `close` works.
struct Outbox {
    tx: Mutex<Option<mpsc::Sender<String>>>,
    open: AtomicBool,
}

impl Outbox {
    fn new() -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let outbox = Self {
            tx: Mutex::new(Some(tx)),
            open: AtomicBool::new(true),
        };
        (outbox, rx)
    }

    fn sender(&self) -> Option<mpsc::Sender<String>> {
        self.tx.lock().ok().and_then(|guard| guard.clone())
    }

    fn push(&self, frame: &str) -> Result<(), SendError> {
        let tx = self.sender().ok_or(SendError::Closed)?;
        tx.try_send(frame.to_string()).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => {
                self.open.store(false, Ordering::SeqCst);
                SendError::Closed
            }
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.sender().is_some_and(|tx| !tx.is_closed())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
    }
}

/// Push-socket subscriber; frames go out as WebSocket text messages.
pub struct WsSubscriber {
    outbox: Outbox,
}

/// Text-event-stream subscriber; frames go out as `data:` events.
pub struct SseSubscriber {
    outbox: Outbox,
}

impl WsSubscriber {
    fn new() -> (Arc<Self>, mpsc::Receiver<String>) {
        let (outbox, rx) = Outbox::new();
        (Arc::new(Self { outbox }), rx)
    }
}

impl SseSubscriber {
    fn new() -> (Arc<Self>, mpsc::Receiver<String>) {
        let (outbox, rx) = Outbox::new();
        (Arc::new(Self { outbox }), rx)
    }
}

#[async_trait]
impl Subscriber for WsSubscriber {
    fn kind(&self) -> &'static str {
        "ws"
    }

    async fn send(&self, frame: &str) -> Result<(), SendError> {
        self.outbox.push(frame)
    }

    fn is_open(&self) -> bool {
        self.outbox.is_open()
    }

    fn close(&self) {
        self.outbox.close();
    }
}

#[async_trait]
impl Subscriber for SseSubscriber {
    fn kind(&self) -> &'static str {
        "sse"
    }

    async fn send(&self, frame: &str) -> Result<(), SendError> {
        self.outbox.push(frame)
    }

    fn is_open(&self) -> bool {
        self.outbox.is_open()
    }

    fn close(&self) {
        self.outbox.close();
    }
}

fn greeting() -> Option<String> {
    match Notification::connected().encode() {
        Ok(frame) => Some(frame),
        Err(err) => {
            warn!(error = %err, "failed to encode greeting");
            None
        }
    }
}

/// Unsubscribes when the connection's stream or task is dropped.
struct Registration {
    broadcaster: Broadcaster,
    id: SubscriberId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let broadcaster = self.broadcaster.clone();
        let id = self.id;
        runtime.spawn(async move {
            broadcaster.unsubscribe(id).await;
        });
    }
}

pub async fn events_handler(
    State(hub): State<PriceHub>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (subscriber, rx) = SseSubscriber::new();
    if let Some(frame) = greeting() {
        let _ = subscriber.send(&frame).await;
    }
    let broadcaster = hub.broadcaster().clone();
    let id = broadcaster.subscribe(subscriber).await;
    let registration = Registration { broadcaster, id };

    let opening = futures_util::stream::once(async { Ok(Event::default().comment("connected")) });
    let frames = ReceiverStream::new(rx).map(move |frame| {
        let _keep = &registration;
        Ok(Event::default().data(frame))
    });

    Sse::new(opening.chain(frames)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<PriceHub>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: PriceHub) {
    let (subscriber, mut rx) = WsSubscriber::new();
    if let Some(frame) = greeting() {
        let _ = subscriber.send(&frame).await;
    }
    let broadcaster = hub.broadcaster().clone();
    let id = broadcaster.subscribe(subscriber.clone()).await;
    let _registration = Registration { broadcaster, id };

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Close(_) => break,
                Message::Text(text) => debug!(%id, len = text.as_str().len(), "ignoring client message"),
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => {
            subscriber.close();
            writer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_fails_once_reader_is_gone() {
        let (subscriber, rx) = SseSubscriber::new();
        assert!(subscriber.is_open());
        subscriber.send("one").await.expect("first send");
        drop(rx);
        assert!(!subscriber.is_open());
        assert!(matches!(subscriber.send("two").await, Err(SendError::Closed)));
    }

    #[tokio::test]
    async fn full_outbox_is_a_send_failure() {
        let (subscriber, _rx) = WsSubscriber::new();
        for i in 0..OUTBOX_CAPACITY {
            subscriber.send(&i.to_string()).await.expect("within capacity");
        }
        assert!(matches!(subscriber.send("overflow").await, Err(SendError::Full)));
    }

    #[tokio::test]
    async fn close_ends_the_writer_stream() {
        let (subscriber, mut rx) = WsSubscriber::new();
        subscriber.send("last").await.expect("send");
        subscriber.close();
        assert!(!subscriber.is_open());
        assert_eq!(rx.recv().await.as_deref(), Some("last"));
        assert_eq!(rx.recv().await, None);
    }
}
