use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::{event, Level};

use crate::networking::message_types::status_message::NodeEndpoint;
use crate::util::format_url_string;
use crate::SwarmError;

/// Called once per send with the outcome of handing the bytes to the node.
pub type SendCompletion = Box<dyn FnOnce(crate::Result<()>) + Send>;

/// Called for every inbound message. Returning `true` asks for the
/// connection to be closed.
pub type InboundHandler = Arc<dyn Fn(Vec<u8>) -> bool + Send + Sync>;

/// Point to point delivery to a single swarm node.
pub trait NodeConnection: Send + Sync {
    fn send(&self, bytes: Vec<u8>, completion: SendCompletion);
    fn on_message(&self, handler: InboundHandler);
    /// Stops delivery in both directions. Later sends fail.
    fn close(&self);
}

/// Creates the connection for a node the topology has just learned about.
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self, endpoint: &NodeEndpoint) -> crate::Result<Arc<dyn NodeConnection>>;
}

type OutboundSender = mpsc::UnboundedSender<std::result::Result<Message, tungstenite::Error>>;

/// State shared between a connection and the tasks serving its socket.
struct SocketShared {
    url: url::Url,
    outbound: Mutex<Option<OutboundSender>>,
    handler: RwLock<Option<InboundHandler>>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SocketShared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn current_handler(&self) -> Option<InboundHandler> {
        match self.handler.read() {
            Ok(handler) => handler.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_handler(&self, handler: Option<InboundHandler>) {
        match self.handler.write() {
            Ok(mut slot) => *slot = handler,
            Err(poisoned) => *poisoned.into_inner() = handler,
        }
    }

    /// Keeps the reader task of the current socket, aborting the previous one.
    fn set_reader(&self, reader: Option<JoinHandle<()>>) {
        let mut slot = self
            .reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = std::mem::replace(&mut *slot, reader) {
            previous.abort();
        }
    }
}

/// Sends a close frame. The writer task ends once every sender is gone.
fn shut_down(sender: OutboundSender) {
    let _ = sender.send(Ok(Message::Close(None)));
}

/// A websocket to one node. The socket is opened on first use; a send that
/// finds it closed reopens it once before giving up. Dropping the connection
/// closes the socket.
pub struct WebSocketConnection {
    shared: Arc<SocketShared>,
}

impl WebSocketConnection {
    pub fn new(endpoint: &NodeEndpoint) -> crate::Result<Self> {
        let url = url::Url::parse(&format_url_string(&endpoint.host, endpoint.port))
            .map_err(|err| SwarmError::Configuration(err.to_string()))?;
        Ok(WebSocketConnection {
            shared: Arc::new(SocketShared {
                url,
                outbound: Mutex::new(None),
                handler: RwLock::new(None),
                reader: std::sync::Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    async fn open(shared: Arc<SocketShared>) -> crate::Result<OutboundSender> {
        let url = shared.url.clone();
        let (ws_stream, _) = connect_async(url.clone())
            .await
            .map_err(|err| SwarmError::Connection(format!("{}: {}", url, err)))?;
        let (write_sink, mut read_stream) = ws_stream.split();

        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = UnboundedReceiverStream::new(receiver);
        tokio::task::spawn(receiver.forward(write_sink).map(|result| {
            if let Err(err) = result {
                event!(Level::WARN, "error sending websocket msg: {}", err);
            }
        }));

        let this_socket = sender.clone();
        let reader_shared = shared.clone();
        let reader = tokio::task::spawn(async move {
            let shared = reader_shared;
            while let Some(result) = read_stream.next().await {
                match result {
                    Ok(Message::Binary(bytes)) => {
                        let close = match shared.current_handler() {
                            Some(handler) => handler(bytes),
                            None => false,
                        };
                        if close {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        event!(Level::ERROR, "error reading from {}: {}", shared.url, err);
                        break;
                    }
                }
            }
            let mut outbound = shared.outbound.lock().await;
            if outbound
                .as_ref()
                .map_or(false, |current| current.same_channel(&this_socket))
            {
                if let Some(sender) = outbound.take() {
                    shut_down(sender);
                }
            }
            event!(Level::DEBUG, "socket to {} closed", shared.url);
        });
        shared.set_reader(Some(reader));

        Ok(sender)
    }
}

impl NodeConnection for WebSocketConnection {
    fn send(&self, bytes: Vec<u8>, completion: SendCompletion) {
        let shared = self.shared.clone();
        tokio::task::spawn(async move {
            let url = shared.url.clone();
            let mut result = Err(SwarmError::Connection(format!("{}: not connected", url)));
            for _attempt in 0..2 {
                let mut socket = shared.outbound.lock().await;
                if shared.is_closed() {
                    result = Err(SwarmError::Connection(format!("{}: closed", url)));
                    break;
                }
                if socket.is_none() {
                    match WebSocketConnection::open(shared.clone()).await {
                        Ok(sender) => *socket = Some(sender),
                        Err(err) => {
                            result = Err(err);
                            continue;
                        }
                    }
                }
                let delivered = socket
                    .as_ref()
                    .map_or(false, |sender| sender.send(Ok(Message::Binary(bytes.clone()))).is_ok());
                if delivered {
                    result = Ok(());
                    break;
                }
                socket.take();
            }
            // closed while this send held the socket
            if shared.is_closed() {
                shared.set_reader(None);
                if let Some(sender) = shared.outbound.lock().await.take() {
                    shut_down(sender);
                }
            }
            completion(result);
        });
    }

    fn on_message(&self, handler: InboundHandler) {
        if !self.shared.is_closed() {
            self.shared.set_handler(Some(handler));
        }
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.set_handler(None);
        self.shared.set_reader(None);
        // a send in progress holds the lock and shuts the socket itself
        if let Ok(mut socket) = self.shared.outbound.try_lock() {
            if let Some(sender) = socket.take() {
                shut_down(sender);
            }
        }
        event!(Level::DEBUG, "closing connection to {}", self.shared.url);
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens websocket connections to `ws://host:port`.
#[derive(Default)]
pub struct WebSocketConnector;

impl ConnectionFactory for WebSocketConnector {
    fn connect(&self, endpoint: &NodeEndpoint) -> crate::Result<Arc<dyn NodeConnection>> {
        Ok(Arc::new(WebSocketConnection::new(endpoint)?))
    }
}
