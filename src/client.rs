use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::{event, Level};

use crate::networking::authenticator::{
    MessageAuthenticator, NullAuthenticator, SignatureAuthenticator,
};
use crate::networking::connection::WebSocketConnector;
use crate::networking::dispatcher::MessageDispatcher;
use crate::networking::message_types::database_message::{
    DatabaseOperation, DatabaseResponse, DatabaseResult, DATABASE_EXISTS, DATABASE_NOT_FOUND,
    TIMEOUT_ERROR_MESSAGE,
};
use crate::networking::topology::{SendPolicy, SwarmTopology};
use crate::settings::ClientSettings;
use crate::SwarmError;

/// Usage figures of one database.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DatabaseSize {
    pub bytes: u64,
    pub keys: u64,
    pub remaining_bytes: u64,
    pub max_size: u64,
}

struct ClientContext {
    handle: Handle,
    topology: Arc<SwarmTopology>,
    dispatcher: Arc<MessageDispatcher>,
}

impl ClientContext {
    /// Dispatches on the event loop; the receiver yields the single response.
    fn submit(
        self: &Arc<Self>,
        db_uuid: &str,
        operation: DatabaseOperation,
        policy: SendPolicy,
    ) -> oneshot::Receiver<DatabaseResponse> {
        let (sender, receiver) = oneshot::channel();
        let context = self.clone();
        let db_uuid = db_uuid.to_string();
        self.handle.spawn(async move {
            context.dispatcher.dispatch(
                &db_uuid,
                operation,
                policy,
                Box::new(move |response| {
                    let _ = sender.send(response);
                }),
            );
        });
        receiver
    }
}

fn event_loop_stopped() -> SwarmError {
    SwarmError::Connection(String::from("swarm event loop stopped"))
}

fn settle(response: Result<DatabaseResponse, oneshot::error::RecvError>) -> crate::Result<DatabaseResult> {
    let response = response.map_err(|_| event_loop_stopped())?;
    match response.result {
        DatabaseResult::Error { message } => Err(if message == TIMEOUT_ERROR_MESSAGE {
            SwarmError::Timeout
        } else if message.contains(DATABASE_NOT_FOUND) {
            SwarmError::NoDatabase
        } else if message.contains(DATABASE_EXISTS) {
            SwarmError::AlreadyExists
        } else {
            SwarmError::Database(message)
        }),
        result => Ok(result),
    }
}

fn unexpected(result: DatabaseResult) -> SwarmError {
    SwarmError::UnexpectedResponse(format!("{:?}", result))
}

fn expect_ack(result: DatabaseResult) -> crate::Result<()> {
    match result {
        DatabaseResult::Ack => Ok(()),
        other => Err(unexpected(other)),
    }
}

fn expect_value(result: DatabaseResult) -> crate::Result<Vec<u8>> {
    match result {
        DatabaseResult::Read { value, .. } => Ok(value),
        other => Err(unexpected(other)),
    }
}

fn expect_quick_value(result: DatabaseResult) -> crate::Result<Vec<u8>> {
    match result {
        DatabaseResult::QuickRead { value, error, .. } => {
            if error.is_empty() {
                Ok(value)
            } else {
                Err(SwarmError::Database(error))
            }
        }
        other => Err(unexpected(other)),
    }
}

fn expect_has(result: DatabaseResult) -> crate::Result<bool> {
    match result {
        DatabaseResult::Has { has, .. } | DatabaseResult::HasDb { has, .. } => Ok(has),
        other => Err(unexpected(other)),
    }
}

fn expect_keys(result: DatabaseResult) -> crate::Result<Vec<String>> {
    match result {
        DatabaseResult::Keys { keys } => Ok(keys),
        other => Err(unexpected(other)),
    }
}

fn expect_size(result: DatabaseResult) -> crate::Result<DatabaseSize> {
    match result {
        DatabaseResult::Size {
            bytes,
            keys,
            remaining_bytes,
            max_size,
        } => Ok(DatabaseSize {
            bytes,
            keys,
            remaining_bytes,
            max_size,
        }),
        other => Err(unexpected(other)),
    }
}

fn expect_ttl(result: DatabaseResult) -> crate::Result<u64> {
    match result {
        DatabaseResult::Ttl { ttl, .. } => Ok(ttl),
        other => Err(unexpected(other)),
    }
}

/// A connection to one swarm.
///
/// All protocol work runs on a single-threaded tokio runtime owned by a
/// dedicated `swarm-event-loop` thread. Dropping the client stops that thread;
/// requests still in flight then fail with [`SwarmError::Connection`].
pub struct SwarmClient {
    context: Arc<ClientContext>,
    shutdown: Option<oneshot::Sender<()>>,
    event_loop: Option<thread::JoinHandle<()>>,
}

impl SwarmClient {
    /// Starts the event loop, contacts the configured nodes and waits for the
    /// first status response, at most `settings.timeout()`.
    ///
    /// Blocks the calling thread, so it must not be called from async code.
    pub fn connect(settings: ClientSettings) -> crate::Result<SwarmClient> {
        let keypair = settings.keypair()?;
        let authenticator: Arc<dyn MessageAuthenticator> = if settings.trusted {
            Arc::new(NullAuthenticator::new(&keypair.address()))
        } else {
            Arc::new(SignatureAuthenticator::new(keypair))
        };

        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let (shutdown, shutdown_signal) = oneshot::channel::<()>();
        let event_loop = thread::Builder::new()
            .name(String::from("swarm-event-loop"))
            .spawn(move || {
                runtime.block_on(async {
                    let _ = shutdown_signal.await;
                });
                event!(Level::DEBUG, "swarm event loop stopped");
            })?;

        let topology = SwarmTopology::new(
            &settings.swarm_id,
            settings.nodes.clone(),
            authenticator,
            Arc::new(WebSocketConnector::default()),
        )?;
        let dispatcher = MessageDispatcher::new(topology.clone());
        dispatcher.set_timeout(settings.timeout());

        let client = SwarmClient {
            context: Arc::new(ClientContext {
                handle,
                topology,
                dispatcher,
            }),
            shutdown: Some(shutdown),
            event_loop: Some(event_loop),
        };
        client.wait_until_ready(settings.timeout())?;
        event!(
            Level::INFO,
            "connected to swarm {} ({} nodes)",
            settings.swarm_id,
            client.context.topology.node_keys().len()
        );
        Ok(client)
    }

    fn wait_until_ready(&self, wait: Duration) -> crate::Result<()> {
        let (ready, ready_signal) = oneshot::channel::<()>();
        let (outcome, outcome_signal) = oneshot::channel();
        let topology = self.context.topology.clone();
        self.context.handle.spawn(async move {
            let initialized = topology.initialize(Box::new(move || {
                let _ = ready.send(());
            }));
            let result = match initialized {
                Ok(()) => match tokio::time::timeout(wait, ready_signal).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(event_loop_stopped()),
                    Err(_) => Err(SwarmError::Timeout),
                },
                Err(err) => Err(err),
            };
            let _ = outcome.send(result);
        });
        outcome_signal
            .blocking_recv()
            .map_err(|_| event_loop_stopped())?
    }

    pub fn topology(&self) -> &Arc<SwarmTopology> {
        &self.context.topology
    }

    pub fn database(&self, db_uuid: &str) -> Database {
        Database {
            context: self.context.clone(),
            uuid: db_uuid.to_string(),
        }
    }

    pub fn create_db(&self, db_uuid: &str, max_size: u64, random_evict: bool) -> crate::Result<()> {
        self.database(db_uuid)
            .blocking()
            .create_db(max_size, random_evict)
    }

    pub fn has_db(&self, db_uuid: &str) -> crate::Result<bool> {
        self.database(db_uuid).blocking().has_db()
    }

    pub fn delete_db(&self, db_uuid: &str) -> crate::Result<()> {
        self.database(db_uuid).blocking().delete_db()
    }
}

impl Drop for SwarmClient {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(event_loop) = self.event_loop.take() {
            if event_loop.join().is_err() {
                event!(Level::ERROR, "swarm event loop panicked");
            }
        }
    }
}

/// One database of the swarm. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    context: Arc<ClientContext>,
    uuid: String,
}

impl Database {
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Synchronous versions of the same calls.
    pub fn blocking(self) -> BlockingDatabase {
        BlockingDatabase { database: self }
    }

    async fn request(&self, operation: DatabaseOperation, policy: SendPolicy) -> crate::Result<DatabaseResult> {
        settle(self.context.submit(&self.uuid, operation, policy).await)
    }

    fn request_blocking(&self, operation: DatabaseOperation, policy: SendPolicy) -> crate::Result<DatabaseResult> {
        settle(self.context.submit(&self.uuid, operation, policy).blocking_recv())
    }

    pub async fn create_db(&self, max_size: u64, random_evict: bool) -> crate::Result<()> {
        let operation = DatabaseOperation::CreateDb {
            max_size,
            random_evict,
        };
        expect_ack(self.request(operation, SendPolicy::Normal).await?)
    }

    pub async fn has_db(&self) -> crate::Result<bool> {
        expect_has(self.request(DatabaseOperation::HasDb, SendPolicy::Normal).await?)
    }

    pub async fn delete_db(&self) -> crate::Result<()> {
        expect_ack(self.request(DatabaseOperation::DeleteDb, SendPolicy::Normal).await?)
    }

    /// Stores a new key. `expire` is in seconds, 0 for never.
    pub async fn create(&self, key: &str, value: Vec<u8>, expire: u64) -> crate::Result<()> {
        let operation = DatabaseOperation::Create {
            key: key.to_string(),
            value,
            expire,
        };
        expect_ack(self.request(operation, SendPolicy::Normal).await?)
    }

    pub async fn read(&self, key: &str) -> crate::Result<Vec<u8>> {
        let operation = DatabaseOperation::Read {
            key: key.to_string(),
        };
        expect_value(self.request(operation, SendPolicy::Normal).await?)
    }

    /// Reads from the fastest node alone. Not verified by a quorum.
    pub async fn quick_read(&self, key: &str) -> crate::Result<Vec<u8>> {
        let operation = DatabaseOperation::QuickRead {
            key: key.to_string(),
        };
        expect_quick_value(self.request(operation, SendPolicy::Fastest).await?)
    }

    pub async fn update(&self, key: &str, value: Vec<u8>, expire: u64) -> crate::Result<()> {
        let operation = DatabaseOperation::Update {
            key: key.to_string(),
            value,
            expire,
        };
        expect_ack(self.request(operation, SendPolicy::Normal).await?)
    }

    pub async fn delete(&self, key: &str) -> crate::Result<()> {
        let operation = DatabaseOperation::Delete {
            key: key.to_string(),
        };
        expect_ack(self.request(operation, SendPolicy::Normal).await?)
    }

    pub async fn has(&self, key: &str) -> crate::Result<bool> {
        let operation = DatabaseOperation::Has {
            key: key.to_string(),
        };
        expect_has(self.request(operation, SendPolicy::Normal).await?)
    }

    pub async fn keys(&self) -> crate::Result<Vec<String>> {
        expect_keys(self.request(DatabaseOperation::Keys, SendPolicy::Normal).await?)
    }

    pub async fn size(&self) -> crate::Result<DatabaseSize> {
        expect_size(self.request(DatabaseOperation::Size, SendPolicy::Normal).await?)
    }

    pub async fn expire(&self, key: &str, expire: u64) -> crate::Result<()> {
        let operation = DatabaseOperation::Expire {
            key: key.to_string(),
            expire,
        };
        expect_ack(self.request(operation, SendPolicy::Normal).await?)
    }

    pub async fn persist(&self, key: &str) -> crate::Result<()> {
        let operation = DatabaseOperation::Persist {
            key: key.to_string(),
        };
        expect_ack(self.request(operation, SendPolicy::Normal).await?)
    }

    /// Seconds until `key` expires.
    pub async fn ttl(&self, key: &str) -> crate::Result<u64> {
        let operation = DatabaseOperation::Ttl {
            key: key.to_string(),
        };
        expect_ttl(self.request(operation, SendPolicy::Normal).await?)
    }
}

/// Blocking wrapper around [`Database`] for plain threads. Every call parks the
/// calling thread until the swarm answers or the request times out, so none of
/// these may be used from async code.
pub struct BlockingDatabase {
    database: Database,
}

impl BlockingDatabase {
    fn request(&self, operation: DatabaseOperation) -> crate::Result<DatabaseResult> {
        self.database.request_blocking(operation, SendPolicy::Normal)
    }

    pub fn create_db(&self, max_size: u64, random_evict: bool) -> crate::Result<()> {
        expect_ack(self.request(DatabaseOperation::CreateDb {
            max_size,
            random_evict,
        })?)
    }

    pub fn has_db(&self) -> crate::Result<bool> {
        expect_has(self.request(DatabaseOperation::HasDb)?)
    }

    pub fn delete_db(&self) -> crate::Result<()> {
        expect_ack(self.request(DatabaseOperation::DeleteDb)?)
    }

    pub fn create(&self, key: &str, value: Vec<u8>, expire: u64) -> crate::Result<()> {
        expect_ack(self.request(DatabaseOperation::Create {
            key: key.to_string(),
            value,
            expire,
        })?)
    }

    pub fn read(&self, key: &str) -> crate::Result<Vec<u8>> {
        expect_value(self.request(DatabaseOperation::Read {
            key: key.to_string(),
        })?)
    }

    pub fn quick_read(&self, key: &str) -> crate::Result<Vec<u8>> {
        let operation = DatabaseOperation::QuickRead {
            key: key.to_string(),
        };
        expect_quick_value(self.database.request_blocking(operation, SendPolicy::Fastest)?)
    }

    pub fn update(&self, key: &str, value: Vec<u8>, expire: u64) -> crate::Result<()> {
        expect_ack(self.request(DatabaseOperation::Update {
            key: key.to_string(),
            value,
            expire,
        })?)
    }

    pub fn delete(&self, key: &str) -> crate::Result<()> {
        expect_ack(self.request(DatabaseOperation::Delete {
            key: key.to_string(),
        })?)
    }

    pub fn has(&self, key: &str) -> crate::Result<bool> {
        expect_has(self.request(DatabaseOperation::Has {
            key: key.to_string(),
        })?)
    }

    pub fn keys(&self) -> crate::Result<Vec<String>> {
        expect_keys(self.request(DatabaseOperation::Keys)?)
    }

    pub fn size(&self) -> crate::Result<DatabaseSize> {
        expect_size(self.request(DatabaseOperation::Size)?)
    }

    pub fn expire(&self, key: &str, expire: u64) -> crate::Result<()> {
        expect_ack(self.request(DatabaseOperation::Expire {
            key: key.to_string(),
            expire,
        })?)
    }

    pub fn persist(&self, key: &str) -> crate::Result<()> {
        expect_ack(self.request(DatabaseOperation::Persist {
            key: key.to_string(),
        })?)
    }

    pub fn ttl(&self, key: &str) -> crate::Result<u64> {
        expect_ttl(self.request(DatabaseOperation::Ttl {
            key: key.to_string(),
        })?)
    }
}
