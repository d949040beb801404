use std::collections::{BTreeMap, HashMap};
use std::net::TcpListener as StdTcpListener;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use swarmdb_client::client::SwarmClient;
use swarmdb_client::keypair::Keypair;
use swarmdb_client::networking::authenticator::{MessageAuthenticator, SignatureAuthenticator};
use swarmdb_client::networking::envelope::{Envelope, Payload};
use swarmdb_client::networking::message_types::database_message::{
    DatabaseOperation, DatabaseRequest, DatabaseResponse, DatabaseResult, DATABASE_EXISTS,
    DATABASE_NOT_FOUND,
};
use swarmdb_client::networking::message_types::status_message::{
    NodeEndpoint, StatusResponse, SwarmReport,
};
use swarmdb_client::settings::ClientSettings;
use swarmdb_client::util::create_timestamp;
use swarmdb_client::SwarmError;

const SWARM_ID: &str = "test-swarm";

/// State shared by every fake node, standing in for consensus: each request
/// is executed once and every node answers with that same result.
#[derive(Default)]
struct Replicated {
    databases: HashMap<String, BTreeMap<String, Vec<u8>>>,
    executed: HashMap<(String, u64), DatabaseResult>,
}

type Store = Arc<Mutex<Replicated>>;

struct FakeNode {
    keypair: Keypair,
    listener: StdTcpListener,
    endpoint: NodeEndpoint,
}

fn make_fake_nodes(count: usize) -> Vec<FakeNode> {
    (0..count)
        .map(|_| {
            let keypair = Keypair::new();
            let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
            listener.set_nonblocking(true).unwrap();
            let port = listener.local_addr().unwrap().port();
            let endpoint = NodeEndpoint::new(&keypair.address(), "127.0.0.1", port);
            FakeNode {
                keypair,
                listener,
                endpoint,
            }
        })
        .collect()
}

/// Starts every node on its own thread and returns the endpoints.
fn start_swarm(count: usize) -> Vec<NodeEndpoint> {
    let nodes = make_fake_nodes(count);
    let report = SwarmReport {
        peers: nodes.iter().map(|node| node.endpoint.clone()).collect(),
        primary: nodes[0].endpoint.uuid.clone(),
    };
    let store: Store = Arc::new(Mutex::new(Replicated::default()));
    for node in nodes {
        let report = report.clone();
        let store = store.clone();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(serve(node, report, store));
        });
    }
    report.peers
}

async fn serve(node: FakeNode, report: SwarmReport, store: Store) {
    let listener = TcpListener::from_std(node.listener).unwrap();
    let authenticator = Arc::new(SignatureAuthenticator::new(node.keypair));
    loop {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::spawn(handle_socket(
            stream,
            authenticator.clone(),
            report.clone(),
            store.clone(),
        ));
    }
}

async fn handle_socket(
    stream: TcpStream,
    authenticator: Arc<SignatureAuthenticator>,
    report: SwarmReport,
    store: Store,
) {
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    while let Some(Ok(message)) = ws.next().await {
        let bytes = match message {
            Message::Binary(bytes) => bytes,
            _ => continue,
        };
        let request = Envelope::deserialize(&bytes).unwrap();
        assert!(authenticator.verify(&request), "client signature rejected");

        let payload = match request.payload {
            Payload::StatusRequest(_) => {
                Payload::StatusResponse(StatusResponse::from_report(&report).unwrap())
            }
            Payload::DatabaseRequest(database_request) => {
                Payload::DatabaseResponse(execute(&store, &request.sender, database_request))
            }
            _ => continue,
        };
        let quick_read = matches!(
            &payload,
            Payload::DatabaseResponse(response) if response.is_quick_read()
        );
        let mut reply = Envelope::new(payload);
        reply.sender = authenticator.identity();
        reply.swarm_id = String::from(SWARM_ID);
        reply.timestamp = create_timestamp();
        if !quick_read {
            assert!(authenticator.sign(&mut reply));
        }
        if ws
            .send(Message::Binary(reply.serialize().unwrap()))
            .await
            .is_err()
        {
            break;
        }
    }
}

fn execute(store: &Store, client: &str, request: DatabaseRequest) -> DatabaseResponse {
    let header = request.header;
    let mut replicated = store.lock().unwrap();
    let id = (client.to_string(), header.nonce);
    if let Some(result) = replicated.executed.get(&id) {
        return DatabaseResponse::new(header, result.clone());
    }
    let databases = &mut replicated.databases;
    let result = match request.operation {
        DatabaseOperation::CreateDb { .. } => {
            if databases.contains_key(&header.db_uuid) {
                DatabaseResult::Error {
                    message: String::from(DATABASE_EXISTS),
                }
            } else {
                databases.insert(header.db_uuid.clone(), BTreeMap::new());
                DatabaseResult::Ack
            }
        }
        DatabaseOperation::HasDb => DatabaseResult::HasDb {
            uuid: header.db_uuid.clone(),
            has: databases.contains_key(&header.db_uuid),
        },
        DatabaseOperation::DeleteDb => match databases.remove(&header.db_uuid) {
            Some(_) => DatabaseResult::Ack,
            None => DatabaseResult::Error {
                message: String::from(DATABASE_NOT_FOUND),
            },
        },
        operation => match databases.get_mut(&header.db_uuid) {
            None => DatabaseResult::Error {
                message: String::from(DATABASE_NOT_FOUND),
            },
            Some(db) => match operation {
                DatabaseOperation::Create { key, value, .. }
                | DatabaseOperation::Update { key, value, .. } => {
                    db.insert(key, value);
                    DatabaseResult::Ack
                }
                DatabaseOperation::Read { key } => match db.get(&key) {
                    Some(value) => DatabaseResult::Read {
                        key,
                        value: value.clone(),
                    },
                    None => DatabaseResult::Error {
                        message: format!("key {} not found", key),
                    },
                },
                DatabaseOperation::QuickRead { key } => DatabaseResult::QuickRead {
                    value: db.get(&key).cloned().unwrap_or_default(),
                    error: String::new(),
                    key,
                },
                DatabaseOperation::Has { key } => DatabaseResult::Has {
                    has: db.contains_key(&key),
                    key,
                },
                DatabaseOperation::Delete { key } => {
                    db.remove(&key);
                    DatabaseResult::Ack
                }
                DatabaseOperation::Keys => DatabaseResult::Keys {
                    keys: db.keys().cloned().collect(),
                },
                _ => DatabaseResult::Ack,
            },
        },
    };
    replicated.executed.insert(id, result.clone());
    DatabaseResponse::new(header, result)
}

fn settings(nodes: Vec<NodeEndpoint>) -> ClientSettings {
    ClientSettings {
        swarm_id: String::from(SWARM_ID),
        nodes,
        private_key: None,
        timeout_secs: 10,
        trusted: false,
    }
}

#[test]
fn test_single_node_swarm() {
    let nodes = start_swarm(1);
    let client = SwarmClient::connect(settings(nodes.clone())).unwrap();
    assert_eq!(client.topology().primary(), nodes[0].uuid);

    assert!(!client.has_db("db").unwrap());
    client.create_db("db", 1024, false).unwrap();
    assert!(matches!(
        client.create_db("db", 1024, false),
        Err(SwarmError::AlreadyExists)
    ));
    assert!(client.has_db("db").unwrap());

    let db = client.database("db").blocking();
    db.create("greeting", b"hello".to_vec(), 0).unwrap();
    assert_eq!(db.read("greeting").unwrap(), b"hello".to_vec());
    db.update("greeting", b"bye".to_vec(), 0).unwrap();
    assert_eq!(db.quick_read("greeting").unwrap(), b"bye".to_vec());
    assert!(db.has("greeting").unwrap());
    assert_eq!(db.keys().unwrap(), vec![String::from("greeting")]);
    db.delete("greeting").unwrap();
    assert!(!db.has("greeting").unwrap());
    assert!(matches!(db.read("greeting"), Err(SwarmError::Database(_))));

    client.delete_db("db").unwrap();
    assert!(matches!(
        client.database("db").blocking().read("greeting"),
        Err(SwarmError::NoDatabase)
    ));
}

#[test]
fn test_quorum_across_four_nodes() {
    let nodes = start_swarm(4);
    // only one seed, the rest is discovered through its status
    let client = SwarmClient::connect(settings(vec![nodes[0].clone()])).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while client.topology().node_keys().len() < 4 {
        assert!(Instant::now() < deadline, "swarm not discovered");
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(client.topology().honest_majority_size(), 3);

    // the primary alone cannot satisfy the quorum, the retry broadcast reaches the rest
    client.create_db("quorum-db", 1024, false).unwrap();
    let db = client.database("quorum-db").blocking();
    db.create("key", b"value".to_vec(), 0).unwrap();
    assert_eq!(db.read("key").unwrap(), b"value".to_vec());
}

#[test]
fn test_connect_times_out_without_swarm() {
    let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut settings = settings(vec![NodeEndpoint::new("", "127.0.0.1", port)]);
    settings.timeout_secs = 1;
    assert!(matches!(
        SwarmClient::connect(settings),
        Err(SwarmError::Timeout)
    ));
}
