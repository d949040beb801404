use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::keypair::Keypair;
use crate::networking::authenticator::{MessageAuthenticator, SignatureAuthenticator};
use crate::networking::connection::{ConnectionFactory, InboundHandler, NodeConnection, SendCompletion};
use crate::networking::envelope::{Envelope, Payload, PayloadKind};
use crate::networking::message_types::database_message::{
    DatabaseRequest, DatabaseResponse, DatabaseResult,
};
use crate::networking::message_types::status_message::{NodeEndpoint, StatusResponse, SwarmReport};
use crate::networking::topology::SwarmTopology;
use crate::util::create_timestamp;
use crate::SwarmError;

pub const MOCK_SWARM_ID: &str = "mock-swarm";

/// Records everything sent to it and lets a test push bytes back in.
pub struct MockConnection {
    pub endpoint: NodeEndpoint,
    sent: Mutex<Vec<Vec<u8>>>,
    handler: Mutex<Option<InboundHandler>>,
    closed: AtomicBool,
}

impl MockConnection {
    pub fn new(endpoint: &NodeEndpoint) -> Self {
        MockConnection {
            endpoint: endpoint.clone(),
            sent: Mutex::new(vec![]),
            handler: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|bytes| Envelope::deserialize(bytes).unwrap())
            .collect()
    }

    pub fn sent_of(&self, kind: PayloadKind) -> Vec<Envelope> {
        self.sent()
            .into_iter()
            .filter(|envelope| envelope.kind() == kind)
            .collect()
    }

    pub fn sent_requests(&self) -> Vec<DatabaseRequest> {
        self.sent()
            .into_iter()
            .filter_map(|envelope| match envelope.payload {
                Payload::DatabaseRequest(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn deliver(&self, envelope: &Envelope) -> bool {
        self.deliver_bytes(envelope.serialize().unwrap())
    }

    pub fn deliver_bytes(&self, bytes: Vec<u8>) -> bool {
        let handler = self.handler.lock().unwrap().clone();
        match handler {
            Some(handler) => handler(bytes),
            None => false,
        }
    }
}

impl NodeConnection for MockConnection {
    fn send(&self, bytes: Vec<u8>, completion: SendCompletion) {
        if self.is_closed() {
            completion(Err(SwarmError::Connection(String::from("closed"))));
            return;
        }
        self.sent.lock().unwrap().push(bytes);
        completion(Ok(()));
    }

    fn on_message(&self, handler: InboundHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.handler.lock().unwrap().take();
    }
}

/// Hands out [`MockConnection`]s and remembers every one it created, keyed
/// like the topology keys its nodes.
#[derive(Default)]
pub struct MockConnector {
    connections: Mutex<BTreeMap<String, Vec<Arc<MockConnection>>>>,
}

impl MockConnector {
    fn key(endpoint: &NodeEndpoint) -> String {
        if endpoint.is_anonymous() {
            format!("{}:{}", endpoint.host, endpoint.port)
        } else {
            endpoint.uuid.clone()
        }
    }

    /// The most recent connection created for `key`.
    pub fn connection(&self, key: &str) -> Arc<MockConnection> {
        self.connections.lock().unwrap()[key].last().unwrap().clone()
    }

    pub fn created(&self, key: &str) -> usize {
        self.connections
            .lock()
            .unwrap()
            .get(key)
            .map_or(0, |connections| connections.len())
    }
}

impl ConnectionFactory for MockConnector {
    fn connect(&self, endpoint: &NodeEndpoint) -> crate::Result<Arc<dyn NodeConnection>> {
        let connection = Arc::new(MockConnection::new(endpoint));
        self.connections
            .lock()
            .unwrap()
            .entry(MockConnector::key(endpoint))
            .or_default()
            .push(connection.clone());
        Ok(connection)
    }
}

/// A swarm node with its own identity, used to forge signed answers.
#[derive(Debug, Clone)]
pub struct MockNode {
    pub keypair: Keypair,
    pub endpoint: NodeEndpoint,
}

impl MockNode {
    pub fn new(port: u16) -> Self {
        let keypair = Keypair::new();
        let endpoint = NodeEndpoint::new(&keypair.address(), "127.0.0.1", port);
        MockNode { keypair, endpoint }
    }

    pub fn uuid(&self) -> String {
        self.endpoint.uuid.clone()
    }

    pub fn unsigned(&self, payload: Payload) -> Envelope {
        let mut envelope = Envelope::new(payload);
        envelope.sender = self.uuid();
        envelope.swarm_id = String::from(MOCK_SWARM_ID);
        envelope.timestamp = create_timestamp();
        envelope
    }

    pub fn signed(&self, payload: Payload) -> Envelope {
        let mut envelope = self.unsigned(payload);
        assert!(SignatureAuthenticator::new(self.keypair.clone()).sign(&mut envelope));
        envelope
    }

    pub fn status_response(&self, peers: &[NodeEndpoint], primary: &str) -> Envelope {
        let report = SwarmReport {
            peers: peers.to_vec(),
            primary: primary.to_string(),
        };
        self.signed(Payload::StatusResponse(
            StatusResponse::from_report(&report).unwrap(),
        ))
    }

    /// A signed answer echoing the header of `request`.
    pub fn answer(&self, request: &DatabaseRequest, result: DatabaseResult) -> Envelope {
        self.signed(Payload::DatabaseResponse(DatabaseResponse::new(
            request.header.clone(),
            result,
        )))
    }
}

pub fn make_mock_nodes(count: usize) -> Vec<MockNode> {
    (0..count).map(|i| MockNode::new(50000 + i as u16)).collect()
}

/// A topology seeded with `nodes`, initialized, and shown one status response
/// from the first node listing all of them with the first node as primary.
pub fn make_mock_swarm(
    nodes: &[MockNode],
    authenticator: Arc<dyn MessageAuthenticator>,
) -> (Arc<SwarmTopology>, Arc<MockConnector>) {
    let connector = Arc::new(MockConnector::default());
    let seeds = nodes.iter().map(|node| node.endpoint.clone()).collect();
    let topology = SwarmTopology::new(MOCK_SWARM_ID, seeds, authenticator, connector.clone()).unwrap();
    topology.initialize(Box::new(|| {})).unwrap();

    let peers: Vec<NodeEndpoint> = nodes.iter().map(|node| node.endpoint.clone()).collect();
    let status = nodes[0].status_response(&peers, &nodes[0].uuid());
    connector.connection(&nodes[0].uuid()).deliver(&status);
    (topology, connector)
}
