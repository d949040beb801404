use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{event, Level};

use crate::networking::authenticator::MessageAuthenticator;
use crate::networking::connection::{ConnectionFactory, NodeConnection, SendCompletion};
use crate::networking::envelope::{Envelope, Payload, PayloadKind};
use crate::networking::message_types::status_message::{
    NodeEndpoint, StatusRequest, StatusResponse, SwarmReport,
};
use crate::util::create_timestamp;
use crate::SwarmError;

pub const STATUS_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// How a request picks its destination(s).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SendPolicy {
    /// The primary node; quorum of the honest majority.
    Normal,
    /// The lowest latency node; first response wins.
    Fastest,
    /// Every known node; quorum of the honest majority.
    Broadcast,
}

/// Handles one kind of inbound payload. Gets the envelope and the key of the
/// node record it arrived on; returns whether that connection should be closed.
pub type PayloadHandler = Arc<dyn Fn(&Envelope, &str) -> bool + Send + Sync>;

pub type InitializeHandler = Box<dyn FnOnce() + Send>;

/// The minimum number of matching responses that outvotes `floor((n-1)/3)`
/// faulty nodes out of `n`.
pub fn honest_majority_size(n: usize) -> usize {
    (n.saturating_sub(1) / 3) * 2 + 1
}

struct NodeRecord {
    endpoint: NodeEndpoint,
    connection: Arc<dyn NodeConnection>,
    latency: Option<Duration>,
    status_sent_at: Option<Instant>,
    status_timer: Option<JoinHandle<()>>,
}

impl NodeRecord {
    fn key(endpoint: &NodeEndpoint) -> String {
        if endpoint.is_anonymous() {
            format!("{}:{}", endpoint.host, endpoint.port)
        } else {
            endpoint.uuid.clone()
        }
    }
}

impl Drop for NodeRecord {
    fn drop(&mut self) {
        if let Some(timer) = self.status_timer.take() {
            timer.abort();
        }
    }
}

/// The current picture of the swarm. Replaced as a whole by every status response.
#[derive(Default)]
struct SwarmView {
    primary: String,
    fastest: String,
    nodes: BTreeMap<String, NodeRecord>,
    last_status: Option<StatusResponse>,
}

impl SwarmView {
    fn is_known_identity(&self, identity: &str) -> bool {
        self.nodes
            .get(identity)
            .map_or(false, |record| !record.endpoint.is_anonymous())
    }

    fn is_anonymous_source(&self, key: &str) -> bool {
        self.nodes
            .get(key)
            .map_or(false, |record| record.endpoint.is_anonymous())
    }

    /// The preferred node if it is known, otherwise any known node.
    fn preferred_or_any(&self, preferred: &str) -> Option<(&String, &NodeRecord)> {
        self.nodes
            .get_key_value(preferred)
            .or_else(|| self.nodes.iter().next())
    }
}

struct TopologyState {
    view: SwarmView,
    handlers: HashMap<PayloadKind, PayloadHandler>,
    on_initialized: Option<InitializeHandler>,
}

/// Tracks the nodes of one swarm, keeps their status fresh, routes outgoing
/// envelopes and gates everything that comes back.
pub struct SwarmTopology {
    weak_self: Weak<SwarmTopology>,
    swarm_id: String,
    seeds: Vec<NodeEndpoint>,
    authenticator: Arc<dyn MessageAuthenticator>,
    connector: Arc<dyn ConnectionFactory>,
    state: Mutex<TopologyState>,
}

impl SwarmTopology {
    pub fn new(
        swarm_id: &str,
        seeds: Vec<NodeEndpoint>,
        authenticator: Arc<dyn MessageAuthenticator>,
        connector: Arc<dyn ConnectionFactory>,
    ) -> crate::Result<Arc<SwarmTopology>> {
        if seeds.is_empty() {
            return Err(SwarmError::Configuration(String::from(
                "a swarm needs at least one seed node",
            )));
        }
        Ok(Arc::new_cyclic(|weak_self| SwarmTopology {
            weak_self: weak_self.clone(),
            swarm_id: swarm_id.to_string(),
            seeds,
            authenticator,
            connector,
            state: Mutex::new(TopologyState {
                view: SwarmView::default(),
                handlers: HashMap::new(),
                on_initialized: None,
            }),
        }))
    }

    fn lock(&self) -> MutexGuard<'_, TopologyState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Connects to the seed nodes and asks each for its status. `on_initialized`
    /// runs once, when the first status response of any node arrives.
    pub fn initialize(&self, on_initialized: InitializeHandler) -> crate::Result<()> {
        let weak = self.weak_self.clone();
        self.register_handler(
            PayloadKind::StatusResponse,
            Arc::new(move |envelope: &Envelope, source: &str| match weak.upgrade() {
                Some(topology) => topology.on_status_response(envelope, source),
                None => true,
            }),
        );

        let mut targets = vec![];
        {
            let mut state = self.lock();
            state.on_initialized = Some(on_initialized);
            for seed in self.seeds.iter() {
                let key = NodeRecord::key(seed);
                if state.view.nodes.contains_key(&key) {
                    continue;
                }
                if let Some(record) = self.create_node_record(seed) {
                    state.view.nodes.insert(key.clone(), record);
                    targets.push(key);
                }
            }
            if state.view.nodes.is_empty() {
                return Err(SwarmError::Connection(String::from(
                    "could not create a connection to any seed node",
                )));
            }
        }
        for key in targets {
            self.send_status_request(&key);
        }
        Ok(())
    }

    pub fn register_handler(&self, kind: PayloadKind, handler: PayloadHandler) {
        self.lock().handlers.insert(kind, handler);
    }

    pub fn swarm_id(&self) -> &str {
        &self.swarm_id
    }

    pub fn honest_majority_size(&self) -> usize {
        honest_majority_size(self.lock().view.nodes.len())
    }

    pub fn primary(&self) -> String {
        self.lock().view.primary.clone()
    }

    pub fn fastest(&self) -> String {
        self.lock().view.fastest.clone()
    }

    pub fn node_keys(&self) -> Vec<String> {
        self.lock().view.nodes.keys().cloned().collect()
    }

    pub fn latency(&self, key: &str) -> Option<Duration> {
        self.lock().view.nodes.get(key).and_then(|record| record.latency)
    }

    pub fn last_status(&self) -> Option<StatusResponse> {
        self.lock().view.last_status.clone()
    }

    /// The node a request sent under `policy` is addressed to, empty for broadcasts.
    pub fn point_of_contact(&self, policy: SendPolicy) -> String {
        let state = self.lock();
        let view = &state.view;
        let preferred = match policy {
            SendPolicy::Normal => &view.primary,
            SendPolicy::Fastest => &view.fastest,
            SendPolicy::Broadcast => return String::new(),
        };
        view.preferred_or_any(preferred)
            .map(|(key, _)| key.clone())
            .unwrap_or_default()
    }

    /// Keys of the nodes `policy` currently selects.
    pub fn route(&self, policy: SendPolicy) -> Vec<String> {
        self.destinations(policy)
            .into_iter()
            .map(|(key, _)| key)
            .collect()
    }

    fn destinations(&self, policy: SendPolicy) -> Vec<(String, Arc<dyn NodeConnection>)> {
        let state = self.lock();
        let view = &state.view;
        match policy {
            SendPolicy::Broadcast => view
                .nodes
                .iter()
                .map(|(key, record)| (key.clone(), record.connection.clone()))
                .collect(),
            SendPolicy::Normal | SendPolicy::Fastest => {
                let preferred = if policy == SendPolicy::Normal {
                    &view.primary
                } else {
                    &view.fastest
                };
                view.preferred_or_any(preferred)
                    .map(|(key, record)| vec![(key.clone(), record.connection.clone())])
                    .unwrap_or_default()
            }
        }
    }

    /// Stamps sender, swarm and time, then signs. Already signed envelopes are
    /// left untouched so they can be re-sent byte for byte.
    pub fn prepare_envelope(&self, envelope: &mut Envelope) -> crate::Result<()> {
        if envelope.is_signed() {
            return Ok(());
        }
        envelope.sender = self.authenticator.identity();
        envelope.swarm_id = self.swarm_id.clone();
        envelope.timestamp = create_timestamp();
        if self.authenticator.sign(envelope) {
            Ok(())
        } else {
            Err(SwarmError::Configuration(String::from(
                "unable to sign outgoing envelope",
            )))
        }
    }

    /// Sends `envelope` to the nodes `policy` selects. `on_sent` runs once per
    /// destination with that node's key and the outcome of the send. Returns
    /// the number of destinations.
    pub fn send(
        &self,
        policy: SendPolicy,
        mut envelope: Envelope,
        on_sent: Arc<dyn Fn(&str, crate::Result<()>) + Send + Sync>,
    ) -> crate::Result<usize> {
        self.prepare_envelope(&mut envelope)?;
        let bytes = envelope.serialize()?;
        let destinations = self.destinations(policy);
        if destinations.is_empty() {
            return Err(SwarmError::Connection(String::from(
                "no swarm node to send to",
            )));
        }
        for (key, connection) in destinations.iter() {
            let on_sent = on_sent.clone();
            let key = key.clone();
            let completion: SendCompletion = Box::new(move |result| on_sent(&key, result));
            connection.send(bytes.clone(), completion);
        }
        Ok(destinations.len())
    }

    fn send_to(&self, key: &str, connection: Arc<dyn NodeConnection>, mut envelope: Envelope) {
        let bytes = match self
            .prepare_envelope(&mut envelope)
            .and_then(|_| envelope.serialize())
        {
            Ok(bytes) => bytes,
            Err(err) => {
                event!(Level::ERROR, "cannot prepare message for {}: {}", key, err);
                return;
            }
        };
        let key = key.to_string();
        connection.send(
            bytes,
            Box::new(move |result| {
                if let Err(err) = result {
                    event!(Level::WARN, "status request to {} failed: {}", key, err);
                }
            }),
        );
    }

    /// Asks one node for its status and notes when we did so, for the latency
    /// measurement.
    pub fn send_status_request(&self, key: &str) {
        let connection = {
            let mut state = self.lock();
            match state.view.nodes.get_mut(key) {
                Some(record) => {
                    record.status_sent_at = Some(Instant::now());
                    record.connection.clone()
                }
                None => return,
            }
        };
        let envelope = Envelope::new(Payload::StatusRequest(StatusRequest::default()));
        self.send_to(key, connection, envelope);
    }

    fn create_node_record(&self, endpoint: &NodeEndpoint) -> Option<NodeRecord> {
        let connection = match self.connector.connect(endpoint) {
            Ok(connection) => connection,
            Err(err) => {
                event!(
                    Level::ERROR,
                    "cannot connect to {}:{}: {}",
                    endpoint.host,
                    endpoint.port,
                    err
                );
                return None;
            }
        };
        let key = NodeRecord::key(endpoint);
        self.listen(&key, connection.as_ref());
        event!(Level::INFO, "tracking swarm node {}", key);
        Some(NodeRecord {
            endpoint: endpoint.clone(),
            connection,
            latency: None,
            status_sent_at: None,
            status_timer: None,
        })
    }

    /// Feeds what arrives on `connection` into the inbound pipeline as coming
    /// from the node record `key`.
    fn listen(&self, key: &str, connection: &dyn NodeConnection) {
        let weak = self.weak_self.clone();
        let source = key.to_string();
        connection.on_message(Arc::new(move |bytes| match weak.upgrade() {
            Some(topology) => topology.handle_inbound(&source, bytes),
            None => true,
        }));
    }

    /// Re-keys an anonymous seed under the identity a status response gave it,
    /// keeping its connection and latency.
    fn promote(&self, seed: NodeRecord, endpoint: &NodeEndpoint) -> NodeRecord {
        self.listen(&endpoint.uuid, seed.connection.as_ref());
        event!(
            Level::INFO,
            "seed {}:{} is swarm node {}",
            endpoint.host,
            endpoint.port,
            endpoint.uuid
        );
        NodeRecord {
            endpoint: endpoint.clone(),
            connection: seed.connection.clone(),
            latency: seed.latency,
            status_sent_at: seed.status_sent_at,
            status_timer: None,
        }
    }

    fn spawn_status_timer(&self, key: &str) -> JoinHandle<()> {
        let weak = self.weak_self.clone();
        let key = key.to_string();
        tokio::task::spawn(async move {
            sleep(STATUS_REFRESH_INTERVAL).await;
            if let Some(topology) = weak.upgrade() {
                topology.send_status_request(&key);
            }
        })
    }

    /// The inbound pipeline: parse, check the sender is a member, check the
    /// signature, then hand the envelope to the handler for its payload kind.
    /// Anything failing a step is logged and dropped.
    pub fn handle_inbound(&self, source: &str, bytes: Vec<u8>) -> bool {
        let envelope = match Envelope::deserialize(&bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                event!(Level::WARN, "dropping malformed message from {}: {}", source, err);
                return false;
            }
        };

        let handler = {
            let state = self.lock();
            if !envelope.sender.is_empty()
                && !state.view.is_known_identity(&envelope.sender)
                && !state.view.is_anonymous_source(source)
            {
                event!(
                    Level::DEBUG,
                    "dropping message from untrusted sender {}",
                    envelope.sender
                );
                return false;
            }
            state.handlers.get(&envelope.kind()).cloned()
        };

        if envelope.is_signed() && !self.authenticator.verify(&envelope) {
            event!(Level::DEBUG, "dropping message with bad signature from {}", source);
            return false;
        }

        match handler {
            Some(handler) => handler(&envelope, source),
            None => {
                event!(
                    Level::WARN,
                    "no handler for {:?} message from {}",
                    envelope.kind(),
                    source
                );
                false
            }
        }
    }

    fn on_status_response(&self, envelope: &Envelope, source: &str) -> bool {
        let status = match &envelope.payload {
            Payload::StatusResponse(status) => status,
            _ => return false,
        };
        let report = match status.swarm_report() {
            Ok(report) => Some(report),
            Err(err) => {
                event!(Level::WARN, "unusable status from {}: {}", source, err);
                None
            }
        };

        let mut newcomers = vec![];
        let on_initialized = {
            let mut state = self.lock();

            let mut measured = None;
            if let Some(record) = state.view.nodes.get_mut(source) {
                if let Some(sent_at) = record.status_sent_at.take() {
                    let latency = Instant::now().saturating_duration_since(sent_at);
                    record.latency = Some(latency);
                    measured = Some(latency);
                }
            }

            if let Some(report) = report {
                newcomers = self.replace_view(&mut state.view, report, &envelope.sender, measured);
                state.view.last_status = Some(status.clone());
            }

            let reporter = if state.view.nodes.contains_key(&envelope.sender) {
                envelope.sender.clone()
            } else {
                source.to_string()
            };
            let timer = if state.view.nodes.contains_key(&reporter) {
                Some(self.spawn_status_timer(&reporter))
            } else {
                None
            };
            if let Some(record) = state.view.nodes.get_mut(&reporter) {
                if let Some(previous) = record.status_timer.take() {
                    previous.abort();
                }
                record.status_timer = timer;
            }

            state.on_initialized.take()
        };

        for key in newcomers {
            self.send_status_request(&key);
        }
        if let Some(on_initialized) = on_initialized {
            on_initialized();
        }
        false
    }

    /// Rebuilds the view from one node's peer index. Known nodes keep their
    /// records, anonymous seeds take on their identity, unknown nodes get a
    /// fresh record, and nodes the reporter does not list are dropped along
    /// with their connections. Returns the keys of the new records.
    fn replace_view(
        &self,
        view: &mut SwarmView,
        report: SwarmReport,
        reporter: &str,
        measured: Option<Duration>,
    ) -> Vec<String> {
        let mut newcomers = vec![];
        let mut nodes = BTreeMap::new();
        for peer in report.peers.iter().filter(|peer| !peer.is_anonymous()) {
            if nodes.contains_key(&peer.uuid) {
                continue;
            }
            let seed_key = format!("{}:{}", peer.host, peer.port);
            let record = match view.nodes.remove(&peer.uuid) {
                Some(record) => Some(record),
                None if view.is_anonymous_source(&seed_key) => view
                    .nodes
                    .remove(&seed_key)
                    .map(|seed| self.promote(seed, peer)),
                None => {
                    let record = self.create_node_record(peer);
                    if record.is_some() {
                        newcomers.push(peer.uuid.clone());
                    }
                    record
                }
            };
            if let Some(mut record) = record {
                if peer.uuid == reporter && record.latency.is_none() {
                    record.latency = measured;
                }
                nodes.insert(peer.uuid.clone(), record);
            }
        }

        let fastest = nodes
            .iter()
            .filter_map(|(key, record)| record.latency.map(|latency| (latency, key)))
            .min()
            .map(|(_, key)| key.clone())
            .unwrap_or_else(|| view.fastest.clone());

        event!(
            Level::INFO,
            "swarm view from {}: {} nodes, primary {}, fastest {}",
            reporter,
            nodes.len(),
            report.primary,
            fastest
        );

        for (key, record) in view.nodes.iter() {
            event!(Level::INFO, "swarm node {} left the view", key);
            record.connection.close();
        }

        let last_status = view.last_status.take();
        *view = SwarmView {
            primary: report.primary,
            fastest,
            nodes,
            last_status,
        };
        newcomers
    }
}
