use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{event, Level};

use crate::networking::envelope::{Envelope, Payload, PayloadKind};
use crate::networking::message_types::database_message::{
    DatabaseHeader, DatabaseOperation, DatabaseRequest, DatabaseResponse,
};
use crate::networking::topology::{SendPolicy, SwarmTopology};

pub const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(1500);
pub const RETRY_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives the outcome of a dispatched request, exactly once. Failures arrive
/// as a response carrying `DatabaseResult::Error`.
pub type ResponseHandler = Box<dyn FnOnce(DatabaseResponse) + Send>;

struct OutstandingRequest {
    header: DatabaseHeader,
    policy: SendPolicy,
    required: usize,
    envelope: Envelope,
    swarm: Weak<SwarmTopology>,
    responses: HashMap<String, DatabaseResponse>,
    retry_timer: Option<JoinHandle<()>>,
    timeout_timer: Option<JoinHandle<()>>,
    handler: ResponseHandler,
}

impl OutstandingRequest {
    /// The first recorded response that enough other responses agree with.
    fn qualifying_response(&self) -> Option<DatabaseResponse> {
        if self.responses.len() < self.required {
            return None;
        }
        if self.required == 1 {
            return self.responses.values().next().cloned();
        }
        for candidate in self.responses.values() {
            let agreeing = self
                .responses
                .values()
                .filter(|other| other.matches(candidate))
                .count();
            if agreeing >= self.required {
                for (sender, other) in self.responses.iter() {
                    if !other.matches(candidate) {
                        event!(
                            Level::WARN,
                            "request {}: {} disagrees with the quorum: {:?}",
                            self.header.nonce,
                            sender,
                            other.result
                        );
                    }
                }
                return Some(candidate.clone());
            }
        }
        event!(
            Level::WARN,
            "request {}: {} responses, no {} of them agree yet",
            self.header.nonce,
            self.responses.len(),
            self.required
        );
        None
    }

    fn cancel_timers(&mut self) {
        for timer in [self.retry_timer.take(), self.timeout_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.abort();
        }
    }
}

struct DispatcherState {
    next_nonce: u64,
    timeout: Duration,
    requests: HashMap<u64, OutstandingRequest>,
    /// Topologies an unbound dispatcher already receives responses from.
    attached: Vec<Weak<SwarmTopology>>,
}

/// Sends database requests to a swarm and decides when enough nodes have
/// answered.
///
/// The swarm is either bound at construction ([`MessageDispatcher::new`] +
/// [`MessageDispatcher::dispatch`]) or supplied on every call
/// ([`MessageDispatcher::unbound`] + [`MessageDispatcher::dispatch_with`]).
/// Either way the dispatcher only ever talks to nodes through the topology.
pub struct MessageDispatcher {
    weak_self: Weak<MessageDispatcher>,
    swarm: Option<Arc<SwarmTopology>>,
    state: Mutex<DispatcherState>,
}

impl MessageDispatcher {
    pub fn new(swarm: Arc<SwarmTopology>) -> Arc<MessageDispatcher> {
        let dispatcher = MessageDispatcher::build(Some(swarm.clone()));
        dispatcher.attach(&swarm);
        dispatcher
    }

    pub fn unbound() -> Arc<MessageDispatcher> {
        MessageDispatcher::build(None)
    }

    fn build(swarm: Option<Arc<SwarmTopology>>) -> Arc<MessageDispatcher> {
        Arc::new_cyclic(|weak_self| MessageDispatcher {
            weak_self: weak_self.clone(),
            swarm,
            state: Mutex::new(DispatcherState {
                next_nonce: 1,
                timeout: DEFAULT_TIMEOUT,
                requests: HashMap::new(),
                attached: vec![],
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, DispatcherState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Overall time a request may take. Applies to requests dispatched afterwards.
    pub fn set_timeout(&self, timeout: Duration) {
        self.lock().timeout = timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.lock().timeout
    }

    pub fn outstanding(&self) -> usize {
        self.lock().requests.len()
    }

    /// Routes database responses arriving through `swarm` to this dispatcher.
    fn attach(&self, swarm: &SwarmTopology) {
        let weak = self.weak_self.clone();
        swarm.register_handler(
            PayloadKind::DatabaseResponse,
            Arc::new(move |envelope: &Envelope, _source: &str| match weak.upgrade() {
                Some(dispatcher) => dispatcher.on_response(envelope),
                None => false,
            }),
        );
    }

    /// Notes `swarm` as attached. Returns false if it already was.
    fn first_use_of(&self, swarm: &Arc<SwarmTopology>) -> bool {
        let mut state = self.lock();
        state.attached.retain(|known| known.strong_count() > 0);
        let target = Arc::downgrade(swarm);
        if state.attached.iter().any(|known| known.ptr_eq(&target)) {
            return false;
        }
        state.attached.push(target);
        true
    }

    /// Dispatches through the swarm bound at construction. Returns the nonce.
    pub fn dispatch(
        &self,
        db_uuid: &str,
        operation: DatabaseOperation,
        policy: SendPolicy,
        handler: ResponseHandler,
    ) -> u64 {
        match self.swarm.clone() {
            Some(swarm) => self.dispatch_with(&swarm, db_uuid, operation, policy, handler),
            None => {
                let header = DatabaseHeader {
                    db_uuid: db_uuid.to_string(),
                    ..DatabaseHeader::default()
                };
                handler(DatabaseResponse::error(header, "dispatcher has no swarm"));
                0
            }
        }
    }

    /// Signs and sends one request, and arranges for `handler` to be called
    /// with either a quorum-qualified response or a timeout error.
    pub fn dispatch_with(
        &self,
        swarm: &Arc<SwarmTopology>,
        db_uuid: &str,
        operation: DatabaseOperation,
        policy: SendPolicy,
        handler: ResponseHandler,
    ) -> u64 {
        if self.swarm.is_none() && self.first_use_of(swarm) {
            self.attach(swarm);
        }
        let required = match policy {
            SendPolicy::Fastest => 1,
            SendPolicy::Normal | SendPolicy::Broadcast => swarm.honest_majority_size(),
        };
        let (nonce, timeout) = {
            let mut state = self.lock();
            let nonce = state.next_nonce;
            state.next_nonce += 1;
            (nonce, state.timeout)
        };

        let header = DatabaseHeader {
            db_uuid: db_uuid.to_string(),
            nonce,
            point_of_contact: swarm.point_of_contact(policy),
        };
        let mut envelope = Envelope::new(Payload::DatabaseRequest(DatabaseRequest {
            header: header.clone(),
            operation,
        }));
        if let Err(err) = swarm.prepare_envelope(&mut envelope) {
            event!(Level::ERROR, "request {} not sent: {}", nonce, err);
            handler(DatabaseResponse::error(header, &err.to_string()));
            return nonce;
        }

        let retry_timer = match policy {
            SendPolicy::Fastest => None,
            SendPolicy::Normal | SendPolicy::Broadcast => Some(self.spawn_retry_timer(nonce)),
        };
        let timeout_timer = Some(self.spawn_timeout_timer(nonce, timeout));
        self.lock().requests.insert(
            nonce,
            OutstandingRequest {
                header,
                policy,
                required,
                envelope: envelope.clone(),
                swarm: Arc::downgrade(swarm),
                responses: HashMap::new(),
                retry_timer,
                timeout_timer,
                handler,
            },
        );

        event!(
            Level::DEBUG,
            "request {} dispatched ({:?}, {} responses required)",
            nonce,
            policy,
            required
        );
        if let Err(err) = swarm.send(policy, envelope, log_send_failure(nonce)) {
            event!(Level::WARN, "request {}: {}", nonce, err);
        }
        nonce
    }

    /// Records one node's response and completes the request once it qualifies.
    pub fn on_response(&self, envelope: &Envelope) -> bool {
        let response = match &envelope.payload {
            Payload::DatabaseResponse(response) => response,
            _ => {
                event!(Level::WARN, "dropping {:?} sent as a database response", envelope.kind());
                return false;
            }
        };
        let nonce = response.nonce();

        let completed = {
            let mut state = self.lock();
            let request = match state.requests.get_mut(&nonce) {
                Some(request) => request,
                None => {
                    event!(Level::DEBUG, "dropping response for unknown request {}", nonce);
                    return false;
                }
            };
            // only a quick read sent to the fastest node may come back unsigned
            let unsigned_allowed =
                request.policy == SendPolicy::Fastest && response.is_quick_read();
            if !envelope.is_signed() && !unsigned_allowed {
                event!(
                    Level::DEBUG,
                    "dropping unsigned response to request {} from {}",
                    nonce,
                    envelope.sender
                );
                return false;
            }
            request
                .responses
                .insert(envelope.sender.clone(), response.clone());
            match request.qualifying_response() {
                Some(result) => state.requests.remove(&nonce).map(|request| (request, result)),
                None => None,
            }
        };

        if let Some((mut request, result)) = completed {
            event!(Level::DEBUG, "request {} ({:?}) qualified", nonce, request.policy);
            request.cancel_timers();
            (request.handler)(result);
        }
        false
    }

    fn spawn_retry_timer(&self, nonce: u64) -> JoinHandle<()> {
        let weak = self.weak_self.clone();
        tokio::task::spawn(async move {
            let mut delay = INITIAL_RETRY_DELAY;
            loop {
                sleep(delay).await;
                match weak.upgrade() {
                    Some(dispatcher) if dispatcher.on_retry(nonce) => {}
                    _ => return,
                }
                delay = RETRY_INTERVAL;
            }
        })
    }

    fn spawn_timeout_timer(&self, nonce: u64, timeout: Duration) -> JoinHandle<()> {
        let weak = self.weak_self.clone();
        tokio::task::spawn(async move {
            sleep(timeout).await;
            if let Some(dispatcher) = weak.upgrade() {
                dispatcher.on_timeout(nonce);
            }
        })
    }

    /// Re-broadcasts the original signed envelope. Returns whether the request
    /// is still outstanding.
    fn on_retry(&self, nonce: u64) -> bool {
        let (envelope, swarm) = match self.lock().requests.get(&nonce) {
            Some(request) => (request.envelope.clone(), request.swarm.clone()),
            None => return false,
        };
        match swarm.upgrade() {
            Some(swarm) => {
                event!(Level::INFO, "request {} unresolved, broadcasting", nonce);
                if let Err(err) = swarm.send(SendPolicy::Broadcast, envelope, log_send_failure(nonce)) {
                    event!(Level::WARN, "request {}: {}", nonce, err);
                }
                true
            }
            None => false,
        }
    }

    fn on_timeout(&self, nonce: u64) {
        let request = self.lock().requests.remove(&nonce);
        if let Some(mut request) = request {
            event!(Level::WARN, "request {} timed out", nonce);
            // this task is the timeout timer; only the retry timer needs stopping
            request.timeout_timer.take();
            request.cancel_timers();
            (request.handler)(DatabaseResponse::timeout(request.header));
        }
    }
}

impl Drop for MessageDispatcher {
    fn drop(&mut self) {
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        for request in state.requests.values_mut() {
            request.cancel_timers();
        }
    }
}

fn log_send_failure(nonce: u64) -> Arc<dyn Fn(&str, crate::Result<()>) + Send + Sync> {
    Arc::new(move |key: &str, result: crate::Result<()>| {
        if let Err(err) = result {
            event!(Level::WARN, "request {} to {} failed: {}", nonce, key, err);
        }
    })
}
