use serde::{Deserialize, Serialize};

use crate::SwarmError;

/// A node of the swarm as listed in configuration or in a peer index.
/// An empty `uuid` marks an anonymous bootstrap node whose identity is not yet known.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct NodeEndpoint {
    #[serde(default)]
    pub uuid: String,
    pub host: String,
    pub port: u16,
}

impl NodeEndpoint {
    pub fn new(uuid: &str, host: &str, port: u16) -> Self {
        NodeEndpoint {
            uuid: uuid.to_string(),
            host: host.to_string(),
            port,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.uuid.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct StatusRequest {}

/// Self reported status of a node. `module_status_json` holds the consensus
/// module's view of the swarm, see [`StatusResponse::swarm_report`].
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct StatusResponse {
    pub version: String,
    pub git_commit: String,
    pub uptime: String,
    pub module_status_json: String,
}

/// The part of a status response the topology cares about.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SwarmReport {
    pub peers: Vec<NodeEndpoint>,
    pub primary: String,
}

#[derive(Deserialize)]
struct ModuleStatusDocument {
    #[serde(default)]
    module: Vec<ModuleEntry>,
}

#[derive(Deserialize)]
struct ModuleEntry {
    status: ConsensusStatus,
}

#[derive(Deserialize)]
struct ConsensusStatus {
    #[serde(default)]
    peer_index: Vec<NodeEndpoint>,
    #[serde(default)]
    primary: Option<PrimaryEntry>,
}

#[derive(Deserialize)]
struct PrimaryEntry {
    #[serde(default)]
    uuid: String,
}

impl StatusResponse {
    pub fn swarm_report(&self) -> crate::Result<SwarmReport> {
        let document: ModuleStatusDocument = serde_json::from_str(&self.module_status_json)?;
        let status = document
            .module
            .into_iter()
            .next()
            .map(|module| module.status)
            .ok_or_else(|| {
                SwarmError::UnexpectedResponse(String::from("status carries no module entry"))
            })?;
        if status.peer_index.is_empty() {
            return Err(SwarmError::UnexpectedResponse(String::from(
                "status carries an empty peer index",
            )));
        }
        Ok(SwarmReport {
            peers: status.peer_index,
            primary: status.primary.map(|primary| primary.uuid).unwrap_or_default(),
        })
    }

    /// Builds the status a node would report for the given view of the swarm.
    pub fn from_report(report: &SwarmReport) -> crate::Result<Self> {
        let document = serde_json::json!({
            "module": [{
                "name": "pbft",
                "status": {
                    "peer_index": report.peers,
                    "primary": { "uuid": report.primary },
                }
            }]
        });
        Ok(StatusResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            git_commit: String::new(),
            uptime: String::new(),
            module_status_json: serde_json::to_string(&document)?,
        })
    }
}
