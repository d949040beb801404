/*!
# swarmdb_client

A client-side protocol engine for talking to a swarm of database nodes that do
not fully trust each other. Every request is signed, sent to one or more nodes,
and accepted only once an honest majority of the swarm agrees on the answer.

The engine is made of three pieces:

* [`networking::dispatcher::MessageDispatcher`] frames requests, tracks them by
  nonce, collects responses under a quorum policy and drives retries and the
  overall timeout.
* [`networking::topology::SwarmTopology`] tracks the nodes of the swarm,
  discovers new ones through the status protocol, routes outgoing envelopes and
  gates inbound ones.
* [`networking::authenticator`] defines the canonical signing input and signs
  and verifies envelopes.

[`client::SwarmClient`] wraps all of it behind a small database API with both
async and blocking calls.

# Usage

```no_run
use swarmdb_client::{client::SwarmClient, settings::ClientSettings};

let settings = ClientSettings::load("config")?;
let client = SwarmClient::connect(settings)?;
let db = client.database("my-db").blocking();
db.create("greeting", b"hello".to_vec(), 0)?;
assert_eq!(db.read("greeting")?, b"hello".to_vec());
# Ok::<(), swarmdb_client::SwarmError>(())
```
*/
pub mod client;
pub mod crypto;
pub mod error;
pub mod keypair;
pub mod networking;
pub mod settings;
pub mod util;

#[cfg(test)]
pub mod test_utilities;

pub use error::SwarmError;

pub type Result<T> = std::result::Result<T, SwarmError>;
