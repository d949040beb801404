/*!

# Swarm Client Networking

## Introduction

A swarm is a set of database nodes that replicate every database and run a
byzantine fault tolerant consensus among themselves. A client talks to the
swarm over one websocket per node. Every frame on those sockets is one
bincode encoded `Envelope`.

Up to `floor((n-1)/3)` of the `n` nodes may be faulty or lying, so the client
never trusts a single answer to a consensus operation. It waits until enough
nodes agree, see `honest_majority_size`.

## Envelope

```text
sender      base58 encoded compressed secp256k1 public key of the author
swarm_id    the swarm the envelope belongs to
timestamp   milliseconds since the unix epoch, set when the envelope is signed
signature   64 byte compact signature, or empty
payload     one of DatabaseRequest, DatabaseResponse, StatusRequest, StatusResponse
```

The signature covers the blake3 hash of the canonical signing input:

```text
<len>|<sender><len>|<payload kind><len>|<payload bytes><len>|<timestamp>
```

Each token is prefixed by its decimal byte length, so moving bytes between
neighbouring fields always changes the hash. The payload kind is the decimal
value of `PayloadKind`. The payload bytes are the bincode encoding of the
selected payload alone.

## Status

After opening a socket the client sends a `StatusRequest`. The node answers
with a `StatusResponse` whose `module_status_json` contains the consensus
module's peer index and current primary:

```json
{"module":[{"name":"pbft","status":{
    "peer_index":[{"uuid":"...","host":"10.0.0.1","port":50000}],
    "primary":{"uuid":"..."}}}]}
```

Each status response replaces the client's view of the swarm. The round trip
of the status request is the node's latency, used to pick the fastest node.
Every node is asked again a minute after its last answer.

## Database requests

A `DatabaseRequest` carries a `DatabaseHeader` (database uuid, nonce, point of
contact) and one `DatabaseOperation`. Nodes echo the header in every
`DatabaseResponse`, which is how the client matches answers to requests.

```text
Normal      sent to the primary, needs honest_majority_size matching responses
Broadcast   sent to every node, needs honest_majority_size matching responses
Fastest     sent to the fastest node, the first response wins
```

Requests that are still open after 1.5 seconds are broadcast to every node,
and again every 3 seconds after that. A request with no qualifying answer
after the timeout (30 seconds unless configured) fails with `Request timeout`.

Responses must be signed, except for quick reads which a single node answers
from its local state.

*/
pub mod authenticator;
pub mod connection;
pub mod dispatcher;
pub mod envelope;
pub mod message_types;
pub mod topology;
