use serde::{Deserialize, Serialize};

use crate::{
    config::AggregationConfig,
    parameters::{WeightStore, WorkerShard},
    schedule::Schedule,
};

/// A complete, self-contained capture of the server's internal state:
/// master state, every worker shard, the schedule clock and the aggregation
/// regime. Enough to resume training bit-for-bit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerState {
    pub store: WeightStore,
    pub shards: Vec<WorkerShard>,
    pub schedule: Schedule,
    pub aggregation: AggregationConfig,
}

/// One save point as the checkpoint collaborator persists it, keyed by run
/// identifier and epoch. File layout and naming stay the collaborator's
/// concern; this type only fixes the blob contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub epoch: usize,
    pub server: ServerState,
}

impl Checkpoint {
    /// Creates a new `Checkpoint`.
    ///
    /// # Arguments
    /// * `run_id` - The identifier of the training run.
    /// * `epoch` - The epoch the state was captured after.
    /// * `server` - The exported server state.
    pub fn new(run_id: impl Into<String>, epoch: usize, server: ServerState) -> Self {
        Self {
            run_id: run_id.into(),
            epoch,
            server,
        }
    }

    /// Serializes the checkpoint into an opaque blob.
    pub fn to_blob(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Deserializes a checkpoint from an opaque blob.
    pub fn from_blob(blob: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(blob)
    }
}
