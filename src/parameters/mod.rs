pub mod init;
mod set;
mod shard;
mod store;

pub use set::{Parameter, ParameterSet};
pub use shard::WorkerShard;
pub use store::WeightStore;
