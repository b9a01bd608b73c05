use std::{error::Error, num::NonZeroUsize};

use log::info;
use ndarray::Zip;
use rand::{SeedableRng, rngs::StdRng};

use pserver::{
    AggregationConfig, AsyncParams, Checkpoint, OptimizerKind, ParameterServer, ParameterSet,
    ServerConfig,
    parameters::init::{self, ConstWeightGen, RandWeightGen, TensorSpec},
};

const WORKERS: usize = 4;
const EPOCHS: usize = 8;
const ITERATIONS_PER_EPOCH: usize = 50;

/// Gradient of the least-squares objective `0.5 * ||w - target||^2`.
fn gradient(weights: &ParameterSet, target: &ParameterSet) -> ParameterSet {
    let mut grad = weights.clone();
    for ((_, g), (_, t)) in grad.iter_mut().zip(target.iter()) {
        Zip::from(g.values_mut())
            .and(t.values())
            .for_each(|g, &t| *g -= t);
    }
    grad
}

/// Round-robin simulation of `WORKERS` logical workers sharing one server,
/// fitting a toy model and switching from sync to async halfway through.
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let specs = [
        TensorSpec::new("fc.weight", &[8, 4], true),
        TensorSpec::new("fc.bias", &[8], false),
    ];
    let initial = init::generate(&specs, &mut ConstWeightGen::new(0.))?;
    let target = init::generate(
        &specs,
        &mut RandWeightGen::normal(StdRng::seed_from_u64(7), 40, 0., 1.)?,
    )?;

    let config = ServerConfig {
        optimizer: OptimizerKind::Momentum,
        workers_num: NonZeroUsize::new(WORKERS).unwrap(),
        lr: 0.05,
        momentum: 0.9,
        weight_decay: 0.,
        iterations_per_epoch: ITERATIONS_PER_EPOCH,
        ..ServerConfig::default()
    };
    let server = ParameterServer::new(config, initial);

    for epoch in 0..EPOCHS {
        if epoch == EPOCHS / 2 {
            server.reconfigure(AggregationConfig::Async(AsyncParams::default()));
        }

        let mut step_norm = 0.;
        for i in 0..ITERATIONS_PER_EPOCH {
            let worker = i % WORKERS;
            let weights = server.pull(worker)?;
            let grads = gradient(&weights, &target);
            step_norm = server.push(worker, grads, epoch, i)?;
        }

        let loss = server.pull(0)?.distance(&target);
        info!(
            epoch = epoch,
            loss = loss,
            step_norm = step_norm,
            weight_norm = server.get_server_weights(),
            grad_norm = server.get_server_gradients(),
            weight_mean_dist = server.get_workers_mean_statistics(),
            weight_master_dist = server.get_workers_master_statistics(),
            mean_master_dist = server.get_mean_master_dist();
            "epoch complete"
        );
    }

    let checkpoint = Checkpoint::new("simulate", EPOCHS, server.export_state());
    let blob = checkpoint.to_blob()?;
    info!(bytes = blob.len(); "final state checkpointed");

    Ok(())
}
