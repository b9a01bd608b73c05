use std::num::NonZeroUsize;

use ndarray::arr1;

use pserver::{
    AggregationConfig, AsyncParams, Checkpoint, OptimizerKind, ParameterServer, ParameterSet,
    PsErr, ServerConfig,
};

fn toy_weights() -> ParameterSet {
    let mut set = ParameterSet::new();
    set.insert("w", arr1(&[1., 2., 3.]).into_dyn(), true);
    set.insert("b", arr1(&[0.]).into_dyn(), false);
    set
}

fn toy_server(workers: usize) -> ParameterServer {
    let config = ServerConfig {
        optimizer: OptimizerKind::Momentum,
        workers_num: NonZeroUsize::new(workers).unwrap(),
        ..ServerConfig::default()
    };
    ParameterServer::new(config, toy_weights())
}

fn trained_server(workers: usize) -> ParameterServer {
    let server = toy_server(workers);
    for i in 0..3 {
        let worker = i % workers;
        server.pull(worker).unwrap();
        let mut grad = toy_weights().zeros_like();
        grad.insert("w", arr1(&[0.1, 0.2, 0.3]).into_dyn(), true);
        server.push(worker, grad, 0, i).unwrap();
    }
    server
}

#[test]
fn checkpoint_blob_round_trips() {
    let server = trained_server(2);
    let checkpoint = Checkpoint::new("run-42", 3, server.export_state());

    let blob = checkpoint.to_blob().unwrap();
    let recovered = Checkpoint::from_blob(&blob).unwrap();

    assert_eq!(recovered, checkpoint);
    assert_eq!(recovered.run_id, "run-42");
    assert_eq!(recovered.epoch, 3);
}

#[test]
fn restored_blob_resumes_an_identical_server() {
    let server = trained_server(2);
    let blob = Checkpoint::new("run", 1, server.export_state())
        .to_blob()
        .unwrap();

    let resumed = toy_server(2);
    let checkpoint = Checkpoint::from_blob(&blob).unwrap();
    resumed.restore_state(checkpoint.server).unwrap();

    for worker in 0..2 {
        assert_eq!(
            resumed.pull(worker).unwrap(),
            server.pull(worker).unwrap()
        );
    }
    assert_eq!(
        resumed.export_state().store.global_step(),
        server.export_state().store.global_step()
    );
}

#[test]
fn restore_rejects_a_different_worker_count() {
    let state = trained_server(2).export_state();
    let server = toy_server(3);

    let err = server.restore_state(state).unwrap_err();
    assert!(matches!(err, PsErr::IncompatibleState { .. }));
}

#[test]
fn restore_rejects_a_different_model() {
    let state = trained_server(2).export_state();

    let mut other_model = ParameterSet::new();
    other_model.insert("conv.weight", arr1(&[0.; 8]).into_dyn(), true);
    let config = ServerConfig {
        workers_num: NonZeroUsize::new(2).unwrap(),
        ..ServerConfig::default()
    };
    let server = ParameterServer::new(config, other_model);

    let err = server.restore_state(state).unwrap_err();
    assert!(matches!(err, PsErr::IncompatibleState { .. }));
}

#[test]
fn restore_rejects_a_different_aggregation_mode() {
    let state = trained_server(2).export_state();

    let config = ServerConfig {
        workers_num: NonZeroUsize::new(2).unwrap(),
        aggregation: AggregationConfig::Async(AsyncParams::default()),
        ..ServerConfig::default()
    };
    let server = ParameterServer::new(config, toy_weights());

    let err = server.restore_state(state).unwrap_err();
    assert!(matches!(err, PsErr::IncompatibleState { .. }));
}

#[test]
fn restore_failure_leaves_the_server_untouched() {
    let server = toy_server(2);
    let before = server.export_state();

    let err = server.restore_state(trained_server(3).export_state());
    assert!(err.is_err());
    assert_eq!(server.export_state(), before);
}
