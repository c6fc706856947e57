//! Two ranks over real sockets running the full scenario drivers

use kvpipe_e2e::{
    latency, run_pair, smoke, stress, tcp_backend, LatencyConfig, StressConfig,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

#[test]
fn test_smoke_over_tcp() {
    init_tracing();
    let [rank0, rank1] = run_pair(tcp_backend().unwrap(), smoke).unwrap();
    assert_eq!(rank0.values_sent, 2);
    assert_eq!(rank1.values_received, 2);
    assert_eq!(rank1.nulls_received, 0);
}

#[test]
fn test_stress_over_tcp() {
    init_tracing();
    let config = StressConfig::default();
    let [rank0, rank1] =
        run_pair(tcp_backend().unwrap(), |rank, pipe| stress(rank, pipe, &config)).unwrap();

    let total = 3 * config.triplets as u64;
    assert_eq!(rank0.values_sent + rank1.values_sent, total);
    assert_eq!(rank0.values_sent, rank1.values_received);
    assert_eq!(rank1.values_sent, rank0.values_received);
    // Null triplets are whole, so null counts come in threes
    assert_eq!((rank0.nulls_received + rank1.nulls_received) % 3, 0);
}

#[cfg(unix)]
#[test]
fn test_stress_over_unix_socket() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = StressConfig {
        triplets: 200,
        seed: 42,
        min_dim: 100,
        max_dim: 200,
        ..StressConfig::default()
    };
    let [rank0, rank1] = run_pair(kvpipe_e2e::unix_backend(dir.path()), |rank, pipe| {
        stress(rank, pipe, &config)
    })
    .unwrap();
    assert_eq!(rank0.values_sent + rank1.values_sent, 600);
}

#[test]
fn test_latency_over_tcp() {
    init_tracing();
    let config = LatencyConfig {
        sizes: vec![4, 64 << 10, 1 << 20],
        iterations: 10,
        warmup: 2,
    };
    let [rank0, rank1] =
        run_pair(tcp_backend().unwrap(), |rank, pipe| latency(rank, pipe, &config)).unwrap();

    assert_eq!(rank0.latencies.len(), 3);
    assert!(rank1.latencies.is_empty());
    for sample in &rank0.latencies {
        assert_eq!(sample.iterations, 10);
        assert!(sample.p50 <= sample.p99);
    }
    assert_eq!(rank1.values_received, 36);
}

#[test]
fn test_failing_rank_does_not_hang_its_peer() {
    init_tracing();
    let outcome = run_pair(tcp_backend().unwrap(), |rank, pipe| {
        if rank == 0 {
            anyhow::bail!("rank 0 gives up before sending");
        }
        Ok(pipe.receive()?)
    });
    assert!(outcome.is_err());
}
