//! Two-rank runner
//!
//! Both ranks live in one process as threads. Construction of each pipe
//! blocks until the peer rendezvous completes, so ranks are started together
//! and synchronized with a `Barrier` before and after the scenario body.

use anyhow::{anyhow, Context, Result};
use kvpipe_network::{PipeConfig, TcpConfig, TensorPipe, TransportConfig};
use std::net::TcpListener;
use std::sync::Barrier;
use std::thread;
use tracing::{info, warn};

/// TCP backend with rank 0 listening on a free loopback port
pub fn tcp_backend() -> Result<TransportConfig> {
    let reservation = TcpListener::bind("127.0.0.1:0").context("Failed to reserve a free port")?;
    let address = reservation.local_addr()?;
    drop(reservation);
    Ok(TransportConfig::Tcp(TcpConfig::default().with_address(0, address)))
}

#[cfg(unix)]
pub fn unix_backend(socket_dir: &std::path::Path) -> TransportConfig {
    TransportConfig::Unix(kvpipe_network::UnixSocketConfig::new(socket_dir))
}

/// Run `scenario` on ranks 0 and 1 concurrently and collect both results
///
/// A rank whose scenario fails closes its pipe before the final barrier so a
/// peer blocked in `receive` is released instead of hanging.
pub fn run_pair<F, R>(backend: TransportConfig, scenario: F) -> Result<[R; 2]>
where
    F: Fn(u32, &TensorPipe) -> Result<R> + Sync,
    R: Send,
{
    let barrier = Barrier::new(2);

    let run_rank = |rank: u32| -> Result<R> {
        let config = PipeConfig::new(vec![vec![0, 1]], rank).with_backend(backend.clone());
        let pipe = TensorPipe::new(config);
        barrier.wait();

        let result = match &pipe {
            Ok(pipe) => scenario(rank, pipe).and_then(|report| {
                pipe.flush()?;
                Ok(report)
            }),
            Err(e) => Err(anyhow!("rank {rank} failed to connect: {e}")),
        };
        if let (Err(e), Ok(pipe)) = (&result, &pipe) {
            warn!(rank, error = %e, "Scenario failed, closing pipe early");
            if let Err(close_error) = pipe.close() {
                warn!(rank, error = %close_error, "Early pipe close did not complete cleanly");
            }
        }

        barrier.wait();
        if let Ok(pipe) = pipe {
            pipe.close()?;
        }
        result
    };

    let (left, right) = thread::scope(|s| {
        let peer = s.spawn(|| run_rank(1));
        let local = run_rank(0);
        let peer = peer
            .join()
            .unwrap_or_else(|_| Err(anyhow!("rank 1 thread panicked")));
        (local, peer)
    });

    let reports = [left.context("rank 0")?, right.context("rank 1")?];
    info!("Two-rank run complete");
    Ok(reports)
}
