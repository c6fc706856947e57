//! Scenario drivers
//!
//! Every scenario is written from one rank's point of view and is run on
//! both ranks with the same arguments. Workloads are generated from a shared
//! seed so the receiving side can check exactly what it should get.

use anyhow::{bail, ensure, Result};
use kvpipe_network::TensorPipe;
use kvpipe_types::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub scenario: &'static str,
    pub rank: u32,
    pub values_sent: u64,
    pub values_received: u64,
    pub nulls_received: u64,
    pub elapsed: Duration,
    /// Round trip samples, filled only by the latency initiator
    pub latencies: Vec<LatencySample>,
}

impl ScenarioReport {
    fn new(scenario: &'static str, rank: u32) -> Self {
        Self {
            scenario,
            rank,
            values_sent: 0,
            values_received: 0,
            nulls_received: 0,
            elapsed: Duration::ZERO,
            latencies: Vec::new(),
        }
    }

    fn received(&mut self, value: &Option<Tensor>) {
        self.values_received += 1;
        if value.is_none() {
            self.nulls_received += 1;
        }
    }
}

/// Rank 0 sends a one-element vector and a 1x4 matrix; rank 1 checks both
pub fn smoke(rank: u32, pipe: &TensorPipe) -> Result<ScenarioReport> {
    let start = Instant::now();
    let mut report = ScenarioReport::new("smoke", rank);
    let x = Tensor::from_slice(&[1], &[1.0f32])?;
    let y = Tensor::from_slice(&[1, 4], &[2.0f32, 3.0, 4.0, 8.0])?;

    if rank == 0 {
        pipe.send(Some(x))?;
        pipe.send(Some(y))?;
        report.values_sent = 2;
    } else {
        for want in [x, y] {
            let got = pipe.receive()?;
            report.received(&got);
            ensure!(got.as_ref() == Some(&want), "smoke mismatch: got {got:?}, want {want:?}");
        }
    }

    report.elapsed = start.elapsed();
    Ok(report)
}

#[derive(Debug, Clone)]
pub struct StressConfig {
    pub triplets: usize,
    pub null_probability: f64,
    pub seed: u64,
    pub min_dim: usize,
    pub max_dim: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            triplets: 500,
            null_probability: 0.05,
            seed: 0,
            min_dim: 900,
            max_dim: 1000,
        }
    }
}

pub type Triplet = [Option<Tensor>; 3];

/// Sample mean and standard deviation, accumulated in f64
pub fn mean_std(values: &[f32]) -> (f32, f32) {
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0).max(1.0);
    (mean as f32, var.sqrt() as f32)
}

/// Random matrices with their mean and std; some triplets are entirely null
///
/// Triplets are generated on demand so multi-megabyte workloads never sit in
/// memory all at once. Equal configs yield equal sequences.
pub struct StressWorkload {
    rng: StdRng,
    remaining: usize,
    min_dim: usize,
    max_dim: usize,
    null_probability: f64,
}

pub fn stress_workload(config: &StressConfig) -> StressWorkload {
    StressWorkload {
        rng: StdRng::seed_from_u64(config.seed),
        remaining: config.triplets,
        min_dim: config.min_dim,
        max_dim: config.max_dim,
        null_probability: config.null_probability,
    }
}

impl Iterator for StressWorkload {
    type Item = Result<Triplet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        if self.rng.gen_bool(self.null_probability) {
            return Some(Ok([None, None, None]));
        }
        let rows = self.rng.gen_range(self.min_dim..=self.max_dim);
        let cols = self.rng.gen_range(self.min_dim..=self.max_dim);
        let values: Vec<f32> = (0..rows * cols).map(|_| self.rng.gen::<f32>()).collect();
        let (mean, std) = mean_std(&values);
        Some(Tensor::from_slice(&[rows, cols], &values).map_err(anyhow::Error::from).map(|x| {
            [
                Some(x),
                Some(Tensor::vector(&[mean])),
                Some(Tensor::vector(&[std])),
            ]
        }))
    }
}

/// Rank that sends triplet `i`; roles flip within every block of ten
pub fn stress_sender(i: usize) -> u32 {
    u32::from((i % 10) > 3)
}

/// Exchange the stress workload with alternating roles
pub fn stress(rank: u32, pipe: &TensorPipe, config: &StressConfig) -> Result<ScenarioReport> {
    let start = Instant::now();
    let mut report = ScenarioReport::new("stress", rank);

    for (i, triplet) in stress_workload(config).enumerate() {
        let triplet = triplet?;
        if stress_sender(i) == rank {
            for value in triplet {
                pipe.send(value)?;
                report.values_sent += 1;
            }
            continue;
        }

        let mut got: Triplet = [None, None, None];
        for slot in got.iter_mut() {
            *slot = pipe.receive()?;
            report.received(slot);
        }
        if got != triplet {
            bail!("stress triplet {i} differs from the generated workload");
        }
        if let [Some(x), Some(mean), Some(std)] = &got {
            let (m, s) = mean_std(&x.to_vec::<f32>()?);
            ensure!(
                mean.to_vec::<f32>()? == vec![m] && std.to_vec::<f32>()? == vec![s],
                "stress triplet {i} statistics do not match its tensor"
            );
        }
        if i % 100 == 0 {
            debug!(rank, triplet = i, "Stress progress");
        }
    }

    report.elapsed = start.elapsed();
    info!(
        rank,
        sent = report.values_sent,
        received = report.values_received,
        nulls = report.nulls_received,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Stress scenario finished"
    );
    Ok(report)
}

#[derive(Debug, Clone)]
pub struct LatencyConfig {
    /// Payload sizes in bytes; each is sent as an f32 vector
    pub sizes: Vec<usize>,
    pub iterations: usize,
    pub warmup: usize,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            sizes: vec![4, 4 << 10, 256 << 10, 4 << 20],
            iterations: 50,
            warmup: 5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LatencySample {
    pub nbytes: usize,
    pub iterations: usize,
    pub mean: Duration,
    pub p50: Duration,
    pub p99: Duration,
}

impl LatencySample {
    fn from_round_trips(nbytes: usize, mut samples: Vec<Duration>) -> Self {
        samples.sort_unstable();
        let n = samples.len();
        let pick = |q: f64| samples[((n as f64 - 1.0) * q).round() as usize];
        let total: Duration = samples.iter().sum();
        Self {
            nbytes,
            iterations: n,
            mean: total / n as u32,
            p50: pick(0.50),
            p99: pick(0.99),
        }
    }
}

/// Ping-pong per payload size; rank 0 times the round trips, rank 1 echoes
pub fn latency(rank: u32, pipe: &TensorPipe, config: &LatencyConfig) -> Result<ScenarioReport> {
    ensure!(config.iterations > 0, "latency needs at least one iteration");
    let start = Instant::now();
    let mut report = ScenarioReport::new("latency", rank);

    for &nbytes in &config.sizes {
        let elements = (nbytes / 4).max(1);
        let ping = Tensor::vector(&vec![1.5f32; elements]);
        let mut samples = Vec::with_capacity(config.iterations);

        for round in 0..config.warmup + config.iterations {
            if rank == 0 {
                let sent_at = Instant::now();
                pipe.send(Some(ping.clone()))?;
                let echo = pipe.receive()?;
                let rtt = sent_at.elapsed();
                report.values_sent += 1;
                report.received(&echo);
                ensure!(echo.as_ref() == Some(&ping), "echo differs at {nbytes} bytes");
                if round >= config.warmup {
                    samples.push(rtt);
                }
            } else {
                let value = pipe.receive()?;
                report.received(&value);
                pipe.send(value)?;
                report.values_sent += 1;
            }
        }

        if rank == 0 {
            let sample = LatencySample::from_round_trips(elements * 4, samples);
            info!(
                bytes = sample.nbytes,
                mean_us = sample.mean.as_micros() as u64,
                p50_us = sample.p50.as_micros() as u64,
                p99_us = sample.p99.as_micros() as u64,
                "Round trip latency"
            );
            report.latencies.push(sample);
        }
    }

    report.elapsed = start.elapsed();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_is_reproducible() {
        let config = StressConfig {
            triplets: 40,
            min_dim: 8,
            max_dim: 16,
            ..StressConfig::default()
        };
        let first: Vec<Triplet> = stress_workload(&config).map(Result::unwrap).collect();
        let second: Vec<Triplet> = stress_workload(&config).map(Result::unwrap).collect();
        assert_eq!(first.len(), 40);
        assert_eq!(first, second);
    }

    #[test]
    fn test_default_stress_matrices_are_large() {
        let config = StressConfig {
            triplets: 3,
            null_probability: 0.0,
            ..StressConfig::default()
        };
        for triplet in stress_workload(&config) {
            let [x, _, _] = triplet.unwrap();
            let x = x.unwrap();
            assert!(x.dims().iter().all(|&d| (900..=1000).contains(&d)));
            assert!(x.nbytes() >= 900 * 900 * 4);
        }
    }

    #[test]
    fn test_stress_roles() {
        let roles: Vec<u32> = (0..10).map(stress_sender).collect();
        assert_eq!(roles, vec![0, 0, 0, 0, 1, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_latency_percentiles() {
        let samples = (1..=100).map(Duration::from_micros).collect();
        let sample = LatencySample::from_round_trips(64, samples);
        assert_eq!(sample.p50, Duration::from_micros(51));
        assert_eq!(sample.p99, Duration::from_micros(99));
        assert_eq!(sample.iterations, 100);
    }
}
