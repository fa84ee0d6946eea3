//! Monte Carlo simulation of midpoint-source entanglement distribution with
//! probabilistic photon loss and memory decoherence.
//!
//! Each trial advances fixed-length rounds. Per round: every occupied memory
//! slot at both stations ages by one attempt; the midpoint emits a usable
//! pair with probability `p_mid`, whose halves latch independently into a
//! free slot at each station; once the round-trip classical-communication
//! delay has elapsed for a station's oldest slot, that slot resolves:
//! a matching time-bin at the other station is a success, otherwise the slot
//! is evicted and reused. Success is only ever declared on station A's
//! oldest bin, so same-round coincidences cannot race.

use rand::{ rngs::StdRng, Rng, SeedableRng };
use crate::error::{ Error, Result };

/// Parameters of the midpoint-source protocol.
#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolParams {
    /// Memory slots per repeater station.
    pub memory_slots: usize,
    /// Number of Monte Carlo trials.
    pub trials: usize,
    /// Probability that the midpoint emits a usable entangled pair in a
    /// round.
    pub p_mid: f64,
    /// Frequency-conversion efficiency.
    pub p_fc: f64,
    /// Outcoupling efficiency.
    pub p_out: f64,
    /// Station separation [km].
    pub distance: f64,
    /// Emission window per round.
    pub emission_time: f64,
    /// Communication window per round.
    pub comm_window: f64,
    /// Memory decoherence time constant, in attempts.
    pub mean_lattice_time: f64,
    /// Classical signal velocity [km per time unit].
    pub signal_velocity: f64,
    /// Explicit (A, B) latch probabilities, overriding the photon-chain
    /// derivation.
    pub latch_override: Option<(f64, f64)>,
    /// Hard ceiling on rounds per trial; exceeding it fails the simulation
    /// instead of hanging.
    pub max_rounds: u64,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            memory_slots: 1,
            trials: 3000,
            p_mid: 0.1,
            p_fc: 0.3,
            p_out: 0.3,
            distance: 50.0,
            emission_time: 1.0,
            comm_window: 20.0,
            mean_lattice_time: 400.0,
            signal_velocity: 0.2,
            latch_override: None,
            max_rounds: 10_000_000,
        }
    }
}

impl ProtocolParams {
    /// Photon survival probability over half the station separation.
    pub fn p_loss(&self) -> f64 {
        10.0_f64.powf(-0.2 * (self.distance / 20.0))
    }

    /// Per-station latch probability from the photon chain (identical for
    /// both stations).
    pub fn p_latch(&self) -> f64 {
        0.5 * self.p_loss() * self.p_fc * self.p_out
    }

    fn latch_probs(&self) -> (f64, f64) {
        self.latch_override.unwrap_or_else(|| {
            let p = self.p_latch();
            (p, p)
        })
    }

    /// Wall-clock length of one round.
    pub fn round_time(&self) -> f64 { self.emission_time + self.comm_window }

    /// Round-trip classical-communication delay, in rounds.
    pub fn comm_delay_rounds(&self) -> f64 {
        self.distance / self.signal_velocity / self.round_time()
    }
}

/// Occupied time-bins (oldest first) and their attempt-age counters for one
/// station.
#[derive(Clone, Debug)]
pub struct StationMemory {
    capacity: usize,
    bins: Vec<u64>,
    ages: Vec<u64>,
}

impl StationMemory {
    /// New empty memory with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            bins: Vec::with_capacity(capacity),
            ages: Vec::with_capacity(capacity),
        }
    }

    /// `true` if no slot is free.
    pub fn is_full(&self) -> bool { self.bins.len() >= self.capacity }

    /// Oldest occupied time-bin, if any.
    pub fn oldest(&self) -> Option<u64> { self.bins.first().copied() }

    /// Age counter of the oldest occupied slot (0 when empty).
    pub fn oldest_age(&self) -> u64 { self.ages.first().copied().unwrap_or(0) }

    /// `true` if `bin` is latched here.
    pub fn contains(&self, bin: u64) -> bool { self.bins.contains(&bin) }

    /// Age every occupied slot by one attempt.
    pub fn age_all(&mut self) {
        self.ages.iter_mut().for_each(|a| *a += 1);
    }

    /// Latch a photon into a fresh slot; fails when full. Fresh slots start
    /// at age 0.
    pub fn latch(&mut self, bin: u64) -> bool {
        if self.is_full() { return false; }
        self.bins.push(bin);
        self.ages.push(0);
        true
    }

    /// Evict the oldest slot, discarding its decoherence counter.
    pub fn evict_oldest(&mut self) {
        if !self.bins.is_empty() {
            self.bins.remove(0);
            self.ages.remove(0);
        }
    }
}

/// Outcome of a single protocol trial.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TrialOutcome {
    /// Wall-clock time elapsed.
    pub elapsed: f64,
    /// Decohered-fidelity estimate of the delivered pair.
    pub fidelity: f64,
    /// Attempts the winning slot aged at station A.
    pub age_a: u64,
    /// Attempts the winning slot aged at station B.
    pub age_b: u64,
}

/// Fidelity after `age_a + age_b` total decoherence attempts.
pub fn fidelity_estimate(age_a: u64, age_b: u64, mean_lattice_time: f64) -> f64 {
    (1.0 + (-((age_a + age_b) as f64) / (2.0 * mean_lattice_time)).exp()) / 2.0
}

/// Run one trial of the protocol.
pub fn run_trial<R: Rng + ?Sized>(params: &ProtocolParams, rng: &mut R)
    -> Result<TrialOutcome>
{
    let (pl, pr) = params.latch_probs();
    let delay = params.comm_delay_rounds();
    let mut mem_a = StationMemory::new(params.memory_slots);
    let mut mem_b = StationMemory::new(params.memory_slots);
    let mut time = 0.0;
    for round in 0..params.max_rounds {
        time += params.round_time();
        mem_a.age_all();
        mem_b.age_all();

        if rng.gen::<f64>() < params.p_mid {
            if !mem_a.is_full() && rng.gen::<f64>() < pl {
                mem_a.latch(round);
            }
            if !mem_b.is_full() && rng.gen::<f64>() < pr {
                mem_b.latch(round);
            }
        }

        let mut succeeded = false;
        if let Some(oldest) = mem_a.oldest() {
            // information about the oldest bin is available once the full
            // round-trip delay has elapsed
            if oldest as f64 + delay <= round as f64 {
                if mem_b.contains(oldest) {
                    succeeded = true;
                } else {
                    mem_a.evict_oldest();
                }
            }
        }
        if succeeded {
            let age_a = mem_a.oldest_age();
            let age_b = mem_b.oldest_age();
            return Ok(TrialOutcome {
                elapsed: time,
                fidelity: fidelity_estimate(
                    age_a, age_b, params.mean_lattice_time),
                age_a,
                age_b,
            });
        }
        if let Some(oldest_b) = mem_b.oldest() {
            if oldest_b as f64 + delay <= round as f64 {
                mem_b.evict_oldest();
            }
        }
    }
    Err(Error::RoundBudget(params.max_rounds))
}

/// Per-metric mean and population standard deviation.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct MeanStd {
    pub mean: f64,
    pub std: f64,
}

fn mean_std(xs: &[f64]) -> MeanStd {
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    MeanStd { mean, std: var.sqrt() }
}

/// Aggregated results over all trials.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SimulationSummary {
    pub elapsed: MeanStd,
    pub fidelity: MeanStd,
    pub age_a: MeanStd,
    pub age_b: MeanStd,
}

/// Run the full Monte Carlo with a caller-supplied RNG.
pub fn simulate_with<R: Rng + ?Sized>(params: &ProtocolParams, rng: &mut R)
    -> Result<SimulationSummary>
{
    let mut outcomes: Vec<TrialOutcome> = Vec::with_capacity(params.trials);
    for _ in 0..params.trials {
        outcomes.push(run_trial(params, rng)?);
    }
    tracing::debug!(trials = params.trials, "protocol simulation finished");
    let col = |f: fn(&TrialOutcome) -> f64| -> Vec<f64> {
        outcomes.iter().map(f).collect()
    };
    Ok(SimulationSummary {
        elapsed: mean_std(&col(|o| o.elapsed)),
        fidelity: mean_std(&col(|o| o.fidelity)),
        age_a: mean_std(&col(|o| o.age_a as f64)),
        age_b: mean_std(&col(|o| o.age_b as f64)),
    })
}

/// Run the full Monte Carlo, deterministically for a fixed seed.
pub fn simulate(params: &ProtocolParams, seed: u64) -> Result<SimulationSummary> {
    let mut rng = StdRng::seed_from_u64(seed);
    simulate_with(params, &mut rng)
}
