//! Crate-wide error definitions.

use thiserror::Error;

/// All failure modes surfaced by the simulator.
#[derive(Debug, Error)]
pub enum Error {
    /// Carbon index outside `1..=num_carbons`.
    #[error("carbon index {idx} out of range for {num_carbons} carbon(s)")]
    CarbonIndex { idx: usize, num_carbons: usize },

    /// A decoupling scheme name that is not one of `XY4`, `XY8`, `simple`.
    #[error("unknown decoupling scheme '{0}'")]
    UnknownScheme(String),

    /// A parameter source that has no implementation yet.
    #[error("parameter source not implemented: {0}")]
    NotImplemented(&'static str),

    /// A nitrogen operator was requested on a system configured without one.
    #[error("system was configured without a nitrogen spin")]
    NitrogenDisabled,

    /// Pulse count incompatible with the chosen decoupling scheme.
    #[error("pulse count {n} is incompatible with {scheme} (needs a multiple of {div})")]
    IncompatiblePulseCount { n: usize, scheme: &'static str, div: usize },

    /// The microwave pulse does not fit in the requested free-evolution
    /// window.
    #[error("microwave pulse ({pulse:.3e} s) exceeds the available spacing ({window:.3e} s)")]
    PulseTooLong { pulse: f64, window: f64 },

    /// A deferred gate parameter was missing from the binding table.
    #[error("no binding supplied for sequence parameter '{0}'")]
    UnboundParameter(String),

    /// The protocol loop ran out of rounds before any coincidence.
    #[error("no coincidence within the round budget of {0}")]
    RoundBudget(u64),

    /// Failed to parse a hyperfine parameter table.
    #[error("hyperfine table: {0}")]
    Table(#[from] toml::de::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
