//! Mathematical and numerical constants

/// 0.5 ln(2π)
pub const HALF_LN_2PI: f64 = 0.918_938_533_204_672_7;

/// Default lower bound on the observation noise variance
pub const DEFAULT_NOISE_FLOOR: f64 = 1E-5;

/// softplus(0) = ln(2); the constrained value of a zero raw parameter
pub const SOFTPLUS_ZERO: f64 = std::f64::consts::LN_2;

/// Jitter added to a covariance diagonal before sampling, escalated by 10x
/// on every failed factorization up to `MAX_SAMPLING_JITTER`.
pub const MIN_SAMPLING_JITTER: f64 = 1E-10;
/// Largest jitter tried before giving up on a factorization for sampling
pub const MAX_SAMPLING_JITTER: f64 = 1E-6;
