use crate::error::{CsError, Result};
use crate::nc::NcCoeffKind;
use crate::random::RandomKind;
use crate::solver::SolverKind;
use crate::transform::TransformKind;
use std::str::FromStr;
use std::time::Duration;

/// Value written into the output column of a failed solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureFill {
    #[default]
    Zero,
    Nan,
}

impl FailureFill {
    pub fn value(&self) -> f64 {
        match self {
            FailureFill::Zero => 0.0,
            FailureFill::Nan => f64::NAN,
        }
    }
}

impl FromStr for FailureFill {
    type Err = CsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zero" | "0" => Ok(FailureFill::Zero),
            "nan" | "sentinel" => Ok(FailureFill::Nan),
            other => Err(CsError::Config(format!("unknown failure fill '{}'", other))),
        }
    }
}

/// Reconstruction settings of the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub solver_spat: SolverKind,
    pub solver_temp: SolverKind,
    pub tolerance: f64,
    pub max_iter: usize,
    /// Spatial sparsity prior; `0` selects the default heuristic.
    pub k_spat: usize,
    /// Temporal sparsity prior; `0` selects the default heuristic.
    pub k_temp: usize,
    /// Seed of the process random stream.
    pub seed: u64,
    pub random_kind_spat: RandomKind,
    pub random_kind_temp: RandomKind,
    pub use_transform_spat: bool,
    pub use_transform_temp: bool,
    pub transform_kind_spat: TransformKind,
    pub transform_kind_temp: TransformKind,
    pub normalize_spat: bool,
    pub normalize_temp: bool,
    pub nc_coeff_kind: NcCoeffKind,
    pub calc_snr: bool,
    pub nc_enable: bool,
    /// Inter-packet idle time after which an open sequence is closed.
    pub timeout: Duration,
    pub failure_fill: FailureFill,
    /// Run per-column and per-node solves on the rayon pool.
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            solver_spat: SolverKind::Omp,
            solver_temp: SolverKind::Omp,
            tolerance: 1e-3,
            max_iter: 1000,
            k_spat: 0,
            k_temp: 0,
            seed: 1,
            random_kind_spat: RandomKind::standard_gaussian(),
            random_kind_temp: RandomKind::standard_gaussian(),
            use_transform_spat: false,
            use_transform_temp: false,
            transform_kind_spat: TransformKind::Dct,
            transform_kind_temp: TransformKind::Dct,
            normalize_spat: false,
            normalize_temp: false,
            nc_coeff_kind: NcCoeffKind::Bernoulli,
            calc_snr: false,
            nc_enable: false,
            timeout: Duration::from_millis(1000),
            failure_fill: FailureFill::Zero,
            parallel: true,
        }
    }
}

fn parse_opt<T: FromStr<Err = CsError>>(v: Option<String>, default: T) -> Result<T> {
    match v {
        Some(s) => s.parse(),
        None => Ok(default),
    }
}

impl EngineConfig {
    /// Parses the `[reconstruction]` table of a TOML document. A missing
    /// table or missing keys fall back to the defaults.
    pub fn from_toml(s: &str) -> Result<Self> {
        #[derive(serde::Deserialize)]
        struct Root {
            reconstruction: Option<Raw>,
        }

        #[derive(serde::Deserialize)]
        struct Raw {
            solver_spat: Option<String>,
            solver_temp: Option<String>,
            tolerance: Option<f64>,
            max_iter: Option<usize>,
            k_spat: Option<usize>,
            k_temp: Option<usize>,
            seed: Option<u64>,
            random_kind_spat: Option<String>,
            random_kind_temp: Option<String>,
            use_transform_spat: Option<bool>,
            use_transform_temp: Option<bool>,
            transform_kind_spat: Option<String>,
            transform_kind_temp: Option<String>,
            normalize_spat: Option<bool>,
            normalize_temp: Option<bool>,
            nc_coeff_kind: Option<String>,
            calc_snr: Option<bool>,
            nc_enable: Option<bool>,
            timeout_ms: Option<u64>,
            failure_fill: Option<String>,
            parallel: Option<bool>,
        }

        let root: Root = toml::from_str(s)?;
        let d = EngineConfig::default();
        let raw = match root.reconstruction {
            Some(r) => r,
            None => return Ok(d),
        };

        let cfg = EngineConfig {
            solver_spat: parse_opt(raw.solver_spat, d.solver_spat)?,
            solver_temp: parse_opt(raw.solver_temp, d.solver_temp)?,
            tolerance: raw.tolerance.unwrap_or(d.tolerance),
            max_iter: raw.max_iter.unwrap_or(d.max_iter),
            k_spat: raw.k_spat.unwrap_or(d.k_spat),
            k_temp: raw.k_temp.unwrap_or(d.k_temp),
            seed: raw.seed.unwrap_or(d.seed),
            random_kind_spat: parse_opt(raw.random_kind_spat, d.random_kind_spat)?,
            random_kind_temp: parse_opt(raw.random_kind_temp, d.random_kind_temp)?,
            use_transform_spat: raw.use_transform_spat.unwrap_or(d.use_transform_spat),
            use_transform_temp: raw.use_transform_temp.unwrap_or(d.use_transform_temp),
            transform_kind_spat: parse_opt(raw.transform_kind_spat, d.transform_kind_spat)?,
            transform_kind_temp: parse_opt(raw.transform_kind_temp, d.transform_kind_temp)?,
            normalize_spat: raw.normalize_spat.unwrap_or(d.normalize_spat),
            normalize_temp: raw.normalize_temp.unwrap_or(d.normalize_temp),
            nc_coeff_kind: parse_opt(raw.nc_coeff_kind, d.nc_coeff_kind)?,
            calc_snr: raw.calc_snr.unwrap_or(d.calc_snr),
            nc_enable: raw.nc_enable.unwrap_or(d.nc_enable),
            timeout: raw.timeout_ms.map(Duration::from_millis).unwrap_or(d.timeout),
            failure_fill: parse_opt(raw.failure_fill, d.failure_fill)?,
            parallel: raw.parallel.unwrap_or(d.parallel),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(CsError::Config(format!("tolerance must be >= 0, got {}", self.tolerance)));
        }
        if self.max_iter == 0 {
            return Err("max_iter must be >= 1".into());
        }
        if self.seed == 0 {
            return Err("seed must be > 0".into());
        }
        if self.timeout.is_zero() {
            return Err("timeout must be > 0".into());
        }
        Ok(())
    }
}
