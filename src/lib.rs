// csnet Core Library
//
// This library contains the sink-side reconstruction of a clustered
// compressed-sensing sensor network: linear operators, seeded sensing
// matrices, sparsifying transforms, network-coding buffers, sparse recovery
// solvers, the packet codec and the two-stage reconstruction engine, plus
// the sensor-side simulation that drives it.

pub mod app_config;
pub mod engine;
pub mod error;
pub mod linalg;
pub mod logger;
pub mod nc;
pub mod random;
pub mod sim;
pub mod solver;
pub mod telemetry;
pub mod transform;
pub mod wire;

pub use engine::{EngineConfig, IncomingPacket, ReconstructionEngine, ReconstructionReport};
pub use error::{CsError, DimensionMismatch, DropCause, Result, SolverError};
pub use linalg::{LinearOperator, OperatorExt};
pub use solver::{CsSolver, Solver, SolverKind};
