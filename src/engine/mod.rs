// Copyright (c) 2024, The csnet Project Authors.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright
//       notice, this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above
//       copyright notice, this list of conditions and the following disclaimer
//       in the documentation and/or other materials provided with the
//       distribution.
//
//     * Neither the name of the copyright holder nor the names of its
//       contributors may be used to endorse or promote products derived from
//       this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// OWNER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! # Reconstruction Engine
//!
//! The sink side of the network. Packets of one measurement sequence are
//! stacked into the combined measurement buffer `U` (one row of `m` values per
//! packet) and the network-coding buffer `Ω` (one row of `L` coefficients per
//! packet). When every cluster has delivered its `l_k` rows, or the
//! inter-packet timeout expires and the gaps are zero-filled, the sequence is
//! reconstructed in two stages:
//!
//! 1. **Spatial.** `A_S = Ω · diag(Φ_0·B_0, …, Φ_{K−1}·B_{K−1}) [· Ψ_S]` maps
//!    the per-node measurement values to what the sink observed. Each of the
//!    `m` columns of `U` is solved against `A_S`, giving `Y` with one row of
//!    length `m` per source node.
//! 2. **Temporal.** Row `j` of `Y` is the compressed frame of node `j`; it is
//!    solved against `A_T = Φ_{jk} [· Ψ_T]` with `Φ_{jk}` rebuilt from the
//!    node's seed.
//!
//! Per-column and per-node solves are independent and run on the rayon pool
//! when `parallel` is set. Solver failures are recorded and filled; operator
//! construction failures abort the sequence.
//!
//! ```text
//! IDLE → INGESTING → CLOSING → SOLVING_SPATIAL → SOLVING_TEMPORAL → IDLE
//! ```

pub mod cluster;
pub mod config;
pub mod sequence;
pub mod stream;

pub use cluster::{ClusterDescriptor, ClusterTable, SourceNode};
pub use config::{EngineConfig, FailureFill};
pub use sequence::{is_newer, is_older, OpenSequence};
pub use stream::{
    lock, recon_stream, snr_db, snr_stream, spatial_stream, DropRecord, FailureRecord, MatrixRecord, OutputStreams,
    SharedStreams, SolveRecord, Stage, SNR_EXACT_DB, SNR_UNDEFINED_DB,
};

use crate::error::{CsError, DimensionMismatch, DropCause, Result, SolverError};
use crate::linalg::{block_diag, BlockDiag, BoxedOperator, LinearOperator, OperatorExt, Product};
use crate::nc::NcMatrixBuffer;
use crate::random::{set_global_seed, RandomKind};
use crate::solver::{CsSolver, Prepared, Solver};
use crate::telemetry;
use crate::transform::{SparsifyingTransform, TransformKind};
use crate::wire::{saturating_data_size, SinkPacket};
use log::{debug, error, info, warn};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Ingesting,
    Closing,
    SolvingSpatial,
    SolvingTemporal,
}

impl EngineState {
    pub fn name(&self) -> &'static str {
        match self {
            EngineState::Idle => "IDLE",
            EngineState::Ingesting => "INGESTING",
            EngineState::Closing => "CLOSING",
            EngineState::SolvingSpatial => "SOLVING_SPATIAL",
            EngineState::SolvingTemporal => "SOLVING_TEMPORAL",
        }
    }
}

/// How the reconstruction operator of one stage is built. Must match what
/// the senders used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecMatrixSpec {
    pub random_kind: RandomKind,
    /// Sparsifying basis `Ψ`; `None` solves in the signal domain.
    pub transform: Option<TransformKind>,
    pub normalize: bool,
}

impl RecMatrixSpec {
    pub fn spatial(cfg: &EngineConfig) -> Self {
        Self {
            random_kind: cfg.random_kind_spat,
            transform: cfg.use_transform_spat.then_some(cfg.transform_kind_spat),
            normalize: cfg.normalize_spat,
        }
    }

    pub fn temporal(cfg: &EngineConfig) -> Self {
        Self {
            random_kind: cfg.random_kind_temp,
            transform: cfg.use_transform_temp.then_some(cfg.transform_kind_temp),
            normalize: cfg.normalize_temp,
        }
    }
}

/// A packet at the ingestion boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingPacket {
    pub cluster_id: u8,
    pub sequence: u16,
    /// Payload size in bytes as announced by the header.
    pub data_size: u16,
    pub payload: Vec<f64>,
    /// `L` coefficients, or empty when network coding is disabled.
    pub coeffs: Vec<f64>,
}

impl IncomingPacket {
    pub fn new(cluster_id: u8, sequence: u16, payload: Vec<f64>, coeffs: Vec<f64>) -> Self {
        Self {
            cluster_id,
            sequence,
            data_size: saturating_data_size(payload.len()),
            payload,
            coeffs,
        }
    }
}

impl From<SinkPacket> for IncomingPacket {
    fn from(p: SinkPacket) -> Self {
        Self {
            cluster_id: p.header.node.cluster_id,
            sequence: p.header.node.sequence,
            data_size: p.header.node.data_size,
            payload: p.payload,
            coeffs: p.header.coeffs,
        }
    }
}

/// Summary of one reconstructed sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconstructionReport {
    pub sequence: u16,
    /// Rows of `U` (and `Ω`) the sequence was solved from, zero-fills included.
    pub rows: usize,
    pub zero_filled: usize,
    pub timed_out: bool,
    pub spatial_solves: usize,
    pub spatial_failures: usize,
    pub temporal_solves: usize,
    pub temporal_failures: usize,
    pub max_iterations: usize,
    pub elapsed_ms: f64,
}

struct ColumnOutcome {
    result: std::result::Result<(DVector<f64>, usize, bool), SolverError>,
    elapsed_ms: f64,
}

struct NodeOutcome {
    cluster: usize,
    node: usize,
    result: std::result::Result<(DVector<f64>, usize, bool), SolverError>,
    elapsed_ms: f64,
}

fn run_indexed<T, F>(parallel: bool, count: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    if parallel {
        (0..count).into_par_iter().map(f).collect()
    } else {
        (0..count).map(f).collect()
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1e3
}

/// Original frames of one node, indexed by sequence number.
#[derive(Debug, Clone)]
struct Reference {
    first_sequence: u16,
    frames: DMatrix<f64>,
}

impl Reference {
    fn frame(&self, sequence: u16) -> Option<DVector<f64>> {
        let col = sequence.wrapping_sub(self.first_sequence) as usize;
        (col < self.frames.ncols()).then(|| self.frames.column(col).into_owned())
    }
}

pub struct ReconstructionEngine {
    config: EngineConfig,
    spatial: RecMatrixSpec,
    temporal: RecMatrixSpec,
    solver_spat: Solver,
    solver_temp: Solver,
    clusters: ClusterTable,
    state: EngineState,
    /// `U`, row-major with `m` values per row.
    u_rows: Vec<f64>,
    u_count: usize,
    nc: NcMatrixBuffer,
    open: Option<OpenSequence>,
    last_closed: Option<u16>,
    references: HashMap<(u8, u8), Reference>,
    streams: SharedStreams,
}

impl ReconstructionEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        set_global_seed(config.seed);
        let solver_spat = Solver::with_params(config.solver_spat, config.tolerance, config.max_iter)?;
        let solver_temp = Solver::with_params(config.solver_temp, config.tolerance, config.max_iter)?;
        Ok(Self {
            spatial: RecMatrixSpec::spatial(&config),
            temporal: RecMatrixSpec::temporal(&config),
            solver_spat,
            solver_temp,
            clusters: ClusterTable::new(),
            state: EngineState::Idle,
            u_rows: Vec::new(),
            u_count: 0,
            nc: NcMatrixBuffer::new(0),
            open: None,
            last_closed: None,
            references: HashMap::new(),
            streams: OutputStreams::shared("run-0"),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn clusters(&self) -> &ClusterTable {
        &self.clusters
    }

    pub fn streams(&self) -> SharedStreams {
        self.streams.clone()
    }

    pub fn open_sequence(&self) -> Option<u16> {
        self.open.as_ref().map(|s| s.number)
    }

    /// `(rows(U), rows(Ω))`
    pub fn buffered_rows(&self) -> (usize, usize) {
        (self.u_count, self.nc.num_rows())
    }

    pub fn nc_buffer(&self) -> &NcMatrixBuffer {
        &self.nc
    }

    /// The combined measurement buffer `U` as a `rows × m` matrix.
    pub fn measurement_matrix(&self) -> DMatrix<f64> {
        let m = self.clusters.measurement_len().unwrap_or(0);
        DMatrix::from_row_slice(self.u_count, m, &self.u_rows)
    }

    fn require_idle(&self, op: &'static str) -> Result<()> {
        if self.state != EngineState::Idle || self.open.is_some() {
            return Err(CsError::InvalidState {
                op,
                state: self.state.name(),
            });
        }
        Ok(())
    }

    /// Registers a cluster, or replaces the registration with the same id.
    pub fn add_cluster(&mut self, desc: ClusterDescriptor) -> Result<()> {
        self.require_idle("add_cluster")?;
        info!(
            "registering cluster {}: n={} m={} l={} nodes={}",
            desc.id,
            desc.n,
            desc.m,
            desc.l,
            desc.num_nodes()
        );
        self.clusters.insert(desc)?;
        self.nc.set_width(self.clusters.total_rows());
        Ok(())
    }

    pub fn set_rec_matrix_spatial(&mut self, spec: RecMatrixSpec) -> Result<()> {
        self.require_idle("set_rec_matrix_spatial")?;
        self.spatial = spec;
        Ok(())
    }

    pub fn set_rec_matrix_temporal(&mut self, spec: RecMatrixSpec) -> Result<()> {
        self.require_idle("set_rec_matrix_temporal")?;
        self.temporal = spec;
        Ok(())
    }

    /// Attaches the original signals of one node for SNR computation.
    ///
    /// `x0` is `n × S`; column `s` is the frame sent under sequence number
    /// `first_sequence + s` (mod 2¹⁶), so lost sequences do not shift the
    /// pairing.
    pub fn set_reference(&mut self, cluster_id: u8, node_id: u8, first_sequence: u16, x0: DMatrix<f64>) -> Result<()> {
        let idx = self
            .clusters
            .index_of(cluster_id)
            .ok_or(CsError::UnknownCluster(cluster_id))?;
        let c = self.clusters.get(idx);
        if c.node_index(node_id).is_none() {
            return Err(CsError::Config(format!("cluster {} has no node {}", cluster_id, node_id)));
        }
        DimensionMismatch::check("reference rows", c.n, x0.nrows())?;
        self.references.insert(
            (cluster_id, node_id),
            Reference {
                first_sequence,
                frames: x0,
            },
        );
        Ok(())
    }

    /// Clears the buffers and the open sequence and attaches a fresh set of
    /// output streams. Cluster registrations are kept.
    pub fn reset(&mut self, run_id: &str) -> SharedStreams {
        info!("resetting engine for run {}", run_id);
        self.clear_buffers();
        self.open = None;
        self.last_closed = None;
        self.references.clear();
        self.state = EngineState::Idle;
        self.streams = OutputStreams::shared(run_id);
        self.streams.clone()
    }

    fn clear_buffers(&mut self) {
        self.u_rows.clear();
        self.u_count = 0;
        self.nc.reset();
    }

    /// Ingests one packet at simulated time `now`.
    ///
    /// Returns the reports of any sequence this packet closed: the previous
    /// one when the packet starts a newer sequence, and the current one when
    /// the packet completes it. Dropped packets are recorded in the drop
    /// trace and returned as the matching error. A superseded sequence that
    /// fails to reconstruct yields no report; the packet is still ingested.
    pub fn on_packet(&mut self, now: Duration, pkt: &IncomingPacket) -> Result<Vec<ReconstructionReport>> {
        let mut reports = Vec::new();

        match self.open.as_ref().map(|s| s.number) {
            Some(current) if current == pkt.sequence => {}
            Some(current) if is_older(pkt.sequence, current) => {
                return Err(self.reject(
                    CsError::ExpiredSequence {
                        sequence: pkt.sequence,
                        current,
                    },
                    pkt,
                ));
            }
            Some(current) => {
                info!("sequence {} superseded by {}", current, pkt.sequence);
                // close_open traces its own failure; keep the new packet
                match self.close_open(false) {
                    Ok(Some(r)) => reports.push(r),
                    Ok(None) => {}
                    Err(e) => warn!("sequence {} lost, continuing with {}: {}", current, pkt.sequence, e),
                }
                self.start_sequence(pkt.sequence, now);
            }
            None => {
                if let Some(last) = self.last_closed {
                    if !is_newer(pkt.sequence, last) {
                        return Err(self.reject(
                            CsError::ExpiredSequence {
                                sequence: pkt.sequence,
                                current: last,
                            },
                            pkt,
                        ));
                    }
                }
                self.start_sequence(pkt.sequence, now);
            }
        }

        if let Err(e) = self.accept(now, pkt) {
            return Err(self.reject(e, pkt));
        }

        let complete = self
            .open
            .as_ref()
            .map(|s| s.is_complete(&self.clusters))
            .unwrap_or(false);
        if complete {
            if let Some(r) = self.close_open(false)? {
                reports.push(r);
            }
        }
        Ok(reports)
    }

    fn start_sequence(&mut self, number: u16, now: Duration) {
        debug!("starting sequence {}", number);
        self.clear_buffers();
        self.open = Some(OpenSequence::new(number, self.clusters.len(), now));
        self.state = EngineState::Ingesting;
    }

    fn reject(&mut self, err: CsError, pkt: &IncomingPacket) -> CsError {
        if let Some(cause) = DropCause::from_error(&err) {
            warn!(
                "dropping packet of cluster {} seq {}: {} ({})",
                pkt.cluster_id, pkt.sequence, cause, err
            );
            telemetry::PACKETS_DROPPED.inc();
            lock(&self.streams).record_drop(cause, pkt.cluster_id, pkt.sequence);
        }
        err
    }

    /// Validates `pkt` against the registered geometry and appends it.
    fn accept(&mut self, now: Duration, pkt: &IncomingPacket) -> Result<()> {
        let idx = self
            .clusters
            .index_of(pkt.cluster_id)
            .ok_or(CsError::UnknownCluster(pkt.cluster_id))?;
        let m = self.clusters.get(idx).m;
        let total_rows = self.clusters.total_rows();
        if pkt.payload.len() != m {
            return Err(CsError::SizeMismatch {
                what: "payload",
                expected: m,
                found: pkt.payload.len(),
            });
        }
        if pkt.data_size as usize != m * 8 {
            return Err(CsError::SizeMismatch {
                what: "data_size",
                expected: m * 8,
                found: pkt.data_size as usize,
            });
        }

        let (r0, r1) = self.clusters.row_range(idx);
        let received = self.open.as_ref().map(|s| s.rows[idx]).unwrap_or(0);
        let coeffs = if pkt.coeffs.is_empty() && !self.config.nc_enable {
            if received >= r1 - r0 {
                return Err(CsError::SizeMismatch {
                    what: "uncoded rows",
                    expected: r1 - r0,
                    found: received + 1,
                });
            }
            let mut row = vec![0.0; total_rows];
            row[r0 + received] = 1.0;
            row
        } else {
            if pkt.coeffs.len() != total_rows {
                return Err(CsError::SizeMismatch {
                    what: "nc coefficients",
                    expected: total_rows,
                    found: pkt.coeffs.len(),
                });
            }
            if let Some(col) = pkt
                .coeffs
                .iter()
                .enumerate()
                .position(|(c, &v)| v != 0.0 && (c < r0 || c >= r1))
            {
                return Err(CsError::SizeMismatch {
                    what: "nc coefficient outside cluster block",
                    expected: r1,
                    found: col,
                });
            }
            pkt.coeffs.clone()
        };

        if !self.config.nc_enable {
            let nz: Vec<usize> = (r0..r1).filter(|&c| coeffs[c] != 0.0).collect();
            if nz.len() == 1 && coeffs[nz[0]] == 1.0 {
                let local = nz[0] - r0;
                if local > received {
                    self.zero_fill(idx, local - received);
                }
            }
        }

        self.u_rows.extend_from_slice(&pkt.payload);
        self.u_count += 1;
        self.nc.append_row(&coeffs)?;
        if let Some(open) = self.open.as_mut() {
            open.rows[idx] += 1;
            open.accepted += 1;
            open.last_arrival = now;
        }
        telemetry::PACKETS_RECEIVED.inc();
        Ok(())
    }

    fn zero_fill(&mut self, cluster_idx: usize, count: usize) {
        let m = self.clusters.get(cluster_idx).m;
        debug!(
            "zero-filling {} rows of cluster {}",
            count,
            self.clusters.get(cluster_idx).id
        );
        for _ in 0..count {
            self.u_rows.extend(std::iter::repeat(0.0).take(m));
            self.u_count += 1;
            self.nc.append_zero_row();
        }
        if let Some(open) = self.open.as_mut() {
            open.rows[cluster_idx] += count;
            open.zero_filled += count;
        }
        telemetry::ZERO_FILLED_ROWS.inc_by(count as u64);
    }

    /// Closes the open sequence if it has been idle longer than the timeout.
    pub fn check_timeout(&mut self, now: Duration) -> Result<Option<ReconstructionReport>> {
        let expired = match &self.open {
            Some(open) => open.idle_for(now) > self.config.timeout,
            None => false,
        };
        if !expired {
            return Ok(None);
        }
        if let Some(open) = &self.open {
            info!(
                "{} (idle {:?})",
                CsError::Timeout {
                    sequence: open.number
                },
                open.idle_for(now)
            );
        }
        self.close_open(true)
    }

    /// Closes and reconstructs the open sequence now, zero-filling whatever
    /// is missing. Without an open sequence this is a no-op.
    pub fn reconstruct(&mut self) -> Result<Option<ReconstructionReport>> {
        self.close_open(false)
    }

    fn close_open(&mut self, timed_out: bool) -> Result<Option<ReconstructionReport>> {
        let (number, accepted, missing) = match &self.open {
            Some(o) => (o.number, o.accepted, o.missing(&self.clusters)),
            None => return Ok(None),
        };
        if accepted == 0 {
            debug!("sequence {} closed without data", number);
            self.open = None;
            self.clear_buffers();
            self.state = EngineState::Idle;
            return Ok(None);
        }
        self.state = EngineState::Closing;
        for (idx, count) in missing {
            self.zero_fill(idx, count);
        }
        let open = match self.open.take() {
            Some(o) => o,
            None => return Ok(None),
        };

        let result = self.run_stages(&open, timed_out);
        self.clear_buffers();
        self.state = EngineState::Idle;
        self.last_closed = Some(open.number);

        match result {
            Ok(report) => {
                telemetry::SEQUENCES_RECONSTRUCTED.inc();
                info!(
                    "sequence {} reconstructed: {} rows ({} zero-filled), {}/{} spatial and {}/{} temporal failures in {:.1} ms",
                    report.sequence,
                    report.rows,
                    report.zero_filled,
                    report.spatial_failures,
                    report.spatial_solves,
                    report.temporal_failures,
                    report.temporal_solves,
                    report.elapsed_ms
                );
                Ok(Some(report))
            }
            Err(e) => {
                error!("sequence {} failed: {}", open.number, e);
                lock(&self.streams).failures.push(FailureRecord {
                    stage: Stage::Sequence,
                    target: format!("sequence{}", open.number),
                    sequence: open.number,
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn spatial_synthesis(&self) -> Option<BlockDiag<'static>> {
        self.spatial.transform.map(|kind| {
            block_diag(
                self.clusters
                    .iter()
                    .map(|c| SparsifyingTransform::new(kind, c.num_nodes()).transposed().boxed())
                    .collect(),
            )
        })
    }

    /// The stage-1 operator `A_S` for the rows buffered so far.
    pub fn spatial_operator(&self) -> Result<BoxedOperator<'_>> {
        let mut blocks = Vec::with_capacity(self.clusters.len());
        for c in self.clusters.iter() {
            let phi = c.spatial_matrix(self.spatial.random_kind, self.spatial.normalize)?;
            blocks.push(phi.compose(c.precoding_operator())?.boxed());
        }
        let phi = block_diag(blocks);
        DimensionMismatch::check("nc width", phi.rows(), self.nc.cols())?;
        let mut factors: Vec<BoxedOperator<'_>> = vec![(&self.nc).boxed(), phi.boxed()];
        if let Some(synth) = self.spatial_synthesis() {
            factors.push(synth.boxed());
        }
        Ok(Product::chain(factors)?)
    }

    fn run_stages(&mut self, open: &OpenSequence, timed_out: bool) -> Result<ReconstructionReport> {
        let start = Instant::now();
        let sequence = open.number;

        self.state = EngineState::SolvingSpatial;
        let u = self.measurement_matrix();
        DimensionMismatch::check("rows(U) = rows(Ω)", u.nrows(), self.nc.num_rows())?;
        let (y, columns) = self.solve_spatial(&u)?;
        let spatial_failures = self.record_spatial(sequence, &y, &columns);

        self.state = EngineState::SolvingTemporal;
        let nodes = self.solve_temporal(&y)?;
        let (temporal_failures, node_iters) = self.record_temporal(sequence, &nodes);

        let max_iterations = columns
            .iter()
            .filter_map(|c| c.result.as_ref().ok().map(|r| r.1))
            .chain(node_iters)
            .max()
            .unwrap_or(0);

        Ok(ReconstructionReport {
            sequence,
            rows: u.nrows(),
            zero_filled: open.zero_filled,
            timed_out,
            spatial_solves: columns.len(),
            spatial_failures,
            temporal_solves: nodes.len(),
            temporal_failures,
            max_iterations,
            elapsed_ms: elapsed_ms(start),
        })
    }

    /// Solves every column of `U`; returns `Y` (`N × m`) and the outcomes.
    fn solve_spatial(&self, u: &DMatrix<f64>) -> Result<(DMatrix<f64>, Vec<ColumnOutcome>)> {
        let a_s = self.spatial_operator()?;
        DimensionMismatch::check("rows(A_S)", u.nrows(), a_s.rows())?;
        let n_total = self.clusters.total_nodes();
        let synth = self.spatial_synthesis();
        let fill = self.config.failure_fill.value();
        let k = self.config.k_spat;
        debug!(
            "stage 1: A_S is {}×{}, solving {} columns with {}",
            a_s.rows(),
            a_s.cols(),
            u.ncols(),
            self.solver_spat.kind()
        );

        let prepared = self.solver_spat.prepare(&*a_s);
        let columns: Vec<ColumnOutcome> = match &prepared {
            Ok(p) => {
                let p: &dyn Prepared = &**p;
                run_indexed(self.config.parallel, u.ncols(), |j| {
                    let t = Instant::now();
                    let rhs = u.column(j).into_owned();
                    let result = p.solve(&rhs, k).map(|s| (s.x, s.iterations, s.converged));
                    ColumnOutcome {
                        result,
                        elapsed_ms: elapsed_ms(t),
                    }
                })
            }
            Err(e) => (0..u.ncols())
                .map(|_| ColumnOutcome {
                    result: Err(e.clone()),
                    elapsed_ms: 0.0,
                })
                .collect(),
        };

        let mut y = DMatrix::from_element(n_total, u.ncols(), fill);
        for (j, col) in columns.iter().enumerate() {
            if let Ok((theta, _, _)) = &col.result {
                let x = match &synth {
                    Some(s) => s.apply(theta)?,
                    None => theta.clone(),
                };
                y.set_column(j, &x);
            }
        }
        Ok((y, columns))
    }

    fn record_spatial(&self, sequence: u16, y: &DMatrix<f64>, columns: &[ColumnOutcome]) -> usize {
        let mut failures = 0;
        let mut streams = lock(&self.streams);
        for (j, col) in columns.iter().enumerate() {
            telemetry::SOLVER_INVOCATIONS.inc();
            let target = format!("column{}", j);
            match &col.result {
                Ok((_, iterations, converged)) => {
                    telemetry::SOLVER_ITERATIONS.inc_by(*iterations as u64);
                    streams.solves.push(SolveRecord {
                        stage: Stage::Spatial,
                        target,
                        sequence,
                        elapsed_ms: col.elapsed_ms,
                        iterations: *iterations,
                        converged: *converged,
                    });
                }
                Err(e) => {
                    failures += 1;
                    telemetry::SOLVER_FAILURES.inc();
                    warn!("sequence {}: spatial solve of column {} failed: {}", sequence, j, e);
                    streams.failures.push(FailureRecord {
                        stage: Stage::Spatial,
                        target,
                        sequence,
                        message: e.to_string(),
                    });
                }
            }
        }
        for (idx, c) in self.clusters.iter().enumerate() {
            let (n0, n1) = self.clusters.node_range(idx);
            let block = y.rows(n0, n1 - n0).into_owned();
            streams.push_matrix(spatial_stream(c.id), MatrixRecord::from_matrix(sequence, &block));
        }
        failures
    }

    /// Solves the temporal problem of every source node against its row of `Y`.
    fn solve_temporal(&self, y: &DMatrix<f64>) -> Result<Vec<NodeOutcome>> {
        let targets: Vec<(usize, usize)> = self
            .clusters
            .iter()
            .enumerate()
            .flat_map(|(ci, c)| (0..c.num_nodes()).map(move |ni| (ci, ni)))
            .collect();
        let synths: Vec<Option<SparsifyingTransform>> = self
            .clusters
            .iter()
            .map(|c| self.temporal.transform.map(|kind| SparsifyingTransform::new(kind, c.n)))
            .collect();
        let spec = self.temporal;
        let k = self.config.k_temp;
        let solver = &self.solver_temp;
        let clusters = &self.clusters;
        debug!("stage 2: solving {} nodes with {}", targets.len(), solver.kind());

        let outcomes = run_indexed(self.config.parallel, targets.len(), |t| -> Result<NodeOutcome> {
            let (ci, ni) = targets[t];
            let c = clusters.get(ci);
            let node = c.nodes[ni];
            let (n0, _) = clusters.node_range(ci);
            let rhs: DVector<f64> = y.row(n0 + ni).transpose();
            let start = Instant::now();

            let phi = c.temporal_matrix(&node, spec.random_kind, spec.normalize)?;
            let result = if rhs.iter().any(|v| !v.is_finite()) {
                Err(SolverError::Numerical("spatial stage left no measurement for this node".into()))
            } else {
                match &synths[ci] {
                    Some(psi) => {
                        let a_t = (&phi).compose(psi.transposed())?;
                        solver.solve(&rhs, &a_t, k).and_then(|s| {
                            let x = psi.apply_adjoint(&s.x)?;
                            Ok((x, s.iterations, s.converged))
                        })
                    }
                    None => solver.solve(&rhs, &phi, k).map(|s| (s.x, s.iterations, s.converged)),
                }
            };
            Ok(NodeOutcome {
                cluster: ci,
                node: ni,
                result,
                elapsed_ms: elapsed_ms(start),
            })
        });
        outcomes.into_iter().collect()
    }

    /// Returns the failure count and the iteration counts of successful solves.
    fn record_temporal(&self, sequence: u16, nodes: &[NodeOutcome]) -> (usize, Vec<usize>) {
        let mut failures = 0;
        let mut iters = Vec::with_capacity(nodes.len());
        let fill = self.config.failure_fill.value();
        let mut streams = lock(&self.streams);
        for out in nodes {
            let c = self.clusters.get(out.cluster);
            let node = c.nodes[out.node];
            let target = format!("node{}.{}", c.id, node.id);
            telemetry::SOLVER_INVOCATIONS.inc();

            let x = match &out.result {
                Ok((x, iterations, converged)) => {
                    telemetry::SOLVER_ITERATIONS.inc_by(*iterations as u64);
                    iters.push(*iterations);
                    streams.solves.push(SolveRecord {
                        stage: Stage::Temporal,
                        target,
                        sequence,
                        elapsed_ms: out.elapsed_ms,
                        iterations: *iterations,
                        converged: *converged,
                    });
                    x.clone()
                }
                Err(e) => {
                    failures += 1;
                    telemetry::SOLVER_FAILURES.inc();
                    warn!("sequence {}: temporal solve of {} failed: {}", sequence, target, e);
                    streams.failures.push(FailureRecord {
                        stage: Stage::Temporal,
                        target,
                        sequence,
                        message: e.to_string(),
                    });
                    DVector::from_element(c.n, fill)
                }
            };

            streams.push_matrix(recon_stream(c.id, node.id), MatrixRecord::from_vector(sequence, &x));
            if self.config.calc_snr {
                let reference = self.references.get(&(c.id, node.id)).and_then(|r| r.frame(sequence));
                let record = match reference {
                    Some(x0) => MatrixRecord::from_vector(sequence, &DVector::from_element(1, snr_db(&x0, &x))),
                    None => MatrixRecord::from_vector(sequence, &x),
                };
                streams.push_matrix(snr_stream(c.id, node.id), record);
            }
        }
        (failures, iters)
    }
}
