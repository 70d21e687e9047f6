//! End-to-end run driver.
//!
//! Synthesises source signals, pushes them through the senders, serialises
//! every packet with the wire codec and feeds the sink on a simulated clock.
//! Packets are lost with a fixed probability; the engine timeout closes the
//! sequences that stay incomplete.

use super::{sparse_vector, transform_sparse_vector, ClusterHead, NcRelay};
use crate::engine::{lock, snr_stream, ClusterTable, OutputStreams, ReconstructionEngine, ReconstructionReport};
use crate::engine::{SNR_EXACT_DB, SNR_UNDEFINED_DB};
use crate::error::{CsError, DropCause, Result};
use crate::transform::{SparsifyingTransform, TransformKind};
use crate::wire::{CoeffEncoding, SinkPacket, WireGeometry};
use log::{debug, info, trace};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;

/// How source frames are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalModel {
    /// Sparse in the sample domain.
    #[default]
    Sparse,
    /// Sparse in the temporal sparsifying basis of the reconstruction.
    TransformSparse,
}

impl FromStr for SignalModel {
    type Err = CsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sparse" => Ok(SignalModel::Sparse),
            "transform_sparse" | "transform-sparse" => Ok(SignalModel::TransformSparse),
            other => Err(CsError::Config(format!("unknown signal model '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Non-zeros per frame.
    pub sparsity: usize,
    /// Nodes per cluster carrying a signal in a sequence; `0` means all.
    pub active_nodes: usize,
    pub sequences: usize,
    pub first_sequence: u16,
    pub loss_probability: f64,
    pub packet_gap: Duration,
    /// Relay recombinations between cluster head and sink.
    pub relay_hops: usize,
    pub signal_model: SignalModel,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sparsity: 8,
            active_nodes: 0,
            sequences: 4,
            first_sequence: 0,
            loss_probability: 0.0,
            packet_gap: Duration::from_millis(10),
            relay_hops: 0,
            signal_model: SignalModel::Sparse,
            seed: 7,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sparsity == 0 {
            return Err("simulation sparsity must be >= 1".into());
        }
        if self.sequences == 0 {
            return Err("simulation needs at least one sequence".into());
        }
        if !(0.0..1.0).contains(&self.loss_probability) {
            return Err(CsError::Config(format!(
                "loss probability must be in [0, 1), got {}",
                self.loss_probability
            )));
        }
        Ok(())
    }
}

/// Packet accounting and reports of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub reports: Vec<ReconstructionReport>,
    pub sent: usize,
    pub lost: usize,
    /// Packets the engine dropped at ingestion.
    pub rejected: usize,
}

/// SNR statistics of one cluster over a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSnr {
    pub cluster: u8,
    /// Mean over finite, non-sentinel values.
    pub mean_db: Option<f64>,
    pub min_db: Option<f64>,
    pub exact: usize,
    pub undefined: usize,
    pub samples: usize,
}

/// Summarises the `node<k>.<j>/snr` streams per cluster. Streams holding
/// reconstructions instead of SNR values (no reference attached) are skipped.
pub fn snr_summary(streams: &OutputStreams, table: &ClusterTable) -> Vec<ClusterSnr> {
    table
        .iter()
        .map(|c| {
            let mut values = Vec::new();
            let (mut exact, mut undefined, mut samples) = (0, 0, 0);
            for node in &c.nodes {
                for rec in streams.stream(&snr_stream(c.id, node.id)) {
                    if rec.rows != 1 || rec.cols != 1 {
                        continue;
                    }
                    samples += 1;
                    let v = rec.data[0];
                    if v == SNR_EXACT_DB {
                        exact += 1;
                    } else if v == SNR_UNDEFINED_DB {
                        undefined += 1;
                    } else if v.is_finite() {
                        values.push(v);
                    }
                }
            }
            let mean_db = (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);
            let min_db = values.iter().copied().reduce(f64::min);
            ClusterSnr {
                cluster: c.id,
                mean_db,
                min_db,
                exact,
                undefined,
                samples,
            }
        })
        .collect()
}

pub struct NetworkSimulation {
    config: SimulationConfig,
    heads: Vec<ClusterHead>,
    relay: Option<NcRelay>,
    geometry: WireGeometry,
    temporal_basis: TransformKind,
    timeout: Duration,
    rng: StdRng,
    clock: Duration,
}

impl NetworkSimulation {
    /// Builds the senders for every cluster registered with `engine`.
    pub fn new(engine: &ReconstructionEngine, config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let cfg = engine.config();
        let table = engine.clusters();
        let payload_len = table
            .measurement_len()
            .ok_or_else(|| CsError::Config("no clusters registered".into()))?;
        let heads = (0..table.len())
            .map(|idx| ClusterHead::new(table, idx, cfg))
            .collect::<Result<Vec<_>>>()?;
        let relay = (cfg.nc_enable && config.relay_hops > 0).then(|| NcRelay::new(cfg.nc_coeff_kind));
        let ternary = !cfg.nc_enable || (cfg.nc_coeff_kind.is_ternary() && relay.is_none());
        let geometry = WireGeometry {
            clusters: table.len(),
            total_rows: table.total_rows(),
            payload_len,
            encoding: if ternary {
                CoeffEncoding::Ternary
            } else {
                CoeffEncoding::Real
            },
        };
        info!(
            "simulating {} clusters, {} sequences, loss {:.2}, {:?} coefficients",
            heads.len(),
            config.sequences,
            config.loss_probability,
            geometry.encoding
        );
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            temporal_basis: cfg.transform_kind_temp,
            timeout: cfg.timeout,
            clock: Duration::ZERO,
            config,
            heads,
            relay,
            geometry,
        })
    }

    pub fn geometry(&self) -> WireGeometry {
        self.geometry
    }

    pub fn clock(&self) -> Duration {
        self.clock
    }

    pub fn heads(&self) -> &[ClusterHead] {
        &self.heads
    }

    /// Source signals of a run, indexed `[cluster][node]`; each is
    /// `n × sequences` with column `s` the frame of sequence `s`.
    pub fn generate_signals(&mut self) -> Result<Vec<Vec<DMatrix<f64>>>> {
        let s_count = self.config.sequences;
        let mut out = Vec::with_capacity(self.heads.len());
        for head in &self.heads {
            let desc = head.descriptor();
            let nodes = desc.num_nodes();
            let psi = match self.config.signal_model {
                SignalModel::Sparse => None,
                SignalModel::TransformSparse => Some(SparsifyingTransform::new(self.temporal_basis, desc.n)),
            };
            let mut per_node = vec![DMatrix::zeros(desc.n, s_count); nodes];
            for s in 0..s_count {
                let active: Vec<usize> = if self.config.active_nodes == 0 || self.config.active_nodes >= nodes {
                    (0..nodes).collect()
                } else {
                    sample(&mut self.rng, nodes, self.config.active_nodes).into_vec()
                };
                for j in active {
                    let x = match &psi {
                        Some(psi) => transform_sparse_vector(psi, self.config.sparsity, &mut self.rng)?,
                        None => sparse_vector(desc.n, self.config.sparsity, &mut self.rng),
                    };
                    per_node[j].set_column(s, &x);
                }
            }
            out.push(per_node);
        }
        Ok(out)
    }

    /// Runs every sequence through the network into `engine`. Reference
    /// signals are attached when the engine computes SNR.
    pub fn run(&mut self, engine: &mut ReconstructionEngine) -> Result<RunSummary> {
        let signals = self.generate_signals()?;
        if engine.config().calc_snr {
            for (head, per_node) in self.heads.iter().zip(&signals) {
                for (node, x0) in head.nodes().iter().zip(per_node) {
                    engine.set_reference(head.id(), node.id(), self.config.first_sequence, x0.clone())?;
                }
            }
        }

        let mut summary = RunSummary::default();
        for s in 0..self.config.sequences {
            let sequence = self.config.first_sequence.wrapping_add(s as u16);
            let mut per_cluster = Vec::with_capacity(self.heads.len());
            for (ci, head) in self.heads.iter().enumerate() {
                let desc = head.descriptor();
                let frames = DMatrix::from_fn(desc.n, desc.num_nodes(), |r, j| signals[ci][j][(r, s)]);
                let mut packets = head.emit(sequence, &frames, &mut self.rng)?;
                if let Some(relay) = &self.relay {
                    for _ in 0..self.config.relay_hops {
                        packets = relay.recombine(&packets, packets.len(), &mut self.rng)?;
                    }
                }
                per_cluster.push(packets.into_iter());
            }

            // round-robin over clusters, in order within a cluster
            loop {
                let mut progressed = false;
                for it in per_cluster.iter_mut() {
                    if let Some(pkt) = it.next() {
                        progressed = true;
                        self.deliver(engine, pkt, &mut summary)?;
                    }
                }
                if !progressed {
                    break;
                }
            }

            self.clock += self.timeout + self.config.packet_gap;
            if let Some(report) = engine.check_timeout(self.clock)? {
                summary.reports.push(report);
            }
        }
        info!(
            "run finished: {} sent, {} lost, {} rejected, {} sequences reconstructed",
            summary.sent,
            summary.lost,
            summary.rejected,
            summary.reports.len()
        );
        Ok(summary)
    }

    fn deliver(&mut self, engine: &mut ReconstructionEngine, pkt: SinkPacket, summary: &mut RunSummary) -> Result<()> {
        summary.sent += 1;
        self.clock += self.config.packet_gap;
        if self.rng.gen::<f64>() < self.config.loss_probability {
            trace!("lost packet of cluster {} seq {}", pkt.cluster_id(), pkt.sequence());
            summary.lost += 1;
            return Ok(());
        }
        let raw = pkt.encode(&self.geometry)?;
        let decoded = SinkPacket::decode(&raw, &self.geometry)?;
        match engine.on_packet(self.clock, &decoded.into()) {
            Ok(reports) => summary.reports.extend(reports),
            Err(e) if DropCause::from_error(&e).is_some() => {
                debug!("sink rejected packet: {}", e);
                summary.rejected += 1;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

/// [`snr_summary`] of the streams `engine` currently writes to.
pub fn summarize(engine: &ReconstructionEngine) -> Vec<ClusterSnr> {
    let streams = engine.streams();
    let guard = lock(&streams);
    snr_summary(&guard, engine.clusters())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ClusterDescriptor, EngineConfig};
    use crate::random::RandomKind;

    fn engine(cfg: EngineConfig, l: usize) -> ReconstructionEngine {
        let mut e = ReconstructionEngine::new(cfg).unwrap();
        e.add_cluster(ClusterDescriptor::with_sequential_nodes(1, 32, 16, l, 4, 6, 100))
            .unwrap();
        e
    }

    #[test]
    fn lossless_identity_run_reconstructs_every_node() {
        let cfg = EngineConfig {
            random_kind_spat: RandomKind::Identity,
            k_spat: 6,
            calc_snr: true,
            parallel: false,
            ..EngineConfig::default()
        };
        let mut e = engine(cfg, 6);
        let sim_cfg = SimulationConfig {
            sparsity: 2,
            sequences: 3,
            ..SimulationConfig::default()
        };
        let mut sim = NetworkSimulation::new(&e, sim_cfg).unwrap();
        assert_eq!(sim.geometry().encoding, CoeffEncoding::Ternary);
        let summary = sim.run(&mut e).unwrap();
        assert_eq!(summary.sent, 18);
        assert_eq!(summary.lost, 0);
        assert_eq!(summary.rejected, 0);
        assert_eq!(summary.reports.len(), 3);
        assert!(summary.reports.iter().all(|r| r.zero_filled == 0 && !r.timed_out));

        let snr = summarize(&e);
        assert_eq!(snr.len(), 1);
        assert_eq!(snr[0].samples, 18);
        assert_eq!(snr[0].undefined, 0);
        if let Some(min) = snr[0].min_db {
            assert!(min >= 40.0, "min snr {}", min);
        }
    }

    #[test]
    fn lossy_run_closes_sequences_by_timeout() {
        let cfg = EngineConfig {
            parallel: false,
            ..EngineConfig::default()
        };
        let mut e = engine(cfg, 4);
        let sim_cfg = SimulationConfig {
            sequences: 5,
            loss_probability: 0.4,
            ..SimulationConfig::default()
        };
        let mut sim = NetworkSimulation::new(&e, sim_cfg).unwrap();
        let summary = sim.run(&mut e).unwrap();
        assert_eq!(summary.sent, 20);
        assert!(summary.reports.len() <= 5);
        assert!(summary.reports.iter().all(|r| r.rows == 4));
        assert_eq!(e.open_sequence(), None);
    }

    #[test]
    fn relayed_real_coefficients_use_real_encoding() {
        let cfg = EngineConfig {
            nc_enable: true,
            ..EngineConfig::default()
        };
        let e = engine(cfg, 3);
        let sim = NetworkSimulation::new(
            &e,
            SimulationConfig {
                relay_hops: 1,
                ..SimulationConfig::default()
            },
        )
        .unwrap();
        assert_eq!(sim.geometry().encoding, CoeffEncoding::Real);
    }

    #[test]
    fn rejects_bad_loss_probability() {
        let cfg = SimulationConfig {
            loss_probability: 1.0,
            ..SimulationConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert_eq!("Transform_Sparse".parse::<SignalModel>().unwrap(), SignalModel::TransformSparse);
    }
}
