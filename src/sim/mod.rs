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

//! # Sensor-Side Simulation
//!
//! The senders the sink expects: sensor nodes that compress their frames
//! temporally, cluster heads that mix their nodes' outputs spatially and
//! emit network-coded packets, and relays that recombine coded packets on
//! the way to the sink. Everything is built from the same
//! [`ClusterDescriptor`] seeds the engine uses to rebuild the operators.

pub mod network;

pub use network::{NetworkSimulation, RunSummary, SignalModel, SimulationConfig};

use crate::engine::{ClusterDescriptor, ClusterTable, EngineConfig, SourceNode};
use crate::error::{CsError, Result};
use crate::linalg::{LinearOperator, OperatorExt};
use crate::nc::NcCoeffKind;
use crate::random::{RandomKind, RandomMatrix};
use crate::transform::SparsifyingTransform;
use crate::wire::{participation_bitmap, SinkPacket, BITMAP_LEN};
use nalgebra::{DMatrix, DVector};
use rand::seq::index::sample;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// A source node and its temporal sensing matrix `Φ_{jk}`.
#[derive(Debug, Clone)]
pub struct SensorNode {
    pub cluster_id: u8,
    pub node: SourceNode,
    phi: RandomMatrix,
}

impl SensorNode {
    pub fn new(cluster: &ClusterDescriptor, node: SourceNode, kind: RandomKind, normalize: bool) -> Result<Self> {
        Ok(Self {
            cluster_id: cluster.id,
            node,
            phi: cluster.temporal_matrix(&node, kind, normalize)?,
        })
    }

    pub fn id(&self) -> u8 {
        self.node.id
    }

    /// `y = Φ_{jk}·x` for one `n`-sample frame.
    pub fn compress(&self, frame: &DVector<f64>) -> Result<DVector<f64>> {
        Ok(self.phi.apply(frame)?)
    }
}

/// A cluster head: stacks its nodes' compressed frames, applies
/// `Φ_k·B_k` across nodes and emits `l_k` packets per sequence.
#[derive(Debug, Clone)]
pub struct ClusterHead {
    desc: ClusterDescriptor,
    index: usize,
    clusters: usize,
    row_offset: usize,
    total_rows: usize,
    /// `Φ_k·B_k`, `l × nodes`.
    mixing: DMatrix<f64>,
    nodes: Vec<SensorNode>,
    nc: Option<NcCoeffKind>,
}

impl ClusterHead {
    /// Builds the head of cluster `idx` of `table` with the sensing settings
    /// of `cfg`; coding follows `cfg.nc_enable` / `cfg.nc_coeff_kind`.
    pub fn new(table: &ClusterTable, idx: usize, cfg: &EngineConfig) -> Result<Self> {
        let desc = table.get(idx).clone();
        let phi = desc.spatial_matrix(cfg.random_kind_spat, cfg.normalize_spat)?;
        let mixing = phi.compose(desc.precoding_operator())?.to_dense();
        let nodes = desc
            .nodes
            .iter()
            .map(|n| SensorNode::new(&desc, *n, cfg.random_kind_temp, cfg.normalize_temp))
            .collect::<Result<Vec<_>>>()?;
        let (row_offset, _) = table.row_range(idx);
        Ok(Self {
            index: idx,
            clusters: table.len(),
            row_offset,
            total_rows: table.total_rows(),
            mixing,
            nodes,
            nc: cfg.nc_enable.then_some(cfg.nc_coeff_kind),
            desc,
        })
    }

    pub fn id(&self) -> u8 {
        self.desc.id
    }

    pub fn descriptor(&self) -> &ClusterDescriptor {
        &self.desc
    }

    pub fn nodes(&self) -> &[SensorNode] {
        &self.nodes
    }

    /// Temporal then spatial compression of one sequence.
    ///
    /// `frames` is `n × nodes` (column `j` is the frame of node `j`); the
    /// result is `l × m`, one cluster-head output row per spatial
    /// measurement.
    pub fn measure(&self, frames: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        if frames.nrows() != self.desc.n || frames.ncols() != self.nodes.len() {
            return Err(CsError::SizeMismatch {
                what: "cluster frames",
                expected: self.desc.n * self.nodes.len(),
                found: frames.nrows() * frames.ncols(),
            });
        }
        let mut stacked = DMatrix::zeros(self.nodes.len(), self.desc.m);
        for (j, node) in self.nodes.iter().enumerate() {
            let y = node.compress(&frames.column(j).into_owned())?;
            stacked.set_row(j, &y.transpose());
        }
        Ok(&self.mixing * stacked)
    }

    /// Emits the `l` packets of one sequence.
    ///
    /// Without coding packet `i` carries output row `i` and the unit
    /// coefficient row `e_{r0+i}`. With coding every packet carries a fresh
    /// random combination of all `l` output rows.
    pub fn emit<R: Rng + ?Sized>(&self, sequence: u16, frames: &DMatrix<f64>, rng: &mut R) -> Result<Vec<SinkPacket>> {
        let z = self.measure(frames)?;
        let l = self.desc.l;
        let participants = self
            .desc
            .nodes
            .iter()
            .zip(&self.desc.precoding)
            .filter(|(_, on)| **on)
            .map(|(n, _)| n.id);
        let mut participation = vec![[0u8; BITMAP_LEN]; self.clusters];
        participation[self.index] = participation_bitmap(participants);

        let mut packets = Vec::with_capacity(l);
        for i in 0..l {
            let mut coeffs = vec![0.0; self.total_rows];
            let (payload, nc_count) = match self.nc {
                None => {
                    coeffs[self.row_offset + i] = 1.0;
                    (z.row(i).transpose(), 0)
                }
                Some(kind) => {
                    let mix = draw_nonzero(kind, l, rng);
                    coeffs[self.row_offset..self.row_offset + l].copy_from_slice(&mix);
                    let payload = z.tr_mul(&DVector::from_vec(mix));
                    (payload, 1)
                }
            };
            let mut pkt = SinkPacket::new(self.desc.id, sequence, coeffs, payload.as_slice().to_vec());
            pkt.header.participation = participation.clone();
            pkt.header.nc_count = nc_count;
            packets.push(pkt);
        }
        Ok(packets)
    }
}

/// Draws `len` coefficients of `kind`, redrawing an all-zero vector.
fn draw_nonzero<R: Rng + ?Sized>(kind: NcCoeffKind, len: usize, rng: &mut R) -> Vec<f64> {
    loop {
        let v: Vec<f64> = (0..len).map(|_| kind.draw(rng)).collect();
        if v.iter().any(|&c| c != 0.0) {
            return v;
        }
    }
}

/// An intermediate cluster head re-mixing coded packets of one cluster.
///
/// Recombined coefficients are sums of the incoming ones and are generally
/// not ternary any more, so relayed packets need
/// [`CoeffEncoding::Real`](crate::wire::CoeffEncoding::Real) on the wire.
#[derive(Debug, Clone, Copy)]
pub struct NcRelay {
    kind: NcCoeffKind,
}

impl NcRelay {
    pub fn new(kind: NcCoeffKind) -> Self {
        Self { kind }
    }

    /// Produces `count` random combinations of `packets`, which must all
    /// belong to the same cluster and sequence.
    pub fn recombine<R: Rng + ?Sized>(&self, packets: &[SinkPacket], count: usize, rng: &mut R) -> Result<Vec<SinkPacket>> {
        let first = match packets.first() {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };
        let (cluster, sequence) = (first.cluster_id(), first.sequence());
        let width = first.header.coeffs.len();
        let m = first.payload.len();
        for p in packets {
            if p.cluster_id() != cluster || p.sequence() != sequence {
                return Err(CsError::Wire(format!(
                    "relay mixes cluster {} seq {} with cluster {} seq {}",
                    cluster,
                    sequence,
                    p.cluster_id(),
                    p.sequence()
                )));
            }
            if p.header.coeffs.len() != width || p.payload.len() != m {
                return Err(CsError::SizeMismatch {
                    what: "relay packet",
                    expected: width + m,
                    found: p.header.coeffs.len() + p.payload.len(),
                });
            }
        }
        let nc_count = packets.iter().map(|p| p.header.nc_count).max().unwrap_or(0).saturating_add(1);

        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let mix = draw_nonzero(self.kind, packets.len(), rng);
            let mut coeffs = vec![0.0; width];
            let mut payload = vec![0.0; m];
            for (a, p) in mix.iter().zip(packets) {
                if *a == 0.0 {
                    continue;
                }
                for (c, v) in coeffs.iter_mut().zip(&p.header.coeffs) {
                    *c += a * v;
                }
                for (y, v) in payload.iter_mut().zip(&p.payload) {
                    *y += a * v;
                }
            }
            let mut pkt = SinkPacket::new(cluster, sequence, coeffs, payload);
            pkt.header.participation = first.header.participation.clone();
            pkt.header.nc_count = nc_count;
            out.push(pkt);
        }
        Ok(out)
    }
}

/// A length-`n` vector with `k` non-zero standard normal entries at random
/// positions.
pub fn sparse_vector<R: Rng + ?Sized>(n: usize, k: usize, rng: &mut R) -> DVector<f64> {
    let mut x = DVector::zeros(n);
    for i in sample(rng, n, k.min(n)).iter() {
        x[i] = StandardNormal.sample(rng);
    }
    x
}

/// `s` independent `k`-sparse columns of length `n`.
pub fn sparse_columns<R: Rng + ?Sized>(n: usize, s: usize, k: usize, rng: &mut R) -> DMatrix<f64> {
    let mut x = DMatrix::zeros(n, s);
    for c in 0..s {
        x.set_column(c, &sparse_vector(n, k, rng));
    }
    x
}

/// `x = Ψ·θ` with `θ` `k`-sparse.
pub fn transform_sparse_vector<R: Rng + ?Sized>(
    psi: &SparsifyingTransform,
    k: usize,
    rng: &mut R,
) -> Result<DVector<f64>> {
    let theta = sparse_vector(psi.len(), k, rng);
    Ok(psi.apply_adjoint(&theta)?)
}

pub fn transform_sparse_columns<R: Rng + ?Sized>(
    psi: &SparsifyingTransform,
    s: usize,
    k: usize,
    rng: &mut R,
) -> Result<DMatrix<f64>> {
    let mut x = DMatrix::zeros(psi.len(), s);
    for c in 0..s {
        x.set_column(c, &transform_sparse_vector(psi, k, rng)?);
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn table(l: usize) -> ClusterTable {
        let mut t = ClusterTable::new();
        t.insert(ClusterDescriptor::with_sequential_nodes(1, 16, 8, 3, 2, 4, 10)).unwrap();
        t.insert(ClusterDescriptor::with_sequential_nodes(2, 16, 8, l, 3, 5, 20)).unwrap();
        t
    }

    #[test]
    fn generators_hit_requested_sparsity() {
        let mut rng = StdRng::seed_from_u64(3);
        let x = sparse_vector(32, 5, &mut rng);
        assert_eq!(x.iter().filter(|v| **v != 0.0).count(), 5);
        let cols = sparse_columns(16, 4, 2, &mut rng);
        assert_eq!(cols.shape(), (16, 4));
        let psi = SparsifyingTransform::dct(16);
        let v = transform_sparse_vector(&psi, 3, &mut rng).unwrap();
        let theta = psi.forward(v.as_slice()).unwrap();
        assert_eq!(theta.iter().filter(|t| t.abs() > 1e-9).count(), 3);
    }

    #[test]
    fn uncoded_packets_are_one_hot_rows() {
        let t = table(2);
        let cfg = EngineConfig::default();
        let head = ClusterHead::new(&t, 1, &cfg).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let frames = sparse_columns(16, 5, 3, &mut rng);
        let z = head.measure(&frames).unwrap();
        let pkts = head.emit(7, &frames, &mut rng).unwrap();
        assert_eq!(pkts.len(), 2);
        for (i, p) in pkts.iter().enumerate() {
            assert_eq!(p.sequence(), 7);
            assert_eq!(p.header.coeffs.len(), 5);
            assert_eq!(p.header.coeffs[3 + i], 1.0);
            assert_eq!(p.header.coeffs.iter().filter(|c| **c != 0.0).count(), 1);
            assert_eq!(p.payload, z.row(i).iter().copied().collect::<Vec<_>>());
        }
    }

    #[test]
    fn coded_packets_combine_own_rows() {
        let t = table(2);
        let cfg = EngineConfig {
            nc_enable: true,
            ..EngineConfig::default()
        };
        let head = ClusterHead::new(&t, 0, &cfg).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let frames = sparse_columns(16, 4, 3, &mut rng);
        let z = head.measure(&frames).unwrap();
        for p in head.emit(1, &frames, &mut rng).unwrap() {
            assert!(p.header.coeffs[3..].iter().all(|c| *c == 0.0));
            assert!(p.header.coeffs[..3].iter().all(|c| c.abs() == 1.0));
            let mix = DVector::from_column_slice(&p.header.coeffs[..3]);
            let expected = z.tr_mul(&mix);
            for (a, b) in p.payload.iter().zip(expected.iter()) {
                assert!((a - b).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn relay_keeps_payload_consistent_with_coefficients() {
        let t = table(2);
        let cfg = EngineConfig {
            nc_enable: true,
            ..EngineConfig::default()
        };
        let head = ClusterHead::new(&t, 0, &cfg).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        let frames = sparse_columns(16, 4, 3, &mut rng);
        let z = head.measure(&frames).unwrap();
        let coded = head.emit(1, &frames, &mut rng).unwrap();
        let relayed = NcRelay::new(NcCoeffKind::Normal).recombine(&coded, 4, &mut rng).unwrap();
        assert_eq!(relayed.len(), 4);
        for p in &relayed {
            assert_eq!(p.header.nc_count, 2);
            let mix = DVector::from_column_slice(&p.header.coeffs[..3]);
            let expected = z.tr_mul(&mix);
            for (a, b) in p.payload.iter().zip(expected.iter()) {
                assert!((a - b).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn relay_rejects_mixed_sequences() {
        let a = SinkPacket::new(1, 1, vec![1.0], vec![0.0]);
        let b = SinkPacket::new(1, 2, vec![1.0], vec![0.0]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(NcRelay::new(NcCoeffKind::Bernoulli).recombine(&[a, b], 1, &mut rng).is_err());
    }
}
