//! Cluster registrations and the row/node geometry derived from them.

use crate::error::{CsError, DimensionMismatch, Result};
use crate::linalg::Diagonal;
use crate::random::{RandomKind, RandomMatrix, RandomMatrixFactory};
use crate::wire::CLUSTER_HEAD_ID;

/// A sensor node feeding a cluster head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceNode {
    pub id: u8,
    /// Seed of the node's temporal sensing matrix `Φ_{jk}`.
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterDescriptor {
    pub id: u8,
    /// Samples per frame at each node.
    pub n: usize,
    /// Temporal measurements per node and frame.
    pub m: usize,
    /// Spatial measurements (packets) the cluster head emits per sequence.
    pub l: usize,
    /// Seed of the cluster-head spatial sensing matrix `Φ_k`.
    pub head_seed: u64,
    pub nodes: Vec<SourceNode>,
    /// Per-node participation; `false` masks the node out of `Φ_k`.
    pub precoding: Vec<bool>,
}

impl ClusterDescriptor {
    pub fn new(id: u8, n: usize, m: usize, l: usize, head_seed: u64, nodes: Vec<SourceNode>) -> Self {
        let precoding = vec![true; nodes.len()];
        Self {
            id,
            n,
            m,
            l,
            head_seed,
            nodes,
            precoding,
        }
    }

    /// `count` nodes with ids `1..=count` and seeds `first_seed + i`.
    pub fn with_sequential_nodes(
        id: u8,
        n: usize,
        m: usize,
        l: usize,
        head_seed: u64,
        count: usize,
        first_seed: u64,
    ) -> Self {
        let nodes = (0..count)
            .map(|i| SourceNode {
                id: (i + 1) as u8,
                seed: first_seed + i as u64,
            })
            .collect();
        Self::new(id, n, m, l, head_seed, nodes)
    }

    pub fn with_precoding(mut self, mask: Vec<bool>) -> Self {
        self.precoding = mask;
        self
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() || self.nodes.len() > u8::MAX as usize {
            return Err(CsError::Config(format!(
                "cluster {} must have between 1 and 255 nodes, has {}",
                self.id,
                self.nodes.len()
            )));
        }
        if self.m == 0 || self.m > self.n {
            return Err(CsError::Config(format!(
                "cluster {}: need 0 < m <= n, got m={} n={}",
                self.id, self.m, self.n
            )));
        }
        if self.l == 0 || self.l > self.nodes.len() {
            return Err(CsError::Config(format!(
                "cluster {}: need 0 < l <= nodes, got l={} nodes={}",
                self.id,
                self.l,
                self.nodes.len()
            )));
        }
        DimensionMismatch::check("precoding mask", self.nodes.len(), self.precoding.len())?;
        let mut ids: Vec<u8> = self.nodes.iter().map(|n| n.id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.nodes.len() || ids.contains(&CLUSTER_HEAD_ID) {
            return Err(CsError::Config(format!(
                "cluster {}: node ids must be unique and non-zero",
                self.id
            )));
        }
        Ok(())
    }

    /// `Φ_k` of shape `l × nodes`.
    pub fn spatial_matrix(&self, kind: RandomKind, normalize: bool) -> Result<RandomMatrix> {
        RandomMatrixFactory::build(self.head_seed, self.l, self.nodes.len(), kind, normalize)
    }

    /// `Φ_{jk}` of shape `m × n` for one of the cluster's nodes.
    pub fn temporal_matrix(&self, node: &SourceNode, kind: RandomKind, normalize: bool) -> Result<RandomMatrix> {
        RandomMatrixFactory::build(node.seed, self.m, self.n, kind, normalize)
    }

    /// `B_k`
    pub fn precoding_operator(&self) -> Diagonal {
        Diagonal::from_mask(&self.precoding)
    }

    pub fn node_index(&self, node_id: u8) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == node_id)
    }
}

/// Registered clusters in registration order with their offsets in the
/// stacked row space (`L = Σ l_k`) and node space (`N = Σ nodes_k`).
#[derive(Debug, Clone, Default)]
pub struct ClusterTable {
    clusters: Vec<ClusterDescriptor>,
    row_offsets: Vec<usize>,
    node_offsets: Vec<usize>,
}

impl ClusterTable {
    pub fn new() -> Self {
        Self {
            clusters: Vec::new(),
            row_offsets: vec![0],
            node_offsets: vec![0],
        }
    }

    /// Adds a cluster or replaces the one with the same id. All clusters must
    /// share the same temporal measurement count `m`.
    pub fn insert(&mut self, desc: ClusterDescriptor) -> Result<()> {
        desc.validate()?;
        if let Some(other) = self.clusters.iter().find(|c| c.id != desc.id) {
            if other.m != desc.m {
                return Err(CsError::SizeMismatch {
                    what: "cluster measurement length",
                    expected: other.m,
                    found: desc.m,
                });
            }
        }
        match self.clusters.iter().position(|c| c.id == desc.id) {
            Some(i) => self.clusters[i] = desc,
            None => self.clusters.push(desc),
        }
        self.rebuild_offsets();
        Ok(())
    }

    fn rebuild_offsets(&mut self) {
        self.row_offsets = vec![0];
        self.node_offsets = vec![0];
        for c in &self.clusters {
            self.row_offsets.push(self.row_offsets[self.row_offsets.len() - 1] + c.l);
            self.node_offsets.push(self.node_offsets[self.node_offsets.len() - 1] + c.nodes.len());
        }
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClusterDescriptor> {
        self.clusters.iter()
    }

    pub fn get(&self, idx: usize) -> &ClusterDescriptor {
        &self.clusters[idx]
    }

    pub fn index_of(&self, cluster_id: u8) -> Option<usize> {
        self.clusters.iter().position(|c| c.id == cluster_id)
    }

    /// `L`
    pub fn total_rows(&self) -> usize {
        self.row_offsets.last().copied().unwrap_or(0)
    }

    /// `N`
    pub fn total_nodes(&self) -> usize {
        self.node_offsets.last().copied().unwrap_or(0)
    }

    /// Common temporal measurement length `m`, if any cluster is registered.
    pub fn measurement_len(&self) -> Option<usize> {
        self.clusters.first().map(|c| c.m)
    }

    pub fn row_range(&self, idx: usize) -> (usize, usize) {
        (self.row_offsets[idx], self.row_offsets[idx + 1])
    }

    pub fn node_range(&self, idx: usize) -> (usize, usize) {
        (self.node_offsets[idx], self.node_offsets[idx + 1])
    }
}
