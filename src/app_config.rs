use crate::engine::{ClusterDescriptor, ClusterTable, EngineConfig};
use crate::error::{CsError, Result};
use crate::sim::{SignalModel, SimulationConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// One `[[clusters]]` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    pub id: u8,
    pub n: usize,
    pub m: usize,
    pub l: usize,
    pub nodes: usize,
    /// Cluster-head seed; node `j` (1-based) uses `seed + j`.
    pub seed: u64,
    pub precoding: Option<Vec<bool>>,
}

impl ClusterConfig {
    pub fn descriptor(&self) -> ClusterDescriptor {
        let desc = ClusterDescriptor::with_sequential_nodes(
            self.id,
            self.n,
            self.m,
            self.l,
            self.seed,
            self.nodes,
            self.seed + 1,
        );
        match &self.precoding {
            Some(mask) => desc.with_precoding(mask.clone()),
            None => desc,
        }
    }
}

/// Unified configuration structure parsed from a TOML file.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub reconstruction: EngineConfig,
    pub clusters: Vec<ClusterConfig>,
    pub simulation: SimulationConfig,
}

impl AppConfig {
    /// Load configuration from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Root {
            #[serde(default)]
            clusters: Vec<RawCluster>,
            simulation: Option<RawSimulation>,
        }

        #[derive(Deserialize)]
        struct RawCluster {
            id: u8,
            n: usize,
            m: usize,
            l: usize,
            nodes: usize,
            seed: Option<u64>,
            precoding: Option<Vec<bool>>,
        }

        #[derive(Deserialize)]
        struct RawSimulation {
            sparsity: Option<usize>,
            active_nodes: Option<usize>,
            sequences: Option<usize>,
            first_sequence: Option<u16>,
            loss_probability: Option<f64>,
            packet_gap_ms: Option<u64>,
            relay_hops: Option<usize>,
            signal_model: Option<String>,
            seed: Option<u64>,
        }

        let reconstruction = EngineConfig::from_toml(s)?;
        let root: Root = toml::from_str(s)?;

        let clusters = root
            .clusters
            .into_iter()
            .map(|c| ClusterConfig {
                id: c.id,
                n: c.n,
                m: c.m,
                l: c.l,
                nodes: c.nodes,
                seed: c.seed.unwrap_or(c.id as u64 * 1000 + 1),
                precoding: c.precoding,
            })
            .collect();

        let d = SimulationConfig::default();
        let simulation = match root.simulation {
            Some(raw) => SimulationConfig {
                sparsity: raw.sparsity.unwrap_or(d.sparsity),
                active_nodes: raw.active_nodes.unwrap_or(d.active_nodes),
                sequences: raw.sequences.unwrap_or(d.sequences),
                first_sequence: raw.first_sequence.unwrap_or(d.first_sequence),
                loss_probability: raw.loss_probability.unwrap_or(d.loss_probability),
                packet_gap: raw.packet_gap_ms.map(Duration::from_millis).unwrap_or(d.packet_gap),
                relay_hops: raw.relay_hops.unwrap_or(d.relay_hops),
                signal_model: match raw.signal_model {
                    Some(s) => s.parse::<SignalModel>()?,
                    None => d.signal_model,
                },
                seed: raw.seed.unwrap_or(d.seed),
            },
            None => d,
        };

        let cfg = Self {
            reconstruction,
            clusters,
            simulation,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Validate all sub-configurations.
    pub fn validate(&self) -> Result<()> {
        self.reconstruction.validate()?;
        self.simulation.validate()?;
        self.cluster_table()?;
        Ok(())
    }

    /// Validated cluster table in declaration order.
    pub fn cluster_table(&self) -> Result<ClusterTable> {
        let mut table = ClusterTable::new();
        for c in &self.clusters {
            if table.index_of(c.id).is_some() {
                return Err(CsError::Config(format!("cluster {} declared twice", c.id)));
            }
            table.insert(c.descriptor())?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::SolverKind;

    const SAMPLE: &str = r#"
        [reconstruction]
        solver_temp = "sp"
        calc_snr = true

        [[clusters]]
        id = 1
        n = 64
        m = 32
        l = 8
        nodes = 12

        [[clusters]]
        id = 2
        n = 64
        m = 32
        l = 4
        nodes = 4
        seed = 99
        precoding = [true, false, true, true]

        [simulation]
        sparsity = 3
        loss_probability = 0.1
        packet_gap_ms = 5
        signal_model = "transform_sparse"
    "#;

    #[test]
    fn parses_all_sections() {
        let cfg = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(cfg.reconstruction.solver_temp, SolverKind::Sp);
        assert!(cfg.reconstruction.calc_snr);
        assert_eq!(cfg.clusters.len(), 2);
        assert_eq!(cfg.clusters[0].seed, 1001);
        assert_eq!(cfg.simulation.sparsity, 3);
        assert_eq!(cfg.simulation.packet_gap, Duration::from_millis(5));
        assert_eq!(cfg.simulation.signal_model, SignalModel::TransformSparse);

        let table = cfg.cluster_table().unwrap();
        assert_eq!(table.total_rows(), 12);
        assert_eq!(table.total_nodes(), 16);
        assert_eq!(table.get(1).precoding, vec![true, false, true, true]);
        assert_eq!(table.get(1).nodes[0].seed, 100);
    }

    #[test]
    fn rejects_duplicate_clusters() {
        let toml = r#"
            [[clusters]]
            id = 1
            n = 16
            m = 8
            l = 2
            nodes = 4
            [[clusters]]
            id = 1
            n = 16
            m = 8
            l = 2
            nodes = 4
        "#;
        assert!(matches!(AppConfig::from_toml(toml), Err(CsError::Config(_))));
    }

    #[test]
    fn bad_precoding_length_is_rejected() {
        let toml = r#"
            [[clusters]]
            id = 1
            n = 16
            m = 8
            l = 2
            nodes = 4
            precoding = [true]
        "#;
        assert!(AppConfig::from_toml(toml).is_err());
    }
}
