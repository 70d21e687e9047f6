//! # Output Streams
//!
//! Everything the engine produces is appended to an [`OutputStreams`] set
//! shared with whoever drains it:
//!
//! * named matrix streams, one matrix per reconstructed sequence:
//!   `cluster<k>/spatial` (`nodes_k × m`), `node<k>.<j>/recon` (`n × 1`) and
//!   `node<k>.<j>/snr` (`1 × 1` in dB, or the reconstruction itself when no
//!   reference signal is attached);
//! * one [`SolveRecord`] per solver invocation;
//! * one [`FailureRecord`] per failed solve or failed sequence;
//! * the dropped-packet trace.
//!
//! SNR values use two sentinels: [`SNR_EXACT_DB`] for an exact
//! reconstruction and [`SNR_UNDEFINED_DB`] for a zero reference with a
//! non-zero error. Failed solves are filled with zero or `NaN`; `NaN`
//! serialises to JSON `null`.

use crate::error::{DropCause, Result};
use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// SNR written when `‖x₀ − x_r‖ = 0`.
pub const SNR_EXACT_DB: f64 = f64::MAX;
/// SNR written when `‖x₀‖ = 0` but `‖x₀ − x_r‖ > 0`.
pub const SNR_UNDEFINED_DB: f64 = f64::MIN;

/// `20·log10(‖x₀‖ / ‖x₀ − x_r‖)` in dB.
pub fn snr_db(reference: &DVector<f64>, reconstructed: &DVector<f64>) -> f64 {
    let err = (reference - reconstructed).norm();
    let sig = reference.norm();
    if err == 0.0 {
        SNR_EXACT_DB
    } else if sig == 0.0 {
        SNR_UNDEFINED_DB
    } else {
        20.0 * (sig / err).log10()
    }
}

pub fn spatial_stream(cluster_id: u8) -> String {
    format!("cluster{}/spatial", cluster_id)
}

pub fn recon_stream(cluster_id: u8, node_id: u8) -> String {
    format!("node{}.{}/recon", cluster_id, node_id)
}

pub fn snr_stream(cluster_id: u8, node_id: u8) -> String {
    format!("node{}.{}/snr", cluster_id, node_id)
}

/// One matrix of a named stream, stored column-major.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixRecord {
    pub sequence: u16,
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl MatrixRecord {
    pub fn from_matrix(sequence: u16, m: &DMatrix<f64>) -> Self {
        Self {
            sequence,
            rows: m.nrows(),
            cols: m.ncols(),
            data: m.as_slice().to_vec(),
        }
    }

    pub fn from_vector(sequence: u16, v: &DVector<f64>) -> Self {
        Self {
            sequence,
            rows: v.len(),
            cols: 1,
            data: v.as_slice().to_vec(),
        }
    }

    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_column_slice(self.rows, self.cols, &self.data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Spatial,
    Temporal,
    /// Whole-sequence failures (operator construction).
    Sequence,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SolveRecord {
    pub stage: Stage,
    /// `cluster<k>` column index for stage 1, `node<k>.<j>` for stage 2.
    pub target: String,
    pub sequence: u16,
    pub elapsed_ms: f64,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub stage: Stage,
    pub target: String,
    pub sequence: u16,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropRecord {
    pub cause: DropCause,
    pub code: i32,
    pub cluster: u8,
    pub sequence: u16,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputStreams {
    pub run_id: String,
    pub matrices: BTreeMap<String, Vec<MatrixRecord>>,
    pub solves: Vec<SolveRecord>,
    pub failures: Vec<FailureRecord>,
    pub drops: Vec<DropRecord>,
}

pub type SharedStreams = Arc<Mutex<OutputStreams>>;

impl OutputStreams {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Default::default()
        }
    }

    pub fn shared(run_id: impl Into<String>) -> SharedStreams {
        Arc::new(Mutex::new(Self::new(run_id)))
    }

    pub fn push_matrix(&mut self, name: String, record: MatrixRecord) {
        self.matrices.entry(name).or_default().push(record);
    }

    pub fn stream(&self, name: &str) -> &[MatrixRecord] {
        self.matrices.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn latest(&self, name: &str) -> Option<&MatrixRecord> {
        self.stream(name).last()
    }

    pub fn record_drop(&mut self, cause: DropCause, cluster: u8, sequence: u16) {
        self.drops.push(DropRecord {
            cause,
            code: cause.code(),
            cluster,
            sequence,
        });
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Locks a shared stream set; a poisoned lock still yields the data.
pub fn lock(streams: &SharedStreams) -> MutexGuard<'_, OutputStreams> {
    streams.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snr_sentinels() {
        let x = DVector::from_vec(vec![1.0, 2.0]);
        assert_eq!(snr_db(&x, &x), SNR_EXACT_DB);
        let zero = DVector::zeros(2);
        assert_eq!(snr_db(&zero, &x), SNR_UNDEFINED_DB);
        let noisy = DVector::from_vec(vec![1.1, 2.0]);
        let expected = 20.0 * (5f64.sqrt() / 0.1).log10();
        assert!((snr_db(&x, &noisy) - expected).abs() < 1e-9);
    }

    #[test]
    fn matrix_records_round_trip() {
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let r = MatrixRecord::from_matrix(4, &m);
        assert_eq!(r.data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(r.to_matrix(), m);
    }

    #[test]
    fn streams_serialise_to_json() {
        let mut s = OutputStreams::new("run-1");
        s.push_matrix(spatial_stream(2), MatrixRecord::from_vector(1, &DVector::from_vec(vec![f64::NAN])));
        s.record_drop(DropCause::UnknownCluster, 9, 1);
        let json = s.to_json().unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["run_id"], "run-1");
        assert_eq!(v["drops"][0]["code"], -1);
        assert!(v["matrices"]["cluster2/spatial"][0]["data"][0].is_null());
        assert_eq!(s.stream("missing").len(), 0);
    }
}
