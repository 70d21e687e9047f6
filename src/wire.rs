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

//! # Packet Framing
//!
//! Byte layout of the packets a cluster head forwards to the sink.
//!
//! ```text
//! node header   : cluster_id u8 | node_id u8 | sequence u16 BE | data_size u16 BE
//! cluster header: node header (node_id = 0)
//!                 | K × 32-byte participation bitmaps
//!                 | nc_count u8
//!                 | L coefficients (f64 LE, or 2-bit packed)
//! payload       : m × f64 LE
//! ```
//!
//! `data_size` counts payload bytes. Node id `0` is the cluster head itself.

use crate::error::{CsError, Result};
use crate::nc::packing::{pack_ternary, packed_len, unpack_ternary};

pub const NODE_HEADER_LEN: usize = 6;
pub const BITMAP_LEN: usize = 32;
pub const CLUSTER_HEAD_ID: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub cluster_id: u8,
    pub node_id: u8,
    pub sequence: u16,
    pub data_size: u16,
}

impl NodeHeader {
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.push(self.cluster_id);
        buf.push(self.node_id);
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.data_size.to_be_bytes());
    }

    pub fn read(raw: &[u8]) -> Result<Self> {
        if raw.len() < NODE_HEADER_LEN {
            return Err(CsError::Wire(format!(
                "node header needs {} bytes, have {}",
                NODE_HEADER_LEN,
                raw.len()
            )));
        }
        Ok(Self {
            cluster_id: raw[0],
            node_id: raw[1],
            sequence: u16::from_be_bytes([raw[2], raw[3]]),
            data_size: u16::from_be_bytes([raw[4], raw[5]]),
        })
    }
}

/// How NC coefficients travel on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoeffEncoding {
    /// Little-endian `f64` per coefficient.
    Real,
    /// Two bits per coefficient, values in {0, +1, −1}.
    #[default]
    Ternary,
}

impl CoeffEncoding {
    pub fn encoded_len(&self, count: usize) -> usize {
        match self {
            CoeffEncoding::Real => count * 8,
            CoeffEncoding::Ternary => packed_len(count),
        }
    }
}

/// Sizes a receiver must know to split a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireGeometry {
    /// Number of clusters `K` (one participation bitmap each).
    pub clusters: usize,
    /// NC coefficient count `L`.
    pub total_rows: usize,
    /// Payload length `m`.
    pub payload_len: usize,
    pub encoding: CoeffEncoding,
}

impl WireGeometry {
    pub fn packet_len(&self) -> usize {
        NODE_HEADER_LEN
            + self.clusters * BITMAP_LEN
            + 1
            + self.encoding.encoded_len(self.total_rows)
            + self.payload_len * 8
    }
}

/// Bitmap with bit `id` set (LSB-first within each byte) for each listed node.
pub fn participation_bitmap(ids: impl IntoIterator<Item = u8>) -> [u8; BITMAP_LEN] {
    let mut map = [0u8; BITMAP_LEN];
    for id in ids {
        map[id as usize / 8] |= 1 << (id % 8);
    }
    map
}

pub fn is_participating(map: &[u8; BITMAP_LEN], id: u8) -> bool {
    map[id as usize / 8] & (1 << (id % 8)) != 0
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterHeader {
    pub node: NodeHeader,
    pub participation: Vec<[u8; BITMAP_LEN]>,
    /// Number of recombinations the packet went through.
    pub nc_count: u8,
    pub coeffs: Vec<f64>,
}

/// One packet as it arrives at the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkPacket {
    pub header: ClusterHeader,
    pub payload: Vec<f64>,
}

impl SinkPacket {
    pub fn new(cluster_id: u8, sequence: u16, coeffs: Vec<f64>, payload: Vec<f64>) -> Self {
        Self {
            header: ClusterHeader {
                node: NodeHeader {
                    cluster_id,
                    node_id: CLUSTER_HEAD_ID,
                    sequence,
                    data_size: saturating_data_size(payload.len()),
                },
                participation: Vec::new(),
                nc_count: 0,
                coeffs,
            },
            payload,
        }
    }

    pub fn cluster_id(&self) -> u8 {
        self.header.node.cluster_id
    }

    pub fn sequence(&self) -> u16 {
        self.header.node.sequence
    }

    /// Serialises the packet; bitmaps missing from `participation` are sent
    /// as all-zero.
    pub fn encode(&self, geom: &WireGeometry) -> Result<Vec<u8>> {
        if self.header.coeffs.len() != geom.total_rows {
            return Err(CsError::Wire(format!(
                "expected {} coefficients, have {}",
                geom.total_rows,
                self.header.coeffs.len()
            )));
        }
        if self.header.participation.len() > geom.clusters {
            return Err(CsError::Wire(format!(
                "{} participation bitmaps for {} clusters",
                self.header.participation.len(),
                geom.clusters
            )));
        }
        let data_size = u16::try_from(self.payload.len() * 8)
            .map_err(|_| CsError::Wire("payload exceeds 65535 bytes".into()))?;

        let mut buf = Vec::with_capacity(geom.packet_len());
        NodeHeader {
            data_size,
            ..self.header.node
        }
        .write(&mut buf);
        for k in 0..geom.clusters {
            match self.header.participation.get(k) {
                Some(map) => buf.extend_from_slice(map),
                None => buf.extend_from_slice(&[0u8; BITMAP_LEN]),
            }
        }
        buf.push(self.header.nc_count);
        match geom.encoding {
            CoeffEncoding::Real => {
                for c in &self.header.coeffs {
                    buf.extend_from_slice(&c.to_le_bytes());
                }
            }
            CoeffEncoding::Ternary => buf.extend_from_slice(&pack_ternary(&self.header.coeffs)?),
        }
        for v in &self.payload {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Ok(buf)
    }

    pub fn decode(raw: &[u8], geom: &WireGeometry) -> Result<Self> {
        let node = NodeHeader::read(raw)?;
        if node.node_id != CLUSTER_HEAD_ID {
            return Err(CsError::Wire(format!(
                "node id {} in a cluster-head packet (expected {})",
                node.node_id, CLUSTER_HEAD_ID
            )));
        }
        let data_size = node.data_size as usize;
        if data_size % 8 != 0 {
            return Err(CsError::Wire(format!("data size {} is not a multiple of 8", data_size)));
        }
        let coeff_bytes = geom.encoding.encoded_len(geom.total_rows);
        let expected = NODE_HEADER_LEN + geom.clusters * BITMAP_LEN + 1 + coeff_bytes + data_size;
        if raw.len() != expected {
            return Err(CsError::Wire(format!(
                "packet length {} does not match header ({} expected)",
                raw.len(),
                expected
            )));
        }

        let mut offset = NODE_HEADER_LEN;
        let mut participation = Vec::with_capacity(geom.clusters);
        for _ in 0..geom.clusters {
            let mut map = [0u8; BITMAP_LEN];
            map.copy_from_slice(&raw[offset..offset + BITMAP_LEN]);
            participation.push(map);
            offset += BITMAP_LEN;
        }
        let nc_count = raw[offset];
        offset += 1;

        let coeffs = match geom.encoding {
            CoeffEncoding::Real => read_f64s(&raw[offset..offset + coeff_bytes]),
            CoeffEncoding::Ternary => unpack_ternary(&raw[offset..offset + coeff_bytes], geom.total_rows)?,
        };
        offset += coeff_bytes;
        let payload = read_f64s(&raw[offset..offset + data_size]);

        Ok(Self {
            header: ClusterHeader {
                node,
                participation,
                nc_count,
                coeffs,
            },
            payload,
        })
    }
}

/// Byte size of an `f64` payload of `len` values, clamped to `u16::MAX`.
/// A clamped size never matches a valid geometry, so the packet is rejected
/// downstream instead of wrapping to a small size.
pub fn saturating_data_size(len: usize) -> u16 {
    u16::try_from(len.saturating_mul(8)).unwrap_or(u16::MAX)
}

fn read_f64s(raw: &[u8]) -> Vec<f64> {
    raw.chunks_exact(8)
        .map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            f64::from_le_bytes(b)
        })
        .collect()
}
