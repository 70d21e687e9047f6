use csnet::engine::IncomingPacket;
use csnet::error::CsError;
use csnet::nc::packing::{pack_ternary, to_hex, unpack_ternary};
use csnet::wire::{is_participating, participation_bitmap, CoeffEncoding, SinkPacket, WireGeometry, NODE_HEADER_LEN};

const COEFFS: [f64; 16] = [
    0.0, 1.0, -1.0, 0.0, 1.0, 1.0, -1.0, -1.0, 0.0, 0.0, 0.0, 1.0, -1.0, 1.0, 0.0, -1.0,
];

#[test]
fn sixteen_coefficients_pack_into_four_bytes() {
    let packed = pack_ternary(&COEFFS).unwrap();
    assert_eq!(packed, vec![0x24, 0xa5, 0x40, 0x86]);
    assert_eq!(to_hex(&packed), "24a54086");

    let values = unpack_ternary(&packed, COEFFS.len()).unwrap();
    assert_eq!(values, COEFFS.to_vec());
    assert_eq!(pack_ternary(&values).unwrap(), packed);
}

#[test]
fn reserved_pair_is_a_hard_error() {
    let mut packed = pack_ternary(&COEFFS).unwrap();
    packed[2] |= 0b0000_1100;
    assert!(matches!(
        unpack_ternary(&packed, COEFFS.len()),
        Err(CsError::InvalidCoefficient { index: 9, bits: 0b11 })
    ));
}

fn geometry(encoding: CoeffEncoding) -> WireGeometry {
    WireGeometry {
        clusters: 2,
        total_rows: 16,
        payload_len: 3,
        encoding,
    }
}

#[test]
fn ternary_packet_survives_the_wire() {
    let geom = geometry(CoeffEncoding::Ternary);
    let mut pkt = SinkPacket::new(4, 0xfffe, COEFFS.to_vec(), vec![1.5, -2.25, 1e-3]);
    pkt.header.participation = vec![participation_bitmap([1, 2, 200]), [0u8; 32]];
    pkt.header.nc_count = 3;

    let raw = pkt.encode(&geom).unwrap();
    assert_eq!(raw.len(), geom.packet_len());
    assert_eq!(raw.len(), NODE_HEADER_LEN + 64 + 1 + 4 + 24);
    // big-endian sequence and data size
    assert_eq!(&raw[2..6], &[0xffu8, 0xfe, 0x00, 24]);

    let back = SinkPacket::decode(&raw, &geom).unwrap();
    assert_eq!(back, pkt);
    assert!(is_participating(&back.header.participation[0], 200));
    assert!(!is_participating(&back.header.participation[0], 3));

    let incoming = IncomingPacket::from(back);
    assert_eq!(incoming.cluster_id, 4);
    assert_eq!(incoming.sequence, 0xfffe);
    assert_eq!(incoming.data_size, 24);
    assert_eq!(incoming.coeffs, COEFFS.to_vec());
}

#[test]
fn real_coefficients_are_little_endian_doubles() {
    let geom = geometry(CoeffEncoding::Real);
    let coeffs: Vec<f64> = (0..16).map(|i| i as f64 * 0.37 - 2.0).collect();
    let mut pkt = SinkPacket::new(1, 7, coeffs.clone(), vec![0.0, 1.0, 2.0]);
    pkt.header.participation = vec![[0u8; 32], [0u8; 32]];
    let raw = pkt.encode(&geom).unwrap();
    let off = NODE_HEADER_LEN + 64 + 1;
    assert_eq!(&raw[off..off + 8], &coeffs[0].to_le_bytes());
    assert_eq!(SinkPacket::decode(&raw, &geom).unwrap(), pkt);
}

#[test]
fn malformed_packets_are_rejected() {
    let geom = geometry(CoeffEncoding::Ternary);
    let pkt = SinkPacket::new(1, 1, COEFFS.to_vec(), vec![0.0; 3]);
    let raw = pkt.encode(&geom).unwrap();
    assert!(matches!(SinkPacket::decode(&raw[..raw.len() - 1], &geom), Err(CsError::Wire(_))));
    assert!(matches!(SinkPacket::decode(&raw[..4], &geom), Err(CsError::Wire(_))));

    let short = SinkPacket::new(1, 1, vec![0.0; 3], vec![0.0; 3]);
    assert!(short.encode(&geom).is_err());
    let fractional = SinkPacket::new(1, 1, vec![0.5; 16], vec![0.0; 3]);
    assert!(fractional.encode(&geom).is_err());
}
