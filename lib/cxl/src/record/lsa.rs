//! Label Storage Area transfer records (Get LSA 0x4102, Set LSA 0x4103).

use super::{CodecError, Record, le_accessors, wire_record};
use alloc::vec::Vec;
use utils::endian::LittleEndian32;

wire_record! {
    pub struct GetLsaIn {
        pub offset: LittleEndian32,
        pub length: LittleEndian32,
    } = 8;
}

le_accessors!(GetLsaIn {
    offset: u32,
    length: u32,
});

impl GetLsaIn {
    pub fn new(offset: u32, length: u32) -> GetLsaIn {
        GetLsaIn {
            offset: offset.into(),
            length: length.into(),
        }
    }
}

wire_record! {
    /// Fixed part of a Set LSA payload; the label data follows it.
    pub struct SetLsaHeader {
        pub offset: LittleEndian32,
        pub rsvd: [u8; 4],
    } = 8;
}

le_accessors!(SetLsaHeader { offset: u32 });

/// Build a Set LSA payload writing `data` at `offset`.
pub fn encode_set_lsa(offset: u32, data: &[u8]) -> Vec<u8> {
    let mut header = SetLsaHeader::zeroed();
    header.set_offset(offset);
    let mut out = Vec::with_capacity(SetLsaHeader::SIZE + data.len());
    header.encode_into(&mut out);
    out.extend_from_slice(data);
    out
}

/// Split a Set LSA payload. The wire format carries no length: the data is whatever
/// follows the header.
pub fn decode_set_lsa(payload: &[u8]) -> Result<(SetLsaHeader, &[u8]), CodecError> {
    let header = SetLsaHeader::decode(payload)?;
    Ok((header, &payload[SetLsaHeader::SIZE..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_lsa_layout() {
        let payload = encode_set_lsa(0x40, &[0xaa, 0xbb, 0xcc]);
        assert_eq!(payload, [0x40, 0, 0, 0, 0, 0, 0, 0, 0xaa, 0xbb, 0xcc]);
        let (header, data) = decode_set_lsa(&payload).unwrap();
        assert_eq!(header.offset(), 0x40);
        assert_eq!(data, &[0xaa, 0xbb, 0xcc]);
    }

    #[test]
    fn test_set_lsa_empty_data() {
        let (_, data) = decode_set_lsa(&[0; 8]).unwrap();
        assert!(data.is_empty());
        assert!(decode_set_lsa(&[0; 7]).is_err());
    }

    #[test]
    fn test_get_lsa_in() {
        let req = GetLsaIn::new(0x100, 0x80);
        assert_eq!(req.as_bytes(), &[0, 1, 0, 0, 0x80, 0, 0, 0]);
    }
}
