//! RTP header access: an owned wrapper around `rtp_types`, where
//! `RtpPacket::parse` validates once and accessors borrow from there.

use rtp_types::RtpPacket as RawRtpPacket;

#[derive(Debug, thiserror::Error)]
#[error("malformed RTP packet")]
pub struct RtpParseError;

/// Borrowed view over an RTP packet's fixed header fields, with padding
/// already stripped from the payload.
#[derive(Debug, Clone, Copy)]
pub struct RtpHeader<'a> {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: &'a [u8],
}

impl<'a> RtpHeader<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, RtpParseError> {
        let raw = RawRtpPacket::parse(data).map_err(|_| RtpParseError)?;

        let payload_offset = raw.payload_offset();
        let payload_len = raw.payload_len();

        Ok(RtpHeader {
            marker: raw.marker_bit(),
            payload_type: raw.payload_type(),
            sequence_number: raw.sequence_number(),
            timestamp: raw.timestamp(),
            ssrc: raw.ssrc(),
            payload: &data[payload_offset..payload_offset + payload_len],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtp_types::RtpPacketBuilder;

    #[test]
    fn parses_ssrc_and_payload_type() {
        let payload = [1u8, 2, 3, 4];
        let built = RtpPacketBuilder::new()
            .payload_type(8)
            .sequence_number(42)
            .timestamp(1000)
            .ssrc(0xdead_beef)
            .payload(&payload[..])
            .write_vec()
            .unwrap();

        let header = RtpHeader::parse(&built).unwrap();
        assert_eq!(header.ssrc, 0xdead_beef);
        assert_eq!(header.payload_type, 8);
        assert_eq!(header.sequence_number, 42);
        assert_eq!(header.payload, &payload[..]);
    }

    #[test]
    fn rejects_truncated_packet() {
        assert!(RtpHeader::parse(&[0x80]).is_err());
    }
}
