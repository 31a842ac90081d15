//! Minimal RTCP compound-header access: enough to pull the SSRC of the
//! first sub-packet for the ingress/egress SSRC bookkeeping in
//! `relay-core`'s pipeline. Full compound rewriting (AVPF->AVP,
//! SAVP<->AVP) stays behind the `RtcpRewriter` collaborator contract in
//! `relay-core`.

use rtcp_types::Compound;

#[derive(Debug, thiserror::Error)]
#[error("malformed RTCP compound packet")]
pub struct RtcpParseError;

#[derive(Debug, Clone, Copy)]
pub struct RtcpHeader {
    pub ssrc: u32,
}

impl RtcpHeader {
    pub fn parse(data: &[u8]) -> Result<Self, RtcpParseError> {
        let compound = Compound::parse(data).map_err(|_| RtcpParseError)?;

        let first = compound.into_iter().next().ok_or(RtcpParseError)?;
        let packet = first.map_err(|_| RtcpParseError)?;

        Ok(RtcpHeader {
            ssrc: packet.ssrc(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_truncated_packet() {
        assert!(RtcpHeader::parse(&[0x80]).is_err());
    }
}
