//! Handler matrix: picks the `(decrypt_rtp, decrypt_rtcp, encrypt_rtp,
//! encrypt_rtcp, kernel_descriptor_builder)` pair for a `(in_profile,
//! out_profile)` combination. Plain tagged-variant structs resolved by a
//! pure function rather than a 2-D array of function pointers, so the
//! resolution logic is testable without constructing any stream state.

use crate::crypto::KernelSrtpBlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Profile {
    Avp,
    Avpf,
    Savp,
    Savpf,
    UdpTlsSavp,
    UdpTlsSavpf,
    Udptl,
}

impl Profile {
    fn is_srtp(self) -> bool {
        matches!(
            self,
            Profile::Savp | Profile::Savpf | Profile::UdpTlsSavp | Profile::UdpTlsSavpf
        )
    }

    fn is_avpf(self) -> bool {
        matches!(self, Profile::Avpf | Profile::Savpf | Profile::UdpTlsSavpf)
    }

    fn is_rtp(self) -> bool {
        self != Profile::Udptl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpOp {
    Pass,
    Decrypt,
    Encrypt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcpOp {
    Pass,
    ParseOnly,
    Decrypt,
    Encrypt,
    AvpfStrip,
    DecryptThenAvpfStrip,
}

impl RtcpOp {
    fn supports_kernel(self) -> bool {
        !matches!(self, RtcpOp::AvpfStrip | RtcpOp::DecryptThenAvpfStrip)
    }
}

/// One side (ingress or egress) of a resolved matrix cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerOps {
    pub rtp: RtpOp,
    pub rtcp: RtcpOp,
}

impl HandlerOps {
    const NOOP: HandlerOps = HandlerOps {
        rtp: RtpOp::Pass,
        rtcp: RtcpOp::Pass,
    };

    /// Whether the kernel module could take over both directions' transform
    /// for this side. AVPF rewriting is userspace-only.
    pub fn supports_kernel(&self) -> bool {
        self.rtcp.supports_kernel()
    }

    /// Builds this side's kernel SRTP descriptor. `params` is `None` when
    /// this side has no SRTP context (plain RTP).
    pub fn kernel_block(&self, params: Option<&KernelSrtpBlock>) -> KernelSrtpBlock {
        if !self.supports_kernel() {
            return KernelSrtpBlock::null();
        }
        params.cloned().unwrap_or_else(KernelSrtpBlock::null)
    }
}

/// One resolved matrix cell: ops for the ingress side and ops for the
/// egress side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub in_ops: HandlerOps,
    pub out_ops: HandlerOps,
}

/// Whether the re-crypt matrix should be used instead of the base matrix:
/// DTLS on either side, call recording, or mismatched crypto parameters all
/// force a full decrypt/encrypt round trip instead of pass-through.
pub fn use_recrypt_matrix(dtls_either_side: bool, recording_enabled: bool, key_mismatch: bool) -> bool {
    dtls_either_side || recording_enabled || key_mismatch
}

/// Resolves the handler matrix cell for one packet direction.
///
/// `passthru` short-circuits to noop/noop regardless of the profiles.
/// Non-RTP protocols (UDPTL) always resolve to pure noop in both
/// directions.
pub fn resolve(in_profile: Profile, out_profile: Profile, passthru: bool, use_recrypt: bool) -> Cell {
    if passthru || !in_profile.is_rtp() || !out_profile.is_rtp() {
        return Cell {
            in_ops: HandlerOps::NOOP,
            out_ops: HandlerOps::NOOP,
        };
    }

    let in_crypto = in_profile.is_srtp();
    let out_crypto = out_profile.is_srtp();

    let mut in_rtp = match (in_crypto, out_crypto) {
        (true, true) => RtpOp::Pass,
        (true, false) => RtpOp::Decrypt,
        (false, _) => RtpOp::Pass,
    };
    let mut out_rtp = match (in_crypto, out_crypto) {
        (true, true) => RtpOp::Pass,
        (false, true) => RtpOp::Encrypt,
        (_, false) => RtpOp::Pass,
    };

    // Re-crypt matrix: SRTP<->SRTP cells lose their RTP pass-through.
    if use_recrypt && in_crypto && out_crypto {
        in_rtp = RtpOp::Decrypt;
        out_rtp = RtpOp::Encrypt;
    }

    let mut in_rtcp = if in_crypto { RtcpOp::Decrypt } else { RtcpOp::ParseOnly };
    let out_rtcp = if out_crypto { RtcpOp::Encrypt } else { RtcpOp::Pass };

    // AVPF->AVP rewriting happens on the ingress side only; there is no
    // AVP->AVPF direction.
    if in_profile.is_avpf() && !out_profile.is_avpf() {
        in_rtcp = if in_crypto {
            RtcpOp::DecryptThenAvpfStrip
        } else {
            RtcpOp::AvpfStrip
        };
    }

    Cell {
        in_ops: HandlerOps {
            rtp: in_rtp,
            rtcp: in_rtcp,
        },
        out_ops: HandlerOps {
            rtp: out_rtp,
            rtcp: out_rtcp,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udptl_resolves_to_pure_noop_both_directions() {
        let cell = resolve(Profile::Udptl, Profile::Udptl, false, false);
        assert_eq!(cell.in_ops, HandlerOps::NOOP);
        assert_eq!(cell.out_ops, HandlerOps::NOOP);
    }

    #[test]
    fn passthru_flag_forces_noop_regardless_of_profiles() {
        let cell = resolve(Profile::Savpf, Profile::UdpTlsSavpf, true, true);
        assert_eq!(cell.in_ops, HandlerOps::NOOP);
        assert_eq!(cell.out_ops, HandlerOps::NOOP);
    }

    #[test]
    fn savpf_to_avp_resolves_to_decrypt_avpf_strip_in_noop_out() {
        let cell = resolve(Profile::Savpf, Profile::Avp, false, false);
        assert_eq!(cell.in_ops.rtp, RtpOp::Decrypt);
        assert_eq!(cell.in_ops.rtcp, RtcpOp::DecryptThenAvpfStrip);
        assert_eq!(cell.out_ops, HandlerOps::NOOP);
    }

    #[test]
    fn base_matrix_passes_rtp_through_on_srtp_to_srtp() {
        let cell = resolve(Profile::Savp, Profile::Savp, false, false);
        assert_eq!(cell.in_ops.rtp, RtpOp::Pass);
        assert_eq!(cell.out_ops.rtp, RtpOp::Pass);
        assert_eq!(cell.in_ops.rtcp, RtcpOp::Decrypt);
        assert_eq!(cell.out_ops.rtcp, RtcpOp::Encrypt);
    }

    #[test]
    fn recrypt_matrix_forces_full_decrypt_encrypt_on_srtp_to_srtp() {
        // Any (in, out) pair both within the SRTP profile family must have
        // both RTP and RTCP transforms non-null under re-crypt.
        let cell = resolve(Profile::UdpTlsSavp, Profile::Savpf, false, true);
        assert_eq!(cell.in_ops.rtp, RtpOp::Decrypt);
        assert_eq!(cell.out_ops.rtp, RtpOp::Encrypt);
        assert_ne!(cell.in_ops.rtcp, RtcpOp::Pass);
        assert_ne!(cell.out_ops.rtcp, RtcpOp::Pass);
    }

    #[test]
    fn use_recrypt_matrix_true_when_dtls_recording_or_mismatch() {
        assert!(use_recrypt_matrix(true, false, false));
        assert!(use_recrypt_matrix(false, true, false));
        assert!(use_recrypt_matrix(false, false, true));
        assert!(!use_recrypt_matrix(false, false, false));
    }

    #[test]
    fn avpf_strip_cell_does_not_support_kernel_offload() {
        let cell = resolve(Profile::Savpf, Profile::Avp, false, false);
        assert!(!cell.in_ops.supports_kernel());
        assert!(cell.out_ops.supports_kernel());
    }
}
