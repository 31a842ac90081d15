//! SRTP/SRTCP protect & unprotect. Key derivation (DTLS-SRTP/SDES
//! negotiation) stays out of scope as an external collaborator; by the time
//! a [`CryptoContext`] exists here the keys are already known. Built
//! directly on the real `srtp` crate
//! (`srtp::Session::with_inbound_template` / `with_outbound_template`,
//! `srtp::StreamPolicy`, `srtp::CryptoPolicy`).

use srtp::CryptoPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
    Null,
    AesCm128,
    AesCm192,
    AesCm256,
    AesGcm128,
    AesGcm256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hmac {
    Null,
    Sha1_80,
    Sha1_32,
}

/// Negotiated SRTP parameters for one direction, as handed down by the
/// (out-of-scope) SDES/DTLS key exchange.
#[derive(Debug, Clone)]
pub struct CryptoParams {
    pub cipher: Cipher,
    pub hmac: Hmac,
    pub master_key: Vec<u8>,
    pub master_salt: Vec<u8>,
    pub mki: u32,
    pub mki_len: u8,
    /// Forces `cipher = Null` for the kernel descriptor.
    pub unencrypted_srtp: bool,
    /// Forces `auth_tag_len = 0` for the kernel descriptor.
    pub unauthenticated_srtp: bool,
}

impl CryptoParams {
    fn effective_cipher(&self) -> Cipher {
        if self.unencrypted_srtp {
            Cipher::Null
        } else {
            self.cipher
        }
    }

    fn policy(&self) -> Option<CryptoPolicy> {
        match self.effective_cipher() {
            Cipher::Null => None,
            Cipher::AesCm128 => Some(match self.hmac {
                Hmac::Sha1_32 => CryptoPolicy::aes_cm_128_hmac_sha1_32(),
                _ => CryptoPolicy::aes_cm_128_hmac_sha1_80(),
            }),
            Cipher::AesCm192 => Some(match self.hmac {
                Hmac::Sha1_32 => CryptoPolicy::aes_cm_192_hmac_sha1_32(),
                _ => CryptoPolicy::aes_cm_192_hmac_sha1_80(),
            }),
            Cipher::AesCm256 => Some(match self.hmac {
                Hmac::Sha1_32 => CryptoPolicy::aes_cm_256_hmac_sha1_32(),
                _ => CryptoPolicy::aes_cm_256_hmac_sha1_80(),
            }),
            Cipher::AesGcm128 => Some(CryptoPolicy::aes_gcm_128_16_auth()),
            Cipher::AesGcm256 => Some(CryptoPolicy::aes_gcm_256_16_auth()),
        }
    }
}

/// The `{cipher, hmac, mki, mki_len, master_key, master_salt,
/// session_key_len, auth_tag_len, last_index}` block emitted for one
/// direction of a kernelized stream.
#[derive(Debug, Clone)]
pub struct KernelSrtpBlock {
    pub cipher: Cipher,
    pub hmac: Hmac,
    pub mki: u32,
    pub mki_len: u8,
    pub master_key: Vec<u8>,
    pub master_salt: Vec<u8>,
    pub session_key_len: usize,
    pub auth_tag_len: usize,
    pub last_index: u64,
}

impl KernelSrtpBlock {
    /// The all-null block used by the matrix's null kernel-descriptor
    /// builder.
    pub fn null() -> Self {
        KernelSrtpBlock {
            cipher: Cipher::Null,
            hmac: Hmac::Null,
            mki: 0,
            mki_len: 0,
            master_key: Vec::new(),
            master_salt: Vec::new(),
            session_key_len: 0,
            auth_tag_len: 0,
            last_index: 0,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.cipher != Cipher::Null && self.hmac != Hmac::Null
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformOutcome {
    Ok,
    /// SRTP rollover/index changed and should be checkpointed; never blocks
    /// the packet.
    OkPersist,
    Error,
}

/// One direction's SRTP/SRTCP crypto state. `None` inner session means a
/// plain (non-SRTP) passthrough context.
pub struct CryptoContext {
    params: CryptoParams,
    session: Option<srtp::Session>,
    last_index: u64,
}

impl CryptoContext {
    pub fn plain() -> Self {
        CryptoContext {
            params: CryptoParams {
                cipher: Cipher::Null,
                hmac: Hmac::Null,
                master_key: Vec::new(),
                master_salt: Vec::new(),
                mki: 0,
                mki_len: 0,
                unencrypted_srtp: true,
                unauthenticated_srtp: true,
            },
            session: None,
            last_index: 0,
        }
    }

    pub fn inbound(params: CryptoParams) -> Self {
        let session = params.policy().map(|policy| {
            srtp::Session::with_inbound_template(srtp::StreamPolicy {
                rtp: policy,
                rtcp: policy,
                key: &Self::key_and_salt(&params),
                ..Default::default()
            })
            .expect("srtp inbound session parameters must be valid")
        });

        CryptoContext {
            params,
            session,
            last_index: 0,
        }
    }

    pub fn outbound(params: CryptoParams) -> Self {
        let session = params.policy().map(|policy| {
            srtp::Session::with_outbound_template(srtp::StreamPolicy {
                rtp: policy,
                rtcp: policy,
                key: &Self::key_and_salt(&params),
                ..Default::default()
            })
            .expect("srtp outbound session parameters must be valid")
        });

        CryptoContext {
            params,
            session,
            last_index: 0,
        }
    }

    fn key_and_salt(params: &CryptoParams) -> Vec<u8> {
        let mut key = params.master_key.clone();
        key.extend_from_slice(&params.master_salt);
        key
    }

    pub fn is_passthrough(&self) -> bool {
        self.session.is_none()
    }

    pub fn protect_rtp(&mut self, packet: &mut Vec<u8>) -> TransformOutcome {
        let Some(session) = &mut self.session else {
            return TransformOutcome::Ok;
        };

        match session.protect(packet) {
            Ok(()) => {
                self.last_index += 1;
                TransformOutcome::OkPersist
            }
            Err(_) => TransformOutcome::Error,
        }
    }

    pub fn unprotect_rtp(&mut self, packet: &mut Vec<u8>) -> TransformOutcome {
        let Some(session) = &mut self.session else {
            return TransformOutcome::Ok;
        };

        match session.unprotect(packet) {
            Ok(()) => {
                self.last_index += 1;
                TransformOutcome::OkPersist
            }
            Err(_) => TransformOutcome::Error,
        }
    }

    pub fn protect_rtcp(&mut self, packet: &mut Vec<u8>) -> TransformOutcome {
        let Some(session) = &mut self.session else {
            return TransformOutcome::Ok;
        };

        match session.protect_rtcp(packet) {
            Ok(()) => TransformOutcome::OkPersist,
            Err(_) => TransformOutcome::Error,
        }
    }

    pub fn unprotect_rtcp(&mut self, packet: &mut Vec<u8>) -> TransformOutcome {
        let Some(session) = &mut self.session else {
            return TransformOutcome::Ok;
        };

        match session.unprotect_rtcp(packet) {
            Ok(()) => TransformOutcome::OkPersist,
            Err(_) => TransformOutcome::Error,
        }
    }

    /// Builds the kernel descriptor block for this direction, honoring
    /// `unencrypted_srtp`/`unauthenticated_srtp` overrides.
    pub fn kernel_block(&self) -> KernelSrtpBlock {
        if self.session.is_none() {
            return KernelSrtpBlock::null();
        }

        let cipher = self.params.effective_cipher();
        let session_key_len = self.params.policy().map(|p| p.key_len()).unwrap_or(0);
        let auth_tag_len = if self.params.unauthenticated_srtp {
            0
        } else {
            match self.params.hmac {
                Hmac::Sha1_80 => 10,
                Hmac::Sha1_32 => 4,
                Hmac::Null => 0,
            }
        };

        KernelSrtpBlock {
            cipher,
            hmac: if self.params.unauthenticated_srtp {
                Hmac::Null
            } else {
                self.params.hmac
            },
            mki: self.params.mki,
            mki_len: self.params.mki_len,
            master_key: self.params.master_key.clone(),
            master_salt: self.params.master_salt.clone(),
            session_key_len,
            auth_tag_len,
            last_index: self.last_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aes128_params(key_byte: u8) -> CryptoParams {
        CryptoParams {
            cipher: Cipher::AesCm128,
            hmac: Hmac::Sha1_80,
            master_key: vec![key_byte; 16],
            master_salt: vec![key_byte; 14],
            mki: 0,
            mki_len: 0,
            unencrypted_srtp: false,
            unauthenticated_srtp: false,
        }
    }

    #[test]
    fn protect_then_unprotect_round_trips_rtp_payload() {
        let mut out = CryptoContext::outbound(aes128_params(0x42));
        let mut inb = CryptoContext::inbound(aes128_params(0x42));

        let mut packet = relay_rtp::rtp_types::RtpPacketBuilder::new()
            .payload_type(0)
            .sequence_number(1)
            .timestamp(0)
            .ssrc(1234)
            .payload(&b"hello world"[..])
            .write_vec()
            .unwrap();
        let original = packet.clone();

        assert_eq!(out.protect_rtp(&mut packet), TransformOutcome::OkPersist);
        assert_ne!(packet, original);

        assert_eq!(inb.unprotect_rtp(&mut packet), TransformOutcome::OkPersist);
        assert_eq!(packet, original);
    }

    #[test]
    fn unencrypted_srtp_forces_null_cipher_in_kernel_block() {
        let mut params = aes128_params(1);
        params.unencrypted_srtp = true;
        let ctx = CryptoContext::outbound(params);
        let block = ctx.kernel_block();
        assert_eq!(block.cipher, Cipher::Null);
    }

    #[test]
    fn unauthenticated_srtp_forces_zero_auth_tag() {
        let mut params = aes128_params(1);
        params.unauthenticated_srtp = true;
        let ctx = CryptoContext::outbound(params);
        assert_eq!(ctx.kernel_block().auth_tag_len, 0);
    }

    #[test]
    fn plain_context_is_passthrough() {
        let mut ctx = CryptoContext::plain();
        let mut packet = b"payload".to_vec();
        let original = packet.clone();
        assert_eq!(ctx.protect_rtp(&mut packet), TransformOutcome::Ok);
        assert_eq!(packet, original);
        assert!(!ctx.kernel_block().is_supported());
    }
}
