//! Negotiated connection capabilities.
//!
//! Construction populates the compile-time vector with the client's maximum
//! claims; the two adjust methods are the only mutation points and are called
//! exclusively from the early handshake states. After authentication the
//! capabilities are read-only.

use crate::error::{Error, Result};
use crate::protocol::constants::*;

#[derive(Debug, Clone)]
pub struct Capabilities {
    /// Negotiated TNS protocol version.
    pub protocol_version: u16,
    /// TTC field version the client parses with (minimum of both sides).
    pub ttc_field_version: u8,
    /// The server's own field version (governs what it sends).
    pub server_ttc_field_version: u8,
    /// Client character set (UTF-8).
    pub charset_id: u16,
    /// National character set; only the UTF-16 variant is supported.
    pub ncharset_id: u16,
    /// Negotiated SDU size.
    pub sdu: u32,
    /// Whether out-of-band breaks may be used on this connection.
    pub supports_oob: bool,
    /// Whether the server marks logical replies with end-of-response.
    pub supports_end_of_response: bool,
    /// Maximum VARCHAR2 size: 32767 when the server runs extended strings.
    pub max_string_size: u32,
    /// Compile-time capability vector.
    pub compile_caps: Vec<u8>,
    /// Runtime capability vector.
    pub runtime_caps: Vec<u8>,
}

impl Capabilities {
    /// Create capabilities advertising the client's maximum claims.
    pub fn new() -> Self {
        let ttc_field_version = TNS_CCAP_FIELD_VERSION_MAX;

        let mut compile_caps = vec![0u8; TNS_CCAP_MAX];
        compile_caps[TNS_CCAP_SQL_VERSION] = TNS_CCAP_SQL_VERSION_MAX;
        compile_caps[TNS_CCAP_LOGON_TYPES] = TNS_CCAP_O5LOGON
            | TNS_CCAP_O5LOGON_NP
            | TNS_CCAP_O7LOGON
            | TNS_CCAP_O8LOGON_LONG_IDENTIFIER
            | TNS_CCAP_O9LOGON_LONG_PASSWORD;
        compile_caps[TNS_CCAP_FEATURE_BACKPORT] =
            TNS_CCAP_CTB_IMPLICIT_POOL | TNS_CCAP_CTB_OAUTH_MSG_ON_ERR;
        compile_caps[TNS_CCAP_FIELD_VERSION] = ttc_field_version;
        compile_caps[TNS_CCAP_SERVER_DEFINE_CONV] = 1;
        compile_caps[TNS_CCAP_DEQUEUE_WITH_SELECTOR] = 1;
        compile_caps[TNS_CCAP_TTC1] =
            TNS_CCAP_FAST_BVEC | TNS_CCAP_END_OF_CALL_STATUS | TNS_CCAP_IND_RCD;
        compile_caps[TNS_CCAP_OCI1] = TNS_CCAP_FAST_SESSION_PROPAGATE | TNS_CCAP_APP_CTX_PIGGYBACK;
        compile_caps[TNS_CCAP_TDS_VERSION] = TNS_CCAP_TDS_VERSION_MAX;
        compile_caps[TNS_CCAP_RPC_VERSION] = TNS_CCAP_RPC_VERSION_MAX;
        compile_caps[TNS_CCAP_RPC_SIG] = TNS_CCAP_RPC_SIG_VALUE;
        compile_caps[TNS_CCAP_DBF_VERSION] = TNS_CCAP_DBF_VERSION_MAX;
        compile_caps[TNS_CCAP_LOB] = TNS_CCAP_LOB_UB8_SIZE
            | TNS_CCAP_LOB_ENCS
            | TNS_CCAP_LOB_PREFETCH_DATA
            | TNS_CCAP_LOB_TEMP_SIZE
            | TNS_CCAP_LOB_PREFETCH_LENGTH
            | TNS_CCAP_LOB_12C;
        compile_caps[TNS_CCAP_UB2_DTY] = 1;
        compile_caps[TNS_CCAP_LOB2] = TNS_CCAP_LOB2_QUASI | TNS_CCAP_LOB2_2GB_PREFETCH;
        compile_caps[TNS_CCAP_TTC3] = TNS_CCAP_IMPLICIT_RESULTS
            | TNS_CCAP_BIG_CHUNK_CLR
            | TNS_CCAP_KEEP_OUT_ORDER
            | TNS_CCAP_LTXID;
        compile_caps[TNS_CCAP_TTC2] = TNS_CCAP_ZLNP;
        compile_caps[TNS_CCAP_OCI2] = TNS_CCAP_DRCP;
        compile_caps[TNS_CCAP_CLIENT_FN] = TNS_CCAP_CLIENT_FN_MAX;
        compile_caps[TNS_CCAP_SESS_SIGNATURE_VERSION] = TNS_CCAP_FIELD_VERSION_12_2;
        compile_caps[TNS_CCAP_TTC4] = TNS_CCAP_INBAND_NOTIFICATION | TNS_CCAP_EXPLICIT_BOUNDARY;

        let mut runtime_caps = vec![0u8; TNS_RCAP_MAX];
        runtime_caps[TNS_RCAP_COMPAT] = TNS_RCAP_COMPAT_81;
        runtime_caps[TNS_RCAP_TTC] = TNS_RCAP_TTC_ZERO_COPY | TNS_RCAP_TTC_32K;

        Self {
            protocol_version: 0,
            ttc_field_version,
            server_ttc_field_version: 0,
            charset_id: TNS_CHARSET_UTF8,
            ncharset_id: TNS_CHARSET_UTF16,
            sdu: TNS_SDU_DEFAULT,
            supports_oob: false,
            supports_end_of_response: false,
            max_string_size: TNS_MAX_STRING_SIZE_COMPAT,
            compile_caps,
            runtime_caps,
        }
    }

    /// Adjust for the accepted protocol version and accept flags.
    ///
    /// `transport_supports_oob` is false for transports that cannot deliver
    /// TCP urgent data; the OOB check is then never negotiated even when the
    /// server offers it.
    pub fn adjust_for_protocol(&mut self, version: u16, flags2: u32, transport_supports_oob: bool) {
        self.protocol_version = version;

        self.supports_oob = transport_supports_oob
            && version >= TNS_VERSION_MIN_OOB_CHECK
            && (flags2 & TNS_ACCEPT_FLAG_CHECK_OOB) != 0;

        if version >= TNS_VERSION_MIN_END_OF_RESPONSE {
            self.supports_end_of_response = (flags2 & TNS_ACCEPT_FLAG_HAS_END_OF_RESPONSE) != 0;
            if self.supports_end_of_response {
                self.compile_caps[TNS_CCAP_TTC4] |= TNS_CCAP_END_OF_RESPONSE;
            }
        }
    }

    /// Adjust for the server's capability vectors.
    ///
    /// The server's field version dominates: the client parses with the
    /// minimum of the two. `max_string_size` is fixed from the runtime TTC
    /// bitmap and never changes afterwards.
    pub fn adjust_for_server_capabilities(
        &mut self,
        server_compile_caps: &[u8],
        server_runtime_caps: &[u8],
    ) {
        if server_compile_caps.len() > TNS_CCAP_FIELD_VERSION {
            let server_field_version = server_compile_caps[TNS_CCAP_FIELD_VERSION];
            self.server_ttc_field_version = server_field_version;
            if server_field_version < self.ttc_field_version {
                self.ttc_field_version = server_field_version;
                self.compile_caps[TNS_CCAP_FIELD_VERSION] = server_field_version;
            }
        }

        if server_runtime_caps.len() > TNS_RCAP_TTC {
            self.max_string_size = if server_runtime_caps[TNS_RCAP_TTC] & TNS_RCAP_TTC_32K != 0 {
                TNS_MAX_STRING_SIZE_EXTENDED
            } else {
                TNS_MAX_STRING_SIZE_COMPAT
            };
        }
    }

    /// Fail unless the server's national character set is AL16UTF16.
    pub fn check_ncharset_id(&self, ncharset_id: u16) -> Result<()> {
        if ncharset_id != TNS_CHARSET_UTF16 {
            return Err(Error::NationalCharsetNotSupported { ncharset_id });
        }
        Ok(())
    }

    /// Whether version tuples use the 18.1+ bit layout.
    ///
    /// This predicate is the single discriminator between the two layouts of
    /// `AUTH_VERSION_NO`; all version decoding goes through it.
    pub fn uses_extended_version_layout(&self) -> bool {
        self.ttc_field_version >= TNS_CCAP_FIELD_VERSION_18_1_EXT_1
    }

    /// Decode a packed `AUTH_VERSION_NO` value into a five-part version.
    pub fn decode_version_tuple(&self, version: u32) -> (u8, u8, u8, u8, u8) {
        if self.uses_extended_version_layout() {
            (
                ((version >> 24) & 0xFF) as u8,
                ((version >> 16) & 0xFF) as u8,
                ((version >> 12) & 0x0F) as u8,
                ((version >> 4) & 0xFF) as u8,
                (version & 0x0F) as u8,
            )
        } else {
            (
                ((version >> 24) & 0xFF) as u8,
                ((version >> 20) & 0x0F) as u8,
                ((version >> 12) & 0x0F) as u8,
                ((version >> 8) & 0x0F) as u8,
                (version & 0x0F) as u8,
            )
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_version_takes_minimum() {
        let mut caps = Capabilities::new();
        let mut server_caps = vec![0u8; TNS_CCAP_MAX];
        server_caps[TNS_CCAP_FIELD_VERSION] = TNS_CCAP_FIELD_VERSION_19_1;
        caps.adjust_for_server_capabilities(&server_caps, &[]);

        assert_eq!(caps.ttc_field_version, TNS_CCAP_FIELD_VERSION_19_1);
        assert_eq!(caps.server_ttc_field_version, TNS_CCAP_FIELD_VERSION_19_1);
        assert_eq!(
            caps.compile_caps[TNS_CCAP_FIELD_VERSION],
            TNS_CCAP_FIELD_VERSION_19_1
        );
    }

    #[test]
    fn test_field_version_not_raised() {
        let mut caps = Capabilities::new();
        let mut server_caps = vec![0u8; TNS_CCAP_MAX];
        server_caps[TNS_CCAP_FIELD_VERSION] = 99;
        caps.adjust_for_server_capabilities(&server_caps, &[]);
        assert_eq!(caps.ttc_field_version, TNS_CCAP_FIELD_VERSION_MAX);
        assert_eq!(caps.server_ttc_field_version, 99);
    }

    #[test]
    fn test_max_string_size_from_runtime_caps() {
        let mut caps = Capabilities::new();
        let mut runtime = vec![0u8; TNS_RCAP_MAX];
        runtime[TNS_RCAP_TTC] = TNS_RCAP_TTC_32K;
        caps.adjust_for_server_capabilities(&[], &runtime);
        assert_eq!(caps.max_string_size, TNS_MAX_STRING_SIZE_EXTENDED);

        let runtime = vec![0u8; TNS_RCAP_MAX];
        caps.adjust_for_server_capabilities(&[], &runtime);
        assert_eq!(caps.max_string_size, TNS_MAX_STRING_SIZE_COMPAT);
    }

    #[test]
    fn test_ncharset_check() {
        let caps = Capabilities::new();
        assert!(caps.check_ncharset_id(TNS_CHARSET_UTF16).is_ok());
        match caps.check_ncharset_id(871) {
            Err(Error::NationalCharsetNotSupported { ncharset_id }) => {
                assert_eq!(ncharset_id, 871)
            }
            other => panic!("expected NationalCharsetNotSupported, got {:?}", other),
        }
    }

    #[test]
    fn test_oob_requires_transport_support() {
        let mut caps = Capabilities::new();
        caps.adjust_for_protocol(TNS_VERSION_DESIRED, TNS_ACCEPT_FLAG_CHECK_OOB, false);
        assert!(!caps.supports_oob);

        caps.adjust_for_protocol(TNS_VERSION_DESIRED, TNS_ACCEPT_FLAG_CHECK_OOB, true);
        assert!(caps.supports_oob);
    }

    #[test]
    fn test_end_of_response_flag() {
        let mut caps = Capabilities::new();
        caps.adjust_for_protocol(
            TNS_VERSION_DESIRED,
            TNS_ACCEPT_FLAG_HAS_END_OF_RESPONSE,
            false,
        );
        assert!(caps.supports_end_of_response);
        assert!(caps.compile_caps[TNS_CCAP_TTC4] & TNS_CCAP_END_OF_RESPONSE != 0);
    }

    #[test]
    fn test_version_tuple_layouts() {
        let mut caps = Capabilities::new();
        caps.ttc_field_version = TNS_CCAP_FIELD_VERSION_18_1_EXT_1;
        // 19.4.0.1.0 in the 18.1+ layout
        let packed: u32 = (19 << 24) | (4 << 16) | (1 << 4);
        assert_eq!(caps.decode_version_tuple(packed), (19, 4, 0, 1, 0));

        caps.ttc_field_version = TNS_CCAP_FIELD_VERSION_12_2;
        let packed: u32 = (12 << 24) | (2 << 20) | (1 << 8);
        assert_eq!(caps.decode_version_tuple(packed), (12, 2, 0, 1, 0));
    }
}
