//! Two-phase O5LOGON authentication: credentials, modes, and verifiers.
//!
//! Phase one sends the user and client info; the server replies with the
//! verifier material. Phase two computes the session key (AES-CBC with a
//! zero IV; PBKDF2-derived keys for the 12C verifier) and sends the
//! encrypted credentials. The I/O driving lives in the handshake module;
//! everything here is pure computation over the exchanged parameters.

use crate::error::{Error, Result};
use crate::protocol::constants::*;
use crate::protocol::crypto::{
    bytes_to_hex_upper, decrypt_cbc, derive_key_pbkdf2, encrypt_cbc, hex_to_bytes, md5_hash,
    random_bytes, sha1_hash, sha512_hash,
};
use std::collections::HashMap;

/// How the session authenticates.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Username and password (O5LOGON verifier exchange).
    UsernamePassword { username: String, password: String },
    /// IAM bearer token.
    Token { token: String },
}

impl Credentials {
    pub fn username_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::UsernamePassword {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self::Token {
            token: token.into(),
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Self::UsernamePassword { username, .. } => username,
            Self::Token { .. } => "",
        }
    }
}

/// Requested session privilege, a bit-field over the administrative roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthenticationMode(u32);

impl AuthenticationMode {
    pub const DEFAULT: Self = Self(0);
    pub const PRELIM: Self = Self(TNS_AUTH_MODE_PRELIM);
    pub const SYS_ASM: Self = Self(TNS_AUTH_MODE_SYSASM);
    pub const SYS_BKP: Self = Self(TNS_AUTH_MODE_SYSBKP);
    pub const SYS_DBA: Self = Self(TNS_AUTH_MODE_SYSDBA);
    pub const SYS_DGD: Self = Self(TNS_AUTH_MODE_SYSDGD);
    pub const SYS_KMT: Self = Self(TNS_AUTH_MODE_SYSKMT);
    pub const SYS_OPER: Self = Self(TNS_AUTH_MODE_SYSOPER);
    pub const SYS_RAC: Self = Self(TNS_AUTH_MODE_SYSRAC);

    /// Combine two modes.
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// The wire mode for phase one: LOGON plus the role bits.
    pub fn phase_one_bits(self) -> u32 {
        TNS_AUTH_MODE_LOGON | self.0
    }

    /// The wire mode for phase two.
    pub fn phase_two_bits(self, credentials: &Credentials) -> u32 {
        let mut bits = TNS_AUTH_MODE_LOGON | self.0;
        match credentials {
            Credentials::UsernamePassword { .. } => bits |= TNS_AUTH_MODE_WITH_PASSWORD,
            Credentials::Token { .. } => bits |= TNS_AUTH_MODE_IAM_TOKEN,
        }
        bits
    }
}

/// Session state accumulated across the authentication dialogue.
#[derive(Debug, Default)]
pub struct SessionData {
    /// Key-value pairs returned by the server.
    pub params: HashMap<String, String>,
    /// Verifier type from AUTH_VFR_DATA.
    pub verifier_type: u32,
    /// Combo key kept for verifying the server's response.
    pub combo_key: Option<Vec<u8>>,
}

impl SessionData {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.param(key).ok_or_else(|| Error::MissingParameter {
            name: key.to_string(),
        })
    }

    fn require_hex(&self, key: &str) -> Result<Vec<u8>> {
        hex_to_bytes(self.require(key)?)
            .ok_or_else(|| Error::decoding(format!("{} is not valid hex", key)))
    }

    fn require_u32(&self, key: &str) -> Result<u32> {
        self.require(key)?
            .parse()
            .map_err(|_| Error::decoding(format!("{} is not a number", key)))
    }
}

/// The phase-two key material derived from the verifier exchange.
#[derive(Debug)]
pub struct Verifier {
    pub session_key: String,
    pub speedy_key: Option<String>,
    pub encoded_password: String,
}

/// Generate the phase-two verifier for the negotiated type.
pub fn generate_verifier(password: &str, session: &mut SessionData) -> Result<Verifier> {
    let verifier_data = session.require_hex("AUTH_VFR_DATA")?;
    let password = password.as_bytes();

    match session.verifier_type {
        TNS_VERIFIER_TYPE_12C => generate_12c_verifier(password, &verifier_data, session),
        TNS_VERIFIER_TYPE_11G_1 | TNS_VERIFIER_TYPE_11G_2 => {
            generate_11g_verifier(password, &verifier_data, session)
        }
        other => Err(Error::UnsupportedVerifierType {
            verifier_type: other,
        }),
    }
}

/// 12C verifier: PBKDF2-derived password key, SHA-512 password hash.
fn generate_12c_verifier(
    password: &[u8],
    verifier_data: &[u8],
    session: &mut SessionData,
) -> Result<Verifier> {
    let iterations = session.require_u32("AUTH_PBKDF2_VGEN_COUNT")?;
    let keylen = 32usize;

    let mut salt = verifier_data.to_vec();
    salt.extend_from_slice(b"AUTH_PBKDF2_SPEEDY_KEY");
    let password_key = derive_key_pbkdf2(password, &salt, 64, iterations);

    let mut hash_input = password_key.clone();
    hash_input.extend_from_slice(verifier_data);
    let password_hash: Vec<u8> = sha512_hash(&hash_input)[..keylen].to_vec();

    let server_sesskey = session.require_hex("AUTH_SESSKEY")?;
    let session_key_part_a = decrypt_cbc(&password_hash, &server_sesskey);

    let session_key_part_b = random_bytes(session_key_part_a.len());
    let encrypted_client_key = encrypt_cbc(&password_hash, &session_key_part_b, false);
    let session_key =
        bytes_to_hex_upper(&encrypted_client_key[..32.min(encrypted_client_key.len())]);

    let csk_salt = session.require_hex("AUTH_PBKDF2_CSK_SALT")?;
    let sder_count = session.require_u32("AUTH_PBKDF2_SDER_COUNT")?;

    let mut temp_key = session_key_part_b[..keylen.min(session_key_part_b.len())].to_vec();
    temp_key.extend_from_slice(&session_key_part_a[..keylen.min(session_key_part_a.len())]);
    let temp_key_hex = bytes_to_hex_upper(&temp_key);
    let combo_key = derive_key_pbkdf2(temp_key_hex.as_bytes(), &csk_salt, keylen, sder_count);

    let speedy_salt = random_bytes(16);
    let mut speedy_plaintext = speedy_salt;
    speedy_plaintext.extend_from_slice(&password_key);
    let speedy_encrypted = encrypt_cbc(&combo_key, &speedy_plaintext, false);
    let speedy_key = bytes_to_hex_upper(&speedy_encrypted[..80.min(speedy_encrypted.len())]);

    session.combo_key = Some(combo_key.clone());

    let password_salt = random_bytes(16);
    let mut password_with_salt = password_salt;
    password_with_salt.extend_from_slice(password);
    let encrypted_password = encrypt_cbc(&combo_key, &password_with_salt, false);

    Ok(Verifier {
        session_key,
        speedy_key: Some(speedy_key),
        encoded_password: bytes_to_hex_upper(&encrypted_password),
    })
}

/// 11G verifier: SHA-1 password hash, MD5-derived combo key.
fn generate_11g_verifier(
    password: &[u8],
    verifier_data: &[u8],
    session: &mut SessionData,
) -> Result<Verifier> {
    let mut hash_input = password.to_vec();
    hash_input.extend_from_slice(verifier_data);
    let mut password_hash = sha1_hash(&hash_input).to_vec();
    password_hash.extend_from_slice(&[0u8; 4]);

    let server_sesskey = session.require_hex("AUTH_SESSKEY")?;
    let session_key_part_a = decrypt_cbc(&password_hash, &server_sesskey);

    let session_key_part_b = random_bytes(session_key_part_a.len());
    let encrypted_client_key = encrypt_cbc(&password_hash, &session_key_part_b, false);
    let session_key =
        bytes_to_hex_upper(&encrypted_client_key[..48.min(encrypted_client_key.len())]);

    let key_len = 24;
    let mut xor_result = vec![0u8; key_len];
    let upper = 40.min(session_key_part_a.len().min(session_key_part_b.len()) + 16);
    for i in 16..upper {
        xor_result[i - 16] = session_key_part_a[i] ^ session_key_part_b[i];
    }

    let part1 = md5_hash(&xor_result[..16]);
    let part2 = md5_hash(&xor_result[16..]);
    let mut combo_key = part1.to_vec();
    combo_key.extend_from_slice(&part2[..8]);

    let password_salt = random_bytes(16);
    let mut password_with_salt = password_salt;
    password_with_salt.extend_from_slice(password);
    let encrypted_password = encrypt_cbc(&combo_key, &password_with_salt, false);

    session.combo_key = Some(combo_key);

    Ok(Verifier {
        session_key,
        speedy_key: None,
        encoded_password: bytes_to_hex_upper(&encrypted_password),
    })
}

/// Verify the AUTH_SVR_RESPONSE returned after phase two.
///
/// The decrypted response must embed the `SERVER_TO_CLIENT` proof.
pub fn verify_server_response(session: &SessionData) -> Result<()> {
    let Some(combo_key) = &session.combo_key else {
        return Ok(());
    };
    let Some(svr_response) = session.param("AUTH_SVR_RESPONSE") else {
        return Ok(());
    };
    let encoded = hex_to_bytes(svr_response)
        .ok_or_else(|| Error::decoding("AUTH_SVR_RESPONSE is not valid hex"))?;
    let decrypted = decrypt_cbc(combo_key, &encoded);
    if decrypted.len() < 32 || &decrypted[16..32] != b"SERVER_TO_CLIENT" {
        return Err(Error::InvalidServerResponse);
    }
    Ok(())
}

/// The `ALTER SESSION` statement aligning the session timezone.
pub fn timezone_statement() -> String {
    let now = chrono::Local::now();
    let offset = now.offset();
    let hours = offset.local_minus_utc() / 3600;
    let minutes = (offset.local_minus_utc().abs() % 3600) / 60;

    let sign = if hours >= 0 { "+" } else { "-" };
    format!(
        "ALTER SESSION SET TIME_ZONE='{}{:02}:{:02}'\0",
        sign,
        hours.abs(),
        minutes
    )
}
