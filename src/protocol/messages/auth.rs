//! Authentication messages (phases one and two of O5LOGON).

use crate::error::Result;
use crate::protocol::constants::*;
use crate::protocol::message::{
    bytes_with_length_wire_size, key_value_wire_size, ub4_wire_size, DataMessage, Message, WriteExt,
};

/// Client identity sent with both auth phases.
pub struct ClientInfo<'a> {
    pub terminal: &'a str,
    pub program: &'a str,
    pub machine: &'a str,
    pub pid: &'a str,
    pub osuser: &'a str,
}

/// Authentication phase one (`TNS_FUNC_AUTH_PHASE_ONE`).
///
/// Sends the user name, mode, and client info; the server answers with the
/// verifier material (AUTH_VFR_DATA, AUTH_SESSKEY, PBKDF2 parameters).
pub struct AuthPhaseOneMessage<'a> {
    pub username: &'a str,
    pub auth_mode: u32,
    pub client: ClientInfo<'a>,
}

impl AuthPhaseOneMessage<'_> {
    const NUM_PAIRS: u32 = 5;
}

impl Message for AuthPhaseOneMessage<'_> {
    fn wire_size(&self) -> usize {
        let has_user = !self.username.is_empty();
        let user_len = self.username.len();

        let mut size = 0;
        size += 1; // message type
        size += 1; // function code
        size += 1; // sequence number
        size += 1; // user presence flag
        size += ub4_wire_size(user_len as u32);
        size += ub4_wire_size(self.auth_mode);
        size += 1; // pointer to key/value pairs
        size += ub4_wire_size(Self::NUM_PAIRS);
        size += 1; // authivl pointer
        size += 1; // authovln pointer

        if has_user {
            size += bytes_with_length_wire_size(user_len);
        }

        size += key_value_wire_size("AUTH_TERMINAL", self.client.terminal, 0);
        size += key_value_wire_size("AUTH_PROGRAM_NM", self.client.program, 0);
        size += key_value_wire_size("AUTH_MACHINE", self.client.machine, 0);
        size += key_value_wire_size("AUTH_PID", self.client.pid, 0);
        size += key_value_wire_size("AUTH_SID", self.client.osuser, 0);
        size
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        let has_user = !self.username.is_empty();
        let user_bytes = self.username.as_bytes();

        buf.write_u8(TNS_MSG_TYPE_FUNCTION);
        buf.write_u8(TNS_FUNC_AUTH_PHASE_ONE);
        buf.write_u8(1); // sequence number

        buf.write_u8(u8::from(has_user));
        buf.write_ub4(user_bytes.len() as u32);
        buf.write_ub4(self.auth_mode);

        buf.write_u8(1); // pointer to key/value pairs
        buf.write_ub4(Self::NUM_PAIRS);
        buf.write_u8(1); // authivl pointer
        buf.write_u8(1); // authovln pointer

        if has_user {
            buf.write_bytes_with_length(user_bytes);
        }

        buf.write_key_value("AUTH_TERMINAL", self.client.terminal, 0);
        buf.write_key_value("AUTH_PROGRAM_NM", self.client.program, 0);
        buf.write_key_value("AUTH_MACHINE", self.client.machine, 0);
        buf.write_key_value("AUTH_PID", self.client.pid, 0);
        buf.write_key_value("AUTH_SID", self.client.osuser, 0);
        Ok(())
    }
}

impl DataMessage for AuthPhaseOneMessage<'_> {}

/// Authentication phase two (`TNS_FUNC_AUTH_PHASE_TWO`).
///
/// Completes the logon with the encrypted session key and credentials. For
/// token authentication the password fields are absent and an AUTH_TOKEN pair
/// is sent instead.
pub struct AuthPhaseTwoMessage<'a> {
    pub username: &'a str,
    pub auth_mode: u32,
    pub session_key: Option<&'a str>,
    pub speedy_key: Option<&'a str>,
    pub encoded_password: Option<&'a str>,
    pub token: Option<&'a str>,
    pub timezone_stmt: &'a str,
    pub driver_name: &'a str,
}

impl AuthPhaseTwoMessage<'_> {
    fn num_pairs(&self) -> u32 {
        // charset, driver name, version, timezone
        let mut n = 4u32;
        n += u32::from(self.session_key.is_some());
        n += u32::from(self.speedy_key.is_some());
        n += u32::from(self.encoded_password.is_some());
        n += u32::from(self.token.is_some());
        n
    }
}

impl Message for AuthPhaseTwoMessage<'_> {
    fn wire_size(&self) -> usize {
        let has_user = !self.username.is_empty();
        let user_len = self.username.len();

        let mut size = 0;
        size += 1; // message type
        size += 1; // function code
        size += 1; // sequence number
        size += 1; // user presence flag
        size += ub4_wire_size(user_len as u32);
        size += ub4_wire_size(self.auth_mode);
        size += 1; // pointer to key/value pairs
        size += ub4_wire_size(self.num_pairs());
        size += 1; // authivl pointer
        size += 1; // authovln pointer

        if has_user {
            size += bytes_with_length_wire_size(user_len);
        }

        if let Some(sk) = self.session_key {
            size += key_value_wire_size("AUTH_SESSKEY", sk, 1);
        }
        if let Some(sk) = self.speedy_key {
            size += key_value_wire_size("AUTH_PBKDF2_SPEEDY_KEY", sk, 0);
        }
        if let Some(pw) = self.encoded_password {
            size += key_value_wire_size("AUTH_PASSWORD", pw, 0);
        }
        if let Some(token) = self.token {
            size += key_value_wire_size("AUTH_TOKEN", token, 0);
        }
        size += key_value_wire_size("SESSION_CLIENT_CHARSET", "873", 0);
        size += key_value_wire_size("SESSION_CLIENT_DRIVER_NAME", self.driver_name, 0);
        size += key_value_wire_size("SESSION_CLIENT_VERSION", "185599488", 0);
        size += key_value_wire_size("AUTH_ALTER_SESSION", self.timezone_stmt, 1);
        size
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        let has_user = !self.username.is_empty();
        let user_bytes = self.username.as_bytes();

        buf.write_u8(TNS_MSG_TYPE_FUNCTION);
        buf.write_u8(TNS_FUNC_AUTH_PHASE_TWO);
        buf.write_u8(2); // sequence number

        buf.write_u8(u8::from(has_user));
        buf.write_ub4(user_bytes.len() as u32);
        buf.write_ub4(self.auth_mode);

        buf.write_u8(1); // pointer to key/value pairs
        buf.write_ub4(self.num_pairs());
        buf.write_u8(1); // authivl pointer
        buf.write_u8(1); // authovln pointer

        if has_user {
            buf.write_bytes_with_length(user_bytes);
        }

        if let Some(sk) = self.session_key {
            buf.write_key_value("AUTH_SESSKEY", sk, 1);
        }
        if let Some(sk) = self.speedy_key {
            buf.write_key_value("AUTH_PBKDF2_SPEEDY_KEY", sk, 0);
        }
        if let Some(pw) = self.encoded_password {
            buf.write_key_value("AUTH_PASSWORD", pw, 0);
        }
        if let Some(token) = self.token {
            buf.write_key_value("AUTH_TOKEN", token, 0);
        }
        buf.write_key_value("SESSION_CLIENT_CHARSET", "873", 0);
        buf.write_key_value("SESSION_CLIENT_DRIVER_NAME", self.driver_name, 0);
        buf.write_key_value("SESSION_CLIENT_VERSION", "185599488", 0);
        buf.write_key_value("AUTH_ALTER_SESSION", self.timezone_stmt, 1);
        Ok(())
    }
}

impl DataMessage for AuthPhaseTwoMessage<'_> {}
