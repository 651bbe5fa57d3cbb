//! Connect configuration: addresses, the connect descriptor, and TLS
//! parameters.

use crate::error::{Error, Result};
use crate::protocol::constants::{TNS_MAX_CONNECT_DATA, TNS_SDU_DEFAULT};
use base64::Engine;
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Transport protocol of one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Tcps,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Tcps => "tcps",
        }
    }
}

/// One listener address.
#[derive(Debug, Clone)]
pub struct Address {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            host: host.into(),
            port,
        }
    }

    pub fn tcps(host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: Protocol::Tcps,
            host: host.into(),
            port,
        }
    }

    fn descriptor(&self) -> String {
        format!(
            "(ADDRESS=(PROTOCOL={})(HOST={})(PORT={}))",
            self.protocol.as_str(),
            self.host,
            self.port
        )
    }
}

/// An ordered group of addresses with its balancing flags.
#[derive(Debug, Clone, Default)]
pub struct AddressList {
    pub addresses: Vec<Address>,
    pub load_balance: bool,
    pub source_route: bool,
}

impl AddressList {
    pub fn single(address: Address) -> Self {
        Self {
            addresses: vec![address],
            load_balance: false,
            source_route: false,
        }
    }
}

/// The database service to ask the listener for.
#[derive(Debug, Clone)]
pub enum ServiceTarget {
    ServiceName(String),
    Sid(String),
}

impl ServiceTarget {
    pub fn name(&self) -> &str {
        match self {
            ServiceTarget::ServiceName(s) | ServiceTarget::Sid(s) => s,
        }
    }
}

/// DRCP pool purity (`POOL_PURITY`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Purity {
    #[default]
    Default,
    New,
    Self_,
}

impl Purity {
    fn wire_value(self) -> u8 {
        match self {
            Purity::Default => 0,
            Purity::New => 1,
            Purity::Self_ => 2,
        }
    }
}

/// Mutual-TLS material handed to the TLS provider collaborator.
#[derive(Debug, Clone)]
pub struct TlsParameters {
    /// PEM file with the client certificate chain and key.
    pub pem_path: PathBuf,
    /// Password protecting the PEM key, if any.
    pub password: Option<String>,
    /// Require the server certificate DN to match.
    pub server_dn_match: bool,
    /// Expected server certificate DN, when pinned.
    pub server_cert_dn: Option<String>,
}

impl TlsParameters {
    /// Build from an Oracle wallet directory (resolves `ewallet.pem`).
    pub fn from_wallet_directory(
        directory: impl AsRef<Path>,
        password: Option<String>,
    ) -> Result<Self> {
        let pem_path = directory.as_ref().join("ewallet.pem");
        if !pem_path.is_file() {
            return Err(Error::InvalidConnectDescriptor {
                message: format!("wallet directory has no ewallet.pem: {}", pem_path.display()),
            });
        }
        Ok(Self {
            pem_path,
            password,
            server_dn_match: true,
            server_cert_dn: None,
        })
    }

    /// Build from an explicit PEM file.
    pub fn from_pem_file(pem_path: impl Into<PathBuf>, password: Option<String>) -> Self {
        Self {
            pem_path: pem_path.into(),
            password,
            server_dn_match: true,
            server_cert_dn: None,
        }
    }
}

/// Connect configuration for one database.
#[derive(Debug, Clone)]
pub struct Description {
    pub address_lists: Vec<AddressList>,
    pub service: ServiceTarget,
    /// TCP connect timeout per address (TRANSPORT_CONNECT_TIMEOUT).
    pub connect_timeout: Duration,
    pub retry_count: u32,
    pub retry_delay: Duration,
    /// Dead-connection detection probe interval in minutes (EXPIRE_TIME).
    pub expire_time: Option<u32>,
    /// Use a DRCP pooled server (`SERVER=pooled`).
    pub use_pooled_server: bool,
    pub purity: Purity,
    /// DRCP connection class.
    pub connection_class: Option<String>,
    pub sdu: u32,
    pub tls: Option<TlsParameters>,
    /// Program name reported in the CID block.
    pub program: String,
}

impl Description {
    pub fn new(address: Address, service: ServiceTarget) -> Self {
        Self {
            address_lists: vec![AddressList::single(address)],
            service,
            connect_timeout: Duration::from_secs(10),
            retry_count: 0,
            retry_delay: Duration::from_secs(1),
            expire_time: None,
            use_pooled_server: false,
            purity: Purity::Default,
            connection_class: None,
            sdu: TNS_SDU_DEFAULT,
            tls: None,
            program: "oracle-wire-rs".to_string(),
        }
    }

    /// Parse the short `host:port/service_name` form.
    pub fn parse(connect_string: &str) -> Result<Self> {
        let (address_part, service_name) =
            connect_string
                .split_once('/')
                .ok_or_else(|| Error::InvalidConnectDescriptor {
                    message: "expected host:port/service_name".to_string(),
                })?;

        let (host, port) = match address_part.split_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| Error::InvalidConnectDescriptor {
                    message: format!("invalid port: {}", port),
                })?;
                (host, port)
            }
            None => (address_part, 1521),
        };

        Ok(Self::new(
            Address::new(host, port),
            ServiceTarget::ServiceName(service_name.to_string()),
        ))
    }

    /// All addresses in connect order.
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.address_lists.iter().flat_map(|l| l.addresses.iter())
    }

    /// Whether any address uses TCPS.
    pub fn uses_tls(&self) -> bool {
        self.addresses().any(|a| a.protocol == Protocol::Tcps)
    }

    /// Build the parenthesised DESCRIPTION string for one target address.
    ///
    /// Each addressed server gets its own descriptor so the string stays
    /// within the per-packet connect-data limit.
    pub fn connect_descriptor(&self, address: &Address) -> Result<String> {
        let username = whoami::username();
        let local_host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());

        let mut connection_id_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut connection_id_bytes);
        let connection_id =
            base64::engine::general_purpose::STANDARD.encode(connection_id_bytes);

        let mut descriptor = String::from("(DESCRIPTION=");
        if self.retry_count > 0 {
            descriptor.push_str(&format!("(RETRY_COUNT={})", self.retry_count));
            descriptor.push_str(&format!("(RETRY_DELAY={})", self.retry_delay.as_secs()));
        }
        if let Some(expire_time) = self.expire_time {
            descriptor.push_str(&format!("(EXPIRE_TIME={})", expire_time));
        }
        descriptor.push_str(&format!(
            "(TRANSPORT_CONNECT_TIMEOUT={}ms)",
            self.connect_timeout.as_millis()
        ));
        descriptor.push_str(&address.descriptor());

        descriptor.push_str("(CONNECT_DATA=");
        match &self.service {
            ServiceTarget::ServiceName(name) => {
                descriptor.push_str(&format!("(SERVICE_NAME={})", name))
            }
            ServiceTarget::Sid(sid) => descriptor.push_str(&format!("(SID={})", sid)),
        }
        if self.use_pooled_server {
            descriptor.push_str("(SERVER=pooled)");
        }
        descriptor.push_str(&format!(
            "(CID=(PROGRAM={})(HOST={})(USER={}))",
            self.program, local_host, username
        ));
        if let Some(class) = &self.connection_class {
            descriptor.push_str(&format!("(POOL_CONNECTION_CLASS={})", class));
        }
        if self.purity != Purity::Default {
            descriptor.push_str(&format!("(POOL_PURITY={})", self.purity.wire_value()));
        }
        descriptor.push_str(&format!("(CONNECTION_ID={})", connection_id));
        descriptor.push(')');

        if let Some(tls) = &self.tls {
            descriptor.push_str("(SECURITY=");
            if tls.server_dn_match {
                descriptor.push_str("(SSL_SERVER_DN_MATCH=ON)");
            }
            if let Some(dn) = &tls.server_cert_dn {
                descriptor.push_str(&format!("(SSL_SERVER_CERT_DN={})", dn));
            }
            descriptor.push(')');
        }
        descriptor.push(')');

        // The listener caps connect data well above this, but keeping each
        // addressed server under the packet limit lets CONNECT stay a single
        // frame; longer descriptors still work via the follow-up DATA packet.
        if descriptor.len() > 4 * TNS_MAX_CONNECT_DATA as usize {
            return Err(Error::InvalidConnectDescriptor {
                message: format!("connect descriptor too long: {} bytes", descriptor.len()),
            });
        }

        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_form() {
        let description = Description::parse("dbhost:1522/ORCLPDB1").unwrap();
        let address = description.addresses().next().unwrap();
        assert_eq!(address.host, "dbhost");
        assert_eq!(address.port, 1522);
        assert_eq!(description.service.name(), "ORCLPDB1");

        let description = Description::parse("dbhost/ORCLPDB1").unwrap();
        assert_eq!(description.addresses().next().unwrap().port, 1521);
    }

    #[test]
    fn test_parse_rejects_missing_service() {
        assert!(Description::parse("dbhost:1521").is_err());
        assert!(Description::parse("dbhost:x/SVC").is_err());
    }

    #[test]
    fn test_descriptor_grammar() {
        let description = Description::parse("dbhost:1521/SVC").unwrap();
        let address = description.addresses().next().unwrap();
        let descriptor = description.connect_descriptor(address).unwrap();

        assert!(descriptor.starts_with("(DESCRIPTION="));
        assert!(descriptor.contains("(ADDRESS=(PROTOCOL=tcp)(HOST=dbhost)(PORT=1521))"));
        assert!(descriptor.contains("(SERVICE_NAME=SVC)"));
        assert!(descriptor.contains("(TRANSPORT_CONNECT_TIMEOUT=10000ms)"));
        assert!(descriptor.contains("(CONNECTION_ID="));
        assert!(!descriptor.contains("(SERVER=pooled)"));
        assert!(descriptor.ends_with(')'));
    }

    #[test]
    fn test_descriptor_drcp_and_retry() {
        let mut description = Description::parse("dbhost:1521/SVC").unwrap();
        description.use_pooled_server = true;
        description.purity = Purity::Self_;
        description.connection_class = Some("APP_POOL".to_string());
        description.retry_count = 3;
        description.retry_delay = Duration::from_secs(2);
        description.expire_time = Some(5);

        let address = description.addresses().next().unwrap().clone();
        let descriptor = description.connect_descriptor(&address).unwrap();
        assert!(descriptor.contains("(SERVER=pooled)"));
        assert!(descriptor.contains("(POOL_PURITY=2)"));
        assert!(descriptor.contains("(POOL_CONNECTION_CLASS=APP_POOL)"));
        assert!(descriptor.contains("(RETRY_COUNT=3)"));
        assert!(descriptor.contains("(RETRY_DELAY=2)"));
        assert!(descriptor.contains("(EXPIRE_TIME=5)"));
    }

    #[test]
    fn test_descriptor_sid_and_security() {
        let mut description = Description::new(
            Address::tcps("secure-db", 2484),
            ServiceTarget::Sid("XE".to_string()),
        );
        description.tls = Some(TlsParameters {
            pem_path: PathBuf::from("/wallet/ewallet.pem"),
            password: None,
            server_dn_match: true,
            server_cert_dn: Some("CN=secure-db".to_string()),
        });

        assert!(description.uses_tls());
        let address = description.addresses().next().unwrap().clone();
        let descriptor = description.connect_descriptor(&address).unwrap();
        assert!(descriptor.contains("(ADDRESS=(PROTOCOL=tcps)(HOST=secure-db)(PORT=2484))"));
        assert!(descriptor.contains("(SID=XE)"));
        assert!(descriptor.contains("(SECURITY=(SSL_SERVER_DN_MATCH=ON)"));
        assert!(descriptor.contains("(SSL_SERVER_CERT_DN=CN=secure-db)"));
    }

    #[test]
    fn test_wallet_requires_pem() {
        let err = TlsParameters::from_wallet_directory("/definitely/missing", None);
        assert!(err.is_err());
    }
}
