//! The public connection handle.
//!
//! `Connection::connect` dials the address list, drives the handshake and
//! authentication, then hands the transport to a dispatcher task. The handle
//! itself is a thin sender onto the dispatcher's FIFO: tasks enqueue from
//! anywhere, execute strictly one at a time on the connection.

use crate::config::{Address, Description, Protocol};
use crate::dispatcher::{Dispatcher, QueryTask, Task};
use crate::error::{Error, Result};
use crate::protocol::auth::{AuthenticationMode, Credentials, SessionData};
use crate::protocol::capabilities::Capabilities;
use crate::protocol::exec::QueryOptions;
use crate::protocol::handshake::{authenticate, establish, Established, HandshakeConfig};
use crate::protocol::packet::{PacketStream, TlsUpgrader};
use crate::protocol::types::Variable;
use crate::statement::Statement;
use crate::stream::{CancelHandle, QueryResults};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

/// Maximum chained REDIRECTs before giving up.
const MAX_REDIRECTS: usize = 4;

/// An open database connection.
pub struct Connection {
    task_tx: mpsc::Sender<Task>,
    protocol_version: u16,
    session_params: HashMap<String, String>,
    server_version: Option<(u8, u8, u8, u8, u8)>,
}

impl Connection {
    /// Connect using the short `host:port/service_name` form.
    pub async fn connect_simple(
        connect_string: &str,
        username: &str,
        password: &str,
    ) -> Result<Self> {
        let description = Description::parse(connect_string)?;
        Self::connect(
            &description,
            Credentials::username_password(username, password),
        )
        .await
    }

    /// Connect with default authentication mode and no TLS provider.
    pub async fn connect(description: &Description, credentials: Credentials) -> Result<Self> {
        Self::connect_with(description, credentials, AuthenticationMode::DEFAULT, None).await
    }

    /// Connect with an explicit mode and an optional TLS provider for TCPS.
    pub async fn connect_with(
        description: &Description,
        credentials: Credentials,
        mode: AuthenticationMode,
        tls_upgrader: Option<Arc<dyn TlsUpgrader>>,
    ) -> Result<Self> {
        let (stream, caps, session) =
            dial_and_establish(description, &credentials, mode, tls_upgrader.as_deref()).await?;
        Ok(Self::from_parts(
            stream,
            caps,
            session,
            description.use_pooled_server,
        ))
    }

    /// Assemble a connection over an already-established, authenticated
    /// transport.
    ///
    /// `connect` uses this after the handshake; it is also the seam for
    /// collaborators that acquire sessions by other means (a DRCP pool
    /// handing out established transports) and for driving the request
    /// dispatcher over a caller-supplied byte stream.
    pub fn from_parts(
        stream: PacketStream,
        caps: Capabilities,
        session: SessionData,
        use_pooled_server: bool,
    ) -> Self {
        let server_version = session
            .param("AUTH_VERSION_NO")
            .and_then(|v| v.parse::<u32>().ok())
            .map(|packed| caps.decode_version_tuple(packed));

        let protocol_version = caps.protocol_version;
        let session_params = session.params.clone();

        let (task_tx, task_rx) = mpsc::channel(64);
        let dispatcher = Dispatcher::new(stream, caps, task_rx, use_pooled_server);
        tokio::spawn(dispatcher.run());

        Self {
            task_tx,
            protocol_version,
            session_params,
            server_version,
        }
    }

    /// Negotiated TNS protocol version.
    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    /// Server version as a five-part tuple, when the server reported one.
    pub fn server_version(&self) -> Option<(u8, u8, u8, u8, u8)> {
        self.server_version
    }

    /// A session parameter returned during authentication.
    pub fn session_param(&self, key: &str) -> Option<&str> {
        self.session_params.get(key).map(|s| s.as_str())
    }

    async fn enqueue<T>(
        &self,
        task: Task,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        self.task_tx
            .send(task)
            .await
            .map_err(|_| Error::ClientClosedConnection)?;
        rx.await.map_err(|_| Error::ClientClosedConnection)?
    }

    /// Execute a SQL statement with positional binds.
    pub async fn query(&self, sql: &str, binds: Vec<Variable>) -> Result<QueryResults> {
        self.query_with_options(sql, binds, QueryOptions::default())
            .await
    }

    /// Execute a SQL statement with positional binds and explicit options.
    pub async fn query_with_options(
        &self,
        sql: &str,
        binds: Vec<Variable>,
        options: QueryOptions,
    ) -> Result<QueryResults> {
        let mut statement = Statement::parse(sql)?;
        statement.bind_all(binds)?;
        self.execute_statement(statement, options).await
    }

    /// Execute a pre-analyzed statement (binds already attached).
    pub async fn execute_statement(
        &self,
        statement: Statement,
        options: QueryOptions,
    ) -> Result<QueryResults> {
        let (results_tx, results_rx) = oneshot::channel();
        let (cancel, cancel_rx) = CancelHandle::new();
        let task = Task::Query(Box::new(QueryTask {
            statement,
            options,
            results_tx,
            cancel,
            cancel_rx,
        }));
        self.enqueue(task, results_rx).await
    }

    /// Round-trip liveness check.
    pub async fn ping(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Task::Ping(tx), rx).await
    }

    /// Commit the current transaction.
    pub async fn commit(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Task::Commit(tx), rx).await
    }

    /// Roll back the current transaction.
    pub async fn rollback(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Task::Rollback(tx), rx).await
    }

    /// Log off and close the connection.
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Task::Close(tx), rx).await
    }
}

/// Dial the description's addresses (with retries), run the handshake and
/// authentication, following listener redirects.
async fn dial_and_establish(
    description: &Description,
    credentials: &Credentials,
    mode: AuthenticationMode,
    tls_upgrader: Option<&dyn TlsUpgrader>,
) -> Result<(PacketStream, Capabilities, SessionData)> {
    let mut last_error = Error::InvalidConnectDescriptor {
        message: "no addresses in description".to_string(),
    };

    for attempt in 0..=description.retry_count {
        if attempt > 0 {
            tokio::time::sleep(description.retry_delay).await;
            log::debug!("connect retry {} of {}", attempt, description.retry_count);
        }
        for address in description.addresses() {
            match try_address(description, address, credentials, mode, tls_upgrader).await {
                Ok(established) => return Ok(established),
                Err(e) => {
                    log::debug!("address {}:{} failed: {}", address.host, address.port, e);
                    last_error = e;
                }
            }
        }
    }
    Err(last_error)
}

async fn try_address(
    description: &Description,
    address: &Address,
    credentials: &Credentials,
    mode: AuthenticationMode,
    tls_upgrader: Option<&dyn TlsUpgrader>,
) -> Result<(PacketStream, Capabilities, SessionData)> {
    let mut target = address.clone();

    for _ in 0..MAX_REDIRECTS {
        let mut stream = open_transport(description, &target, tls_upgrader).await?;
        let mut caps = Capabilities::new();

        let descriptor = description.connect_descriptor(&target)?;
        let config = HandshakeConfig {
            connect_descriptor: &descriptor,
            service: description.service.name(),
            server_name: &target.host,
            use_tls: target.protocol == Protocol::Tcps,
            tls_upgrader,
            sdu: description.sdu,
        };

        match establish(&mut stream, &config, &mut caps).await? {
            Established::Ready { used_cookie } => {
                if used_cookie {
                    log::debug!("handshake used cached connection cookie");
                }
                let session = authenticate(&mut stream, &mut caps, credentials, mode).await?;
                return Ok((stream, caps, session));
            }
            Established::Redirect(data) => {
                target = parse_redirect_address(&data, &target)?;
                log::debug!("redirected to {}:{}", target.host, target.port);
            }
        }
    }

    Err(Error::connection("too many listener redirects"))
}

async fn open_transport(
    description: &Description,
    address: &Address,
    tls_upgrader: Option<&dyn TlsUpgrader>,
) -> Result<PacketStream> {
    let endpoint = format!("{}:{}", address.host, address.port);
    let tcp = tokio::time::timeout(description.connect_timeout, TcpStream::connect(&endpoint))
        .await
        .map_err(|_| Error::ConnectionTimeout {
            host: address.host.clone(),
            port: address.port,
            timeout: description.connect_timeout,
        })??;
    tcp.set_nodelay(true)?;

    let mut stream = PacketStream::new(tcp);
    if address.protocol == Protocol::Tcps {
        let upgrader = tls_upgrader.ok_or_else(|| Error::FailedToAddTlsHandler {
            message: "TCPS address but no TLS provider configured".to_string(),
        })?;
        stream.install_tls(upgrader, &address.host).await?;
    }
    Ok(stream)
}

/// Extract HOST/PORT (and protocol) from redirect data.
fn parse_redirect_address(data: &str, current: &Address) -> Result<Address> {
    fn field<'a>(data: &'a str, key: &str) -> Option<&'a str> {
        let start = data.find(key)? + key.len();
        let end = data[start..].find(')')? + start;
        Some(&data[start..end])
    }

    let host = field(data, "HOST=").ok_or_else(|| Error::InvalidConnectDescriptor {
        message: format!("redirect data has no HOST: {}", data),
    })?;
    let port = field(data, "PORT=")
        .and_then(|p| p.parse().ok())
        .unwrap_or(current.port);
    let protocol = match field(data, "PROTOCOL=") {
        Some(p) if p.eq_ignore_ascii_case("tcps") => Protocol::Tcps,
        Some(_) => Protocol::Tcp,
        None => current.protocol,
    };

    Ok(Address {
        protocol,
        host: host.to_string(),
        port,
    })
}
