//! Connection wrapper: command issuance, pipelining and status expectations.
//!
//! [`Connection`] owns exactly one link to the store. It can run a command as
//! a blocking round-trip ([`Connection::command`]) or queue commands
//! ([`Connection::append_command`]) that are sent together by the next
//! [`Connection::get_reply`], whose replies then come back in submission
//! order. Queuing is how the members of a `MULTI`/`EXEC` transaction travel
//! in a single write.
//!
//! The link itself is a [`Transport`], opened by a [`Connector`]. The
//! production pair is [`RedisConnector`] and the synchronous connection of the
//! `redis` crate.

use std::fmt;
use std::time::Duration;

use qcache_core::StorageError;
use redis::{Cmd, RedisError, Value};
use tracing::{error, trace};

use crate::error::ConnectionError;
use crate::reply::{Frame, Reply};

/// Byte level link to the store.
pub trait Transport: Send + 'static {
    /// Writes packed commands.
    fn write_all(&mut self, packed: &[u8]) -> Result<(), ConnectionError>;

    /// Blocks until the next reply has been read.
    fn read_frame(&mut self) -> Result<Frame, ConnectionError>;
}

/// Opens transports to an [`Endpoint`].
pub trait Connector: Send + Sync + 'static {
    /// Transport produced by this connector.
    type Transport: Transport;

    /// Opens a new link.
    fn connect(&self, endpoint: &Endpoint) -> Result<Self::Transport, ConnectionError>;
}

/// Location of the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `HOST:PORT`.
    ///
    /// Exactly two colon separated tokens are required and the port must be
    /// a positive integer.
    ///
    /// ```
    /// use qcache_redis::Endpoint;
    ///
    /// let endpoint = Endpoint::parse("cache.local:6379").unwrap();
    /// assert_eq!(endpoint.host(), "cache.local");
    /// assert_eq!(endpoint.port(), 6379);
    ///
    /// assert!(Endpoint::parse("cache.local").is_err());
    /// assert!(Endpoint::parse("cache.local:0").is_err());
    /// ```
    pub fn parse(arguments: &str) -> Result<Self, StorageError> {
        let tokens: Vec<&str> = arguments
            .split(':')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .collect();

        let [host, port] = tokens[..] else {
            return Err(StorageError::InvalidArguments(arguments.to_owned()));
        };

        match port.parse::<u16>() {
            Ok(port) if port > 0 => Ok(Self::new(host, port)),
            _ => Err(StorageError::InvalidPort(arguments.to_owned())),
        }
    }

    /// Host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connection URL understood by the `redis` crate.
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Connect timeout of [`RedisConnector::default`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Read and write timeout of [`RedisConnector::default`].
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Connector using the synchronous client of the `redis` crate.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) io_timeout: Option<Duration>,
}

impl RedisConnector {
    /// Creates a connector with the given timeouts; `None` waits forever.
    pub fn new(connect_timeout: Option<Duration>, io_timeout: Option<Duration>) -> Self {
        Self {
            connect_timeout,
            io_timeout,
        }
    }
}

impl Default for RedisConnector {
    fn default() -> Self {
        Self::new(Some(DEFAULT_CONNECT_TIMEOUT), Some(DEFAULT_IO_TIMEOUT))
    }
}

impl Connector for RedisConnector {
    type Transport = redis::Connection;

    fn connect(&self, endpoint: &Endpoint) -> Result<redis::Connection, ConnectionError> {
        trace!(%endpoint, "opening redis connection");
        let client = redis::Client::open(endpoint.url())?;
        let connection = match self.connect_timeout {
            Some(timeout) => client.get_connection_with_timeout(timeout)?,
            None => client.get_connection()?,
        };
        connection.set_read_timeout(self.io_timeout)?;
        connection.set_write_timeout(self.io_timeout)?;
        Ok(connection)
    }
}

impl Transport for redis::Connection {
    fn write_all(&mut self, packed: &[u8]) -> Result<(), ConnectionError> {
        self.send_packed_command(packed)?;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, ConnectionError> {
        match self.recv_response() {
            Ok(value) => Ok(frame_from_value(value)),
            // Error replies are replies, not connection failures.
            Err(err) if err.code().is_some() => Ok(Frame::Error(err.to_string())),
            Err(err) => Err(err.into()),
        }
    }
}

fn frame_from_value(value: Value) -> Frame {
    match value {
        Value::Nil => Frame::Nil,
        Value::Int(value) => Frame::Integer(value),
        Value::BulkString(bytes) => Frame::String(bytes),
        Value::Array(items) | Value::Set(items) => {
            Frame::Array(items.into_iter().map(frame_from_value).collect())
        }
        Value::Map(pairs) => Frame::Array(
            pairs
                .into_iter()
                .flat_map(|(field, value)| [frame_from_value(field), frame_from_value(value)])
                .collect(),
        ),
        Value::SimpleString(status) => Frame::Status(status),
        Value::Okay => Frame::Status("OK".to_owned()),
        Value::ServerError(err) => Frame::Error(RedisError::from(err).to_string()),
        other => Frame::Error(format!("unsupported reply: {other:?}")),
    }
}

/// One live link to the store.
///
/// A transport failure marks the connection broken: replies of queued
/// commands may be lost, so a broken connection refuses further use and must
/// be replaced.
pub struct Connection<T> {
    transport: T,
    pending: Vec<u8>,
    outstanding: usize,
    last_error: Option<ConnectionError>,
}

impl<T: Transport> Connection<T> {
    /// Wraps an open transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            pending: Vec::new(),
            outstanding: 0,
            last_error: None,
        }
    }

    /// Runs one command and waits for its reply.
    pub fn command(&mut self, cmd: &Cmd) -> Result<Reply<'static>, ConnectionError> {
        if self.outstanding > 0 {
            self.discard_outstanding()?;
        }
        self.append_command(cmd);
        self.get_reply()
    }

    /// Queues a command without waiting for its reply.
    ///
    /// Ignored once the connection is broken.
    pub fn append_command(&mut self, cmd: &Cmd) {
        if self.is_broken() {
            return;
        }
        self.pending.extend_from_slice(&cmd.get_packed_command());
        self.outstanding += 1;
    }

    /// Queues a command given as raw arguments, the first being its name.
    pub fn append_command_argv(&mut self, argv: &[&[u8]]) {
        let mut cmd = Cmd::new();
        for arg in argv {
            cmd.arg(*arg);
        }
        self.append_command(&cmd);
    }

    /// Sends queued commands, then reads the next reply in submission order.
    pub fn get_reply(&mut self) -> Result<Reply<'static>, ConnectionError> {
        if let Some(err) = &self.last_error {
            return Err(err.clone());
        }

        if !self.pending.is_empty() {
            let packed = std::mem::take(&mut self.pending);
            if let Err(err) = self.transport.write_all(&packed) {
                return Err(self.fail(err));
            }
        }

        match self.transport.read_frame() {
            Ok(frame) => {
                self.outstanding = self.outstanding.saturating_sub(1);
                Ok(Reply::owned(frame))
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Reads a reply and checks that it is the status `value`.
    ///
    /// Failures are logged with `context` and reported as `false`.
    pub fn expect_status(&mut self, value: &str, context: &str) -> bool {
        match self.get_reply() {
            Ok(reply) if reply.is_status_value(value) => true,
            Ok(reply) => {
                error!(
                    context,
                    expected = value,
                    received = %reply,
                    "unexpected reply while expecting a status message"
                );
                false
            }
            Err(err) => {
                error!(context, error = %err, "failed to read reply");
                false
            }
        }
    }

    /// Reads `n` replies, checking each is the status `value`.
    ///
    /// Every reply is consumed even after a mismatch, so the pipeline stays
    /// in step. Stops early only when the connection breaks.
    pub fn expect_n_status(&mut self, n: usize, value: &str, context: &str) -> bool {
        let mut ok = true;
        for _ in 0..n {
            if !self.expect_status(value, context) {
                ok = false;
                if self.is_broken() {
                    break;
                }
            }
        }
        ok
    }

    /// Reads and drops the replies of every queued command.
    pub fn discard_outstanding(&mut self) -> Result<(), ConnectionError> {
        while self.outstanding > 0 {
            let reply = self.get_reply()?;
            trace!(%reply, "discarding outstanding reply");
        }
        Ok(())
    }

    /// Number of queued commands whose replies have not been read.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Returns `true` once a transport failure has occurred.
    pub fn is_broken(&self) -> bool {
        self.last_error.is_some()
    }

    /// Diagnostic of the last transport failure.
    pub fn errstr(&self) -> String {
        self.last_error
            .as_ref()
            .map_or_else(|| "no error".to_owned(), ToString::to_string)
    }

    /// Marks the connection broken by `err`, replacing an earlier cause.
    pub(crate) fn mark_broken(&mut self, err: ConnectionError) {
        self.fail(err);
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub(crate) fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    fn fail(&mut self, err: ConnectionError) -> ConnectionError {
        self.pending = Vec::new();
        self.outstanding = 0;
        self.last_error = Some(err.clone());
        err
    }
}

impl<T> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("pending_bytes", &self.pending.len())
            .field("outstanding", &self.outstanding)
            .field("last_error", &self.last_error)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Transport replaying scripted replies and recording what was written.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        pub written: Vec<u8>,
        pub writes: usize,
        pub replies: VecDeque<Result<Frame, ConnectionError>>,
    }

    impl ScriptedTransport {
        pub(crate) fn with(replies: impl IntoIterator<Item = Frame>) -> Self {
            Self {
                replies: replies.into_iter().map(Ok).collect(),
                ..Self::default()
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn write_all(&mut self, packed: &[u8]) -> Result<(), ConnectionError> {
            self.writes += 1;
            self.written.extend_from_slice(packed);
            Ok(())
        }

        fn read_frame(&mut self) -> Result<Frame, ConnectionError> {
            self.replies.pop_front().unwrap_or(Err(ConnectionError::Eof))
        }
    }

    fn status(text: &str) -> Frame {
        Frame::Status(text.to_owned())
    }

    #[test]
    fn queued_commands_are_sent_in_one_write() {
        let transport = ScriptedTransport::with([status("OK"), status("QUEUED")]);
        let mut connection = Connection::new(transport);

        connection.append_command(&redis::cmd("MULTI"));
        connection.append_command_argv(&[b"DEL", b"k"]);
        assert_eq!(connection.outstanding(), 2);

        assert!(connection.expect_status("OK", "MULTI"));
        assert!(connection.expect_status("QUEUED", "DEL"));
        assert_eq!(connection.transport.writes, 1);
        assert_eq!(
            connection.transport.written,
            b"*1\r\n$5\r\nMULTI\r\n*2\r\n$3\r\nDEL\r\n$1\r\nk\r\n".to_vec()
        );
        assert_eq!(connection.outstanding(), 0);
    }

    #[test]
    fn expect_n_status_consumes_every_reply() {
        let transport = ScriptedTransport::with([
            status("QUEUED"),
            Frame::Error("ERR syntax error".to_owned()),
            status("QUEUED"),
            Frame::Integer(1),
        ]);
        let mut connection = Connection::new(transport);
        for _ in 0..3 {
            connection.append_command_argv(&[b"PING"]);
        }

        assert!(!connection.expect_n_status(3, "QUEUED", "queued command"));
        let next = connection.get_reply().unwrap();
        assert_eq!(next.integer(), 1);
    }

    #[test]
    fn transport_failure_breaks_the_connection() {
        let mut connection = Connection::new(ScriptedTransport::default());

        let err = connection.command(&redis::cmd("PING")).unwrap_err();
        assert_eq!(err, ConnectionError::Eof);
        assert!(connection.is_broken());
        assert_eq!(connection.errstr(), "server closed the connection");

        connection.transport.replies.push_back(Ok(status("PONG")));
        assert_eq!(
            connection.command(&redis::cmd("PING")).unwrap_err(),
            ConnectionError::Eof
        );
    }

    #[test]
    fn broken_connection_drops_queued_commands() {
        let mut connection = Connection::new(ScriptedTransport::default());
        connection.append_command_argv(&[b"SET", b"a", b"b"]);
        assert!(connection.get_reply().is_err());
        assert_eq!(connection.outstanding(), 0);

        for _ in 0..10 {
            connection.append_command_argv(&[b"SET", b"a", &[0u8; 1024]]);
        }
        assert_eq!(connection.outstanding(), 0);
        assert_eq!(connection.pending_bytes(), 0);
        assert_eq!(connection.transport.writes, 1);
    }

    #[test]
    fn broken_connection_reports_the_latest_cause() {
        let mut connection = Connection::new(ScriptedTransport::default());
        assert!(connection.command(&redis::cmd("PING")).is_err());

        let refused = ConnectionError::Other("connection refused".to_owned());
        connection.mark_broken(refused.clone());
        assert_eq!(connection.command(&redis::cmd("PING")).unwrap_err(), refused);
        assert!(connection.errstr().contains("connection refused"));
    }

    #[test]
    fn default_connector_has_finite_timeouts() {
        let connector = RedisConnector::default();
        assert_eq!(connector.connect_timeout, Some(DEFAULT_CONNECT_TIMEOUT));
        assert_eq!(connector.io_timeout, Some(DEFAULT_IO_TIMEOUT));
    }

    #[test]
    fn command_discards_stale_pipelined_replies() {
        let transport = ScriptedTransport::with([status("QUEUED"), Frame::Integer(0)]);
        let mut connection = Connection::new(transport);
        connection.append_command_argv(&[b"SET", b"a", b"b"]);

        let reply = connection.command(&redis::cmd("DBSIZE")).unwrap();
        assert_eq!(reply.integer(), 0);
    }

    #[test]
    fn endpoint_parsing() {
        assert_eq!(
            Endpoint::parse("127.0.0.1:6379").unwrap(),
            Endpoint::new("127.0.0.1", 6379)
        );
        assert!(matches!(
            Endpoint::parse("localhost"),
            Err(StorageError::InvalidArguments(_))
        ));
        assert!(matches!(
            Endpoint::parse("a:b:c"),
            Err(StorageError::InvalidArguments(_))
        ));
        assert!(matches!(
            Endpoint::parse("localhost:port"),
            Err(StorageError::InvalidPort(_))
        ));
        assert!(matches!(
            Endpoint::parse("localhost:-1"),
            Err(StorageError::InvalidPort(_))
        ));
        assert!(matches!(
            Endpoint::parse("localhost:70000"),
            Err(StorageError::InvalidPort(_))
        ));
        assert_eq!(Endpoint::new("h", 1).url(), "redis://h:1/");
    }
}
