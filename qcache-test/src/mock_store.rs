//! In-memory store speaking the Redis commands used by the Redis storage.
//!
//! Commands are parsed from the packed bytes a [`Connection`] writes, so the
//! whole path from token to wire is exercised. Supported: `GET`, `SET [PX]`,
//! `DEL`, `HSET`, `HGETALL`, `HDEL`, `MULTI`, `EXEC`, `DISCARD`, `WATCH`,
//! `UNWATCH`.
//!
//! [`Connection`]: qcache_redis::Connection

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use qcache_redis::{ConnectionError, Connector, Endpoint, Frame, Transport};

type Command = Vec<Vec<u8>>;

#[derive(Debug, Clone)]
enum Entry {
    String {
        value: Vec<u8>,
        expires: Option<Instant>,
    },
    Hash(BTreeMap<Vec<u8>, Vec<u8>>),
}

#[derive(Debug, Default)]
struct Data {
    keys: HashMap<Vec<u8>, Entry>,
    versions: HashMap<Vec<u8>, u64>,
    log: Vec<String>,
}

impl Data {
    fn touch(&mut self, key: &[u8]) {
        *self.versions.entry(key.to_vec()).or_default() += 1;
    }

    fn version(&self, key: &[u8]) -> u64 {
        self.versions.get(key).copied().unwrap_or_default()
    }

    fn live(&mut self, key: &[u8]) -> Option<&Entry> {
        let expired = matches!(
            self.keys.get(key),
            Some(Entry::String { expires: Some(at), .. }) if *at <= Instant::now()
        );
        if expired {
            self.keys.remove(key);
            self.touch(key);
        }
        self.keys.get(key)
    }

    fn apply(&mut self, command: &Command) -> Frame {
        let name = command_name(command);
        let args = &command[1..];
        match (name.as_str(), args.len()) {
            ("GET", 1) => match self.live(&args[0]) {
                Some(Entry::String { value, .. }) => Frame::String(value.clone()),
                Some(Entry::Hash(_)) => wrong_type(),
                None => Frame::Nil,
            },
            ("SET", 2) | ("SET", 4) => {
                let expires = match args.get(2..) {
                    Some([px, ms]) if px.eq_ignore_ascii_case(b"PX") => match parse_u64(ms) {
                        Some(ms) if ms > 0 => Some(Instant::now() + Duration::from_millis(ms)),
                        _ => return error("ERR invalid expire time in 'set' command"),
                    },
                    Some([]) => None,
                    _ => return error("ERR syntax error"),
                };
                self.keys.insert(
                    args[0].clone(),
                    Entry::String {
                        value: args[1].clone(),
                        expires,
                    },
                );
                self.touch(&args[0]);
                Frame::Status("OK".to_owned())
            }
            ("DEL", n) if n >= 1 => {
                let mut removed = 0;
                for key in args {
                    if self.live(key).is_some() {
                        self.keys.remove(key);
                        self.touch(key);
                        removed += 1;
                    }
                }
                Frame::Integer(removed)
            }
            ("HSET", 3) => {
                let added = match self
                    .keys
                    .entry(args[0].clone())
                    .or_insert_with(|| Entry::Hash(BTreeMap::new()))
                {
                    Entry::Hash(fields) => fields.insert(args[1].clone(), args[2].clone()).is_none(),
                    Entry::String { .. } => return wrong_type(),
                };
                self.touch(&args[0]);
                Frame::Integer(i64::from(added))
            }
            ("HGETALL", 1) => match self.live(&args[0]) {
                Some(Entry::Hash(fields)) => Frame::Array(
                    fields
                        .iter()
                        .flat_map(|(field, value)| {
                            [Frame::String(field.clone()), Frame::String(value.clone())]
                        })
                        .collect(),
                ),
                Some(Entry::String { .. }) => wrong_type(),
                None => Frame::Array(Vec::new()),
            },
            ("HDEL", n) if n >= 2 => {
                let (removed, emptied) = match self.keys.get_mut(&args[0]) {
                    Some(Entry::Hash(fields)) => {
                        let removed = args[1..]
                            .iter()
                            .filter(|field| fields.remove(*field).is_some())
                            .count();
                        (removed, fields.is_empty())
                    }
                    Some(Entry::String { .. }) => return wrong_type(),
                    None => (0, false),
                };
                if emptied {
                    self.keys.remove(&args[0]);
                }
                if removed > 0 {
                    self.touch(&args[0]);
                }
                Frame::Integer(removed as i64)
            }
            ("GET" | "SET" | "DEL" | "HSET" | "HGETALL" | "HDEL", _) => error(&format!(
                "ERR wrong number of arguments for '{}' command",
                name.to_lowercase()
            )),
            _ => error(&format!("ERR unknown command '{name}'")),
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    refuse_connections: AtomicBool,
    drop_on_exec: AtomicUsize,
    conflicting_execs: AtomicUsize,
    reject: Mutex<Option<String>>,
}

/// Shared in-memory store.
///
/// Clones share the same data; every transport opened through
/// [`MockStore::connector`] talks to it.
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    data: Arc<Mutex<Data>>,
    faults: Arc<Faults>,
    connections: Arc<AtomicUsize>,
}

impl MockStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector opening transports to this store.
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            store: self.clone(),
        }
    }

    fn data(&self) -> MutexGuard<'_, Data> {
        self.data.lock().unwrap()
    }

    /// Number of transports opened so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Makes further connection attempts fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.faults.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Drops the connection instead of answering the next `EXEC`.
    ///
    /// The transaction is discarded.
    pub fn drop_connection_on_next_exec(&self) {
        self.faults.drop_on_exec.fetch_add(1, Ordering::SeqCst);
    }

    /// Makes the next `count` watched `EXEC`s see a concurrent modification.
    pub fn conflict_next_execs(&self, count: usize) {
        self.faults.conflicting_execs.fetch_add(count, Ordering::SeqCst);
    }

    /// Rejects the next `command` queued inside a transaction, which then
    /// aborts on `EXEC`.
    pub fn reject_next_queued(&self, command: &str) {
        *self.faults.reject.lock().unwrap() = Some(command.to_uppercase());
    }

    /// Returns `true` if a value is stored under `key`.
    pub fn contains(&self, key: &[u8]) -> bool {
        matches!(self.data().live(key), Some(Entry::String { .. }))
    }

    /// Keys indexed under `tag`.
    pub fn tag_members(&self, tag: &str) -> Vec<Vec<u8>> {
        match self.data().live(tag.as_bytes()) {
            Some(Entry::Hash(fields)) => fields.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Number of keys of any type.
    pub fn len(&self) -> usize {
        self.data().keys.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Executed commands, each rendered as its arguments joined by spaces.
    ///
    /// Binary arguments are rendered lossily.
    pub fn commands(&self) -> Vec<String> {
        self.data().log.clone()
    }

    /// Writes a value directly, as another client would.
    pub fn insert(&self, key: &[u8], value: &[u8]) {
        let mut data = self.data();
        data.apply(&vec![b"SET".to_vec(), key.to_vec(), value.to_vec()]);
    }
}

/// Opens [`MockTransport`]s to a [`MockStore`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    store: MockStore,
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    fn connect(&self, endpoint: &Endpoint) -> Result<MockTransport, ConnectionError> {
        if self.store.faults.refuse_connections.load(Ordering::SeqCst) {
            return Err(ConnectionError::Other(format!(
                "could not connect to {endpoint}"
            )));
        }
        self.store.connections.fetch_add(1, Ordering::SeqCst);
        Ok(MockTransport {
            store: self.store.clone(),
            replies: VecDeque::new(),
            queued: None,
            aborted: false,
            watched: Vec::new(),
            closed: false,
        })
    }
}

/// One connection to a [`MockStore`].
#[derive(Debug)]
pub struct MockTransport {
    store: MockStore,
    replies: VecDeque<Frame>,
    queued: Option<Vec<Command>>,
    aborted: bool,
    watched: Vec<(Vec<u8>, u64)>,
    closed: bool,
}

impl MockTransport {
    fn execute(&mut self, command: Command) -> Option<Frame> {
        let name = command_name(&command);
        let mut data = self.store.data();
        data.log.push(render(&command));

        if let Some(queued) = self.queued.as_mut() {
            match name.as_str() {
                "EXEC" => {}
                "DISCARD" => {
                    self.queued = None;
                    self.aborted = false;
                    self.watched.clear();
                    return Some(Frame::Status("OK".to_owned()));
                }
                "MULTI" => return Some(error("ERR MULTI calls can not be nested")),
                "WATCH" => return Some(error("ERR WATCH inside MULTI is not allowed")),
                _ => {
                    let mut reject = self.store.faults.reject.lock().unwrap();
                    if reject.as_deref() == Some(name.as_str()) {
                        *reject = None;
                        self.aborted = true;
                        return Some(error("ERR rejected by fault injection"));
                    }
                    queued.push(command);
                    return Some(Frame::Status("QUEUED".to_owned()));
                }
            }
        }

        match name.as_str() {
            "MULTI" => {
                self.queued = Some(Vec::new());
                Some(Frame::Status("OK".to_owned()))
            }
            "EXEC" => {
                let Some(queued) = self.queued.take() else {
                    return Some(error("ERR EXEC without MULTI"));
                };
                let aborted = std::mem::take(&mut self.aborted);
                let watched = std::mem::take(&mut self.watched);

                if take_one(&self.store.faults.drop_on_exec) {
                    self.closed = true;
                    return None;
                }
                if aborted {
                    return Some(error(
                        "EXECABORT Transaction discarded because of previous errors.",
                    ));
                }
                if !watched.is_empty() && take_one(&self.store.faults.conflicting_execs) {
                    for (key, _) in &watched {
                        data.touch(key);
                    }
                }
                if watched.iter().any(|(key, version)| data.version(key) != *version) {
                    return Some(Frame::Nil);
                }
                Some(Frame::Array(
                    queued.iter().map(|command| data.apply(command)).collect(),
                ))
            }
            "DISCARD" => Some(error("ERR DISCARD without MULTI")),
            "WATCH" if command.len() > 1 => {
                for key in &command[1..] {
                    let version = data.version(key);
                    self.watched.push((key.clone(), version));
                }
                Some(Frame::Status("OK".to_owned()))
            }
            "UNWATCH" => {
                self.watched.clear();
                Some(Frame::Status("OK".to_owned()))
            }
            _ => Some(data.apply(&command)),
        }
    }
}

impl Transport for MockTransport {
    fn write_all(&mut self, packed: &[u8]) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Io("broken pipe".to_owned()));
        }
        let commands = parse_commands(packed).map_err(ConnectionError::Protocol)?;
        for command in commands {
            match self.execute(command) {
                Some(reply) => self.replies.push_back(reply),
                None => break,
            }
        }
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, ConnectionError> {
        match self.replies.pop_front() {
            Some(frame) => Ok(frame),
            None if self.closed => Err(ConnectionError::Eof),
            None => Err(ConnectionError::Io("read timed out".to_owned())),
        }
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn command_name(command: &Command) -> String {
    command
        .first()
        .map(|name| String::from_utf8_lossy(name).to_uppercase())
        .unwrap_or_default()
}

fn render(command: &Command) -> String {
    command
        .iter()
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn error(text: &str) -> Frame {
    Frame::Error(text.to_owned())
}

fn wrong_type() -> Frame {
    error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

fn parse_u64(bytes: &[u8]) -> Option<u64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Splits packed commands (`*N` arrays of `$len` bulk strings).
fn parse_commands(mut input: &[u8]) -> Result<Vec<Command>, String> {
    fn line<'a>(input: &mut &'a [u8], prefix: u8) -> Result<usize, String> {
        let end = input
            .windows(2)
            .position(|window| window == b"\r\n")
            .ok_or("unterminated line")?;
        let (head, rest) = input.split_at(end);
        *input = &rest[2..];
        match head.split_first() {
            Some((first, digits)) if *first == prefix => {
                parse_u64(digits).map(|n| n as usize).ok_or_else(|| "bad length".to_owned())
            }
            _ => Err(format!("expected '{}'", prefix as char)),
        }
    }

    let mut commands = Vec::new();
    while !input.is_empty() {
        let count = line(&mut input, b'*')?;
        let mut command = Vec::with_capacity(count);
        for _ in 0..count {
            let len = line(&mut input, b'$')?;
            if input.len() < len + 2 {
                return Err("truncated bulk string".to_owned());
            }
            command.push(input[..len].to_vec());
            input = &input[len + 2..];
        }
        commands.push(command);
    }
    Ok(commands)
}
