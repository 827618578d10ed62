//! Per-session token and the command sequences behind each operation.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use qcache_core::{
    BlockingPool, CacheKey, CacheResult, CachedValue, GetCallback, InvalidationTag, LookupFlags,
    ResultCallback, Token, Worker,
};
use smol_str::SmolStr;
use tracing::{Span, debug, debug_span, error, trace, warn};

use crate::connection::{Connection, Connector, Endpoint, Transport};
use crate::metrics;
use crate::reply::Frame;

/// Marker owned by the session; completions hold it weakly.
#[derive(Debug)]
struct Session;

struct Shared<C: Connector> {
    storage: SmolStr,
    endpoint: Endpoint,
    connector: Arc<C>,
    connection: Mutex<Connection<C::Transport>>,
    ttl: Duration,
    invalidate_attempts: u32,
    pool: BlockingPool,
    worker: Arc<dyn Worker>,
}

impl<C: Connector> Shared<C> {
    /// Runs `op` with exclusive access to the connection, replacing it first
    /// if an earlier failure broke it.
    ///
    /// When the replacement fails too, `op` sees a connection broken by that
    /// failure and completes without any I/O.
    fn with_connection<R>(&self, op: impl FnOnce(&mut Connection<C::Transport>) -> R) -> R {
        let mut connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if connection.is_broken() {
            debug!(endpoint = %self.endpoint, cause = %connection.errstr(), "reconnecting");
            match self.connector.connect(&self.endpoint) {
                Ok(transport) => *connection = Connection::new(transport),
                Err(err) => {
                    error!(endpoint = %self.endpoint, error = %err, "could not reconnect to redis");
                    connection.mark_broken(err);
                }
            }
        }

        op(&mut *connection)
    }
}

/// Everything a token needs besides its session's worker.
pub(crate) struct TokenParts<C> {
    pub storage: SmolStr,
    pub endpoint: Endpoint,
    pub connector: Arc<C>,
    pub ttl: Duration,
    pub invalidate_attempts: u32,
    pub pool: BlockingPool,
}

/// Session handle of [`RedisStorage`](crate::RedisStorage).
///
/// Owns one connection. Operations run on the storage's blocking pool, one at
/// a time per token, and complete on the session's worker. Dropping the token
/// discards the results of operations still in flight.
pub struct RedisToken<C: Connector> {
    shared: Arc<Shared<C>>,
    session: Arc<Session>,
}

impl<C: Connector> RedisToken<C> {
    pub(crate) fn connect(
        parts: TokenParts<C>,
        worker: Arc<dyn Worker>,
    ) -> Result<Self, crate::ConnectionError> {
        let transport = parts.connector.connect(&parts.endpoint)?;
        debug!(storage = %parts.storage, endpoint = %parts.endpoint, "token connected");

        Ok(Self {
            shared: Arc::new(Shared {
                storage: parts.storage,
                endpoint: parts.endpoint,
                connector: parts.connector,
                connection: Mutex::new(Connection::new(transport)),
                ttl: parts.ttl,
                invalidate_attempts: parts.invalidate_attempts.max(1),
                pool: parts.pool,
                worker,
            }),
            session: Arc::new(Session),
        })
    }

    /// Endpoint of the store.
    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    /// Runs `op` on the pool and hands its outcome to `deliver` on the
    /// session's worker, unless the session is gone by then.
    fn submit<X, F, D>(&self, operation: &'static str, span: Span, op: F, deliver: D) -> CacheResult
    where
        X: Send + 'static,
        F: FnOnce(&mut Connection<C::Transport>) -> (CacheResult, X) + Send + 'static,
        D: FnOnce(CacheResult, X) + Send + 'static,
    {
        let shared = self.shared.clone();
        let session: Weak<Session> = Arc::downgrade(&self.session);

        self.shared.pool.execute(operation, move || {
            let timer = metrics::Timer::new();
            let (result, extra) = {
                let _entered = span.enter();
                shared.with_connection(op)
            };
            metrics::record_operation(&shared.storage, operation, result, timer.elapsed());

            shared.worker.execute(Box::new(move || {
                if session.upgrade().is_some() {
                    deliver(result, extra);
                } else {
                    trace!(operation, result = result.as_str(), "session closed, result discarded");
                }
            }));
        });

        CacheResult::Pending
    }
}

impl<C: Connector> Token for RedisToken<C> {
    fn get_value(
        &self,
        key: &CacheKey,
        flags: LookupFlags,
        soft_ttl: Option<Duration>,
        hard_ttl: Option<Duration>,
        callback: GetCallback,
    ) -> CacheResult {
        // The store applies a single expiry when the value is written.
        trace!(%key, ?flags, ?soft_ttl, ?hard_ttl, "get_value");
        let span = debug_span!("qcache.redis.get", storage = %self.shared.storage, %key);
        let key = key.to_bytes();

        self.submit(
            "get",
            span,
            move |connection| get(connection, &key),
            move |result, value| callback(result, value),
        )
    }

    fn put_value(
        &self,
        key: &CacheKey,
        tags: &[InvalidationTag],
        value: &CachedValue,
        callback: ResultCallback,
    ) -> CacheResult {
        let span = debug_span!(
            "qcache.redis.put",
            storage = %self.shared.storage,
            %key,
            tags = tags.len(),
            bytes = value.len()
        );
        let key = key.to_bytes();
        let tags = tags.to_vec();
        let value = value.clone();
        let ttl = self.shared.ttl;

        self.submit(
            "put",
            span,
            move |connection| {
                let result = put(connection, &key, &tags, &value, ttl);
                (result, value)
            },
            move |result, value| {
                callback(result);
                drop(value);
            },
        )
    }

    fn del_value(&self, key: &CacheKey, callback: ResultCallback) -> CacheResult {
        let span = debug_span!("qcache.redis.del", storage = %self.shared.storage, %key);
        let key = key.to_bytes();

        self.submit(
            "del",
            span,
            move |connection| (del(connection, &key), ()),
            move |result, ()| callback(result),
        )
    }

    fn invalidate(&self, tags: &[InvalidationTag], callback: ResultCallback) -> CacheResult {
        let span = debug_span!(
            "qcache.redis.invalidate",
            storage = %self.shared.storage,
            tags = tags.len()
        );
        let tags = tags.to_vec();
        let attempts = self.shared.invalidate_attempts;

        self.submit(
            "invalidate",
            span,
            move |connection| (invalidate(connection, &tags, attempts), ()),
            move |result, ()| callback(result),
        )
    }
}

impl<C: Connector> Drop for RedisToken<C> {
    fn drop(&mut self) {
        trace!(storage = %self.shared.storage, "token dropped");
    }
}

pub(crate) fn get<T: Transport>(
    connection: &mut Connection<T>,
    key: &[u8],
) -> (CacheResult, Option<CachedValue>) {
    let mut cmd = redis::cmd("GET");
    cmd.arg(key);

    match connection.command(&cmd) {
        Ok(reply) if reply.is_string() => match reply.into_frame() {
            Some(Frame::String(bytes)) => (CacheResult::Ok, Some(CachedValue::from(bytes))),
            _ => (CacheResult::Error, None),
        },
        Ok(reply) if reply.is_nil() => (CacheResult::NotFound, None),
        Ok(reply) => {
            error!(received = %reply, "unexpected redis reply to GET");
            (CacheResult::Error, None)
        }
        Err(err) => {
            error!(error = %err, "failed to fetch value from redis");
            (CacheResult::Error, None)
        }
    }
}

pub(crate) fn put<T: Transport>(
    connection: &mut Connection<T>,
    key: &[u8],
    tags: &[InvalidationTag],
    value: &[u8],
    ttl: Duration,
) -> CacheResult {
    connection.append_command(&redis::cmd("MULTI"));
    for tag in tags {
        connection.append_command(redis::cmd("HSET").arg(tag.as_bytes()).arg(key).arg("1"));
    }
    let mut set = redis::cmd("SET");
    set.arg(key).arg(value);
    if !ttl.is_zero() {
        set.arg("PX").arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
    }
    connection.append_command(&set);
    connection.append_command(&redis::cmd("EXEC"));

    let started = connection.expect_status("OK", "MULTI when storing value");
    if connection.is_broken() {
        return CacheResult::Error;
    }
    let queued = connection.expect_n_status(tags.len() + 1, "QUEUED", "queuing value update");
    if connection.is_broken() {
        return CacheResult::Error;
    }

    let committed = match connection.get_reply() {
        Ok(reply) if reply.is_array() && reply.elements() == tags.len() + 1 => {
            let stored = reply.element(tags.len());
            if stored.is_status_value("OK") {
                true
            } else {
                error!(received = %stored, "value was not stored by EXEC");
                false
            }
        }
        Ok(reply) => {
            error!(
                expected = tags.len() + 1,
                received = %reply,
                "unexpected redis reply to EXEC when storing value"
            );
            false
        }
        Err(err) => {
            error!(error = %err, "failed to read EXEC reply when storing value");
            false
        }
    };

    if started && queued && committed {
        CacheResult::Ok
    } else {
        CacheResult::Error
    }
}

pub(crate) fn del<T: Transport>(connection: &mut Connection<T>, key: &[u8]) -> CacheResult {
    let mut cmd = redis::cmd("DEL");
    cmd.arg(key);

    match connection.command(&cmd) {
        Ok(reply) if reply.is_integer() => match reply.integer() {
            0 => CacheResult::NotFound,
            1 => CacheResult::Ok,
            count => {
                warn!(count, "DEL of a single key removed an unexpected number of values");
                CacheResult::Ok
            }
        },
        Ok(reply) => {
            error!(received = %reply, "unexpected redis reply to DEL");
            CacheResult::Error
        }
        Err(err) => {
            error!(error = %err, "failed to delete value from redis");
            CacheResult::Error
        }
    }
}

enum Attempt {
    Done(CacheResult),
    Conflict,
}

pub(crate) fn invalidate<T: Transport>(
    connection: &mut Connection<T>,
    tags: &[InvalidationTag],
    attempts: u32,
) -> CacheResult {
    if tags.is_empty() {
        return CacheResult::Ok;
    }

    for attempt in 1..=attempts {
        match invalidate_once(connection, tags) {
            Attempt::Done(result) => return result,
            Attempt::Conflict => {
                debug!(attempt, "tag index changed during invalidation, retrying");
            }
        }
    }

    error!(attempts, "tag index kept changing, invalidation abandoned");
    CacheResult::Error
}

fn invalidate_once<T: Transport>(connection: &mut Connection<T>, tags: &[InvalidationTag]) -> Attempt {
    let mut watch = redis::cmd("WATCH");
    for tag in tags {
        watch.arg(tag.as_bytes());
    }
    connection.append_command(&watch);
    for tag in tags {
        connection.append_command(redis::cmd("HGETALL").arg(tag.as_bytes()));
    }

    let watching = connection.expect_status("OK", "WATCH of invalidation tags");

    let mut per_tag: Vec<(&InvalidationTag, Vec<Vec<u8>>)> = Vec::with_capacity(tags.len());
    for tag in tags {
        let reply = match connection.get_reply() {
            Ok(reply) => reply,
            Err(err) => {
                error!(%tag, error = %err, "could not read keys of invalidation tag");
                return Attempt::Done(CacheResult::Error);
            }
        };
        if !reply.is_array() {
            warn!(%tag, received = %reply, "unexpected redis reply to HGETALL");
            continue;
        }

        // Fields and values alternate; the fields are the keys.
        let mut keys = Vec::new();
        for i in (0..reply.elements()).step_by(2) {
            let field = reply.element(i);
            if field.is_string() {
                keys.push(field.str().to_vec());
            } else {
                error!(%tag, received = %field, "unexpected type in invalidation index");
            }
        }
        if !keys.is_empty() {
            per_tag.push((tag, keys));
        }
    }

    if !watching {
        unwatch(connection);
        return Attempt::Done(CacheResult::Error);
    }

    if per_tag.is_empty() {
        trace!("no keys indexed under the invalidated tags");
        unwatch(connection);
        return Attempt::Done(CacheResult::Ok);
    }

    let all_keys: BTreeSet<&[u8]> = per_tag
        .iter()
        .flat_map(|(_, keys)| keys.iter().map(Vec::as_slice))
        .collect();

    connection.append_command(&redis::cmd("MULTI"));
    for (tag, keys) in &per_tag {
        let mut argv: Vec<&[u8]> = Vec::with_capacity(keys.len() + 2);
        argv.push(b"HDEL");
        argv.push(tag.as_bytes());
        argv.extend(keys.iter().map(Vec::as_slice));
        connection.append_command_argv(&argv);
    }
    let mut argv: Vec<&[u8]> = Vec::with_capacity(all_keys.len() + 1);
    argv.push(b"DEL");
    argv.extend(all_keys.iter().copied());
    connection.append_command_argv(&argv);
    connection.append_command(&redis::cmd("EXEC"));

    let queued_commands = per_tag.len() + 1;
    let started = connection.expect_status("OK", "MULTI when invalidating");
    if connection.is_broken() {
        return Attempt::Done(CacheResult::Error);
    }
    let queued = connection.expect_n_status(queued_commands, "QUEUED", "queuing invalidation");
    if connection.is_broken() {
        return Attempt::Done(CacheResult::Error);
    }

    match connection.get_reply() {
        Ok(reply) if reply.is_nil() => Attempt::Conflict,
        Ok(reply) if reply.is_array() && reply.elements() == queued_commands => {
            if started && queued {
                debug!(keys = all_keys.len(), "invalidated");
                Attempt::Done(CacheResult::Ok)
            } else {
                Attempt::Done(CacheResult::Error)
            }
        }
        Ok(reply) => {
            error!(
                expected = queued_commands,
                received = %reply,
                "unexpected redis reply to EXEC when invalidating"
            );
            Attempt::Done(CacheResult::Error)
        }
        Err(err) => {
            error!(error = %err, "failed to read EXEC reply when invalidating");
            Attempt::Done(CacheResult::Error)
        }
    }
}

fn unwatch<T: Transport>(connection: &mut Connection<T>) {
    if connection.is_broken() {
        return;
    }
    match connection.command(&redis::cmd("UNWATCH")) {
        Ok(reply) if reply.is_status_value("OK") => {}
        Ok(reply) => warn!(received = %reply, "unexpected redis reply to UNWATCH"),
        Err(err) => warn!(error = %err, "failed to release watched tags"),
    }
}
