//! Topic-based notification transport for task status events.
//!
//! [`ConnectionContext`] is the seam between the dispatcher and a message
//! broker. A context owns one connection; sessions, producers and consumers
//! are created from it. [`StatusPublisher`] sits on top and publishes
//! [`TaskStatus`] events as JSON so external listeners can follow task
//! progress.

pub mod memory;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{SchedulerError, TaskOutcome, TaskStatus, TransportError};
use crate::util::clock::now_ms;

pub use memory::InMemoryConnection;

/// Properties used to open a connection.
pub type ConnectionProperties = HashMap<String, String>;

/// Property naming the broker to connect to.
pub const BROKER_URL: &str = "broker.url";

/// Optional property identifying this client to the broker.
pub const CLIENT_ID: &str = "client.id";

/// Message property carrying the task key.
pub const TASK_KEY_PROPERTY: &str = "task_key";
/// Message property carrying the task kind.
pub const TASK_KIND_PROPERTY: &str = "task_kind";
/// Message property carrying the completion state.
pub const STATE_PROPERTY: &str = "state";

/// Acknowledgement mode of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// The session acknowledges each message on receipt.
    #[default]
    Auto,
    /// The client acknowledges explicitly.
    Client,
    /// Lazy acknowledgement; duplicates are possible.
    DupsOk,
    /// Messages are grouped in transactions.
    Transacted,
}

/// A message on a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Destination topic.
    pub topic: String,
    /// Header properties, matched by selectors.
    pub properties: HashMap<String, String>,
    /// Payload text.
    pub body: String,
    /// Send time in milliseconds since epoch.
    pub sent_at_ms: u128,
}

/// Property filter in the form `name = 'value' [AND name = 'value' ...]`.
///
/// An empty expression matches every message. The `AND` keyword is
/// case-insensitive; literals cannot contain a single quote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    clauses: Vec<(String, String)>,
}

impl Selector {
    /// Parse a selector expression.
    ///
    /// # Errors
    ///
    /// `TransportError::Naming` if the expression is malformed.
    pub fn parse(expr: &str) -> Result<Self, TransportError> {
        let malformed = || TransportError::Naming(format!("malformed selector: {expr}"));

        let mut clauses = Vec::new();
        let mut rest = expr.trim();
        while !rest.is_empty() {
            let (name, after) = rest.split_once('=').ok_or_else(malformed)?;
            let name = name.trim();
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
            {
                return Err(malformed());
            }
            let literal = after.trim_start().strip_prefix('\'').ok_or_else(malformed)?;
            let end = literal.find('\'').ok_or_else(malformed)?;
            clauses.push((name.to_owned(), literal[..end].to_owned()));

            rest = literal[end + 1..].trim_start();
            if rest.is_empty() {
                break;
            }
            let split = rest.find(char::is_whitespace).ok_or_else(malformed)?;
            let (keyword, tail) = rest.split_at(split);
            if !keyword.eq_ignore_ascii_case("and") {
                return Err(malformed());
            }
            rest = tail.trim_start();
            if rest.is_empty() {
                return Err(malformed());
            }
        }
        Ok(Self { clauses })
    }

    /// Whether every clause matches a property of `message`.
    pub fn matches(&self, message: &Message) -> bool {
        self.clauses
            .iter()
            .all(|(name, value)| message.properties.get(name) == Some(value))
    }
}

/// Receives asynchronous connection failures.
pub trait ExceptionListener: Send + Sync {
    /// Called once per failure, from the thread that detected it.
    fn on_exception(&self, err: &TransportError);
}

impl<F> ExceptionListener for F
where
    F: Fn(&TransportError) + Send + Sync,
{
    fn on_exception(&self, err: &TransportError) {
        self(err);
    }
}

/// Delivers messages to a broker's subscribers.
pub trait MessageSink: Send + Sync {
    /// Publish `message`, returning how many subscribers received it.
    ///
    /// # Errors
    ///
    /// `TransportError::NotConnected` if the connection is closed.
    fn publish(&self, message: Message) -> Result<usize, TransportError>;
}

/// Connection to a message broker.
pub trait ConnectionContext: Send + Sync {
    /// Open the connection described by `props`.
    ///
    /// # Errors
    ///
    /// `TransportError::Naming` for missing or unsupported properties.
    fn create_connection(&self, props: &ConnectionProperties) -> Result<(), TransportError>;

    /// Install the listener notified of connection failures.
    ///
    /// # Errors
    ///
    /// `TransportError::NotConnected` if no connection is open.
    fn set_exception_listener(&self, listener: Arc<dyn ExceptionListener>) -> Result<(), TransportError>;

    /// Whether a connection is open.
    fn is_connection_initialized(&self) -> bool;

    /// Create a new session.
    ///
    /// # Errors
    ///
    /// `TransportError::NotConnected` if no connection is open.
    fn create_session(&self, mode: AckMode) -> Result<Session, TransportError>;

    /// Subscribe to `topic`, receiving only messages matching `selector`.
    ///
    /// # Errors
    ///
    /// - `TransportError::NotConnected` if no connection is open
    /// - `TransportError::Disconnected` if `session` is closed
    /// - `TransportError::Naming` for a malformed selector
    fn create_consumer(
        &self,
        session: &Session,
        topic: &str,
        selector: Option<&str>,
    ) -> Result<TopicConsumer, TransportError>;

    /// Create a producer publishing to `topic`.
    ///
    /// # Errors
    ///
    /// - `TransportError::NotConnected` if no connection is open
    /// - `TransportError::Disconnected` if `session` is closed
    fn create_producer(&self, session: &Session, topic: &str) -> Result<TopicProducer, TransportError>;

    /// Session bound to the calling thread, created on first use.
    ///
    /// # Errors
    ///
    /// `TransportError::NotConnected` if no connection is open.
    fn create_thread_local_session(&self, mode: AckMode) -> Result<Session, TransportError>;

    /// Close the connection and every session created from it.
    fn close(&self);
}

/// A session created by a [`ConnectionContext`]. Clones share state.
#[derive(Debug, Clone)]
pub struct Session {
    id: u64,
    mode: AckMode,
    closed: Arc<AtomicBool>,
}

impl Session {
    /// Open session with `id`.
    pub fn new(id: u64, mode: AckMode) -> Self {
        Self {
            id,
            mode,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Session id, unique within its connection.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Acknowledgement mode.
    pub const fn ack_mode(&self) -> AckMode {
        self.mode
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the session. Producers created from it stop sending.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// `Err(Disconnected)` if closed.
    ///
    /// # Errors
    ///
    /// `TransportError::Disconnected` if the session is closed.
    pub fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Disconnected(format!("session {} closed", self.id)))
        } else {
            Ok(())
        }
    }
}

/// Publishes messages on one topic.
#[derive(Clone)]
pub struct TopicProducer {
    topic: String,
    session: Session,
    sink: Arc<dyn MessageSink>,
}

impl TopicProducer {
    /// Producer for `topic` delivering through `sink`.
    pub fn new(topic: impl Into<String>, session: Session, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            topic: topic.into(),
            session,
            sink,
        }
    }

    /// Destination topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Send `body` with `properties`, returning the number of deliveries.
    ///
    /// # Errors
    ///
    /// - `TransportError::Disconnected` if the session is closed
    /// - `TransportError::NotConnected` if the connection is closed
    pub fn send(
        &self,
        body: impl Into<String>,
        properties: HashMap<String, String>,
    ) -> Result<usize, TransportError> {
        self.session.ensure_open()?;
        self.sink.publish(Message {
            topic: self.topic.clone(),
            properties,
            body: body.into(),
            sent_at_ms: now_ms(),
        })
    }
}

impl std::fmt::Debug for TopicProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicProducer")
            .field("topic", &self.topic)
            .field("session", &self.session.id)
            .finish_non_exhaustive()
    }
}

/// Receives messages from one topic.
#[derive(Debug)]
pub struct TopicConsumer {
    topic: String,
    rx: Receiver<Message>,
}

impl TopicConsumer {
    /// Consumer for `topic` reading from `rx`.
    pub const fn new(topic: String, rx: Receiver<Message>) -> Self {
        Self { topic, rx }
    }

    /// Source topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait up to `timeout` for the next message.
    ///
    /// # Errors
    ///
    /// `TransportError::Disconnected` once the connection is closed and
    /// buffered messages are drained.
    pub fn receive(&self, timeout: Duration) -> Result<Option<Message>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected(self.topic.clone())),
        }
    }

    /// Next buffered message, without waiting.
    ///
    /// # Errors
    ///
    /// `TransportError::Disconnected` once the connection is closed and
    /// buffered messages are drained.
    pub fn try_receive(&self) -> Result<Option<Message>, TransportError> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::Disconnected(self.topic.clone())),
        }
    }
}

/// Publishes task status events as JSON.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    producer: TopicProducer,
}

impl StatusPublisher {
    /// Publisher sending through `producer`.
    pub const fn new(producer: TopicProducer) -> Self {
        Self { producer }
    }

    /// Publisher on `topic` using the calling thread's session of `ctx`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Transport` if the session or producer cannot be
    /// created.
    pub fn connect(ctx: &dyn ConnectionContext, topic: &str) -> Result<Self, SchedulerError> {
        let session = ctx.create_thread_local_session(AckMode::Auto)?;
        Ok(Self::new(ctx.create_producer(&session, topic)?))
    }

    /// Publish `status`. Key, kind and state are copied into message
    /// properties so consumers can select on them.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Transport` on encoding or delivery failure.
    pub fn publish(&self, status: &TaskStatus) -> Result<usize, SchedulerError> {
        let body = serde_json::to_string(status).map_err(|e| TransportError::Encoding(e.to_string()))?;
        let properties = HashMap::from([
            (TASK_KEY_PROPERTY.to_owned(), status.key.clone()),
            (TASK_KIND_PROPERTY.to_owned(), status.kind.as_str().to_owned()),
            (STATE_PROPERTY.to_owned(), status.state.as_str().to_owned()),
        ]);
        let delivered = self.producer.send(body, properties)?;
        debug!(
            task = %status.key,
            state = status.state.as_str(),
            topic = self.producer.topic(),
            delivered,
            "task status published"
        );
        Ok(delivered)
    }

    /// Publish the status of `outcome`.
    ///
    /// # Errors
    ///
    /// See [`publish`](Self::publish).
    pub fn publish_outcome<R>(&self, outcome: &TaskOutcome<R>) -> Result<usize, SchedulerError> {
        self.publish(&outcome.status())
    }
}
