//! In-process broker backed by crossbeam channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::core::TransportError;

use super::{
    AckMode, ConnectionContext, ConnectionProperties, ExceptionListener, Message, MessageSink,
    Selector, Session, TopicConsumer, TopicProducer, BROKER_URL, CLIENT_ID,
};

/// URL scheme accepted by [`InMemoryConnection`].
pub const MEMORY_SCHEME: &str = "memory://";

struct Subscriber {
    selector: Selector,
    tx: Sender<Message>,
}

#[derive(Default)]
struct Broker {
    connected: AtomicBool,
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl MessageSink for Broker {
    fn publish(&self, message: Message) -> Result<usize, TransportError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(TransportError::NotConnected);
        }
        let mut topics = self.topics.write();
        let Some(subscribers) = topics.get_mut(&message.topic) else {
            return Ok(0);
        };
        let mut delivered = 0;
        // Subscribers whose consumer was dropped are pruned here.
        subscribers.retain(|sub| {
            if !sub.selector.matches(&message) {
                return true;
            }
            let sent = sub.tx.send(message.clone()).is_ok();
            if sent {
                delivered += 1;
            }
            sent
        });
        Ok(delivered)
    }
}

/// Connection to an in-process broker. Producers and consumers created from
/// the same connection see each other's messages.
#[derive(Default)]
pub struct InMemoryConnection {
    broker: Arc<Broker>,
    client_id: RwLock<Option<String>>,
    listener: RwLock<Option<Arc<dyn ExceptionListener>>>,
    next_session: AtomicU64,
    sessions: Mutex<Vec<Session>>,
    thread_sessions: Mutex<HashMap<ThreadId, Session>>,
}

impl InMemoryConnection {
    /// Unconnected context; call [`create_connection`](ConnectionContext::create_connection).
    pub fn new() -> Self {
        Self::default()
    }

    /// Client id from the connection properties, if any.
    pub fn client_id(&self) -> Option<String> {
        self.client_id.read().clone()
    }

    /// Drop the connection as if the broker had gone away and notify the
    /// exception listener.
    pub fn simulate_failure(&self, reason: &str) {
        warn!(reason, "in-memory broker connection lost");
        self.teardown();
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_exception(&TransportError::Disconnected(reason.to_owned()));
        }
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.is_connection_initialized() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn open_session(&self, mode: AckMode) -> Session {
        let session = Session::new(self.next_session.fetch_add(1, Ordering::Relaxed), mode);
        self.sessions.lock().push(session.clone());
        session
    }

    fn teardown(&self) {
        self.broker.connected.store(false, Ordering::Release);
        self.broker.topics.write().clear();
        for session in self.sessions.lock().drain(..) {
            session.close();
        }
        self.thread_sessions.lock().clear();
    }
}

impl ConnectionContext for InMemoryConnection {
    fn create_connection(&self, props: &ConnectionProperties) -> Result<(), TransportError> {
        let url = props
            .get(BROKER_URL)
            .ok_or_else(|| TransportError::Naming(format!("missing property {BROKER_URL}")))?;
        if !url.starts_with(MEMORY_SCHEME) {
            return Err(TransportError::Naming(format!("unsupported broker url {url}")));
        }
        if self.broker.connected.swap(true, Ordering::AcqRel) {
            debug!(url = %url, "connection already open");
            return Ok(());
        }
        *self.client_id.write() = props.get(CLIENT_ID).cloned();
        info!(url = %url, "in-memory broker connection opened");
        Ok(())
    }

    fn set_exception_listener(&self, listener: Arc<dyn ExceptionListener>) -> Result<(), TransportError> {
        self.ensure_connected()?;
        *self.listener.write() = Some(listener);
        Ok(())
    }

    fn is_connection_initialized(&self) -> bool {
        self.broker.connected.load(Ordering::Acquire)
    }

    fn create_session(&self, mode: AckMode) -> Result<Session, TransportError> {
        self.ensure_connected()?;
        Ok(self.open_session(mode))
    }

    fn create_consumer(
        &self,
        session: &Session,
        topic: &str,
        selector: Option<&str>,
    ) -> Result<TopicConsumer, TransportError> {
        self.ensure_connected()?;
        session.ensure_open()?;
        let selector = selector.map(Selector::parse).transpose()?.unwrap_or_default();
        let (tx, rx) = unbounded();
        self.broker
            .topics
            .write()
            .entry(topic.to_owned())
            .or_default()
            .push(Subscriber { selector, tx });
        debug!(topic, session = session.id(), "consumer created");
        Ok(TopicConsumer::new(topic.to_owned(), rx))
    }

    fn create_producer(&self, session: &Session, topic: &str) -> Result<TopicProducer, TransportError> {
        self.ensure_connected()?;
        session.ensure_open()?;
        let sink: Arc<dyn MessageSink> = Arc::clone(&self.broker) as Arc<dyn MessageSink>;
        Ok(TopicProducer::new(topic, session.clone(), sink))
    }

    fn create_thread_local_session(&self, mode: AckMode) -> Result<Session, TransportError> {
        self.ensure_connected()?;
        let id = thread::current().id();
        let mut sessions = self.thread_sessions.lock();
        if let Some(session) = sessions.get(&id).filter(|s| !s.is_closed()) {
            return Ok(session.clone());
        }
        let session = self.open_session(mode);
        sessions.insert(id, session.clone());
        Ok(session)
    }

    fn close(&self) {
        if self.is_connection_initialized() {
            info!("in-memory broker connection closed");
        }
        self.teardown();
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.teardown();
    }
}
