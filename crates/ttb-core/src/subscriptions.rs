//! Stream listeners and the chats subscribed to them.
//!
//! The filtered stream is an app-level resource (one connection per consumer
//! key), so chats authorized against the same app share one listener task. The
//! listener reconnects forever: rate limits wait for the advertised reset,
//! other failures back off exponentially.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use tokio::{sync::Mutex, sync::RwLock, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    dispatcher::Dispatcher,
    domain::ChatId,
    errors::Error,
    tweet::StreamEvent,
    twitter::{AccessCredentials, StreamConnection, TwitterPort},
    Result,
};

#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    cfg: Arc<Config>,
    twitter: Arc<dyn TwitterPort>,
    dispatcher: Dispatcher,
    listeners: Mutex<HashMap<String, Listener>>,
}

struct Listener {
    subscribers: Arc<RwLock<BTreeSet<ChatId>>>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SubscriptionManager {
    pub fn new(cfg: Arc<Config>, twitter: Arc<dyn TwitterPort>, dispatcher: Dispatcher) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                cfg,
                twitter,
                dispatcher,
                listeners: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe every authorized chat (startup).
    pub async fn start_all(&self, chats: Vec<(ChatId, AccessCredentials)>) -> usize {
        let n = chats.len();
        for (chat_id, creds) in chats {
            self.subscribe(chat_id, creds).await;
        }
        info!(chats = n, "subscriptions restored");
        n
    }

    /// Attach `chat_id` to the listener for its app, starting one if needed.
    pub async fn subscribe(&self, chat_id: ChatId, creds: AccessCredentials) {
        // A chat belongs to exactly one listener.
        if self.listener_key(chat_id).await.is_some_and(|k| k != creds.consumer_key) {
            self.unsubscribe(chat_id).await;
        }

        let mut listeners = self.inner.listeners.lock().await;
        if let Some(l) = listeners.get(&creds.consumer_key) {
            l.subscribers.write().await.insert(chat_id);
            return;
        }

        let key = creds.consumer_key.clone();
        let subscribers = Arc::new(RwLock::new(BTreeSet::from([chat_id])));
        let cancel = CancellationToken::new();
        let task = ListenerTask {
            cfg: self.inner.cfg.clone(),
            twitter: self.inner.twitter.clone(),
            dispatcher: self.inner.dispatcher.clone(),
            creds,
            subscribers: subscribers.clone(),
        };
        let handle = tokio::spawn(task.run(cancel.clone()));
        info!(chat_id = chat_id.0, "stream listener started");

        listeners.insert(
            key,
            Listener {
                subscribers,
                cancel,
                handle,
            },
        );
    }

    /// Detach `chat_id`; a listener left without chats is stopped.
    /// Returns whether the chat was subscribed.
    pub async fn unsubscribe(&self, chat_id: ChatId) -> bool {
        let mut found = false;
        let mut stopped = Vec::new();
        {
            let mut listeners = self.inner.listeners.lock().await;
            let mut empty_keys = Vec::new();
            for (key, l) in listeners.iter() {
                let mut subs = l.subscribers.write().await;
                if subs.remove(&chat_id) {
                    found = true;
                }
                if subs.is_empty() {
                    empty_keys.push(key.clone());
                }
            }
            for key in empty_keys {
                if let Some(l) = listeners.remove(&key) {
                    l.cancel.cancel();
                    stopped.push(l.handle);
                }
            }
        }

        for handle in stopped {
            let _ = handle.await;
            info!("stream listener stopped");
        }
        found
    }

    pub async fn is_subscribed(&self, chat_id: ChatId) -> bool {
        self.listener_key(chat_id).await.is_some()
    }

    async fn listener_key(&self, chat_id: ChatId) -> Option<String> {
        let listeners = self.inner.listeners.lock().await;
        for (key, l) in listeners.iter() {
            if l.subscribers.read().await.contains(&chat_id) {
                return Some(key.clone());
            }
        }
        None
    }

    pub async fn listener_count(&self) -> usize {
        self.inner.listeners.lock().await.len()
    }

    /// Cancel all listeners and wait for them to exit.
    pub async fn shutdown(&self) {
        let drained: Vec<Listener> = {
            let mut listeners = self.inner.listeners.lock().await;
            listeners.drain().map(|(_, l)| l).collect()
        };
        for l in &drained {
            l.cancel.cancel();
        }
        for l in drained {
            let _ = l.handle.await;
        }
    }
}

struct ListenerTask {
    cfg: Arc<Config>,
    twitter: Arc<dyn TwitterPort>,
    dispatcher: Dispatcher,
    creds: AccessCredentials,
    subscribers: Arc<RwLock<BTreeSet<ChatId>>>,
}

impl ListenerTask {
    async fn run(self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.cfg.reconnect_delay, self.cfg.reconnect_max_delay);

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.run_once(&mut backoff) => r,
            };

            let wait = match outcome {
                Ok(wait) => wait,
                Err(e) => {
                    let wait = backoff.next_delay();
                    error!(
                        error = %e,
                        retry_in_ms = wait.as_millis() as u64,
                        "stream listener failed"
                    );
                    wait
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }
        debug!("stream listener exited");
    }

    async fn subscribers(&self) -> Vec<ChatId> {
        self.subscribers.read().await.iter().copied().collect()
    }

    /// One connection attempt. Returns how long to wait before the next one.
    async fn run_once(&self, backoff: &mut Backoff) -> Result<Duration> {
        let mut lines = match self.twitter.connect_stream(&self.creds).await? {
            StreamConnection::RateLimited { reset_at } => {
                let now = Utc::now();
                let wait = rate_limit_wait(reset_at, now, self.cfg.rate_limit_fallback);
                let until = now + chrono::Duration::from_std(wait).unwrap_or_default();
                warn!(wait_secs = wait.as_secs(), "stream rate limited");
                self.dispatcher
                    .broadcast(&self.subscribers().await, &sleeping_notice(wait, until))
                    .await;
                return Ok(wait);
            }
            StreamConnection::Connected(lines) => lines,
        };

        info!("stream connected");
        backoff.reset();
        self.dispatcher
            .broadcast(&self.subscribers().await, "Subscription started")
            .await;

        let stall = self.cfg.stream_stall_timeout;
        loop {
            let line = match tokio::time::timeout(stall, lines.next()).await {
                Err(_) => {
                    return Err(Error::External(format!(
                        "stream stalled: no data for {}s",
                        stall.as_secs()
                    )))
                }
                Ok(None) => {
                    warn!("stream closed by server");
                    return Ok(backoff.next_delay());
                }
                Ok(Some(line)) => line?,
            };

            match StreamEvent::parse(&line) {
                Ok(StreamEvent::KeepAlive) => {}
                Ok(StreamEvent::Tweet(tweet)) => {
                    let subs = self.subscribers().await;
                    let delivered = self.dispatcher.dispatch(&tweet, &subs).await;
                    debug!(tweet_id = %tweet.id, delivered, "tweet forwarded");
                }
                Ok(StreamEvent::Error(msg)) => warn!(message = %msg, "stream error event"),
                Err(e) => warn!(error = %e, "skipping malformed stream line"),
            }
        }
    }
}

/// Wait until one second past the advertised reset; `fallback` when unknown.
pub fn rate_limit_wait(
    reset_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    fallback: Duration,
) -> Duration {
    let Some(reset_at) = reset_at else {
        return fallback;
    };
    let secs = (reset_at - now).num_seconds() + 1;
    Duration::from_secs(secs.max(1) as u64)
}

fn sleeping_notice(wait: Duration, until: DateTime<Utc>) -> String {
    format!(
        "Sleeping for {} seconds until {}",
        wait.as_secs(),
        until.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let d = self.current;
        self.current = (self.current * 2).min(self.max);
        d
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}
