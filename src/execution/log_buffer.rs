use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};

use crate::event::{SinkId, SinkRegistry, Subscription};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum LogLevel {
    #[strum(serialize = "debug")]
    Debug,
    #[default]
    #[strum(serialize = "info")]
    Info,
    #[strum(to_string = "warn", serialize = "warning")]
    Warn,
    #[strum(serialize = "error")]
    Error,
}

/// Where script-level logging goes while a program runs.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: String);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonic per buffer, starting at 1.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Fixed-capacity FIFO of log entries with live fan-out to subscribers.
#[derive(Debug)]
pub struct LogBuffer {
    capacity: usize,
    state: Mutex<BufferState>,
    sinks: SinkRegistry<LogEntry>,
}

#[derive(Debug)]
struct BufferState {
    entries: VecDeque<LogEntry>,
    next_sequence: u64,
}

impl LogBuffer {
    pub fn new(capacity: usize, subscriber_capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(BufferState {
                entries: VecDeque::with_capacity(capacity),
                next_sequence: 1,
            }),
            sinks: SinkRegistry::new(subscriber_capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stores the entry, evicting the oldest at capacity, then offers it to
    /// every subscriber without waiting.
    pub fn append(&self, level: LogLevel, message: impl Into<String>) -> LogEntry {
        let mut state = self.state.lock();
        let entry = LogEntry {
            sequence: state.next_sequence,
            timestamp: Utc::now(),
            level,
            message: message.into(),
        };
        state.next_sequence += 1;
        if state.entries.len() == self.capacity {
            state.entries.pop_front();
        }
        state.entries.push_back(entry.clone());
        // publish under the lock so subscribers see append order
        self.sinks.publish(entry.clone());
        entry
    }

    pub fn get_all(&self) -> Vec<LogEntry> {
        self.state.lock().entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn subscribe(&self) -> Subscription<LogEntry> {
        self.sinks.subscribe()
    }

    pub fn unsubscribe(&self, id: SinkId) -> bool {
        self.sinks.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sinks.len()
    }

    /// History followed by live entries, with no gap and no duplicate
    /// between the two.
    pub fn attach(&self) -> LogStream {
        let subscription = self.subscribe();
        let history = self.get_all();
        LogStream::new(history, subscription)
    }
}

impl LogSink for LogBuffer {
    fn log(&self, level: LogLevel, message: String) {
        self.append(level, message);
    }
}

/// Replays buffered history, then live entries newer than the history.
#[derive(Debug)]
pub struct LogStream {
    history: VecDeque<LogEntry>,
    last_sequence: u64,
    subscription: Subscription<LogEntry>,
}

impl LogStream {
    fn new(history: Vec<LogEntry>, subscription: Subscription<LogEntry>) -> Self {
        Self {
            history: history.into(),
            last_sequence: 0,
            subscription,
        }
    }

    pub fn subscription_id(&self) -> SinkId {
        self.subscription.id
    }

    /// `None` once the buffer unsubscribed this stream (or was dropped) and
    /// everything queued has been read.
    pub async fn next(&mut self) -> Option<LogEntry> {
        if let Some(entry) = self.history.pop_front() {
            self.last_sequence = entry.sequence;
            return Some(entry);
        }
        while let Some(entry) = self.subscription.receiver.recv().await {
            if entry.sequence > self.last_sequence {
                self.last_sequence = entry.sequence;
                return Some(entry);
            }
        }
        None
    }

    /// Whatever is available right now without waiting.
    pub fn drain_ready(&mut self) -> Vec<LogEntry> {
        let mut ready: Vec<LogEntry> = self.history.drain(..).collect();
        if let Some(last) = ready.last() {
            self.last_sequence = last.sequence;
        }
        while let Ok(entry) = self.subscription.receiver.try_recv() {
            if entry.sequence > self.last_sequence {
                self.last_sequence = entry.sequence;
                ready.push(entry);
            }
        }
        ready
    }

    pub fn into_stream(self) -> impl Stream<Item = LogEntry> {
        let mut last = self
            .history
            .back()
            .map(|entry| entry.sequence)
            .unwrap_or(self.last_sequence);
        let live = ReceiverStream::new(self.subscription.receiver).filter(move |entry| {
            if entry.sequence > last {
                last = entry.sequence;
                true
            } else {
                false
            }
        });
        tokio_stream::iter(self.history).chain(live)
    }
}
