use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::pipeline::PipelineEvent;

struct HubChannel {
    sender: Option<Sender<PipelineEvent>>,
    /// Kept so the hub can drop the oldest event when the buffer is full.
    receiver: Receiver<PipelineEvent>,
}

impl HubChannel {
    fn open(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender: Some(sender),
            receiver,
        }
    }
}

/// Per-session event queue with a single live subscriber.
///
/// Publishing never blocks: when the buffer is full the oldest undelivered
/// event is discarded. Subscribing again moves the undelivered events to the
/// new stream and ends the previous one.
pub struct EventHub {
    capacity: usize,
    channel: Mutex<HubChannel>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            channel: Mutex::new(HubChannel::open(capacity)),
        }
    }

    pub fn publish(&self, event: PipelineEvent) {
        let Ok(channel) = self.channel.lock() else {
            log::error!("Event hub lock poisoned, dropping {} event", event.name());
            return;
        };
        let Some(sender) = &channel.sender else {
            return;
        };

        let mut event = event;
        loop {
            match sender.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if let Ok(oldest) = channel.receiver.try_recv() {
                        log::debug!("Event buffer full, dropped oldest {} event", oldest.name());
                    }
                    event = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Hands out a new stream carrying every undelivered event. The previous
    /// stream is closed.
    pub fn subscribe(&self) -> EventStream {
        let Ok(mut channel) = self.channel.lock() else {
            return EventStream::closed();
        };

        let next = HubChannel::open(self.capacity);
        if let Some(sender) = &next.sender {
            for event in channel.receiver.try_iter() {
                let _ = sender.try_send(event);
            }
        }
        let receiver = next.receiver.clone();
        *channel = next;
        EventStream::new(receiver)
    }

    /// Drops all pending events and closes the current stream. Events published
    /// afterwards go to the next subscriber.
    pub fn reset(&self) {
        if let Ok(mut channel) = self.channel.lock() {
            let discarded = channel.receiver.try_iter().count();
            if discarded > 0 {
                log::debug!("Discarded {} undelivered events", discarded);
            }
            *channel = HubChannel::open(self.capacity);
        }
    }

    /// Stops accepting events. The current stream ends after draining.
    pub fn close(&self) {
        if let Ok(mut channel) = self.channel.lock() {
            channel.sender = None;
        }
    }

    pub fn pending(&self) -> usize {
        self.channel.lock().map(|c| c.receiver.len()).unwrap_or(0)
    }
}

/// Receiving end of an [`EventHub`].
///
/// Ends after a terminal event (`done` or `error`) or when the hub replaces it.
pub struct EventStream {
    receiver: Option<Receiver<PipelineEvent>>,
}

impl EventStream {
    fn new(receiver: Receiver<PipelineEvent>) -> Self {
        Self {
            receiver: Some(receiver),
        }
    }

    fn closed() -> Self {
        Self { receiver: None }
    }

    pub fn is_finished(&self) -> bool {
        self.receiver.is_none()
    }

    /// Waits up to `timeout` for the next event. Yields `ping` when nothing
    /// arrived in time and `None` once the stream has ended.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<PipelineEvent> {
        let receiver = self.receiver.as_ref()?;
        match receiver.recv_timeout(timeout) {
            Ok(event) => Some(self.track(event)),
            Err(RecvTimeoutError::Timeout) => Some(PipelineEvent::Ping {}),
            Err(RecvTimeoutError::Disconnected) => {
                self.receiver = None;
                None
            }
        }
    }

    fn track(&mut self, event: PipelineEvent) -> PipelineEvent {
        if event.is_terminal() {
            self.receiver = None;
        }
        event
    }
}

impl Iterator for EventStream {
    type Item = PipelineEvent;

    /// Blocks until the next event.
    fn next(&mut self) -> Option<PipelineEvent> {
        let receiver = self.receiver.as_ref()?;
        match receiver.recv() {
            Ok(event) => Some(self.track(event)),
            Err(_) => {
                self.receiver = None;
                None
            }
        }
    }
}
