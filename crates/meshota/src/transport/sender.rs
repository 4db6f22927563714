// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable fragmenting sender.
//!
//! Stop-and-wait over the radio primitive:
//! - **One send in flight** system-wide (send lock held for the whole message)
//! - **Strict fragment order**, each fragment gated on the previous ack
//! - **Bounded retry** per fragment, same dedup token on every attempt
//! - **Single deadline** shared by the lock wait, every ack wait and every retry
//!
//! # Usage
//!
//! ```ignore
//! let sender = ReliableSender::new(radio, &config.link, events)?;
//!
//! // driver tx-done callback
//! let completion = sender.completion();
//! radio_driver.on_tx_done(move |ok| completion.signal(ok));
//!
//! sender.send(Channel::Control, &peer, &message, Duration::from_secs(3))?;
//! sender.send_default(Channel::Config, &peer, b"ping")?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use super::deadline::Deadline;
use super::frame::{LinkFrame, HEADER_SIZE};
use super::{Channel, MacAddr, Radio};
use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventSink};

/// Driver-side handle reporting the outcome of the frame in flight.
///
/// Cheap to clone; safe to call from the radio driver's callback context
/// (never blocks, never allocates).
#[derive(Debug, Clone)]
pub struct SendCompletion {
    tx: Sender<bool>,
}

impl SendCompletion {
    /// Report the outcome of the last transmitted frame.
    ///
    /// Only one outcome is kept; extra signals are dropped.
    #[inline]
    pub fn signal(&self, ok: bool) {
        let _ = self.tx.try_send(ok);
    }

    #[cfg(test)]
    pub(crate) fn for_test(tx: Sender<bool>) -> Self {
        Self { tx }
    }
}

/// Sender statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SenderStats {
    /// Messages fully delivered.
    pub messages_sent: u64,
    /// Frames handed to the radio (retries included).
    pub frames_sent: u64,
    /// Frames that had to be sent again.
    pub retransmits: u64,
    /// Messages abandoned.
    pub failures: u64,
}

#[derive(Default)]
struct AtomicSenderStats {
    messages_sent: AtomicU64,
    frames_sent: AtomicU64,
    retransmits: AtomicU64,
    failures: AtomicU64,
}

/// Outcome of waiting for one frame.
enum Outcome {
    Acked,
    Failed,
    TimedOut,
}

/// Reliable sender over a [`Radio`].
///
/// A node owns exactly one sender per radio; its send lock is therefore the
/// process-wide lock serialising every reliable send.
pub struct ReliableSender<R: Radio> {
    radio: R,
    max_payload: usize,
    max_message_len: usize,
    retransmit: u8,
    default_timeout: Duration,
    send_lock: Mutex<()>,
    done_tx: Sender<bool>,
    done_rx: Receiver<bool>,
    events: Arc<dyn EventSink>,
    stats: AtomicSenderStats,
}

impl<R: Radio> ReliableSender<R> {
    /// Create a sender and register its completion handle with the radio.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if a full frame would exceed the radio MTU.
    pub fn new(radio: R, config: &LinkConfig, events: Arc<dyn EventSink>) -> Result<Self> {
        if config.max_payload + HEADER_SIZE > radio.mtu() {
            log::warn!(
                "[sender] payload {} + header {} exceeds radio mtu {}",
                config.max_payload,
                HEADER_SIZE,
                radio.mtu()
            );
            return Err(Error::InvalidArgument("max_payload exceeds radio mtu"));
        }

        let (done_tx, done_rx) = channel::bounded(1);
        radio.register_completion(SendCompletion {
            tx: done_tx.clone(),
        });

        Ok(Self {
            radio,
            max_payload: config.max_payload,
            max_message_len: config.max_message_len(),
            retransmit: config.retransmit.max(1),
            default_timeout: config.send_timeout(),
            send_lock: Mutex::new(()),
            done_tx,
            done_rx,
            events,
            stats: AtomicSenderStats::default(),
        })
    }

    /// Completion handle for the radio driver's tx callback.
    pub fn completion(&self) -> SendCompletion {
        SendCompletion {
            tx: self.done_tx.clone(),
        }
    }

    /// Underlying radio.
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Timeout configured for sends that do not specify one.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Send `message` to `dest` on `channel`, fragmenting as needed.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an empty or oversized message
    /// - `Timeout` if the lock or the acks were not obtained before `timeout`
    /// - `TransportError` if the radio refused a frame or retries ran out
    pub fn send(
        &self,
        channel: Channel,
        dest: &MacAddr,
        message: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        if message.is_empty() {
            return Err(Error::InvalidArgument("empty message"));
        }
        if message.len() > self.max_message_len {
            return Err(Error::InvalidArgument("message exceeds maximum length"));
        }

        let deadline = Deadline::after(timeout);
        let _guard = match deadline.remaining() {
            None => self.send_lock.lock(),
            Some(remaining) => self.send_lock.try_lock_for(remaining).ok_or_else(|| {
                log::debug!("[sender] send lock not acquired before deadline");
                Error::Timeout
            })?,
        };

        let total_len = message.len() as u16;
        let mut prev_token = None;

        for (sequence, fragment) in message.chunks(self.max_payload).enumerate() {
            let token = fresh_token(prev_token);
            prev_token = Some(token);

            let frame = LinkFrame::new(channel, sequence as u8, total_len, token, fragment)?;
            if let Err(e) = self.send_frame(dest, &frame, &deadline) {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "[sender] {:?} message of {} bytes to {:02x?} failed at fragment {}: {}",
                    channel,
                    total_len,
                    dest,
                    sequence,
                    e
                );
                return Err(e);
            }
        }

        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        if channel != Channel::Debug {
            self.events.notify(Event::SendCompleted(channel));
        }
        Ok(())
    }

    /// Send with the configured default timeout.
    pub fn send_default(&self, channel: Channel, dest: &MacAddr, message: &[u8]) -> Result<()> {
        self.send(channel, dest, message, self.default_timeout)
    }

    /// Snapshot of the statistics.
    pub fn stats(&self) -> SenderStats {
        SenderStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            retransmits: self.stats.retransmits.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }

    /// Transmit one frame until acked, retries exhausted or deadline passed.
    fn send_frame(&self, dest: &MacAddr, frame: &LinkFrame, deadline: &Deadline) -> Result<()> {
        let bytes = frame.to_bytes();
        let mut last = Outcome::Failed;

        for attempt in 0..self.retransmit {
            if attempt > 0 {
                self.stats.retransmits.fetch_add(1, Ordering::Relaxed);
            }

            // A late outcome of an earlier frame must not ack this one.
            while self.done_rx.try_recv().is_ok() {}

            self.radio.send(dest, &bytes).map_err(|e| {
                log::warn!("[sender] radio refused frame: {}", e);
                Error::TransportError
            })?;
            self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);

            last = self.wait_outcome(deadline);
            match last {
                Outcome::Acked => return Ok(()),
                Outcome::Failed => log::debug!(
                    "[sender] seq {} not acked (attempt {}/{})",
                    frame.sequence,
                    attempt + 1,
                    self.retransmit
                ),
                Outcome::TimedOut => log::debug!(
                    "[sender] seq {} ack wait timed out (attempt {}/{})",
                    frame.sequence,
                    attempt + 1,
                    self.retransmit
                ),
            }
            if deadline.is_expired() {
                break;
            }
        }

        match last {
            Outcome::TimedOut => Err(Error::Timeout),
            _ if deadline.is_expired() => Err(Error::Timeout),
            _ => Err(Error::TransportError),
        }
    }

    fn wait_outcome(&self, deadline: &Deadline) -> Outcome {
        let received = match deadline.remaining() {
            None => self.done_rx.recv().ok(),
            Some(remaining) => self.done_rx.recv_timeout(remaining).ok(),
        };
        match received {
            Some(true) => Outcome::Acked,
            Some(false) => Outcome::Failed,
            None => Outcome::TimedOut,
        }
    }
}

/// Random token differing from the previous fragment's.
fn fresh_token(prev: Option<u32>) -> u32 {
    loop {
        let token = fastrand::u32(..);
        if Some(token) != prev {
            return token;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventQueue;
    use crate::transport::frame::{DEFAULT_MAX_PAYLOAD, RADIO_MTU};
    use std::sync::OnceLock;
    use std::thread;
    use std::time::Instant;

    /// Radio recording frames and acking according to a script.
    #[derive(Default)]
    struct ScriptedRadio {
        completion: OnceLock<SendCompletion>,
        sent: Mutex<Vec<Vec<u8>>>,
        /// Outcomes to report, in order; `None` = stay silent. Empty = ack.
        script: Mutex<Vec<Option<bool>>>,
        refuse: bool,
        /// Airtime spent in every send.
        delay: Duration,
        mtu: Option<usize>,
    }

    impl ScriptedRadio {
        fn with_script(script: Vec<Option<bool>>) -> Self {
            Self {
                script: Mutex::new(script),
                ..Self::default()
            }
        }

        fn frames(&self) -> Vec<LinkFrame> {
            self.sent
                .lock()
                .iter()
                .map(|b| LinkFrame::decode(b, DEFAULT_MAX_PAYLOAD).expect("decode"))
                .collect()
        }
    }

    impl Radio for ScriptedRadio {
        fn send(&self, _dest: &MacAddr, frame: &[u8]) -> Result<()> {
            if self.refuse {
                return Err(Error::TransportError);
            }
            self.sent.lock().push(frame.to_vec());
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            let outcome = {
                let mut script = self.script.lock();
                if script.is_empty() {
                    Some(true)
                } else {
                    script.remove(0)
                }
            };
            if let (Some(ok), Some(completion)) = (outcome, self.completion.get()) {
                completion.signal(ok);
            }
            Ok(())
        }

        fn register_completion(&self, completion: SendCompletion) {
            let _ = self.completion.set(completion);
        }

        fn mtu(&self) -> usize {
            self.mtu.unwrap_or(RADIO_MTU)
        }
    }

    const PEER: MacAddr = [0x24, 0x0a, 0xc4, 0x00, 0x00, 0x01];

    fn sender(radio: ScriptedRadio) -> (ReliableSender<ScriptedRadio>, Arc<EventQueue>) {
        let events = Arc::new(EventQueue::new());
        let sender =
            ReliableSender::new(radio, &LinkConfig::default(), events.clone()).expect("sender");
        (sender, events)
    }

    #[test]
    fn test_send_fragments_in_order() {
        let (sender, events) = sender(ScriptedRadio::default());
        let message: Vec<u8> = (0..600u32).map(|i| i as u8).collect();

        sender
            .send(Channel::Control, &PEER, &message, Duration::from_secs(1))
            .expect("send");

        let frames = sender.radio().frames();
        assert_eq!(frames.len(), 3);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.sequence, i as u8);
            assert_eq!(frame.total_len, 600);
            assert_eq!(frame.channel, Channel::Control);
        }
        assert_eq!(frames[0].payload.len(), DEFAULT_MAX_PAYLOAD);
        assert_eq!(frames[2].payload.len(), 600 - 2 * DEFAULT_MAX_PAYLOAD);
        assert_ne!(frames[0].dedup_token, frames[1].dedup_token);
        assert_eq!(events.drain(), vec![Event::SendCompleted(Channel::Control)]);
    }

    #[test]
    fn test_send_debug_channel_no_event() {
        let (sender, events) = sender(ScriptedRadio::default());
        sender
            .send(Channel::Debug, &PEER, b"log line", Duration::from_secs(1))
            .expect("send");
        assert!(events.drain().is_empty());
    }

    #[test]
    fn test_send_retry_keeps_token() {
        let radio = ScriptedRadio::with_script(vec![Some(false), Some(true)]);
        let (sender, _) = sender(radio);

        sender
            .send(Channel::Config, &PEER, b"retry me", Duration::from_secs(1))
            .expect("send");

        let frames = sender.radio().frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], frames[1]);
        assert_eq!(sender.stats().retransmits, 1);
    }

    #[test]
    fn test_send_retry_budget_exhausted() {
        let radio = ScriptedRadio::with_script(vec![Some(false); 3]);
        let (sender, events) = sender(radio);

        let result = sender.send(Channel::Control, &PEER, b"doomed", Duration::from_secs(1));
        assert!(matches!(result, Err(Error::TransportError)));
        assert_eq!(sender.radio().frames().len(), 3);
        assert_eq!(sender.stats().failures, 1);
        assert!(events.drain().is_empty());
    }

    #[test]
    fn test_send_silent_radio_times_out() {
        let radio = ScriptedRadio::with_script(vec![None; 3]);
        let (sender, _) = sender(radio);

        let result = sender.send(Channel::Control, &PEER, b"hello", Duration::from_millis(30));
        assert!(matches!(result, Err(Error::Timeout)));
        // Nothing goes out once the deadline has passed.
        assert_eq!(sender.radio().frames().len(), 1);
        assert_eq!(sender.stats().retransmits, 0);
    }

    #[test]
    fn test_send_deadline_shared_across_fragments() {
        // Fragment 0 needs a retry, fragment 1 is never acked.
        let radio = ScriptedRadio {
            script: Mutex::new(vec![Some(false), Some(true), None]),
            delay: Duration::from_millis(60),
            ..ScriptedRadio::default()
        };
        let (sender, _) = sender(radio);
        let timeout = Duration::from_millis(200);
        let message = vec![0x5Au8; DEFAULT_MAX_PAYLOAD * 3];

        let start = Instant::now();
        let result = sender.send(Channel::Control, &PEER, &message, timeout);
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(Error::Timeout)));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout * 3 / 2, "took {:?}", elapsed);

        let frames = sender.radio().frames();
        let sequences: Vec<u8> = frames.iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![0, 0, 1]);
    }

    #[test]
    fn test_send_default_uses_configured_timeout() {
        let config = LinkConfig {
            send_timeout_ms: 30,
            ..LinkConfig::default()
        };
        let radio = ScriptedRadio::with_script(vec![None]);
        let sender =
            ReliableSender::new(radio, &config, Arc::new(EventQueue::new())).expect("sender");
        assert_eq!(sender.default_timeout(), Duration::from_millis(30));

        let start = Instant::now();
        let result = sender.send_default(Channel::Config, &PEER, b"ping");
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(start.elapsed() < Duration::from_secs(1));

        sender
            .send_default(Channel::Config, &PEER, b"ping")
            .expect("acked");
    }

    #[test]
    fn test_new_rejects_payload_above_mtu() {
        let small = || ScriptedRadio {
            mtu: Some(100),
            ..ScriptedRadio::default()
        };
        let events: Arc<dyn EventSink> = Arc::new(EventQueue::new());

        let result = ReliableSender::new(small(), &LinkConfig::default(), events.clone());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));

        let fitting = LinkConfig {
            max_payload: 100 - HEADER_SIZE,
            ..LinkConfig::default()
        };
        ReliableSender::new(small(), &fitting, events).expect("payload fits");
    }

    #[test]
    fn test_send_radio_refusal_aborts() {
        let radio = ScriptedRadio {
            refuse: true,
            ..ScriptedRadio::default()
        };
        let (sender, _) = sender(radio);

        let result = sender.send(Channel::Control, &PEER, b"hello", Duration::from_secs(1));
        assert!(matches!(result, Err(Error::TransportError)));
    }

    #[test]
    fn test_send_rejects_bad_lengths() {
        let (sender, _) = sender(ScriptedRadio::default());
        assert!(matches!(
            sender.send(Channel::Control, &PEER, &[], Duration::from_secs(1)),
            Err(Error::InvalidArgument(_))
        ));

        let huge = vec![0u8; usize::from(u16::MAX) + 1];
        assert!(matches!(
            sender.send(Channel::Control, &PEER, &huge, Duration::from_secs(1)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_send_stale_outcome_is_discarded() {
        let (sender, _) = sender(ScriptedRadio::with_script(vec![Some(false)]));
        // Outcome left over from an abandoned send.
        sender.completion().signal(true);

        // The first attempt fails; only the retry is acked.
        let result = sender.send(Channel::Control, &PEER, b"x", Duration::from_secs(1));
        assert!(result.is_ok());
        assert_eq!(sender.radio().frames().len(), 2);
    }

    #[test]
    fn test_send_lock_contention_times_out() {
        let (sender, _) = sender(ScriptedRadio::default());
        let _held = sender.send_lock.lock();

        let result = sender.send(Channel::Control, &PEER, b"x", Duration::from_millis(10));
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(sender.radio().frames().is_empty());
    }

    #[test]
    fn test_frame_size_within_mtu() {
        let (sender, _) = sender(ScriptedRadio::default());
        sender
            .send(Channel::Control, &PEER, &[7u8; 1000], Duration::from_secs(1))
            .expect("send");
        for bytes in sender.radio().sent.lock().iter() {
            assert!(bytes.len() <= DEFAULT_MAX_PAYLOAD + HEADER_SIZE);
        }
    }
}
