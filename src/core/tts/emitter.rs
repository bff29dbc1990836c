//! Channel-backed [`AudioEmitter`].
//!
//! Aggregates arbitrarily sized PCM payloads into fixed-duration frames
//! (10 ms by default) and forwards them, together with segment boundaries,
//! as [`AudioEvent`]s on an unbounded channel.

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::base::{AudioEmitter, AudioEvent, AudioFrame, TTSError, TTSResult};

/// Sender half shared by the emitter and the pipeline.
pub type EventSender = mpsc::UnboundedSender<Result<AudioEvent, TTSError>>;

const BYTES_PER_SAMPLE: usize = 2;

pub struct ChannelAudioEmitter {
    sender: EventSender,
    frame_duration: Duration,
    sample_rate: u32,
    channels: u16,
    frame_bytes: usize,
    buffer: Vec<u8>,
    segment_id: String,
    sequence: u64,
    pushed_since_flush: bool,
    initialized: bool,
}

impl ChannelAudioEmitter {
    pub fn new(sender: EventSender, frame_duration: Duration) -> Self {
        Self {
            sender,
            frame_duration,
            sample_rate: 0,
            channels: 1,
            frame_bytes: 0,
            buffer: Vec::new(),
            segment_id: String::new(),
            sequence: 0,
            pushed_since_flush: false,
            initialized: false,
        }
    }

    fn send_frame(&mut self, data: Vec<u8>) {
        let samples_per_channel =
            (data.len() / (BYTES_PER_SAMPLE * self.channels.max(1) as usize)) as u32;
        let frame = AudioFrame {
            data: Bytes::from(data),
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples_per_channel,
            segment_id: self.segment_id.clone(),
        };
        if self.sender.send(Ok(AudioEvent::Frame(frame))).is_err() {
            debug!("Audio receiver dropped; discarding frame");
        }
    }
}

impl AudioEmitter for ChannelAudioEmitter {
    fn initialize(&mut self, sample_rate: u32, channels: u16, streaming: bool) -> TTSResult<()> {
        if sample_rate == 0 || channels == 0 {
            return Err(TTSError::InvalidConfiguration(format!(
                "emitter needs a non-zero sample rate and channel count, got {sample_rate} Hz / {channels} ch"
            )));
        }
        if !streaming {
            warn!("ChannelAudioEmitter always streams; ignoring streaming=false");
        }

        let samples = (sample_rate as u128 * self.frame_duration.as_micros() / 1_000_000) as usize;
        let frame_bytes = samples.max(1) * BYTES_PER_SAMPLE * channels as usize;

        self.sample_rate = sample_rate;
        self.channels = channels;
        self.frame_bytes = frame_bytes;
        self.buffer = Vec::with_capacity(frame_bytes.max(512));
        self.initialized = true;
        Ok(())
    }

    fn start_segment(&mut self, segment_id: &str) {
        self.segment_id = segment_id.to_string();
    }

    fn push(&mut self, pcm: &[u8]) {
        if !self.initialized {
            warn!("push() before initialize(); dropping {} bytes", pcm.len());
            return;
        }
        if pcm.is_empty() {
            return;
        }
        self.pushed_since_flush = true;

        let mut incoming = pcm;
        while !incoming.is_empty() {
            let needed = self.frame_bytes.saturating_sub(self.buffer.len());
            let take = needed.min(incoming.len());
            self.buffer.extend_from_slice(&incoming[..take]);
            incoming = &incoming[take..];

            if self.buffer.len() >= self.frame_bytes {
                let frame: Vec<u8> = self.buffer.drain(..self.frame_bytes).collect();
                self.send_frame(frame);
            }
        }
    }

    fn flush(&mut self) {
        if !self.buffer.is_empty() {
            let remainder = std::mem::take(&mut self.buffer);
            self.send_frame(remainder);
        }
        if !self.pushed_since_flush {
            return;
        }
        self.pushed_since_flush = false;

        let event = AudioEvent::SegmentEnd {
            segment_id: self.segment_id.clone(),
            sequence: self.sequence,
        };
        self.sequence += 1;
        if self.sender.send(Ok(event)).is_err() {
            debug!("Audio receiver dropped; discarding segment end");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<Result<AudioEvent, TTSError>>) -> Vec<AudioEvent> {
        let mut events = Vec::new();
        while let Ok(item) = rx.try_recv() {
            events.push(item.unwrap());
        }
        events
    }

    fn emitter(sample_rate: u32, channels: u16) -> (
        ChannelAudioEmitter,
        mpsc::UnboundedReceiver<Result<AudioEvent, TTSError>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut emitter = ChannelAudioEmitter::new(tx, Duration::from_millis(10));
        emitter.initialize(sample_rate, channels, true).unwrap();
        emitter.start_segment("req-1");
        (emitter, rx)
    }

    #[test]
    fn test_frames_are_ten_milliseconds() {
        let (mut emitter, mut rx) = emitter(32000, 1);
        // 25 ms of mono audio at 32 kHz
        emitter.push(&vec![1u8; 1600]);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        for event in &events {
            match event {
                AudioEvent::Frame(frame) => {
                    assert_eq!(frame.data.len(), 640);
                    assert_eq!(frame.samples_per_channel, 320);
                    assert_eq!(frame.segment_id, "req-1");
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn test_flush_emits_remainder_then_segment_end() {
        let (mut emitter, mut rx) = emitter(16000, 2);
        // stereo 10 ms frame = 640 bytes; push 700
        emitter.push(&vec![0u8; 700]);
        emitter.flush();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], AudioEvent::Frame(f) if f.data.len() == 640));
        assert!(matches!(&events[1], AudioEvent::Frame(f) if f.data.len() == 60 && f.samples_per_channel == 15));
        assert_eq!(
            events[2],
            AudioEvent::SegmentEnd {
                segment_id: "req-1".into(),
                sequence: 0
            }
        );
    }

    #[test]
    fn test_flush_without_audio_is_silent() {
        let (mut emitter, mut rx) = emitter(24000, 1);
        emitter.flush();
        assert!(drain(&mut rx).is_empty());

        emitter.push(&[0u8; 10]);
        emitter.flush();
        emitter.flush();
        let events = drain(&mut rx);
        assert_eq!(events.iter().filter(|e| e.is_segment_end()).count(), 1);
    }

    #[test]
    fn test_segment_sequence_increments() {
        let (mut emitter, mut rx) = emitter(8000, 1);
        for _ in 0..3 {
            emitter.push(&[0u8; 4]);
            emitter.flush();
        }
        let sequences: Vec<u64> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                AudioEvent::SegmentEnd { sequence, .. } => Some(sequence),
                _ => None,
            })
            .collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_initialize_rejects_zero_rate() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut emitter = ChannelAudioEmitter::new(tx, Duration::from_millis(10));
        assert!(emitter.initialize(0, 1, true).is_err());
    }

    #[test]
    fn test_push_after_receiver_dropped_does_not_panic() {
        let (mut emitter, rx) = emitter(32000, 1);
        drop(rx);
        emitter.push(&vec![0u8; 2000]);
        emitter.flush();
    }
}
