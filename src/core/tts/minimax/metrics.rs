use std::time::Duration;
use tokio::time::Instant;

/// Latency and volume figures for one synthesis stream.
#[derive(Debug, Clone)]
pub struct SynthesisMetrics {
    pub request_id: String,
    pub created_at: Instant,
    /// Time spent acquiring a connection, retries included
    pub acquire_duration: Option<Duration>,
    /// When the first token was sent
    pub started_at: Option<Instant>,
    /// From the first token sent to the first audio received
    pub ttfb: Option<Duration>,
    pub tokens_sent: usize,
    pub tokens_completed: usize,
    pub token_errors: usize,
    pub decode_errors: usize,
    pub audio_bytes: usize,
    pub audio_duration: Duration,
    /// Completion was forced after the grace period with tokens still pending
    pub forced_completion: bool,
    pub cancelled: bool,
}

impl SynthesisMetrics {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            created_at: Instant::now(),
            acquire_duration: None,
            started_at: None,
            ttfb: None,
            tokens_sent: 0,
            tokens_completed: 0,
            token_errors: 0,
            decode_errors: 0,
            audio_bytes: 0,
            audio_duration: Duration::ZERO,
            forced_completion: false,
            cancelled: false,
        }
    }

    pub(crate) fn mark_token_sent(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        self.tokens_sent += 1;
    }

    pub(crate) fn record_audio(&mut self, bytes: usize, sample_rate: u32, channels: u16) {
        if self.ttfb.is_none()
            && let Some(started_at) = self.started_at
        {
            self.ttfb = Some(started_at.elapsed());
        }
        self.audio_bytes += bytes;
        let bytes_per_second = sample_rate as u64 * 2 * channels.max(1) as u64;
        if bytes_per_second > 0 {
            self.audio_duration = Duration::from_secs_f64(self.audio_bytes as f64 / bytes_per_second as f64);
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "[{}] tokens {}/{} (errors {}, decode errors {}), audio {:.2}s in {} bytes, ttfb {:?}, acquire {:?}{}",
            self.request_id,
            self.tokens_completed,
            self.tokens_sent,
            self.token_errors,
            self.decode_errors,
            self.audio_duration.as_secs_f64(),
            self.audio_bytes,
            self.ttfb,
            self.acquire_duration,
            if self.forced_completion { ", forced completion" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ttfb_measured_from_first_token() {
        let mut metrics = SynthesisMetrics::new("req");
        metrics.mark_token_sent();
        tokio::time::advance(Duration::from_millis(250)).await;
        metrics.mark_token_sent();
        metrics.record_audio(64_000, 32_000, 1);

        assert_eq!(metrics.tokens_sent, 2);
        assert_eq!(metrics.ttfb, Some(Duration::from_millis(250)));
        assert_eq!(metrics.audio_duration, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_audio_without_tokens_has_no_ttfb() {
        let mut metrics = SynthesisMetrics::new("req");
        metrics.record_audio(10, 16_000, 1);
        assert!(metrics.ttfb.is_none());
        assert!(metrics.summary().contains("[req]"));
    }
}
