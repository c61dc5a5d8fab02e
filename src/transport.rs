//! Bounded transport (C1, §4.1): a single HTTP(S) fetch with a byte cap, a
//! wall-clock timeout, and exponential backoff with jitter across retries.

use crate::config::Limits;
use crate::error::TransportError;
use std::io::Read;
use std::time::{Duration, Instant};

fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 250u64.saturating_mul(1u64 << attempt.min(8));
    let jitter = rand::random::<f64>() * 1.0 - 0.5; // +/- 50%
    let jittered = (base_ms as f64) * (1.0 + jitter);
    Duration::from_millis(jittered.max(0.0) as u64)
}

/// Fetches `url`, streaming the response body with a running byte count so
/// the cap is enforced mid-download rather than after the fact. Retries
/// transient failures (timeout, non-2xx, transport error) up to
/// `limits.retries` times with exponential backoff.
pub fn fetch(url: &str, limits: &Limits) -> Result<(Vec<u8>, Option<String>), TransportError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_millis(limits.timeout_ms))
        .build()
        .map_err(|err| TransportError::Cause {
            url: url.to_string(),
            attempts: 0,
            cause: err.to_string(),
        })?;

    let max_bytes = limits.max_zip_bytes.max(limits.max_total_bytes);
    let mut last_err: Option<TransportError> = None;

    for attempt in 0..=limits.retries {
        if attempt > 0 {
            std::thread::sleep(backoff_delay(attempt - 1));
        }

        let started = Instant::now();
        match client.get(url).send() {
            Ok(response) => {
                let status = response.status();
                if !status.is_success() {
                    last_err = Some(TransportError::HttpStatus {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                    continue;
                }

                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string());

                let mut body = Vec::new();
                let mut reader = response.take(max_bytes + 1);
                match reader.read_to_end(&mut body) {
                    Ok(_) => {
                        if body.len() as u64 > max_bytes {
                            last_err = Some(TransportError::ByteCapExceeded {
                                url: url.to_string(),
                                max_bytes,
                            });
                            continue;
                        }
                        if started.elapsed() > Duration::from_millis(limits.timeout_ms) {
                            last_err = Some(TransportError::Timeout {
                                url: url.to_string(),
                                timeout_ms: limits.timeout_ms,
                            });
                            continue;
                        }
                        return Ok((body, content_type));
                    }
                    Err(err) => {
                        last_err = Some(TransportError::Cause {
                            url: url.to_string(),
                            attempts: attempt + 1,
                            cause: err.to_string(),
                        });
                    }
                }
            }
            Err(err) if err.is_timeout() => {
                last_err = Some(TransportError::Timeout {
                    url: url.to_string(),
                    timeout_ms: limits.timeout_ms,
                });
            }
            Err(err) => {
                last_err = Some(TransportError::Cause {
                    url: url.to_string(),
                    attempts: attempt + 1,
                    cause: err.to_string(),
                });
            }
        }
    }

    Err(last_err.unwrap_or(TransportError::Cause {
        url: url.to_string(),
        attempts: limits.retries + 1,
        cause: "exhausted retries with no recorded failure".to_string(),
    }))
}
