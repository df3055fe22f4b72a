//! Streaming wrappers the control plane applies to every outbound SSE
//! stream it relays from the container to the caller (spec §4.7 "Streaming
//! wrappers"): activity renewal, health supervision, and a hang timeout.
//! Grounded in the teacher's `tokio::select!`-driven WebSocket relay loops
//! (`proxy_websocket` in the original `api.rs`), generalized from a raw byte
//! relay to one that also calls back into caller-supplied renewal/health
//! hooks.

use std::time::Duration;

use futures::stream::Stream;
use futures::StreamExt;

use crate::errors::ClientError;

const ACTIVITY_RENEWAL_THROTTLE: Duration = Duration::from_secs(5);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const HANG_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Called on the first chunk, then at most once per [`ACTIVITY_RENEWAL_THROTTLE`].
pub trait ActivityRenewal: Send {
    fn renew(&mut self);
}

/// Returns `true` while the container instance backing this stream remains healthy.
#[async_trait::async_trait]
pub trait HealthCheck: Send {
    async fn is_healthy(&mut self) -> bool;
}

/// Wrap `inner` with activity renewal, periodic health supervision, and a
/// hang timeout. Cancellation (the returned stream being dropped) releases
/// both timers since they live only as locals of this generator.
pub fn supervise<S>(
    inner: S,
    mut renewal: impl ActivityRenewal + 'static,
    mut health: impl HealthCheck + 'static,
) -> impl Stream<Item = Result<Vec<u8>, ClientError>>
where
    S: Stream<Item = Result<Vec<u8>, ClientError>> + Unpin + Send + 'static,
{
    async_stream::stream! {
        let mut inner = inner;
        let mut seen_first_chunk = false;
        let mut last_renewal = tokio::time::Instant::now();
        let mut last_health_check = tokio::time::Instant::now();

        loop {
            let hang_deadline = tokio::time::sleep(HANG_TIMEOUT);
            tokio::pin!(hang_deadline);

            tokio::select! {
                biased;
                chunk = inner.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            let now = tokio::time::Instant::now();
                            if !seen_first_chunk || now.duration_since(last_renewal) >= ACTIVITY_RENEWAL_THROTTLE {
                                renewal.renew();
                                last_renewal = now;
                            }
                            seen_first_chunk = true;

                            if now.duration_since(last_health_check) >= HEALTH_CHECK_INTERVAL {
                                last_health_check = now;
                                if !health.is_healthy().await {
                                    yield Err(ClientError::Transient {
                                        message: "container became unhealthy mid-stream".to_string(),
                                        retry_after_secs: 3,
                                    });
                                    return;
                                }
                            }

                            yield Ok(bytes);
                        }
                        Some(Err(err)) => {
                            yield Err(err);
                            return;
                        }
                        None => return,
                    }
                }
                _ = &mut hang_deadline => {
                    yield Err(ClientError::ProcessReadyTimeout {
                        process_id: String::new(),
                        condition: "no stream activity for 5 minutes".to_string(),
                    });
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    struct CountingRenewal {
        count: usize,
    }

    impl ActivityRenewal for CountingRenewal {
        fn renew(&mut self) {
            self.count += 1;
        }
    }

    struct AlwaysHealthy;

    #[async_trait::async_trait]
    impl HealthCheck for AlwaysHealthy {
        async fn is_healthy(&mut self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn forwards_all_chunks_and_renews_on_first() {
        let chunks = vec![Ok(b"a".to_vec()), Ok(b"b".to_vec()), Ok(b"c".to_vec())];
        let inner = stream::iter(chunks);
        let renewal = CountingRenewal { count: 0 };
        let wrapped = supervise(inner, renewal, AlwaysHealthy);
        tokio::pin!(wrapped);

        let mut collected = Vec::new();
        while let Some(item) = wrapped.next().await {
            collected.push(item.unwrap());
        }
        assert_eq!(collected, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn propagates_inner_stream_errors() {
        let chunks: Vec<Result<Vec<u8>, ClientError>> =
            vec![Ok(b"a".to_vec()), Err(ClientError::Internal("boom".into()))];
        let inner = stream::iter(chunks);
        let wrapped = supervise(inner, CountingRenewal { count: 0 }, AlwaysHealthy);
        tokio::pin!(wrapped);

        let first = wrapped.next().await.unwrap();
        assert!(first.is_ok());
        let second = wrapped.next().await.unwrap();
        assert!(second.is_err());
    }
}
