/// Binance combined stream client
///
/// Provides automatic reconnection and heartbeat. Frames are forwarded untouched as
/// [`FeedEvent::Stream`] tagged with the generation they were subscribed under.
use super::{ConnectionStatus, FeedEvent};
use depthscope_data::{Generation, exchange::binance::stream_names};
use futures::{SinkExt, StreamExt};
use smol_str::SmolStr;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

/// WebSocket client configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Combined stream base url
    pub url: Url,
    /// Ping interval to keep connection alive
    pub ping_interval: Duration,
    /// Reconnection delay after disconnect
    pub reconnect_delay: Duration,
}

impl WebSocketConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
        }
    }

    /// Set ping interval
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Combined stream url subscribing to the trade and depth streams of `symbol`.
    pub fn stream_url(&self, symbol: &str) -> Url {
        let mut url = self.url.clone();
        url.set_query(Some(&format!("streams={}", stream_names(symbol).join("/"))));
        url
    }
}

enum Disconnect {
    Reconnect,
    Stop,
}

/// Connection loop with auto-reconnect, running until the generation changes or the event
/// receiver is dropped.
pub async fn run_stream(
    config: WebSocketConfig,
    symbol: SmolStr,
    generation: Generation,
    events: mpsc::Sender<FeedEvent>,
    mut current: watch::Receiver<Generation>,
) {
    let url = config.stream_url(&symbol);
    info!(%symbol, %generation, %url, "starting market stream");

    loop {
        if *current.borrow() != generation {
            break;
        }

        let _ = events
            .send(FeedEvent::Status {
                generation,
                status: ConnectionStatus::Reconnecting,
            })
            .await;

        match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!(%symbol, %generation, "connected to market stream");
                let _ = events
                    .send(FeedEvent::Status {
                        generation,
                        status: ConnectionStatus::Connected,
                    })
                    .await;

                let (mut write, mut read) = ws_stream.split();
                let mut ping = tokio::time::interval(config.ping_interval);
                ping.tick().await;

                let disconnect = loop {
                    tokio::select! {
                        message = read.next() => match message {
                            Some(Ok(Message::Text(text))) => {
                                let frame = FeedEvent::Stream {
                                    generation,
                                    text: text.as_str().to_owned(),
                                };
                                if events.send(frame).await.is_err() {
                                    warn!("event receiver dropped, stopping market stream");
                                    break Disconnect::Stop;
                                }
                            }
                            Some(Ok(Message::Close(_))) => {
                                info!(%symbol, "server closed market stream");
                                break Disconnect::Reconnect;
                            }
                            Some(Ok(_)) => {
                                // Ping, pong and binary frames
                            }
                            Some(Err(error)) => {
                                error!(%symbol, %error, "market stream error");
                                break Disconnect::Reconnect;
                            }
                            None => break Disconnect::Reconnect,
                        },
                        _ = ping.tick() => {
                            if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                                debug!("failed to send ping, connection likely dead");
                                break Disconnect::Reconnect;
                            }
                        }
                        changed = current.changed() => {
                            if changed.is_err() || *current.borrow() != generation {
                                break Disconnect::Stop;
                            }
                        }
                    }
                };

                let _ = write.close().await;
                let _ = events
                    .send(FeedEvent::Status {
                        generation,
                        status: ConnectionStatus::Disconnected,
                    })
                    .await;

                if let Disconnect::Stop = disconnect {
                    break;
                }
                warn!(%symbol, "market stream closed, will reconnect");
            }
            Err(error) => {
                error!(%symbol, %url, %error, "failed to connect to market stream");
                let _ = events
                    .send(FeedEvent::Status {
                        generation,
                        status: ConnectionStatus::Disconnected,
                    })
                    .await;
            }
        }

        debug!(delay = ?config.reconnect_delay, "waiting before reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            changed = current.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!(%symbol, %generation, "market stream stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = WebSocketConfig::new(Url::parse("ws://localhost:8080/stream").unwrap())
            .with_ping_interval(Duration::from_secs(15))
            .with_reconnect_delay(Duration::from_secs(5));

        assert_eq!(config.url.as_str(), "ws://localhost:8080/stream");
        assert_eq!(config.ping_interval, Duration::from_secs(15));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_stream_url() {
        let config = WebSocketConfig::new(Url::parse("wss://fstream.binance.com/stream").unwrap());

        assert_eq!(
            config.stream_url("BTCUSDT").as_str(),
            "wss://fstream.binance.com/stream?streams=btcusdt@aggTrade/btcusdt@depth@100ms"
        );
    }
}
