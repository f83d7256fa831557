//! NATS transport for the scheduler bus.
//!
//! [`NatsBus`] implements the [`MessageBus`] seam over NATS. Every topic
//! maps to the subject `socs.{topic}` and carries its payload struct as
//! JSON, untagged.
//!
//! # Subject Convention
//!
//! - **Published:** `socs.time`, `socs.observatory_state`, `socs.cloud`,
//!   `socs.seeing`, `socs.observation`, `socs.survey_config`
//! - **Subscribed:** `socs.target`, `socs.field`,
//!   `socs.interested_proposal`, `socs.filter_swap`
//!
//! Inbound subjects are subscribed once at connect time, before anything
//! is published, so no reply can arrive ahead of its subscription. Each
//! subscription buffers messages until the driver polls for them.
//!
//! # Sync/Async Bridge
//!
//! [`MessageBus`] is synchronous. Publishing runs the async client call on
//! the captured runtime handle under [`tokio::task::block_in_place`].
//! Polling never blocks: it checks the subscription once with
//! [`FutureExt::now_or_never`] and returns `None` when nothing is buffered;
//! waiting is the driver's job.

use std::collections::BTreeMap;

use futures::{FutureExt as _, StreamExt as _};
use socs_core::bus::{BusError, MessageBus};
use socs_types::{Delivery, Publication, Topic};
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};

use crate::error::EngineError;

/// Topics the driver receives from the scheduler.
const INBOUND: [Topic; 4] = [
    Topic::Target,
    Topic::Field,
    Topic::InterestedProposal,
    Topic::FilterSwap,
];

/// A [`MessageBus`] backed by a NATS connection.
pub struct NatsBus {
    client: async_nats::Client,
    subscriptions: BTreeMap<Topic, async_nats::Subscriber>,
    handle: Handle,
    finalized: bool,
}

impl NatsBus {
    /// Connect to a NATS server and subscribe to every inbound subject.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Nats`] if the connection or a subscription
    /// fails.
    pub async fn connect(url: &str) -> Result<Self, EngineError> {
        let handle = Handle::try_current().map_err(|e| EngineError::Nats {
            message: format!("no tokio runtime available: {e}"),
        })?;
        let client = async_nats::connect(url)
            .await
            .map_err(|e| EngineError::Nats {
                message: format!("failed to connect to NATS at {url}: {e}"),
            })?;

        let mut subscriptions = BTreeMap::new();
        for topic in INBOUND {
            let subject = topic.subject();
            let sub = client
                .subscribe(subject.clone())
                .await
                .map_err(|e| EngineError::Nats {
                    message: format!("failed to subscribe to {subject}: {e}"),
                })?;
            subscriptions.insert(topic, sub);
        }

        info!(nats_url = url, subscriptions = subscriptions.len(), "NATS bus connected");
        Ok(Self {
            client,
            subscriptions,
            handle,
            finalized: false,
        })
    }

    fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        tokio::task::block_in_place(|| self.handle.block_on(future))
    }
}

impl std::fmt::Debug for NatsBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsBus")
            .field("subscriptions", &self.subscriptions.keys().collect::<Vec<_>>())
            .field("finalized", &self.finalized)
            .finish_non_exhaustive()
    }
}

impl MessageBus for NatsBus {
    fn publish(&mut self, message: &Publication) -> Result<(), BusError> {
        if self.finalized {
            return Err(BusError::Transport {
                message: String::from("publish after finalize"),
            });
        }
        let topic = message.topic();
        let payload = encode(message).map_err(|e| BusError::Codec {
            topic,
            message: e.to_string(),
        })?;
        let subject = topic.subject();

        let client = self.client.clone();
        self.block_on(async move {
            client.publish(subject, payload.into()).await.map_err(|e| {
                BusError::Transport {
                    message: format!("failed to publish on {topic}: {e}"),
                }
            })?;
            client.flush().await.map_err(|e| BusError::Transport {
                message: format!("failed to flush NATS: {e}"),
            })
        })?;

        trace!(topic = %topic, "Published");
        Ok(())
    }

    fn poll(&mut self, topic: Topic) -> Result<Option<Delivery>, BusError> {
        let sub = self
            .subscriptions
            .get_mut(&topic)
            .ok_or_else(|| BusError::Transport {
                message: format!("not subscribed to {topic}"),
            })?;

        match sub.next().now_or_never() {
            None => Ok(None),
            Some(None) => Err(BusError::Transport {
                message: format!("subscription to {topic} closed"),
            }),
            Some(Some(msg)) => {
                let delivery = decode(topic, &msg.payload)?;
                debug!(topic = %topic, bytes = msg.payload.len(), "Received");
                Ok(Some(delivery))
            }
        }
    }

    fn finalize(&mut self) -> Result<(), BusError> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        let subscriptions = std::mem::take(&mut self.subscriptions);
        let client = self.client.clone();
        self.block_on(async move {
            for (topic, mut sub) in subscriptions {
                if let Err(e) = sub.unsubscribe().await {
                    warn!(topic = %topic, error = %e, "Failed to unsubscribe");
                }
            }
            client.flush().await.map_err(|e| BusError::Transport {
                message: format!("failed to flush NATS: {e}"),
            })
        })?;

        info!("NATS bus closed");
        Ok(())
    }
}

/// Serialize a publication's payload (without the topic tag).
fn encode(message: &Publication) -> Result<Vec<u8>, serde_json::Error> {
    match message {
        Publication::Time(m) => serde_json::to_vec(m),
        Publication::ObservatoryState(m) => serde_json::to_vec(m),
        Publication::Cloud(m) => serde_json::to_vec(m),
        Publication::Seeing(m) => serde_json::to_vec(m),
        Publication::Observation(m) => serde_json::to_vec(m),
        Publication::SurveyConfig(m) => serde_json::to_vec(m),
    }
}

/// Parse an inbound payload according to the subject it arrived on.
fn decode(topic: Topic, payload: &[u8]) -> Result<Delivery, BusError> {
    let codec = |e: serde_json::Error| BusError::Codec {
        topic,
        message: e.to_string(),
    };
    let parsed = match topic {
        Topic::Target => serde_json::from_slice(payload).map(Delivery::Target),
        Topic::Field => serde_json::from_slice(payload).map(Delivery::Field),
        Topic::InterestedProposal => {
            serde_json::from_slice(payload).map(Delivery::InterestedProposal)
        }
        Topic::FilterSwap => serde_json::from_slice(payload).map(Delivery::FilterSwap),
        Topic::Time
        | Topic::ObservatoryState
        | Topic::Cloud
        | Topic::Seeing
        | Topic::Observation
        | Topic::SurveyConfig => {
            return Err(BusError::Codec {
                topic,
                message: String::from("topic is outbound only"),
            });
        }
    };
    parsed.map_err(codec)
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use socs_types::{Filter, FilterSwap, ObservationId, TargetId, TimeMessage};

    use super::*;

    #[test]
    fn payloads_are_untagged() {
        let time = Publication::Time(TimeMessage {
            timestamp: Utc.with_ymd_and_hms(2022, 1, 1, 23, 30, 0).unwrap(),
            night: 1,
            is_down: false,
            down_days: 0,
        });
        let json: serde_json::Value = serde_json::from_slice(&encode(&time).unwrap()).unwrap();
        assert_eq!(json["night"], 1);
        assert!(json.get("topic").is_none());
    }

    #[test]
    fn inbound_payloads_decode_by_subject() {
        let target = br#"{"target_id": 4, "field_id": 7, "filter": "i",
                          "ra": 1.0, "dec": -3.0, "num_exposures": 2}"#;
        let delivery = decode(Topic::Target, target).unwrap();
        assert!(matches!(delivery, Delivery::Target(t) if t.target_id == TargetId::new(4)));

        let swap = br#"{"need_swap": true, "filter_to_unmount": "z"}"#;
        assert_eq!(
            decode(Topic::FilterSwap, swap).unwrap(),
            Delivery::FilterSwap(FilterSwap {
                need_swap: true,
                filter_to_unmount: Filter::Z,
            })
        );

        let interest = br#"{"observation_id": 12}"#;
        let delivery = decode(Topic::InterestedProposal, interest).unwrap();
        assert!(matches!(
            delivery,
            Delivery::InterestedProposal(i)
                if i.observation_id == ObservationId::new(12) && i.entries.is_empty()
        ));
    }

    #[test]
    fn malformed_payload_is_a_codec_error() {
        let err = decode(Topic::Field, b"{not json").unwrap_err();
        assert!(matches!(err, BusError::Codec { topic: Topic::Field, .. }));
    }

    #[test]
    fn outbound_topics_are_not_decoded() {
        let err = decode(Topic::Time, b"{}").unwrap_err();
        assert!(matches!(err, BusError::Codec { topic: Topic::Time, .. }));
    }

    /// Round trip through a live server; skipped when none is running.
    #[tokio::test(flavor = "multi_thread")]
    async fn publish_and_receive_through_server() {
        let Ok(mut bus) = NatsBus::connect("nats://localhost:4222").await else {
            return;
        };
        let scheduler = async_nats::connect("nats://localhost:4222").await.unwrap();
        scheduler
            .publish(
                Topic::FilterSwap.subject(),
                br#"{"need_swap": false, "filter_to_unmount": "u"}"#.to_vec().into(),
            )
            .await
            .unwrap();
        scheduler.flush().await.unwrap();

        let mut received = None;
        for _ in 0..100 {
            received = bus.poll(Topic::FilterSwap).unwrap();
            if received.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(matches!(received, Some(Delivery::FilterSwap(_))));
        bus.finalize().unwrap();
        assert!(bus.publish(&Publication::Time(TimeMessage {
            timestamp: Utc::now(),
            night: 1,
            is_down: false,
            down_days: 0,
        }))
        .is_err());
    }
}
