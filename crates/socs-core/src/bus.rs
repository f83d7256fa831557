//! Publish/subscribe seam to the external scheduler.
//!
//! The driver talks to the scheduler exclusively through [`MessageBus`]:
//! it publishes [`Publication`] values and polls individual topics for
//! [`Delivery`] values. Polling never blocks; waiting with a deadline is
//! layered on top by [`crate::poll`].
//!
//! [`MemoryBus`] is a scripted in-process implementation used by the test
//! suite and for dry runs. Deliveries are queued per topic ahead of time,
//! or produced on the fly by a responder that reacts to publications.

use std::collections::{BTreeMap, VecDeque};

use socs_types::{Delivery, Publication, Topic};
use tracing::debug;

/// Errors that can occur on the message bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The transport failed (connection lost, publish rejected, ...).
    #[error("bus transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("failed to encode or decode a {topic} message: {message}")]
    Codec {
        /// Topic the payload belongs to.
        topic: Topic,
        /// Description of the failure.
        message: String,
    },

    /// A delivery arrived on a topic that does not carry its type.
    #[error("expected a {expected} delivery, got {actual}")]
    UnexpectedDelivery {
        /// Topic that was polled.
        expected: Topic,
        /// Topic of the delivery that came back.
        actual: Topic,
    },
}

/// A publish/subscribe transport.
pub trait MessageBus {
    /// Publish one message.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the message cannot be sent.
    fn publish(&mut self, message: &Publication) -> Result<(), BusError>;

    /// Take the next pending delivery on `topic`, if any. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if the transport fails or a payload cannot be
    /// decoded.
    fn poll(&mut self, topic: Topic) -> Result<Option<Delivery>, BusError>;

    /// Release transport resources. Called once at the end of the run.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] if shutdown fails.
    fn finalize(&mut self) -> Result<(), BusError> {
        Ok(())
    }
}

/// Reacts to a publication by producing deliveries.
pub type Responder = Box<dyn FnMut(&Publication) -> Vec<Delivery> + Send>;

/// Scripted in-memory bus.
///
/// Records everything published and counts polls per topic so tests can
/// assert on the exact conversation with the scheduler.
#[derive(Default)]
pub struct MemoryBus {
    /// Pending deliveries per topic.
    queues: BTreeMap<Topic, VecDeque<Delivery>>,
    /// Every publication, in order.
    published: Vec<Publication>,
    /// Number of `poll` calls per topic.
    polls: BTreeMap<Topic, u64>,
    /// Optional reaction to publications.
    responder: Option<Responder>,
    /// Whether `finalize` has been called.
    finalized: bool,
}

impl MemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a delivery on its topic.
    pub fn push(&mut self, delivery: Delivery) {
        self.queues
            .entry(delivery.topic())
            .or_default()
            .push_back(delivery);
    }

    /// Queue several deliveries in order.
    pub fn push_all(&mut self, deliveries: impl IntoIterator<Item = Delivery>) {
        for delivery in deliveries {
            self.push(delivery);
        }
    }

    /// Install a responder invoked after every publication.
    #[must_use]
    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Everything published so far.
    pub fn published(&self) -> &[Publication] {
        &self.published
    }

    /// Publications on one topic, in order.
    pub fn published_on(&self, topic: Topic) -> impl Iterator<Item = &Publication> {
        self.published.iter().filter(move |p| p.topic() == topic)
    }

    /// Number of times `topic` was polled.
    pub fn poll_count(&self, topic: Topic) -> u64 {
        self.polls.get(&topic).copied().unwrap_or(0)
    }

    /// Deliveries still queued on `topic`.
    pub fn pending(&self, topic: Topic) -> usize {
        self.queues.get(&topic).map_or(0, VecDeque::len)
    }

    /// Whether the bus has been finalized.
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }
}

impl MessageBus for MemoryBus {
    fn publish(&mut self, message: &Publication) -> Result<(), BusError> {
        if self.finalized {
            return Err(BusError::Transport {
                message: "bus already finalized".to_owned(),
            });
        }
        self.published.push(message.clone());
        if let Some(responder) = self.responder.as_mut() {
            let replies = responder(message);
            for reply in replies {
                self.push(reply);
            }
        }
        Ok(())
    }

    fn poll(&mut self, topic: Topic) -> Result<Option<Delivery>, BusError> {
        let count = self.polls.entry(topic).or_insert(0);
        *count = count.saturating_add(1);
        let delivery = self.queues.get_mut(&topic).and_then(VecDeque::pop_front);
        if let Some(d) = &delivery {
            debug!(topic = %topic, delivered = %d.topic(), "Memory bus delivery");
        }
        Ok(delivery)
    }

    fn finalize(&mut self) -> Result<(), BusError> {
        self.finalized = true;
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBus")
            .field("published", &self.published.len())
            .field("polls", &self.polls)
            .field("has_responder", &self.responder.is_some())
            .field("finalized", &self.finalized)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::DateTime;
    use socs_types::{
        Filter, FilterSwap, InterestedProposal, ObservationId, TimeMessage,
    };

    use super::*;

    fn time_message() -> Publication {
        Publication::Time(TimeMessage {
            timestamp: DateTime::from_timestamp(1_640_995_200, 0).unwrap(),
            night: 1,
            is_down: false,
            down_days: 0,
        })
    }

    #[test]
    fn deliveries_are_queued_per_topic() {
        let mut bus = MemoryBus::new();
        bus.push(Delivery::FilterSwap(FilterSwap {
            need_swap: true,
            filter_to_unmount: Filter::Y,
        }));
        assert!(bus.poll(Topic::Target).unwrap().is_none());
        assert!(bus.poll(Topic::FilterSwap).unwrap().is_some());
        assert!(bus.poll(Topic::FilterSwap).unwrap().is_none());
        assert_eq!(bus.poll_count(Topic::FilterSwap), 2);
        assert_eq!(bus.poll_count(Topic::Target), 1);
    }

    #[test]
    fn publications_are_recorded_in_order() {
        let mut bus = MemoryBus::new();
        bus.publish(&time_message()).unwrap();
        bus.publish(&time_message()).unwrap();
        assert_eq!(bus.published().len(), 2);
        assert_eq!(bus.published_on(Topic::Time).count(), 2);
        assert_eq!(bus.published_on(Topic::Cloud).count(), 0);
    }

    #[test]
    fn responder_reacts_to_publications() {
        let mut bus = MemoryBus::new().with_responder(Box::new(|message| {
            if message.topic() == Topic::Time {
                vec![Delivery::InterestedProposal(InterestedProposal {
                    observation_id: ObservationId::new(1),
                    entries: Vec::new(),
                })]
            } else {
                Vec::new()
            }
        }));
        bus.publish(&time_message()).unwrap();
        assert_eq!(bus.pending(Topic::InterestedProposal), 1);
    }

    #[test]
    fn publish_after_finalize_fails() {
        let mut bus = MemoryBus::new();
        bus.finalize().unwrap();
        assert!(bus.is_finalized());
        assert!(bus.publish(&time_message()).is_err());
    }
}
