//! Topic-partitioned publish/subscribe bus for the node's outputs.
//!
//! Built on [`tokio::sync::broadcast`]: every subscriber sees every message
//! on its topic and a slow subscriber lags instead of blocking the publisher.
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::Odometry`] | `PoseWithCovarianceStamped` after every committed scan |
//! | [`Topic::Transforms`] | odom → base `TransformStamped` |
//! | [`Topic::Maps`] | occupancy and distance grids from the publication gate |
//! | [`Topic::Alerts`] | dropped scans, degraded mode |

use odomap_types::{Event, OdomError};
use tokio::sync::broadcast;

/// Buffered events per topic before slow subscribers start lagging.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Odometry,
    Transforms,
    Maps,
    Alerts,
}

/// Shared event bus.  Clones share the underlying channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    odometry: broadcast::Sender<Event>,
    transforms: broadcast::Sender<Event>,
    maps: broadcast::Sender<Event>,
    alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` applies to every topic channel independently.
    pub fn new(capacity: usize) -> Self {
        let (odometry, _) = broadcast::channel(capacity);
        let (transforms, _) = broadcast::channel(capacity);
        let (maps, _) = broadcast::channel(capacity);
        let (alerts, _) = broadcast::channel(capacity);
        Self {
            odometry,
            transforms,
            maps,
            alerts,
        }
    }

    /// Publish `event` on `topic`.
    ///
    /// Returns the number of receivers handed the event, or
    /// [`OdomError::Channel`] when nobody is subscribed.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, OdomError> {
        self.sender(topic)
            .send(event)
            .map_err(|_| OdomError::Channel(format!("no subscribers for topic {topic:?}")))
    }

    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.sender(topic).subscribe(),
        }
    }

    /// Current number of subscribers on `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.sender(topic).receiver_count()
    }

    fn sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Odometry => &self.odometry,
            Topic::Transforms => &self.transforms,
            Topic::Maps => &self.maps,
            Topic::Alerts => &self.alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// An async receiver bound to a single [`Topic`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// `Lagged(n)` means `n` events were dropped for this subscriber;
    /// `Closed` means the bus is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}
