//! [`LidarOdometryNode`] – the collaborator layer around
//! [`OdometryService`].
//!
//! Turns core results into messages on the [`EventBus`]:
//!
//! | Trigger | Output |
//! |---|---|
//! | [`on_laser_scan`](LidarOdometryNode::on_laser_scan) ok | pose on `Odometry`, odom → base transform on `Transforms` |
//! | [`on_laser_scan`](LidarOdometryNode::on_laser_scan) error | `ScanDropped` (and `Degraded` when the map is full) on `Alerts` |
//! | [`publish_maps`](LidarOdometryNode::publish_maps) | occupancy + distance grids on `Maps` |
//!
//! Scan errors never escape the node; they are logged and reported as alerts.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use odomap_core::{OdometryService, ScanOutcome, TransformSource};
use odomap_types::msgs::{GetMapResponse, TransformStamped};
use odomap_types::{Event, EventPayload, LaserScan, OdomError, PoseEstimate};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, trace, warn};

use crate::bus::{EventBus, Topic};
use crate::config::NodeConfig;
use crate::msg;

const SOURCE: &str = "odomap-node::odometry";

pub struct LidarOdometryNode {
    config: NodeConfig,
    service: OdometryService,
    bus: EventBus,
    latest_transform: RwLock<Option<TransformStamped>>,
}

impl LidarOdometryNode {
    pub fn new(
        config: NodeConfig,
        transforms: Arc<dyn TransformSource>,
        bus: EventBus,
    ) -> Result<Self, OdomError> {
        config.validate()?;
        let service = OdometryService::new(config.odometry.clone(), &config.base_frame_id, transforms)?;
        Ok(Self {
            config,
            service,
            bus,
            latest_transform: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn service(&self) -> &OdometryService {
        &self.service
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Scan callback.  Returns the outcome when the scan was committed.
    pub fn on_laser_scan(&self, scan: &LaserScan) -> Option<ScanOutcome> {
        match self.service.on_scan(scan) {
            Ok(outcome) => {
                self.publish_pose(&outcome.estimate);
                Some(outcome)
            }
            Err(e) => {
                self.report_drop(scan, &e);
                None
            }
        }
    }

    fn publish_pose(&self, estimate: &PoseEstimate) {
        let pose = msg::pose_message(estimate, &self.config.odom_frame_id);
        let transform = msg::odom_transform(
            estimate,
            &self.config.odom_frame_id,
            &self.config.base_frame_id,
            self.config.transform_tolerance,
        );
        *self
            .latest_transform
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(transform.clone());

        self.publish(Topic::Odometry, EventPayload::Pose(pose));
        self.publish(Topic::Transforms, EventPayload::Transform(transform));
    }

    fn report_drop(&self, scan: &LaserScan, e: &OdomError) {
        let recoverable = e.is_recoverable();
        match e {
            OdomError::OutOfOrderScan { .. } => {
                debug!(frame = %scan.frame_id, stamp = scan.stamp, error = %e, "dropping stale scan")
            }
            _ if recoverable => {
                warn!(frame = %scan.frame_id, stamp = scan.stamp, error = %e, "dropping scan")
            }
            _ => error!(frame = %scan.frame_id, stamp = scan.stamp, error = %e, "scan rejected"),
        }

        self.publish(
            Topic::Alerts,
            EventPayload::ScanDropped {
                frame_id: scan.frame_id.clone(),
                stamp: scan.stamp,
                reason: e.to_string(),
                recoverable,
            },
        );
        if matches!(e, OdomError::GridResize { .. }) {
            self.publish(Topic::Alerts, EventPayload::Degraded { reason: e.to_string() });
        }
    }

    /// Map query: the current occupancy grid, built from one consistent snapshot.
    pub fn on_get_map(&self) -> GetMapResponse {
        let stamp = self.service.current_pose().stamp;
        let snapshot = self.service.snapshot();
        GetMapResponse {
            map: msg::occupancy_grid(&snapshot, &self.config.odom_frame_id, stamp),
        }
    }

    /// Publish the occupancy and distance grids.  Returns how many
    /// subscribers received them.
    pub fn publish_maps(&self) -> usize {
        let stamp = self.service.current_pose().stamp;
        let snapshot = self.service.snapshot();
        let frame = &self.config.odom_frame_id;
        let occupancy = msg::occupancy_grid(&snapshot, frame, stamp);
        let distance = msg::distance_grid(&snapshot, frame, stamp);
        debug!(
            width = snapshot.width,
            height = snapshot.height,
            updates = snapshot.updates,
            "publishing maps"
        );
        self.publish(Topic::Maps, EventPayload::OccupancyMap(occupancy))
            + self.publish(Topic::Maps, EventPayload::DistanceMap(distance))
    }

    /// Most recent odom → base transform, if any scan was committed.
    pub fn latest_transform(&self) -> Option<TransformStamped> {
        self.latest_transform
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn current_pose(&self) -> PoseEstimate {
        self.service.current_pose()
    }

    /// Publishing with nobody listening is normal and only traced.
    fn publish(&self, topic: Topic, payload: EventPayload) -> usize {
        match self.bus.publish_to(topic, Event::new(SOURCE, payload)) {
            Ok(n) => n,
            Err(e) => {
                trace!(?topic, error = %e, "event not delivered");
                0
            }
        }
    }
}

/// Publication gate: call [`LidarOdometryNode::publish_maps`] every `period`.
///
/// Snapshot and conversion run on the blocking pool, so a large map never
/// stalls the runtime.  Abort the returned handle to stop.
pub fn spawn_publisher(node: Arc<LidarOdometryNode>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let node = Arc::clone(&node);
            if let Err(e) = tokio::task::spawn_blocking(move || node.publish_maps()).await {
                error!(error = %e, "map publication task failed");
            }
        }
    })
}
