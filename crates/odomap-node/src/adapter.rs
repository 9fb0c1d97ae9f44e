//! Scan sources.
//!
//! The node never talks to a sensor driver directly.  A [`ScanSource`]
//! produces a stream of [`LaserScan`] values which the caller feeds into the
//! scan worker.  [`ReplaySource`] plays back a recorded log.
//!
//! # Replay format
//!
//! One JSON object per line, tagged by `type`:
//!
//! ```text
//! {"type":"static_transform","parent":"base_link","child":"front_laser","translation":[0.2,0,0.1],"rotation":[1,0,0,0]}
//! {"type":"scan","frame_id":"front_laser","stamp":0.0,"angle_min":-3.14,...}
//! ```
//!
//! Transform records are applied to the shared [`TfBuffer`] when the stream
//! reaches them, so a scan always sees the transforms recorded before it.
//! Blank lines are ignored; malformed lines are logged and skipped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use odomap_core::TfBuffer;
use odomap_core::transform::{Pose3D, Quaternion, Vec3};
use odomap_types::{LaserScan, OdomError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Upper bound on a single realtime pause, so gaps in a log do not stall playback.
const MAX_REPLAY_GAP: Duration = Duration::from_secs(1);

#[async_trait]
pub trait ScanSource: Send + Sync {
    /// Open the source.  The stream ends when the source is exhausted.
    async fn scan_stream(&self) -> Result<BoxStream<'static, LaserScan>, OdomError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayRecord {
    StaticTransform {
        parent: String,
        child: String,
        translation: [f64; 3],
        /// (w, x, y, z)
        rotation: [f64; 4],
    },
    Scan(LaserScan),
}

/// Plays back a JSON-lines scan log.
pub struct ReplaySource {
    path: PathBuf,
    transforms: Arc<TfBuffer>,
    realtime: bool,
}

impl ReplaySource {
    pub fn new(path: impl Into<PathBuf>, transforms: Arc<TfBuffer>) -> Self {
        Self {
            path: path.into(),
            transforms,
            realtime: false,
        }
    }

    /// Sleep between scans according to their stamps.
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
}

fn parse_records(raw: &str) -> Vec<ReplayRecord> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(i, line)| match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(line = i + 1, error = %e, "skipping malformed replay record");
                None
            }
        })
        .collect()
}

struct ReplayState {
    records: std::vec::IntoIter<ReplayRecord>,
    transforms: Arc<TfBuffer>,
    realtime: bool,
    last_stamp: Option<f64>,
}

impl ReplayState {
    async fn next_scan(mut self) -> Option<(LaserScan, Self)> {
        for record in self.records.by_ref() {
            match record {
                ReplayRecord::StaticTransform {
                    parent,
                    child,
                    translation: [x, y, z],
                    rotation: [w, qx, qy, qz],
                } => {
                    debug!(%parent, %child, "replaying static transform");
                    self.transforms.set_transform(
                        &parent,
                        &child,
                        Pose3D::new(Vec3::new(x, y, z), Quaternion::new(w, qx, qy, qz)),
                    );
                }
                ReplayRecord::Scan(scan) => {
                    if self.realtime
                        && let Some(last) = self.last_stamp
                    {
                        let gap = (scan.stamp - last).max(0.0);
                        if gap.is_finite() {
                            tokio::time::sleep(Duration::from_secs_f64(gap).min(MAX_REPLAY_GAP))
                                .await;
                        }
                    }
                    self.last_stamp = Some(scan.stamp);
                    return Some((scan, self));
                }
            }
        }
        None
    }
}

#[async_trait]
impl ScanSource for ReplaySource {
    async fn scan_stream(&self) -> Result<BoxStream<'static, LaserScan>, OdomError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            OdomError::Io(format!("failed to read replay log {}: {e}", self.path.display()))
        })?;
        let records = parse_records(&raw);
        info!(path = %self.path.display(), records = records.len(), "opened replay log");

        let state = ReplayState {
            records: records.into_iter(),
            transforms: Arc::clone(&self.transforms),
            realtime: self.realtime,
            last_stamp: None,
        };
        Ok(stream::unfold(state, ReplayState::next_scan).boxed())
    }
}
