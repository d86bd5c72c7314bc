use crate::messages::show::descriptor::Waypoint;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, net::TcpStream, sync::Mutex};

/// Mission items are sent in the global frame with altitude relative
/// to the launch point, as MAVLink numbers them.
pub const MAV_FRAME_GLOBAL_RELATIVE_ALT: u8 = 3;
/// Plain fly-through navigation waypoint.
pub const MAV_CMD_NAV_WAYPOINT: u16 = 16;

/// Classified failure of a single send on the command link.
#[derive(Error, Debug)]
pub enum SinkError {
    /// One command was lost, the link remains usable.
    #[error("command dropped: {0}")]
    Dropped(String),
    /// The link itself is unusable, nothing further can be sent.
    #[error("autopilot link closed: {0}")]
    LinkClosed(String),
}

impl SinkError {
    /// Whether the link is gone for good. Transient failures cost
    /// one command, fatal failures end the show.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SinkError::LinkClosed(_))
    }
}

/// One mission list entry as the autopilot expects it.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MissionItem {
    /// Position in the mission, taken from the waypoint list index.
    pub seq: u16,
    /// Coordinate frame, see [`MAV_FRAME_GLOBAL_RELATIVE_ALT`].
    pub frame: u8,
    /// Command id, see [`MAV_CMD_NAV_WAYPOINT`].
    pub command: u16,
    /// Whether this is the current item. The autopilot picks the
    /// first item itself on mission start.
    pub current: u8,
    /// Continue to the next item without waiting for a new command.
    pub autocontinue: u8,
    /// Hold time, acceptance radius, pass radius, yaw.
    pub params: [f32; 4],
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl MissionItem {
    /// Build a fly-through navigation item for one waypoint.
    ///
    /// * `seq`: index of the waypoint in the mission.
    /// * `waypoint`: position to fly through.
    pub fn nav_waypoint(seq: u16, waypoint: &Waypoint) -> Self {
        Self {
            seq,
            frame: MAV_FRAME_GLOBAL_RELATIVE_ALT,
            command: MAV_CMD_NAV_WAYPOINT,
            current: 0,
            autocontinue: 1,
            params: [0.0; 4],
            latitude: waypoint.latitude,
            longitude: waypoint.longitude,
            altitude: waypoint.altitude,
        }
    }
}

/// Wire form of one outbound command, sent as a single JSON line.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    /// Drop any mission already stored on the vehicle.
    WaypointClear,
    /// One mission list entry.
    Waypoint(MissionItem),
    /// Drive one physical output channel to a control value.
    #[serde(rename_all = "camelCase")]
    Actuation { channel: u8, control_value: u16 },
    /// Begin executing the stored mission.
    MissionStart,
}

/// Capability to send a single command to the vehicle now. The
/// show components only ever talk to the autopilot through this
/// seam, so tests can substitute a recording double.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send_waypoint_clear(&self) -> Result<(), SinkError>;
    async fn send_waypoint(&self, item: &MissionItem) -> Result<(), SinkError>;
    async fn send_actuation(&self, channel: u8, control_value: u16) -> Result<(), SinkError>;
    async fn send_mission_start(&self) -> Result<(), SinkError>;
}

/// Command link to the autopilot over a TCP bridge. The stream is
/// held behind a mutex so the mission uploader and the light
/// scheduler can share one link without coordinating; interleaved
/// sends are serialised here, never corrupted on the wire.
pub struct AutopilotLink {
    stream: Arc<Mutex<TcpStream>>,
}

impl AutopilotLink {
    /// Connect to the autopilot bridge.
    ///
    /// * `addr`: host and port of the bridge, i.e. 127.0.0.1:5760.
    pub async fn connect(addr: &str) -> Result<Self, SinkError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|error| SinkError::LinkClosed(error.to_string()))?;
        Ok(Self {
            stream: Arc::new(Mutex::new(stream)),
        })
    }

    /// Frame and send one command. Encoding failures cost only the
    /// one command, write failures mean the link is gone.
    async fn send(&self, command: &Command) -> Result<(), SinkError> {
        let mut frame =
            serde_json::to_vec(command).map_err(|error| SinkError::Dropped(error.to_string()))?;
        frame.push(b'\n');

        let mut guard = self.stream.lock().await;
        guard
            .write_all(&frame)
            .await
            .map_err(|error| SinkError::LinkClosed(error.to_string()))?;
        guard
            .flush()
            .await
            .map_err(|error| SinkError::LinkClosed(error.to_string()))?;
        // Make sure to drop the guard straight after the write so
        // the other flow is never held up longer than one send.
        drop(guard);
        Ok(())
    }
}

#[async_trait]
impl CommandSink for AutopilotLink {
    async fn send_waypoint_clear(&self) -> Result<(), SinkError> {
        self.send(&Command::WaypointClear).await
    }

    async fn send_waypoint(&self, item: &MissionItem) -> Result<(), SinkError> {
        self.send(&Command::Waypoint(*item)).await
    }

    async fn send_actuation(&self, channel: u8, control_value: u16) -> Result<(), SinkError> {
        self.send(&Command::Actuation {
            channel,
            control_value,
        })
        .await
    }

    async fn send_mission_start(&self) -> Result<(), SinkError> {
        self.send(&Command::MissionStart).await
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use rstest::rstest;

    #[test]
    fn test_nav_waypoint_item_defaults() {
        let waypoint = Waypoint {
            latitude: -37.81,
            longitude: 144.96,
            altitude: 30.0,
        };
        let item = MissionItem::nav_waypoint(4, &waypoint);

        assert_eq!(item.seq, 4);
        assert_eq!(item.frame, MAV_FRAME_GLOBAL_RELATIVE_ALT);
        assert_eq!(item.command, MAV_CMD_NAV_WAYPOINT);
        assert_eq!(item.current, 0);
        assert_eq!(item.autocontinue, 1);
        assert_eq!(item.params, [0.0; 4]);
        assert_eq!(item.latitude, waypoint.latitude);
    }

    #[rstest]
    #[case(SinkError::Dropped(String::from("radio noise")), false)]
    #[case(SinkError::LinkClosed(String::from("connection reset")), true)]
    fn test_sink_error_classification(#[case] error: SinkError, #[case] fatal: bool) {
        assert_eq!(error.is_fatal(), fatal);
    }

    #[test]
    fn test_actuation_wire_frame() {
        let frame = serde_json::to_string(&Command::Actuation {
            channel: 9,
            control_value: 2020,
        })
        .unwrap();
        assert_eq!(frame, r#"{"actuation":{"channel":9,"controlValue":2020}}"#);
    }
}
