use crate::devices::hardware::autopilot::{CommandSink, MissionItem, SinkError};
use crate::messages::show::descriptor::Waypoint;
use tracing::info;

/// Pushes the flight path to the autopilot before the show starts.
/// Upload is synchronous from the orchestrator's point of view and
/// is never retried here; retry policy belongs to the transport.
pub struct MissionUploader<'a, S: CommandSink> {
    sink: &'a S,
}

impl<'a, S: CommandSink> MissionUploader<'a, S> {
    pub fn new(sink: &'a S) -> Self {
        Self { sink }
    }

    /// Clear whatever mission the vehicle is holding, then send one
    /// item per waypoint. The waypoint's position in the list is its
    /// mission sequence number, so the visit order is exactly the
    /// file order.
    ///
    /// * `waypoints`: ordered flight path, already validated.
    pub async fn upload(&self, waypoints: &[Waypoint]) -> Result<(), SinkError> {
        self.sink.send_waypoint_clear().await?;
        for (seq, waypoint) in waypoints.iter().enumerate() {
            self.sink
                .send_waypoint(&MissionItem::nav_waypoint(seq as u16, waypoint))
                .await?;
        }
        info!(count = waypoints.len(), "mission uploaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::devices::hardware::autopilot::Command;
    use crate::devices::hardware::mock::MockAutopilot;

    fn waypoint(latitude: f64) -> Waypoint {
        Waypoint {
            latitude,
            longitude: 144.96,
            altitude: 30.0,
        }
    }

    #[tokio::test]
    async fn test_upload_clears_then_sends_in_order() {
        let sink = MockAutopilot::new();
        let waypoints = vec![waypoint(1.0), waypoint(2.0), waypoint(3.0)];

        MissionUploader::new(&sink).upload(&waypoints).await.unwrap();

        let commands = sink.commands();
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[0], Command::WaypointClear);
        for (index, command) in commands[1..].iter().enumerate() {
            let Command::Waypoint(item) = command else {
                panic!("expected a mission item");
            };
            assert_eq!(item.seq, index as u16, "sequence numbers follow file order");
            assert_eq!(item.latitude, waypoints[index].latitude);
        }
    }
}
