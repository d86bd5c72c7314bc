use crate::devices::hardware::autopilot::{Command, CommandSink, MissionItem, SinkError};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Mutex};
use tokio::time::Instant;

/// How a scripted failure presents to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// The one command is dropped, the link stays up.
    Transient,
    /// The link goes down and stays down.
    Fatal,
}

/// One captured command with the instant it arrived at the sink.
#[derive(Debug, Clone)]
pub struct RecordedCommand {
    pub command: Command,
    pub at: Instant,
}

struct MockState {
    records: Vec<RecordedCommand>,
    actuation_count: usize,
    actuation_failures: HashMap<usize, FailureMode>,
    link_down: bool,
}

/// Command sink double that records every call instead of sending
/// real commands. Actuation sends can be scripted to fail so the
/// scheduler's failure isolation can be exercised without hardware.
pub struct MockAutopilot {
    state: Mutex<MockState>,
}

impl MockAutopilot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                records: Vec::new(),
                actuation_count: 0,
                actuation_failures: HashMap::new(),
                link_down: false,
            }),
        }
    }

    /// Script the nth actuation send (zero based, counted across
    /// the whole run) to fail.
    pub fn with_actuation_failure(self, nth: usize, mode: FailureMode) -> Self {
        self.state
            .lock()
            .expect("mock state poisoned")
            .actuation_failures
            .insert(nth, mode);
        self
    }

    /// Everything captured so far, in arrival order.
    pub fn recorded(&self) -> Vec<RecordedCommand> {
        self.state.lock().expect("mock state poisoned").records.clone()
    }

    /// Captured commands without their arrival instants.
    pub fn commands(&self) -> Vec<Command> {
        self.recorded()
            .into_iter()
            .map(|record| record.command)
            .collect()
    }

    /// Captured actuations as (channel, control value) pairs.
    pub fn actuations(&self) -> Vec<(u8, u16)> {
        self.commands()
            .into_iter()
            .filter_map(|command| match command {
                Command::Actuation {
                    channel,
                    control_value,
                } => Some((channel, control_value)),
                _ => None,
            })
            .collect()
    }

    fn capture(&self, command: Command) -> Result<(), SinkError> {
        let mut state = self.state.lock().expect("mock state poisoned");
        if state.link_down {
            return Err(SinkError::LinkClosed(String::from("mock link down")));
        }

        if let Command::Actuation { .. } = command {
            let nth = state.actuation_count;
            state.actuation_count += 1;
            match state.actuation_failures.get(&nth) {
                Some(FailureMode::Transient) => {
                    return Err(SinkError::Dropped(format!("scripted drop of actuation {nth}")));
                }
                Some(FailureMode::Fatal) => {
                    state.link_down = true;
                    return Err(SinkError::LinkClosed(format!(
                        "scripted link loss at actuation {nth}"
                    )));
                }
                None => {}
            }
        }

        state.records.push(RecordedCommand {
            command,
            at: Instant::now(),
        });
        Ok(())
    }
}

impl Default for MockAutopilot {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandSink for MockAutopilot {
    async fn send_waypoint_clear(&self) -> Result<(), SinkError> {
        self.capture(Command::WaypointClear)
    }

    async fn send_waypoint(&self, item: &MissionItem) -> Result<(), SinkError> {
        self.capture(Command::Waypoint(*item))
    }

    async fn send_actuation(&self, channel: u8, control_value: u16) -> Result<(), SinkError> {
        self.capture(Command::Actuation {
            channel,
            control_value,
        })
    }

    async fn send_mission_start(&self) -> Result<(), SinkError> {
        self.capture(Command::MissionStart)
    }
}
