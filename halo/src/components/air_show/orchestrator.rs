use crate::components::air_show::lights::{
    LightScheduler, SchedulerEvent, ServoAssignment, StopReason,
};
use crate::components::air_show::mission::MissionUploader;
use crate::devices::hardware::autopilot::{AutopilotLink, CommandSink, SinkError};
use crate::messages::show::descriptor::{ShowDescriptor, ShowError};
use serde::{Deserialize, Serialize};
use std::{ffi::OsStr, path::Path, sync::Arc};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Failures that prevent a show from starting. Once the scheduler
/// task is running its failures are reported through the
/// [`ShowHandle`] event stream instead.
#[derive(Error, Debug)]
pub enum ShowStartError {
    #[error(transparent)]
    Data(#[from] ShowError),
    #[error("autopilot link failed before the show started: {0}")]
    Link(#[from] SinkError),
}

/// Configuration for the show runner component.
#[derive(Deserialize, Serialize, PartialEq, Eq, Debug)]
pub struct ShowRunnerConfig {
    /// Host and port of the autopilot command bridge.
    autopilot_addr: String,
    /// Physical output channel per colour.
    #[serde(default)]
    servos: ServoAssignment,
}

impl ShowRunnerConfig {
    /// Show runner configuration with the stock servo wiring.
    ///
    /// * `autopilot_addr`: bridge address, i.e. 127.0.0.1:5760.
    pub fn new(autopilot_addr: String) -> Self {
        Self {
            autopilot_addr,
            servos: ServoAssignment::default(),
        }
    }

    /// Override the output channel assignment for airframes wired
    /// differently from the stock harness.
    pub fn with_servos(mut self, servos: ServoAssignment) -> Self {
        self.servos = servos;
        self
    }

    /// Build the config by reading a file, this is a helper function.
    ///
    /// * `filepath`: path to config.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Self {
        let file = Path::new(&filepath);
        if file.is_file() {
            let config_file = config::Config::builder()
                .add_source(config::File::new(
                    &file.to_string_lossy(),
                    config::FileFormat::Yaml,
                ))
                .build()
                .expect("Failed read config");

            config_file
                .try_deserialize::<ShowRunnerConfig>()
                .expect("Failed to parse config file into struct")
        } else {
            panic!("Could not locate the config file {:?}", file);
        }
    }
}

/// Handle to one running show, returned once the mission is on the
/// vehicle and the scheduler task is live.
pub struct ShowHandle {
    /// The scheduler task; resolves when the lighting run finishes.
    pub task: JoinHandle<()>,
    /// Diagnostics stream from the scheduler. Reading it never
    /// affects the timing loop.
    pub events: mpsc::UnboundedReceiver<SchedulerEvent>,
    /// Cancels the lighting run at its next suspension boundary.
    pub cancel: CancellationToken,
}

/// Sequences one show: upload the mission, start the light
/// scheduler as an independent task, signal the vehicle to begin.
pub struct ShowOrchestrator;

impl ShowOrchestrator {
    /// Run a show over an established command link. Data errors
    /// surface here, before any command reaches the vehicle. The
    /// scheduler is spawned before the begin-mission signal goes
    /// out and neither flow waits on the other afterwards.
    ///
    /// * `sink`: command link, shared with the scheduler task.
    /// * `show`: parsed show descriptor.
    /// * `servos`: output channel per colour.
    pub async fn run_show<S>(
        sink: Arc<S>,
        show: ShowDescriptor,
        servos: ServoAssignment,
    ) -> Result<ShowHandle, ShowStartError>
    where
        S: CommandSink + 'static,
    {
        show.validate()?;
        MissionUploader::new(sink.as_ref())
            .upload(&show.waypoints)
            .await?;

        let cancel = CancellationToken::new();
        let (sender, events) = mpsc::unbounded_channel();
        let scheduler = LightScheduler::new(sink.clone(), servos, cancel.clone(), sender);

        // The show epoch is sampled exactly once; every timeline
        // offset is measured from this instant.
        let show_start = Instant::now();
        info!(name = %show.name, "light show starting");
        let task = tokio::spawn(scheduler.run(show.lighting, show_start));

        if let Err(error) = sink.send_mission_start().await {
            // The scheduler task is already live; stop it before
            // telling the caller the show never started, so no
            // light command can fire after this return.
            cancel.cancel();
            let _ = task.await;
            return Err(error.into());
        }
        Ok(ShowHandle {
            task,
            events,
            cancel,
        })
    }
}

/// Component that flies shows over one autopilot link.
pub struct ShowRunner {
    /// Unique id of the component.
    uuid: Uuid,
    /// Bridge address the link connects to.
    autopilot_addr: String,
    /// Output channel per colour.
    servos: ServoAssignment,
}

impl ShowRunner {
    /// Generate a new component by consuming a config.
    ///
    /// * `config`: `ShowRunnerConfig`
    pub fn new(config: ShowRunnerConfig) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            autopilot_addr: config.autopilot_addr,
            servos: config.servos,
        }
    }

    /// Generate a new component by consuming the config stored
    /// in a file.
    ///
    /// * `filepath`: filepath to a config.
    pub fn from_config_file<F: AsRef<OsStr>>(filepath: F) -> Self {
        let config = ShowRunnerConfig::from_file(filepath);
        Self::new(config)
    }
}

/// Unit struct for controlling the show runner component.
pub struct ShowRunnerController;

impl ShowRunnerController {
    /// Start the component: connect the link, load the show file
    /// and run it to completion, draining the scheduler's
    /// diagnostics into the log as the show plays.
    ///
    /// * `runner`: consume the component.
    /// * `show_file`: path to the show file to fly.
    pub async fn start<F: AsRef<OsStr>>(
        runner: ShowRunner,
        show_file: F,
    ) -> Result<(), ShowStartError> {
        let link = Arc::new(AutopilotLink::connect(&runner.autopilot_addr).await?);
        let show = ShowDescriptor::from_file(show_file)?;
        info!(uuid = %runner.uuid, name = %show.name, "show runner starting");

        let mut handle = ShowOrchestrator::run_show(link, show, runner.servos).await?;
        while let Some(event) = handle.events.recv().await {
            match event {
                SchedulerEvent::Overrun { index, behind } => {
                    warn!(index, behind_ms = behind.as_millis() as u64, "light command fired late");
                }
                SchedulerEvent::DispatchFailed { index, error } => {
                    warn!(index, %error, "light command dropped");
                }
                SchedulerEvent::Finished(StopReason::Completed) => {
                    info!("light show completed");
                }
                SchedulerEvent::Finished(reason) => {
                    warn!(?reason, "light show stopped early");
                }
            }
        }
        if let Err(error) = handle.task.await {
            error!(%error, "light scheduler task failed");
        }
        Ok(())
    }
}
