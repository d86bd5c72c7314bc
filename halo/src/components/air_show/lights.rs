use crate::devices::hardware::autopilot::{CommandSink, SinkError};
use crate::messages::show::descriptor::{ColorCommand, ColorCurve, ColorEvent, LightingProgram};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{self, Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Control value sent for a fully off channel. The light outputs
/// expect a pulse width style signal between 1000 and 2000
/// microseconds, the same range the flight surfaces use.
pub const PWM_RANGE_FLOOR: u16 = 1000;
/// Microseconds of pulse width per scaled channel step.
pub const PWM_SCALE: u16 = 4;

/// Which physical output channel drives each colour. The airframe
/// wiring does not always match the logical colour order, so the
/// assignment is part of the component config rather than baked in.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoAssignment {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Default for ServoAssignment {
    /// AUX1 to AUX3 on the stock wiring harness.
    fn default() -> Self {
        Self {
            red: 9,
            green: 10,
            blue: 11,
        }
    }
}

/// Scale one colour channel by the overall brightness. Stays in
/// [0, 255] for any brightness in [0, 1].
pub fn scaled_level(channel: u8, brightness: f32) -> u8 {
    (f32::from(channel) * brightness).floor() as u8
}

/// Map a scaled channel level onto the pulse width control range,
/// 0 to 1000 and 255 to 2020.
pub fn control_value(level: u8) -> u16 {
    u16::from(level) * PWM_SCALE + PWM_RANGE_FLOOR
}

/// Why a scheduler run stopped.
#[derive(Debug)]
pub enum StopReason {
    /// Every timeline entry was dispatched.
    Completed,
    /// Cancellation was observed before the next wait or dispatch.
    Cancelled,
    /// The command link failed fatally while dispatching an entry.
    /// Entries after `index` were never attempted.
    LinkFailed { index: usize, error: SinkError },
}

/// Diagnostics reported while a show runs. Sent over an unbounded
/// channel so a slow observer can never hold up the timing loop.
#[derive(Debug)]
pub enum SchedulerEvent {
    /// The entry's target time had already passed when the
    /// scheduler reached it. The entry was still dispatched, with
    /// no wait; skipped time is never replayed.
    Overrun { index: usize, behind: Duration },
    /// One command was dropped on the link. Later entries are
    /// unaffected.
    DispatchFailed { index: usize, error: SinkError },
    /// The run is over, nothing further will be dispatched.
    Finished(StopReason),
}

/// Executes a lighting program against wall-clock time, emitting
/// one set of channel actuations per timeline entry as close as
/// possible to its scheduled offset from the show start.
pub struct LightScheduler<S: CommandSink> {
    /// Shared command link, also used concurrently by the mission
    /// uploader.
    sink: Arc<S>,
    /// Physical output channel per colour.
    servos: ServoAssignment,
    /// Observed at every suspension boundary; a cancelled token
    /// stops the run before the next wait or dispatch begins.
    cancel: CancellationToken,
    /// Diagnostics stream back to the orchestrator.
    events: mpsc::UnboundedSender<SchedulerEvent>,
}

impl<S: CommandSink> LightScheduler<S> {
    pub fn new(
        sink: Arc<S>,
        servos: ServoAssignment,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<SchedulerEvent>,
    ) -> Self {
        Self {
            sink,
            servos,
            cancel,
            events,
        }
    }

    /// Run one lighting program to completion. The program variant
    /// is decided here once; it never switches mid-run. `show_start`
    /// is the epoch every timeline offset is measured from, captured
    /// once by the caller and never re-derived, so repeated clock
    /// sampling cannot drift the schedule.
    pub async fn run(self, program: LightingProgram, show_start: Instant) {
        let reason = match program {
            LightingProgram::Sequence(timeline) => self.run_timeline(&timeline, show_start).await,
            LightingProgram::Interpolation(curve) => self.run_curve(&curve, show_start).await,
        };
        info!(?reason, "light schedule finished");
        // The orchestrator may have stopped listening, which is fine.
        let _ = self.events.send(SchedulerEvent::Finished(reason));
    }

    /// Sparse timeline: one dispatch per entry, in timeline order,
    /// never reordered, batched or skipped.
    async fn run_timeline(&self, timeline: &[ColorEvent], show_start: Instant) -> StopReason {
        for (index, event) in timeline.iter().enumerate() {
            let target = show_start + Duration::from_millis(event.timestamp);
            if !self.wait_until(index, target).await {
                return StopReason::Cancelled;
            }
            if let Err(error) = self.dispatch(index, event.color).await {
                return StopReason::LinkFailed { index, error };
            }
        }
        StopReason::Completed
    }

    /// Continuous curve: one dispatch per sampling tick until the
    /// show duration elapses. Each tick samples the curve at its
    /// scheduled offset, not the possibly late actual time, so a
    /// delayed tick still shows the colour it was meant to.
    async fn run_curve(&self, curve: &ColorCurve, show_start: Instant) -> StopReason {
        let duration = curve.duration_ms();
        let mut offset: u64 = 0;
        let mut index: usize = 0;

        loop {
            let target = show_start + Duration::from_millis(offset);
            if !self.wait_until(index, target).await {
                return StopReason::Cancelled;
            }
            if let Err(error) = self.dispatch(index, curve.sample(offset)).await {
                return StopReason::LinkFailed { index, error };
            }
            if offset >= duration {
                return StopReason::Completed;
            }
            index += 1;
            // The final tick lands exactly on the end of the curve.
            offset = (offset + curve.tick_interval_ms).min(duration);
        }
    }

    /// Suspend until the target instant. The only suspension point
    /// in the component. Returns false when cancellation was
    /// observed, in which case no dispatch for this entry may begin.
    /// A target already in the past incurs no wait at all; the
    /// overrun is reported and the entry dispatches immediately.
    async fn wait_until(&self, index: usize, target: Instant) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if target <= now {
            let behind = now.duration_since(target);
            if !behind.is_zero() {
                debug!(index, behind_ms = behind.as_millis() as u64, "target time already passed");
                let _ = self.events.send(SchedulerEvent::Overrun { index, behind });
            }
            return true;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = time::sleep_until(target) => true,
        }
    }

    /// Send the three channel actuations for one timeline entry, in
    /// red, green, blue order. A dropped command is reported and the
    /// remaining channels still go out; a fatal link error aborts
    /// the entry and is returned for the run to stop on.
    async fn dispatch(&self, index: usize, color: ColorCommand) -> Result<(), SinkError> {
        let channels = [
            (self.servos.red, color.rgb.r),
            (self.servos.green, color.rgb.g),
            (self.servos.blue, color.rgb.b),
        ];
        for (servo, channel_value) in channels {
            let control = control_value(scaled_level(channel_value, color.brightness));
            match self.sink.send_actuation(servo, control).await {
                Ok(()) => {}
                Err(error) if error.is_fatal() => {
                    error!(index, servo, %error, "command link lost");
                    return Err(error);
                }
                Err(error) => {
                    warn!(index, servo, %error, "light command dropped");
                    let _ = self
                        .events
                        .send(SchedulerEvent::DispatchFailed { index, error });
                }
            }
        }
        debug!(
            index,
            r = color.rgb.r,
            g = color.rgb.g,
            b = color.rgb.b,
            brightness = color.brightness,
            "lights set"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::devices::hardware::mock::{FailureMode, MockAutopilot};
    use crate::messages::show::descriptor::Rgb;
    use rstest::rstest;

    fn event(timestamp: u64, r: u8, g: u8, b: u8, brightness: f32) -> ColorEvent {
        ColorEvent {
            timestamp,
            color: ColorCommand {
                rgb: Rgb { r, g, b },
                brightness,
            },
        }
    }

    fn scheduler(
        sink: Arc<MockAutopilot>,
    ) -> (
        LightScheduler<MockAutopilot>,
        CancellationToken,
        mpsc::UnboundedReceiver<SchedulerEvent>,
    ) {
        let cancel = CancellationToken::new();
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            LightScheduler::new(sink, ServoAssignment::default(), cancel.clone(), sender),
            cancel,
            receiver,
        )
    }

    fn drain(receiver: &mut mpsc::UnboundedReceiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            drained.push(event);
        }
        drained
    }

    #[rstest]
    #[case(0, 0.0, 1000)]
    #[case(0, 1.0, 1000)]
    #[case(255, 1.0, 2020)]
    #[case(255, 0.5, 1508)]
    #[case(128, 0.5, 1256)]
    #[case(1, 1.0, 1004)]
    /// Boundary and midpoint checks of the channel to pulse width
    /// mapping: floor(c * b) * 4 + 1000, always within [1000, 2020].
    fn test_control_value_mapping(
        #[case] channel: u8,
        #[case] brightness: f32,
        #[case] expected: u16,
    ) {
        let value = control_value(scaled_level(channel, brightness));
        assert_eq!(value, expected);
        assert!((1000..=2020).contains(&value));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_order_matches_timeline_order() {
        let sink = Arc::new(MockAutopilot::new());
        let (scheduler, _cancel, mut receiver) = scheduler(sink.clone());
        let timeline = vec![
            event(0, 1, 0, 0, 1.0),
            event(100, 2, 0, 0, 1.0),
            event(250, 3, 0, 0, 1.0),
        ];

        scheduler
            .run(LightingProgram::Sequence(timeline), Instant::now())
            .await;

        let actuations = sink.actuations();
        assert_eq!(actuations.len(), 9, "three channels per entry");
        // The red channel values recover the entry order.
        let red_values: Vec<u16> = actuations
            .iter()
            .filter(|(channel, _)| *channel == 9)
            .map(|(_, value)| *value)
            .collect();
        assert_eq!(red_values, vec![1004, 1008, 1012]);
        assert!(matches!(
            drain(&mut receiver).last(),
            Some(SchedulerEvent::Finished(StopReason::Completed))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_due_entries_dispatch_without_waiting() {
        let sink = Arc::new(MockAutopilot::new());
        let (scheduler, _cancel, mut receiver) = scheduler(sink.clone());
        let show_start = Instant::now();

        // The process stalls for 700ms before the scheduler runs:
        // both entries are already due and must fire in a burst.
        time::advance(Duration::from_millis(700)).await;
        let before = Instant::now();
        scheduler
            .run(
                LightingProgram::Sequence(vec![event(0, 10, 0, 0, 1.0), event(500, 20, 0, 0, 1.0)]),
                show_start,
            )
            .await;

        assert_eq!(Instant::now(), before, "no additional wait was incurred");
        assert_eq!(sink.actuations().len(), 6, "both entries still dispatched");

        let overruns: Vec<Duration> = drain(&mut receiver)
            .into_iter()
            .filter_map(|reported| match reported {
                SchedulerEvent::Overrun { behind, .. } => Some(behind),
                _ => None,
            })
            .collect();
        assert_eq!(
            overruns,
            vec![Duration::from_millis(700), Duration::from_millis(200)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_between_entries_stops_dispatch() {
        let sink = Arc::new(MockAutopilot::new());
        let (scheduler, cancel, mut receiver) = scheduler(sink.clone());
        let timeline = vec![event(0, 1, 2, 3, 1.0), event(10_000, 4, 5, 6, 1.0)];

        let run = tokio::spawn(scheduler.run(LightingProgram::Sequence(timeline), Instant::now()));
        // Let the first entry dispatch and the task park on its wait.
        time::advance(Duration::from_millis(1)).await;
        cancel.cancel();
        run.await.unwrap();

        assert_eq!(
            sink.actuations().len(),
            3,
            "nothing dispatched after cancellation"
        );
        assert!(matches!(
            drain(&mut receiver).last(),
            Some(SchedulerEvent::Finished(StopReason::Cancelled))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_does_not_stop_the_timeline() {
        // Second actuation (green of entry 0) is dropped.
        let sink = Arc::new(MockAutopilot::new().with_actuation_failure(1, FailureMode::Transient));
        let (scheduler, _cancel, mut receiver) = scheduler(sink.clone());
        let timeline = vec![event(0, 1, 2, 3, 1.0), event(100, 4, 5, 6, 1.0)];

        scheduler
            .run(LightingProgram::Sequence(timeline), Instant::now())
            .await;

        assert_eq!(
            sink.actuations().len(),
            5,
            "only the one dropped command is missing"
        );
        let reported = drain(&mut receiver);
        assert!(reported
            .iter()
            .any(|event| matches!(event, SchedulerEvent::DispatchFailed { index: 0, .. })));
        assert!(matches!(
            reported.last(),
            Some(SchedulerEvent::Finished(StopReason::Completed))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_terminates_the_timeline() {
        // Second actuation takes the link down for good.
        let sink = Arc::new(MockAutopilot::new().with_actuation_failure(1, FailureMode::Fatal));
        let (scheduler, _cancel, mut receiver) = scheduler(sink.clone());
        let timeline = vec![event(0, 1, 2, 3, 1.0), event(100, 4, 5, 6, 1.0)];

        scheduler
            .run(LightingProgram::Sequence(timeline), Instant::now())
            .await;

        assert_eq!(sink.actuations().len(), 1, "entry 1 was never attempted");
        assert!(matches!(
            drain(&mut receiver).last(),
            Some(SchedulerEvent::Finished(StopReason::LinkFailed { index: 0, .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_curve_sampled_at_tick_cadence() {
        let sink = Arc::new(MockAutopilot::new());
        let (scheduler, _cancel, mut receiver) = scheduler(sink.clone());
        let curve = ColorCurve {
            keyframes: vec![event(0, 0, 0, 0, 1.0), event(100, 200, 0, 0, 1.0)],
            tick_interval_ms: 25,
        };

        let started = Instant::now();
        scheduler
            .run(LightingProgram::Interpolation(curve), started)
            .await;

        assert_eq!(
            Instant::now().duration_since(started),
            Duration::from_millis(100),
            "ran for exactly the show duration"
        );
        // Ticks at 0, 25, 50, 75 and 100ms.
        let actuations = sink.actuations();
        assert_eq!(actuations.len(), 15);
        let red_values: Vec<u16> = actuations
            .iter()
            .filter(|(channel, _)| *channel == 9)
            .map(|(_, value)| *value)
            .collect();
        assert_eq!(red_values, vec![1000, 1200, 1400, 1600, 1800]);
        assert!(matches!(
            drain(&mut receiver).last(),
            Some(SchedulerEvent::Finished(StopReason::Completed))
        ));
    }
}
