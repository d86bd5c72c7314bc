/// Components that together fly one aerial light show.
pub mod air_show {
    /// The light scheduler which executes a lighting timeline
    /// against wall-clock time.
    pub mod lights;
    /// The mission uploader which pushes the waypoint list
    /// to the autopilot before the show starts.
    pub mod mission;
    /// The orchestrator which sequences upload, scheduling
    /// and the begin-mission signal.
    pub mod orchestrator;
}

/// Helpful prelude when working with components.
pub mod prelude {
    pub use crate::components::air_show::lights::*;
    pub use crate::components::air_show::mission::*;
    pub use crate::components::air_show::orchestrator::*;
}
