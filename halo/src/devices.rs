/// Devices are the atomic units that can be combined together
/// into components. Their core responsibilities do not change
/// based on location, name etc.
pub mod hardware {
    /// Device interface for the autopilot command link.
    pub mod autopilot;
    /// Recording double for the autopilot command link.
    pub mod mock;
}
