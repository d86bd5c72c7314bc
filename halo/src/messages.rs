/// Standardise how show descriptions are brought into the
/// control system. Provide test suite to ensure the file
/// format is respected.
pub mod show {
    /// Show descriptors come from the choreography tooling. They
    /// specify the flight path and the timing characteristics
    /// for when each light command should fire.
    pub mod descriptor;
}
