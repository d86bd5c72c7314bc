/**
The halo control system runs scripted aerial light shows: a mission of
navigation waypoints is pushed to the autopilot while a time-indexed lighting
program is executed against wall-clock time on a separate task. Functionality
is separated into devices, components and message formats so that the show
scheduling logic can be iterated on without touching the vehicle link, and so
that the link can be swapped for a recording double in tests.
*/

/// Components in the system are created by grouping together
/// devices into a logical unit that performs some function
/// for the overall control system.
pub mod components;
/// Devices that are an atomic unit, and can be composed
/// with other devices into components to perform some function.
pub mod devices;
/// Message structure for communication into and out of the
/// control system, such as the show files produced by the
/// choreography tooling.
pub mod messages;
