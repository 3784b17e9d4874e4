use crate::decoder::DecodedEvent;
use crate::components::SystemEvent;
use crate::protocol::EventType;
use crate::satellite::Satellite;

/// Which streaming policy is active. Wake-stream is selected at `run`
/// time iff a wake component is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ModeKind {
    AlwaysStream,
    WakeStream,
}

/// The mode is the component that turns protocol events and device
/// events into streaming decisions. Handlers get a borrowed satellite
/// handle to reach peer components and the sender.
pub(crate) trait Mode: Send + Sync {
    fn kind(&self) -> ModeKind;

    /// Reset mode state; called by the fabric when `run` starts.
    fn init(&self) {}

    fn destroy(&self) {}

    /// Handle a decoded protocol event. Runs the default handler first,
    /// then applies mode transitions; returns whether either handled it.
    fn handle_event(
        &self,
        sat: &Satellite,
        event_type: EventType,
        event: &DecodedEvent<'_>,
    ) -> bool;

    fn handle_system_event(&self, sat: &Satellite, event: &SystemEvent<'_>);
}
