//! Real-time progress bus: pub/sub keyed by conversation id.

mod bus;
mod event;

pub use bus::{ProgressBus, ProgressStream};
pub use event::{
    ProcessingEvent, ProcessingFailure, ProcessingSummary, ProgressUpdate, CHANNEL_COMPLETE,
    CHANNEL_ERROR, CHANNEL_UPDATE,
};
