use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Bitwise combination of stream events a handler wants to receive
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u8 {
        const OPEN_COMPLETED = 1;
        const HAS_BYTES_AVAILABLE = 1 << 1;
        const HAS_SPACE_AVAILABLE = 1 << 2;
        const ERROR_OCCURRED = 1 << 3;
        const END_ENCOUNTERED = 1 << 4;
    }
}

/// A single stream lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEvent {
    OpenCompleted,
    HasBytesAvailable,
    HasSpaceAvailable,
    ErrorOccurred,
    EndEncountered,
}

impl StreamEvent {
    pub const ALL: [StreamEvent; 5] = [
        StreamEvent::OpenCompleted,
        StreamEvent::HasBytesAvailable,
        StreamEvent::HasSpaceAvailable,
        StreamEvent::ErrorOccurred,
        StreamEvent::EndEncountered,
    ];

    pub fn mask(self) -> EventMask {
        match self {
            StreamEvent::OpenCompleted => EventMask::OPEN_COMPLETED,
            StreamEvent::HasBytesAvailable => EventMask::HAS_BYTES_AVAILABLE,
            StreamEvent::HasSpaceAvailable => EventMask::HAS_SPACE_AVAILABLE,
            StreamEvent::ErrorOccurred => EventMask::ERROR_OCCURRED,
            StreamEvent::EndEncountered => EventMask::END_ENCOUNTERED,
        }
    }

    /// Numeric event code
    pub fn code(self) -> u8 {
        self.mask().bits()
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.code() == code)
    }
}

impl EventMask {
    pub fn matches(self, event: StreamEvent) -> bool {
        self.contains(event.mask())
    }
}

impl From<StreamEvent> for EventMask {
    fn from(event: StreamEvent) -> Self {
        event.mask()
    }
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamEvent::OpenCompleted => "open-completed",
            StreamEvent::HasBytesAvailable => "has-bytes-available",
            StreamEvent::HasSpaceAvailable => "has-space-available",
            StreamEvent::ErrorOccurred => "error-occurred",
            StreamEvent::EndEncountered => "end-encountered",
        };
        f.write_str(name)
    }
}
