//! Observable execution events
//!
//! Events are explicit and typed. Per-row events log at TRACE so a
//! production log level of INFO stays quiet during scans.

use std::fmt;

use super::logger::Severity;

/// Observable events of the streaming execution layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Configuration loaded
    ConfigLoaded,

    // Stream lifecycle
    /// A statement cursor was opened
    CursorOpen,
    /// A statement cursor was closed
    CursorClose,
    /// A statement failed and its operator tree was unwound
    CursorUnwound,

    // Index scan
    /// Index scan descended to its first leaf for a range
    IndexScanPositioned,
    /// Saved cursor was stale and the scan re-descended from the root
    IndexScanRepositioned,
    /// Fetched row no longer matches its index entry
    IndexScanPhantom,
    /// Scan moved on to the next disjoint key range
    IndexScanRangeAdvanced,
    /// Index inactive under bulk load, scan produced no rows
    IndexScanSkipped,
    /// Index inactive or unknown outside bulk load
    IndexScanRejected,

    // Procedures
    /// Procedure sub-request started
    ProcedureStart,
    /// Procedure sub-request unwound after a failure
    ProcedureUnwound,

    // Requests
    /// Pending cancellation observed at a yield point
    RequestCancelled,
    /// Index page failed validation
    PageCorruption,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::CursorOpen => "CURSOR_OPEN",
            Event::CursorClose => "CURSOR_CLOSE",
            Event::CursorUnwound => "CURSOR_UNWOUND",
            Event::IndexScanPositioned => "INDEX_SCAN_POSITIONED",
            Event::IndexScanRepositioned => "INDEX_SCAN_REPOSITIONED",
            Event::IndexScanPhantom => "INDEX_SCAN_PHANTOM",
            Event::IndexScanRangeAdvanced => "INDEX_SCAN_RANGE_ADVANCED",
            Event::IndexScanSkipped => "INDEX_SCAN_SKIPPED",
            Event::IndexScanRejected => "INDEX_SCAN_REJECTED",
            Event::ProcedureStart => "PROCEDURE_START",
            Event::ProcedureUnwound => "PROCEDURE_UNWOUND",
            Event::RequestCancelled => "REQUEST_CANCELLED",
            Event::PageCorruption => "PAGE_CORRUPTION",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::IndexScanPositioned
            | Event::IndexScanRepositioned
            | Event::IndexScanPhantom
            | Event::IndexScanRangeAdvanced => Severity::Trace,
            Event::IndexScanSkipped | Event::CursorUnwound | Event::ProcedureUnwound => {
                Severity::Warn
            }
            Event::IndexScanRejected | Event::RequestCancelled => Severity::Error,
            Event::PageCorruption => Severity::Fatal,
            _ => Severity::Info,
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::PageCorruption)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            Event::ConfigLoaded,
            Event::CursorOpen,
            Event::CursorClose,
            Event::CursorUnwound,
            Event::IndexScanPositioned,
            Event::IndexScanRepositioned,
            Event::IndexScanPhantom,
            Event::IndexScanRangeAdvanced,
            Event::IndexScanSkipped,
            Event::IndexScanRejected,
            Event::ProcedureStart,
            Event::ProcedureUnwound,
            Event::RequestCancelled,
            Event::PageCorruption,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_per_row_events_are_trace() {
        assert_eq!(Event::IndexScanRepositioned.severity(), Severity::Trace);
        assert_eq!(Event::IndexScanPhantom.severity(), Severity::Trace);
        assert_eq!(Event::IndexScanSkipped.severity(), Severity::Warn);
    }

    #[test]
    fn test_fatal_events() {
        assert!(Event::PageCorruption.is_fatal());
        assert!(!Event::IndexScanSkipped.is_fatal());
    }
}
