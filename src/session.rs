//! Session state machine: Upload → Confirm → Review.
//!
//! The whole session is one immutable [`SessionState`] value. Every change
//! goes through [`SessionState::begin`] (claim the single in-flight slot)
//! and [`reduce`] (pure `(state, event) → state`), so the transitions can be
//! tested without any I/O and a caller can never observe a half-applied
//! update.
//!
//! ## In-flight guard
//!
//! Only one external call may run at a time. `begin` hands out a [`Ticket`]
//! and marks the slot busy; a second `begin` fails with
//! [`DocRefineError::Busy`] until the ticket is settled by `Ingested`,
//! `Sanitized`, `Exported` or `Failed`.
//!
//! ## Stale results
//!
//! Calls cannot be cancelled. `Reset` bumps the session epoch instead, and
//! any event carrying a ticket from an older epoch is ignored, so a reply
//! that lands after a reset never resurrects the discarded document.

use crate::error::DocRefineError;
use crate::model::{AnalysisResult, DocumentState};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Position in the three-screen flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum Step {
    /// Waiting for a document. (initial)
    #[default]
    Upload = 1,
    /// Document ingested, waiting for the user to start cleaning.
    Confirm = 2,
    /// Cleaned markup available for preview and export.
    Review = 3,
}

impl Step {
    /// The 1-based ordinal shown in the step indicator.
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Upload => "upload",
            Step::Confirm => "confirm",
            Step::Review => "review",
        };
        write!(f, "{} ({name})", self.ordinal())
    }
}

/// The external calls a session can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Operation {
    Ingest,
    Sanitize,
    Export,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Ingest => "ingest",
            Operation::Sanitize => "sanitize",
            Operation::Export => "export",
        })
    }
}

/// Token for the operation currently holding the in-flight slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    epoch: u64,
    operation: Operation,
}

impl Ticket {
    pub fn operation(&self) -> Operation {
        self.operation
    }
}

/// Snapshot of the whole session.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    step: Step,
    document: Option<Arc<DocumentState>>,
    analysis: Option<Arc<AnalysisResult>>,
    in_flight: Option<Operation>,
    epoch: u64,
}

/// Inputs to [`reduce`].
#[derive(Debug, Clone)]
pub enum Event {
    Ingested(Ticket, Arc<DocumentState>),
    Sanitized(Ticket, Arc<AnalysisResult>),
    Exported(Ticket),
    Failed(Ticket),
    Reset,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn document(&self) -> Option<&Arc<DocumentState>> {
        self.document.as_ref()
    }

    pub fn analysis(&self) -> Option<&Arc<AnalysisResult>> {
        self.analysis.as_ref()
    }

    pub fn in_flight(&self) -> Option<Operation> {
        self.in_flight
    }

    pub fn is_analyzing(&self) -> bool {
        self.in_flight == Some(Operation::Sanitize)
    }

    pub fn is_exporting(&self) -> bool {
        self.in_flight == Some(Operation::Export)
    }

    /// Markup to render for the current step: the ingested HTML while
    /// confirming, the cleaned HTML while reviewing.
    pub fn preview_html(&self) -> Option<&str> {
        match self.step {
            Step::Upload => None,
            Step::Confirm => self.document.as_deref().map(|d| d.html_content.as_str()),
            Step::Review => self.analysis.as_deref().map(|a| a.formatted_html.as_str()),
        }
    }

    /// Claim the in-flight slot for `operation`.
    ///
    /// Returns the next state (slot taken) and the ticket that must be
    /// passed back with the completion event.
    pub fn begin(&self, operation: Operation) -> Result<(SessionState, Ticket), DocRefineError> {
        if let Some(in_flight) = self.in_flight {
            return Err(DocRefineError::Busy {
                operation,
                in_flight,
            });
        }

        let allowed = match operation {
            Operation::Ingest => self.step == Step::Upload,
            Operation::Sanitize => self.document.is_some(),
            Operation::Export => self.analysis.is_some(),
        };
        if !allowed {
            return Err(DocRefineError::InvalidStep {
                operation,
                step: self.step,
            });
        }

        let next = SessionState {
            in_flight: Some(operation),
            ..self.clone()
        };
        let ticket = Ticket {
            epoch: self.epoch,
            operation,
        };
        Ok((next, ticket))
    }

    fn holds(&self, ticket: &Ticket, expected: Operation) -> bool {
        ticket.epoch == self.epoch
            && ticket.operation == expected
            && self.in_flight == Some(expected)
    }
}

/// Apply one event to a state, returning the next state.
///
/// Events with a ticket that does not match the current slot are stale and
/// leave the state untouched.
pub fn reduce(state: &SessionState, event: Event) -> SessionState {
    match event {
        Event::Reset => SessionState {
            epoch: state.epoch + 1,
            ..SessionState::default()
        },
        Event::Ingested(ticket, document) if state.holds(&ticket, Operation::Ingest) => {
            SessionState {
                step: Step::Confirm,
                document: Some(document),
                analysis: None,
                in_flight: None,
                epoch: state.epoch,
            }
        }
        Event::Sanitized(ticket, analysis) if state.holds(&ticket, Operation::Sanitize) => {
            SessionState {
                step: Step::Review,
                analysis: Some(analysis),
                in_flight: None,
                ..state.clone()
            }
        }
        Event::Exported(ticket) if state.holds(&ticket, Operation::Export) => SessionState {
            in_flight: None,
            ..state.clone()
        },
        Event::Failed(ticket) if state.holds(&ticket, ticket.operation) => SessionState {
            in_flight: None,
            ..state.clone()
        },
        stale => {
            debug!("Discarding stale session event: {:?}", stale_kind(&stale));
            state.clone()
        }
    }
}

fn stale_kind(event: &Event) -> &'static str {
    match event {
        Event::Ingested(..) => "ingested",
        Event::Sanitized(..) => "sanitized",
        Event::Exported(_) => "exported",
        Event::Failed(_) => "failed",
        Event::Reset => "reset",
    }
}
