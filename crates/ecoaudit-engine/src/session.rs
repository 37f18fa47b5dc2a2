use std::time::Duration;

use ecoaudit_contracts::events::{AuditEvent, EventWriter};
use ecoaudit_contracts::images::{AddOutcome, ImageId, ImageSet, NewImage, UploadedImage};
use ecoaudit_contracts::report::AuditReport;
use serde_json::{json, Value};

use crate::auditor::Auditor;
use crate::cancel::CancelToken;
use crate::error::{truncate_text, AuditError};
use crate::request::check_preconditions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Success,
    Error,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Loading => "loading",
            Phase::Success => "success",
            Phase::Error => "error",
        }
    }

    /// Images and description may only change while no audit is running or
    /// displayed.
    pub fn accepts_edits(self) -> bool {
        matches!(self, Phase::Idle | Phase::Error)
    }
}

/// Identifies one submission. Completions carrying an older ticket are
/// discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditTicket {
    seq: u64,
    audit_id: String,
}

impl AuditTicket {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn audit_id(&self) -> &str {
        &self.audit_id
    }
}

/// Everything a worker needs to run one audit without touching the session.
#[derive(Debug, Clone)]
pub struct AuditJob {
    pub ticket: AuditTicket,
    pub images: Vec<UploadedImage>,
    pub description: String,
    pub cancel: CancelToken,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Started(AuditJob),
    Rejected(String),
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub images: Vec<UploadedImage>,
    pub description: String,
    pub report: Option<AuditReport>,
    pub error_message: Option<String>,
    pub validation_message: Option<String>,
    pub notice: Option<String>,
    pub audit_id: Option<String>,
}

struct InFlight {
    ticket: AuditTicket,
    cancel: CancelToken,
}

/// Owns the form inputs and the Idle/Loading/Success/Error lifecycle of one
/// audit screen.
pub struct AuditSession {
    images: ImageSet,
    description: String,
    phase: Phase,
    report: Option<AuditReport>,
    error_message: Option<String>,
    validation_message: Option<String>,
    notice: Option<String>,
    in_flight: Option<InFlight>,
    last_audit_id: Option<String>,
    next_seq: u64,
    audit_timeout: Option<Duration>,
    events: Option<EventWriter>,
}

impl Default for AuditSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSession {
    pub fn new() -> Self {
        Self {
            images: ImageSet::new(),
            description: String::new(),
            phase: Phase::Idle,
            report: None,
            error_message: None,
            validation_message: None,
            notice: None,
            in_flight: None,
            last_audit_id: None,
            next_seq: 1,
            audit_timeout: None,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self.emit(AuditEvent::SessionStarted, json!({}));
        self
    }

    /// Overall deadline applied to every submitted audit.
    pub fn with_audit_timeout(mut self, timeout: Duration) -> Self {
        self.audit_timeout = Some(timeout);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn images(&self) -> &ImageSet {
        &self.images
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn report(&self) -> Option<&AuditReport> {
        self.report.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn validation_message(&self) -> Option<&str> {
        self.validation_message.as_deref()
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            images: self.images.as_slice().to_vec(),
            description: self.description.clone(),
            report: self.report.clone(),
            error_message: self.error_message.clone(),
            validation_message: self.validation_message.clone(),
            notice: self.notice.clone(),
            audit_id: self.last_audit_id.clone(),
        }
    }

    /// Returns `None` when the current phase does not accept edits.
    pub fn add_images(&mut self, batch: impl IntoIterator<Item = NewImage>) -> Option<AddOutcome> {
        if !self.phase.accepts_edits() {
            self.emit_ignored("add_images");
            return None;
        }
        let outcome = self.images.add(batch);
        self.notice = outcome.notice();
        self.validation_message = None;
        self.emit(
            AuditEvent::ImagesAdded,
            json!({
                "added": outcome.added.iter().map(|id| id.get()).collect::<Vec<_>>(),
                "dropped": outcome.dropped,
                "count": self.images.len(),
            }),
        );
        Some(outcome)
    }

    pub fn remove_image(&mut self, id: ImageId) -> bool {
        if !self.phase.accepts_edits() {
            self.emit_ignored("remove_image");
            return false;
        }
        let removed = self.images.remove(id);
        if removed {
            self.notice = None;
            self.emit(
                AuditEvent::ImageRemoved,
                json!({"id": id.get(), "count": self.images.len()}),
            );
        }
        removed
    }

    pub fn set_description(&mut self, text: &str) -> bool {
        if !self.phase.accepts_edits() {
            self.emit_ignored("set_description");
            return false;
        }
        self.description = text.to_string();
        self.validation_message = None;
        self.emit_description_updated();
        true
    }

    /// Adds a line to the description, as typing into the text area would.
    pub fn append_description(&mut self, text: &str) -> bool {
        if !self.phase.accepts_edits() {
            self.emit_ignored("append_description");
            return false;
        }
        if !self.description.is_empty() {
            self.description.push('\n');
        }
        self.description.push_str(text);
        self.validation_message = None;
        self.emit_description_updated();
        true
    }

    pub fn submit(&mut self) -> SubmitOutcome {
        if !self.phase.accepts_edits() {
            self.emit_ignored("submit");
            return SubmitOutcome::Ignored;
        }
        if let Err(err) = check_preconditions(self.images.len(), &self.description) {
            let message = match err {
                AuditError::Validation(message) => message,
                other => other.to_string(),
            };
            self.phase = Phase::Idle;
            self.error_message = None;
            self.validation_message = Some(message.clone());
            self.emit(
                AuditEvent::AuditRejected,
                json!({"reason": message, "images": self.images.len()}),
            );
            return SubmitOutcome::Rejected(message);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let ticket = AuditTicket {
            seq,
            audit_id: uuid::Uuid::new_v4().to_string(),
        };
        let cancel = match self.audit_timeout {
            Some(timeout) => CancelToken::with_timeout(timeout),
            None => CancelToken::new(),
        };

        self.phase = Phase::Loading;
        self.report = None;
        self.error_message = None;
        self.validation_message = None;
        self.last_audit_id = Some(ticket.audit_id.clone());
        self.in_flight = Some(InFlight {
            ticket: ticket.clone(),
            cancel: cancel.clone(),
        });
        self.emit(
            AuditEvent::AuditStarted,
            json!({
                "audit_id": ticket.audit_id,
                "seq": seq,
                "images": self.images.len(),
                "description_chars": self.description.trim().chars().count(),
            }),
        );

        SubmitOutcome::Started(AuditJob {
            ticket,
            images: self.images.as_slice().to_vec(),
            description: self.description.clone(),
            cancel,
        })
    }

    /// Applies the result of the in-flight audit. Returns `false` when the
    /// ticket is stale and the result was dropped.
    pub fn complete(&mut self, ticket: &AuditTicket, result: Result<AuditReport, AuditError>) -> bool {
        let current = self
            .in_flight
            .as_ref()
            .map(|in_flight| &in_flight.ticket == ticket)
            .unwrap_or(false);
        if !current {
            self.emit(
                AuditEvent::AuditResultDiscarded,
                json!({"audit_id": ticket.audit_id, "seq": ticket.seq}),
            );
            return false;
        }
        self.in_flight = None;

        let (event, payload) = match result {
            Ok(report) => {
                let payload = json!({
                    "audit_id": ticket.audit_id,
                    "eco_score": report.eco_score,
                    "steps": report.actionable_steps.len(),
                });
                self.phase = Phase::Success;
                self.report = Some(report);
                self.error_message = None;
                (AuditEvent::AuditCompleted, payload)
            }
            Err(err) => {
                let payload = json!({
                    "audit_id": ticket.audit_id,
                    "error_kind": err.kind(),
                    "error": truncate_text(&err.to_string(), 1024),
                });
                self.report = None;
                if err.is_user_visible() {
                    self.phase = Phase::Idle;
                    self.error_message = None;
                    self.validation_message = Some(err.user_message().to_string());
                } else {
                    self.phase = Phase::Error;
                    self.error_message = Some(err.user_message().to_string());
                }
                (AuditEvent::AuditFailed, payload)
            }
        };
        self.emit(event, payload);
        true
    }

    /// Trips the cancel token of the running audit. The phase stays
    /// `Loading` until the worker reports back.
    pub fn cancel(&mut self) -> bool {
        let Some(in_flight) = self.in_flight.as_ref() else {
            return false;
        };
        in_flight.cancel.cancel();
        let audit_id = in_flight.ticket.audit_id.clone();
        self.emit(AuditEvent::AuditCancelRequested, json!({"audit_id": audit_id}));
        true
    }

    /// Starts over with an empty form. Ignored while an audit is running.
    pub fn reset(&mut self) -> bool {
        if self.phase == Phase::Loading {
            self.emit_ignored("reset");
            return false;
        }
        self.images.clear();
        self.description.clear();
        self.phase = Phase::Idle;
        self.report = None;
        self.error_message = None;
        self.validation_message = None;
        self.notice = None;
        self.emit(AuditEvent::SessionReset, json!({}));
        true
    }

    /// Submits and runs the audit on the calling thread.
    pub fn submit_and_wait(&mut self, auditor: &Auditor) -> Phase {
        if let SubmitOutcome::Started(job) = self.submit() {
            let result = auditor.run_job(&job);
            self.complete(&job.ticket, result);
        }
        self.phase
    }

    fn emit_description_updated(&self) {
        let chars = self.description.chars().count();
        self.emit(AuditEvent::DescriptionUpdated, json!({"chars": chars}));
    }

    fn emit_ignored(&self, action: &str) {
        self.emit(
            AuditEvent::ActionIgnored,
            json!({"action": action, "phase": self.phase.as_str()}),
        );
    }

    /// Best effort: a failed write never blocks a transition.
    fn emit(&self, event: AuditEvent, mut payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Value::Object(fields) = &mut payload {
            fields
                .entry("phase")
                .or_insert_with(|| Value::from(self.phase.as_str()));
        }
        let _ = events.emit(event, payload);
    }
}
