use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use ecoaudit_contracts::images::{AddOutcome, ImageId, NewImage};

use crate::auditor::Auditor;
use crate::error::AuditError;
use crate::session::{AuditSession, SessionSnapshot, SubmitOutcome};

/// Drives an [`AuditSession`] from an interactive front end. Audits run on a
/// background thread so the caller can keep rendering snapshots.
pub struct AuditController {
    session: Arc<Mutex<AuditSession>>,
    auditor: Arc<Auditor>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AuditController {
    pub fn new(session: AuditSession, auditor: Auditor) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            auditor: Arc::new(auditor),
            worker: Mutex::new(None),
        }
    }

    pub fn auditor(&self) -> &Auditor {
        &self.auditor
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        lock(&self.session).snapshot()
    }

    pub fn add_images(&self, batch: impl IntoIterator<Item = NewImage>) -> Option<AddOutcome> {
        lock(&self.session).add_images(batch)
    }

    pub fn remove_image(&self, id: ImageId) -> bool {
        lock(&self.session).remove_image(id)
    }

    pub fn set_description(&self, text: &str) -> bool {
        lock(&self.session).set_description(text)
    }

    pub fn append_description(&self, text: &str) -> bool {
        lock(&self.session).append_description(text)
    }

    pub fn cancel(&self) -> bool {
        lock(&self.session).cancel()
    }

    pub fn reset(&self) -> bool {
        lock(&self.session).reset()
    }

    /// Starts an audit in the background. A submit while one is running is
    /// ignored, so at most one outbound call is ever in flight.
    pub fn submit(&self) -> SubmitOutcome {
        let outcome = lock(&self.session).submit();
        let SubmitOutcome::Started(job) = &outcome else {
            return outcome;
        };

        let ticket = job.ticket.clone();
        let job = job.clone();
        let session = Arc::clone(&self.session);
        let auditor = Arc::clone(&self.auditor);
        let handle = thread::Builder::new()
            .name("ecoaudit-audit".to_string())
            .spawn(move || {
                let result = auditor.run_job(&job);
                lock(&session).complete(&job.ticket, result);
            });

        match handle {
            Ok(handle) => {
                let previous = lock(&self.worker).replace(handle);
                if let Some(previous) = previous {
                    let _ = previous.join();
                }
            }
            Err(err) => {
                lock(&self.session).complete(&ticket, Err(AuditError::transport(err)));
            }
        }
        outcome
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker)
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Blocks until the running audit, if any, has settled.
    pub fn wait(&self) -> SessionSnapshot {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.snapshot()
    }
}

impl Drop for AuditController {
    fn drop(&mut self) {
        lock(&self.session).cancel();
        if let Some(handle) = lock(&self.worker).take() {
            let _ = handle.join();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ecoaudit_contracts::images::NewImage;

    use super::AuditController;
    use crate::auditor::Auditor;
    use crate::config::AuditConfig;
    use crate::error::GENERIC_FAILURE_MESSAGE;
    use crate::session::{AuditSession, Phase, SubmitOutcome};
    use crate::test_support::{sample_report_json, FakeTransport};

    fn controller(fake: Arc<FakeTransport>) -> AuditController {
        let auditor = Auditor::new(AuditConfig::new(None), fake);
        let controller = AuditController::new(AuditSession::new(), auditor);
        controller.add_images([NewImage::from_bytes("shelf.png", None, vec![7, 7])]);
        controller.set_description("Zero-waste grocer");
        controller
    }

    #[test]
    fn submit_runs_in_background_and_settles() {
        let fake = Arc::new(FakeTransport::with_text(&sample_report_json().to_string()));
        let controller = controller(fake.clone());

        assert!(matches!(controller.submit(), SubmitOutcome::Started(_)));
        let snapshot = controller.wait();
        assert_eq!(snapshot.phase, Phase::Success);
        assert_eq!(snapshot.report.map(|report| report.eco_score), Some(42));
        assert_eq!(fake.calls(), 1);
    }

    #[test]
    fn repeated_submits_issue_a_single_call() {
        let (fake, release) =
            FakeTransport::with_text(&sample_report_json().to_string()).gated();
        let fake = Arc::new(fake);
        let controller = controller(fake.clone());

        assert!(matches!(controller.submit(), SubmitOutcome::Started(_)));
        for _ in 0..5 {
            assert!(matches!(controller.submit(), SubmitOutcome::Ignored));
        }
        assert_eq!(controller.snapshot().phase, Phase::Loading);
        assert!(!controller.reset());

        let _ = release.send(());
        assert_eq!(controller.wait().phase, Phase::Success);
        assert_eq!(fake.calls(), 1);
    }

    #[test]
    fn cancel_moves_to_error_with_generic_message() {
        let (fake, _release) =
            FakeTransport::with_text(&sample_report_json().to_string()).gated();
        let controller = controller(Arc::new(fake));

        controller.submit();
        assert!(controller.cancel());

        let snapshot = controller.wait();
        assert_eq!(snapshot.phase, Phase::Error);
        assert_eq!(snapshot.error_message.as_deref(), Some(GENERIC_FAILURE_MESSAGE));
        assert!(snapshot.report.is_none());
    }

    #[test]
    fn validation_failure_never_spawns_work() {
        let fake = Arc::new(FakeTransport::with_text("{}"));
        let auditor = Auditor::new(AuditConfig::new(None), fake.clone());
        let controller = AuditController::new(AuditSession::new(), auditor);

        assert!(matches!(controller.submit(), SubmitOutcome::Rejected(_)));
        assert!(!controller.is_running());
        assert_eq!(controller.wait().phase, Phase::Idle);
        assert_eq!(fake.calls(), 0);
    }

    #[test]
    fn reset_after_success_starts_clean() {
        let fake = Arc::new(FakeTransport::with_text(&sample_report_json().to_string()));
        let controller = controller(fake);
        controller.submit();
        controller.wait();

        assert!(controller.reset());
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, Phase::Idle);
        assert!(snapshot.images.is_empty());
        assert!(snapshot.report.is_none());
    }
}
