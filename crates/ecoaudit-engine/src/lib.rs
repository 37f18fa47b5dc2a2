mod auditor;
mod cancel;
mod config;
mod controller;
mod encoder;
mod error;
mod parser;
mod request;
mod session;
#[cfg(test)]
mod test_support;
mod transport;

pub use auditor::{AuditOutput, Auditor};
pub use cancel::CancelToken;
pub use config::{
    clamp_request_timeout, AuditConfig, DEFAULT_API_BASE, DEFAULT_MODEL, DEFAULT_TEMPERATURE,
};
pub use controller::AuditController;
pub use encoder::{encode_image, encode_images, EncodedImagePart};
pub use error::{AuditError, GENERIC_FAILURE_MESSAGE, VALIDATION_MESSAGE};
pub use parser::{extract_response_text, parse_report};
pub use request::{
    audit_prompt, build_request, check_preconditions, AuditRequest, SYSTEM_INSTRUCTION,
};
pub use session::{AuditJob, AuditSession, AuditTicket, Phase, SessionSnapshot, SubmitOutcome};
pub use transport::{AuditTransport, GeminiTransport, TransportReply};
