//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared configuration, error, and identifier primitives."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
use uuid::Uuid;

/// Generate a new application-facing message identifier.
///
/// This is purely an optional convenience for callers that want an
/// end-to-end deduplication token; the producer never inspects it (see
/// `amqpr_core::producer`, which never implicitly resends).
pub fn new_message_id() -> Uuid {
    Uuid::new_v4()
}
