pub mod artifact;
pub mod audit;
pub mod overrides;
pub mod report;
pub mod result;
pub mod rule;

pub use artifact::{AccessLevel, Artifact, ArtifactKind, ArtifactMetadata};
pub use audit::{sha256_hex, verify_chain, LogRecord};
pub use overrides::{Override, Principal, PrincipalKind};
pub use report::{
    AuditReport, Disposition, OverrideProvenance, OverrideStatus, ReportEntry, ReportSummary,
    Verdict,
};
pub use result::{CheckResult, CheckStatus, Evidence, Span};
pub use rule::{
    jurisdiction_covers, parse_rule_id, Category, CheckSpec, Dependency, Outcome, Rule,
    ScopePredicate, Severity,
};
