//! Session orchestration: the state machine, the watchdog, the rewrite
//! step, and the output sinks.

pub mod orchestrator;
pub mod rewrite;
pub mod sink;
pub mod watchdog;

pub use orchestrator::{
    Session, SessionCommand, SessionConfig, SessionHandle, SessionRunner, SessionState,
    SessionStatus,
};
pub use rewrite::{
    CommandRewriter, MockRewriter, PassthroughRewriter, RewriteDispatcher, RewriteOutcome, Rewriter,
};
pub use sink::{CollectorSink, StdoutSink, TextSink};
pub use watchdog::InactivityWatchdog;
