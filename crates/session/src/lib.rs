//! # Parley Session
//!
//! The stateful core of Parley:
//!
//! - [`persona`]: loads the two persona documents once and builds the priming turn
//! - [`history`]: per-session, append-only conversation logs with a sliding window
//! - [`manager`]: one `converse` call = snapshot, backend call, append
//! - [`corrector`] and [`speech`]: fix the recognizer's systematic name errors
//! - [`sniff`]: content-based media type detection for persona documents

pub mod corrector;
pub mod history;
pub mod manager;
pub mod persona;
pub mod sniff;
pub mod speech;

pub use corrector::{CorrectionError, CorrectionTable, MatchMode, TextCorrector};
pub use history::{ConversationHistory, HistoryError, HistoryPolicy, SessionStore};
pub use manager::SessionManager;
pub use persona::{DocumentSource, FsSource, PersonaCell, PersonaContext, PersonaLoader};
pub use sniff::{MediaType, sniff};
pub use speech::SpeechPipeline;
