//! SRTP key handling, suite/policy resolution and the unprotect engine.

mod cipher;
pub mod engine;
mod kdf;
pub mod key;
pub mod policy;
mod replay;
pub mod session;
pub mod suite;

pub use engine::{EngineError, UnprotectEngine};
pub use key::{KeyEncoding, KeyError, MasterKey};
pub use policy::{Policy, PolicyError, SsrcSelector};
pub use session::SrtpSession;
pub use suite::{CryptoSuite, SecurityServices, Selection, SuiteError};
