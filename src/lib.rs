pub mod clock;
mod committer;
pub mod config;
pub mod crypto;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod external;
pub mod ledger;
pub mod nonce;
pub mod roll;
pub mod selector;
pub mod store;
mod sweeper;
pub mod types;
pub mod verifier;

pub use clock::{Clock, EntropySource, ManualClock, OsEntropy, SeededEntropy, SystemClock};
pub use config::{ConfigError, EngineConfig, PoolConfig, VariantConfig};
pub use crypto::{Commitment, DigestFormat, Keypair, sha3, verify};
pub use db::{DbError, Storage};
pub use engine::{EngineBuilder, VariantEngine};
pub use error::{AllocError, ErrorCategory, IntegrationError};
pub use events::EngineEvent;
pub use external::{
    Binding, ChargeKind, Collaborators, CouponEligibility, EligibilityOracle, PaymentProcessor,
    Settlement, TokenRegistry,
};
pub use roll::RollRequest;
pub use selector::SelectionBasis;
pub use store::AllocationStore;
pub use types::*;
pub use verifier::roll_message;
