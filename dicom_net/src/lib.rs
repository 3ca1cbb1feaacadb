pub mod commands;
pub mod commitment;
pub mod link;
#[cfg(test)]
pub(crate) mod mock;
pub mod negotiation;
pub mod pool;
pub mod status;
pub mod tls;
pub mod transport;
pub mod worklist;

pub use commitment::{CommitState, CommitOutcome, CommitmentTracker, CommittedSop};
pub use link::{AcceptedContext, DimseLink, DimseMessage, LinkFactory, TlsLinkProvider, UlLinkFactory};
pub use negotiation::{Negotiated, select_for_dataset};
pub use pool::{AssociationPool, PooledAssociation};
pub use status::{StatusClass, classify_status};
pub use tls::{TlsParams, TlsPolicy};
pub use transport::{DicomTransport, sop_class};
pub use worklist::{WorklistEntry, WorklistQuery};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No association available for {0} within the acquisition timeout")]
    PoolExhausted(String),
    #[error("Association rejected: {reason}")]
    AssociationRejected { reason: String, terminal: bool },
    #[error("Transfer syntax conflict: {0}")]
    TransferSyntaxConflict(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("DIMSE failure status 0x{status:04X}")]
    Dimse { status: u16 },
    #[error("TLS failure: {0}")]
    Tls(String),
    #[error("Network IO failure: {0}")]
    Io(String),
    #[error("Dataset encoding failure: {0}")]
    Encode(String),
    #[error("Mandatory attribute missing: {0}")]
    MissingAttribute(String),
    #[error("Unknown storage commitment transaction: {0}")]
    UnknownTransaction(String),
}

pub type Result<T> = std::result::Result<T, Error>;
