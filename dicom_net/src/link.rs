use crate::commands::{decode_command, encode_command};
use crate::negotiation::PROPOSED_TRANSFER_SYNTAXES;
use crate::tls::TlsParams;
use crate::{Error, Result};
use async_trait::async_trait;
use dicom_object::InMemDicomObject;
use dicom_ul::association::client::{ClientAssociation, ClientAssociationOptions};
use dicom_ul::pdu::{PDataValue, PDataValueType, Pdu};
use std::io::Write;
use tracing::{debug, warn};
use xrc_config::Destination;

/// A presentation context the SCP accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedContext {
    pub id: u8,
    pub abstract_syntax: String,
    pub transfer_syntax: String,
}

/// One DIMSE message as received from the peer.
#[derive(Debug)]
pub struct DimseMessage {
    pub pc_id: u8,
    pub command: InMemDicomObject,
    pub data: Option<Vec<u8>>,
}

/// An open association able to exchange DIMSE messages.
///
/// The pool owns idle links; an operation takes exclusive hold of one for
/// its duration. Implementations: the dicom-ul backed [`UlLink`], TLS links
/// produced by an external provider, and scripted test links.
#[async_trait]
pub trait DimseLink: Send {
    fn accepted_contexts(&self) -> &[AcceptedContext];

    /// Sends one command set on the given presentation context.
    async fn send_command(&mut self, pc_id: u8, command: &InMemDicomObject) -> Result<()>;

    /// Sends dataset bytes, fragmenting to the negotiated maximum PDU size.
    async fn send_data(&mut self, pc_id: u8, data: &[u8]) -> Result<()>;

    /// Receives the next complete DIMSE message.
    async fn receive(&mut self) -> Result<DimseMessage>;

    /// Orderly association release.
    async fn release(self: Box<Self>) -> Result<()>;
}

/// Opens associations to a destination.
#[async_trait]
pub trait LinkFactory: Send + Sync {
    async fn connect(
        &self,
        destination: &Destination,
        tls: Option<&TlsParams>,
        abstract_syntaxes: &[String],
    ) -> Result<Box<dyn DimseLink>>;
}

/// Produces TLS-wrapped links from externally managed key material.
///
/// The concrete implementation lives with the platform integration; the
/// core only requires that chain and hostname verification happened before
/// a link is returned.
pub trait TlsLinkProvider: Send + Sync {
    fn connect(
        &self,
        destination: &Destination,
        params: &TlsParams,
        abstract_syntaxes: &[String],
    ) -> Result<Box<dyn DimseLink>>;
}

/// Plain TCP link over the dicom-ul upper layer.
pub struct UlLink {
    association: ClientAssociation<std::net::TcpStream>,
    contexts: Vec<AcceptedContext>,
}

impl UlLink {
    fn recv_pdu(&mut self) -> Result<Pdu> {
        tokio::task::block_in_place(|| self.association.receive())
            .map_err(|e| Error::Io(format!("association receive failed: {e}")))
    }
}

#[async_trait]
impl DimseLink for UlLink {
    fn accepted_contexts(&self) -> &[AcceptedContext] {
        &self.contexts
    }

    async fn send_command(&mut self, pc_id: u8, command: &InMemDicomObject) -> Result<()> {
        let bytes = encode_command(command)?;
        let pdu = Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: pc_id,
                value_type: PDataValueType::Command,
                is_last: true,
                data: bytes,
            }],
        };
        tokio::task::block_in_place(|| self.association.send(&pdu))
            .map_err(|e| Error::Io(format!("association send failed: {e}")))
    }

    async fn send_data(&mut self, pc_id: u8, data: &[u8]) -> Result<()> {
        tokio::task::block_in_place(|| {
            let mut writer = self.association.send_pdata(pc_id);
            writer
                .write_all(data)
                .and_then(|_| writer.flush())
                .map_err(|e| Error::Io(format!("dataset send failed: {e}")))
        })
    }

    async fn receive(&mut self) -> Result<DimseMessage> {
        let mut pc_id = 0u8;
        let mut command_bytes: Vec<u8> = vec![];
        // Command fragments first.
        loop {
            let pdu = self.recv_pdu()?;
            let values = match pdu {
                Pdu::PData { data } => data,
                Pdu::AbortRQ { source } => {
                    return Err(Error::AssociationRejected {
                        reason: format!("association aborted by peer ({source:?})"),
                        terminal: false,
                    });
                }
                other => {
                    warn!("Unexpected PDU while waiting for a command: {:?}", other);
                    continue;
                }
            };
            let mut last = false;
            for value in values {
                if value.value_type == PDataValueType::Command {
                    pc_id = value.presentation_context_id;
                    command_bytes.extend_from_slice(&value.data);
                    last = value.is_last;
                }
            }
            if last {
                break;
            }
        }
        let command = decode_command(&command_bytes)?;
        let data = if crate::commands::has_data_set(&command) {
            let mut data_bytes: Vec<u8> = vec![];
            loop {
                let pdu = self.recv_pdu()?;
                let values = match pdu {
                    Pdu::PData { data } => data,
                    other => {
                        warn!("Unexpected PDU while waiting for a dataset: {:?}", other);
                        continue;
                    }
                };
                let mut last = false;
                for value in values {
                    if value.value_type == PDataValueType::Data {
                        data_bytes.extend_from_slice(&value.data);
                        last = value.is_last;
                    }
                }
                if last {
                    break;
                }
            }
            Some(data_bytes)
        } else {
            None
        };
        Ok(DimseMessage {
            pc_id,
            command,
            data,
        })
    }

    async fn release(self: Box<Self>) -> Result<()> {
        tokio::task::block_in_place(|| self.association.release())
            .map_err(|e| Error::Io(format!("association release failed: {e}")))
    }
}

/// Factory for plain TCP associations; TLS destinations go through the
/// configured [`TlsLinkProvider`], never through a plaintext fallback.
pub struct UlLinkFactory {
    calling_aet: String,
    max_pdu_length: u32,
    tls_provider: Option<std::sync::Arc<dyn TlsLinkProvider>>,
}

impl UlLinkFactory {
    pub fn new(calling_aet: &str) -> Self {
        Self {
            calling_aet: calling_aet.to_string(),
            max_pdu_length: 16384,
            tls_provider: None,
        }
    }

    pub fn with_tls_provider(mut self, provider: std::sync::Arc<dyn TlsLinkProvider>) -> Self {
        self.tls_provider = Some(provider);
        self
    }
}

#[async_trait]
impl LinkFactory for UlLinkFactory {
    async fn connect(
        &self,
        destination: &Destination,
        tls: Option<&TlsParams>,
        abstract_syntaxes: &[String],
    ) -> Result<Box<dyn DimseLink>> {
        if let Some(params) = tls {
            let Some(provider) = &self.tls_provider else {
                return Err(Error::Tls(format!(
                    "destination {} requires TLS but no TLS link provider is configured",
                    destination.name
                )));
            };
            return provider.connect(destination, params, abstract_syntaxes);
        }
        let calling = self.calling_aet.clone();
        let called = destination.aet.clone();
        let addr = format!("{}:{}", destination.host, destination.port);
        let max_pdu = self.max_pdu_length;
        let proposed: Vec<String> = abstract_syntaxes.to_vec();
        let (association, contexts) = tokio::task::spawn_blocking(move || {
            let mut options = ClientAssociationOptions::new()
                .calling_ae_title(calling)
                .called_ae_title(called)
                .max_pdu_length(max_pdu);
            for syntax in &proposed {
                options = options.with_presentation_context(
                    syntax.as_str(),
                    PROPOSED_TRANSFER_SYNTAXES.to_vec(),
                );
            }
            let association = options.establish_with(&addr).map_err(|e| {
                Error::AssociationRejected {
                    reason: e.to_string(),
                    terminal: is_terminal_rejection(&e.to_string()),
                }
            })?;
            // Presentation context results come back in proposal order.
            let contexts = association
                .presentation_contexts()
                .iter()
                .zip(proposed.iter())
                .map(|(pc, abstract_syntax)| AcceptedContext {
                    id: pc.id,
                    abstract_syntax: abstract_syntax.clone(),
                    transfer_syntax: pc.transfer_syntax.trim_end_matches('\0').to_string(),
                })
                .collect::<Vec<_>>();
            Ok::<_, Error>((association, contexts))
        })
        .await
        .map_err(|e| Error::Io(format!("association task failed: {e}")))??;
        debug!(
            "Association established with {} ({} contexts)",
            destination.name,
            contexts.len()
        );
        Ok(Box::new(UlLink {
            association,
            contexts,
        }))
    }
}

/// Rejection reasons that retrying cannot fix.
fn is_terminal_rejection(reason: &str) -> bool {
    let lowered = reason.to_ascii_lowercase();
    lowered.contains("application context") || lowered.contains("duplicate")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_rejection_reasons() {
        assert!(is_terminal_rejection(
            "association rejected: application context name not supported"
        ));
        assert!(is_terminal_rejection("duplicate association negotiation"));
        assert!(!is_terminal_rejection("connection refused"));
        assert!(!is_terminal_rejection("called AE title not recognized"));
    }
}
