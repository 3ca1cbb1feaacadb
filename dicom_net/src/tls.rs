use crate::{Error, Result};
use std::sync::Arc;
use tracing::error;
use xrc_config::{Destination, TlsSettings};
use xrc_event_bus::{ConsoleEvent, EventBus};

/// Material resolved for one TLS association attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TlsParams {
    pub ca: std::path::PathBuf,
    pub client_cert: Option<std::path::PathBuf>,
    pub client_key: Option<std::path::PathBuf>,
    pub min_version: xrc_config::TlsVersion,
    /// Verified against the certificate; always the configured host, never
    /// a resolved address.
    pub server_name: String,
}

/// Decides whether and how a destination is contacted over TLS.
///
/// There is no plaintext fallback: when a destination requires TLS and the
/// policy cannot produce parameters, the association attempt fails and a
/// security event is published.
pub struct TlsPolicy {
    settings: TlsSettings,
    bus: Arc<EventBus>,
}

impl TlsPolicy {
    pub fn new(settings: TlsSettings, bus: Arc<EventBus>) -> Self {
        Self { settings, bus }
    }

    /// Parameters for one destination, or `None` for a plaintext peer.
    pub fn params_for(&self, destination: &Destination) -> Result<Option<TlsParams>> {
        if !destination.tls {
            return Ok(None);
        }
        let Some(ca) = self.settings.ca.clone() else {
            return Err(self.security_failure(
                destination,
                "TLS required but no CA bundle is configured".to_string(),
            ));
        };
        if destination.mutual_tls
            && (self.settings.client_cert.is_none() || self.settings.client_key.is_none())
        {
            return Err(self.security_failure(
                destination,
                "mutual TLS required but client material is missing".to_string(),
            ));
        }
        Ok(Some(TlsParams {
            ca,
            client_cert: destination
                .mutual_tls
                .then(|| self.settings.client_cert.clone())
                .flatten(),
            client_key: destination
                .mutual_tls
                .then(|| self.settings.client_key.clone())
                .flatten(),
            min_version: self.settings.min_version,
            server_name: destination.host.clone(),
        }))
    }

    /// Records a handshake or verification failure. No bytes were exchanged
    /// beyond the handshake; the caller aborts the association.
    pub fn handshake_failed(&self, destination: &Destination, detail: &str) -> Error {
        self.security_failure(destination, detail.to_string())
    }

    fn security_failure(&self, destination: &Destination, detail: String) -> Error {
        error!(
            "TLS failure for destination {}: {}",
            destination.name, detail
        );
        self.bus.publish(ConsoleEvent::SecurityEvent {
            destination: destination.name.clone(),
            detail: detail.clone(),
        });
        Error::Tls(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn destination(tls: bool, mutual: bool) -> Destination {
        Destination {
            name: "pacs1".to_string(),
            aet: "PACS".to_string(),
            host: "pacs.example.org".to_string(),
            port: 2762,
            tls,
            mutual_tls: mutual,
            send_gsps: false,
        }
    }

    #[test]
    fn plaintext_destination_needs_no_params() {
        let policy = TlsPolicy::new(TlsSettings::default(), Arc::new(EventBus::new()));
        assert_eq!(policy.params_for(&destination(false, false)).unwrap(), None);
    }

    #[test]
    fn missing_ca_fails_with_security_event() {
        let bus = Arc::new(EventBus::new());
        let policy = TlsPolicy::new(TlsSettings::default(), bus.clone());
        let mut sub = bus.subscribe();
        let result = policy.params_for(&destination(true, false));
        assert!(matches!(result, Err(Error::Tls(_))));
        assert!(matches!(
            sub.try_recv(),
            Some(ConsoleEvent::SecurityEvent { .. })
        ));
    }

    #[test]
    fn server_name_is_the_configured_host() {
        let settings = TlsSettings {
            ca: Some(PathBuf::from("/etc/xrc/ca.pem")),
            ..TlsSettings::default()
        };
        let policy = TlsPolicy::new(settings, Arc::new(EventBus::new()));
        let params = policy
            .params_for(&destination(true, false))
            .unwrap()
            .unwrap();
        assert_eq!(params.server_name, "pacs.example.org");
        assert!(params.client_cert.is_none());
    }

    #[test]
    fn mutual_tls_requires_client_material() {
        let settings = TlsSettings {
            ca: Some(PathBuf::from("/etc/xrc/ca.pem")),
            ..TlsSettings::default()
        };
        let policy = TlsPolicy::new(settings, Arc::new(EventBus::new()));
        assert!(policy.params_for(&destination(true, true)).is_err());
    }
}
