use crate::{Error, Result};

/// Transfer syntaxes proposed for every storage presentation context, in
/// priority order.
pub const PROPOSED_TRANSFER_SYNTAXES: [&str; 4] = [
    uids::JPEG_2000_LOSSLESS,
    uids::JPEG_LOSSLESS_SV1,
    uids::EXPLICIT_VR_LE,
    uids::IMPLICIT_VR_LE,
];

/// Transfer syntax UIDs the negotiation logic reasons about.
pub mod uids {
    pub const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";
    pub const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
    pub const EXPLICIT_VR_BE: &str = "1.2.840.10008.1.2.2";
    pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";
    pub const JPEG_EXTENDED: &str = "1.2.840.10008.1.2.4.51";
    pub const JPEG_LOSSLESS_SV1: &str = "1.2.840.10008.1.2.4.70";
    pub const JPEG_LS_LOSSLESS: &str = "1.2.840.10008.1.2.4.80";
    pub const JPEG_LS_NEAR_LOSSLESS: &str = "1.2.840.10008.1.2.4.81";
    pub const JPEG_2000_LOSSLESS: &str = "1.2.840.10008.1.2.4.90";
    pub const JPEG_2000: &str = "1.2.840.10008.1.2.4.91";
    pub const RLE_LOSSLESS: &str = "1.2.840.10008.1.2.5";
}

/// Whether a transfer syntax discards pixel information.
///
/// Diagnostic DX/CR objects must never be transcoded into one of these.
pub fn is_lossy(transfer_syntax: &str) -> bool {
    matches!(
        transfer_syntax,
        uids::JPEG_BASELINE | uids::JPEG_EXTENDED | uids::JPEG_LS_NEAR_LOSSLESS | uids::JPEG_2000
    )
}

fn is_uncompressed(transfer_syntax: &str) -> bool {
    matches!(
        transfer_syntax,
        uids::IMPLICIT_VR_LE | uids::EXPLICIT_VR_LE | uids::EXPLICIT_VR_BE
    )
}

/// Result of matching the SCP's accepted syntaxes against a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Syntax the dataset goes out in
    pub transfer_syntax: String,
    /// The dataset has to be re-encoded before sending
    pub transcode: bool,
}

/// Picks the transfer syntax for a dataset given what the SCP accepted.
///
/// Accepted syntaxes are considered in our proposal priority order. A syntax
/// is usable when the dataset already carries it, or when both source and
/// target are uncompressed so a lossless re-encode is a plain rewrite. A
/// lossy-only acceptance is a conflict, never a fallback; an acceptance we
/// cannot losslessly serve (compressed target, no codec path) is refused the
/// same way.
pub fn select_for_dataset(dataset_syntax: &str, accepted: &[String]) -> Result<Negotiated> {
    if accepted.is_empty() {
        return Err(Error::TransferSyntaxConflict(
            "SCP accepted no transfer syntax for the presentation context".to_string(),
        ));
    }
    let lossless: Vec<&String> = accepted.iter().filter(|ts| !is_lossy(ts)).collect();
    if lossless.is_empty() {
        return Err(Error::TransferSyntaxConflict(format!(
            "SCP accepts only lossy transfer syntaxes ({})",
            accepted.join(", ")
        )));
    }
    for proposed in PROPOSED_TRANSFER_SYNTAXES {
        if !lossless.iter().any(|ts| ts.as_str() == proposed) {
            continue;
        }
        if proposed == dataset_syntax {
            return Ok(Negotiated {
                transfer_syntax: proposed.to_string(),
                transcode: false,
            });
        }
        if is_uncompressed(proposed) && is_uncompressed(dataset_syntax) {
            return Ok(Negotiated {
                transfer_syntax: proposed.to_string(),
                transcode: true,
            });
        }
    }
    Err(Error::TransferSyntaxConflict(format!(
        "no lossless path from {} to any accepted syntax ({})",
        dataset_syntax,
        accepted.join(", ")
    )))
}
