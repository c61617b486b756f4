//! Digital signature trailer lookup and `^SIGNVER` parameter selection.
//!
//! ## Trailer Layout
//!
//! A signed body ends with:
//!
//! ```text
//! ... | hash (32) @ len - siglen + 6 | ... | siglen (4) | ? (4) | 0xFFAAAFFA (4) |
//! ```
//!
//! Only the first two partitions of an image are examined.

use std::fmt;
use std::str::FromStr;

use log::{info, warn};

use crate::error::{Error, Result};
use crate::image::firmware::PartitionTable;
use crate::protocol::at::SignVer;

/// Word ending a signed partition body.
pub const SIGNATURE_MARKER: u32 = 0xFFAAAFFA;

/// Length of the public key hash.
pub const HASH_LEN: usize = 32;

/// Hash sent when the image carries none.
pub const DEFAULT_HASH: &str = "778A8D175E602B7B779D9E05C330B5279B0661BF2EED99A20445B366D63DD697";

/// Firmware type code assumed when the image does not declare one.
pub const FALLBACK_TYPE: u8 = 7;

const FW_TYPES: [&str; 8] = [
    "UNKNOWN",
    "ONLY_FW",
    "ONLY_ISO",
    "FW_ISO",
    "ONLY_WEBUI",
    "FW_WEBUI",
    "ISO_WEBUI",
    "FW_ISO_WEBUI",
];

/// Description of a firmware type code (low 3 bits).
pub fn fw_description(code: u32) -> &'static str {
    FW_TYPES[(code & 7) as usize]
}

/// Known signature parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignPreset {
    /// Firmware type code.
    pub fw_type: u32,
    /// Signature length.
    pub len: u32,
    /// What the preset is for.
    pub description: &'static str,
}

/// Signature parameters of common firmware kinds.
pub const SIGN_PRESETS: [SignPreset; 6] = [
    SignPreset {
        fw_type: 1,
        len: 2958,
        description: "Main firmware",
    },
    SignPreset {
        fw_type: 1,
        len: 2694,
        description: "E3372s-stick firmware",
    },
    SignPreset {
        fw_type: 2,
        len: 1110,
        description: "Webinterface+ISO for HLINK modem",
    },
    SignPreset {
        fw_type: 6,
        len: 1110,
        description: "Webinterface+ISO for HLINK modem",
    },
    SignPreset {
        fw_type: 2,
        len: 846,
        description: "ISO (dashboard) for stick modem",
    },
    SignPreset {
        fw_type: 7,
        len: 3750,
        description: "Firmware+ISO+webinterface",
    },
];

/// Signature found in a partition trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SignatureRecord {
    /// Partition carrying the trailer.
    pub partition: usize,
    /// Firmware type code announced with the signature.
    pub signature_type: u32,
    /// Signature length.
    pub signature_len: u32,
    /// Public key hash, 64 uppercase hex characters.
    pub public_key_hash: String,
}

fn word_at(body: &[u8], pos: usize) -> Option<u32> {
    body.get(pos..pos + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Find the signature trailer in partition 0 or 1.
pub fn locate(table: &PartitionTable) -> Result<Option<SignatureRecord>> {
    let signature_type = u32::from(table.dload_id().unwrap_or(FALLBACK_TYPE) & 7);

    for (index, entry) in table.iter().enumerate().take(2) {
        let body = &entry.body;
        let len = body.len();
        if len < 4 || word_at(body, len - 4) != Some(SIGNATURE_MARKER) {
            continue;
        }

        let malformed = |reason: String| Error::MalformedSignatureTrailer { index, reason };
        let signature_len = len
            .checked_sub(12)
            .and_then(|pos| word_at(body, pos))
            .ok_or_else(|| malformed(format!("body of {len} bytes has no length field")))?;
        let hash = (len + 6)
            .checked_sub(signature_len as usize)
            .and_then(|start| body.get(start..start + HASH_LEN))
            .ok_or_else(|| {
                malformed(format!(
                    "signature length {signature_len} does not fit a body of {len} bytes"
                ))
            })?;

        return Ok(Some(SignatureRecord {
            partition: index,
            signature_type,
            signature_len,
            public_key_hash: hex::encode_upper(hash),
        }));
    }
    Ok(None)
}

/// Whether signature presence agrees with the firmware type.
///
/// Types 8 and above carry no signature; lower types do.
pub fn presence_matches_type(dload_id: u8, signed: bool) -> bool {
    signed == (dload_id < 8)
}

/// Log the signature found in `table` and warn when it disagrees with the
/// firmware type.
pub fn check_consistency(table: &PartitionTable) -> bool {
    let record = match locate(table) {
        Ok(record) => record,
        Err(e) => {
            warn!("{e}");
            return false;
        },
    };
    match &record {
        Some(rec) => {
            info!("Digital signature: {} bytes", rec.signature_len);
            info!("Public key hash: {}", rec.public_key_hash);
        },
        None => info!("Digital signature: not found"),
    }

    let Some(dload_id) = table.dload_id() else {
        return true;
    };
    let consistent = presence_matches_type(dload_id, record.is_some());
    if !consistent {
        warn!(
            "Presence of digital signature does not match firmware type code: {dload_id:02x}"
        );
    }
    consistent
}

/// How the `^SIGNVER` handshake is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureMode {
    /// Use the trailer found in the image; skip when there is none.
    #[default]
    Auto,
    /// Use an entry of [`SIGN_PRESETS`].
    Preset(usize),
    /// Explicit type and length.
    Custom {
        /// Firmware type code (0..=7).
        fw_type: u32,
        /// Signature length.
        len: u32,
    },
    /// Never send `^SIGNVER`.
    Disabled,
}

impl FromStr for SignatureMode {
    type Err = Error;

    /// Parse `auto`, `d`, `*,type,len`, or a preset index.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || Error::InvalidSignatureSpec(s.to_string());

        match s {
            "" | "auto" => return Ok(Self::Auto),
            "d" | "disabled" => return Ok(Self::Disabled),
            _ => {},
        }

        if let Some(rest) = s.strip_prefix("*,") {
            let (fw_type, len) = rest.rsplit_once(',').ok_or_else(invalid)?;
            let fw_type: u32 = fw_type.trim().parse().map_err(|_| invalid())?;
            let len: u32 = len.trim().parse().map_err(|_| invalid())?;
            if fw_type > 7 {
                return Err(Error::InvalidSignatureSpec(format!(
                    "unknown firmware type {fw_type}"
                )));
            }
            return Ok(Self::Custom { fw_type, len });
        }

        let index: usize = s.parse().map_err(|_| invalid())?;
        if index >= SIGN_PRESETS.len() {
            return Err(Error::InvalidSignatureSpec(format!(
                "preset {index} does not exist"
            )));
        }
        Ok(Self::Preset(index))
    }
}

impl fmt::Display for SignatureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Preset(i) => write!(f, "{i}"),
            Self::Custom { fw_type, len } => write!(f, "*,{fw_type},{len}"),
            Self::Disabled => write!(f, "d"),
        }
    }
}

impl SignatureMode {
    /// `^SIGNVER` parameters for `table`, or `None` when nothing is sent.
    pub fn resolve(self, table: &PartitionTable) -> Result<Option<SignVer>> {
        let (fw_type, len) = match self {
            Self::Disabled => return Ok(None),
            Self::Auto => {
                return Ok(locate(table)?.map(|rec| SignVer {
                    fw_type: rec.signature_type,
                    hash: rec.public_key_hash,
                    len: rec.signature_len,
                }));
            },
            Self::Preset(index) => {
                let preset = SIGN_PRESETS
                    .get(index)
                    .ok_or_else(|| Error::InvalidSignatureSpec(format!("preset {index}")))?;
                (preset.fw_type, preset.len)
            },
            Self::Custom { fw_type, len } => (fw_type, len),
        };

        let hash = match locate(table) {
            Ok(Some(rec)) => rec.public_key_hash,
            _ => DEFAULT_HASH.to_string(),
        };
        Ok(Some(SignVer { fw_type, hash, len }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::firmware::PartitionEntry;

    /// Body of `total` bytes with a trailer for a signature of `siglen`.
    fn signed_body(total: usize, siglen: u32) -> Vec<u8> {
        let mut body = vec![0u8; total];
        let start = total + 6 - siglen as usize;
        for (i, b) in body[start..start + HASH_LEN].iter_mut().enumerate() {
            *b = 0xA0 + i as u8;
        }
        body[total - 12..total - 8].copy_from_slice(&siglen.to_le_bytes());
        body[total - 4..].copy_from_slice(&SIGNATURE_MARKER.to_le_bytes());
        body
    }

    fn table(dload_id: Option<u8>, bodies: Vec<Vec<u8>>) -> PartitionTable {
        let mut table = PartitionTable::new(dload_id);
        for body in bodies {
            table.push(PartitionEntry::raw(0x30000, body));
        }
        table
    }

    #[test]
    fn test_locate_signature() {
        let t = table(Some(1), vec![signed_body(1000, 300)]);
        let rec = locate(&t).unwrap().unwrap();

        assert_eq!(rec.partition, 0);
        assert_eq!(rec.signature_len, 300);
        assert_eq!(rec.signature_type, 1);
        assert_eq!(rec.public_key_hash.len(), 64);
        let expected: String = (0..32u8).map(|i| format!("{:02X}", 0xA0 + i)).collect();
        assert_eq!(rec.public_key_hash, expected);
    }

    #[test]
    fn test_locate_second_partition() {
        let t = table(Some(9), vec![vec![0; 64], signed_body(512, 100)]);
        let rec = locate(&t).unwrap().unwrap();
        assert_eq!(rec.partition, 1);
        assert_eq!(rec.signature_type, 1);
    }

    #[test]
    fn test_third_partition_ignored() {
        let t = table(Some(1), vec![vec![0; 8], vec![], signed_body(512, 100)]);
        assert!(locate(&t).unwrap().is_none());
    }

    #[test]
    fn test_locate_none_on_empty_table() {
        assert!(locate(&PartitionTable::new(None)).unwrap().is_none());
    }

    #[test]
    fn test_trailer_length_out_of_bounds() {
        let mut body = signed_body(200, 100);
        body[200 - 12..200 - 8].copy_from_slice(&5000u32.to_le_bytes());
        let err = locate(&table(Some(1), vec![body])).unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedSignatureTrailer { index: 0, .. }
        ));
    }

    #[test]
    fn test_trailer_on_tiny_body() {
        let body = SIGNATURE_MARKER.to_le_bytes().to_vec();
        let err = locate(&table(Some(1), vec![body])).unwrap_err();
        assert!(matches!(err, Error::MalformedSignatureTrailer { .. }));
    }

    #[test]
    fn test_fw_description() {
        assert_eq!(fw_description(0), "UNKNOWN");
        assert_eq!(fw_description(1), "ONLY_FW");
        assert_eq!(fw_description(7), "FW_ISO_WEBUI");
        assert_eq!(fw_description(9), "ONLY_FW");
    }

    #[test]
    fn test_presence_matches_type() {
        assert!(presence_matches_type(1, true));
        assert!(presence_matches_type(8, false));
        assert!(!presence_matches_type(1, false));
        assert!(!presence_matches_type(9, true));
    }

    #[test]
    fn test_check_consistency() {
        assert!(check_consistency(&table(Some(1), vec![signed_body(400, 100)])));
        assert!(!check_consistency(&table(Some(9), vec![signed_body(400, 100)])));
        assert!(check_consistency(&table(None, vec![vec![0; 16]])));
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("auto".parse::<SignatureMode>().unwrap(), SignatureMode::Auto);
        assert_eq!("d".parse::<SignatureMode>().unwrap(), SignatureMode::Disabled);
        assert_eq!("3".parse::<SignatureMode>().unwrap(), SignatureMode::Preset(3));
        assert_eq!(
            "*,2,1110".parse::<SignatureMode>().unwrap(),
            SignatureMode::Custom {
                fw_type: 2,
                len: 1110
            }
        );
    }

    #[test]
    fn test_parse_mode_errors() {
        assert!("6".parse::<SignatureMode>().is_err());
        assert!("x".parse::<SignatureMode>().is_err());
        assert!("*,9,100".parse::<SignatureMode>().is_err());
        assert!("*,1".parse::<SignatureMode>().is_err());
        assert!("*,a,b".parse::<SignatureMode>().is_err());
    }

    #[test]
    fn test_mode_display_round_trips() {
        for mode in [
            SignatureMode::Auto,
            SignatureMode::Disabled,
            SignatureMode::Preset(5),
            SignatureMode::Custom {
                fw_type: 6,
                len: 1110,
            },
        ] {
            assert_eq!(mode.to_string().parse::<SignatureMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_resolve_auto() {
        let t = table(Some(5), vec![signed_body(1000, 300)]);
        let params = SignatureMode::Auto.resolve(&t).unwrap().unwrap();
        assert_eq!(params.fw_type, 5);
        assert_eq!(params.len, 300);
        assert_ne!(params.hash, DEFAULT_HASH);

        let unsigned = table(Some(5), vec![vec![0; 100]]);
        assert!(SignatureMode::Auto.resolve(&unsigned).unwrap().is_none());
    }

    #[test]
    fn test_resolve_preset_uses_default_hash() {
        let t = table(Some(1), vec![vec![0; 100]]);
        let params = SignatureMode::Preset(0).resolve(&t).unwrap().unwrap();
        assert_eq!(
            params,
            SignVer {
                fw_type: 1,
                hash: DEFAULT_HASH.to_string(),
                len: 2958
            }
        );
    }

    #[test]
    fn test_resolve_custom_uses_found_hash() {
        let t = table(Some(1), vec![signed_body(1000, 300)]);
        let found = locate(&t).unwrap().unwrap().public_key_hash;
        let params = SignatureMode::Custom { fw_type: 2, len: 846 }
            .resolve(&t)
            .unwrap()
            .unwrap();
        assert_eq!(params.hash, found);
        assert_eq!(params.len, 846);
    }

    #[test]
    fn test_resolve_disabled() {
        let t = table(Some(1), vec![signed_body(1000, 300)]);
        assert!(SignatureMode::Disabled.resolve(&t).unwrap().is_none());
    }
}
