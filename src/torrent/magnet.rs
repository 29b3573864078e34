//! Magnet link parsing.
//!
//! Extracts the minimal metadata a provider needs from a magnet URI:
//! info hash, display name, and tracker URLs. Full metadata exchange
//! with peers is the engine's concern.

use url::Url;

use super::{InfoHash, TorrentError};

/// Parsed magnet URI.
///
/// Carries only what can be read from the link itself. Piece geometry
/// arrives later through the engine's metadata exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct MagnetLink {
    /// Info hash from the `xt=urn:btih:` exact topic.
    pub info_hash: InfoHash,
    /// Optional display name (`dn` parameter).
    pub display_name: Option<String>,
    /// Tracker URLs (`tr` parameters), in link order.
    pub trackers: Vec<String>,
}

impl MagnetLink {
    /// Parses a `magnet:` URI.
    ///
    /// # Errors
    /// - `TorrentError::InvalidMagnetLink` - wrong scheme, missing or
    ///   malformed `xt=urn:btih:` info hash
    pub fn parse(magnet_url: &str) -> Result<Self, TorrentError> {
        let url = Url::parse(magnet_url).map_err(|e| TorrentError::InvalidMagnetLink {
            reason: format!("not a valid URI: {e}"),
        })?;

        if url.scheme() != "magnet" {
            return Err(TorrentError::InvalidMagnetLink {
                reason: format!("expected magnet scheme, got {}", url.scheme()),
            });
        }

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    if let Some(hash_hex) = value.strip_prefix("urn:btih:") {
                        info_hash = Some(parse_hex_hash(hash_hex)?);
                    }
                }
                "dn" => display_name = Some(value.into_owned()),
                "tr" => trackers.push(value.into_owned()),
                _ => {}
            }
        }

        let info_hash = info_hash.ok_or_else(|| TorrentError::InvalidMagnetLink {
            reason: "missing xt=urn:btih: exact topic".to_string(),
        })?;

        Ok(Self {
            info_hash,
            display_name,
            trackers,
        })
    }
}

/// Parses a 40-character hex string into a 20-byte info hash.
fn parse_hex_hash(hash_hex: &str) -> Result<InfoHash, TorrentError> {
    if hash_hex.len() != 40 {
        return Err(TorrentError::InvalidMagnetLink {
            reason: format!("info hash length {} (expected 40)", hash_hex.len()),
        });
    }

    let mut hash = [0u8; 20];
    for (i, chunk) in hash_hex.as_bytes().chunks(2).enumerate() {
        let pair = std::str::from_utf8(chunk).map_err(|_| TorrentError::InvalidMagnetLink {
            reason: format!("non-ascii character in info hash: {hash_hex}"),
        })?;
        hash[i] = u8::from_str_radix(pair, 16).map_err(|_| TorrentError::InvalidMagnetLink {
            reason: format!("invalid hex in info hash: {hash_hex}"),
        })?;
    }
    Ok(InfoHash::new(hash))
}
