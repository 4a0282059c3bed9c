//! Parsing of the asset-transfer payload embedded in HTLC custom
//! records. The daemon encodes the payload as nested TLVs; rather than
//! carry a full TLV decoder we scan the raw bytes for the two
//! length-prefixed fields we need, the way the daemon lays them out in
//! practice.

/// Marker preceding the 32-byte asset id field (`0x00` type, `0x20`
/// length).
const ASSET_ID_MARKER: [u8; 2] = [0x00, 0x20];
/// Marker preceding the 33-byte script key field (`0x01` type, `0x40`
/// length of the enclosing record).
const SCRIPT_KEY_MARKER: [u8; 2] = [0x01, 0x40];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDetails {
    pub asset_id: String,
    pub script_key: String,
}

fn find_marker(haystack: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if haystack.len() < from {
        return None;
    }
    haystack[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|i| i + from)
}

/// Pulls the asset id and script key out of a raw custom-record value.
/// Returns `None` when either field is absent or truncated.
pub fn extract_transfer_details(record: &[u8]) -> Option<TransferDetails> {
    let asset_pos = find_marker(record, ASSET_ID_MARKER, 0)?;
    let asset_start = asset_pos + ASSET_ID_MARKER.len();
    let asset_end = asset_start + 32;
    if record.len() < asset_end {
        return None;
    }
    let asset_id = hex::encode(&record[asset_start..asset_end]);

    // The script key marker is only meaningful after the asset id
    // bytes, which may themselves contain the marker pair.
    let key_pos = find_marker(record, SCRIPT_KEY_MARKER, asset_end)?;
    let key_start = key_pos + SCRIPT_KEY_MARKER.len();
    let key_end = key_start + 33;
    if record.len() < key_end {
        return None;
    }
    let script_key = hex::encode(&record[key_start..key_end]);

    Some(TransferDetails {
        asset_id,
        script_key,
    })
}

/// Convenience wrapper used by the transfer monitor.
pub fn extract_script_key(record: &[u8]) -> Option<String> {
    extract_transfer_details(record).map(|d| d.script_key)
}
