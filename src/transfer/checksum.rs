//! Checksum sidecar handling

use crate::error::TransferError;

/// Length of an MD5 digest in hex
pub const MD5_HEX_LEN: usize = 32;

/// Name of the sidecar holding the checksum of `name`
pub fn sidecar_name(name: &str, suffix: &str) -> String {
    format!("{name}{suffix}")
}

/// Extract the expected checksum from sidecar content
///
/// The first 32 characters are the digest; anything after them (typically
/// `  filename\n` as written by `md5sum`) is ignored. The digest is returned
/// in lowercase.
pub fn parse_sidecar(name: &str, content: &[u8]) -> Result<String, TransferError> {
    let invalid = |reason: String| TransferError::InvalidChecksum {
        name: name.to_string(),
        reason,
    };

    let Some(digest) = content.get(..MD5_HEX_LEN) else {
        return Err(invalid(format!(
            "sidecar holds {} bytes, expected at least {MD5_HEX_LEN}",
            content.len()
        )));
    };
    if !digest.iter().all(u8::is_ascii_hexdigit) {
        return Err(invalid(format!(
            "sidecar does not start with a hex digest: {:?}",
            String::from_utf8_lossy(digest)
        )));
    }

    Ok(String::from_utf8_lossy(digest).to_ascii_lowercase())
}
