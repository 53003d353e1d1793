use super::{Error, ErrorKind, Result};

/// Parses the hex text typed by a user into a write payload, e.g. `"0100B410"`.
///
/// Surrounding and embedded whitespace is ignored; an odd number of digits or a
/// non-hex character is an [ErrorKind::InvalidParameter].
pub fn parse_hex_payload(text: &str) -> Result<Vec<u8>> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&digits).map_err(|e| {
        Error::new(
            ErrorKind::InvalidParameter,
            format!("`{}` is not a hex payload: {e}", text.trim()),
        )
    })
}
