use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::str::FromStr;

use crate::utils::error::{AppError, AppResult};

/// Textual encodings a chunk payload may arrive in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Hex,
    Base64,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Hex => "hex",
            Encoding::Base64 => "base64",
        }
    }
}

impl FromStr for Encoding {
    type Err = AppError;

    fn from_str(tag: &str) -> AppResult<Self> {
        match tag {
            "hex" => Ok(Encoding::Hex),
            "base64" => Ok(Encoding::Base64),
            _ => Err(AppError::UnsupportedEncoding),
        }
    }
}

/// Decode a chunk payload according to its encoding tag
pub fn decode(payload: &str, encoding: &str) -> AppResult<Vec<u8>> {
    let encoding: Encoding = encoding.parse()?;
    let result = match encoding {
        Encoding::Hex => hex::decode(payload).map_err(|e| e.to_string()),
        Encoding::Base64 => STANDARD.decode(payload).map_err(|e| e.to_string()),
    };

    result.map_err(|reason| AppError::DecodeError {
        encoding: encoding.as_str(),
        reason,
    })
}

/// Encode raw bytes for transmission as a chunk payload
pub fn encode(data: &[u8], encoding: Encoding) -> String {
    match encoding {
        Encoding::Hex => hex::encode(data),
        Encoding::Base64 => STANDARD.encode(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode("d4c3B2a1", "hex").unwrap(), vec![0xd4, 0xc3, 0xb2, 0xa1]);
        assert_eq!(decode("", "hex").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_decode_base64() {
        assert_eq!(decode("AAEC/w==", "base64").unwrap(), vec![0x00, 0x01, 0x02, 0xff]);
    }

    #[test]
    fn test_round_trip_both_encodings() {
        let data: Vec<u8> = (0..=255u8).chain([0, 0, 7]).collect();
        for encoding in [Encoding::Hex, Encoding::Base64] {
            let text = encode(&data, encoding);
            assert_eq!(decode(&text, encoding.as_str()).unwrap(), data);
        }
    }

    #[test]
    fn test_unsupported_encoding() {
        let err = decode("begin 644 x", "uuencode").unwrap_err();
        assert!(matches!(err, AppError::UnsupportedEncoding));
        assert_eq!(err.to_string(), "unsupported encoding");
        // Tags are matched exactly
        assert!(matches!(decode("00", "HEX"), Err(AppError::UnsupportedEncoding)));
    }

    #[test]
    fn test_malformed_payload_names_encoding() {
        match decode("abc", "hex") {
            Err(AppError::DecodeError { encoding, .. }) => assert_eq!(encoding, "hex"),
            other => panic!("expected hex decode error, got {:?}", other),
        }
        match decode("zz", "hex") {
            Err(AppError::DecodeError { encoding, .. }) => assert_eq!(encoding, "hex"),
            other => panic!("expected hex decode error, got {:?}", other),
        }
        // Unpadded input is rejected by the standard engine
        match decode("AAEC/w", "base64") {
            Err(AppError::DecodeError { encoding, .. }) => assert_eq!(encoding, "base64"),
            other => panic!("expected base64 decode error, got {:?}", other),
        }
    }
}
