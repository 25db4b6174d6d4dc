//! Text encodings for file payloads
//!
//! `read_file_string` and `write_file_string` convert between byte payloads
//! and text in the supported encodings. `base64` and `hex` treat the text
//! side as the encoded form: writing a base64 string stores the decoded
//! bytes, reading returns the base64 encoding of the payload.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::Engine;

use crate::error::FsError;

/// Supported payload encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
	Utf8,
	Ascii,
	Latin1,
	Base64,
	Hex,
}

impl Encoding {
	/// Parse an encoding name; unknown names fail with `EINVAL`
	pub fn parse(name: &str, syscall: &'static str) -> Result<Encoding, FsError> {
		match name.to_ascii_lowercase().as_str() {
			"utf-8" | "utf8" => Ok(Encoding::Utf8),
			"ascii" => Ok(Encoding::Ascii),
			// "binary" is the historical alias for latin1
			"latin1" | "binary" => Ok(Encoding::Latin1),
			"base64" => Ok(Encoding::Base64),
			"hex" => Ok(Encoding::Hex),
			_ => Err(FsError::invalid(syscall, name, "unknown encoding")),
		}
	}
}

/// Convert raw payload bytes into text in the given encoding
pub fn decode(bytes: &[u8], encoding: Encoding, syscall: &'static str) -> Result<String, FsError> {
	match encoding {
		Encoding::Utf8 => String::from_utf8(bytes.to_vec())
			.map_err(|_| FsError::invalid(syscall, "", "invalid utf-8 payload")),
		Encoding::Ascii => Ok(bytes.iter().map(|b| (b & 0x7F) as char).collect()),
		Encoding::Latin1 => Ok(bytes.iter().map(|b| *b as char).collect()),
		Encoding::Base64 => Ok(BASE64.encode(bytes)),
		Encoding::Hex => Ok(hex::encode(bytes)),
	}
}

/// Convert text in the given encoding into raw payload bytes
pub fn encode(text: &str, encoding: Encoding, syscall: &'static str) -> Result<Vec<u8>, FsError> {
	match encoding {
		Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
		Encoding::Ascii | Encoding::Latin1 => {
			Ok(text.chars().map(|c| (c as u32 & 0xFF) as u8).collect())
		}
		Encoding::Base64 => BASE64
			.decode(text.trim())
			.map_err(|_| FsError::invalid(syscall, "", "invalid base64 payload")),
		Encoding::Hex => {
			hex::decode(text).map_err(|_| FsError::invalid(syscall, "", "invalid hex payload"))
		}
	}
}


// vim: ts=4
