//! POSIX open-flag parsing
//!
//! Open flags arrive either as string tokens (`r`, `r+`, `w`, `w+`, `a`,
//! `a+`, optionally combined with `x` for exclusive or `s` for synchronous)
//! or as a numeric OR of `O_RDONLY | O_WRONLY | O_RDWR | O_CREAT | O_EXCL |
//! O_TRUNC | O_APPEND`. Both forms parse into the same capability set.

use crate::error::FsError;

/// Capability set produced by flag parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
	pub read: bool,
	pub write: bool,
	pub append: bool,
	pub exclusive: bool,
	pub truncate: bool,
	pub create: bool,
	pub synchronous: bool,
}

impl OpenFlags {
	/// Parse a flag argument: a string token, or a numeric string
	///
	/// Numeric-flag strings are accepted for caller compatibility; they
	/// parse through [`OpenFlags::from_bits`].
	pub fn parse(flag: &str, syscall: &'static str) -> Result<Self, FsError> {
		if flag.is_empty() {
			return Err(FsError::invalid(syscall, "", "empty open flag"));
		}
		if flag.chars().all(|c| c.is_ascii_digit()) {
			let bits: i32 = flag
				.parse()
				.map_err(|_| FsError::invalid(syscall, flag, "invalid numeric flag"))?;
			return Self::from_bits(bits, syscall);
		}
		Self::from_token(flag, syscall)
	}

	/// Parse a string token into the capability set
	///
	/// Tokens are order-insensitive: `wx` and `xw` are the same flag.
	/// Exactly one base letter (`r`/`w`/`a`) is required; `rw` is invalid.
	pub fn from_token(token: &str, syscall: &'static str) -> Result<Self, FsError> {
		let mut base: Option<char> = None;
		let mut plus = false;
		let mut exclusive = false;
		let mut synchronous = false;

		for c in token.chars() {
			match c {
				'r' | 'w' | 'a' => {
					if base.is_some() {
						return Err(FsError::invalid(syscall, token, "invalid open flag"));
					}
					base = Some(c);
				}
				'+' if !plus => plus = true,
				'x' if !exclusive => exclusive = true,
				's' if !synchronous => synchronous = true,
				_ => return Err(FsError::invalid(syscall, token, "invalid open flag")),
			}
		}

		let base = match base {
			Some(b) => b,
			None => return Err(FsError::invalid(syscall, token, "invalid open flag")),
		};
		if exclusive && base == 'r' {
			return Err(FsError::invalid(syscall, token, "invalid open flag"));
		}

		let flags = match base {
			'r' => OpenFlags { read: true, write: plus, synchronous, ..Default::default() },
			'w' => OpenFlags {
				read: plus,
				write: true,
				create: true,
				truncate: true,
				exclusive,
				synchronous,
				..Default::default()
			},
			'a' => OpenFlags {
				read: plus,
				write: true,
				append: true,
				create: true,
				exclusive,
				synchronous,
				..Default::default()
			},
			_ => unreachable!(),
		};
		Ok(flags)
	}

	/// Parse a numeric `O_*` OR-mask into the capability set
	pub fn from_bits(bits: i32, syscall: &'static str) -> Result<Self, FsError> {
		let accmode = bits & libc::O_ACCMODE;
		let (read, write) = match accmode {
			libc::O_RDONLY => (true, false),
			libc::O_WRONLY => (false, true),
			libc::O_RDWR => (true, true),
			_ => {
				return Err(FsError::invalid(syscall, bits.to_string(), "invalid access mode"));
			}
		};

		let append = bits & libc::O_APPEND != 0;
		Ok(OpenFlags {
			read,
			write: write || append,
			append,
			exclusive: bits & libc::O_EXCL != 0,
			truncate: bits & libc::O_TRUNC != 0,
			create: bits & libc::O_CREAT != 0,
			synchronous: false,
		})
	}
}


// vim: ts=4
