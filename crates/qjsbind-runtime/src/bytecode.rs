//! Bytecode envelope
//!
//! Engine bytecode is only valid for the exact engine build that wrote it, so
//! `compile` wraps the payload in a small envelope naming that build and
//! `execute` refuses anything that does not match before the engine sees it.
//!
//! ```text
//! ┌────────┬─────────┬────────┬──────────────┬─────────────┬─────────┐
//! │ "QJBC" │ version │ id len │ build id     │ payload len │ payload │
//! │ 4      │ 1       │ 1      │ id len bytes │ 4 (LE)      │ ...     │
//! └────────┴─────────┴────────┴──────────────┴─────────────┴─────────┘
//! ```

use thiserror::Error;

const MAGIC: &[u8; 4] = b"QJBC";
const FORMAT_VERSION: u8 = 1;

/// Why a bytecode blob was refused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BytecodeError {
    #[error("blob is truncated")]
    Truncated,

    #[error("not a qjsbind bytecode blob")]
    BadMagic,

    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),

    #[error("bytecode was produced by engine build {found:?}, this is {expected:?}")]
    BuildMismatch { expected: String, found: String },

    #[error("payload length mismatch: header says {declared} bytes, found {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload too large: {0} bytes")]
    TooLarge(usize),

    /// The engine itself refused the payload
    #[error("{0}")]
    Rejected(String),
}

/// Wrap an engine payload for the given build
pub fn encode(build_id: &str, payload: &[u8]) -> Result<Vec<u8>, BytecodeError> {
    let id = build_id.as_bytes();
    let id_len = u8::try_from(id.len()).map_err(|_| BytecodeError::TooLarge(id.len()))?;
    let payload_len =
        u32::try_from(payload.len()).map_err(|_| BytecodeError::TooLarge(payload.len()))?;

    let mut out = Vec::with_capacity(MAGIC.len() + 2 + id.len() + 4 + payload.len());
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.push(id_len);
    out.extend_from_slice(id);
    out.extend_from_slice(&payload_len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Validate the envelope and return the engine payload
pub fn decode<'a>(build_id: &str, blob: &'a [u8]) -> Result<&'a [u8], BytecodeError> {
    let mut reader = Reader { rest: blob };

    if reader.take(MAGIC.len())? != MAGIC {
        return Err(BytecodeError::BadMagic);
    }

    let version = reader.take(1)?[0];
    if version != FORMAT_VERSION {
        return Err(BytecodeError::UnsupportedVersion(version));
    }

    let id_len = reader.take(1)?[0] as usize;
    let found = reader.take(id_len)?;
    if found != build_id.as_bytes() {
        return Err(BytecodeError::BuildMismatch {
            expected: build_id.to_string(),
            found: String::from_utf8_lossy(found).into_owned(),
        });
    }

    let mut len = [0u8; 4];
    len.copy_from_slice(reader.take(4)?);
    let declared = u32::from_le_bytes(len) as usize;
    if declared != reader.rest.len() {
        return Err(BytecodeError::LengthMismatch {
            declared,
            actual: reader.rest.len(),
        });
    }

    Ok(reader.rest)
}

struct Reader<'a> {
    rest: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], BytecodeError> {
        if self.rest.len() < n {
            return Err(BytecodeError::Truncated);
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUILD: &str = "test-engine-1";

    #[test]
    fn test_roundtrip() {
        let blob = encode(BUILD, &[1, 2, 3]).unwrap();
        assert_eq!(&blob[..4], b"QJBC");
        assert_eq!(decode(BUILD, &blob).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(decode(BUILD, &[]), Err(BytecodeError::Truncated));
    }

    #[test]
    fn test_bad_magic() {
        let mut blob = encode(BUILD, &[1]).unwrap();
        blob[0] = b'X';
        assert_eq!(decode(BUILD, &blob), Err(BytecodeError::BadMagic));
    }

    #[test]
    fn test_unknown_version() {
        let mut blob = encode(BUILD, &[1]).unwrap();
        blob[4] = 9;
        assert_eq!(decode(BUILD, &blob), Err(BytecodeError::UnsupportedVersion(9)));
    }

    #[test]
    fn test_other_build_refused() {
        let blob = encode("other-engine", &[1]).unwrap();
        let err = decode(BUILD, &blob).unwrap_err();
        assert_eq!(
            err,
            BytecodeError::BuildMismatch {
                expected: BUILD.to_string(),
                found: "other-engine".to_string(),
            }
        );
    }

    #[test]
    fn test_truncated_payload() {
        let blob = encode(BUILD, &[1, 2, 3, 4]).unwrap();
        let err = decode(BUILD, &blob[..blob.len() - 1]).unwrap_err();
        assert_eq!(
            err,
            BytecodeError::LengthMismatch {
                declared: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn test_trailing_garbage() {
        let mut blob = encode(BUILD, &[1]).unwrap();
        blob.push(0);
        assert!(matches!(
            decode(BUILD, &blob),
            Err(BytecodeError::LengthMismatch { .. })
        ));
    }
}
