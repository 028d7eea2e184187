//! Best-effort decoding of local command output

use encoding_rs::{Encoding, UTF_8};

/// Ordered decode attempts ending in a lossy pass.
///
/// Decoding never fails: if no candidate decodes the bytes cleanly, the
/// first candidate decodes them with replacement characters.
#[derive(Debug, Clone)]
pub struct LineDecoder {
    candidates: Vec<&'static Encoding>,
}

impl LineDecoder {
    /// Native console encoding first, then UTF-8
    pub fn native() -> Self {
        Self::with_candidates(vec![native_encoding(), UTF_8])
    }

    pub fn with_candidates(candidates: Vec<&'static Encoding>) -> Self {
        let mut deduped: Vec<&'static Encoding> = Vec::with_capacity(candidates.len());
        for encoding in candidates {
            if !deduped.contains(&encoding) {
                deduped.push(encoding);
            }
        }
        if deduped.is_empty() {
            deduped.push(UTF_8);
        }
        Self { candidates: deduped }
    }

    pub fn candidates(&self) -> &[&'static Encoding] {
        &self.candidates
    }

    /// Decode one line and strip trailing whitespace (including `\r\n`)
    pub fn decode_line(&self, bytes: &[u8]) -> String {
        for encoding in &self.candidates {
            if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes) {
                return text.trim_end().to_string();
            }
        }
        let (text, _) = self.candidates[0].decode_without_bom_handling(bytes);
        text.trim_end().to_string()
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::native()
    }
}

/// Code page 936. Build tools on the Chinese Windows consoles this runs on
/// emit GBK; anything else that is valid UTF-8 still decodes through the
/// second candidate, and the rest goes through the lossy pass.
#[cfg(windows)]
fn native_encoding() -> &'static Encoding {
    encoding_rs::GBK
}

#[cfg(not(windows))]
fn native_encoding() -> &'static Encoding {
    UTF_8
}
