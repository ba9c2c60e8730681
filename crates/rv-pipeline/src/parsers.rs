use crate::error::ParseError;
use crate::traits::Parser;

/// Handles `text/plain` and `text/markdown` uploads — the only formats this
/// service is required to read end to end. Markdown is passed through
/// verbatim; structural stripping (headings, emphasis) happens in the
/// Structure stage, not here.
pub struct PlainTextParser {
    pub max_file_size_bytes: u64,
}

impl Parser for PlainTextParser {
    fn parse(&self, bytes: &[u8], mime_type: &str) -> Result<String, ParseError> {
        if bytes.len() as u64 > self.max_file_size_bytes {
            return Err(ParseError::TooLarge { size: bytes.len() as u64, limit: self.max_file_size_bytes });
        }
        if !matches!(mime_type, "text/plain" | "text/markdown") {
            return Err(ParseError::UnsupportedFormat(mime_type.to_string()));
        }
        String::from_utf8(bytes.to_vec()).map_err(|e| ParseError::Malformed(e.to_string()))
    }
}

/// PDF extraction is out of scope for this build; the stub exists so the
/// dispatcher has a named failure mode instead of silently mis-parsing.
pub struct PdfStubParser;

impl Parser for PdfStubParser {
    fn parse(&self, _bytes: &[u8], _mime_type: &str) -> Result<String, ParseError> {
        Err(ParseError::UnsupportedFormat("application/pdf".into()))
    }
}

/// Same as `PdfStubParser`, for `.docx`.
pub struct DocxStubParser;

impl Parser for DocxStubParser {
    fn parse(&self, _bytes: &[u8], _mime_type: &str) -> Result<String, ParseError> {
        Err(ParseError::UnsupportedFormat(
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document".into(),
        ))
    }
}

/// Picks a parser by MIME type. Unknown types fail fast with
/// `ParseError::UnsupportedFormat` rather than falling through to the text
/// parser and mis-decoding binary content.
pub struct DispatchParser {
    pub max_file_size_bytes: u64,
}

impl Parser for DispatchParser {
    fn parse(&self, bytes: &[u8], mime_type: &str) -> Result<String, ParseError> {
        match mime_type {
            "text/plain" | "text/markdown" => {
                PlainTextParser { max_file_size_bytes: self.max_file_size_bytes }.parse(bytes, mime_type)
            }
            "application/pdf" => PdfStubParser.parse(bytes, mime_type),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                DocxStubParser.parse(bytes, mime_type)
            }
            other => Err(ParseError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_parses_utf8() {
        let parser = PlainTextParser { max_file_size_bytes: 1024 };
        let out = parser.parse(b"hello world", "text/plain").unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn plain_text_rejects_oversized_files() {
        let parser = PlainTextParser { max_file_size_bytes: 4 };
        let err = parser.parse(b"too long", "text/plain").unwrap_err();
        assert!(matches!(err, ParseError::TooLarge { .. }));
    }

    #[test]
    fn dispatch_rejects_pdf() {
        let parser = DispatchParser { max_file_size_bytes: 1024 };
        let err = parser.parse(b"%PDF-1.4", "application/pdf").unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFormat(_)));
    }

    #[test]
    fn dispatch_rejects_unknown_mime() {
        let parser = DispatchParser { max_file_size_bytes: 1024 };
        let err = parser.parse(b"\x00\x01", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedFormat(_)));
    }
}
