//! Minimal request header handling.
//!
//! Only `Content-Length` and `Content-Type` are interpreted. The request line
//! and any other header lines are skipped.

use crate::error::HeaderError;

/// Marks the end of the header block.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_TYPE: &str = "Content-Type";

/// Content type of a raw firmware image upload.
pub const FIRMWARE_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type of a boot-mode command.
pub const COMMAND_CONTENT_TYPE: &str = "text/parameters";

/// Command body that switches the next boot to the factory image.
pub const FACTORY_COMMAND: &[u8] = b"factory";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Unclassified,
    FirmwareUpload,
    BootCommand,
}

impl Classification {
    /// Classify a `Content-Type` value. Media type parameters are ignored.
    pub fn from_content_type(value: &[u8]) -> Self {
        let media_type = value.split(|&b| b == b';').next().unwrap_or_default().trim_ascii();

        if media_type.eq_ignore_ascii_case(FIRMWARE_CONTENT_TYPE.as_bytes()) {
            Classification::FirmwareUpload
        } else if media_type.eq_ignore_ascii_case(COMMAND_CONTENT_TYPE.as_bytes()) {
            Classification::BootCommand
        } else {
            Classification::Unclassified
        }
    }

    pub fn content_type(self) -> Option<&'static str> {
        match self {
            Classification::FirmwareUpload => Some(FIRMWARE_CONTENT_TYPE),
            Classification::BootCommand => Some(COMMAND_CONTENT_TYPE),
            Classification::Unclassified => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub declared_length: usize,
    pub classification: Classification,
}

impl RequestHeader {
    pub fn firmware(declared_length: usize) -> Self {
        Self {
            declared_length,
            classification: Classification::FirmwareUpload,
        }
    }

    pub fn factory_command() -> Self {
        Self {
            declared_length: FACTORY_COMMAND.len(),
            classification: Classification::BootCommand,
        }
    }

    /// Render the header block a client sends, terminator included.
    pub fn encode(&self) -> String {
        let mut out = String::from("POST /update HTTP/1.1\r\n");
        if let Some(content_type) = self.classification.content_type() {
            out.push_str(&format!("{CONTENT_TYPE}: {content_type}\r\n"));
        }
        out.push_str(&format!("{CONTENT_LENGTH}: {}\r\n\r\n", self.declared_length));
        out
    }
}

/// Offset of the first terminator byte, if the block is complete.
pub fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

/// Parse a header block, excluding its terminator.
pub fn parse_header(block: &[u8]) -> Result<RequestHeader, HeaderError> {
    let mut length = None;
    let mut content_type = None;

    for line in block.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let name = line[..colon].trim_ascii();
        let value = line[colon + 1..].trim_ascii();

        if name.eq_ignore_ascii_case(CONTENT_LENGTH.as_bytes()) {
            length.get_or_insert(value);
        } else if name.eq_ignore_ascii_case(CONTENT_TYPE.as_bytes()) {
            content_type.get_or_insert(value);
        }
    }

    let declared_length = parse_decimal(length.ok_or(HeaderError::MissingLength)?)
        .ok_or(HeaderError::InvalidLength)?;

    let content_type = content_type.ok_or(HeaderError::MissingContentType)?;
    let classification = match Classification::from_content_type(content_type) {
        Classification::Unclassified => {
            return Err(HeaderError::UnsupportedContentType(
                String::from_utf8_lossy(content_type).into_owned(),
            ))
        }
        known => known,
    };

    Ok(RequestHeader {
        declared_length,
        classification,
    })
}

// ASCII digits only: no sign, no whitespace, no locale.
fn parse_decimal(value: &[u8]) -> Option<usize> {
    if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
        return None;
    }
    value.iter().try_fold(0usize, |acc, &digit| {
        acc.checked_mul(10)?.checked_add(usize::from(digit - b'0'))
    })
}
