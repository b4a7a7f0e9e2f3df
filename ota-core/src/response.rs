//! Status replies sent back to the uploader.
//!
//! The wire format is a closed set of templates:
//!
//! ```text
//! 200 OK\n\nSuccess. Next boot partition is <label>\n
//! 400 Bad Request\n\nFailure. Error code: 0x<hex>\n
//! ```

use core::fmt::Write;

/// Partition labels are at most 16 bytes on the target.
pub const MAX_LABEL_LEN: usize = 16;

pub const RESPONSE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response<'a> {
    /// The named region will be booted next.
    BootTargetSet { label: &'a str },
    Failure { code: i32 },
}

impl Response<'_> {
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            Response::BootTargetSet { .. } => (200, "OK"),
            Response::Failure { .. } => (400, "Bad Request"),
        }
    }

    pub fn encode(&self) -> heapless::String<RESPONSE_CAPACITY> {
        let (code, reason) = self.status();
        let mut out = heapless::String::new();
        let written = match self {
            Response::BootTargetSet { label } => write!(
                out,
                "{code} {reason}\n\nSuccess. Next boot partition is {}\n",
                truncate_label(label)
            ),
            Response::Failure { code: err } => {
                write!(out, "{code} {reason}\n\nFailure. Error code: 0x{err:x}\n")
            }
        };
        debug_assert!(written.is_ok(), "reply exceeds {RESPONSE_CAPACITY} bytes");
        out
    }
}

fn truncate_label(label: &str) -> &str {
    if label.len() <= MAX_LABEL_LEN {
        return label;
    }
    let mut end = MAX_LABEL_LEN;
    while !label.is_char_boundary(end) {
        end -= 1;
    }
    &label[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_template() {
        let response = Response::BootTargetSet { label: "ota_0" };
        assert_eq!(
            response.encode().as_str(),
            "200 OK\n\nSuccess. Next boot partition is ota_0\n"
        );
    }

    #[test]
    fn failure_template_uses_lower_hex() {
        let response = Response::Failure { code: 0x1503 };
        assert_eq!(
            response.encode().as_str(),
            "400 Bad Request\n\nFailure. Error code: 0x1503\n"
        );
    }

    #[test]
    fn negative_codes_render_as_32_bit_hex() {
        let response = Response::Failure { code: -1 };
        assert_eq!(
            response.encode().as_str(),
            "400 Bad Request\n\nFailure. Error code: 0xffffffff\n"
        );
    }

    #[test]
    fn long_labels_are_truncated() {
        let response = Response::BootTargetSet {
            label: "a_really_long_partition_label",
        };
        assert_eq!(
            response.encode().as_str(),
            "200 OK\n\nSuccess. Next boot partition is a_really_long_pa\n"
        );
    }

    #[test]
    fn longest_replies_fit_capacity() {
        let success = Response::BootTargetSet {
            label: "0123456789abcdef-overflow",
        }
        .encode();
        assert_eq!(
            success.as_str(),
            "200 OK\n\nSuccess. Next boot partition is 0123456789abcdef\n"
        );
        assert!(success.len() <= RESPONSE_CAPACITY);

        let failure = Response::Failure { code: i32::MIN }.encode();
        assert_eq!(
            failure.as_str(),
            "400 Bad Request\n\nFailure. Error code: 0x80000000\n"
        );
        assert!(Response::Failure { code: -1 }.encode().ends_with("0xffffffff\n"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 15 ASCII bytes followed by a two-byte character straddling the limit.
        let label = "abcdefghijklmnoé";
        assert_eq!(truncate_label(label), "abcdefghijklmno");
    }
}
