/// Truncate `bytes` to at most `max_len` bytes at a UTF-8 character
/// boundary (§3.1 `output_preview`: "UTF-8, lossy-safe"; §3.4: length ≤
/// `preview_bytes`).
pub fn truncate_preview(bytes: &[u8], max_len: usize) -> String {
    let slice = if bytes.len() <= max_len {
        bytes
    } else {
        let mut end = max_len;
        while end > 0 && !bytes.is_char_boundary(end) {
            end -= 1;
        }
        &bytes[..end]
    };
    String::from_utf8_lossy(slice).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_passes_through_unchanged() {
        assert_eq!(truncate_preview(b"hi\n", 1024), "hi\n");
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let multibyte = "a".repeat(9).into_bytes();
        let mut bytes = multibyte;
        bytes.extend_from_slice("\u{1F600}".as_bytes()); // 4-byte emoji
        let preview = truncate_preview(&bytes, 10);
        assert!(preview.is_char_boundary(preview.len()));
        assert!(preview.len() <= 10);
    }
}
