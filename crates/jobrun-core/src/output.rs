//! Output size capping shared by all workers.

/// Render captured text, keeping at most `cap` bytes.
///
/// At or below the cap the text is returned trimmed. Above it the first `cap`
/// bytes (rounded down to a char boundary) are kept, trailing whitespace is
/// trimmed and a marker with the original length is appended. Returns `None`
/// for blank output.
pub fn cap_output(text: &str, cap: usize) -> Option<String> {
    cap_bytes(text.as_bytes(), text.len(), cap)
}

/// Like [`cap_output`] for raw bytes that may already have been cut at
/// capture time, where `total_len` is the number of bytes the producer
/// actually emitted.
///
/// Whether to truncate is decided on byte counts alone. Bytes are decoded
/// once, lossily, after the cut.
pub fn cap_bytes(kept: &[u8], total_len: usize, cap: usize) -> Option<String> {
    if total_len <= cap && kept.len() <= cap {
        let text = String::from_utf8_lossy(kept);
        let trimmed = text.trim();
        return (!trimmed.is_empty()).then(|| trimmed.to_string());
    }

    let cut = cap.min(kept.len());
    let mut end = cut;
    // Back off continuation bytes so a multi-byte char is not split. A UTF-8
    // char has at most three of them.
    while end > 0 && cut - end < 3 && end < kept.len() && is_continuation(kept[end]) {
        end -= 1;
    }
    let text = String::from_utf8_lossy(&kept[..end]);
    Some(format!(
        "{}\n\n[output truncated] ({} chars total)",
        text.trim_end(),
        total_len
    ))
}

fn is_continuation(byte: u8) -> bool {
    byte & 0b1100_0000 == 0b1000_0000
}
