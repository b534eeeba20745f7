//! Audio content-type inference from container magic numbers.

/// Known container headers and the content type each one implies.
const MAGIC_NUMBERS: &[(&[u8], &str)] = &[
    (b"RIFF", "audio/wav"),
    (b"fLaC", "audio/flac"),
    (b"OggS", "audio/ogg; codecs=opus"),
    (&[0x1A, 0x45, 0xDF, 0xA3], "audio/webm; codecs=opus"),
    (b"ID3", "audio/mp3"),
];

/// Infer the content type from the first four bytes of an audio stream.
pub fn detect(chunk: &[u8]) -> Option<&'static str> {
    let header = &chunk[..chunk.len().min(4)];
    MAGIC_NUMBERS
        .iter()
        .find(|(magic, _)| header.starts_with(magic))
        .map(|(_, content_type)| *content_type)
}

/// Like [`detect`], falling back to `default` for unrecognized audio.
pub fn detect_or(chunk: &[u8], default: &str) -> String {
    detect(chunk).unwrap_or(default).to_string()
}
