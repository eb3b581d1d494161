//! Output codec selection for saved detection clips (SPEC_FULL §4.6).

/// Clip container/codec. Only `Wav` is implemented; the others are accepted
/// in configuration so a deployment can name its preferred codec ahead of
/// the encoder landing, but fail fast with `UnsupportedCodec` rather than
/// silently falling back to WAV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipCodec {
    #[default]
    Wav,
    Flac,
    Mp3,
    Opus,
}

impl ClipCodec {
    pub fn extension(self) -> &'static str {
        match self {
            ClipCodec::Wav => "wav",
            ClipCodec::Flac => "flac",
            ClipCodec::Mp3 => "mp3",
            ClipCodec::Opus => "opus",
        }
    }

    pub fn is_supported(self) -> bool {
        matches!(self, ClipCodec::Wav)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_wav_is_supported() {
        assert!(ClipCodec::Wav.is_supported());
        assert!(!ClipCodec::Flac.is_supported());
        assert!(!ClipCodec::Mp3.is_supported());
        assert!(!ClipCodec::Opus.is_supported());
    }
}
