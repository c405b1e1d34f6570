use super::{DecoderError, DecoderFactory, MediaDecoder, MIME_H264, MIME_PCM};
use crate::audio::PcmDecoder;
use crate::video::OpenH264Decoder;

/// Decoders that need no platform codec: OpenH264 for H.264 video and
/// raw PCM played through the default audio device.
pub struct SoftwareDecoderFactory {
    audio_enabled: bool,
}

impl SoftwareDecoderFactory {
    pub fn new(audio_enabled: bool) -> Self {
        Self { audio_enabled }
    }
}

impl Default for SoftwareDecoderFactory {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DecoderFactory for SoftwareDecoderFactory {
    fn supports(&self, mime: &str) -> bool {
        match mime {
            MIME_H264 => true,
            MIME_PCM => self.audio_enabled,
            _ => false,
        }
    }

    fn create(&self, mime: &str) -> Result<Box<dyn MediaDecoder>, DecoderError> {
        match mime {
            MIME_H264 => Ok(Box::new(OpenH264Decoder::new())),
            MIME_PCM if self.audio_enabled => Ok(Box::new(PcmDecoder::new())),
            other => Err(DecoderError::Unsupported(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MIME_AAC, MIME_H265};

    #[test]
    fn reports_only_what_it_can_build() {
        let factory = SoftwareDecoderFactory::new(false);
        assert!(factory.supports(MIME_H264));
        assert!(!factory.supports(MIME_H265));
        assert!(!factory.supports(MIME_AAC));
        assert!(!factory.supports(MIME_PCM));
        assert!(matches!(
            factory.create(MIME_H265),
            Err(DecoderError::Unsupported(_))
        ));
        assert!(SoftwareDecoderFactory::new(true).supports(MIME_PCM));
    }
}
