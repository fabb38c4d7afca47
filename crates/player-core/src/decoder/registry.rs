//! Static list of compiled-in decoder backends.
//!
//! Only backends whose `probe` accepts the stream are candidates, MIME type
//! matches ahead of the rest. Fallback backends that accept anything come
//! last.

use std::sync::Arc;

use super::raw_pcm::RawPcmPlugin;
use super::symphonia_backend::SymphoniaPlugin;
use super::{DecodeError, DecoderPlugin, Tag};
use crate::input::InputStream;

/// Ordered set of decoder backends.
#[derive(Clone)]
pub struct DecoderRegistry {
    plugins: Vec<Arc<dyn DecoderPlugin>>,
}

impl DecoderRegistry {
    pub fn new(plugins: Vec<Arc<dyn DecoderPlugin>>) -> Self {
        Self { plugins }
    }

    /// All backends compiled into this build.
    pub fn builtin() -> Self {
        Self::new(vec![Arc::new(RawPcmPlugin), Arc::new(SymphoniaPlugin)])
    }

    /// Backends worth trying for `input`, in dispatch order, without duplicates.
    pub fn candidates(&self, input: &dyn InputStream) -> Vec<Arc<dyn DecoderPlugin>> {
        let mut out: Vec<Arc<dyn DecoderPlugin>> = Vec::new();
        let mut push = |plugin: &Arc<dyn DecoderPlugin>| {
            if !out.iter().any(|p| Arc::ptr_eq(p, plugin)) {
                out.push(plugin.clone());
            }
        };

        let accepted: Vec<_> = self.plugins.iter().filter(|p| p.probe(input)).collect();
        for plugin in accepted.iter().filter(|p| p.probe_mime(input)) {
            push(*plugin);
        }
        for plugin in accepted {
            push(plugin);
        }
        for plugin in self.plugins.iter().filter(|p| p.is_fallback()) {
            push(plugin);
        }
        out
    }

    /// Read tags with the first backend that probes the input successfully.
    ///
    /// `reopen` supplies a fresh stream for each attempt after the first.
    pub fn tag<F>(&self, input: Box<dyn InputStream>, mut reopen: F) -> Result<Option<Tag>, DecodeError>
    where
        F: FnMut() -> Result<Box<dyn InputStream>, DecodeError>,
    {
        let candidates = self.candidates(input.as_ref());
        let mut input = Some(input);
        let mut last_err = None;
        for plugin in candidates {
            let stream = match input.take() {
                Some(stream) => stream,
                None => reopen()?,
            };
            match plugin.tag(stream) {
                Ok(Some(tag)) => return Ok(Some(tag)),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(backend = plugin.name(), "tag read failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecodeSession;
    use crate::input::MemoryInput;

    fn names(list: &[Arc<dyn DecoderPlugin>]) -> Vec<&'static str> {
        list.iter().map(|p| p.name()).collect()
    }

    #[test]
    fn mime_match_comes_first() {
        let registry = DecoderRegistry::builtin();
        let input = MemoryInput::new("http://radio/stream", Vec::new())
            .with_mime("audio/L16;rate=8000");
        assert_eq!(names(&registry.candidates(&input)), vec!["raw_pcm", "symphonia"]);
    }

    #[test]
    fn suffix_match_selects_symphonia() {
        let registry = DecoderRegistry::builtin();
        let input = MemoryInput::new("/music/a.flac", Vec::new());
        assert_eq!(names(&registry.candidates(&input)), vec!["symphonia"]);
    }

    #[test]
    fn unknown_stream_falls_back() {
        let registry = DecoderRegistry::builtin();
        let input = MemoryInput::new("/music/a.xyz", Vec::new());
        assert_eq!(names(&registry.candidates(&input)), vec!["symphonia"]);
    }

    #[test]
    fn empty_registry_has_no_candidates() {
        let registry = DecoderRegistry::new(Vec::new());
        let input = MemoryInput::new("/music/a.flac", Vec::new());
        assert!(registry.candidates(&input).is_empty());
    }

    /// Accepts network streams by URI regardless of suffix or MIME type.
    struct StreamOnly;

    impl DecoderPlugin for StreamOnly {
        fn name(&self) -> &'static str {
            "stream_only"
        }

        fn suffixes(&self) -> &'static [&'static str] {
            &["flac"]
        }

        fn mime_types(&self) -> &'static [&'static str] {
            &[]
        }

        fn probe(&self, input: &dyn InputStream) -> bool {
            input.uri().starts_with("http://")
        }

        fn open(&self, _input: Box<dyn InputStream>) -> Result<Box<dyn DecodeSession>, DecodeError> {
            Err(DecodeError::NoAudioStream)
        }

        fn tag(&self, _input: Box<dyn InputStream>) -> Result<Option<Tag>, DecodeError> {
            Ok(None)
        }
    }

    #[test]
    fn dispatch_skips_backends_that_decline() {
        let registry = DecoderRegistry::new(vec![Arc::new(StreamOnly), Arc::new(SymphoniaPlugin)]);

        let stream = MemoryInput::new("http://radio/live", Vec::new());
        assert_eq!(names(&registry.candidates(&stream)), vec!["stream_only", "symphonia"]);

        let local = MemoryInput::new("/music/a.flac", Vec::new());
        assert_eq!(names(&registry.candidates(&local)), vec!["symphonia"]);
    }

    #[test]
    fn tag_reads_raw_pcm_duration() {
        let registry = DecoderRegistry::builtin();
        let input = MemoryInput::new("/music/a.l16", vec![0u8; 44_100 * 4]);
        let tag = registry
            .tag(Box::new(input), || Err(DecodeError::NoAudioStream))
            .unwrap()
            .unwrap();
        assert_eq!(tag.duration, Some(1.0));
    }
}
