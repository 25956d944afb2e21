//! The wave bank (spec §4.8): a process-wide registry of decoded
//! [`Waveform`]s keyed both by canonical filesystem path (so repeated
//! `<region sample=...>` references to the same file share one decode)
//! and by [`WaveformId`] (a stable handle for external callers).
//!
//! Refcounting rides on [`Arc`] itself rather than a hand-rolled counter:
//! the bank's own map entry is one strong reference: when `unref` drops its
//! caller-held clone and finds the bank's is the only one left
//! (`Arc::strong_count == 1`), the entry is removed and the waveform's
//! backing buffer is freed with it. This is only ever called from the
//! control thread (spec §5: "Wave bank: mutated only on control thread").

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cbx_core::error::{CbxError, CbxResult};
use cbx_core::waveform::{Waveform, WaveformHandle, WaveformId};

/// Decode a WAV file into interleaved 16-bit PCM plus its channel count and
/// source sample rate. Only mono and stereo files are supported; anything
/// else is a [`CbxError::Format`] (spec §4.8: "unsupported channel counts
/// (≠1, ≠2) yield an error").
pub fn decode_wav(path: &Path) -> CbxResult<(Vec<i16>, u8, u32)> {
    let reader = hound::WavReader::open(path).map_err(|e| CbxError::Io(to_io_error(e)))?;
    let spec = reader.spec();
    if spec.channels != 1 && spec.channels != 2 {
        return Err(CbxError::Format(format!(
            "unsupported channel count {} in {}",
            spec.channels,
            path.display()
        )));
    }

    let samples: Result<Vec<i16>, _> = match spec.sample_format {
        hound::SampleFormat::Int if spec.bits_per_sample == 16 => {
            reader.into_samples::<i16>().collect()
        }
        hound::SampleFormat::Int if spec.bits_per_sample == 8 => {
            // Unsigned 8-bit PCM, widened to signed 16-bit.
            let widened: Result<Vec<i16>, hound::Error> = reader
                .into_samples::<i8>()
                .map(|s| s.map(|v| (v as i16) << 8))
                .collect();
            widened
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect(),
        other => {
            return Err(CbxError::Format(format!(
                "unsupported sample format {other:?} in {}",
                path.display()
            )))
        }
    };
    let samples = samples.map_err(|e| CbxError::Format(e.to_string()))?;
    Ok((samples, spec.channels as u8, spec.sample_rate))
}

fn to_io_error(e: hound::Error) -> std::io::Error {
    match e {
        hound::Error::IoError(io) => io,
        other => std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
    }
}

struct Entry {
    handle: WaveformHandle,
    bytes: usize,
}

/// Registry keyed by canonical path and by id, with byte-usage tracking
/// for observability (spec §4.8: "Tracks `bytes` ... and `maxbytes`").
pub struct WaveBank {
    by_path: HashMap<PathBuf, WaveformId>,
    by_id: HashMap<WaveformId, Entry>,
    next_id: WaveformId,
    bytes: usize,
    maxbytes: usize,
}

impl Default for WaveBank {
    fn default() -> Self {
        Self::new()
    }
}

impl WaveBank {
    pub fn new() -> Self {
        Self {
            by_path: HashMap::new(),
            by_id: HashMap::new(),
            next_id: 1,
            bytes: 0,
            maxbytes: 0,
        }
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn maxbytes(&self) -> usize {
        self.maxbytes
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Returns an existing waveform (by canonical path) with an additional
    /// strong reference, or decodes and registers a new one. Decode failure
    /// and unsupported channel counts propagate as `CbxError`.
    pub fn get_waveform(&mut self, path: impl AsRef<Path>) -> CbxResult<WaveformHandle> {
        let canonical = fs::canonicalize(path.as_ref()).map_err(CbxError::Io)?;
        if let Some(&id) = self.by_path.get(&canonical) {
            return Ok(self.by_id.get(&id).expect("by_path/by_id out of sync").handle.clone());
        }

        let (data, channels, source_sample_rate) = decode_wav(&canonical)?;
        let id = self.next_id;
        self.next_id += 1;
        let bytes = data.len() * std::mem::size_of::<i16>();
        let waveform = Arc::new(Waveform::new(id, canonical.clone(), data, channels, source_sample_rate));

        self.by_path.insert(canonical, id);
        self.by_id.insert(id, Entry { handle: waveform.clone(), bytes });
        self.bytes += bytes;
        self.maxbytes = self.maxbytes.max(self.bytes);

        Ok(waveform)
    }

    pub fn get_by_id(&self, id: WaveformId) -> Option<WaveformHandle> {
        self.by_id.get(&id).map(|e| e.handle.clone())
    }

    /// Drops the caller's clone and, if the bank's own copy was the last
    /// one standing, removes the entry from both indexes and reclaims its
    /// byte count. Invariant maintained: every waveform left in the bank
    /// has `refcount > 0` (spec §8), i.e. at least the bank's own handle.
    pub fn unref(&mut self, handle: WaveformHandle) {
        let id = handle.id;
        drop(handle);
        let Some(entry) = self.by_id.get(&id) else { return };
        if Arc::strong_count(&entry.handle) <= 1 {
            let entry = self.by_id.remove(&id).expect("checked above");
            self.by_path.remove(&entry.handle.path);
            self.bytes -= entry.bytes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_wav(path: &Path, channels: u16, frames: u32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames * channels as u32 {
            writer.write_sample((i % 100) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn repeated_path_shares_one_decode_and_refcounts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_test_wav(&path, 2, 100);

        let mut bank = WaveBank::new();
        let a = bank.get_waveform(&path).unwrap();
        let b = bank.get_waveform(&path).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(bank.len(), 1);

        bank.unref(a);
        // `b` plus the bank's own entry are still alive.
        assert_eq!(bank.len(), 1);
        bank.unref(b);
        assert_eq!(bank.len(), 0);
        assert_eq!(bank.bytes(), 0);
    }

    #[test]
    fn bytes_tracks_total_and_high_water_mark() {
        let dir = tempfile::tempdir().unwrap();
        let path1 = dir.path().join("one.wav");
        let path2 = dir.path().join("two.wav");
        write_test_wav(&path1, 1, 1000);
        write_test_wav(&path2, 1, 500);

        let mut bank = WaveBank::new();
        let a = bank.get_waveform(&path1).unwrap();
        let peak_after_a = bank.bytes();
        let b = bank.get_waveform(&path2).unwrap();
        assert!(bank.bytes() > peak_after_a);
        assert_eq!(bank.maxbytes(), bank.bytes());

        let high_water = bank.maxbytes();
        bank.unref(b);
        assert_eq!(bank.bytes(), peak_after_a);
        // Dropping an entry never lowers the high-water mark.
        assert_eq!(bank.maxbytes(), high_water);
        bank.unref(a);
        assert_eq!(bank.bytes(), 0);
    }

    #[test]
    fn unsupported_channel_count_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quad.wav");
        write_test_wav(&path, 4, 10);
        let mut bank = WaveBank::new();
        let err = bank.get_waveform(&path).unwrap_err();
        assert!(matches!(err, CbxError::Format(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let mut bank = WaveBank::new();
        let err = bank.get_waveform("/nonexistent/path/does/not/exist.wav").unwrap_err();
        assert!(matches!(err, CbxError::Io(_)));
        let _ = Write::flush(&mut std::io::sink());
    }
}
