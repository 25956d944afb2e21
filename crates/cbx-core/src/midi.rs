//! MIDI event types, the bounded per-block event buffer, and the
//! stable k-way time-ordered merge used to combine multiple MIDI sources
//! into one scene input (spec §4.10).

/// MIDI 1.0 status bytes.
pub mod status {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_PRESSURE: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_PRESSURE: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;
    pub const SYSTEM: u8 = 0xF0;
}

/// Common MIDI CC numbers used by the sampler's controller handling.
pub mod cc {
    pub const MOD_WHEEL: u8 = 1;
    pub const VOLUME: u8 = 7;
    pub const PAN: u8 = 10;
    pub const EXPRESSION: u8 = 11;
    pub const SUSTAIN: u8 = 64;
    pub const SOSTENUTO: u8 = 66;
    pub const RESONANCE: u8 = 71;
    pub const CUTOFF: u8 = 74;
    pub const ALL_SOUND_OFF: u8 = 120;
    pub const RESET_ALL_CONTROLLERS: u8 = 121;
    pub const ALL_NOTES_OFF: u8 = 123;
}

/// Number of inline payload bytes a [`MidiEventData`] can hold without an
/// external allocation. Covers every 1-3 byte channel-voice message.
pub const MAX_INLINE_BYTES: usize = 4;

/// One MIDI event: a PPQN-independent position (its owner decides whether
/// that's a sample offset within a block or a PPQN tick) plus a payload.
/// Payloads of up to [`MAX_INLINE_BYTES`] are stored inline; longer ones
/// (sysex) use the `external` vector.
#[derive(Debug, Clone)]
pub struct MidiEventData {
    pub time: u32,
    len: u8,
    inline: [u8; MAX_INLINE_BYTES],
    external: Option<Vec<u8>>,
}

impl MidiEventData {
    pub fn new(time: u32, bytes: &[u8]) -> Self {
        if bytes.len() <= MAX_INLINE_BYTES {
            let mut inline = [0u8; MAX_INLINE_BYTES];
            inline[..bytes.len()].copy_from_slice(bytes);
            Self {
                time,
                len: bytes.len() as u8,
                inline,
                external: None,
            }
        } else {
            Self {
                time,
                len: bytes.len() as u8,
                inline: [0; MAX_INLINE_BYTES],
                external: Some(bytes.to_vec()),
            }
        }
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        match &self.external {
            Some(v) => v.as_slice(),
            None => &self.inline[..self.len as usize],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn status(&self) -> u8 {
        self.bytes().first().copied().unwrap_or(0)
    }

    /// Wire size of a channel-voice command given its status byte, per
    /// spec §6: 3 for 8x/9x/Ax/Bx/Ex, 2 for Cx/Dx, 1 for Fx.
    pub fn wire_size_for_status(status_byte: u8) -> usize {
        match status_byte & 0xF0 {
            0x80 | 0x90 | 0xA0 | 0xB0 | 0xE0 => 3,
            0xC0 | 0xD0 => 2,
            _ => 1,
        }
    }

    /// Normalises note-on with velocity 0 to a note-off, per spec §6.
    pub fn normalized(mut self) -> Self {
        if self.status() & 0xF0 == status::NOTE_ON && self.bytes().len() >= 3 && self.bytes()[2] == 0 {
            let ch = self.status() & 0x0F;
            let note = self.bytes()[1];
            let time = self.time;
            self = MidiEventData::new(time, &[status::NOTE_OFF | ch, note, 0]);
        }
        self
    }

    pub fn is_note_on(&self) -> bool {
        self.status() & 0xF0 == status::NOTE_ON && self.bytes().get(2).copied().unwrap_or(0) > 0
    }

    pub fn is_note_off(&self) -> bool {
        let st = self.status() & 0xF0;
        st == status::NOTE_OFF || (st == status::NOTE_ON && self.bytes().get(2).copied().unwrap_or(0) == 0)
    }

    pub fn channel(&self) -> Option<u8> {
        let st = self.status();
        if st < 0xF0 {
            Some(st & 0x0F)
        } else {
            None
        }
    }
}

/// Maximum events a [`MidiBuffer`] can hold in one block.
pub const MAX_EVENTS: usize = 256;
/// Maximum bytes of external (non-inline) payload data per block.
pub const MAX_EXTERNAL_BYTES: usize = 256;

/// A bounded, append-only per-block MIDI event buffer. Writes past either
/// cap are rejected (caller is expected to drop and, outside the audio
/// thread, warn).
#[derive(Debug, Default)]
pub struct MidiBuffer {
    events: Vec<MidiEventData>,
    external_bytes_used: usize,
}

impl MidiBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.external_bytes_used = 0;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[MidiEventData] {
        &self.events
    }

    /// Append one event, inlining payloads `<= MAX_INLINE_BYTES` automatically.
    /// Returns `false` (dropping the event) if either cap is reached.
    pub fn write_event(&mut self, time: u32, bytes: &[u8]) -> bool {
        if self.events.len() >= MAX_EVENTS {
            return false;
        }
        if bytes.len() > MAX_INLINE_BYTES
            && self.external_bytes_used + bytes.len() > MAX_EXTERNAL_BYTES
        {
            return false;
        }
        if bytes.len() > MAX_INLINE_BYTES {
            self.external_bytes_used += bytes.len();
        }
        self.events.push(MidiEventData::new(time, bytes));
        true
    }

    /// Append an already-built event (used by the merger).
    fn push_existing(&mut self, time: u32, event: &MidiEventData) -> bool {
        self.write_event(time, event.bytes())
    }
}

/// K-way stable merge of `inputs` by event time into `output`, resuming from
/// `positions` (one read cursor per input) so a partial merge can continue
/// across calls. Ties resolve in input order (the earlier input in the
/// slice wins), matching the spec's stability requirement.
pub fn merge(output: &mut MidiBuffer, inputs: &[&MidiBuffer], positions: &mut [usize]) {
    assert_eq!(inputs.len(), positions.len());
    loop {
        let mut best: Option<usize> = None;
        for (i, buf) in inputs.iter().enumerate() {
            if positions[i] >= buf.len() {
                continue;
            }
            let t = buf.events()[positions[i]].time;
            match best {
                None => best = Some(i),
                Some(b) => {
                    if t < inputs[b].events()[positions[b]].time {
                        best = Some(i);
                    }
                }
            }
        }
        let Some(i) = best else { break };
        let ev = &inputs[i].events()[positions[i]];
        if !output.push_existing(ev.time, ev) {
            break;
        }
        positions[i] += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_roundtrip_preserves_bytes_and_time() {
        let mut buf = MidiBuffer::new();
        assert!(buf.write_event(10, &[0x90, 64, 100]));
        let ev = &buf.events()[0];
        assert_eq!(ev.time, 10);
        assert_eq!(ev.bytes(), &[0x90, 64, 100]);
    }

    #[test]
    fn merge_is_stable_on_ties_and_order_equivalent_pairwise() {
        let mut a = MidiBuffer::new();
        a.write_event(5, &[0x90, 60, 100]);
        let mut b = MidiBuffer::new();
        b.write_event(5, &[0x90, 61, 100]);
        let mut c = MidiBuffer::new();
        c.write_event(3, &[0x90, 62, 100]);

        // Merge all three directly.
        let mut direct = MidiBuffer::new();
        let mut pos = vec![0, 0, 0];
        merge(&mut direct, &[&a, &b, &c], &mut pos);

        // Merge pairwise: (a, b) then with c.
        let mut ab = MidiBuffer::new();
        let mut pos_ab = vec![0, 0];
        merge(&mut ab, &[&a, &b], &mut pos_ab);
        let mut abc = MidiBuffer::new();
        let mut pos_abc = vec![0, 0];
        merge(&mut abc, &[&ab, &c], &mut pos_abc);

        let direct_notes: Vec<u8> = direct.events().iter().map(|e| e.bytes()[1]).collect();
        let abc_notes: Vec<u8> = abc.events().iter().map(|e| e.bytes()[1]).collect();
        assert_eq!(direct_notes, abc_notes);
        assert_eq!(direct_notes, vec![62, 60, 61]);
    }

    #[test]
    fn note_on_velocity_zero_normalizes_to_note_off() {
        let ev = MidiEventData::new(0, &[0x91, 64, 0]).normalized();
        assert_eq!(ev.status(), 0x81);
        assert!(ev.is_note_off());
    }

    #[test]
    fn wire_sizes_match_status_families() {
        assert_eq!(MidiEventData::wire_size_for_status(0x90), 3);
        assert_eq!(MidiEventData::wire_size_for_status(0xC0), 2);
        assert_eq!(MidiEventData::wire_size_for_status(0xF8), 1);
    }
}
