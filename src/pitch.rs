//! Mapping of raw frequency estimates onto the chromatic scale.

use std::fmt;

/// A4, the tuning reference.
pub const REFERENCE_NOTE: i32 = 69;
pub const REFERENCE_FREQ: f32 = 440.0;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A single pitch estimate snapped to the nearest chromatic note.
///
/// Unvoiced input (silence, noise) never produces one of these; estimators
/// report `None` instead, and consumers skip the sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MappedNote {
    /// Estimated fundamental, in Hz.
    pub freq: f32,
    /// MIDI-style note number (A4 = 69).
    pub number: i32,
    /// How far the estimate is from the note's reference frequency.
    pub offset_cents: i32,
}

impl MappedNote {
    pub fn name(&self) -> &'static str {
        note_name(self.number)
    }
}

impl fmt::Display for MappedNote {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{:+}c", self.name(), self.offset_cents)
    }
}

/// Returns the nearest note number for a frequency.
pub fn note_number(freq: f32) -> i32 {
    (12.0 * (freq / REFERENCE_FREQ).log2()).round() as i32 + REFERENCE_NOTE
}

/// Returns the chromatic name of a note number.
pub fn note_name(number: i32) -> &'static str {
    NOTE_NAMES[number.rem_euclid(12) as usize]
}

/// Returns the reference frequency of a note number.
pub fn note_frequency(number: i32) -> f32 {
    REFERENCE_FREQ * 2.0_f32.powf((number - REFERENCE_NOTE) as f32 / 12.0)
}

fn cents_off(freq: f32, number: i32) -> i32 {
    (1200.0 * (freq / note_frequency(number)).log2()).floor() as i32
}

/// Maps an estimator result to a note. `None` passes through untouched.
pub fn map_frequency(freq: Option<f32>) -> Option<MappedNote> {
    let freq = freq?;
    if !(freq.is_finite() && freq > 0.0) {
        return None;
    }
    let number = note_number(freq);
    Some(MappedNote {
        freq,
        number,
        offset_cents: cents_off(freq, number),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_pitch() {
        let note = map_frequency(Some(440.0)).unwrap();
        assert_eq!(note.number, 69);
        assert_eq!(note.name(), "A");
        assert_eq!(note.offset_cents, 0);
    }

    #[test]
    fn test_equal_temperament_steps() {
        for n in -24..=24 {
            let freq = 440.0 * 2.0_f32.powf(n as f32 / 12.0);
            assert_eq!(note_number(freq), 69 + n, "at {} semitones", n);
        }
    }

    #[test]
    fn test_note_names() {
        assert_eq!(note_name(60), "C");
        assert_eq!(note_name(61), "C#");
        assert_eq!(note_name(71), "B");
        // negative numbers still index the table
        assert_eq!(note_name(-3), "A");
    }

    #[test]
    fn test_cents_offset() {
        // a quarter tone above A4
        let note = map_frequency(Some(440.0 * 2.0_f32.powf(0.5 / 12.0))).unwrap();
        assert_eq!(note.number, 70);
        assert!(note.offset_cents < 0, "rounds up, offset reads negative");
    }

    #[test]
    fn test_unvoiced() {
        assert_eq!(map_frequency(None), None);
        assert_eq!(map_frequency(Some(0.0)), None);
        assert_eq!(map_frequency(Some(f32::NAN)), None);
        assert_eq!(map_frequency(Some(f32::NEG_INFINITY)), None);
    }

    #[test]
    fn test_display() {
        let note = map_frequency(Some(440.0)).unwrap();
        assert_eq!(note.to_string(), "A+0c");
    }
}
