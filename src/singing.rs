//! Aggregation of live pitch estimates into one sung note per beat.

use serde::{Deserialize, Serialize};

use crate::chart::Song;
use crate::pitch::MappedNote;

/// Beats to shift detected notes backwards, compensating for capture and
/// analysis latency.
const BEAT_LOOKBACK: i32 = 2;

/// One committed sample of singing: the note averaged over one beat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SungNote {
    /// Beat index the sample was sung at.
    pub time: i32,
    /// Detected semitone number.
    pub note: i32,
}

/// An append-only, time-ordered sequence of committed sung notes.
#[derive(Clone, Debug, Default)]
pub struct Timeline {
    notes: Vec<SungNote>,
}

impl Timeline {
    /// Appends a note. Samples at or before the last committed beat are
    /// dropped to keep times strictly increasing.
    pub fn push(&mut self, note: SungNote) {
        if self.notes.last().is_some_and(|last| note.time <= last.time) {
            return;
        }
        self.notes.push(note);
    }

    /// Returns the committed notes with `start <= time < end`.
    pub fn notes_in_range(&self, start: i32, end: i32) -> &[SungNote] {
        let lo = self.notes.partition_point(|n| n.time < start);
        let hi = self.notes.partition_point(|n| n.time < end);
        &self.notes[lo..hi]
    }

    pub fn last_beat(&self) -> Option<i32> {
        self.notes.last().map(|n| n.time)
    }

    pub fn notes(&self) -> &[SungNote] {
        &self.notes
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    Listening,
    /// Audio capture failed; the timeline stays empty.
    Failed,
}

/// Beat sampler for one performance attempt.
///
/// Driven at capture-callback cadence: each raw estimate is bucketed by the
/// chart beat playing at its (latency-adjusted) timestamp, and folded into
/// a running mean until the beat advances, at which point the mean is
/// committed as a single [`SungNote`].
#[derive(Debug)]
pub struct Singing {
    timeline: Timeline,
    state: State,
    current_beat: i32,
    samples: u32,
    average: f64,
}

impl Singing {
    pub fn new() -> Self {
        Self {
            timeline: Timeline::default(),
            state: State::Idle,
            current_beat: -1,
            samples: 0,
            average: 0.0,
        }
    }

    /// Begins a fresh attempt.
    pub fn start(&mut self) {
        if self.state != State::Failed {
            self.state = State::Listening;
        }
        self.timeline.clear();
        self.current_beat = -1;
        self.samples = 0;
        self.average = 0.0;
    }

    /// Stops listening. A partially accumulated beat is discarded.
    pub fn stop(&mut self) {
        if self.state == State::Listening {
            self.state = State::Idle;
        }
    }

    /// Records that audio capture failed. Scoring then sees an empty
    /// timeline rather than an error.
    pub fn fail(&mut self) {
        self.state = State::Failed;
    }

    pub fn ready(&self) -> bool {
        self.state != State::Failed
    }

    /// Feeds one estimator callback. `playback_ms` is the current playback
    /// position of the backing track.
    pub fn add_sample(&mut self, note: Option<MappedNote>, playback_ms: i64, song: &Song) {
        if self.state != State::Listening {
            return;
        }
        // unvoiced samples don't reset the accumulator
        let Some(note) = note else { return };

        let beat = song.ms_to_beats(playback_ms) - BEAT_LOOKBACK;
        if beat < 0 || beat < self.current_beat {
            // before the song starts, or from an already committed beat
            return;
        }
        if beat == self.current_beat {
            self.average = (self.average * self.samples as f64 + note.number as f64)
                / (self.samples + 1) as f64;
            self.samples += 1;
        } else {
            self.commit();
            self.current_beat = beat;
            self.average = note.number as f64;
            self.samples = 1;
        }
    }

    fn commit(&mut self) {
        if self.samples > 0 {
            self.timeline.push(SungNote {
                time: self.current_beat,
                note: self.average.round() as i32,
            });
        }
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// See [`Timeline::notes_in_range`].
    pub fn notes_in_range(&self, start: i32, end: i32) -> &[SungNote] {
        self.timeline.notes_in_range(start, end)
    }
}

impl Default for Singing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::map_frequency;

    fn test_song() -> Song {
        // 120 bpm, no gap: 125ms per chart beat
        Song::parse("#BPM:120\n#GAP:0\n: 0 16 69 La\nE\n").unwrap()
    }

    fn note(number: i32) -> Option<MappedNote> {
        map_frequency(Some(crate::pitch::note_frequency(number)))
    }

    /// Milliseconds at which `beat` is current, after lookback.
    fn ms_for_beat(beat: i32) -> i64 {
        (beat + 2) as i64 * 125
    }

    #[test]
    fn test_constant_note_commits_once() {
        let mut singing = Singing::new();
        singing.start();
        for i in 0..20 {
            singing.add_sample(note(69), ms_for_beat(0) + i * 5, &test_song());
        }
        // nothing committed until the beat advances
        assert!(singing.timeline().is_empty());
        singing.add_sample(note(69), ms_for_beat(1), &test_song());
        assert_eq!(singing.timeline().notes(),
            &[SungNote { time: 0, note: 69 }]);
    }

    #[test]
    fn test_average_rounds_to_nearest() {
        let mut singing = Singing::new();
        singing.start();
        // two thirds of the beat at 70, one third at 67
        singing.add_sample(note(70), ms_for_beat(0), &test_song());
        singing.add_sample(note(70), ms_for_beat(0) + 1, &test_song());
        singing.add_sample(note(67), ms_for_beat(0) + 2, &test_song());
        singing.add_sample(note(70), ms_for_beat(1), &test_song());
        assert_eq!(singing.timeline().notes(),
            &[SungNote { time: 0, note: 69 }]);
    }

    #[test]
    fn test_silence_does_not_reset() {
        let mut singing = Singing::new();
        singing.start();
        singing.add_sample(note(69), ms_for_beat(0), &test_song());
        singing.add_sample(None, ms_for_beat(0) + 1, &test_song());
        singing.add_sample(note(69), ms_for_beat(1), &test_song());
        assert_eq!(singing.timeline().notes(),
            &[SungNote { time: 0, note: 69 }]);
    }

    #[test]
    fn test_pre_song_samples_dropped() {
        let mut singing = Singing::new();
        singing.start();
        // lookback puts the first two beats in the past
        singing.add_sample(note(69), 0, &test_song());
        singing.add_sample(note(69), 125, &test_song());
        singing.add_sample(note(70), ms_for_beat(1), &test_song());
        assert!(singing.timeline().is_empty());
    }

    #[test]
    fn test_skipped_beats() {
        let mut singing = Singing::new();
        singing.start();
        singing.add_sample(note(69), ms_for_beat(0), &test_song());
        singing.add_sample(note(72), ms_for_beat(5), &test_song());
        singing.add_sample(note(72), ms_for_beat(6), &test_song());
        assert_eq!(singing.timeline().notes(), &[
            SungNote { time: 0, note: 69 },
            SungNote { time: 5, note: 72 },
        ]);
    }

    #[test]
    fn test_not_listening() {
        let mut singing = Singing::new();
        singing.add_sample(note(69), ms_for_beat(0), &test_song());
        assert!(singing.timeline().is_empty());

        singing.start();
        singing.stop();
        singing.add_sample(note(69), ms_for_beat(0), &test_song());
        assert!(singing.timeline().is_empty());
    }

    #[test]
    fn test_failed_capture() {
        let mut singing = Singing::new();
        singing.fail();
        assert!(!singing.ready());
        singing.start();
        singing.add_sample(note(69), ms_for_beat(0), &test_song());
        singing.add_sample(note(69), ms_for_beat(1), &test_song());
        assert!(singing.timeline().is_empty());
    }

    #[test]
    fn test_notes_in_range() {
        let mut timeline = Timeline::default();
        for time in [0, 2, 3, 7] {
            timeline.push(SungNote { time, note: 60 });
        }
        assert_eq!(timeline.notes_in_range(0, 4).len(), 3);
        assert_eq!(timeline.notes_in_range(2, 3).len(), 1);
        assert_eq!(timeline.notes_in_range(4, 7).len(), 0);
        assert_eq!(timeline.notes_in_range(0, i32::MAX).len(), 4);
    }

    #[test]
    fn test_timeline_rejects_stale() {
        let mut timeline = Timeline::default();
        timeline.push(SungNote { time: 3, note: 60 });
        timeline.push(SungNote { time: 3, note: 61 });
        timeline.push(SungNote { time: 1, note: 62 });
        assert_eq!(timeline.notes().len(), 1);
        assert_eq!(timeline.last_beat(), Some(3));
    }
}
