//! Scoring a sung timeline against the expected notes of a chart part.

use crate::chart::Part;
use crate::singing::Timeline;

/// Total achievable score for one part.
pub const MAX_SCORE: f64 = 10000.0;

/// Points one beat of an ordinary matched note is worth: the total spread
/// over the part's weighted scorable beats. `None` if the part has no
/// scorable beats (all freestyle), in which case nothing can be scored.
pub fn score_per_beat(part: &Part) -> Option<f64> {
    let total_beats: u32 = part.iter()
        .flat_map(|line| &line.notes)
        .filter(|note| note.kind.scored())
        .map(|note| note.kind.weight() * note.length.max(0) as u32)
        .sum();
    if total_beats == 0 {
        return None;
    }
    Some(MAX_SCORE / total_beats as f64)
}

/// Scores a timeline against a part.
///
/// A two-pointer sweep: for each expected note, sung samples inside the
/// note's beat window score `score_per_beat` (doubled for golden notes)
/// when their pitch matches. Recomputed from scratch on each call; the
/// sweep is linear and charts are small.
pub fn score_part(part: &Part, timeline: &Timeline) -> u32 {
    let Some(per_beat) = score_per_beat(part) else {
        return 0;
    };
    let actual = timeline.notes();
    let mut i = 0;
    let mut score = 0.0;

    for note in part.iter().flat_map(|line| &line.notes) {
        if !note.kind.scored() {
            continue;
        }
        while actual.get(i).is_some_and(|sung| sung.time < note.beat) {
            i += 1;
        }
        while let Some(sung) = actual.get(i) {
            if sung.time >= note.beat + note.length {
                break;
            }
            if matches_expected(sung.note, note.pitch) {
                score += per_beat * note.kind.weight() as f64;
            }
            i += 1;
        }
    }
    score.round() as u32
}

/// Pitch-class match with harmonic tolerance: a note five semitones above
/// the expected pitch is accepted, since the detector commonly lands on
/// that harmonic.
fn matches_expected(actual: i32, expected: i32) -> bool {
    pitch_matches(actual, expected) || pitch_matches(actual, expected + 5)
}

/// True if the pitch classes are within a semitone, wrapping at the octave.
fn pitch_matches(actual: i32, expected: i32) -> bool {
    let diff = (actual.rem_euclid(12) - expected.rem_euclid(12)).abs();
    diff <= 1 || diff >= 11
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::Song;
    use crate::singing::SungNote;

    fn song() -> Song {
        Song::parse("\
#BPM:120
#GAP:0
: 0 4 69 La
* 4 2 71 la~
- 8
F 8 4 0 (spoken)
: 12 2 65 la
E
").unwrap()
    }

    fn timeline(notes: &[(i32, i32)]) -> Timeline {
        let mut timeline = Timeline::default();
        for &(time, note) in notes {
            timeline.push(SungNote { time, note });
        }
        timeline
    }

    #[test]
    fn test_score_per_beat() {
        // 4 normal + 2 golden (doubled) + 2 normal beats; freestyle skipped
        assert_eq!(score_per_beat(&song().parts[0]), Some(1000.0));
    }

    #[test]
    fn test_empty_timeline_scores_zero() {
        assert_eq!(score_part(&song().parts[0], &Timeline::default()), 0);
    }

    #[test]
    fn test_perfect_replay_scores_max() {
        let sung = timeline(&[
            (0, 69), (1, 69), (2, 69), (3, 69),
            (4, 71), (5, 71),
            (12, 65), (13, 65),
        ]);
        assert_eq!(score_part(&song().parts[0], &sung), 10000);
    }

    #[test]
    fn test_octave_equivalence() {
        let sung = timeline(&[(0, 69 - 12), (1, 69 + 24)]);
        assert_eq!(score_part(&song().parts[0], &sung), 2000);
    }

    #[test]
    fn test_semitone_tolerance() {
        let sung = timeline(&[(0, 68), (1, 70), (2, 67)]);
        // 68 and 70 are within a semitone of 69; 67 is not
        assert_eq!(score_part(&song().parts[0], &sung), 2000);
    }

    #[test]
    fn test_harmonic_tolerance() {
        // five semitones sharp still counts
        let sung = timeline(&[(0, 69 + 5)]);
        assert_eq!(score_part(&song().parts[0], &sung), 1000);
        // two semitones off does not
        let sung = timeline(&[(1, 69 + 2)]);
        assert_eq!(score_part(&song().parts[0], &sung), 0);
    }

    #[test]
    fn test_golden_notes_score_double() {
        let sung = timeline(&[(4, 71)]);
        assert_eq!(score_part(&song().parts[0], &sung), 2000);
    }

    #[test]
    fn test_freestyle_never_scores() {
        let sung = timeline(&[(8, 0), (9, 0), (10, 0), (11, 0)]);
        assert_eq!(score_part(&song().parts[0], &sung), 0);
    }

    #[test]
    fn test_all_freestyle_part() {
        let song = Song::parse("#BPM:120\nF 0 4 0 yo\nE\n").unwrap();
        assert_eq!(score_per_beat(&song.parts[0]), None);
        let sung = timeline(&[(0, 60), (1, 60)]);
        assert_eq!(score_part(&song.parts[0], &sung), 0);
    }

    #[test]
    fn test_samples_outside_windows() {
        // between the golden note's end (6) and the next line (12)
        let sung = timeline(&[(6, 69), (7, 69), (11, 65)]);
        assert_eq!(score_part(&song().parts[0], &sung), 0);
    }

    #[test]
    fn test_score_bounded() {
        // every beat of the whole song matched, plus stragglers
        let mut notes = vec![];
        for t in 0..20 {
            let pitch = match t {
                0..=3 => 69,
                4..=5 => 71,
                _ => 65,
            };
            notes.push((t, pitch));
        }
        let score = score_part(&song().parts[0], &timeline(&notes));
        assert!(score <= 10000);
    }
}
