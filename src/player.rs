//! Local and remote performers of one round.

use std::rc::Rc;

use crate::chart::Song;
use crate::score::score_part;
use crate::singing::{Singing, SungNote, Timeline};

/// Common surface of everyone singing in a round, local or remote.
pub trait Player {
    fn nick(&self) -> &str;
    fn colour(&self) -> &str;
    /// Which chart part this player sings.
    fn part(&self) -> usize;
    fn score(&self) -> u32;
    fn start(&mut self);
    fn stop(&mut self);
    fn notes_in_range(&self, start: i32, end: i32) -> &[SungNote];
}

/// The player at this machine. Owns a live beat sampler; the score is
/// recomputed from the chart on demand.
pub struct LocalPlayer {
    nick: String,
    colour: String,
    song: Rc<Song>,
    part: usize,
    singing: Singing,
}

impl LocalPlayer {
    pub fn new(nick: &str, colour: &str, song: Rc<Song>, part: usize) -> Self {
        Self {
            nick: nick.into(),
            colour: colour.into(),
            song,
            part,
            singing: Singing::new(),
        }
    }

    /// The live sampler, for feeding estimator callbacks.
    pub fn singing_mut(&mut self) -> &mut Singing {
        &mut self.singing
    }

    pub fn singing(&self) -> &Singing {
        &self.singing
    }

    pub fn song(&self) -> &Song {
        &self.song
    }
}

impl Player for LocalPlayer {
    fn nick(&self) -> &str {
        &self.nick
    }

    fn colour(&self) -> &str {
        &self.colour
    }

    fn part(&self) -> usize {
        self.part
    }

    fn score(&self) -> u32 {
        match self.song.parts.get(self.part) {
            Some(part) => score_part(part, self.singing.timeline()),
            None => 0,
        }
    }

    fn start(&mut self) {
        self.singing.start();
    }

    fn stop(&mut self) {
        self.singing.stop();
    }

    fn notes_in_range(&self, start: i32, end: i32) -> &[SungNote] {
        self.singing.notes_in_range(start, end)
    }
}

/// A peer's player. Its timeline and score arrive over the wire.
pub struct RemotePlayer {
    nick: String,
    colour: String,
    part: usize,
    score: u32,
    timeline: Timeline,
}

impl RemotePlayer {
    pub fn new(nick: &str, colour: &str, part: usize) -> Self {
        Self {
            nick: nick.into(),
            colour: colour.into(),
            part,
            score: 0,
            timeline: Timeline::default(),
        }
    }

    /// Accumulates notes from a `sangNotes` broadcast.
    pub fn add_notes(&mut self, notes: &[SungNote]) {
        for &note in notes {
            self.timeline.push(note);
        }
    }

    pub fn set_score(&mut self, score: u32) {
        self.score = score;
    }
}

impl Player for RemotePlayer {
    fn nick(&self) -> &str {
        &self.nick
    }

    fn colour(&self) -> &str {
        &self.colour
    }

    fn part(&self) -> usize {
        self.part
    }

    fn score(&self) -> u32 {
        self.score
    }

    fn start(&mut self) {}

    fn stop(&mut self) {}

    fn notes_in_range(&self, start: i32, end: i32) -> &[SungNote] {
        self.timeline.notes_in_range(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pitch::{map_frequency, note_frequency};

    fn song() -> Rc<Song> {
        Rc::new(Song::parse("#BPM:120\n#GAP:0\n: 0 4 69 La\nE\n").unwrap())
    }

    #[test]
    fn test_local_player_scores_live_timeline() {
        let mut player = LocalPlayer::new("rarity", "#fff", song(), 0);
        player.start();
        for beat in 0..5i64 {
            let ms = (beat + 2) * 125;
            player.singing_mut().add_sample(
                map_frequency(Some(note_frequency(69))), ms, &song());
        }
        // beats 0..=3 committed once beat 4 arrived
        assert_eq!(player.score(), 10000);
        assert_eq!(player.notes_in_range(0, 4).len(), 4);
    }

    #[test]
    fn test_local_player_out_of_range_part() {
        let player = LocalPlayer::new("aj", "#fa0", song(), 3);
        assert_eq!(player.score(), 0);
    }

    #[test]
    fn test_remote_player_accumulates() {
        let mut player = RemotePlayer::new("twi", "#90f", 0);
        player.add_notes(&[
            SungNote { time: 0, note: 69 },
            SungNote { time: 1, note: 70 },
        ]);
        player.add_notes(&[SungNote { time: 2, note: 71 }]);
        player.set_score(4321);
        assert_eq!(player.score(), 4321);
        assert_eq!(player.notes_in_range(0, 10).len(), 3);
    }
}
