//! UltraStar chart parsing, timing, and note lookup.
//!
//! A chart is line-oriented text: `#KEY:VALUE` metadata commands, note
//! lines (`: beat length pitch text`, `*` for golden, `F` for freestyle),
//! `- beat [endbeat]` line breaks, `P` part separators for duets, and `E`
//! to end a part. Unknown commands are logged and skipped so newer charts
//! still load.

use log::warn;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("line {0}: malformed note: {1:?}")]
    BadNote(usize, String),
    #[error("line {0}: malformed line break: {1:?}")]
    BadLineBreak(usize, String),
    #[error("chart has no #BPM command")]
    MissingBpm,
    #[error("chart has no note data")]
    NoParts,
}

/// How a note is sung and scored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoteKind {
    /// Ordinary sustained note.
    Normal,
    /// Bonus note, scoring double.
    Golden,
    /// Spoken/ad-lib note, never scored.
    Freestyle,
}

impl NoteKind {
    /// Scoring weight per beat.
    pub fn weight(&self) -> u32 {
        match self {
            NoteKind::Golden => 2,
            _ => 1,
        }
    }

    pub fn scored(&self) -> bool {
        *self != NoteKind::Freestyle
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChartNote {
    pub kind: NoteKind,
    pub beat: i32,
    /// Duration in beats.
    pub length: i32,
    /// Semitone number, chart-relative.
    pub pitch: i32,
    /// Syllable text, including any trailing separator spaces.
    pub text: String,
}

/// One displayed line of lyrics.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Line {
    pub start: i32,
    pub end: Option<i32>,
    pub notes: Vec<ChartNote>,
}

/// One singable voice of a chart. Duets have two.
pub type Part = Vec<Line>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub creator: Option<String>,
    pub edition: Option<String>,
    pub language: Option<String>,
    pub genre: Option<String>,
    pub updated: Option<String>,
    pub comment: Option<String>,
    pub cover: Option<String>,
}

/// A parsed chart. Immutable once parsed; the scorer and any renderer
/// borrow it read-only.
#[derive(Clone, Debug)]
pub struct Song {
    pub metadata: Metadata,
    /// Tempo in beats per minute. Chart beats are quarter-beats of this.
    pub bpm: f32,
    /// Offset of beat 0 from the start of the audio, in ms.
    pub gap: i64,
    /// Playback start offset in seconds, if any.
    pub start: Option<f32>,
    /// Playback end in ms, if any.
    pub end: Option<i64>,
    /// Video offset in seconds.
    pub video_gap: f32,
    pub mp3: Option<String>,
    pub video: Option<String>,
    pub background: Option<String>,
    pub parts: Vec<Part>,
}

impl Song {
    pub fn parse(text: &str) -> Result<Song, ChartError> {
        let mut song = Song {
            metadata: Metadata::default(),
            bpm: 0.0,
            gap: 0,
            start: None,
            end: None,
            video_gap: 0.0,
            mp3: None,
            video: None,
            background: None,
            parts: Vec::new(),
        };
        let mut saw_bpm = false;
        let mut part: Part = Vec::new();
        let mut line = Line::default();

        for (num, raw) in text.lines().enumerate() {
            let raw = raw.trim_end_matches('\r');
            if raw.is_empty() {
                continue;
            }
            match raw.as_bytes()[0] {
                b'#' => saw_bpm |= song.parse_command(raw),
                b'P' => {
                    // part separator; ignored before any note data
                    if !part.is_empty() {
                        if !line.notes.is_empty() {
                            part.push(std::mem::take(&mut line));
                        }
                        song.parts.push(std::mem::take(&mut part));
                        line = Line::default();
                    }
                }
                b':' | b'*' | b'F' => line.notes.push(parse_note(num + 1, raw)?),
                b'-' => {
                    part.push(std::mem::take(&mut line));
                    line = parse_line_break(num + 1, raw)?;
                }
                b'E' => {
                    part.push(std::mem::take(&mut line));
                    song.parts.push(std::mem::take(&mut part));
                }
                _ => warn!("ignoring unrecognized chart line {}: {:?}", num + 1, raw),
            }
        }

        if !saw_bpm {
            return Err(ChartError::MissingBpm);
        }
        if song.parts.is_empty() {
            return Err(ChartError::NoParts);
        }
        Ok(song)
    }

    /// Handles a `#KEY:VALUE` command. Returns true if it set the tempo.
    fn parse_command(&mut self, raw: &str) -> bool {
        let body = &raw[1..];
        let (key, value) = match body.split_once(':') {
            Some((k, v)) => (k.to_uppercase(), v),
            None => {
                warn!("ignoring chart command without value: {:?}", raw);
                return false;
            }
        };
        let meta = &mut self.metadata;
        match key.as_str() {
            "TITLE" => meta.title = Some(value.into()),
            "ARTIST" => meta.artist = Some(value.into()),
            "CREATOR" => meta.creator = Some(value.into()),
            "EDITION" => meta.edition = Some(value.into()),
            "LANGUAGE" => meta.language = Some(value.into()),
            "GENRE" => meta.genre = Some(value.into()),
            "UPDATED" => meta.updated = Some(value.into()),
            "COMMENT" => meta.comment = Some(value.into()),
            "COVER" => meta.cover = Some(value.into()),
            "MP3" => self.mp3 = Some(value.into()),
            "VIDEO" => self.video = Some(value.into()),
            "BACKGROUND" => self.background = Some(value.into()),
            "BPM" => match parse_decimal(value) {
                Some(bpm) => {
                    self.bpm = bpm;
                    return true;
                }
                None => warn!("ignoring bad #BPM value {:?}", value),
            },
            "GAP" => match value.parse() {
                Ok(gap) => self.gap = gap,
                Err(_) => warn!("ignoring bad #GAP value {:?}", value),
            },
            "VIDEOGAP" => match parse_decimal(value) {
                Some(v) => self.video_gap = v,
                None => warn!("ignoring bad #VIDEOGAP value {:?}", value),
            },
            "START" => match parse_decimal(value) {
                Some(v) => self.start = Some(v),
                None => warn!("ignoring bad #START value {:?}", value),
            },
            "END" => match value.parse() {
                Ok(v) => self.end = Some(v),
                Err(_) => warn!("ignoring bad #END value {:?}", value),
            },
            _ => warn!("ignoring unknown chart command {:?}", key),
        }
        false
    }

    /// Converts a playback time in ms to a chart beat index.
    pub fn ms_to_beats(&self, ms: i64) -> i32 {
        (((ms - self.gap) as f64 / 60000.0) * self.bpm as f64 * 4.0).floor() as i32
    }

    /// Returns the line being sung at `ms`, if any, along with its index.
    /// Between a line's end beat and the next line's start there is nothing
    /// to display.
    pub fn line_at(&self, part: usize, ms: i64) -> Option<(usize, &Line)> {
        let lines = self.parts.get(part)?;
        let beat = self.ms_to_beats(ms).max(0);
        for (i, pair) in lines.windows(2).enumerate() {
            if beat >= pair[0].start && beat < pair[1].start {
                if pair[0].end.is_some_and(|end| end <= beat) {
                    return None;
                }
                return Some((i, &pair[0]));
            }
        }
        let last = lines.last()?;
        if beat >= last.start && last.end.map_or(true, |end| end > beat) {
            return Some((lines.len() - 1, last));
        }
        None
    }

    pub fn line_at_index(&self, part: usize, index: usize) -> Option<&Line> {
        self.parts.get(part)?.get(index)
    }

    /// URL of the backing audio under the track's base URL.
    pub fn mp3_url(&self, base: &str) -> Option<String> {
        Some(format!("{}/{}", base, self.mp3.as_deref()?))
    }

    pub fn video_url(&self, base: &str) -> Option<String> {
        Some(format!("{}/{}", base, self.video.as_deref()?))
    }

    pub fn background_url(&self, base: &str) -> Option<String> {
        Some(format!("{}/{}", base, self.background.as_deref()?))
    }

    pub fn cover_url(&self, base: &str) -> Option<String> {
        Some(format!("{}/{}", base, self.metadata.cover.as_deref()?))
    }
}

impl Line {
    /// Returns the note sounding at `beat`, if any.
    pub fn note_at(&self, beat: i32) -> Option<&ChartNote> {
        self.notes.iter()
            .find(|n| beat >= n.beat && beat < n.beat + n.length)
    }
}

/// Parses a number that may use a comma as decimal separator.
fn parse_decimal(value: &str) -> Option<f32> {
    value.replace(',', ".").parse().ok()
}

fn parse_note(num: usize, raw: &str) -> Result<ChartNote, ChartError> {
    let bad = || ChartError::BadNote(num, raw.into());
    let mut fields = raw.splitn(5, ' ');
    let kind = match fields.next().ok_or_else(bad)? {
        ":" => NoteKind::Normal,
        "*" => NoteKind::Golden,
        "F" => NoteKind::Freestyle,
        _ => return Err(bad()),
    };
    let mut int = || -> Result<i32, ChartError> {
        fields.next().ok_or_else(bad)?.parse().map_err(|_| bad())
    };
    let (beat, length, pitch) = (int()?, int()?, int()?);
    let text = fields.next().unwrap_or("").to_string();
    Ok(ChartNote { kind, beat, length, pitch, text })
}

fn parse_line_break(num: usize, raw: &str) -> Result<Line, ChartError> {
    let bad = || ChartError::BadLineBreak(num, raw.into());
    let mut fields = raw.split(' ').skip(1);
    let start = fields.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let end = match fields.next() {
        Some(s) => Some(s.parse().map_err(|_| bad())?),
        None => None,
    };
    Ok(Line { start, end, notes: Vec::new() })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const SIMPLE: &str = "\
#TITLE:Test Track
#ARTIST:Somepony
#BPM:120
#GAP:1000
#MP3:audio.mp3
: 0 4 69 La
* 4 2 71 la~
- 8
F 8 4 0 (spoken)
: 12 4 69 la
E
";

    #[test]
    fn test_parse_simple() {
        let song = Song::parse(SIMPLE).unwrap();
        assert_eq!(song.metadata.title.as_deref(), Some("Test Track"));
        assert_eq!(song.metadata.artist.as_deref(), Some("Somepony"));
        assert_eq!(song.bpm, 120.0);
        assert_eq!(song.gap, 1000);
        assert_eq!(song.mp3.as_deref(), Some("audio.mp3"));
        assert_eq!(song.parts.len(), 1);
        let part = &song.parts[0];
        assert_eq!(part.len(), 2);
        assert_eq!(part[0].notes, vec![
            ChartNote {
                kind: NoteKind::Normal,
                beat: 0,
                length: 4,
                pitch: 69,
                text: "La".into(),
            },
            ChartNote {
                kind: NoteKind::Golden,
                beat: 4,
                length: 2,
                pitch: 71,
                text: "la~".into(),
            },
        ]);
        assert_eq!(part[1].start, 8);
        assert_eq!(part[1].end, None);
        assert_eq!(part[1].notes[0].kind, NoteKind::Freestyle);
    }

    #[test]
    fn test_media_urls() {
        let song = Song::parse(SIMPLE).unwrap();
        let base = "https://music.example/7";
        assert_eq!(song.mp3_url(base).as_deref(),
            Some("https://music.example/7/audio.mp3"));
        assert_eq!(song.video_url(base), None);
        assert_eq!(song.background_url(base), None);
    }

    #[test]
    fn test_parse_duet() {
        let text = "\
#BPM:240
P1
: 0 2 60 One
E
P2
: 0 2 64 Two
E
";
        let song = Song::parse(text).unwrap();
        assert_eq!(song.parts.len(), 2);
        assert_eq!(song.parts[0][0].notes[0].pitch, 60);
        assert_eq!(song.parts[1][0].notes[0].pitch, 64);
    }

    #[test]
    fn test_parse_comma_decimal_bpm() {
        let song = Song::parse("#BPM:112,5\n: 0 1 60 x\nE\n").unwrap();
        assert_eq!(song.bpm, 112.5);
    }

    #[test]
    fn test_parse_unknown_command_ignored() {
        let song = Song::parse("#BPM:120\n#FLAVOR:grape\n: 0 1 60 x\nE\n").unwrap();
        assert_eq!(song.parts.len(), 1);
    }

    #[test]
    fn test_parse_line_break_with_end() {
        let song = Song::parse("#BPM:120\n: 0 2 60 x\n- 4 6\n: 8 2 60 y\nE\n")
            .unwrap();
        assert_eq!(song.parts[0][1].start, 4);
        assert_eq!(song.parts[0][1].end, Some(6));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(Song::parse(": 0 1 60 x\nE\n"),
            Err(ChartError::MissingBpm)));
        assert!(matches!(Song::parse("#BPM:120\n"),
            Err(ChartError::NoParts)));
        assert!(matches!(Song::parse("#BPM:120\n: zero 1 60 x\nE\n"),
            Err(ChartError::BadNote(2, _))));
    }

    #[test]
    fn test_ms_to_beats() {
        let song = Song::parse("#BPM:120\n#GAP:0\n: 0 4 69 La\nE\n").unwrap();
        // 120 bpm = 8 chart beats per second
        assert_eq!(song.ms_to_beats(0), 0);
        assert_eq!(song.ms_to_beats(124), 0);
        assert_eq!(song.ms_to_beats(125), 1);
        assert_eq!(song.ms_to_beats(1000), 8);
        assert_eq!(song.ms_to_beats(-200), -2);
    }

    #[test]
    fn test_ms_to_beats_gap() {
        let song = Song::parse(SIMPLE).unwrap();
        assert_eq!(song.ms_to_beats(0), -8);
        assert_eq!(song.ms_to_beats(1000), 0);
        assert_eq!(song.ms_to_beats(1500), 4);
    }

    #[test]
    fn test_line_at() {
        let song = Song::parse(SIMPLE).unwrap();
        // gap is 1000ms; first line runs from beat 0 until the break at 8
        assert_eq!(song.line_at(0, 1000).map(|(i, _)| i), Some(0));
        assert_eq!(song.line_at(0, 1900).map(|(i, _)| i), Some(0));
        assert_eq!(song.line_at(0, 2000).map(|(i, _)| i), Some(1));
        // before the song, beat clamps to 0
        assert_eq!(song.line_at(0, 0).map(|(i, _)| i), Some(0));
        assert_eq!(song.line_at(1, 1000), None);
    }

    #[test]
    fn test_note_at() {
        let song = Song::parse(SIMPLE).unwrap();
        let line = &song.parts[0][0];
        assert_eq!(line.note_at(0).map(|n| n.pitch), Some(69));
        assert_eq!(line.note_at(5).map(|n| n.pitch), Some(71));
        assert_eq!(line.note_at(7), None);
    }
}
